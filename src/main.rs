use anyhow::Context;
use breakroom::debugger::engine::{PlainValue, Value, ValueKind};
use breakroom::debugger::scripted::{ScriptOp, ScriptedEngine};
use breakroom::debugger::{Config, Session};
use breakroom::ui;
use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;

const DEMO_PATH: &str = "demo/app.src";
const DEMO_SRC: &str = "\
def fib(n)
  return n if n < 2
  fib(n - 1) + fib(n - 2)
end

loop do
  value = fib(10)
  total = value + 1
  sleep 0.2
end
";

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// TCP listen host
    #[arg(long, default_value_t = String::from("127.0.0.1"))]
    host: String,

    /// TCP listen port
    #[arg(long, default_value_t = 12345)]
    port: u16,

    /// Listen on a UNIX domain socket instead of TCP
    #[arg(long)]
    sock_path: Option<PathBuf>,

    /// Do not stop at the beginning of the demo program
    #[arg(long)]
    nonstop: bool,

    /// Frontend to print attach instructions for ("chrome" or "vscode")
    #[arg(long)]
    open: Option<String>,

    /// File of debug commands to run when the demo program starts
    #[arg(long)]
    init_script: Option<PathBuf>,

    /// Secret cookie checked against the REPL greeting
    #[arg(long, env = "BREAKROOM_COOKIE")]
    cookie: Option<String>,
}

/// Run the bundled demo debuggee under the debugger and wait for frontends
/// to attach.
fn main() -> anyhow::Result<()> {
    env_logger::init();
    let args = Args::parse();

    let mut config = Config {
        host: Some(args.host.clone()),
        port: Some(args.port),
        sock_path: args.sock_path.clone(),
        nonstop: args.nonstop,
        cookie: args.cookie,
        entry_script: Some(DEMO_PATH.to_string()),
        ..Config::default()
    };
    if let Some(open) = &args.open {
        config
            .set("open_frontend", open)
            .context("unknown frontend")?;
    }

    let engine = ScriptedEngine::new();
    engine.add_source(DEMO_PATH, DEMO_SRC);
    engine.define_method("Object#fib");

    let mut session = Session::new(engine.clone(), config);
    engine.install_listener(session.listener());
    if let Some(path) = &args.init_script {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("read init script {}", path.display()))?;
        session.run_on_boot(text.lines().map(str::to_string).collect());
    }

    let incoming = match &args.sock_path {
        Some(path) => ui::listen_unix(path, session.api())?,
        None => {
            let (addr, incoming) = ui::listen_tcp(&args.host, args.port, session.api())?;
            eprintln!("Debugger can attach via TCP/IP ({addr})");
            incoming
        }
    };
    session.activate(incoming);

    let worker = engine.spawn_thread(2, "worker", worker_script());
    let main_thread = engine.spawn_thread(1, "main", main_script());

    let _ = main_thread.join();
    let _ = worker.join();
    session.deactivate();
    Ok(())
}

fn int(n: i64) -> Value {
    PlainValue::new("Integer", n.to_string())
        .kind(ValueKind::Number)
        .into_value()
}

fn fib_call(n: i64) -> Vec<ScriptOp> {
    let mut ops = vec![
        ScriptOp::call("Object#fib", DEMO_PATH, 1),
        ScriptOp::line_with(2, vec![("n", int(n))]),
    ];
    if n < 2 {
        ops.push(ScriptOp::ret(int(n)));
        return ops;
    }
    ops.push(ScriptOp::line_with(3, vec![("n", int(n))]));
    ops.extend(fib_call(n - 1));
    ops.extend(fib_call(n - 2));
    ops.push(ScriptOp::ret(int(fib(n))));
    ops
}

fn fib(n: i64) -> i64 {
    if n < 2 {
        n
    } else {
        fib(n - 1) + fib(n - 2)
    }
}

fn main_script() -> Vec<ScriptOp> {
    let mut ops = vec![ScriptOp::call("main", DEMO_PATH, 6)];
    for _ in 0..600 {
        ops.push(ScriptOp::line(7));
        ops.extend(fib_call(4));
        ops.push(ScriptOp::line_with(8, vec![("value", int(fib(4)))]));
        ops.push(ScriptOp::line_with(
            9,
            vec![("value", int(fib(4))), ("total", int(fib(4) + 1))],
        ));
        ops.push(ScriptOp::Sleep(Duration::from_millis(200)));
    }
    ops.push(ScriptOp::ret(int(0)));
    ops
}

fn worker_script() -> Vec<ScriptOp> {
    let mut ops = vec![ScriptOp::call("worker", DEMO_PATH, 6)];
    for _ in 0..600 {
        ops.push(ScriptOp::line(7));
        ops.extend(fib_call(3));
        ops.push(ScriptOp::line_with(8, vec![("value", int(fib(3)))]));
        ops.push(ScriptOp::Sleep(Duration::from_millis(200)));
    }
    ops.push(ScriptOp::ret(int(0)));
    ops
}
