mod common;

use breakroom::debugger::engine::{PlainValue, Value, ValueKind};
use breakroom::debugger::scripted::{ScriptOp, ScriptedEngine};
use breakroom::debugger::{AdapterKind, Config};
use common::{adapter_pair, boot, wait_until};
use std::time::Duration;

fn int(n: i64) -> Value {
    PlainValue::new("Integer", n.to_string())
        .kind(ValueKind::Number)
        .into_value()
}

fn nonstop_config() -> Config {
    Config {
        nonstop: true,
        no_color: true,
        ..Config::default()
    }
}

const SRC_A: &str = "a1\na2\na3\na4\na5\na6\n";

#[test]
fn test_line_breakpoint_suspends_before_next_line() {
    let engine = ScriptedEngine::new();
    engine.add_source("a.src", SRC_A);

    let (session, ui, _atx) = boot(&engine, nonstop_config(), AdapterKind::Repl);
    let api = session.api();
    api.add_line_breakpoint("a.src", 5, None).unwrap();

    let script = vec![
        ScriptOp::call("main", "a.src", 1),
        ScriptOp::line(1),
        ScriptOp::line(2),
        ScriptOp::line(3),
        ScriptOp::line(4),
        ScriptOp::line_with(5, vec![("x", int(42))]),
        ScriptOp::line(6),
        ScriptOp::ret(int(0)),
    ];
    let handle = engine.spawn_thread(1, "main", script);

    wait_until(
        || {
            api.thread_snapshots()
                .iter()
                .any(|t| t.waiting && t.visible_frames)
        },
        "thread suspended at the breakpoint",
    );

    // exactly one suspend event, tagged with the breakpoint key
    wait_until(
        || ui.event_count("SuspendBreakpoint") >= 1,
        "suspend event rendered",
    );
    assert_eq!(ui.event_count("SuspendBreakpoint"), 1);
    assert!(ui.events.lock().unwrap()[0].contains("a.src:5"));

    // the thread is parked at line 5; no further code ran on it
    std::thread::sleep(Duration::from_millis(50));
    assert!(!handle.is_finished());
    let snapshot = &api.thread_snapshots()[0];
    assert_eq!(snapshot.location.as_ref().unwrap().line, 5);

    ui.cmd("continue");
    handle.join().unwrap();

    let mut session = session;
    session.deactivate();
}

#[test]
fn test_subsession_exclusivity() {
    let engine = ScriptedEngine::new();
    engine.add_source("a.src", SRC_A);
    engine.add_source("b.src", "b1\nb2\n");

    let (session, ui, _atx) = boot(&engine, nonstop_config(), AdapterKind::Repl);
    let api = session.api();
    api.add_line_breakpoint("a.src", 2, None).unwrap();

    let script1 = vec![
        ScriptOp::call("main", "a.src", 1),
        ScriptOp::line(1),
        ScriptOp::line(2),
        ScriptOp::line(3),
        ScriptOp::ret(int(0)),
    ];
    let mut script2 = vec![ScriptOp::call("worker", "b.src", 1)];
    for _ in 0..200 {
        script2.push(ScriptOp::line(1));
        script2.push(ScriptOp::line(2));
        script2.push(ScriptOp::Sleep(Duration::from_millis(5)));
    }
    script2.push(ScriptOp::ret(int(0)));

    let h2 = engine.spawn_thread(2, "worker", script2);
    let h1 = engine.spawn_thread(1, "main", script1);

    // one thread interactively inspectable, the peer transparently held
    wait_until(
        || {
            let snapshots = api.thread_snapshots();
            snapshots.iter().any(|t| t.waiting && t.visible_frames)
                && snapshots.iter().any(|t| t.waiting && !t.visible_frames)
        },
        "both threads parked",
    );

    let snapshots = api.thread_snapshots();
    assert_eq!(
        snapshots.iter().filter(|t| t.visible_frames).count(),
        1,
        "exactly one thread owns a visible frame snapshot: {snapshots:?}"
    );
    let visible = snapshots.iter().find(|t| t.visible_frames).unwrap();
    assert_eq!(visible.location.as_ref().unwrap().to_string(), "a.src:2");

    // leaving the subsession restarts every held peer
    ui.cmd("continue");
    h1.join().unwrap();
    h2.join().unwrap();

    let mut session = session;
    session.deactivate();
}

#[test]
fn test_postmortem_mode_rejects_stepping() {
    let engine = ScriptedEngine::new();
    engine.add_source("a.src", SRC_A);

    let config = Config {
        postmortem: true,
        ..nonstop_config()
    };
    let (session, ui, _atx) = boot(&engine, config, AdapterKind::Repl);
    let api = session.api();
    api.add_line_breakpoint("a.src", 1, None).unwrap();

    let script = vec![
        ScriptOp::call("main", "a.src", 1),
        ScriptOp::line(1),
        ScriptOp::line(2),
        ScriptOp::ret(int(0)),
    ];
    let handle = engine.spawn_thread(1, "main", script);

    wait_until(
        || api.thread_snapshots().iter().any(|t| t.waiting),
        "thread suspended",
    );

    ui.cmd("next");
    ui.wait_output_contains("can not use this command on postmortem mode");

    // no resume happened
    let snapshot = &api.thread_snapshots()[0];
    assert!(snapshot.waiting);
    assert!(!handle.is_finished());

    ui.cmd("continue");
    handle.join().unwrap();

    let mut session = session;
    session.deactivate();
}

#[test]
fn test_duplicate_catch_breakpoint_is_reported_once() {
    let engine = ScriptedEngine::new();
    engine.add_source("a.src", SRC_A);

    let (session, ui, _atx) = boot(&engine, nonstop_config(), AdapterKind::Repl);
    let api = session.api();
    api.add_line_breakpoint("a.src", 1, None).unwrap();

    let script = vec![
        ScriptOp::call("main", "a.src", 1),
        ScriptOp::line(1),
        ScriptOp::ret(int(0)),
    ];
    let handle = engine.spawn_thread(1, "main", script);

    wait_until(
        || api.thread_snapshots().iter().any(|t| t.waiting),
        "thread suspended",
    );

    ui.cmd("catch RuntimeError");
    ui.wait_output_contains("BP - Catch");

    ui.cmd("catch RuntimeError");
    ui.wait_output_contains("duplicated breakpoint");
    assert_eq!(ui.output_count("duplicated breakpoint"), 1);

    // the registry still holds exactly one catch entry
    let before = ui.outputs.lock().unwrap().len();
    ui.cmd("break");
    ui.wait_output_contains("BP - Line");
    let listing: Vec<String> = ui.outputs.lock().unwrap()[before..].to_vec();
    assert_eq!(
        listing.iter().filter(|l| l.contains("BP - Catch")).count(),
        1
    );

    ui.cmd("continue");
    handle.join().unwrap();

    let mut session = session;
    session.deactivate();
}

#[test]
fn test_step_next_does_not_dive_into_calls() {
    let engine = ScriptedEngine::new();
    engine.add_source("a.src", SRC_A);

    let (session, ui, _atx) = boot(&engine, nonstop_config(), AdapterKind::Repl);
    let api = session.api();
    api.add_line_breakpoint("a.src", 4, None).unwrap();

    let script = vec![
        ScriptOp::call("main", "a.src", 4),
        ScriptOp::line(4),
        // a call the step must not dive into
        ScriptOp::call("helper", "a.src", 1),
        ScriptOp::line(1),
        ScriptOp::line(2),
        ScriptOp::ret(int(7)),
        ScriptOp::line(5),
        ScriptOp::line(6),
        ScriptOp::ret(int(0)),
    ];
    let handle = engine.spawn_thread(1, "main", script);

    wait_until(
        || api.thread_snapshots().iter().any(|t| t.visible_frames),
        "suspended at the breakpoint",
    );
    assert_eq!(
        api.thread_snapshots()[0].location.as_ref().unwrap().line,
        4
    );

    ui.cmd("next");

    wait_until(
        || {
            api.thread_snapshots()
                .iter()
                .any(|t| t.visible_frames && t.location.as_ref().map(|l| l.line) == Some(5))
        },
        "step over completed on the next line",
    );
    // strictly later in the same file, not past the next traceable line
    let loc = api.thread_snapshots()[0].location.clone().unwrap();
    assert_eq!(loc.path, "a.src");
    assert!(loc.line > 4 && loc.line <= 5);
    // no stop happened inside the helper frames
    wait_until(|| ui.event_count("Suspended") >= 1, "step event rendered");
    assert_eq!(ui.event_count("Suspended"), 1);

    ui.cmd("continue");
    handle.join().unwrap();

    let mut session = session;
    session.deactivate();
}

#[test]
fn test_nonstop_off_stops_at_program_start() {
    let engine = ScriptedEngine::new();
    engine.add_source("a.src", SRC_A);

    let config = Config {
        no_color: true,
        ..Config::default()
    };
    let (session, ui, _atx) = boot(&engine, config, AdapterKind::Repl);
    let api = session.api();

    let script = vec![
        ScriptOp::call("main", "a.src", 1),
        ScriptOp::line(1),
        ScriptOp::line(2),
        ScriptOp::ret(int(0)),
    ];
    let handle = engine.spawn_thread(1, "main", script);

    wait_until(
        || api.thread_snapshots().iter().any(|t| t.visible_frames),
        "stopped at the beginning",
    );
    assert_eq!(
        api.thread_snapshots()[0].location.as_ref().unwrap().line,
        1
    );
    wait_until(|| ui.event_count("Suspended") >= 1, "start event rendered");
    assert_eq!(ui.event_count("Suspended"), 1);

    ui.cmd("c");
    handle.join().unwrap();

    let mut session = session;
    session.deactivate();
}

#[test]
fn test_boot_commands_run_before_the_first_line() {
    let engine = ScriptedEngine::new();
    engine.add_source("a.src", SRC_A);

    let (session, ui, _atx) = boot(&engine, nonstop_config(), AdapterKind::Repl);
    let api = session.api();
    session.run_on_boot(vec!["break a.src:3".to_string()]);

    let script = vec![
        ScriptOp::call("main", "a.src", 1),
        ScriptOp::line(1),
        ScriptOp::line(2),
        ScriptOp::line(3),
        ScriptOp::line(4),
        ScriptOp::ret(int(0)),
    ];
    let handle = engine.spawn_thread(1, "main", script);

    // the boot script installed the breakpoint before any line ran
    wait_until(
        || api.thread_snapshots().iter().any(|t| t.visible_frames),
        "suspended at the boot-script breakpoint",
    );
    assert_eq!(
        api.thread_snapshots()[0].location.as_ref().unwrap().line,
        3
    );
    assert!(ui.output_contains("init break a.src:3"));

    ui.cmd("continue");
    handle.join().unwrap();

    let mut session = session;
    session.deactivate();
}

#[test]
fn test_trap_suspend_reports_the_sigint_handler() {
    let engine = ScriptedEngine::new();
    engine.add_source("a.src", SRC_A);

    let (session, ui, _atx) = boot(&engine, nonstop_config(), AdapterKind::Repl);
    let api = session.api();
    session.intercept_sigint(Some("p 1".to_string()));

    let mut script = vec![ScriptOp::call("main", "a.src", 1)];
    for _ in 0..400 {
        script.push(ScriptOp::line(1));
        script.push(ScriptOp::Sleep(Duration::from_millis(5)));
    }
    script.push(ScriptOp::ret(int(0)));
    let handle = engine.spawn_thread(1, "main", script);

    wait_until(|| !api.thread_snapshots().is_empty(), "thread registered");
    api.pause();

    wait_until(
        || api.thread_snapshots().iter().any(|t| t.waiting),
        "trap suspend",
    );
    ui.wait_output_contains("registered as SIGINT handler");
    assert!(ui.event_count("SuspendTrap") >= 1);

    // `sigint` feeds the intercepted handler through the preset queue and
    // auto-continues
    ui.cmd("sigint");
    ui.wait_output_contains("=> 1");

    handle.join().unwrap();

    let mut session = session;
    session.deactivate();
}

#[test]
fn test_adapter_swap_keeps_session_alive() {
    let engine = ScriptedEngine::new();
    engine.add_source("a.src", SRC_A);

    let (session, ui, atx) = boot(&engine, nonstop_config(), AdapterKind::Repl);
    let api = session.api();
    api.add_line_breakpoint("a.src", 2, None).unwrap();

    let script = vec![
        ScriptOp::call("main", "a.src", 1),
        ScriptOp::line(1),
        ScriptOp::line(2),
        ScriptOp::line(3),
        ScriptOp::ret(int(0)),
    ];
    let handle = engine.spawn_thread(1, "main", script);

    wait_until(
        || api.thread_snapshots().iter().any(|t| t.waiting),
        "thread suspended",
    );

    // a new connection replaces the active adapter mid-session
    let (ui2, adapter2) = adapter_pair(AdapterKind::Repl);
    atx.send(adapter2).unwrap();
    drop(ui);

    ui2.cmd("info locals");
    ui2.wait_output_contains("%self");

    ui2.cmd("continue");
    handle.join().unwrap();

    let mut session = session;
    session.deactivate();
}
