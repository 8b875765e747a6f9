//! The REPL command grammar.
//!
//! One line in, one [`Command`] out. Verbs and their aliases are parsed with
//! nom; argument tails keep the original line-oriented forms. Anything the
//! grammar does not recognize falls back to `pp <line>` evaluation.

use crate::debugger::client::{EvalKind, StepKind};
use nom::branch::alt;
use nom::bytes::complete::tag;
use nom::character::complete::{alphanumeric1, digit1, multispace1, not_line_ending, one_of};
use nom::combinator::{eof, map, not, opt, peek};
use nom::multi::many0;
use nom::sequence::{delimited, preceded, terminated};
use nom::{IResult, Parser};
use nom_supreme::error::ErrorTree;

/// External commands that can be processed by the session.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Step { kind: StepKind, count: Option<u32> },
    Continue,
    Quit { force: bool },
    Kill { force: bool },
    Sigint,
    Break(Option<String>),
    Catch(Option<String>),
    Watch(Option<String>),
    Delete(Option<usize>),
    Backtrace { max: Option<usize>, pattern: Option<String> },
    List(ListArg),
    Edit(Option<String>),
    Info { sub: InfoSub, pattern: Option<String> },
    Outline(Option<String>),
    Display(Option<String>),
    Undisplay(Option<usize>),
    Frame(Option<usize>),
    Up,
    Down,
    Eval { kind: EvalKind, expr: String },
    Irb,
    Trace(TraceCommand),
    Record(Option<bool>),
    Thread(Option<usize>),
    Config(ConfigCommand),
    Source(String),
    Open(Option<String>),
    Help(Option<String>),
}

#[derive(Debug, Clone, PartialEq)]
pub enum ListArg {
    Next,
    Prev,
    Start(usize),
    Range(usize, usize),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InfoSub {
    Default,
    Locals,
    Ivars,
    Consts,
    Globals,
    Threads,
}

#[derive(Debug, Clone, PartialEq)]
pub enum TraceCommand {
    Show,
    Line { pattern: Option<String>, into: Option<String> },
    Call { pattern: Option<String>, into: Option<String> },
    Exception { pattern: Option<String>, into: Option<String> },
    Object { expr: String, pattern: Option<String>, into: Option<String> },
    OffIndex(usize),
    Off(Option<String>),
}

#[derive(Debug, Clone, PartialEq)]
pub enum ConfigCommand {
    ShowAll,
    Show(String),
    Set(String, String),
    Append(String, String),
    Unset(String),
}

/// A tokenized breakpoint spec: `sig` plus `if:`/`do:`/`pre:`/`path:`
/// clauses, each clause running to the next recognized keyword token.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BreakSpec {
    pub sig: String,
    pub cond: Option<String>,
    pub pre: Option<String>,
    pub do_cmd: Option<String>,
    pub path: Option<String>,
}

const BREAK_KEYWORDS: [&str; 4] = ["if:", "do:", "pre:", "path:"];

pub fn parse_break(arg: &str) -> BreakSpec {
    let mut mode = "sig";
    let mut sig = Vec::new();
    let mut cond = Vec::new();
    let mut pre = Vec::new();
    let mut do_cmd = Vec::new();
    let mut path = Vec::new();

    for word in arg.split_whitespace() {
        if BREAK_KEYWORDS.contains(&word) {
            mode = &word[..word.len() - 1];
            continue;
        }
        match mode {
            "if" => cond.push(word),
            "do" => do_cmd.push(word),
            "pre" => pre.push(word),
            "path" => path.push(word),
            _ => sig.push(word),
        }
    }

    let join = |words: Vec<&str>| {
        let joined = words.join(" ");
        (!joined.is_empty()).then_some(joined)
    };
    BreakSpec {
        sig: sig.join(" "),
        cond: join(cond),
        pre: join(pre),
        do_cmd: join(do_cmd),
        path: join(path),
    }
}

// argument-tail regexes, compiled once
mod patterns {
    macro_rules! lazy_regex {
        ($name: ident, $re: literal) => {
            pub(super) fn $name() -> &'static regex::Regex {
                static RE: std::sync::OnceLock<regex::Regex> = std::sync::OnceLock::new();
                RE.get_or_init(|| regex::Regex::new($re).expect("valid regex"))
            }
        };
    }
    lazy_regex!(bt_arg, r"\A(?:(\d+))?\s*(?:/(.*)/)?\z");
    lazy_regex!(list_range, r"\A(\d+)(?:-(\d+))?\z");
    lazy_regex!(pattern_tail, r"\s*/(.+)/\z");
    lazy_regex!(into_tail, r"\s*into:\s*(\S+)");
    lazy_regex!(config_set, r"\A(\w+)\s*=\s*(.+)\z");
    lazy_regex!(config_set_kw, r"\Aset\s+(\w+)\s+(.+)\z");
    lazy_regex!(config_append, r"\A(\w+)\s*<<\s*(.+)\z");
    lazy_regex!(config_append_kw, r"\Aappend\s+(\w+)\s+(.+)\z");
    lazy_regex!(config_unset, r"\Aunset\s+(\w+)\z");
    lazy_regex!(config_key, r"\A(\w+)\z");
}

type PResult<'a, T> = IResult<&'a str, T, ErrorTree<&'a str>>;

fn verb<'a>(long: &'static str, short: &'static str) -> impl FnMut(&'a str) -> PResult<'a, ()> {
    map(
        terminated(alt((tag(long), tag(short))), not(alphanumeric1)),
        |_| (),
    )
}

fn verb1<'a>(name: &'static str) -> impl FnMut(&'a str) -> PResult<'a, ()> {
    map(terminated(tag(name), not(alphanumeric1)), |_| ())
}

/// The rest of the line after the verb, trimmed; `None` when empty.
fn rest(input: &str) -> PResult<'_, Option<String>> {
    map(
        opt(preceded(multispace1, not_line_ending)),
        |tail: Option<&str>| {
            let tail = tail.map(str::trim).unwrap_or_default();
            (!tail.is_empty()).then(|| tail.to_string())
        },
    )(input)
}

fn number(input: &str) -> PResult<'_, u32> {
    map(digit1, |d: &str| d.parse().unwrap_or(0))(input)
}

fn command<'a, F>(inner: F) -> impl FnMut(&'a str) -> PResult<'a, Command>
where
    F: Parser<&'a str, Command, ErrorTree<&'a str>>,
{
    delimited(
        many0(one_of(" \t")),
        inner,
        preceded(many0(one_of(" \t\r\n")), eof),
    )
}

impl Command {
    /// Parse one REPL line. Unrecognized input becomes `pp <line>`, as the
    /// evaluation fallback is part of the grammar.
    pub fn parse(input: &str) -> Command {
        Self::parse_inner(input).unwrap_or_else(|| Command::Eval {
            kind: EvalKind::Pp,
            expr: input.trim().to_string(),
        })
    }

    fn parse_inner(input: &str) -> Option<Command> {
        fn step_parser(input: &str) -> PResult<'_, Command> {
            preceded(
                verb("step", "s"),
                map(rest, |arg| match arg.as_deref() {
                    None => Command::Step { kind: StepKind::In, count: None },
                    Some("back") => Command::Step { kind: StepKind::Back, count: None },
                    Some("reset") => Command::Step { kind: StepKind::Reset, count: None },
                    Some(n) => match n.parse() {
                        Ok(n) => Command::Step { kind: StepKind::In, count: Some(n) },
                        Err(_) => Command::Help(Some("step".to_string())),
                    },
                }),
            )(input)
        }

        fn counted_step<'a>(
            long: &'static str,
            short: &'static str,
            kind: StepKind,
        ) -> impl FnMut(&'a str) -> PResult<'a, Command> {
            preceded(
                verb(long, short),
                map(opt(preceded(multispace1, number)), move |count| {
                    Command::Step { kind, count }
                }),
            )
        }

        fn backtrace_parser(input: &str) -> PResult<'_, Command> {
            preceded(
                verb("backtrace", "bt"),
                map(rest, |arg| {
                    let arg = arg.unwrap_or_default();
                    match patterns::bt_arg().captures(&arg) {
                        Some(caps) => Command::Backtrace {
                            max: caps.get(1).and_then(|m| m.as_str().parse().ok()),
                            pattern: caps.get(2).map(|m| m.as_str().to_string()),
                        },
                        None => Command::Backtrace { max: None, pattern: None },
                    }
                }),
            )(input)
        }

        fn list_parser(input: &str) -> PResult<'_, Command> {
            preceded(
                verb("list", "l"),
                map(rest, |arg| match arg.as_deref() {
                    None => Command::List(ListArg::Next),
                    Some("-") => Command::List(ListArg::Prev),
                    Some(range) => match patterns::list_range().captures(range) {
                        Some(caps) => {
                            let start: usize = caps[1].parse().unwrap_or(1);
                            match caps.get(2) {
                                Some(end) => Command::List(ListArg::Range(
                                    start.saturating_sub(1),
                                    end.as_str().parse().unwrap_or(start),
                                )),
                                None => Command::List(ListArg::Start(start.saturating_sub(1))),
                            }
                        }
                        None => Command::Help(Some("list".to_string())),
                    },
                }),
            )(input)
        }

        fn info_parser(input: &str) -> PResult<'_, Command> {
            preceded(
                verb("info", "i"),
                map(rest, |arg| {
                    let mut arg = arg.unwrap_or_default();
                    let pattern = patterns::pattern_tail()
                        .captures(&arg.clone())
                        .map(|caps| {
                            arg = patterns::pattern_tail()
                                .replace(&arg, "")
                                .into_owned();
                            caps[1].to_string()
                        });
                    let sub = match arg.trim() {
                        "" => Some(InfoSub::Default),
                        "l" | "local" | "locals" => Some(InfoSub::Locals),
                        "i" | "ivar" | "ivars" | "instance" => Some(InfoSub::Ivars),
                        "c" | "const" | "consts" | "constant" | "constants" => {
                            Some(InfoSub::Consts)
                        }
                        "g" | "global" | "globals" => Some(InfoSub::Globals),
                        "th" | "thread" | "threads" => Some(InfoSub::Threads),
                        _ => None,
                    };
                    match sub {
                        Some(sub) => Command::Info { sub, pattern },
                        None => Command::Help(Some("info".to_string())),
                    }
                }),
            )(input)
        }

        fn trace_parser(input: &str) -> PResult<'_, Command> {
            preceded(
                verb1("trace"),
                map(rest, |arg| {
                    let mut arg = arg.unwrap_or_default();
                    let into = patterns::into_tail().captures(&arg.clone()).map(|caps| {
                        arg = patterns::into_tail().replace(&arg, "").into_owned();
                        caps[1].to_string()
                    });
                    let pattern =
                        patterns::pattern_tail().captures(&arg.clone()).map(|caps| {
                            arg = patterns::pattern_tail()
                                .replace(&arg, "")
                                .into_owned();
                            caps[1].to_string()
                        });
                    let arg = arg.trim().to_string();
                    match arg.as_str() {
                        "" => TraceCommand::Show,
                        "line" => TraceCommand::Line { pattern, into },
                        "call" => TraceCommand::Call { pattern, into },
                        "exception" => TraceCommand::Exception { pattern, into },
                        "off" => TraceCommand::Off(None),
                        _ => {
                            if let Some(expr) = arg.strip_prefix("object ") {
                                TraceCommand::Object {
                                    expr: expr.trim().to_string(),
                                    pattern,
                                    into,
                                }
                            } else if let Some(off) = arg.strip_prefix("off ") {
                                let off = off.trim();
                                match off.parse() {
                                    Ok(n) => TraceCommand::OffIndex(n),
                                    Err(_) => TraceCommand::Off(Some(off.to_string())),
                                }
                            } else {
                                TraceCommand::Show
                            }
                        }
                    }
                }),
            )(input)
            .map(|(rest, cmd)| (rest, Command::Trace(cmd)))
        }

        fn config_parser(input: &str) -> PResult<'_, Command> {
            preceded(
                verb1("config"),
                map(rest, |arg| {
                    let Some(arg) = arg else {
                        return Command::Config(ConfigCommand::ShowAll);
                    };
                    if let Some(caps) = patterns::config_unset().captures(&arg) {
                        Command::Config(ConfigCommand::Unset(caps[1].to_string()))
                    } else if let Some(caps) = patterns::config_set().captures(&arg) {
                        Command::Config(ConfigCommand::Set(caps[1].to_string(), caps[2].to_string()))
                    } else if let Some(caps) = patterns::config_set_kw().captures(&arg) {
                        Command::Config(ConfigCommand::Set(caps[1].to_string(), caps[2].to_string()))
                    } else if let Some(caps) = patterns::config_append().captures(&arg) {
                        Command::Config(ConfigCommand::Append(
                            caps[1].to_string(),
                            caps[2].to_string(),
                        ))
                    } else if let Some(caps) = patterns::config_append_kw().captures(&arg) {
                        Command::Config(ConfigCommand::Append(
                            caps[1].to_string(),
                            caps[2].to_string(),
                        ))
                    } else if let Some(caps) = patterns::config_key().captures(&arg) {
                        Command::Config(ConfigCommand::Show(caps[1].to_string()))
                    } else {
                        Command::Help(Some("config".to_string()))
                    }
                }),
            )(input)
        }

        fn eval_parser(input: &str) -> PResult<'_, Command> {
            alt((
                map(
                    preceded(terminated(tag("pp"), peek(multispace1)), rest),
                    |expr| Command::Eval {
                        kind: EvalKind::Pp,
                        expr: expr.unwrap_or_default(),
                    },
                ),
                map(
                    preceded(terminated(tag("p"), peek(multispace1)), rest),
                    |expr| Command::Eval {
                        kind: EvalKind::P,
                        expr: expr.unwrap_or_default(),
                    },
                ),
                map(
                    preceded(
                        alt((
                            terminated(tag("eval"), peek(multispace1)),
                            terminated(tag("call"), peek(multispace1)),
                        )),
                        rest,
                    ),
                    |expr| match expr {
                        Some(expr) => Command::Eval {
                            kind: EvalKind::Call,
                            expr,
                        },
                        None => Command::Help(Some("eval".to_string())),
                    },
                ),
            ))(input)
        }

        let parse_usize = |arg: Option<String>| arg.and_then(|a| a.parse::<usize>().ok());

        let result = command(alt((
            alt((
                step_parser,
                counted_step("next", "n", StepKind::Next),
                counted_step("finish", "fin", StepKind::Finish),
                map(verb("continue", "c"), |_| Command::Continue),
                map(verb1("quit!"), |_| Command::Quit { force: true }),
                map(verb1("q!"), |_| Command::Quit { force: true }),
                map(verb("quit", "q"), |_| Command::Quit { force: false }),
                map(verb1("kill!"), |_| Command::Kill { force: true }),
                map(verb1("kill"), |_| Command::Kill { force: false }),
                map(verb1("sigint"), |_| Command::Sigint),
            )),
            alt((
                map(preceded(verb("break", "b"), rest), Command::Break),
                map(preceded(verb1("catch"), rest), Command::Catch),
                map(preceded(verb("watch", "wat"), rest), Command::Watch),
                map(preceded(verb("delete", "del"), rest), |arg| match arg {
                    None => Command::Delete(None),
                    Some(n) => match n.parse() {
                        Ok(n) => Command::Delete(Some(n)),
                        Err(_) => Command::Help(Some("delete".to_string())),
                    },
                }),
            )),
            alt((
                backtrace_parser,
                list_parser,
                map(preceded(verb1("edit"), rest), Command::Edit),
                info_parser,
                map(
                    preceded(alt((verb("outline", "o"), verb1("ls"))), rest),
                    Command::Outline,
                ),
                map(preceded(verb1("display"), rest), Command::Display),
                map(preceded(verb1("undisplay"), rest), |arg| match arg {
                    None => Command::Undisplay(None),
                    Some(n) => match n.parse() {
                        Ok(n) => Command::Undisplay(Some(n)),
                        Err(_) => Command::Help(Some("undisplay".to_string())),
                    },
                }),
            )),
            alt((
                map(preceded(verb("frame", "f"), rest), move |arg| {
                    Command::Frame(parse_usize(arg))
                }),
                map(verb1("up"), |_| Command::Up),
                map(verb1("down"), |_| Command::Down),
                eval_parser,
                map(verb1("irb"), |_| Command::Irb),
                trace_parser,
                map(preceded(verb1("record"), rest), |arg| match arg.as_deref() {
                    None => Command::Record(None),
                    Some("on") => Command::Record(Some(true)),
                    Some("off") => Command::Record(Some(false)),
                    Some(_) => Command::Help(Some("record".to_string())),
                }),
                map(preceded(verb("thread", "th"), rest), move |arg| {
                    match arg.as_deref() {
                        None | Some("list") | Some("l") => Command::Thread(None),
                        Some(n) => match n.parse() {
                            Ok(n) => Command::Thread(Some(n)),
                            Err(_) => Command::Help(Some("thread".to_string())),
                        },
                    }
                }),
            )),
            alt((
                config_parser,
                map(preceded(verb1("source"), rest), |arg| match arg {
                    Some(path) => Command::Source(path),
                    None => Command::Help(Some("source".to_string())),
                }),
                map(preceded(verb1("open"), rest), Command::Open),
                map(
                    preceded(alt((verb("help", "h"), verb1("?"))), rest),
                    Command::Help,
                ),
            )),
        )))(input);

        match result {
            Ok((_, command)) => Some(command),
            Err(_) => None,
        }
    }
}

pub mod help {
    /// `(category, [(usage, description)])` table rendered by `help`.
    pub const HELPS: &[(&str, &[(&str, &str)])] = &[
        (
            "Control flow",
            &[
                ("s[tep] <n>", "Step in. Resume the program until next breakable point."),
                ("s[tep] back", "Step back with the last recorded execution log."),
                ("s[tep] reset", "Stop replay."),
                ("n[ext] <n>", "Step over. Resume the program until next line."),
                ("fin[ish] <n>", "Finish this frame (or <n> frames)."),
                ("c[ontinue]", "Resume the program."),
                ("q[uit]", "Finish debugger (with the debuggee process on non-remote debugging)."),
                ("q[uit]!", "Same as q[uit] but without the confirmation prompt."),
                ("kill", "Stop the debuggee process."),
                ("sigint", "Execute SIGINT handler registered by the debuggee."),
            ],
        ),
        (
            "Breakpoint",
            &[
                ("b[reak]", "Show all breakpoints."),
                ("b[reak] <line>", "Set breakpoint on <line> at the current frame's file."),
                ("b[reak] <file>:<line>", "Set breakpoint on <file>:<line>."),
                ("b[reak] <class>#<name>", "Set breakpoint on the method <class>#<name>."),
                ("b[reak] ... if: <expr>", "Break if <expr> is true at specified location."),
                ("b[reak] ... pre: <command>", "Break and run <command> before stopping."),
                ("b[reak] ... do: <command>", "Break and run <command>, and continue."),
                ("b[reak] ... path: <path_re>", "Break if the path matches <path_re>."),
                ("catch <Error>", "Set breakpoint on raising <Error>."),
                ("watch @ivar", "Stop when the result of current scope's @ivar is changed."),
                ("del[ete]", "Delete all breakpoints."),
                ("del[ete] <bpnum>", "Delete specified breakpoint."),
            ],
        ),
        (
            "Information",
            &[
                ("bt", "Show backtrace information."),
                ("bt <num> /regexp/", "Only shows first <num> frames matching /regexp/."),
                ("l[ist]", "Show current frame's source code."),
                ("l[ist] -", "Show predecessor lines."),
                ("l[ist] <start>-<end>", "Show source in the given line range."),
                ("edit <file>", "Open <file> on the editor (local console only)."),
                ("i[nfo]", "Show information about current frame."),
                ("i[nfo] l[ocals]", "Show local variables (with %self and %return)."),
                ("i[nfo] i[vars]", "Show instance variables of self."),
                ("i[nfo] c[onsts]", "Show accessible constants."),
                ("i[nfo] g[lobals]", "Show global variables."),
                ("i[nfo] th[reads]", "Show all threads (same as th[read])."),
                ("o[utline] <expr>", "Show available methods and members of the given object."),
                ("display <expr>", "Show the result of <expr> at every suspended timing."),
                ("undisplay <num>", "Remove a specified display setting."),
            ],
        ),
        (
            "Frame control",
            &[
                ("f[rame] <num>", "Show or switch to the current frame."),
                ("up", "Specify the upper frame."),
                ("down", "Specify the lower frame."),
            ],
        ),
        (
            "Evaluate",
            &[
                ("p <expr>", "Evaluate like `p <expr>` on the current frame."),
                ("pp <expr>", "Evaluate like `pp <expr>` on the current frame."),
                ("eval <expr>", "Evaluate <expr> on the current frame."),
                ("irb", "Invoke irb on the current frame (local console only)."),
            ],
        ),
        (
            "Trace",
            &[
                ("trace", "Show available tracers list."),
                ("trace line", "Add a line tracer."),
                ("trace call", "Add a call tracer."),
                ("trace exception", "Add an exception tracer."),
                ("trace object <expr>", "Add an object tracer."),
                ("trace ... /regexp/", "Indicate only matched events."),
                ("trace ... into: <file>", "Save trace information into <file>."),
                ("trace off <num>", "Disable tracer specified by <num>."),
                ("record [on|off]", "Start/stop recording; show recording status."),
            ],
        ),
        (
            "Thread control",
            &[
                ("th[read]", "Show all threads."),
                ("th[read] <thnum>", "Switch thread specified by <thnum>."),
            ],
        ),
        (
            "Configuration",
            &[
                ("config", "Show all configuration with description."),
                ("config <name>", "Show current configuration of <name>."),
                ("config set <name> <val>", "Set <name> to <val>."),
                ("config append <name> <val>", "Append <val> to <name> if it is an array."),
                ("config unset <name>", "Set <name> to default."),
                ("source <file>", "Evaluate lines in <file> as debug commands."),
                ("open [<host>:<port>]", "Re-open the debuggee port."),
                ("open vscode|chrome", "Open the debuggee port for the given frontend."),
            ],
        ),
        ("Help", &[("h[elp] <command>", "Show help for all or the given command.")]),
    ];

    pub fn help_for(command: Option<&str>) -> String {
        let mut out = String::new();
        match command {
            None => {
                for (category, commands) in HELPS {
                    out.push_str(&format!("### {category}\n"));
                    for (usage, desc) in *commands {
                        out.push_str(&format!("* `{usage}`\n  * {desc}\n"));
                    }
                }
            }
            Some(cmd) => {
                for (_, commands) in HELPS {
                    for (usage, desc) in *commands {
                        if usage
                            .split_whitespace()
                            .next()
                            .map(|verb| verb.replace(['[', ']'], "").starts_with(cmd) || verb.contains(cmd))
                            .unwrap_or(false)
                        {
                            out.push_str(&format!("* `{usage}`\n  * {desc}\n"));
                        }
                    }
                }
                if out.is_empty() {
                    out = format!("not found: {cmd}");
                }
            }
        }
        out
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_parser() {
        struct TestCase {
            inputs: Vec<&'static str>,
            command_matcher: fn(result: Command),
        }
        let cases = vec![
            TestCase {
                inputs: vec!["s", "step", "  step  "],
                command_matcher: |result| {
                    assert_eq!(result, Command::Step { kind: StepKind::In, count: None });
                },
            },
            TestCase {
                inputs: vec!["s 3", "step 3"],
                command_matcher: |result| {
                    assert_eq!(result, Command::Step { kind: StepKind::In, count: Some(3) });
                },
            },
            TestCase {
                inputs: vec!["step back"],
                command_matcher: |result| {
                    assert_eq!(result, Command::Step { kind: StepKind::Back, count: None });
                },
            },
            TestCase {
                inputs: vec!["step reset"],
                command_matcher: |result| {
                    assert_eq!(result, Command::Step { kind: StepKind::Reset, count: None });
                },
            },
            TestCase {
                inputs: vec!["n", "next"],
                command_matcher: |result| {
                    assert_eq!(result, Command::Step { kind: StepKind::Next, count: None });
                },
            },
            TestCase {
                inputs: vec!["fin 2", "finish 2"],
                command_matcher: |result| {
                    assert_eq!(result, Command::Step { kind: StepKind::Finish, count: Some(2) });
                },
            },
            TestCase {
                inputs: vec!["c", "continue"],
                command_matcher: |result| assert_eq!(result, Command::Continue),
            },
            TestCase {
                inputs: vec!["q", "quit"],
                command_matcher: |result| assert_eq!(result, Command::Quit { force: false }),
            },
            TestCase {
                inputs: vec!["q!", "quit!"],
                command_matcher: |result| assert_eq!(result, Command::Quit { force: true }),
            },
            TestCase {
                inputs: vec!["kill!"],
                command_matcher: |result| assert_eq!(result, Command::Kill { force: true }),
            },
            TestCase {
                inputs: vec!["b", "break"],
                command_matcher: |result| assert_eq!(result, Command::Break(None)),
            },
            TestCase {
                inputs: vec!["b a.src:12 if: x > 1", "break  a.src:12 if: x > 1"],
                command_matcher: |result| {
                    assert_eq!(
                        result,
                        Command::Break(Some("a.src:12 if: x > 1".to_string()))
                    );
                },
            },
            TestCase {
                inputs: vec!["catch RuntimeError"],
                command_matcher: |result| {
                    assert_eq!(result, Command::Catch(Some("RuntimeError".to_string())));
                },
            },
            TestCase {
                inputs: vec!["watch @size", "wat @size"],
                command_matcher: |result| {
                    assert_eq!(result, Command::Watch(Some("@size".to_string())));
                },
            },
            TestCase {
                inputs: vec!["del 2", "delete 2"],
                command_matcher: |result| assert_eq!(result, Command::Delete(Some(2))),
            },
            TestCase {
                inputs: vec!["bt", "backtrace"],
                command_matcher: |result| {
                    assert_eq!(result, Command::Backtrace { max: None, pattern: None });
                },
            },
            TestCase {
                inputs: vec!["bt 10 /foo/", "backtrace 10 /foo/"],
                command_matcher: |result| {
                    assert_eq!(
                        result,
                        Command::Backtrace { max: Some(10), pattern: Some("foo".to_string()) }
                    );
                },
            },
            TestCase {
                inputs: vec!["l", "list"],
                command_matcher: |result| assert_eq!(result, Command::List(ListArg::Next)),
            },
            TestCase {
                inputs: vec!["list -"],
                command_matcher: |result| assert_eq!(result, Command::List(ListArg::Prev)),
            },
            TestCase {
                inputs: vec!["list 4-8"],
                command_matcher: |result| assert_eq!(result, Command::List(ListArg::Range(3, 8))),
            },
            TestCase {
                inputs: vec!["i", "info"],
                command_matcher: |result| {
                    assert_eq!(result, Command::Info { sub: InfoSub::Default, pattern: None });
                },
            },
            TestCase {
                inputs: vec!["info locals /x/", "i l /x/"],
                command_matcher: |result| {
                    assert_eq!(
                        result,
                        Command::Info { sub: InfoSub::Locals, pattern: Some("x".to_string()) }
                    );
                },
            },
            TestCase {
                inputs: vec!["o self", "outline self", "ls self"],
                command_matcher: |result| {
                    assert_eq!(result, Command::Outline(Some("self".to_string())));
                },
            },
            TestCase {
                inputs: vec!["f 2", "frame 2"],
                command_matcher: |result| assert_eq!(result, Command::Frame(Some(2))),
            },
            TestCase {
                inputs: vec!["up"],
                command_matcher: |result| assert_eq!(result, Command::Up),
            },
            TestCase {
                inputs: vec!["down"],
                command_matcher: |result| assert_eq!(result, Command::Down),
            },
            TestCase {
                inputs: vec!["p  1 + 2"],
                command_matcher: |result| {
                    assert_eq!(
                        result,
                        Command::Eval { kind: EvalKind::P, expr: "1 + 2".to_string() }
                    );
                },
            },
            TestCase {
                inputs: vec!["pp obj"],
                command_matcher: |result| {
                    assert_eq!(
                        result,
                        Command::Eval { kind: EvalKind::Pp, expr: "obj".to_string() }
                    );
                },
            },
            TestCase {
                inputs: vec!["eval do_it", "call do_it"],
                command_matcher: |result| {
                    assert_eq!(
                        result,
                        Command::Eval { kind: EvalKind::Call, expr: "do_it".to_string() }
                    );
                },
            },
            TestCase {
                inputs: vec!["trace"],
                command_matcher: |result| assert_eq!(result, Command::Trace(TraceCommand::Show)),
            },
            TestCase {
                inputs: vec!["trace line /app/ into: t.log"],
                command_matcher: |result| {
                    assert_eq!(
                        result,
                        Command::Trace(TraceCommand::Line {
                            pattern: Some("app".to_string()),
                            into: Some("t.log".to_string()),
                        })
                    );
                },
            },
            TestCase {
                inputs: vec!["trace object @conn"],
                command_matcher: |result| {
                    assert_eq!(
                        result,
                        Command::Trace(TraceCommand::Object {
                            expr: "@conn".to_string(),
                            pattern: None,
                            into: None,
                        })
                    );
                },
            },
            TestCase {
                inputs: vec!["trace off 1"],
                command_matcher: |result| {
                    assert_eq!(result, Command::Trace(TraceCommand::OffIndex(1)));
                },
            },
            TestCase {
                inputs: vec!["record on"],
                command_matcher: |result| assert_eq!(result, Command::Record(Some(true))),
            },
            TestCase {
                inputs: vec!["th", "thread", "th list"],
                command_matcher: |result| assert_eq!(result, Command::Thread(None)),
            },
            TestCase {
                inputs: vec!["th 2", "thread 2"],
                command_matcher: |result| assert_eq!(result, Command::Thread(Some(2))),
            },
            TestCase {
                inputs: vec!["config"],
                command_matcher: |result| {
                    assert_eq!(result, Command::Config(ConfigCommand::ShowAll));
                },
            },
            TestCase {
                inputs: vec!["config show_frames = 5", "config set show_frames 5"],
                command_matcher: |result| {
                    assert_eq!(
                        result,
                        Command::Config(ConfigCommand::Set(
                            "show_frames".to_string(),
                            "5".to_string()
                        ))
                    );
                },
            },
            TestCase {
                inputs: vec!["config skip_path << /gems/"],
                command_matcher: |result| {
                    assert_eq!(
                        result,
                        Command::Config(ConfigCommand::Append(
                            "skip_path".to_string(),
                            "/gems/".to_string()
                        ))
                    );
                },
            },
            TestCase {
                inputs: vec!["config unset cookie"],
                command_matcher: |result| {
                    assert_eq!(
                        result,
                        Command::Config(ConfigCommand::Unset("cookie".to_string()))
                    );
                },
            },
            TestCase {
                inputs: vec!["h", "help"],
                command_matcher: |result| assert_eq!(result, Command::Help(None)),
            },
            TestCase {
                inputs: vec!["help break"],
                command_matcher: |result| {
                    assert_eq!(result, Command::Help(Some("break".to_string())));
                },
            },
            // unknown input falls back to evaluation
            TestCase {
                inputs: vec!["some_object.size"],
                command_matcher: |result| {
                    assert_eq!(
                        result,
                        Command::Eval {
                            kind: EvalKind::Pp,
                            expr: "some_object.size".to_string()
                        }
                    );
                },
            },
        ];

        for case in cases {
            for input in case.inputs {
                let result = Command::parse(input);
                (case.command_matcher)(result);
            }
        }
    }

    #[test]
    fn test_parse_break_clauses() {
        let spec = parse_break("a.src:12 if: x > 1 do: p x path: app/");
        assert_eq!(spec.sig, "a.src:12");
        assert_eq!(spec.cond.as_deref(), Some("x > 1"));
        assert_eq!(spec.do_cmd.as_deref(), Some("p x"));
        assert_eq!(spec.path.as_deref(), Some("app/"));
        assert_eq!(spec.pre, None);

        let spec = parse_break("Foo#bar pre: info locals");
        assert_eq!(spec.sig, "Foo#bar");
        assert_eq!(spec.pre.as_deref(), Some("info locals"));

        // a clause runs to the next recognized keyword token
        let spec = parse_break("12 if: a == 1 if: b");
        assert_eq!(spec.sig, "12");
        assert_eq!(spec.cond.as_deref(), Some("a == 1 b"));
    }
}
