//! Per-thread debugging actor.
//!
//! A [`ThreadClient`] lives as long as its managed thread. The thread itself
//! executes the suspend path: an engine hook calls into the session listener,
//! the listener decides to stop, and the managed thread parks inside
//! [`ThreadClient::wait_next_action`] on its private command queue until a
//! resume-class command arrives.

use crate::debugger::breakpoint::{Breakpoint, BreakpointCommands, BreakpointKey, MethodOp};
use crate::debugger::engine::{Frame, Location, ThreadId, Value, ValueKind};
use crate::debugger::error::Error;
use crate::debugger::recorder::Recorder;
use crate::debugger::view::{
    ErrorView, FilePathView, FunctionNameView, KeywordView, LineNoView, ReturnValueView,
};
use crate::debugger::{
    CdpResultKind, DapResultKind, ProtocolRequest, ResultPayload, SessionEvent, Shared,
    SuspendReason,
};
use regex::Regex;
use serde_json::json;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{channel, Receiver, Sender};
use std::sync::{Arc, Mutex};
use uuid::Uuid;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Mode {
    Running,
    Waiting,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StepKind {
    In,
    Next,
    Finish,
    Back,
    Reset,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EvalKind {
    P,
    Pp,
    Call,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum FrameOp {
    Up,
    Down,
    Set(Option<usize>),
}

#[derive(Debug)]
pub enum ShowKind {
    Backtrace {
        max: Option<usize>,
        pattern: Option<Regex>,
    },
    List {
        start_line: Option<usize>,
        end_line: Option<usize>,
        dir: i32,
    },
    Edit(Option<String>),
    Default(Option<Regex>),
    Locals(Option<Regex>),
    Ivars(Option<Regex>),
    Consts(Option<Regex>),
    Globals(Option<Regex>),
    Outline(Option<String>),
}

#[derive(Debug)]
pub enum DapCommand {
    Backtrace(ProtocolRequest),
    Scopes(ProtocolRequest, usize),
    Scope(ProtocolRequest, usize),
    Variable(ProtocolRequest, u64),
    Evaluate {
        req: ProtocolRequest,
        fid: usize,
        expr: String,
        context: String,
    },
    Completions(ProtocolRequest, usize, String),
}

#[derive(Debug)]
pub enum CdpCommand {
    Backtrace(ProtocolRequest),
    Evaluate {
        req: ProtocolRequest,
        fid: usize,
        expr: String,
        group: Option<String>,
    },
    Scope(ProtocolRequest, usize),
    Properties(ProtocolRequest, String),
}

/// One queued command for a parked thread.
#[derive(Debug)]
pub enum ThreadCommand {
    Continue,
    Step(StepKind, Option<u32>),
    Eval(EvalKind, String),
    Display {
        try_new: bool,
        exprs: Vec<String>,
    },
    Frame(FrameOp),
    Show(ShowKind),
    MethodBreakpoint {
        class_name: String,
        op: MethodOp,
        method_name: String,
        cond: Option<String>,
        commands: BreakpointCommands,
        path_filter: Option<Regex>,
    },
    WatchBreakpoint {
        ivar: String,
        cond: Option<String>,
        commands: BreakpointCommands,
        path_filter: Option<Regex>,
    },
    TraceObject {
        expr: String,
        pattern: Option<String>,
        into: Option<String>,
    },
    Record(Option<bool>),
    Dap(DapCommand),
    Cdp(CdpCommand),
}

/// Armed stepping state, consulted by the engine hooks.
struct StepSpec {
    arm: StepArm,
    iter: u32,
}

enum StepArm {
    In,
    Next {
        depth: u32,
        path: String,
        line: u32,
        next_line: Option<u32>,
    },
    Finish {
        goal_depth: u32,
    },
}

enum LoopExit {
    Resume,
    Replay,
}

#[derive(Default)]
struct SuspendState {
    frames: Vec<Frame>,
    cur: usize,
    visible: bool,
}

/// Options of the source-context renderer.
#[derive(Default)]
struct SrcOpts {
    frame_index: Option<usize>,
    update_line: bool,
    max_lines: Option<usize>,
    start_line: Option<usize>,
    end_line: Option<usize>,
    dir: i32,
}

pub struct ThreadClient {
    id: u32,
    tid: ThreadId,
    management: AtomicBool,
    /// Set while the thread is parked by the sub-session thread stopper.
    pause_park: AtomicBool,
    mode: Mutex<Mode>,
    cmd_tx: Sender<ThreadCommand>,
    cmd_rx: Mutex<Receiver<ThreadCommand>>,
    shared: Arc<Shared>,
    state: Mutex<SuspendState>,
    step: Mutex<Option<StepSpec>>,
    recorder: Mutex<Recorder>,
    output: Mutex<Vec<String>>,
    /// DAP thread-local variable ids: id = index + 1.
    var_store: Mutex<Vec<Value>>,
    /// CDP object ids.
    obj_store: Mutex<HashMap<String, Value>>,
    /// Frames/exception captured at the last raise, for postmortem entry.
    pending_exception: Mutex<Option<(Vec<Frame>, Value)>>,
}

impl ThreadClient {
    pub(crate) fn new(id: u32, tid: ThreadId, shared: Arc<Shared>) -> Arc<Self> {
        let (cmd_tx, cmd_rx) = channel();
        log::debug!(target: "client", "thread client #{id} is created, thread: {tid}");
        Arc::new(Self {
            id,
            tid,
            management: AtomicBool::new(false),
            pause_park: AtomicBool::new(false),
            mode: Mutex::new(Mode::Running),
            cmd_tx,
            cmd_rx: Mutex::new(cmd_rx),
            shared,
            state: Mutex::new(SuspendState::default()),
            step: Mutex::new(None),
            recorder: Mutex::new(Recorder::default()),
            output: Mutex::new(Vec::new()),
            var_store: Mutex::new(Vec::new()),
            obj_store: Mutex::new(HashMap::new()),
            pending_exception: Mutex::new(None),
        })
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn tid(&self) -> ThreadId {
        self.tid
    }

    pub fn is_management(&self) -> bool {
        self.management.load(Ordering::Relaxed)
    }

    pub fn mark_as_management(&self) {
        self.management.store(true, Ordering::Relaxed);
    }

    pub fn is_waiting(&self) -> bool {
        *self.mode.lock().unwrap() == Mode::Waiting
    }

    pub fn is_running(&self) -> bool {
        *self.mode.lock().unwrap() == Mode::Running
    }

    /// True while the client is parked with a user-visible frame snapshot.
    pub fn has_visible_frames(&self) -> bool {
        let st = self.state.lock().unwrap();
        st.visible && !st.frames.is_empty()
    }

    pub(crate) fn send(&self, cmd: ThreadCommand) -> Result<(), Error> {
        self.cmd_tx.send(cmd).map_err(|_| Error::SessionClosed)
    }

    pub fn current_location(&self) -> Option<Location> {
        let st = self.state.lock().unwrap();
        st.frames.get(st.cur).map(|f| f.location.clone())
    }

    pub fn describe(&self) -> String {
        let name = self.shared.engine.thread_name(self.tid);
        let mut str = match self.current_location() {
            Some(loc) => format!("({name})@{loc}"),
            None => format!("({name})"),
        };
        if !self.is_waiting() {
            str.push_str(" (not under control)");
        }
        str
    }

    pub(crate) fn can_step_back(&self) -> bool {
        self.recorder.lock().unwrap().can_step_back()
    }

    pub(crate) fn recording_enabled(&self) -> bool {
        self.recorder.lock().unwrap().is_enabled()
    }

    pub(crate) fn is_replaying(&self) -> bool {
        self.recorder.lock().unwrap().replaying()
    }

    pub(crate) fn record_frames(&self, frames: Vec<Frame>) {
        self.recorder.lock().unwrap().append(frames);
    }

    pub(crate) fn remember_exception(&self, frames: Vec<Frame>, exc: Value) {
        *self.pending_exception.lock().unwrap() = Some((frames, exc));
    }

    pub(crate) fn take_pending_exception(&self) -> Option<(Vec<Frame>, Value)> {
        self.pending_exception.lock().unwrap().take()
    }

    fn set_mode(&self, mode: Mode) {
        *self.mode.lock().unwrap() = mode;
    }

    fn width(&self) -> usize {
        self.shared.width.load(Ordering::Relaxed)
    }

    fn puts(&self, line: impl Into<String>) {
        let prefix = if self.recorder.lock().unwrap().replaying() {
            "[replay] "
        } else {
            ""
        };
        let line = line.into();
        let mut output = self.output.lock().unwrap();
        for l in line.split('\n') {
            output.push(format!("{prefix}{l}"));
        }
    }

    fn flush_output(&self) -> Vec<String> {
        std::mem::take(&mut *self.output.lock().unwrap())
    }

    fn event(&self, evt: SessionEvent) {
        if self.shared.evt_tx.send(evt).is_err() {
            log::warn!(target: "client", "session event queue is closed");
        }
    }

    fn emit_result(&self, payload: ResultPayload) {
        let output = self.flush_output();
        self.event(SessionEvent::Result {
            client: self.arc(),
            payload,
            output,
        });
    }

    fn arc(&self) -> Arc<ThreadClient> {
        self.shared
            .client(self.tid)
            .expect("thread client must be registered")
    }

    // -------------------------------- suspend entry points ---------------------------------------

    pub(crate) fn on_breakpoint(&self, key: BreakpointKey, exc: Option<Value>) {
        self.suspend(Some(SuspendReason::Breakpoint(key)), None, None, exc);
    }

    pub(crate) fn on_step_stop(&self, ret: Option<Value>) {
        self.suspend(Some(SuspendReason::Step), None, ret, None);
    }

    pub(crate) fn on_trap(&self, sig: &str) {
        if self.is_waiting() {
            return;
        }
        self.suspend(Some(SuspendReason::Trap(sig.to_string())), None, None, None);
    }

    /// Transparent stop used by the sub-session thread stopper: no frame
    /// rendering, no visible snapshot. The park announces itself on the
    /// event queue and is replied to only once the coordinator is idle
    /// again, so peers stay held for as long as any sub-session is active.
    pub(crate) fn on_pause(&self) {
        self.pause_park.store(true, Ordering::Relaxed);
        self.suspend(None, None, None, None);
        self.pause_park.store(false, Ordering::Relaxed);
    }

    pub(crate) fn in_pause_park(&self) -> bool {
        self.pause_park.load(Ordering::Relaxed)
    }

    /// Mark a pending pause-park reply as already answered (the coordinator
    /// resumed this client through a directive instead).
    pub(crate) fn clear_pause_park(&self) {
        self.pause_park.store(false, Ordering::Relaxed);
    }

    pub(crate) fn suspend_postmortem(&self, frames: Vec<Frame>, exc: Value) {
        self.suspend(Some(SuspendReason::Step), Some(frames), None, Some(exc));
    }

    /// Park for a session reply without a frame snapshot: used by `load` and
    /// boot-time preset commands.
    pub(crate) fn on_init(&self) {
        self.wait_reply(SessionEvent::Init(self.arc()));
    }

    pub(crate) fn on_load(&self, path: &str, source: &str) {
        self.wait_reply(SessionEvent::Load {
            client: self.arc(),
            path: path.to_string(),
            source: source.to_string(),
        });
    }

    pub(crate) fn on_trace_pass(&self, tracer_id: u64, msg: String) {
        self.wait_reply(SessionEvent::TracePause {
            client: self.arc(),
            tracer_id,
            msg,
        });
    }

    fn wait_reply(&self, evt: SessionEvent) {
        if self.is_management() || !self.shared.is_active() {
            return;
        }
        self.set_mode(Mode::Waiting);
        self.event(evt);
        self.wait_next_action();
        self.set_mode(Mode::Running);
    }

    fn suspend(
        &self,
        reason: Option<SuspendReason>,
        install: Option<Vec<Frame>>,
        ret: Option<Value>,
        exc: Option<Value>,
    ) {
        if self.is_management() || !self.shared.is_active() {
            return;
        }

        let mut reason = reason;
        let mut install = install;
        let mut ret = ret;
        let mut exc = exc;

        loop {
            let visible = reason.is_some();
            let mut frames = if visible {
                install
                    .take()
                    .unwrap_or_else(|| self.shared.engine.capture_frames(self.tid))
            } else {
                Vec::new()
            };

            if let Some(frame) = frames.first_mut() {
                if let Some(v) = ret.take() {
                    frame.return_value = Some(v);
                }
                if let Some(e) = exc.take() {
                    frame.raised_exception = Some(e);
                }
            }

            {
                let mut st = self.state.lock().unwrap();
                st.frames = frames;
                st.cur = 0;
                st.visible = visible;
            }

            if let Some(reason) = reason.take() {
                self.show_src(SrcOpts::default());
                let show_frames = self.shared.config.read().unwrap().show_frames;
                self.show_frames(Some(show_frames), None);

                self.set_mode(Mode::Waiting);
                let output = self.flush_output();
                self.event(SessionEvent::Suspend {
                    client: self.arc(),
                    reason,
                    output,
                });
            } else {
                self.set_mode(Mode::Waiting);
                self.event(SessionEvent::PausePark(self.arc()));
            }

            match self.wait_next_action() {
                LoopExit::Resume => break,
                LoopExit::Replay => {
                    install = self.recorder.lock().unwrap().current_frames();
                    reason = Some(SuspendReason::Replay);
                }
            }
        }

        self.set_mode(Mode::Running);
        let mut st = self.state.lock().unwrap();
        st.frames.clear();
        st.visible = false;
    }

    // -------------------------------- the command loop -------------------------------------------

    fn wait_next_action(&self) -> LoopExit {
        loop {
            let cmd = {
                let rx = self.cmd_rx.lock().unwrap();
                rx.recv()
            };
            let Ok(cmd) = cmd else {
                // command queue closed: the session is deactivating
                return LoopExit::Resume;
            };
            log::debug!(target: "client", "thread client #{} received {cmd:?}", self.id);

            match cmd {
                ThreadCommand::Continue => return LoopExit::Resume,

                ThreadCommand::Step(kind, count) => match kind {
                    StepKind::In => {
                        let mut recorder = self.recorder.lock().unwrap();
                        if recorder.replaying() {
                            recorder.step_forward();
                            return LoopExit::Replay;
                        }
                        drop(recorder);
                        self.arm_step(StepArm::In, count);
                        return LoopExit::Resume;
                    }
                    StepKind::Next => {
                        let origin = {
                            let st = self.state.lock().unwrap();
                            st.frames.first().map(|f| (f.location.clone(), f.depth))
                        };
                        let Some((loc, depth)) = origin else {
                            return LoopExit::Resume;
                        };
                        let next_line = self.shared.engine.next_traceable_line(&loc);
                        self.arm_step(
                            StepArm::Next {
                                depth,
                                path: loc.path,
                                line: loc.line,
                                next_line,
                            },
                            count,
                        );
                        return LoopExit::Resume;
                    }
                    StepKind::Finish => {
                        let depth = {
                            let st = self.state.lock().unwrap();
                            st.frames.first().map(|f| f.depth)
                        };
                        let Some(depth) = depth else {
                            return LoopExit::Resume;
                        };
                        let goal_depth = depth.saturating_sub(count.unwrap_or(1).saturating_sub(1));
                        self.arm_step(StepArm::Finish { goal_depth }, None);
                        return LoopExit::Resume;
                    }
                    StepKind::Back => {
                        let mut recorder = self.recorder.lock().unwrap();
                        if recorder.can_step_back() {
                            let frames = self.state.lock().unwrap().frames.clone();
                            recorder.keep_backup(frames);
                            recorder.step_back();
                            return LoopExit::Replay;
                        }
                        drop(recorder);
                        self.puts("Can not step back more.");
                        self.emit_result(ResultPayload::None);
                    }
                    StepKind::Reset => {
                        let mut recorder = self.recorder.lock().unwrap();
                        if recorder.replaying() {
                            recorder.step_reset();
                            return LoopExit::Replay;
                        }
                        drop(recorder);
                        self.emit_result(ResultPayload::None);
                    }
                },

                ThreadCommand::Eval(kind, src) => {
                    if let Some(result) = self.frame_eval(&src) {
                        match kind {
                            EvalKind::P => self.puts(format!("=> {}", result.render_full())),
                            EvalKind::Pp => {
                                self.puts(format!("=> {}", result.render(self.width())))
                            }
                            EvalKind::Call => {}
                        }
                    }
                    self.emit_result(ResultPayload::None);
                }

                ThreadCommand::Display { try_new, exprs } => {
                    let mut failed = Vec::new();
                    for (i, expr) in exprs.iter().enumerate() {
                        let rendered = match self.shared.engine.eval(
                            self.tid,
                            self.current_index(),
                            expr,
                        ) {
                            Ok(v) => v.render(self.width()),
                            Err(e) => {
                                failed.push((i, e.clone()));
                                format!("<error: {e}>")
                            }
                        };
                        self.puts(format!("{i}: {expr} = {rendered}"));
                    }
                    let payload = if try_new {
                        ResultPayload::TryDisplay { failed }
                    } else {
                        ResultPayload::None
                    };
                    self.emit_result(payload);
                }

                ThreadCommand::Frame(op) => {
                    match op {
                        FrameOp::Up => {
                            let mut st = self.state.lock().unwrap();
                            if st.cur + 1 < st.frames.len() {
                                st.cur += 1;
                            }
                        }
                        FrameOp::Down => {
                            let mut st = self.state.lock().unwrap();
                            st.cur = st.cur.saturating_sub(1);
                        }
                        FrameOp::Set(arg) => {
                            if let Some(index) = arg {
                                let mut st = self.state.lock().unwrap();
                                if index < st.frames.len() {
                                    st.cur = index;
                                } else {
                                    drop(st);
                                    self.puts(format!("out of frame index: {index}"));
                                }
                            }
                        }
                    }
                    self.show_src(SrcOpts {
                        max_lines: Some(1),
                        ..SrcOpts::default()
                    });
                    self.show_frame(self.current_index());
                    self.emit_result(ResultPayload::None);
                }

                ThreadCommand::Show(kind) => {
                    self.process_show(kind);
                    self.emit_result(ResultPayload::None);
                }

                ThreadCommand::MethodBreakpoint {
                    class_name,
                    op,
                    method_name,
                    cond,
                    commands,
                    path_filter,
                } => {
                    let signature = format!("{class_name}{op}{method_name}");
                    let mut bp = Breakpoint::method(class_name, op, method_name)
                        .condition(cond)
                        .with_commands(commands)
                        .with_path_filter(path_filter);
                    if self.shared.engine.method_defined(&signature) {
                        bp.resolve();
                    } else {
                        self.puts(format!(
                            "Unknown method {signature}, the breakpoint will be resolved when it is defined"
                        ));
                    }
                    self.emit_result(ResultPayload::MethodBreakpoint(Box::new(bp)));
                }

                ThreadCommand::WatchBreakpoint {
                    ivar,
                    cond,
                    commands,
                    path_filter,
                } => {
                    match self.frame_eval(&ivar) {
                        Some(initial) => {
                            let bp = Breakpoint::watch(ivar, self.tid, Some(initial))
                                .condition(cond)
                                .with_commands(commands)
                                .with_path_filter(path_filter);
                            self.emit_result(ResultPayload::WatchBreakpoint(Box::new(bp)));
                        }
                        None => self.emit_result(ResultPayload::None),
                    };
                }

                ThreadCommand::TraceObject {
                    expr,
                    pattern,
                    into,
                } => match self.frame_eval(&expr) {
                    Some(obj) => match obj.object_id() {
                        Some(object_id) => {
                            self.emit_result(ResultPayload::TracePass {
                                object_id,
                                inspect: obj.render(50),
                                pattern,
                                into,
                            });
                        }
                        None => {
                            self.puts("can not trace an object without identity");
                            self.emit_result(ResultPayload::None);
                        }
                    },
                    None => self.emit_result(ResultPayload::None),
                },

                ThreadCommand::Record(arg) => {
                    let mut recorder = self.recorder.lock().unwrap();
                    match arg {
                        Some(true) => recorder.enable(),
                        Some(false) => recorder.disable(),
                        None => {}
                    }
                    let status = if recorder.is_enabled() {
                        format!("on ({} records)", recorder.log_size())
                    } else {
                        "off".to_string()
                    };
                    drop(recorder);
                    self.puts(format!("Recorder for thread #{}: {status}", self.id));
                    self.emit_result(ResultPayload::None);
                }

                ThreadCommand::Dap(cmd) => self.process_dap(cmd),
                ThreadCommand::Cdp(cmd) => self.process_cdp(cmd),
            }
        }
    }

    fn arm_step(&self, arm: StepArm, count: Option<u32>) {
        *self.step.lock().unwrap() = Some(StepSpec {
            arm,
            iter: count.unwrap_or(1).max(1),
        });
    }

    /// Consulted by the line hook while the thread runs with an armed step.
    pub(crate) fn check_step_line(&self, loc: &Location) -> bool {
        let mut guard = self.step.lock().unwrap();
        let Some(spec) = guard.as_mut() else {
            return false;
        };
        let qualifies = match &spec.arm {
            StepArm::In => true,
            StepArm::Next {
                depth,
                path,
                line,
                next_line,
            } => {
                let cur_depth = self.shared.engine.frame_depth(self.tid);
                cur_depth <= *depth
                    || (loc.path == *path
                        && loc.line > *line
                        && next_line.map_or(false, |nl| loc.line <= nl))
            }
            StepArm::Finish { .. } => false,
        };
        if !qualifies {
            return false;
        }
        if spec.iter > 1 {
            spec.iter -= 1;
            return false;
        }
        *guard = None;
        true
    }

    /// Consulted by the return hook. The engine reports the depth of the
    /// returning frame.
    pub(crate) fn check_step_return(&self) -> bool {
        let mut guard = self.step.lock().unwrap();
        let Some(spec) = guard.as_mut() else {
            return false;
        };
        let cur_depth = self.shared.engine.frame_depth(self.tid);
        let qualifies = match &spec.arm {
            StepArm::In => true,
            StepArm::Next { depth, .. } => cur_depth <= *depth,
            StepArm::Finish { goal_depth } => cur_depth <= *goal_depth,
        };
        if !qualifies {
            return false;
        }
        if spec.iter > 1 {
            spec.iter -= 1;
            return false;
        }
        *guard = None;
        true
    }

    // -------------------------------- evaluation and rendering -----------------------------------

    fn current_index(&self) -> usize {
        self.state.lock().unwrap().cur
    }

    fn frame_eval(&self, src: &str) -> Option<Value> {
        match self.shared.engine.eval(self.tid, self.current_index(), src) {
            Ok(v) => Some(v),
            Err(e) => {
                self.puts(format!("{}", ErrorView::from(format!("eval error: {e}"))));
                None
            }
        }
    }

    fn process_show(&self, kind: ShowKind) {
        match kind {
            ShowKind::Backtrace { max, pattern } => self.show_frames(max, pattern.as_ref()),
            ShowKind::List {
                start_line,
                end_line,
                dir,
            } => self.show_src(SrcOpts {
                update_line: true,
                start_line,
                end_line,
                dir,
                ..SrcOpts::default()
            }),
            ShowKind::Edit(_) => self.puts("not supported on the remote console."),
            ShowKind::Default(pat) => {
                self.show_locals(pat.as_ref());
                self.show_ivars(pat.as_ref());
            }
            ShowKind::Locals(pat) => self.show_locals(pat.as_ref()),
            ShowKind::Ivars(pat) => self.show_ivars(pat.as_ref()),
            ShowKind::Consts(pat) => {
                for (name, value) in self.shared.engine.consts(self.tid, self.current_index()) {
                    self.puts_variable_info(&name, &value, pat.as_ref());
                }
            }
            ShowKind::Globals(pat) => {
                for (name, value) in self.shared.engine.globals() {
                    self.puts_variable_info(&name, &value, pat.as_ref());
                }
            }
            ShowKind::Outline(expr) => self.show_outline(expr.as_deref().unwrap_or("self")),
        }
    }

    fn special_locals(&self) -> Vec<(String, Value)> {
        let st = self.state.lock().unwrap();
        let mut specials = Vec::new();
        if let Some(frame) = st.frames.get(st.cur) {
            specials.push(("%self".to_string(), frame.receiver.clone()));
            if let Some(ret) = &frame.return_value {
                specials.push(("%return".to_string(), ret.clone()));
            }
            if let Some(exc) = &frame.raised_exception {
                specials.push(("%raised".to_string(), exc.clone()));
            }
        }
        specials
    }

    fn show_locals(&self, pat: Option<&Regex>) {
        for (name, value) in self.special_locals() {
            self.puts_variable_info(&name, &value, pat);
        }
        let locals = {
            let st = self.state.lock().unwrap();
            st.frames.get(st.cur).map(|f| f.locals.clone())
        };
        for (name, value) in locals.into_iter().flatten() {
            self.puts_variable_info(&name, &value, pat);
        }
    }

    fn show_ivars(&self, pat: Option<&Regex>) {
        for (name, value) in self.shared.engine.ivars(self.tid, self.current_index()) {
            self.puts_variable_info(&name, &value, pat);
        }
    }

    fn puts_variable_info(&self, label: &str, value: &Value, pat: Option<&Regex>) {
        if let Some(pat) = pat {
            if !pat.is_match(label) {
                return;
            }
        }
        let width = self.width().saturating_sub(label.len() + 3).max(16);
        self.puts(format!(
            "{} = {}",
            KeywordView::from(label),
            value.render(width)
        ));
    }

    fn show_outline(&self, expr: &str) {
        let Some(obj) = self.frame_eval(expr) else {
            return;
        };
        let locals = {
            let st = self.state.lock().unwrap();
            st.frames
                .get(st.cur)
                .map(|f| f.locals.iter().map(|(n, _)| n.clone()).collect::<Vec<_>>())
        };
        self.dump_columns(
            &format!("{}#methods", obj.type_name()),
            obj.methods(),
        );
        self.dump_columns(
            "instance variables",
            obj.children()
                .into_iter()
                .map(|(n, _)| n)
                .filter(|n| n.starts_with('@'))
                .collect(),
        );
        if let Some(locals) = locals {
            self.dump_columns("locals", locals);
        }
    }

    fn dump_columns(&self, name: &str, mut items: Vec<String>) {
        if items.is_empty() {
            return;
        }
        items.sort();
        self.puts(format!("{}:", KeywordView::from(name)));
        let width = self.width();
        let mut line = String::from("  ");
        for item in items {
            if line.len() + item.len() + 2 > width && line.len() > 2 {
                self.puts(line.clone());
                line = String::from("  ");
            }
            line.push_str(&item);
            line.push_str("  ");
        }
        if line.trim().is_empty() {
            return;
        }
        self.puts(line.trim_end().to_string());
    }

    fn show_src(&self, opts: SrcOpts) {
        let (path, frame_line, show_line) = {
            let st = self.state.lock().unwrap();
            let index = opts.frame_index.unwrap_or(st.cur);
            let Some(frame) = st.frames.get(index) else {
                return;
            };
            (
                frame.location.path.clone(),
                frame.location.line.saturating_sub(1) as usize,
                frame.show_line.map(|l| l as usize),
            )
        };

        let max_lines = opts
            .max_lines
            .unwrap_or_else(|| self.shared.config.read().unwrap().show_src_lines);

        let Some(lines) = self.shared.source_lines(&path) else {
            self.puts(format!("# No sourcefile available for {path}"));
            return;
        };

        let mut start_line = opts.start_line;
        let mut end_line = opts.end_line;
        if start_line.is_none() {
            if let Some(show_line) = show_line {
                if opts.dir >= 0 {
                    start_line = Some(show_line);
                } else {
                    let end = show_line.saturating_sub(max_lines);
                    end_line = Some(end);
                    start_line = Some(end.saturating_sub(max_lines));
                }
            } else {
                start_line = Some(frame_line.saturating_sub(max_lines / 2));
            }
        }
        let start_line = start_line.unwrap_or(0).min(lines.len());
        let end_line = end_line
            .unwrap_or(start_line + max_lines)
            .min(lines.len());

        if opts.update_line {
            let mut st = self.state.lock().unwrap();
            let index = opts.frame_index.unwrap_or(st.cur);
            if let Some(frame) = st.frames.get_mut(index) {
                frame.show_line = Some(end_line as u32);
            }
        }

        if start_line != end_line {
            if !opts.update_line && max_lines != 1 {
                self.puts(format!(
                    "[{}, {}] in {}",
                    start_line + 1,
                    end_line,
                    FilePathView::from(&path)
                ));
            }
            for (i, text) in lines[start_line..end_line].iter().enumerate() {
                let lineno = start_line + i;
                let marker = if lineno == frame_line { "=>" } else { "  " };
                self.puts(format!(
                    "{marker}{} {text}",
                    LineNoView::from(format!("{:4}|", lineno + 1))
                ));
            }
        }
    }

    fn frame_str(&self, i: usize, frame: &Frame, cur: usize) -> String {
        let marker = if cur == i { "=>" } else { "  " };
        let mut str = format!(
            "{marker}#{i}\t{} at {}",
            FunctionNameView::from(&frame.name),
            FilePathView::from(frame.location.to_string())
        );
        if let Some(ret) = &frame.return_value {
            str.push_str(&format!(
                " #=> {}",
                ReturnValueView::from(ret.render(self.width() / 2))
            ));
        }
        str
    }

    fn show_frame(&self, i: usize) {
        let st = self.state.lock().unwrap();
        if let Some(frame) = st.frames.get(i) {
            let line = self.frame_str(i, frame, st.cur);
            drop(st);
            self.puts(line);
        }
    }

    fn show_frames(&self, max: Option<usize>, pattern: Option<&Regex>) {
        let (frames, cur) = {
            let st = self.state.lock().unwrap();
            (st.frames.clone(), st.cur)
        };
        if frames.is_empty() {
            return;
        }
        let skip_path = {
            let config = self.shared.config.read().unwrap();
            config.skip_path.clone()
        };

        let filtered: Vec<(usize, &Frame)> = frames
            .iter()
            .enumerate()
            .filter(|(_, f)| {
                if let Some(pat) = pattern {
                    if !pat.is_match(&f.name) && !pat.is_match(&f.location.to_string()) {
                        return false;
                    }
                }
                !skip_path.iter().any(|p| p.is_match(&f.location.path))
            })
            .collect();

        let max = max.unwrap_or(filtered.len());
        for (index, frame) in filtered.iter().take(max) {
            self.puts(self.frame_str(*index, frame, cur));
        }
        if max < filtered.len() {
            self.puts(format!(
                "  # and {} frames (use `bt' command for all frames)",
                filtered.len() - max
            ));
        }
    }

    // -------------------------------- DAP thread-side handlers -----------------------------------

    fn emit_dap(&self, kind: DapResultKind, req: ProtocolRequest, body: serde_json::Value) {
        let output = self.flush_output();
        self.event(SessionEvent::DapResult {
            client: self.arc(),
            kind,
            req,
            body,
            output,
        });
    }

    fn dap_variable(&self, name: &str, v: &Value) -> serde_json::Value {
        let children = v.children();
        let vid = if children.is_empty() {
            0
        } else {
            let mut store = self.var_store.lock().unwrap();
            store.push(v.clone());
            store.len() as u64
        };
        json!({
            "name": name,
            "value": v.render(self.width()),
            "type": v.type_name(),
            "variablesReference": vid,
            "namedVariables": children.len(),
            "indexedVariables": 0,
        })
    }

    fn process_dap(&self, cmd: DapCommand) {
        match cmd {
            DapCommand::Backtrace(req) => {
                let frames = self.state.lock().unwrap().frames.clone();
                let stack_frames: Vec<serde_json::Value> = frames
                    .iter()
                    .map(|frame| {
                        let path = &frame.location.path;
                        let name = std::path::Path::new(path)
                            .file_name()
                            .map(|n| n.to_string_lossy().into_owned())
                            .unwrap_or_else(|| path.clone());
                        let mut source = json!({"name": name, "path": path});
                        if !std::path::Path::new(path).exists() {
                            if let Some(text) = self.shared.source_text(path) {
                                source["sourceReference"] = json!(text);
                            }
                        }
                        json!({
                            "name": frame.name,
                            "line": frame.location.line,
                            "column": 1,
                            "source": source,
                        })
                    })
                    .collect();
                self.emit_dap(
                    DapResultKind::Backtrace,
                    req,
                    json!({ "stackFrames": stack_frames }),
                );
            }
            DapCommand::Scopes(req, fid) => {
                let lnum = {
                    let st = self.state.lock().unwrap();
                    st.frames.get(fid).map(|f| f.locals.len()).unwrap_or(0)
                };
                let body = json!({
                    "scopes": [
                        {
                            "name": "Local variables",
                            "presentationHint": "locals",
                            "namedVariables": lnum,
                            "indexedVariables": 0,
                            "expensive": false,
                        },
                        {
                            "name": "Global variables",
                            "presentationHint": "globals",
                            "variablesReference": 1,
                            "namedVariables": self.shared.engine.globals().len(),
                            "indexedVariables": 0,
                            "expensive": false,
                        },
                    ]
                });
                self.emit_dap(DapResultKind::Scopes, req, body);
            }
            DapCommand::Scope(req, fid) => {
                let locals = {
                    let st = self.state.lock().unwrap();
                    st.frames.get(fid).map(|f| f.locals.clone()).unwrap_or_default()
                };
                let mut vars = Vec::new();
                for (name, value) in self.special_locals() {
                    vars.push(self.dap_variable(&name, &value));
                }
                for (name, value) in locals {
                    vars.push(self.dap_variable(&name, &value));
                }
                self.emit_dap(
                    DapResultKind::Variables { tid: self.id },
                    req,
                    json!({ "variables": vars }),
                );
            }
            DapCommand::Variable(req, vid) => {
                let obj = {
                    let store = self.var_store.lock().unwrap();
                    store.get(vid as usize - 1).cloned()
                };
                let vars: Vec<serde_json::Value> = obj
                    .map(|obj| {
                        obj.children()
                            .into_iter()
                            .map(|(name, v)| self.dap_variable(&name, &v))
                            .collect()
                    })
                    .unwrap_or_default();
                self.emit_dap(
                    DapResultKind::Variables { tid: self.id },
                    req,
                    json!({ "variables": vars }),
                );
            }
            DapCommand::Evaluate {
                req,
                fid,
                expr,
                context,
            } => {
                let mut message = None;
                let result = match context.as_str() {
                    "repl" | "watch" => match self.shared.engine.eval(self.tid, fid, &expr) {
                        Ok(v) => v,
                        Err(e) => crate::debugger::engine::PlainValue::new("Exception", e)
                            .kind(ValueKind::Error)
                            .into_value(),
                    },
                    "hover" => match self.shared.engine.eval(self.tid, fid, &expr) {
                        Ok(v) => v,
                        Err(_) => {
                            message = Some(format!("Error: Can not evaluate: {expr:?}"));
                            crate::debugger::engine::PlainValue::new("NilClass", "nil").into_value()
                        }
                    },
                    other => {
                        message = Some(format!("Error: unknown context: {other}"));
                        crate::debugger::engine::PlainValue::new("NilClass", "nil").into_value()
                    }
                };

                let mut body = self.dap_variable("", &result);
                if let Some(map) = body.as_object_mut() {
                    map.remove("name");
                    map.remove("value");
                    map.insert("result".to_string(), json!(result.render(self.width())));
                }
                self.emit_dap(
                    DapResultKind::Evaluate {
                        tid: self.id,
                        message,
                    },
                    req,
                    body,
                );
            }
            DapCommand::Completions(req, _fid, _text) => {
                self.emit_dap(DapResultKind::Completions, req, json!({"targets": []}));
            }
        }
    }

    // -------------------------------- CDP thread-side handlers -----------------------------------

    fn emit_cdp(&self, kind: CdpResultKind, req: ProtocolRequest, body: serde_json::Value) {
        let output = self.flush_output();
        self.event(SessionEvent::CdpResult {
            client: self.arc(),
            kind,
            req,
            body,
            output,
        });
    }

    fn cdp_value(&self, v: &Value) -> serde_json::Value {
        let oid = Uuid::new_v4().simple().to_string();
        self.obj_store.lock().unwrap().insert(oid.clone(), v.clone());
        let (r#type, subtype) = match v.kind() {
            ValueKind::String => ("string", None),
            ValueKind::Number => ("number", None),
            ValueKind::Boolean => ("boolean", None),
            ValueKind::Array => ("object", Some("array")),
            ValueKind::Map => ("object", Some("map")),
            ValueKind::Error => ("object", Some("error")),
            ValueKind::Object => ("object", None),
        };
        let mut value = json!({
            "type": r#type,
            "description": v.render_full(),
            "objectId": oid,
        });
        if r#type == "object" {
            value["className"] = json!(v.type_name());
            if let Some(subtype) = subtype {
                value["subtype"] = json!(subtype);
            }
        } else {
            value["value"] = json!(v.render_full());
        }
        value
    }

    fn cdp_variable(&self, name: &str, v: &Value) -> serde_json::Value {
        json!({
            "name": name,
            "value": self.cdp_value(v),
            "configurable": true,
            "enumerable": true,
        })
    }

    fn process_cdp(&self, cmd: CdpCommand) {
        match cmd {
            CdpCommand::Backtrace(req) => {
                let (frames, cur) = {
                    let st = self.state.lock().unwrap();
                    (st.frames.clone(), st.cur)
                };
                let mut exception = None;
                let call_frames: Vec<serde_json::Value> = frames
                    .iter()
                    .enumerate()
                    .map(|(i, frame)| {
                        if i == cur {
                            if let Some(exc) = &frame.raised_exception {
                                exception = Some(exc.clone());
                            }
                        }
                        let path = &frame.location.path;
                        json!({
                            "callFrameId": Uuid::new_v4().simple().to_string(),
                            "functionName": frame.name,
                            "functionLocation": { "scriptId": path, "lineNumber": 0 },
                            "location": {
                                "scriptId": path,
                                // CDP line numbers are 0-based
                                "lineNumber": frame.location.line.saturating_sub(1),
                            },
                            "url": format!("http://debuggee{path}"),
                            "scopeChain": [
                                { "type": "local",
                                  "object": {"type": "object", "objectId": Uuid::new_v4().simple().to_string()} },
                                { "type": "script",
                                  "object": {"type": "object", "objectId": Uuid::new_v4().simple().to_string()} },
                                { "type": "global",
                                  "object": {"type": "object", "objectId": Uuid::new_v4().simple().to_string()} },
                            ],
                            "this": { "type": "object" },
                        })
                    })
                    .collect();

                let mut body = json!({ "reason": "other", "callFrames": call_frames });
                if let Some(exc) = exception {
                    body["reason"] = json!("exception");
                    body["data"] = self.cdp_value(&exc);
                }
                self.emit_cdp(CdpResultKind::Backtrace, req, body);
            }
            CdpCommand::Evaluate {
                req,
                fid,
                expr,
                group,
            } => {
                let mut message = None;
                let mut body = json!({});
                let result = match self.shared.engine.eval(self.tid, fid, &expr) {
                    Ok(v) => v,
                    Err(e) => {
                        if group.as_deref() == Some("popover") {
                            message = Some(format!("Error: Can not evaluate: {expr:?}"));
                        } else {
                            let line = self
                                .state
                                .lock()
                                .unwrap()
                                .frames
                                .get(fid)
                                .map(|f| f.location.line)
                                .unwrap_or(1);
                            let exc = crate::debugger::engine::PlainValue::new("Exception", &e)
                                .kind(ValueKind::Error)
                                .into_value();
                            body["exceptionDetails"] = json!({
                                "exceptionId": 1,
                                "text": "Uncaught",
                                "lineNumber": line.saturating_sub(1),
                                "columnNumber": 0,
                                "exception": self.cdp_value(&exc),
                            });
                        }
                        crate::debugger::engine::PlainValue::new("Exception", e)
                            .kind(ValueKind::Error)
                            .into_value()
                    }
                };
                body["result"] = self.cdp_value(&result);
                self.emit_cdp(
                    CdpResultKind::Evaluate {
                        message,
                        output: String::new(),
                    },
                    req,
                    body,
                );
            }
            CdpCommand::Scope(req, fid) => {
                let (receiver, locals) = {
                    let st = self.state.lock().unwrap();
                    match st.frames.get(fid) {
                        Some(f) => (Some(f.receiver.clone()), f.locals.clone()),
                        None => (None, Vec::new()),
                    }
                };
                let mut vars = Vec::new();
                if let Some(receiver) = receiver {
                    vars.push(self.cdp_variable("%self", &receiver));
                }
                for (name, value) in locals {
                    vars.push(self.cdp_variable(&name, &value));
                }
                self.emit_cdp(CdpResultKind::Scope, req, json!(vars));
            }
            CdpCommand::Properties(req, oid) => {
                let obj = self.obj_store.lock().unwrap().get(&oid).cloned();
                let mut result = Vec::new();
                let mut internal = Vec::new();
                if let Some(obj) = obj {
                    for (name, v) in obj.children() {
                        result.push(self.cdp_variable(&name, &v));
                    }
                    let class = crate::debugger::engine::PlainValue::new("Class", obj.type_name())
                        .into_value();
                    internal.push(self.cdp_variable("#class", &class));
                }
                self.emit_cdp(
                    CdpResultKind::Properties,
                    req,
                    json!({ "result": result, "internalProperties": internal }),
                );
            }
        }
    }
}
