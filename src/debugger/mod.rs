//! The debugger session core.
//!
//! [`Session`] is the single coordinator of a debugging run: it owns the
//! breakpoint registry, one [`ThreadClient`] per managed thread, the shared
//! event queue and the sub-session protocol that holds every other thread
//! while one of them is being inspected. Wire front ends implement
//! [`ProtocolAdapter`] and are attached once per connection.

pub mod breakpoint;
pub mod client;
pub mod command;
pub mod config;
pub mod engine;
pub mod error;
pub mod process_group;
pub mod recorder;
pub mod scripted;
pub mod source;
pub mod view;

pub use breakpoint::{Breakpoint, BreakpointCommands, BreakpointKey, BreakpointRegistry, MethodOp};
pub use client::{EvalKind, FrameOp, ShowKind, StepKind, ThreadClient};
pub use config::Config;
pub use engine::{ExecutionEngine, Frame, Location, RuntimeListener, ThreadId, Value};
pub use error::Error;

use crate::debugger::client::{CdpCommand, DapCommand, ThreadCommand};
use crate::debugger::command::{
    help, parse_break, BreakSpec, Command, ConfigCommand, InfoSub, ListArg, TraceCommand,
};
use crate::debugger::engine::ReturnKind;
use crate::debugger::process_group::ProcessGroup;
use crate::debugger::source::SourceRepository;
use crate::weak_error;
use itertools::Itertools;
use regex::Regex;
use serde_json::json;
use std::collections::{HashMap, VecDeque};
use std::io::Write;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::mpsc::{channel, Receiver, Sender};
use std::sync::{Arc, Mutex, RwLock};
use std::thread::JoinHandle;

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

const PROMPT: &str = "(brk)";

// ---------------------------------- wire-facing types --------------------------------------------

/// Which structured protocol a request came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Wire {
    Dap,
    Cdp,
}

/// A structured request handed over from an adapter reader thread.
#[derive(Debug, Clone)]
pub struct ProtocolRequest {
    pub wire: Wire,
    pub id: i64,
    pub method: String,
    pub args: serde_json::Value,
}

/// One inbound message from the active adapter.
#[derive(Debug)]
pub enum Message {
    Line(String),
    Request(ProtocolRequest),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdapterKind {
    Repl,
    Dap,
    Cdp,
}

/// Session-level notifications rendered by an adapter.
#[derive(Debug)]
pub enum UiEvent {
    Load,
    SuspendBreakpoint {
        index: Option<usize>,
        description: String,
        exception: bool,
        thread: u32,
    },
    SuspendTrap {
        signal: String,
        thread: u32,
    },
    Suspended {
        thread: u32,
    },
}

/// Capability set every wire front end implements. A variant is selected at
/// connection-greeting time and never switched mid-connection.
pub trait ProtocolAdapter: Send {
    fn kind(&self) -> AdapterKind;

    fn width(&self) -> usize;

    /// Send one output line.
    fn puts(&mut self, line: &str);

    /// Ask the user for a confirmation string.
    fn ask(&mut self, prompt: &str) -> String;

    /// Block until the next inbound message; `None` when the connection is
    /// gone.
    fn read_next_message(&mut self) -> Option<Message>;

    fn event(&mut self, event: &UiEvent);

    fn respond(&mut self, req: &ProtocolRequest, success: bool, body: serde_json::Value);

    fn fire_event(&mut self, name: &str, body: serde_json::Value);

    fn quit(&mut self);
}

// ---------------------------------- session events -----------------------------------------------

/// Why a thread suspended. Carried by the suspend event so the coordinator
/// can format a message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SuspendReason {
    Breakpoint(BreakpointKey),
    Trap(String),
    Step,
    Replay,
}

#[derive(Debug)]
pub(crate) enum ResultPayload {
    None,
    TryDisplay {
        failed: Vec<(usize, String)>,
    },
    MethodBreakpoint(Box<Breakpoint>),
    WatchBreakpoint(Box<Breakpoint>),
    TracePass {
        object_id: u64,
        inspect: String,
        pattern: Option<String>,
        into: Option<String>,
    },
}

#[derive(Debug)]
pub(crate) enum DapResultKind {
    Backtrace,
    Scopes,
    Variables { tid: u32 },
    Evaluate { tid: u32, message: Option<String> },
    Completions,
}

#[derive(Debug)]
pub(crate) enum CdpResultKind {
    Backtrace,
    Evaluate { message: Option<String>, output: String },
    Scope,
    Properties,
}

pub(crate) enum SessionEvent {
    ThreadBegin(ThreadId, Sender<()>),
    Init(Arc<ThreadClient>),
    /// A thread parked itself under the sub-session thread stopper and
    /// waits for the coordinator to become idle.
    PausePark(Arc<ThreadClient>),
    Load {
        client: Arc<ThreadClient>,
        path: String,
        source: String,
    },
    TraceLine {
        msg: String,
        into: Option<PathBuf>,
    },
    TracePause {
        client: Arc<ThreadClient>,
        tracer_id: u64,
        msg: String,
    },
    Suspend {
        client: Arc<ThreadClient>,
        reason: SuspendReason,
        output: Vec<String>,
    },
    Result {
        client: Arc<ThreadClient>,
        payload: ResultPayload,
        output: Vec<String>,
    },
    DapResult {
        client: Arc<ThreadClient>,
        kind: DapResultKind,
        req: ProtocolRequest,
        body: serde_json::Value,
        output: Vec<String>,
    },
    CdpResult {
        client: Arc<ThreadClient>,
        kind: CdpResultKind,
        req: ProtocolRequest,
        body: serde_json::Value,
        output: Vec<String>,
    },
    Shutdown,
}

// ---------------------------------- tracers ------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum TracerKind {
    Line,
    Call,
    Exception,
    Object,
}

impl TracerKind {
    fn type_name(&self) -> &'static str {
        match self {
            TracerKind::Line => "line",
            TracerKind::Call => "call",
            TracerKind::Exception => "exception",
            TracerKind::Object => "object",
        }
    }
}

pub(crate) struct Tracer {
    kind: TracerKind,
    pattern: Option<Regex>,
    into: Option<PathBuf>,
    enabled: bool,
    /// Identity of the traced object, object tracers only.
    object_id: Option<u64>,
    object_inspect: Option<String>,
}

impl Tracer {
    fn new(kind: TracerKind, pattern: Option<Regex>, into: Option<PathBuf>) -> Self {
        Self {
            kind,
            pattern,
            into,
            enabled: true,
            object_id: None,
            object_inspect: None,
        }
    }

    fn describe(&self) -> String {
        let mut desc = match self.kind {
            TracerKind::Object => format!(
                "ObjectTracer for {}",
                self.object_inspect.as_deref().unwrap_or("?")
            ),
            kind => format!("{}Tracer", {
                let name = kind.type_name();
                let mut c = name.chars();
                c.next()
                    .map(|f| f.to_uppercase().collect::<String>() + c.as_str())
                    .unwrap_or_default()
            }),
        };
        if let Some(pattern) = &self.pattern {
            desc.push_str(&format!(" with pattern /{}/", pattern.as_str()));
        }
        if let Some(into) = &self.into {
            desc.push_str(&format!(" into: {}", into.display()));
        }
        if !self.enabled {
            desc.push_str(" (disabled)");
        }
        desc
    }

    fn matches_path(&self, path: &str) -> bool {
        self.pattern
            .as_ref()
            .map(|p| p.is_match(path))
            .unwrap_or(true)
    }
}

// ---------------------------------- shared state -------------------------------------------------

pub(crate) struct Shared {
    pub(crate) engine: Arc<dyn ExecutionEngine>,
    pub(crate) config: RwLock<Config>,
    pub(crate) registry: RwLock<BreakpointRegistry>,
    pub(crate) sources: RwLock<SourceRepository>,
    pub(crate) clients: RwLock<HashMap<ThreadId, Arc<ThreadClient>>>,
    pub(crate) tracers: RwLock<Vec<Tracer>>,
    /// Debug commands executed when the first managed thread appears.
    boot_commands: Mutex<Option<Vec<String>>>,
    /// The debuggee's own SIGINT handler, executed by the `sigint` command.
    sigint_cmd: RwLock<Option<String>>,
    pub(crate) evt_tx: Sender<SessionEvent>,
    /// The sub-session thread stopper: while set, every other running thread
    /// parks itself at its next line event.
    pub(crate) stop_all: AtomicBool,
    pub(crate) active: AtomicBool,
    pub(crate) postmortem: AtomicBool,
    pub(crate) width: AtomicUsize,
    /// Client id of the thread the user currently interacts with (0 = none).
    pub(crate) current_client: AtomicU32,
    client_seq: AtomicU32,
    /// Pending "stop at the beginning of the program" request.
    first_stop: AtomicBool,
}

impl Shared {
    pub(crate) fn is_active(&self) -> bool {
        self.active.load(Ordering::Relaxed)
    }

    pub(crate) fn client(&self, tid: ThreadId) -> Option<Arc<ThreadClient>> {
        self.clients.read().unwrap().get(&tid).cloned()
    }

    fn has_boot_commands(&self) -> bool {
        self.boot_commands.lock().unwrap().is_some()
    }

    fn ensure_client(self: &Arc<Self>, tid: ThreadId) -> Arc<ThreadClient> {
        let mut clients = self.clients.write().unwrap();
        clients
            .entry(tid)
            .or_insert_with(|| {
                let id = self.client_seq.fetch_add(1, Ordering::Relaxed) + 1;
                ThreadClient::new(id, tid, Arc::clone(self))
            })
            .clone()
    }

    /// Source lines for a path: the load-event cache first, then the
    /// filesystem, then the engine's own view of in-memory code.
    pub(crate) fn source_lines(&self, path: &str) -> Option<Vec<String>> {
        {
            let mut sources = self.sources.write().unwrap();
            if let Some(lines) = sources.lines(path) {
                return Some(lines.to_vec());
            }
        }
        let lines = self.engine.source_lines(path)?;
        self.sources
            .write()
            .unwrap()
            .add(path, &lines.join("\n"));
        Some(lines)
    }

    pub(crate) fn source_text(&self, path: &str) -> Option<String> {
        self.source_lines(path).map(|lines| {
            let mut text = lines.join("\n");
            text.push('\n');
            text
        })
    }

    fn add_line_breakpoint(
        &self,
        path: &str,
        line: u32,
        cond: Option<String>,
        commands: BreakpointCommands,
        oneshot: bool,
    ) -> Result<BreakpointKey, Error> {
        if self.source_lines(path).is_none() {
            return Err(Error::SourceNotFound(path.to_string()));
        }
        let mut bp = Breakpoint::line(path, line)
            .condition(cond)
            .with_commands(commands);
        if oneshot {
            bp = bp.oneshot();
        }
        if self.engine.resolve_line(path, line) {
            bp.resolve();
        }
        self.registry.write().unwrap().add(bp)
    }
}

// ---------------------------------- the public session -------------------------------------------

pub struct Session {
    shared: Arc<Shared>,
    evt_rx: Option<Receiver<SessionEvent>>,
    server: Option<JoinHandle<()>>,
}

impl Session {
    pub fn new(engine: Arc<dyn ExecutionEngine>, config: Config) -> Self {
        let (evt_tx, evt_rx) = channel();
        view::set_colorize(!config.no_color);
        let first_stop = !config.nonstop;
        let postmortem = config.postmortem;
        let shared = Arc::new(Shared {
            engine,
            config: RwLock::new(config),
            registry: RwLock::new(BreakpointRegistry::default()),
            sources: RwLock::new(SourceRepository::default()),
            clients: RwLock::new(HashMap::new()),
            tracers: RwLock::new(Vec::new()),
            boot_commands: Mutex::new(None),
            sigint_cmd: RwLock::new(None),
            evt_tx,
            stop_all: AtomicBool::new(false),
            active: AtomicBool::new(false),
            postmortem: AtomicBool::new(postmortem),
            width: AtomicUsize::new(80),
            current_client: AtomicU32::new(0),
            client_seq: AtomicU32::new(0),
            first_stop: AtomicBool::new(first_stop),
        });
        Self {
            shared,
            evt_rx: Some(evt_rx),
            server: None,
        }
    }

    /// The callback object to install on the execution engine.
    pub fn listener(&self) -> Arc<dyn RuntimeListener> {
        Arc::new(SessionListener {
            shared: Arc::clone(&self.shared),
        })
    }

    /// Thread-safe handle used by adapter reader threads.
    pub fn api(&self) -> SessionApi {
        SessionApi {
            shared: Arc::clone(&self.shared),
        }
    }

    /// Spawn the session server thread. Adapters arrive over `incoming`, one
    /// per accepted connection.
    pub fn activate(&mut self, incoming: Receiver<Box<dyn ProtocolAdapter>>) {
        let evt_rx = self.evt_rx.take().expect("session is already activated");
        self.shared.active.store(true, Ordering::Relaxed);
        let shared = Arc::clone(&self.shared);
        let server = std::thread::Builder::new()
            .name("breakroom-session".to_string())
            .spawn(move || Coordinator::new(shared, evt_rx, incoming).run())
            .expect("spawn session server thread");
        self.server = Some(server);
    }

    /// Queue debug commands to run when the first managed thread appears.
    /// The thread parks on an `init` event and the commands are fed through
    /// the preset-command queue, auto-continuing when exhausted.
    pub fn run_on_boot(&self, commands: Vec<String>) {
        *self.shared.boot_commands.lock().unwrap() = Some(commands);
    }

    /// Record the debuggee's own SIGINT handler. It is reported on trap
    /// suspends and executed by the `sigint` command.
    pub fn intercept_sigint(&self, command: Option<String>) {
        *self.shared.sigint_cmd.write().unwrap() = command;
    }

    /// Enter postmortem inspection for an exception previously observed on
    /// `tid`. Blocks the calling thread for the whole postmortem session.
    pub fn enter_postmortem(&self, tid: ThreadId) -> bool {
        let Some(client) = self.shared.client(tid) else {
            return false;
        };
        let Some((frames, exc)) = client.take_pending_exception() else {
            return false;
        };
        self.shared.postmortem.store(true, Ordering::Relaxed);
        client.suspend_postmortem(frames, exc);
        self.shared.postmortem.store(false, Ordering::Relaxed);
        true
    }

    pub fn deactivate(&mut self) {
        if !self.shared.is_active() {
            return;
        }
        self.shared.active.store(false, Ordering::Relaxed);
        let _ = self.shared.evt_tx.send(SessionEvent::Shutdown);
        if let Some(server) = self.server.take() {
            let _ = server.join();
        }
        self.shared.registry.write().unwrap().clear();
        let clients = std::mem::take(&mut *self.shared.clients.write().unwrap());
        for client in clients.values() {
            let _ = client.send(ThreadCommand::Continue);
        }
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.deactivate();
    }
}

/// Handle for adapter reader threads: synchronous registry mutation and
/// session queries that need no thread hand-off.
#[derive(Clone)]
pub struct SessionApi {
    shared: Arc<Shared>,
}

impl SessionApi {
    pub fn check_postmortem(&self) -> Result<(), Error> {
        if self.shared.postmortem.load(Ordering::Relaxed) {
            Err(Error::Postmortem)
        } else {
            Ok(())
        }
    }

    pub fn add_line_breakpoint(
        &self,
        path: &str,
        line: u32,
        cond: Option<String>,
    ) -> Result<BreakpointKey, Error> {
        self.shared
            .add_line_breakpoint(path, line, cond, BreakpointCommands::default(), false)
    }

    pub fn add_catch_breakpoint(&self, pattern: &str) -> Result<BreakpointKey, Error> {
        self.shared
            .registry
            .write()
            .unwrap()
            .add(Breakpoint::catch(pattern))
    }

    /// `(client id, name)` of every managed, non-management thread.
    pub fn thread_list(&self) -> Vec<(u32, String)> {
        self.shared
            .clients
            .read()
            .unwrap()
            .values()
            .filter(|c| !c.is_management())
            .sorted_by_key(|c| c.id())
            .map(|c| (c.id(), self.shared.engine.thread_name(c.tid())))
            .collect()
    }

    pub fn set_width(&self, width: usize) {
        self.shared.width.store(width, Ordering::Relaxed);
    }

    /// Deliver an asynchronous pause to the first running managed thread.
    pub fn pause(&self) {
        let clients = self.shared.clients.read().unwrap();
        if let Some(client) = clients
            .values()
            .filter(|c| !c.is_management() && c.is_running())
            .sorted_by_key(|c| c.id())
            .next()
        {
            self.shared.engine.interrupt(client.tid());
        }
    }

    pub fn source_text(&self, path: &str) -> Option<String> {
        self.shared.source_text(path)
    }

    pub fn entry_script(&self) -> Option<String> {
        self.shared.config.read().unwrap().entry_script.clone()
    }

    pub fn cookie(&self) -> Option<String> {
        self.shared.config.read().unwrap().cookie.clone()
    }

    pub fn mark_management(&self, tid: ThreadId) {
        if let Some(client) = self.shared.client(tid) {
            client.mark_as_management();
        }
    }

    /// Point-in-time state of every managed thread client.
    pub fn thread_snapshots(&self) -> Vec<ThreadSnapshot> {
        self.shared
            .clients
            .read()
            .unwrap()
            .values()
            .filter(|c| !c.is_management())
            .sorted_by_key(|c| c.id())
            .map(|c| ThreadSnapshot {
                id: c.id(),
                name: self.shared.engine.thread_name(c.tid()),
                waiting: c.is_waiting(),
                visible_frames: c.has_visible_frames(),
                location: c.current_location(),
            })
            .collect()
    }
}

/// Point-in-time view of one thread client.
#[derive(Debug, Clone)]
pub struct ThreadSnapshot {
    pub id: u32,
    pub name: String,
    pub waiting: bool,
    pub visible_frames: bool,
    pub location: Option<Location>,
}

// ---------------------------------- engine listener ----------------------------------------------

/// The session side of the engine hook contract. Runs on managed threads.
pub(crate) struct SessionListener {
    shared: Arc<Shared>,
}

impl SessionListener {
    fn client_for(&self, tid: ThreadId) -> Option<Arc<ThreadClient>> {
        if let Some(client) = self.shared.client(tid) {
            return Some(client);
        }
        if !self.shared.is_active() {
            return None;
        }
        // rendezvous: only the session server creates thread clients
        let (reply_tx, reply_rx) = channel();
        self.shared
            .evt_tx
            .send(SessionEvent::ThreadBegin(tid, reply_tx))
            .ok()?;
        reply_rx.recv().ok()?;
        self.shared.client(tid)
    }

    fn trace(&self, kind: TracerKind, tid: ThreadId, msg: &str) {
        let tracers = self.shared.tracers.read().unwrap();
        for tracer in tracers.iter() {
            if tracer.kind != kind || !tracer.enabled || !tracer.matches_path(msg) {
                continue;
            }
            let _ = self.shared.evt_tx.send(SessionEvent::TraceLine {
                msg: format!("DEBUGGER (trace/{}) #th:{tid} {msg}", kind.type_name()),
                into: tracer.into.clone(),
            });
        }
    }

    /// Does a step tracepoint fire at this location at all?
    fn step_qualifies(&self, loc: &Location) -> bool {
        if self.shared.registry.read().unwrap().match_line(&loc.path, loc.line) {
            return false;
        }
        let config = self.shared.config.read().unwrap();
        if config.skip_path_matches(&loc.path) {
            return false;
        }
        if config.skip_nosrc && self.shared.source_lines(&loc.path).is_none() {
            return false;
        }
        true
    }

    /// Evaluate a breakpoint's guard condition and path filter at the
    /// triggering frame.
    fn breakpoint_applies(&self, key: &BreakpointKey, tid: ThreadId, path: &str) -> bool {
        let (cond, filter_ok) = {
            let registry = self.shared.registry.read().unwrap();
            let Some(bp) = registry.get(key) else {
                return false;
            };
            let filter_ok = bp
                .path_filter
                .as_ref()
                .map(|f| f.is_match(path))
                .unwrap_or(true);
            (bp.cond.clone(), filter_ok)
        };
        if !filter_ok {
            return false;
        }
        match cond {
            None => true,
            Some(cond) => match self.shared.engine.eval(tid, 0, &cond) {
                Ok(v) => v.is_truthy(),
                Err(e) => {
                    log::warn!(target: "session", "breakpoint condition error: {e}");
                    false
                }
            },
        }
    }
}

impl RuntimeListener for SessionListener {
    fn on_thread_begin(&self, tid: ThreadId) {
        let Some(client) = self.client_for(tid) else {
            return;
        };
        if !client.is_management() && self.shared.has_boot_commands() {
            client.on_init();
        }
    }

    fn on_line(&self, tid: ThreadId, loc: &Location) {
        if !self.shared.is_active() {
            return;
        }
        let Some(client) = self.client_for(tid) else {
            return;
        };
        if client.is_management() {
            return;
        }

        self.trace(TracerKind::Line, tid, &loc.to_string());

        if client.recording_enabled() {
            client.record_frames(self.shared.engine.capture_frames(tid));
        }

        // transparent group stop while a peer thread owns the sub-session
        if self.shared.stop_all.load(Ordering::Relaxed)
            && self.shared.current_client.load(Ordering::Relaxed) != client.id()
            && client.is_running()
        {
            client.on_pause();
        }

        // stop at the beginning of the program
        if self.shared.first_stop.swap(false, Ordering::Relaxed) {
            client.on_step_stop(None);
            return;
        }

        let hit = self
            .shared
            .registry
            .read()
            .unwrap()
            .line_hit(&loc.path, loc.line);
        if let Some(key) = hit {
            if self.breakpoint_applies(&key, tid, &loc.path) {
                self.shared.registry.write().unwrap().note_triggered(&key);
                client.on_breakpoint(key, None);
                return;
            }
        }

        let watches = self.shared.registry.read().unwrap().watch_candidates(tid);
        for (key, ivar) in watches {
            let Ok(new) = self.shared.engine.eval(tid, 0, &ivar) else {
                continue;
            };
            let old = self
                .shared
                .registry
                .write()
                .unwrap()
                .update_watch(&key, new.clone());
            let changed = old
                .map(|old| old.render_full() != new.render_full())
                .unwrap_or(true);
            if changed && self.breakpoint_applies(&key, tid, &loc.path) {
                client.on_breakpoint(key, None);
                return;
            }
        }

        if self.step_qualifies(loc) && client.check_step_line(loc) {
            client.on_step_stop(None);
        }
    }

    fn on_call(&self, tid: ThreadId, loc: &Location, name: &str, receiver: &Value, args: &[Value]) {
        if !self.shared.is_active() {
            return;
        }
        let Some(client) = self.client_for(tid) else {
            return;
        };
        if client.is_management() {
            return;
        }

        self.trace(TracerKind::Call, tid, &format!("{name} at {loc}"));

        // object tracers match on receiver/argument identity
        let matched: Option<(u64, String)> = {
            let tracers = self.shared.tracers.read().unwrap();
            tracers
                .iter()
                .filter(|t| t.kind == TracerKind::Object && t.enabled)
                .find_map(|t| {
                    let id = t.object_id?;
                    let is_recv = receiver.object_id() == Some(id);
                    let as_arg = args.iter().any(|a| a.object_id() == Some(id));
                    (is_recv || as_arg).then(|| {
                        let inspect = t.object_inspect.clone().unwrap_or_default();
                        let role = if is_recv { "receiver" } else { "parameter" };
                        (id, format!("Pass {inspect} as a {role} in {name} at {loc}"))
                    })
                })
        };
        if let Some((tracer_id, msg)) = matched {
            client.on_trace_pass(tracer_id, msg);
        }

        let hit = self.shared.registry.read().unwrap().method_hit(name);
        if let Some(key) = hit {
            if self.breakpoint_applies(&key, tid, &loc.path) {
                client.on_breakpoint(key, None);
            }
        }
    }

    fn on_return(&self, tid: ThreadId, _kind: ReturnKind, loc: &Location, value: Value) {
        if !self.shared.is_active() {
            return;
        }
        let Some(client) = self.client_for(tid) else {
            return;
        };
        if client.is_management() {
            return;
        }

        self.trace(TracerKind::Call, tid, &format!("return at {loc}"));

        if self.step_qualifies(loc) && client.check_step_return() {
            client.on_step_stop(Some(value));
        }
    }

    fn on_raise(&self, tid: ThreadId, loc: &Location, exc: Value) {
        if !self.shared.is_active() {
            return;
        }
        let Some(client) = self.client_for(tid) else {
            return;
        };
        if client.is_management() {
            return;
        }

        self.trace(
            TracerKind::Exception,
            tid,
            &format!("{} at {loc}", exc.render(64)),
        );

        if self.shared.config.read().unwrap().postmortem {
            client.remember_exception(self.shared.engine.capture_frames(tid), exc.clone());
        }

        let hit = self
            .shared
            .registry
            .read()
            .unwrap()
            .catch_hit(&exc.class_chain(), &loc.path);
        if let Some(key) = hit {
            if self.breakpoint_applies(&key, tid, &loc.path) {
                client.on_breakpoint(key, Some(exc));
            }
        }
    }

    fn on_trap(&self, tid: ThreadId, sig: &str) {
        let Some(client) = self.client_for(tid) else {
            return;
        };
        if client.is_management() {
            return;
        }
        client.on_trap(sig);
    }

    fn on_load(&self, tid: ThreadId, path: &str, source: &str) {
        let Some(client) = self.client_for(tid) else {
            return;
        };
        client.on_load(path, source);
    }

    fn on_method_defined(&self, signature: &str) {
        self.shared
            .registry
            .write()
            .unwrap()
            .resolve_method(signature);
    }

    fn on_thread_end(&self, tid: ThreadId) {
        log::debug!(target: "session", "thread {tid} ended");
        self.shared.clients.write().unwrap().remove(&tid);
    }
}

// ---------------------------------- coordinator --------------------------------------------------

struct PresetCommand {
    commands: VecDeque<String>,
    source: String,
    auto_continue: bool,
}

enum Flow {
    Retry,
    Handed,
}

#[derive(Clone, Copy)]
enum VarRef {
    Globals,
    Scope(i64),
    Variable { tid: u32, vid: u64 },
}

enum ObjRef {
    Local(String),
    Properties,
    Script,
    Global,
}

const INVALID_PARAMS: i64 = -32602;

struct Coordinator {
    shared: Arc<Shared>,
    evt_rx: Receiver<SessionEvent>,
    incoming: Receiver<Box<dyn ProtocolAdapter>>,
    ui: Option<Box<dyn ProtocolAdapter>>,
    tc: Option<Arc<ThreadClient>>,
    subsession: bool,
    process_group: ProcessGroup,
    /// Pause-parked peers whose reply is deferred until the sub-session
    /// ends.
    paused_peers: Vec<Arc<ThreadClient>>,
    displays: Vec<String>,
    preset: Option<PresetCommand>,
    repl_prev_line: Option<String>,
    // DAP id spaces, freshly minted per structured session, never reused
    frame_map: HashMap<i64, (u32, usize)>,
    var_map: HashMap<i64, VarRef>,
    src_map: HashMap<i64, String>,
    // CDP id spaces
    cdp_frame_map: HashMap<String, usize>,
    obj_map: HashMap<String, ObjRef>,
    script_paths: Vec<String>,
}

impl Coordinator {
    fn new(
        shared: Arc<Shared>,
        evt_rx: Receiver<SessionEvent>,
        incoming: Receiver<Box<dyn ProtocolAdapter>>,
    ) -> Self {
        let mut var_map = HashMap::new();
        var_map.insert(1, VarRef::Globals);
        Self {
            shared,
            evt_rx,
            incoming,
            ui: None,
            tc: None,
            subsession: false,
            process_group: ProcessGroup::default(),
            paused_peers: Vec::new(),
            displays: Vec::new(),
            preset: None,
            repl_prev_line: None,
            frame_map: HashMap::new(),
            var_map,
            src_map: HashMap::new(),
            cdp_frame_map: HashMap::new(),
            obj_map: HashMap::new(),
            script_paths: Vec::new(),
        }
    }

    fn run(mut self) {
        log::debug!(target: "session", "session server started");
        while let Ok(evt) = self.evt_rx.recv() {
            if !self.process_event(evt) {
                break;
            }
        }
        // unpark everything on the way out
        let clients = self.shared.clients.read().unwrap().clone();
        for client in clients.values() {
            let _ = client.send(ThreadCommand::Continue);
        }
        log::debug!(target: "session", "session server finished");
    }

    fn puts(&mut self, line: &str) {
        match &mut self.ui {
            Some(ui) => ui.puts(line),
            None => log::debug!(target: "session", "(no ui) {line}"),
        }
    }

    fn ui_event(&mut self, event: UiEvent) {
        if let Some(ui) = &mut self.ui {
            ui.event(&event);
        }
    }

    fn ask(&mut self, prompt: &str, default: char) -> bool {
        let answer = match &mut self.ui {
            Some(ui) => ui.ask(prompt),
            None => return false,
        };
        let answer = answer.trim();
        let answer = if answer.is_empty() {
            default.to_string()
        } else {
            answer.to_string()
        };
        matches!(answer.as_str(), "y" | "Y")
    }

    fn attach_ui(&mut self, ui: Box<dyn ProtocolAdapter>) {
        self.shared.width.store(ui.width(), Ordering::Relaxed);
        let no_color = self.shared.config.read().unwrap().no_color;
        view::set_colorize(!no_color && ui.kind() == AdapterKind::Repl);
        log::info!(target: "session", "adapter connected: {:?}", ui.kind());
        self.ui = Some(ui);
    }

    fn flush(&mut self, output: Vec<String>) {
        for line in output {
            self.puts(&line);
        }
    }

    /// Pick up a freshly accepted connection before rendering anything.
    fn poll_ui(&mut self) {
        if self.ui.is_none() {
            if let Ok(ui) = self.incoming.try_recv() {
                self.attach_ui(ui);
            }
        }
    }

    fn process_event(&mut self, evt: SessionEvent) -> bool {
        self.poll_ui();
        match evt {
            SessionEvent::Shutdown => return false,

            SessionEvent::ThreadBegin(tid, reply) => {
                self.shared.ensure_client(tid);
                let _ = reply.send(());
            }

            SessionEvent::Init(client) => {
                let boot = self.shared.boot_commands.lock().unwrap().take();
                match boot {
                    Some(commands) => self.add_preset_commands("init", commands, true),
                    // a peer thread raced the boot script; nothing to run
                    None => {
                        let _ = client.send(ThreadCommand::Continue);
                        return true;
                    }
                }
                self.wait_command_loop(client);
            }

            SessionEvent::PausePark(client) => {
                if self.subsession {
                    self.paused_peers.push(client);
                } else if client.in_pause_park() {
                    let _ = client.send(ThreadCommand::Continue);
                }
            }

            SessionEvent::Load {
                client,
                path,
                source,
            } => {
                self.shared.sources.write().unwrap().add(&path, &source);
                self.shared
                    .registry
                    .write()
                    .unwrap()
                    .resolve_loaded_path(&path, self.shared.engine.as_ref());
                log::info!(target: "session", "load {path}");
                self.ui_event(UiEvent::Load);
                let _ = client.send(ThreadCommand::Continue);
            }

            SessionEvent::TraceLine { msg, into } => {
                self.trace_output(&msg, into.as_deref());
            }

            SessionEvent::TracePause {
                client,
                tracer_id,
                msg,
            } => {
                let into = {
                    let tracers = self.shared.tracers.read().unwrap();
                    tracers
                        .iter()
                        .find(|t| t.object_id == Some(tracer_id))
                        .and_then(|t| t.into.clone())
                };
                self.trace_output(&msg, into.as_deref());
                let _ = client.send(ThreadCommand::Continue);
            }

            SessionEvent::Suspend {
                client,
                reason,
                output,
            } => {
                if reason != SuspendReason::Replay {
                    self.enter_subsession();
                }
                self.flush(output);
                self.shared
                    .current_client
                    .store(client.id(), Ordering::Relaxed);

                match &reason {
                    SuspendReason::Breakpoint(key) => {
                        let (index, description, exception, commands) = {
                            let mut registry = self.shared.registry.write().unwrap();
                            let index = registry.index_of(key);
                            match registry.get(key) {
                                Some(bp) => (
                                    index,
                                    bp.description(),
                                    bp.is_catch(),
                                    Some(bp.commands.clone()),
                                ),
                                None => (index, key.to_string(), false, None),
                            }
                        };
                        self.ui_event(UiEvent::SuspendBreakpoint {
                            index,
                            description,
                            exception,
                            thread: client.id(),
                        });
                        if let Some(commands) = commands {
                            self.queue_breakpoint_commands(&commands);
                        }
                    }
                    SuspendReason::Trap(sig) => {
                        self.ui_event(UiEvent::SuspendTrap {
                            signal: sig.clone(),
                            thread: client.id(),
                        });
                        let sigint_cmd = self.shared.sigint_cmd.read().unwrap().clone();
                        if let Some(cmd) = sigint_cmd {
                            self.puts(&format!("{cmd:?} is registered as SIGINT handler."));
                            self.puts("`sigint` command execute it.");
                        }
                    }
                    _ => {
                        self.ui_event(UiEvent::Suspended {
                            thread: client.id(),
                        });
                    }
                }

                if self.displays.is_empty() {
                    self.wait_command_loop(client);
                } else {
                    self.tc = Some(Arc::clone(&client));
                    let _ = client.send(ThreadCommand::Display {
                        try_new: false,
                        exprs: self.displays.clone(),
                    });
                }
            }

            SessionEvent::Result {
                client,
                payload,
                output,
            } => {
                if !self.subsession {
                    log::warn!(target: "session", "result event outside of a subsession");
                }
                self.flush(output);
                match payload {
                    ResultPayload::None => {}
                    ResultPayload::TryDisplay { failed } => {
                        if let Some((i, _msg)) = failed.last() {
                            if i + 1 == self.displays.len() {
                                let canceled = self.displays.pop().unwrap_or_default();
                                self.puts(&format!("canceled: {canceled}"));
                            }
                        }
                    }
                    ResultPayload::MethodBreakpoint(bp) | ResultPayload::WatchBreakpoint(bp) => {
                        self.add_bp(*bp);
                    }
                    ResultPayload::TracePass {
                        object_id,
                        inspect,
                        pattern,
                        into,
                    } => {
                        let pattern = pattern.and_then(|p| weak_error!(Regex::new(&p)));
                        let mut tracer =
                            Tracer::new(TracerKind::Object, pattern, into.map(PathBuf::from));
                        tracer.object_id = Some(object_id);
                        tracer.object_inspect = Some(inspect);
                        self.add_tracer(tracer);
                    }
                }
                self.wait_command_loop(client);
            }

            SessionEvent::DapResult {
                client,
                kind,
                req,
                body,
                output,
            } => {
                self.flush(output);
                self.dap_event(kind, req, body);
                self.wait_command_loop(client);
            }

            SessionEvent::CdpResult {
                client,
                kind,
                req,
                body,
                output,
            } => {
                self.flush(output);
                self.cdp_event(kind, req, body);
                self.wait_command_loop(client);
            }
        }
        true
    }

    fn trace_output(&mut self, msg: &str, into: Option<&std::path::Path>) {
        match into {
            Some(path) => {
                let result = std::fs::OpenOptions::new()
                    .create(true)
                    .append(true)
                    .open(path)
                    .and_then(|mut f| writeln!(f, "{msg}"));
                weak_error!(result, "trace output:");
            }
            None => self.puts(msg),
        }
    }

    fn queue_breakpoint_commands(&mut self, commands: &BreakpointCommands) {
        if commands.is_empty() {
            return;
        }
        let (source, text, auto_continue) = match (&commands.r#do, &commands.pre) {
            (Some(cmd), _) => ("break do", cmd.clone(), true),
            (None, Some(cmd)) => ("break pre", cmd.clone(), false),
            (None, None) => return,
        };
        self.add_preset_commands(source, text.split(';').map(str::to_string).collect(), auto_continue);
    }

    fn add_preset_commands(&mut self, source: &str, commands: Vec<String>, auto_continue: bool) {
        let commands: VecDeque<String> = commands
            .into_iter()
            .map(|line| line.trim().to_string())
            .filter(|line| !line.is_empty() && !line.starts_with('#'))
            .collect();
        match &mut self.preset {
            Some(preset) if !preset.commands.is_empty() => {
                preset.commands.extend(commands);
            }
            _ => {
                self.preset = Some(PresetCommand {
                    commands,
                    source: source.to_string(),
                    auto_continue,
                });
            }
        }
    }

    // ---------------------------- sub-session protocol -------------------------------------------

    fn enter_subsession(&mut self) {
        if self.subsession {
            log::warn!(target: "session", "already in subsession");
            return;
        }
        self.subsession = true;
        self.shared.stop_all.store(true, Ordering::Relaxed);
        self.process_group.lock();
        log::info!(target: "session", "enter_subsession");
    }

    fn leave_subsession(&mut self, directive: Option<ThreadCommand>) {
        if self.subsession {
            log::info!(target: "session", "leave_subsession");
            self.process_group.unlock();
            self.shared.stop_all.store(false, Ordering::Relaxed);

            // peers whose pause-park reached the coordinator resume here;
            // the rest still have their park event queued and resume when
            // it is processed after this method returns
            for peer in std::mem::take(&mut self.paused_peers) {
                if let Some(tc) = &self.tc {
                    if tc.id() == peer.id() {
                        continue;
                    }
                }
                if peer.in_pause_park() {
                    let _ = peer.send(ThreadCommand::Continue);
                }
            }
        }
        if let Some(directive) = directive {
            if let Some(tc) = &self.tc {
                // the directive answers a pending pause-park, if any
                tc.clear_pause_park();
                let _ = tc.send(directive);
            }
        }
        self.tc = None;
        self.shared.current_client.store(0, Ordering::Relaxed);
        self.subsession = false;
    }

    // ---------------------------- command routing ------------------------------------------------

    fn wait_command_loop(&mut self, client: Arc<ThreadClient>) {
        self.shared
            .current_client
            .store(client.id(), Ordering::Relaxed);
        self.tc = Some(client);
        loop {
            match self.wait_command() {
                Ok(Flow::Retry) => {}
                Ok(Flow::Handed) => break,
                Err(Error::Postmortem) => {
                    let msg = Error::Postmortem.to_string();
                    self.puts(&msg);
                }
                Err(e) => {
                    self.puts(&format!("[REPL ERROR] {e}"));
                }
            }
        }
    }

    fn wait_command(&mut self) -> Result<Flow, Error> {
        if let Some(mut preset) = self.preset.take() {
            match preset.commands.pop_front() {
                Some(line) => {
                    let echo = format!("{PROMPT}:{} {line}", preset.source);
                    self.preset = Some(preset);
                    self.puts(&echo);
                    return self.process_command(&line);
                }
                None => {
                    if preset.auto_continue {
                        self.leave_subsession(Some(ThreadCommand::Continue));
                        return Ok(Flow::Handed);
                    }
                    return Ok(Flow::Retry);
                }
            }
        }

        match self.read_message() {
            Message::Line(line) => self.process_command(&line),
            Message::Request(req) => self.process_protocol_request(req),
        }
    }

    fn read_message(&mut self) -> Message {
        loop {
            // a freshly accepted connection replaces the current adapter
            if let Ok(new_ui) = self.incoming.try_recv() {
                self.attach_ui(new_ui);
            }
            match &mut self.ui {
                None => match self.incoming.recv() {
                    Ok(new_ui) => {
                        self.attach_ui(new_ui);
                    }
                    Err(_) => return Message::Line("continue".to_string()),
                },
                Some(ui) => match ui.read_next_message() {
                    Some(msg) => return msg,
                    None => {
                        log::warn!(target: "session", "adapter disconnected");
                        self.ui = None;
                        if let Ok(new_ui) = self.incoming.try_recv() {
                            self.attach_ui(new_ui);
                            continue;
                        }
                        // never leave the debuggee parked on a dead wire
                        return Message::Line("continue".to_string());
                    }
                },
            }
        }
    }

    fn process_command(&mut self, line: &str) -> Result<Flow, Error> {
        let line = line.trim().to_string();
        let line = if line.is_empty() {
            match &self.repl_prev_line {
                Some(prev) => prev.clone(),
                None => return Ok(Flow::Retry),
            }
        } else {
            self.repl_prev_line = Some(line.clone());
            line
        };

        self.run_command(Command::parse(&line))
    }

    fn check_postmortem(&self) -> Result<(), Error> {
        if self.shared.postmortem.load(Ordering::Relaxed) {
            Err(Error::Postmortem)
        } else {
            Ok(())
        }
    }

    fn cancel_auto_continue(&mut self) {
        if let Some(preset) = &mut self.preset {
            preset.auto_continue = false;
        }
    }

    fn send_tc(&mut self, cmd: ThreadCommand) -> Result<Flow, Error> {
        let tc = self.tc.as_ref().ok_or(Error::SessionClosed)?;
        tc.send(cmd)?;
        Ok(Flow::Handed)
    }

    fn run_command(&mut self, command: Command) -> Result<Flow, Error> {
        match command {
            Command::Step { kind, count } => {
                self.cancel_auto_continue();
                self.check_postmortem()?;
                match kind {
                    StepKind::Back | StepKind::Reset => self.send_tc(ThreadCommand::Step(kind, None)),
                    StepKind::Finish if count == Some(0) => {
                        self.puts("finish command with 0 does not make sense.");
                        Ok(Flow::Retry)
                    }
                    StepKind::In if self.replaying() => {
                        self.send_tc(ThreadCommand::Step(kind, count))
                    }
                    _ => {
                        let tc_cmd = ThreadCommand::Step(kind, count);
                        self.leave_subsession(Some(tc_cmd));
                        Ok(Flow::Handed)
                    }
                }
            }

            Command::Continue => {
                self.cancel_auto_continue();
                self.leave_subsession(Some(ThreadCommand::Continue));
                Ok(Flow::Handed)
            }

            Command::Quit { force } => {
                if force || self.ask("Really quit? [Y/n] ", 'Y') {
                    if let Some(ui) = &mut self.ui {
                        ui.quit();
                    }
                    self.leave_subsession(Some(ThreadCommand::Continue));
                    Ok(Flow::Handed)
                } else {
                    Ok(Flow::Retry)
                }
            }

            Command::Kill { force } => {
                if force || self.ask("Really kill? [Y/n] ", 'Y') {
                    log::warn!(target: "session", "killing debuggee process");
                    std::process::exit(1);
                }
                Ok(Flow::Retry)
            }

            Command::Sigint => {
                let sigint_cmd = self.shared.sigint_cmd.read().unwrap().clone();
                match sigint_cmd {
                    Some(cmd) => {
                        self.add_preset_commands("sigint", vec![cmd], true);
                    }
                    None => {
                        self.leave_subsession(Some(ThreadCommand::Continue));
                        return Ok(Flow::Handed);
                    }
                }
                Ok(Flow::Retry)
            }

            Command::Break(None) => {
                self.show_bps(None);
                Ok(Flow::Retry)
            }
            Command::Break(Some(arg)) => {
                self.check_postmortem()?;
                self.repl_add_breakpoint(&arg)
            }

            Command::Catch(None) => {
                self.show_bps(None);
                Ok(Flow::Retry)
            }
            Command::Catch(Some(arg)) => {
                self.check_postmortem()?;
                let spec = parse_break(&arg);
                let commands = Self::spec_commands(&spec);
                let path_filter = Self::spec_path_filter(&spec)?;
                let bp = Breakpoint::catch(spec.sig)
                    .condition(spec.cond)
                    .with_commands(commands)
                    .with_path_filter(path_filter);
                self.add_bp(bp);
                Ok(Flow::Retry)
            }

            Command::Watch(Some(arg)) if arg.starts_with('@') => {
                self.check_postmortem()?;
                let spec = parse_break(&arg);
                let commands = Self::spec_commands(&spec);
                let path_filter = Self::spec_path_filter(&spec)?;
                self.repl_prev_line = None;
                self.send_tc(ThreadCommand::WatchBreakpoint {
                    ivar: spec.sig,
                    cond: spec.cond,
                    commands,
                    path_filter,
                })
            }
            Command::Watch(_) => {
                self.show_bps(None);
                Ok(Flow::Retry)
            }

            Command::Delete(arg) => {
                self.check_postmortem()?;
                match arg {
                    None => {
                        self.show_bps(None);
                        if self.ask("Remove all breakpoints? [y/N] ", 'N') {
                            self.shared.registry.write().unwrap().delete(None);
                        }
                    }
                    Some(n) => {
                        let deleted = self.shared.registry.write().unwrap().delete(Some(n));
                        match deleted {
                            Some((index, description)) => {
                                self.puts(&format!("deleted: #{index} {description}"))
                            }
                            None => self.puts(&format!("breakpoint number {n} not found")),
                        }
                    }
                }
                Ok(Flow::Retry)
            }

            Command::Backtrace { max, pattern } => {
                let pattern = match pattern {
                    Some(p) => Some(Regex::new(&p)?),
                    None => None,
                };
                self.send_tc(ThreadCommand::Show(ShowKind::Backtrace { max, pattern }))
            }

            Command::List(arg) => {
                let show = match arg {
                    ListArg::Next => ShowKind::List {
                        start_line: None,
                        end_line: None,
                        dir: 1,
                    },
                    ListArg::Prev => ShowKind::List {
                        start_line: None,
                        end_line: None,
                        dir: -1,
                    },
                    ListArg::Start(start) => ShowKind::List {
                        start_line: Some(start),
                        end_line: None,
                        dir: 1,
                    },
                    ListArg::Range(start, end) => ShowKind::List {
                        start_line: Some(start),
                        end_line: Some(end),
                        dir: 1,
                    },
                };
                self.send_tc(ThreadCommand::Show(show))
            }

            Command::Edit(_) | Command::Irb => {
                self.puts("not supported on the remote console.");
                self.repl_prev_line = None;
                Ok(Flow::Retry)
            }

            Command::Info { sub, pattern } => {
                let pattern = match pattern {
                    Some(p) => Some(Regex::new(&p)?),
                    None => None,
                };
                let show = match sub {
                    InfoSub::Default => ShowKind::Default(pattern),
                    InfoSub::Locals => ShowKind::Locals(pattern),
                    InfoSub::Ivars => ShowKind::Ivars(pattern),
                    InfoSub::Consts => ShowKind::Consts(pattern),
                    InfoSub::Globals => ShowKind::Globals(pattern),
                    InfoSub::Threads => {
                        self.thread_list();
                        return Ok(Flow::Retry);
                    }
                };
                self.send_tc(ThreadCommand::Show(show))
            }

            Command::Outline(expr) => self.send_tc(ThreadCommand::Show(ShowKind::Outline(expr))),

            Command::Display(Some(expr)) => {
                self.displays.push(expr);
                self.send_tc(ThreadCommand::Display {
                    try_new: true,
                    exprs: self.displays.clone(),
                })
            }
            Command::Display(None) => self.send_tc(ThreadCommand::Display {
                try_new: false,
                exprs: self.displays.clone(),
            }),

            Command::Undisplay(Some(n)) => {
                if n < self.displays.len() {
                    self.displays.remove(n);
                }
                self.send_tc(ThreadCommand::Display {
                    try_new: false,
                    exprs: self.displays.clone(),
                })
            }
            Command::Undisplay(None) => {
                if self.ask("clear all? [y/N] ", 'N') {
                    self.displays.clear();
                }
                Ok(Flow::Retry)
            }

            Command::Frame(n) => self.send_tc(ThreadCommand::Frame(FrameOp::Set(n))),
            Command::Up => self.send_tc(ThreadCommand::Frame(FrameOp::Up)),
            Command::Down => self.send_tc(ThreadCommand::Frame(FrameOp::Down)),

            Command::Eval { kind, expr } => self.send_tc(ThreadCommand::Eval(kind, expr)),

            Command::Trace(trace) => self.run_trace_command(trace),

            Command::Record(arg) => self.send_tc(ThreadCommand::Record(arg)),

            Command::Thread(None) => {
                self.thread_list();
                Ok(Flow::Retry)
            }
            Command::Thread(Some(n)) => {
                self.switch_thread(n);
                Ok(Flow::Retry)
            }

            Command::Config(config_command) => {
                self.run_config_command(config_command);
                Ok(Flow::Retry)
            }

            Command::Source(path) => {
                match std::fs::read_to_string(&path) {
                    Ok(text) => {
                        let lines = text.lines().map(str::to_string).collect();
                        self.add_preset_commands(&path, lines, false);
                    }
                    Err(_) => self.puts(&format!("File not found: {path}")),
                }
                Ok(Flow::Retry)
            }

            Command::Open(arg) => {
                self.repl_open(arg.as_deref());
                Ok(Flow::Retry)
            }

            Command::Help(arg) => {
                let help = help::help_for(arg.as_deref());
                self.puts(&help);
                Ok(Flow::Retry)
            }
        }
    }

    fn replaying(&self) -> bool {
        // a step-in during replay must stay inside the subsession
        self.tc
            .as_ref()
            .map(|tc| tc.is_replaying())
            .unwrap_or(false)
    }

    fn run_trace_command(&mut self, trace: TraceCommand) -> Result<Flow, Error> {
        match trace {
            TraceCommand::Show => {
                self.puts("Tracers:");
                let lines: Vec<String> = {
                    let tracers = self.shared.tracers.read().unwrap();
                    tracers
                        .iter()
                        .enumerate()
                        .map(|(i, t)| format!("* #{i} {}", t.describe()))
                        .collect()
                };
                for line in lines {
                    self.puts(&line);
                }
                Ok(Flow::Retry)
            }
            TraceCommand::Line { pattern, into } => {
                self.add_parsed_tracer(TracerKind::Line, pattern, into)?;
                Ok(Flow::Retry)
            }
            TraceCommand::Call { pattern, into } => {
                self.add_parsed_tracer(TracerKind::Call, pattern, into)?;
                Ok(Flow::Retry)
            }
            TraceCommand::Exception { pattern, into } => {
                self.add_parsed_tracer(TracerKind::Exception, pattern, into)?;
                Ok(Flow::Retry)
            }
            TraceCommand::Object {
                expr,
                pattern,
                into,
            } => {
                self.repl_prev_line = None;
                self.send_tc(ThreadCommand::TraceObject {
                    expr,
                    pattern,
                    into,
                })
            }
            TraceCommand::OffIndex(n) => {
                let mut tracers = self.shared.tracers.write().unwrap();
                match tracers.get_mut(n) {
                    Some(tracer) => {
                        tracer.enabled = false;
                        let desc = tracer.describe();
                        drop(tracers);
                        self.puts(&format!("Disable {desc}"));
                    }
                    None => {
                        drop(tracers);
                        self.puts(&format!("Unmatched: {n}"));
                    }
                }
                Ok(Flow::Retry)
            }
            TraceCommand::Off(type_name) => {
                let disabled: Vec<String> = {
                    let mut tracers = self.shared.tracers.write().unwrap();
                    tracers
                        .iter_mut()
                        .filter(|t| {
                            type_name
                                .as_deref()
                                .map(|n| t.kind.type_name() == n)
                                .unwrap_or(true)
                        })
                        .map(|t| {
                            t.enabled = false;
                            t.describe()
                        })
                        .collect()
                };
                for desc in disabled {
                    self.puts(&format!("Disable {desc}"));
                }
                Ok(Flow::Retry)
            }
        }
    }

    fn add_parsed_tracer(
        &mut self,
        kind: TracerKind,
        pattern: Option<String>,
        into: Option<String>,
    ) -> Result<(), Error> {
        let pattern = match pattern {
            Some(p) => Some(Regex::new(&p)?),
            None => None,
        };
        self.add_tracer(Tracer::new(kind, pattern, into.map(PathBuf::from)));
        Ok(())
    }

    fn add_tracer(&mut self, tracer: Tracer) {
        // don't repeat commands that add tracers
        self.repl_prev_line = None;
        let duplicated = {
            let tracers = self.shared.tracers.read().unwrap();
            tracers.iter().any(|t| {
                t.enabled
                    && t.kind == tracer.kind
                    && t.object_id == tracer.object_id
                    && t.pattern.as_ref().map(|p| p.as_str().to_string())
                        == tracer.pattern.as_ref().map(|p| p.as_str().to_string())
            })
        };
        if duplicated {
            self.puts(&format!("Duplicated tracer: {}", tracer.describe()));
            return;
        }
        self.puts(&format!("Enable {}", tracer.describe()));
        self.shared.tracers.write().unwrap().push(tracer);
    }

    fn run_config_command(&mut self, command: ConfigCommand) {
        let mut lines = Vec::new();
        {
            let mut config = self.shared.config.write().unwrap();
            let show = |config: &Config, key: &str, lines: &mut Vec<String>| match config.show(key)
            {
                Some(line) => lines.push(line),
                None => lines.push(format!(
                    "Unknown configuration: {key}. 'config' shows all configurations."
                )),
            };
            match command {
                ConfigCommand::ShowAll => {
                    for (key, _) in config::CONFIG_SET {
                        show(&config, key, &mut lines);
                    }
                }
                ConfigCommand::Show(key) => show(&config, &key, &mut lines),
                ConfigCommand::Set(key, val) => {
                    if let Err(e) = config.set(&key, &val) {
                        lines.push(e.to_string());
                    }
                    show(&config, &key, &mut lines);
                }
                ConfigCommand::Append(key, val) => {
                    if let Err(e) = config.append(&key, &val) {
                        lines.push(e.to_string());
                    }
                    show(&config, &key, &mut lines);
                }
                ConfigCommand::Unset(key) => {
                    if let Err(e) = config.unset(&key) {
                        lines.push(e.to_string());
                    }
                    show(&config, &key, &mut lines);
                }
            }
            self.shared
                .postmortem
                .store(config.postmortem, Ordering::Relaxed);
        }
        let no_color = self.shared.config.read().unwrap().no_color;
        let repl = self
            .ui
            .as_ref()
            .map(|ui| ui.kind() == AdapterKind::Repl)
            .unwrap_or(true);
        view::set_colorize(!no_color && repl);
        for line in lines {
            self.puts(&line);
        }
    }

    fn repl_open(&mut self, arg: Option<&str>) {
        let (host, port) = {
            let config = self.shared.config.read().unwrap();
            (
                config.host.clone().unwrap_or_else(|| "127.0.0.1".to_string()),
                config.port,
            )
        };
        let addr = match port {
            Some(port) => format!("{host}:{port}"),
            None => host,
        };
        match arg.map(str::to_lowercase).as_deref() {
            Some("chrome") | Some("cdp") => {
                let _ = self.shared.config.write().unwrap().set("open_frontend", "chrome");
                self.puts("With Chrome browser, type the following URL in the address-bar:");
                self.puts(&format!(
                    "   devtools://devtools/bundled/inspector.html?ws={addr}"
                ));
            }
            Some("vscode") => {
                let _ = self.shared.config.write().unwrap().set("open_frontend", "vscode");
                self.puts(&format!(
                    "Connect with a DAP-capable editor ({addr})"
                ));
            }
            _ => {
                self.puts(&format!("Debugger can attach via TCP/IP ({addr})"));
            }
        }
    }

    // ---------------------------- breakpoint plumbing --------------------------------------------

    fn spec_commands(spec: &BreakSpec) -> BreakpointCommands {
        BreakpointCommands {
            pre: spec.pre.clone(),
            r#do: spec.do_cmd.clone(),
        }
    }

    fn spec_path_filter(spec: &BreakSpec) -> Result<Option<Regex>, Error> {
        match &spec.path {
            Some(path) => Ok(Some(Regex::new(path)?)),
            None => Ok(None),
        }
    }

    fn repl_add_breakpoint(&mut self, arg: &str) -> Result<Flow, Error> {
        let spec = parse_break(arg);
        let commands = Self::spec_commands(&spec);
        let path_filter = Self::spec_path_filter(&spec)?;

        if let Ok(line) = spec.sig.parse::<u32>() {
            let path = self
                .tc
                .as_ref()
                .and_then(|tc| tc.current_location())
                .map(|loc| loc.path);
            match path {
                Some(path) => self.add_line_bp(&path, line, spec.cond, commands),
                None => self.puts("no current frame to resolve the file"),
            }
            return Ok(Flow::Retry);
        }

        if let Some((path, line)) = Self::split_line_sig(&spec.sig) {
            self.add_line_bp(&path, line, spec.cond, commands);
            return Ok(Flow::Retry);
        }

        if let Some((class_name, op, method_name)) = Self::split_method_sig(&spec.sig) {
            self.repl_prev_line = None;
            return self.send_tc(ThreadCommand::MethodBreakpoint {
                class_name,
                op,
                method_name,
                cond: spec.cond,
                commands,
                path_filter,
            });
        }

        self.puts(&format!("Unknown breakpoint format: {arg}"));
        self.puts(&help::help_for(Some("break")));
        Ok(Flow::Retry)
    }

    fn split_line_sig(sig: &str) -> Option<(String, u32)> {
        let (path, line) = sig.rsplit_once([':', ' '])?;
        let line = line.trim().parse().ok()?;
        Some((path.trim().to_string(), line))
    }

    fn split_method_sig(sig: &str) -> Option<(String, MethodOp, String)> {
        if let Some((class_name, method_name)) = sig.rsplit_once('#') {
            return Some((
                class_name.to_string(),
                MethodOp::Instance,
                method_name.to_string(),
            ));
        }
        if let Some((class_name, method_name)) = sig.rsplit_once('.') {
            return Some((
                class_name.to_string(),
                MethodOp::Singleton,
                method_name.to_string(),
            ));
        }
        None
    }

    fn add_line_bp(
        &mut self,
        path: &str,
        line: u32,
        cond: Option<String>,
        commands: BreakpointCommands,
    ) {
        self.repl_prev_line = None;
        match self.shared.add_line_breakpoint(path, line, cond, commands, false) {
            Ok(key) => self.show_bps(Some(&key)),
            Err(e) => self.puts(&e.to_string()),
        }
    }

    fn add_bp(&mut self, bp: Breakpoint) {
        // don't repeat commands that add breakpoints
        self.repl_prev_line = None;
        let result = self.shared.registry.write().unwrap().add(bp);
        match result {
            Ok(key) => self.show_bps(Some(&key)),
            Err(e) => self.puts(&e.to_string()),
        }
    }

    fn show_bps(&mut self, specific: Option<&BreakpointKey>) {
        let lines: Vec<String> = {
            let mut registry = self.shared.registry.write().unwrap();
            registry
                .iterate()
                .filter(|(key, _, _)| specific.map(|s| s == *key).unwrap_or(true))
                .map(|(_, bp, i)| format!("#{i} {bp}"))
                .collect()
        };
        for line in lines {
            self.puts(&line);
        }
    }

    // ---------------------------- threads --------------------------------------------------------

    fn managed_clients(&self) -> Vec<Arc<ThreadClient>> {
        self.shared
            .clients
            .read()
            .unwrap()
            .values()
            .filter(|c| !c.is_management())
            .sorted_by_key(|c| c.id())
            .cloned()
            .collect()
    }

    fn thread_list(&mut self) {
        let current = self.tc.as_ref().map(|tc| tc.id());
        let lines: Vec<String> = self
            .managed_clients()
            .iter()
            .enumerate()
            .map(|(i, client)| {
                let marker = if current == Some(client.id()) {
                    "--> "
                } else {
                    "    "
                };
                format!("{marker}#{i} {}", client.describe())
            })
            .collect();
        for line in lines {
            self.puts(&line);
        }
    }

    fn switch_thread(&mut self, n: usize) {
        let clients = self.managed_clients();
        match clients.get(n) {
            Some(client) => {
                if client.is_waiting() {
                    self.shared
                        .current_client
                        .store(client.id(), Ordering::Relaxed);
                    self.tc = Some(Arc::clone(client));
                } else {
                    self.puts(&format!("#{n} is not controllable yet."));
                }
            }
            None => self.puts(&format!("unknown thread number: {n}")),
        }
        self.thread_list();
    }

    fn find_waiting_tc(&self, id: u32) -> Option<Arc<ThreadClient>> {
        self.shared
            .clients
            .read()
            .unwrap()
            .values()
            .find(|c| c.id() == id && c.is_waiting())
            .cloned()
    }

    // ---------------------------- structured protocol routing ------------------------------------

    fn respond(&mut self, req: &ProtocolRequest, success: bool, body: serde_json::Value) {
        if let Some(ui) = &mut self.ui {
            ui.respond(req, success, body);
        }
    }

    fn fail_response(&mut self, req: &ProtocolRequest, message: &str) -> Result<Flow, Error> {
        let body = match req.wire {
            Wire::Dap => json!({ "message": message }),
            Wire::Cdp => json!({ "code": INVALID_PARAMS, "message": message }),
        };
        self.respond(req, false, body);
        Ok(Flow::Retry)
    }

    fn process_protocol_request(&mut self, req: ProtocolRequest) -> Result<Flow, Error> {
        match req.wire {
            Wire::Dap => self.process_dap_request(req),
            Wire::Cdp => self.process_cdp_request(req),
        }
    }

    fn process_dap_request(&mut self, req: ProtocolRequest) -> Result<Flow, Error> {
        match req.method.as_str() {
            "stepBack" => {
                let can = self
                    .tc
                    .as_ref()
                    .map(|tc| tc.can_step_back())
                    .unwrap_or(false);
                if can {
                    self.send_tc(ThreadCommand::Step(StepKind::Back, None))
                } else {
                    self.fail_response(&req, "cancelled")
                }
            }

            "stackTrace" => {
                let tid = req.args["threadId"].as_i64().unwrap_or(0) as u32;
                match self.find_waiting_tc(tid) {
                    Some(tc) => {
                        tc.send(ThreadCommand::Dap(DapCommand::Backtrace(req)))?;
                        Ok(Flow::Handed)
                    }
                    None => self.fail_response(&req, "thread is not waiting"),
                }
            }

            "scopes" => {
                let frame_id = req.args["frameId"].as_i64().unwrap_or(0);
                match self.frame_map.get(&frame_id).copied() {
                    Some((tid, fid)) => match self.find_waiting_tc(tid) {
                        Some(tc) => {
                            tc.send(ThreadCommand::Dap(DapCommand::Scopes(req, fid)))?;
                            Ok(Flow::Handed)
                        }
                        None => self.fail_response(&req, "thread is not waiting"),
                    },
                    None => self.fail_response(&req, "unknown frameId"),
                }
            }

            "variables" => {
                let var_id = req.args["variablesReference"].as_i64().unwrap_or(0);
                match self.var_map.get(&var_id).copied() {
                    Some(VarRef::Globals) => {
                        let variables: Vec<serde_json::Value> = self
                            .shared
                            .engine
                            .globals()
                            .into_iter()
                            .map(|(name, v)| {
                                json!({
                                    "name": name,
                                    "value": v.render(80),
                                    "type": v.type_name(),
                                    "variablesReference": 0,
                                })
                            })
                            .collect();
                        self.respond(&req, true, json!({ "variables": variables }));
                        Ok(Flow::Retry)
                    }
                    Some(VarRef::Scope(frame_id)) => {
                        match self.frame_map.get(&frame_id).copied() {
                            Some((tid, fid)) => match self.find_waiting_tc(tid) {
                                Some(tc) => {
                                    tc.send(ThreadCommand::Dap(DapCommand::Scope(req, fid)))?;
                                    Ok(Flow::Handed)
                                }
                                None => self.fail_response(&req, "thread is not waiting"),
                            },
                            None => self.fail_response(&req, "unknown frameId"),
                        }
                    }
                    Some(VarRef::Variable { tid, vid }) => {
                        match self.find_waiting_tc(tid) {
                            Some(tc) => {
                                tc.send(ThreadCommand::Dap(DapCommand::Variable(req, vid)))?;
                                Ok(Flow::Handed)
                            }
                            None => self.fail_response(&req, "thread is not waiting"),
                        }
                    }
                    None => self.fail_response(&req, "unknown variablesReference"),
                }
            }

            "evaluate" => {
                let frame_id = req.args["frameId"].as_i64().unwrap_or(0);
                match self.frame_map.get(&frame_id).copied() {
                    Some((tid, fid)) => {
                        let expr = req.args["expression"].as_str().unwrap_or("").to_string();
                        let context = req.args["context"].as_str().unwrap_or("repl").to_string();
                        match self.find_waiting_tc(tid) {
                            Some(tc) => {
                                tc.send(ThreadCommand::Dap(DapCommand::Evaluate {
                                    req,
                                    fid,
                                    expr,
                                    context,
                                }))?;
                                Ok(Flow::Handed)
                            }
                            None => self.fail_response(&req, "thread is not waiting"),
                        }
                    }
                    None => self.fail_response(&req, "can't evaluate"),
                }
            }

            "source" => {
                let source_ref = req.args["sourceReference"].as_i64().unwrap_or(0);
                match self.src_map.get(&source_ref) {
                    Some(src) => {
                        let body = json!({ "content": src });
                        self.respond(&req, true, body);
                        Ok(Flow::Retry)
                    }
                    None => self.fail_response(&req, "not found..."),
                }
            }

            "completions" => {
                let frame_id = req.args["frameId"].as_i64().unwrap_or(0);
                let text = req.args["text"].as_str().unwrap_or("").to_string();
                match self.frame_map.get(&frame_id).copied() {
                    Some((tid, fid)) => match self.find_waiting_tc(tid) {
                        Some(tc) => {
                            tc.send(ThreadCommand::Dap(DapCommand::Completions(req, fid, text)))?;
                            Ok(Flow::Handed)
                        }
                        None => self.fail_response(&req, "thread is not waiting"),
                    },
                    None => self.fail_response(&req, "unknown frameId"),
                }
            }

            other => Err(Error::UnknownRequest(other.to_string())),
        }
    }

    fn process_cdp_request(&mut self, req: ProtocolRequest) -> Result<Flow, Error> {
        match req.method.as_str() {
            "Debugger.stepOver"
            | "Debugger.stepInto"
            | "Debugger.stepOut"
            | "Debugger.resume"
            | "Debugger.getScriptSource" => self.send_tc(ThreadCommand::Cdp(CdpCommand::Backtrace(req))),

            "Debugger.evaluateOnCallFrame" => {
                let frame_id = req.args["callFrameId"].as_str().unwrap_or("").to_string();
                match self.cdp_frame_map.get(&frame_id).copied() {
                    Some(fid) => {
                        let expr = req.args["expression"].as_str().unwrap_or("").to_string();
                        let group = req.args["objectGroup"].as_str().map(str::to_string);
                        self.send_tc(ThreadCommand::Cdp(CdpCommand::Evaluate {
                            req,
                            fid,
                            expr,
                            group,
                        }))
                    }
                    None => self.fail_response(&req, "'callFrameId' is an invalid"),
                }
            }

            "Runtime.getProperties" => {
                enum PropsRoute {
                    Scope(usize),
                    Properties,
                    Empty,
                    Invalid,
                }
                let oid = req.args["objectId"].as_str().unwrap_or("").to_string();
                let route = match self.obj_map.get(&oid) {
                    Some(ObjRef::Local(frame_id)) => match self.cdp_frame_map.get(frame_id) {
                        Some(fid) => PropsRoute::Scope(*fid),
                        None => PropsRoute::Invalid,
                    },
                    Some(ObjRef::Properties) => PropsRoute::Properties,
                    Some(ObjRef::Script) | Some(ObjRef::Global) => PropsRoute::Empty,
                    None => PropsRoute::Invalid,
                };
                match route {
                    PropsRoute::Scope(fid) => {
                        self.send_tc(ThreadCommand::Cdp(CdpCommand::Scope(req, fid)))
                    }
                    PropsRoute::Properties => {
                        self.send_tc(ThreadCommand::Cdp(CdpCommand::Properties(req, oid)))
                    }
                    PropsRoute::Empty => {
                        self.respond(&req, true, json!({ "result": [] }));
                        Ok(Flow::Retry)
                    }
                    PropsRoute::Invalid => self.fail_response(&req, "'objectId' is an invalid"),
                }
            }

            other => Err(Error::UnknownRequest(other.to_string())),
        }
    }

    // ---------------------------- structured protocol results ------------------------------------

    fn dap_event(&mut self, kind: DapResultKind, req: ProtocolRequest, mut body: serde_json::Value) {
        match kind {
            DapResultKind::Backtrace => {
                let thread_id = req.args["threadId"].as_i64().unwrap_or(0) as u32;
                if let Some(frames) = body["stackFrames"].as_array_mut() {
                    for (i, frame) in frames.iter_mut().enumerate() {
                        let id = self.frame_map.len() as i64 + 1;
                        self.frame_map.insert(id, (thread_id, i));
                        frame["id"] = json!(id);

                        let source_text = frame["source"]["sourceReference"]
                            .as_str()
                            .map(str::to_string);
                        if let Some(text) = source_text {
                            let src_id = self.src_map.len() as i64 + 1;
                            self.src_map.insert(src_id, text);
                            frame["source"]["sourceReference"] = json!(src_id);
                        }
                    }
                }
                self.respond(&req, true, body);
            }
            DapResultKind::Scopes => {
                let frame_id = req.args["frameId"].as_i64().unwrap_or(0);
                let id = self.var_map.len() as i64 + 1;
                self.var_map.insert(id, VarRef::Scope(frame_id));
                if let Some(local) = body["scopes"].get_mut(0) {
                    local["variablesReference"] = json!(id);
                }
                self.respond(&req, true, body);
            }
            DapResultKind::Variables { tid } => {
                if let Some(vars) = body["variables"].as_array_mut() {
                    for v in vars.iter_mut() {
                        self.register_dap_var(v, tid);
                    }
                }
                self.respond(&req, true, body);
            }
            DapResultKind::Evaluate { tid, message } => match message {
                Some(message) => {
                    let _ = self.fail_response(&req, &message);
                }
                None => {
                    self.register_dap_var(&mut body, tid);
                    self.respond(&req, true, body);
                }
            },
            DapResultKind::Completions => {
                self.respond(&req, true, body);
            }
        }
    }

    fn register_dap_var(&mut self, v: &mut serde_json::Value, tid: u32) {
        let thread_local_vid = v["variablesReference"].as_u64().unwrap_or(0);
        if thread_local_vid > 0 {
            let id = self.var_map.len() as i64 + 1;
            self.var_map.insert(
                id,
                VarRef::Variable {
                    tid,
                    vid: thread_local_vid,
                },
            );
            v["variablesReference"] = json!(id);
        }
    }

    fn cdp_event(&mut self, kind: CdpResultKind, req: ProtocolRequest, mut body: serde_json::Value) {
        match kind {
            CdpResultKind::Backtrace => {
                let mut script_events = Vec::new();
                if let Some(frames) = body["callFrames"].as_array() {
                    for (i, frame) in frames.iter().enumerate() {
                        let frame_id = frame["callFrameId"].as_str().unwrap_or("").to_string();
                        self.cdp_frame_map.insert(frame_id.clone(), i);

                        let script = frame["location"]["scriptId"]
                            .as_str()
                            .unwrap_or("")
                            .to_string();
                        if !script.is_empty() && !self.script_paths.contains(&script) {
                            if let Some(text) = self.shared.source_text(&script) {
                                script_events.push(json!({
                                    "scriptId": script,
                                    "url": frame["url"],
                                    "startLine": 0,
                                    "startColumn": 0,
                                    "endLine": text.lines().count(),
                                    "endColumn": 0,
                                    "executionContextId": self.script_paths.len() + 1,
                                    "hash": format!("{:x}", text.len()),
                                }));
                            }
                            self.script_paths.push(script);
                        }

                        if let Some(scopes) = frame["scopeChain"].as_array() {
                            for scope in scopes {
                                let oid =
                                    scope["object"]["objectId"].as_str().unwrap_or("").to_string();
                                let r#ref = match scope["type"].as_str() {
                                    Some("local") => ObjRef::Local(frame_id.clone()),
                                    Some("script") => ObjRef::Script,
                                    _ => ObjRef::Global,
                                };
                                self.obj_map.insert(oid, r#ref);
                            }
                        }
                    }
                }
                if let Some(oid) = body["data"]["objectId"].as_str() {
                    self.obj_map.insert(oid.to_string(), ObjRef::Properties);
                }
                for event in script_events {
                    if let Some(ui) = &mut self.ui {
                        ui.fire_event("Debugger.scriptParsed", event);
                    }
                }
                if let Some(ui) = &mut self.ui {
                    ui.fire_event("Debugger.paused", body);
                }
            }
            CdpResultKind::Evaluate { message, output } => match message {
                Some(message) => {
                    let _ = self.fail_response(&req, &message);
                }
                None => {
                    if let Some(oid) = body["result"]["objectId"].as_str() {
                        self.obj_map.insert(oid.to_string(), ObjRef::Properties);
                    }
                    self.respond(&req, true, body);
                    if !output.is_empty() {
                        if let Some(ui) = &mut self.ui {
                            ui.fire_event(
                                "Runtime.consoleAPICalled",
                                json!({
                                    "type": "log",
                                    "args": [{ "type": "string", "value": output }],
                                    "executionContextId": 1,
                                }),
                            );
                        }
                    }
                }
            },
            CdpResultKind::Scope => {
                if let Some(vars) = body.as_array() {
                    for v in vars {
                        if let Some(oid) = v["value"]["objectId"].as_str() {
                            self.obj_map.insert(oid.to_string(), ObjRef::Properties);
                        }
                    }
                }
                self.respond(&req, true, json!({ "result": body }));
            }
            CdpResultKind::Properties => {
                for section in ["result", "internalProperties"] {
                    if let Some(vars) = body[section].as_array() {
                        for v in vars {
                            if let Some(oid) = v["value"]["objectId"].as_str() {
                                self.obj_map.insert(oid.to_string(), ObjRef::Properties);
                            }
                        }
                    }
                }
                self.respond(&req, true, body);
            }
        }
    }
}
