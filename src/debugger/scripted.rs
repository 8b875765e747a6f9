//! A scripted in-memory execution engine.
//!
//! Drives the session core without a real language runtime: each managed
//! thread replays a list of [`ScriptOp`]s, invoking the registered
//! [`RuntimeListener`] exactly like a tracing hook would. Used by the demo
//! binary and the test-suite.

use crate::debugger::engine::{
    ExecutionEngine, Frame, Location, PlainValue, ReturnKind, RuntimeListener, ThreadId, Value,
};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::thread::JoinHandle;

#[derive(Clone)]
pub enum ScriptOp {
    /// Enter a function: push a frame, fire the call hook.
    Call {
        name: String,
        path: String,
        line: u32,
        receiver: Option<Value>,
        args: Vec<Value>,
    },
    /// Execute a line in the current frame.
    Line {
        line: u32,
        locals: Vec<(String, Value)>,
    },
    /// Leave the current frame.
    Return(Value),
    /// Raise an exception at the current location.
    Raise(Value),
    /// Load new code into the runtime.
    Load { path: String, source: String },
    /// Define a method, unblocking pending method breakpoints.
    DefineMethod(String),
    /// Park the thread for a while (scheduling aid for tests).
    Sleep(std::time::Duration),
}

impl ScriptOp {
    pub fn call(name: impl Into<String>, path: impl Into<String>, line: u32) -> Self {
        ScriptOp::Call {
            name: name.into(),
            path: path.into(),
            line,
            receiver: None,
            args: Vec::new(),
        }
    }

    pub fn line(line: u32) -> Self {
        ScriptOp::Line {
            line,
            locals: Vec::new(),
        }
    }

    pub fn line_with(line: u32, locals: Vec<(&str, Value)>) -> Self {
        ScriptOp::Line {
            line,
            locals: locals
                .into_iter()
                .map(|(n, v)| (n.to_string(), v))
                .collect(),
        }
    }

    pub fn ret(value: Value) -> Self {
        ScriptOp::Return(value)
    }
}

struct ThreadState {
    stack: Vec<Frame>,
}

#[derive(Default)]
pub struct ScriptedEngine {
    listener: RwLock<Option<Arc<dyn RuntimeListener>>>,
    threads: Mutex<HashMap<ThreadId, ThreadState>>,
    names: Mutex<HashMap<ThreadId, String>>,
    sources: Mutex<HashMap<String, Vec<String>>>,
    methods: Mutex<HashSet<String>>,
    interrupts: Mutex<HashMap<ThreadId, Arc<AtomicBool>>>,
    globals: Mutex<Vec<(String, Value)>>,
}

impl ScriptedEngine {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn install_listener(&self, listener: Arc<dyn RuntimeListener>) {
        *self.listener.write().unwrap() = Some(listener);
    }

    /// Register a source file: its non-blank lines are the traceable lines.
    pub fn add_source(&self, path: impl Into<String>, text: &str) {
        self.sources
            .lock()
            .unwrap()
            .insert(path.into(), text.lines().map(str::to_string).collect());
    }

    pub fn define_method(&self, signature: impl Into<String>) {
        self.methods.lock().unwrap().insert(signature.into());
    }

    pub fn add_global(&self, name: impl Into<String>, value: Value) {
        self.globals.lock().unwrap().push((name.into(), value));
    }

    fn listener(&self) -> Option<Arc<dyn RuntimeListener>> {
        self.listener.read().unwrap().clone()
    }

    /// Run a script on a fresh OS thread.
    pub fn spawn_thread(
        self: &Arc<Self>,
        tid: ThreadId,
        name: impl Into<String>,
        ops: Vec<ScriptOp>,
    ) -> JoinHandle<()> {
        let name = name.into();
        self.names.lock().unwrap().insert(tid, name.clone());
        self.interrupts
            .lock()
            .unwrap()
            .insert(tid, Arc::new(AtomicBool::new(false)));
        let engine = Arc::clone(self);
        std::thread::Builder::new()
            .name(name)
            .spawn(move || engine.run_ops(tid, ops))
            .expect("spawn scripted thread")
    }

    fn check_interrupt(&self, tid: ThreadId, listener: &Arc<dyn RuntimeListener>) {
        let pending = self
            .interrupts
            .lock()
            .unwrap()
            .get(&tid)
            .map(|flag| flag.swap(false, Ordering::Relaxed))
            .unwrap_or(false);
        if pending {
            listener.on_trap(tid, "SIGURG");
        }
    }

    fn current_location(&self, tid: ThreadId) -> Option<Location> {
        let threads = self.threads.lock().unwrap();
        threads
            .get(&tid)
            .and_then(|t| t.stack.last())
            .map(|f| f.location.clone())
    }

    fn run_ops(self: Arc<Self>, tid: ThreadId, ops: Vec<ScriptOp>) {
        let Some(listener) = self.listener() else {
            return;
        };
        self.threads
            .lock()
            .unwrap()
            .insert(tid, ThreadState { stack: Vec::new() });
        listener.on_thread_begin(tid);

        for op in ops {
            self.check_interrupt(tid, &listener);
            match op {
                ScriptOp::Call {
                    name,
                    path,
                    line,
                    receiver,
                    args,
                } => {
                    let receiver = receiver
                        .unwrap_or_else(|| PlainValue::new("Object", "main").into_value());
                    let loc = Location::new(path, line);
                    {
                        let mut threads = self.threads.lock().unwrap();
                        let state = threads.get_mut(&tid).expect("thread is registered");
                        let depth = state.stack.len() as u32 + 1;
                        state
                            .stack
                            .push(Frame::new(loc.clone(), &name, receiver.clone(), depth));
                    }
                    listener.on_call(tid, &loc, &name, &receiver, &args);
                }
                ScriptOp::Line { line, locals } => {
                    let loc = {
                        let mut threads = self.threads.lock().unwrap();
                        let state = threads.get_mut(&tid).expect("thread is registered");
                        let frame = state.stack.last_mut().expect("line outside of a call");
                        frame.location.line = line;
                        frame.locals = locals;
                        frame.location.clone()
                    };
                    listener.on_line(tid, &loc);
                }
                ScriptOp::Return(value) => {
                    if let Some(loc) = self.current_location(tid) {
                        listener.on_return(tid, ReturnKind::Method, &loc, value);
                    }
                    let mut threads = self.threads.lock().unwrap();
                    if let Some(state) = threads.get_mut(&tid) {
                        state.stack.pop();
                    }
                }
                ScriptOp::Raise(exc) => {
                    if let Some(loc) = self.current_location(tid) {
                        listener.on_raise(tid, &loc, exc);
                    }
                }
                ScriptOp::Load { path, source } => {
                    self.add_source(path.clone(), &source);
                    listener.on_load(tid, &path, &source);
                }
                ScriptOp::DefineMethod(signature) => {
                    self.define_method(signature.clone());
                    listener.on_method_defined(&signature);
                }
                ScriptOp::Sleep(duration) => std::thread::sleep(duration),
            }
        }

        listener.on_thread_end(tid);
        self.threads.lock().unwrap().remove(&tid);
    }
}

impl ExecutionEngine for ScriptedEngine {
    fn capture_frames(&self, tid: ThreadId) -> Vec<Frame> {
        let threads = self.threads.lock().unwrap();
        threads
            .get(&tid)
            .map(|t| t.stack.iter().rev().cloned().collect())
            .unwrap_or_default()
    }

    fn frame_depth(&self, tid: ThreadId) -> u32 {
        let threads = self.threads.lock().unwrap();
        threads.get(&tid).map(|t| t.stack.len() as u32).unwrap_or(0)
    }

    fn eval(&self, tid: ThreadId, depth: usize, src: &str) -> Result<Value, String> {
        let src = src.trim();
        match src {
            "true" => return Ok(PlainValue::new("TrueClass", "true").into_value()),
            "false" => {
                return Ok(PlainValue::new("FalseClass", "false")
                    .truthy(false)
                    .into_value())
            }
            "nil" => {
                return Ok(PlainValue::new("NilClass", "nil").truthy(false).into_value())
            }
            _ => {}
        }
        if let Ok(n) = src.parse::<i64>() {
            return Ok(PlainValue::new("Integer", n.to_string()).into_value());
        }

        let threads = self.threads.lock().unwrap();
        let state = threads.get(&tid).ok_or_else(|| "no such thread".to_string())?;
        let frame = state
            .stack
            .iter()
            .rev()
            .nth(depth)
            .ok_or_else(|| format!("no frame at depth {depth}"))?;

        if src == "self" {
            return Ok(frame.receiver.clone());
        }
        if let Some(value) = frame.local(src) {
            return Ok(value.clone());
        }
        if src.starts_with('@') {
            if let Some((_, value)) = frame
                .receiver
                .children()
                .into_iter()
                .find(|(name, _)| name == src)
            {
                return Ok(value);
            }
            return Err(format!("undefined instance variable {src}"));
        }
        Err(format!("undefined local variable or method `{src}'"))
    }

    fn next_traceable_line(&self, loc: &Location) -> Option<u32> {
        let sources = self.sources.lock().unwrap();
        let lines = sources.get(&loc.path)?;
        lines
            .iter()
            .enumerate()
            .skip(loc.line as usize)
            .find(|(_, text)| !text.trim().is_empty())
            .map(|(i, _)| i as u32 + 1)
    }

    fn resolve_line(&self, path: &str, line: u32) -> bool {
        let sources = self.sources.lock().unwrap();
        sources
            .get(path)
            .and_then(|lines| lines.get(line.saturating_sub(1) as usize))
            .map(|text| !text.trim().is_empty())
            .unwrap_or(false)
    }

    fn method_defined(&self, signature: &str) -> bool {
        self.methods.lock().unwrap().contains(signature)
    }

    fn interrupt(&self, tid: ThreadId) {
        if let Some(flag) = self.interrupts.lock().unwrap().get(&tid) {
            flag.store(true, Ordering::Relaxed);
        }
    }

    fn threads(&self) -> Vec<ThreadId> {
        self.threads.lock().unwrap().keys().copied().collect()
    }

    fn thread_name(&self, tid: ThreadId) -> String {
        self.names
            .lock()
            .unwrap()
            .get(&tid)
            .cloned()
            .unwrap_or_else(|| format!("thread-{tid}"))
    }

    fn ivars(&self, tid: ThreadId, depth: usize) -> Vec<(String, Value)> {
        let threads = self.threads.lock().unwrap();
        threads
            .get(&tid)
            .and_then(|t| t.stack.iter().rev().nth(depth))
            .map(|frame| {
                frame
                    .receiver
                    .children()
                    .into_iter()
                    .filter(|(name, _)| name.starts_with('@'))
                    .collect()
            })
            .unwrap_or_default()
    }

    fn globals(&self) -> Vec<(String, Value)> {
        self.globals.lock().unwrap().clone()
    }

    fn source_lines(&self, path: &str) -> Option<Vec<String>> {
        self.sources.lock().unwrap().get(path).cloned()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_traceable_lines() {
        let engine = ScriptedEngine::new();
        engine.add_source("demo.src", "a = 1\n\nb = 2\nc = 3\n");
        assert!(engine.resolve_line("demo.src", 1));
        assert!(!engine.resolve_line("demo.src", 2));
        assert_eq!(
            engine.next_traceable_line(&Location::new("demo.src", 1)),
            Some(3)
        );
        assert_eq!(engine.next_traceable_line(&Location::new("demo.src", 4)), None);
    }
}
