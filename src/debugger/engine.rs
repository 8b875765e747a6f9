//! Interfaces of the execution engine - the language runtime collaborator
//! that actually runs managed threads.
//!
//! The session core never touches the runtime directly. It consumes a narrow
//! control surface ([`ExecutionEngine`]) and registers a callback object
//! ([`RuntimeListener`]) that the engine invokes *on the managed thread
//! itself* for every traceable event. A listener callback is allowed to
//! block; this is exactly how a thread gets parked at a breakpoint.

use std::fmt;
use std::sync::Arc;

/// Identifier of a managed execution thread, assigned by the engine.
pub type ThreadId = u64;

/// A source position inside the debuggee.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Location {
    pub path: String,
    pub line: u32,
}

impl Location {
    pub fn new(path: impl Into<String>, line: u32) -> Self {
        Self {
            path: path.into(),
            line,
        }
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.path, self.line)
    }
}

/// Coarse value classification used by the structured protocols.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ValueKind {
    String,
    Number,
    Boolean,
    Array,
    Map,
    Error,
    Object,
}

/// An opaque debuggee value exposed by the engine.
///
/// Rendering must never panic across this boundary: [`Value::render`] turns
/// a failing `try_render` into a literal `<#inspect raises ...>` string.
pub trait ValueObject: Send + Sync {
    fn type_name(&self) -> String;

    /// Safe/bounded inspection of the value.
    fn try_render(&self) -> Result<String, String>;

    fn kind(&self) -> ValueKind {
        ValueKind::Object
    }

    /// Child values (members, elements, instance variables).
    fn children(&self) -> Vec<(String, Value)> {
        Vec::new()
    }

    /// Truthiness in the debuggee language, used for breakpoint conditions.
    fn is_truthy(&self) -> bool {
        true
    }

    /// Class ancestry, most specific first. Used by catch breakpoints.
    fn class_chain(&self) -> Vec<String> {
        vec![self.type_name()]
    }

    /// Stable identity, when the engine can provide one. Object tracers
    /// require it.
    fn object_id(&self) -> Option<u64> {
        None
    }

    /// Public method names, used by the `outline` command.
    fn methods(&self) -> Vec<String> {
        Vec::new()
    }
}

#[derive(Clone)]
pub struct Value(Arc<dyn ValueObject>);

impl Value {
    pub fn new(obj: impl ValueObject + 'static) -> Self {
        Value(Arc::new(obj))
    }

    pub fn type_name(&self) -> String {
        self.0.type_name()
    }

    pub fn kind(&self) -> ValueKind {
        self.0.kind()
    }

    pub fn children(&self) -> Vec<(String, Value)> {
        self.0.children()
    }

    pub fn is_truthy(&self) -> bool {
        self.0.is_truthy()
    }

    pub fn class_chain(&self) -> Vec<String> {
        self.0.class_chain()
    }

    pub fn object_id(&self) -> Option<u64> {
        self.0.object_id()
    }

    pub fn methods(&self) -> Vec<String> {
        self.0.methods()
    }

    /// Render the value, truncated to `width` columns.
    pub fn render(&self, width: usize) -> String {
        let full = self.render_full();
        if width > 4 && full.len() >= width {
            let mut truncated: String = full.chars().take(width - 3).collect();
            truncated.push_str("...");
            if truncated.starts_with("#<") {
                truncated.push('>');
            }
            truncated
        } else {
            full
        }
    }

    /// Render the value without a width limit.
    pub fn render_full(&self) -> String {
        match self.0.try_render() {
            Ok(repr) => repr,
            Err(e) => format!("<#inspect raises {e}>"),
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Value({})", self.render(64))
    }
}

/// A captured stack frame. Frame 0 is the innermost frame; `depth` is the
/// absolute call-stack depth of the frame at capture time.
#[derive(Clone, Debug)]
pub struct Frame {
    pub location: Location,
    /// Call identifier (method name, block description).
    pub name: String,
    /// The frame's `self`.
    pub receiver: Value,
    pub locals: Vec<(String, Value)>,
    pub depth: u32,
    pub return_value: Option<Value>,
    pub raised_exception: Option<Value>,
    /// Cursor of the `list` command sliding window.
    pub show_line: Option<u32>,
}

impl Frame {
    pub fn new(location: Location, name: impl Into<String>, receiver: Value, depth: u32) -> Self {
        Self {
            location,
            name: name.into(),
            receiver,
            locals: Vec::new(),
            depth,
            return_value: None,
            raised_exception: None,
            show_line: None,
        }
    }

    pub fn local(&self, name: &str) -> Option<&Value> {
        self.locals
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v)
    }
}

/// Kind of a return-class runtime event.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReturnKind {
    Method,
    Block,
}

/// Control surface of the execution engine consumed by the session core.
pub trait ExecutionEngine: Send + Sync {
    /// Ordered snapshot of the thread's stack, innermost frame first.
    fn capture_frames(&self, tid: ThreadId) -> Vec<Frame>;

    /// Current call-stack depth of the thread.
    fn frame_depth(&self, tid: ThreadId) -> u32;

    /// Evaluate `src` in the binding of frame `depth` (0 = innermost).
    fn eval(&self, tid: ThreadId, depth: usize, src: &str) -> Result<Value, String>;

    /// The next statically traceable line after `loc` inside the same
    /// function, if any. Drives the "next" stepping boundary.
    fn next_traceable_line(&self, loc: &Location) -> Option<u32>;

    /// True if `path:line` maps onto executable code. Drives line breakpoint
    /// resolution.
    fn resolve_line(&self, path: &str, line: u32) -> bool;

    /// True if a method with this fully qualified signature is defined.
    fn method_defined(&self, signature: &str) -> bool;

    /// Deliver an asynchronous pause to the thread. The engine must turn it
    /// into an [`RuntimeListener::on_trap`] callback on that thread without
    /// affecting its peers.
    fn interrupt(&self, tid: ThreadId);

    /// Live managed threads.
    fn threads(&self) -> Vec<ThreadId>;

    fn thread_name(&self, tid: ThreadId) -> String {
        format!("thread-{tid}")
    }

    /// Instance variables of frame `depth`'s receiver.
    fn ivars(&self, _tid: ThreadId, _depth: usize) -> Vec<(String, Value)> {
        Vec::new()
    }

    /// Constants visible from frame `depth`.
    fn consts(&self, _tid: ThreadId, _depth: usize) -> Vec<(String, Value)> {
        Vec::new()
    }

    /// Global variables of the runtime.
    fn globals(&self) -> Vec<(String, Value)> {
        Vec::new()
    }

    /// Source lines for a path only the runtime knows about (eval'd code,
    /// in-memory scripts). Consulted when the filesystem has no answer.
    fn source_lines(&self, _path: &str) -> Option<Vec<String>> {
        None
    }
}

/// Callbacks invoked by the engine on the managed thread itself.
///
/// The contract is the one of a tracing hook: the engine reports an event and
/// the listener decides whether to return immediately or to park the calling
/// thread until the user resumes it.
pub trait RuntimeListener: Send + Sync {
    fn on_thread_begin(&self, tid: ThreadId);

    fn on_line(&self, tid: ThreadId, loc: &Location);

    fn on_call(&self, tid: ThreadId, loc: &Location, name: &str, receiver: &Value, args: &[Value]);

    fn on_return(&self, tid: ThreadId, kind: ReturnKind, loc: &Location, value: Value);

    fn on_raise(&self, tid: ThreadId, loc: &Location, exc: Value);

    /// An asynchronous interrupt (pause request) reached the thread.
    fn on_trap(&self, tid: ThreadId, sig: &str);

    /// New code was loaded into the runtime.
    fn on_load(&self, tid: ThreadId, path: &str, source: &str);

    /// A method definition became available (pending method breakpoints
    /// re-attempt resolution).
    fn on_method_defined(&self, signature: &str);

    fn on_thread_end(&self, tid: ThreadId);
}

/// A ready-made [`ValueObject`] for engines that represent values as plain
/// rendered text with optional structure.
#[derive(Clone)]
pub struct PlainValue {
    type_name: String,
    repr: String,
    kind: ValueKind,
    truthy: bool,
    object_id: Option<u64>,
    chain: Vec<String>,
    children: Vec<(String, Value)>,
    methods: Vec<String>,
}

impl PlainValue {
    pub fn new(type_name: impl Into<String>, repr: impl Into<String>) -> Self {
        Self {
            type_name: type_name.into(),
            repr: repr.into(),
            kind: ValueKind::Object,
            truthy: true,
            object_id: None,
            chain: Vec::new(),
            children: Vec::new(),
            methods: Vec::new(),
        }
    }

    pub fn kind(mut self, kind: ValueKind) -> Self {
        self.kind = kind;
        self
    }

    pub fn truthy(mut self, truthy: bool) -> Self {
        self.truthy = truthy;
        self
    }

    pub fn id(mut self, id: u64) -> Self {
        self.object_id = Some(id);
        self
    }

    pub fn ancestors(mut self, chain: Vec<String>) -> Self {
        self.chain = chain;
        self
    }

    pub fn child(mut self, name: impl Into<String>, value: Value) -> Self {
        self.children.push((name.into(), value));
        self
    }

    pub fn method(mut self, name: impl Into<String>) -> Self {
        self.methods.push(name.into());
        self
    }

    pub fn into_value(self) -> Value {
        Value::new(self)
    }
}

impl ValueObject for PlainValue {
    fn type_name(&self) -> String {
        self.type_name.clone()
    }

    fn try_render(&self) -> Result<String, String> {
        Ok(self.repr.clone())
    }

    fn kind(&self) -> ValueKind {
        self.kind
    }

    fn children(&self) -> Vec<(String, Value)> {
        self.children.clone()
    }

    fn is_truthy(&self) -> bool {
        self.truthy
    }

    fn class_chain(&self) -> Vec<String> {
        if self.chain.is_empty() {
            vec![self.type_name.clone()]
        } else {
            self.chain.clone()
        }
    }

    fn object_id(&self) -> Option<u64> {
        self.object_id
    }

    fn methods(&self) -> Vec<String> {
        self.methods.clone()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    struct BrokenInspect;

    impl ValueObject for BrokenInspect {
        fn type_name(&self) -> String {
            "Broken".to_string()
        }

        fn try_render(&self) -> Result<String, String> {
            Err("boom".to_string())
        }
    }

    #[test]
    fn test_render_never_propagates_failures() {
        let v = Value::new(BrokenInspect);
        assert_eq!(v.render_full(), "<#inspect raises boom>");
    }

    #[test]
    fn test_render_truncation() {
        let v = PlainValue::new("String", "a".repeat(100)).into_value();
        let rendered = v.render(10);
        assert_eq!(rendered.len(), 10);
        assert!(rendered.ends_with("..."));
    }
}
