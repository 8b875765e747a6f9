//! Breakpoint definitions and the session-owned registry.

use crate::debugger::engine::{ExecutionEngine, ThreadId, Value};
use crate::debugger::error::Error;
use indexmap::IndexMap;
use regex::Regex;
use std::fmt;
use std::fmt::{Display, Formatter};

/// Unique registry key of a breakpoint.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum BreakpointKey {
    Line(String, u32),
    /// Fully qualified method signature, e.g. `Foo#bar` or `Foo.baz`.
    Method(String),
    /// Exception class name/pattern.
    Catch(String),
    /// Watched instance variable name.
    Watch(String),
}

impl Display for BreakpointKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            BreakpointKey::Line(path, line) => write!(f, "{path}:{line}"),
            BreakpointKey::Method(sig) => write!(f, "{sig}"),
            BreakpointKey::Catch(pat) => write!(f, "{pat}"),
            BreakpointKey::Watch(ivar) => write!(f, "{ivar}"),
        }
    }
}

/// Method breakpoint operator: `#` for instance methods, `.` for singleton
/// methods.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MethodOp {
    Instance,
    Singleton,
}

impl Display for MethodOp {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            MethodOp::Instance => write!(f, "#"),
            MethodOp::Singleton => write!(f, "."),
        }
    }
}

/// Commands attached to a breakpoint: `pre:` runs before stopping, `do:`
/// runs and auto-continues.
#[derive(Debug, Clone, Default)]
pub struct BreakpointCommands {
    pub pre: Option<String>,
    pub r#do: Option<String>,
}

impl BreakpointCommands {
    pub fn is_empty(&self) -> bool {
        self.pre.is_none() && self.r#do.is_none()
    }
}

#[derive(Debug, Clone)]
pub enum BreakpointKind {
    Line {
        path: String,
        line: u32,
        oneshot: bool,
        resolved: bool,
    },
    Method {
        class_name: String,
        op: MethodOp,
        method_name: String,
        resolved: bool,
    },
    Catch {
        pattern: String,
    },
    Watch {
        ivar: String,
        /// Thread the watch expression is bound to.
        tid: ThreadId,
        last: Option<Value>,
    },
}

#[derive(Debug)]
pub struct Breakpoint {
    kind: BreakpointKind,
    pub cond: Option<String>,
    pub commands: BreakpointCommands,
    pub path_filter: Option<Regex>,
    enabled: bool,
    deleted: bool,
}

impl Breakpoint {
    fn new(kind: BreakpointKind) -> Self {
        Self {
            kind,
            cond: None,
            commands: BreakpointCommands::default(),
            path_filter: None,
            enabled: true,
            deleted: false,
        }
    }

    pub fn line(path: impl Into<String>, line: u32) -> Self {
        Self::new(BreakpointKind::Line {
            path: path.into(),
            line,
            oneshot: false,
            resolved: false,
        })
    }

    pub fn method(class_name: impl Into<String>, op: MethodOp, method_name: impl Into<String>) -> Self {
        Self::new(BreakpointKind::Method {
            class_name: class_name.into(),
            op,
            method_name: method_name.into(),
            resolved: false,
        })
    }

    pub fn catch(pattern: impl Into<String>) -> Self {
        Self::new(BreakpointKind::Catch {
            pattern: pattern.into(),
        })
    }

    pub fn watch(ivar: impl Into<String>, tid: ThreadId, initial: Option<Value>) -> Self {
        Self::new(BreakpointKind::Watch {
            ivar: ivar.into(),
            tid,
            last: initial,
        })
    }

    pub fn oneshot(mut self) -> Self {
        if let BreakpointKind::Line { oneshot, .. } = &mut self.kind {
            *oneshot = true;
        }
        self
    }

    pub fn condition(mut self, cond: Option<String>) -> Self {
        self.cond = cond;
        self
    }

    pub fn with_commands(mut self, commands: BreakpointCommands) -> Self {
        self.commands = commands;
        self
    }

    pub fn with_path_filter(mut self, filter: Option<Regex>) -> Self {
        self.path_filter = filter;
        self
    }

    pub fn key(&self) -> BreakpointKey {
        match &self.kind {
            BreakpointKind::Line { path, line, .. } => BreakpointKey::Line(path.clone(), *line),
            BreakpointKind::Method {
                class_name,
                op,
                method_name,
                ..
            } => BreakpointKey::Method(format!("{class_name}{op}{method_name}")),
            BreakpointKind::Catch { pattern } => BreakpointKey::Catch(pattern.clone()),
            BreakpointKind::Watch { ivar, .. } => BreakpointKey::Watch(ivar.clone()),
        }
    }

    pub fn kind(&self) -> &BreakpointKind {
        &self.kind
    }

    /// Only oneshot line breakpoints may share a key with an existing entry.
    pub fn duplicable(&self) -> bool {
        matches!(self.kind, BreakpointKind::Line { oneshot: true, .. })
    }

    pub fn is_oneshot(&self) -> bool {
        matches!(self.kind, BreakpointKind::Line { oneshot: true, .. })
    }

    pub fn is_catch(&self) -> bool {
        matches!(self.kind, BreakpointKind::Catch { .. })
    }

    pub fn is_resolved(&self) -> bool {
        match &self.kind {
            BreakpointKind::Line { resolved, .. } => *resolved,
            BreakpointKind::Method { resolved, .. } => *resolved,
            _ => true,
        }
    }

    pub fn resolve(&mut self) {
        match &mut self.kind {
            BreakpointKind::Line { resolved, .. } => *resolved = true,
            BreakpointKind::Method { resolved, .. } => *resolved = true,
            _ => {}
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled && !self.deleted
    }

    pub fn enable(&mut self) {
        self.enabled = true;
    }

    pub fn disable(&mut self) {
        self.enabled = false;
    }

    pub fn is_deleted(&self) -> bool {
        self.deleted
    }

    pub fn delete(&mut self) {
        self.enabled = false;
        self.deleted = true;
    }

    pub fn description(&self) -> String {
        let mut desc = match &self.kind {
            BreakpointKind::Line {
                path,
                line,
                oneshot,
                resolved,
            } => {
                let mut d = format!("BP - Line  {path}:{line}");
                if *oneshot {
                    d.push_str(" (oneshot)");
                }
                if !resolved {
                    d.push_str(" (pending)");
                }
                d
            }
            BreakpointKind::Method {
                class_name,
                op,
                method_name,
                resolved,
            } => {
                let mut d = format!("BP - Method  {class_name}{op}{method_name}");
                if !resolved {
                    d.push_str(" (pending)");
                }
                d
            }
            BreakpointKind::Catch { pattern } => format!("BP - Catch  {pattern:?}"),
            BreakpointKind::Watch { ivar, .. } => format!("BP - Watch  {ivar}"),
        };
        if let Some(cond) = &self.cond {
            desc.push_str(&format!(" if: {cond}"));
        }
        if let Some(pre) = &self.commands.pre {
            desc.push_str(&format!(" pre: {pre}"));
        }
        if let Some(cmd) = &self.commands.r#do {
            desc.push_str(&format!(" do: {cmd}"));
        }
        if !self.enabled {
            desc.push_str(" (disabled)");
        }
        desc
    }
}

impl Display for Breakpoint {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(&self.description())
    }
}

/// Session-owned breakpoint table.
///
/// Iteration order is insertion order; user-visible ordinals are positions
/// in that order with deleted entries skipped.
#[derive(Default)]
pub struct BreakpointRegistry {
    bps: IndexMap<BreakpointKey, Breakpoint>,
}

impl BreakpointRegistry {
    /// Insert a breakpoint under its key.
    ///
    /// A non-duplicable newcomer whose key is already taken is disabled and
    /// reported instead of inserted.
    pub fn add(&mut self, mut bp: Breakpoint) -> Result<BreakpointKey, Error> {
        let key = bp.key();
        if self.bps.contains_key(&key) && !bp.duplicable() {
            bp.disable();
            return Err(Error::DuplicateBreakpoint(bp.description()));
        }
        self.bps.insert(key.clone(), bp);
        Ok(key)
    }

    pub fn get(&self, key: &BreakpointKey) -> Option<&Breakpoint> {
        self.bps.get(key)
    }

    pub fn get_mut(&mut self, key: &BreakpointKey) -> Option<&mut Breakpoint> {
        self.bps.get_mut(key)
    }

    /// Enumerate `(key, breakpoint, ordinal)` skipping deleted entries.
    /// Deleted entries are compacted out of the backing map as a side
    /// effect.
    pub fn iterate(&mut self) -> impl Iterator<Item = (&BreakpointKey, &Breakpoint, usize)> {
        self.bps.retain(|_, bp| !bp.is_deleted());
        self.bps
            .iter()
            .enumerate()
            .map(|(i, (key, bp))| (key, bp, i))
    }

    /// Ordinal of a breakpoint in iteration order, if it is still present.
    pub fn index_of(&mut self, key: &BreakpointKey) -> Option<usize> {
        self.iterate()
            .find_map(|(k, _, i)| (k == key).then_some(i))
    }

    /// Delete the breakpoint with the given ordinal. With `None`, delete
    /// everything. Returns the removed `(ordinal, description)`.
    pub fn delete(&mut self, ordinal: Option<usize>) -> Option<(usize, String)> {
        match ordinal {
            None => {
                for bp in self.bps.values_mut() {
                    bp.delete();
                }
                self.bps.clear();
                None
            }
            Some(n) => {
                let key = self
                    .iterate()
                    .find_map(|(key, _, i)| (i == n).then(|| key.clone()))?;
                let mut bp = self.bps.shift_remove(&key)?;
                bp.delete();
                Some((n, bp.description()))
            }
        }
    }

    pub fn clear(&mut self) {
        self.delete(None);
    }

    /// True iff some line breakpoint is registered at exactly `(path, line)`.
    /// The stepping engine uses this to leave breakpoint locations to the
    /// breakpoint hook.
    pub fn match_line(&self, path: &str, line: u32) -> bool {
        self.bps
            .contains_key(&BreakpointKey::Line(path.to_string(), line))
    }

    /// An enabled, resolved line breakpoint hit at this location, if any.
    pub fn line_hit(&self, path: &str, line: u32) -> Option<BreakpointKey> {
        let key = BreakpointKey::Line(path.to_string(), line);
        let bp = self.bps.get(&key)?;
        (bp.is_enabled() && bp.is_resolved()).then_some(key)
    }

    /// An enabled catch breakpoint matching the raised exception's class
    /// chain and origin path, if any.
    pub fn catch_hit(&self, class_chain: &[String], path: &str) -> Option<BreakpointKey> {
        self.bps.iter().find_map(|(key, bp)| {
            let BreakpointKind::Catch { pattern } = bp.kind() else {
                return None;
            };
            if !bp.is_enabled() || !class_chain.iter().any(|c| c == pattern) {
                return None;
            }
            if let Some(filter) = &bp.path_filter {
                if !filter.is_match(path) {
                    return None;
                }
            }
            Some(key.clone())
        })
    }

    /// Enabled watch breakpoints bound to `tid`.
    pub fn watch_candidates(&self, tid: ThreadId) -> Vec<(BreakpointKey, String)> {
        self.bps
            .iter()
            .filter_map(|(key, bp)| match bp.kind() {
                BreakpointKind::Watch {
                    ivar, tid: owner, ..
                } if bp.is_enabled() && *owner == tid => Some((key.clone(), ivar.clone())),
                _ => None,
            })
            .collect()
    }

    /// Replace the remembered value of a watch breakpoint; returns the
    /// previous one.
    pub fn update_watch(&mut self, key: &BreakpointKey, new: Value) -> Option<Value> {
        let bp = self.bps.get_mut(key)?;
        if let BreakpointKind::Watch { last, .. } = &mut bp.kind {
            std::mem::replace(last, Some(new))
        } else {
            None
        }
    }

    /// A oneshot breakpoint deletes itself right after the first trigger.
    pub fn note_triggered(&mut self, key: &BreakpointKey) {
        if let Some(bp) = self.bps.get_mut(key) {
            if bp.is_oneshot() {
                bp.delete();
            }
        }
    }

    /// Pending-resolution pass over line breakpoints after `path` is loaded.
    pub fn resolve_loaded_path(&mut self, path: &str, engine: &dyn ExecutionEngine) {
        for bp in self.bps.values_mut() {
            if let BreakpointKind::Line {
                path: bp_path,
                line,
                resolved,
                ..
            } = &mut bp.kind
            {
                if !*resolved && bp_path == path && engine.resolve_line(bp_path, *line) {
                    *resolved = true;
                    log::debug!(target: "session", "line breakpoint {bp_path}:{line} activated");
                }
            }
        }
    }

    /// Pending-resolution pass over method breakpoints after `signature`
    /// becomes defined. Returns true if some method breakpoint is still
    /// unresolved afterwards.
    pub fn resolve_method(&mut self, signature: &str) -> bool {
        let mut unresolved = false;
        for (key, bp) in self.bps.iter_mut() {
            if let BreakpointKind::Method { resolved, .. } = &mut bp.kind {
                if !*resolved && key == &BreakpointKey::Method(signature.to_string()) {
                    *resolved = true;
                    log::debug!(target: "session", "method breakpoint {key} activated");
                }
                unresolved |= !*resolved;
            }
        }
        unresolved
    }

    /// An enabled, resolved method breakpoint for this signature, if any.
    pub fn method_hit(&self, signature: &str) -> Option<BreakpointKey> {
        let key = BreakpointKey::Method(signature.to_string());
        let bp = self.bps.get(&key)?;
        (bp.is_enabled() && bp.is_resolved()).then_some(key)
    }

    pub fn is_empty(&self) -> bool {
        self.bps.is_empty()
    }

    pub fn len(&self) -> usize {
        self.bps.len()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_key_uniqueness() {
        let mut registry = BreakpointRegistry::default();
        registry.add(Breakpoint::line("a.src", 5)).unwrap();
        registry.add(Breakpoint::line("a.src", 6)).unwrap();
        registry.add(Breakpoint::catch("RuntimeError")).unwrap();

        let keys: Vec<_> = registry.iterate().map(|(k, _, _)| k.clone()).collect();
        assert_eq!(keys.len(), 3);
        for (i, k1) in keys.iter().enumerate() {
            for k2 in &keys[i + 1..] {
                assert_ne!(k1, k2);
            }
        }
    }

    #[test]
    fn test_duplicate_breakpoint_disabled_and_reported() {
        let mut registry = BreakpointRegistry::default();
        registry.add(Breakpoint::catch("RuntimeError")).unwrap();

        let err = registry.add(Breakpoint::catch("RuntimeError")).unwrap_err();
        assert!(matches!(err, Error::DuplicateBreakpoint(_)));

        // exactly one entry keyed "RuntimeError" remains
        let matching: Vec<_> = registry
            .iterate()
            .filter(|(k, _, _)| matches!(k, BreakpointKey::Catch(p) if p == "RuntimeError"))
            .collect();
        assert_eq!(matching.len(), 1);
    }

    #[test]
    fn test_oneshot_is_duplicable() {
        let mut registry = BreakpointRegistry::default();
        registry.add(Breakpoint::line("a.src", 1)).unwrap();
        registry
            .add(Breakpoint::line("a.src", 1).oneshot())
            .unwrap();
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_idempotent_delete() {
        let mut registry = BreakpointRegistry::default();
        registry.add(Breakpoint::line("a.src", 5)).unwrap();
        registry.add(Breakpoint::line("b.src", 9)).unwrap();

        let removed = registry.delete(Some(1));
        assert!(matches!(removed, Some((1, _))));
        // second delete by the same ordinal finds nothing
        assert!(registry.delete(Some(1)).is_none());
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_iterate_compacts_deleted() {
        let mut registry = BreakpointRegistry::default();
        let k1 = registry.add(Breakpoint::line("a.src", 1)).unwrap();
        registry.add(Breakpoint::line("a.src", 2)).unwrap();
        registry.get_mut(&k1).unwrap().delete();

        let ordinals: Vec<_> = registry.iterate().map(|(_, _, i)| i).collect();
        assert_eq!(ordinals, vec![0]);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_match_line() {
        let mut registry = BreakpointRegistry::default();
        registry.add(Breakpoint::line("a.src", 5)).unwrap();
        assert!(registry.match_line("a.src", 5));
        assert!(!registry.match_line("a.src", 6));
        assert!(!registry.match_line("b.src", 5));
    }

    #[test]
    fn test_oneshot_deleted_after_trigger() {
        let mut registry = BreakpointRegistry::default();
        let key = registry
            .add(Breakpoint::line("a.src", 3).oneshot())
            .unwrap();
        assert!(registry.line_hit("a.src", 3).is_some());
        registry.note_triggered(&key);
        assert!(registry.line_hit("a.src", 3).is_none());
    }

    #[test]
    fn test_catch_hit_respects_class_chain_and_path_filter() {
        let mut registry = BreakpointRegistry::default();
        registry
            .add(
                Breakpoint::catch("StandardError")
                    .with_path_filter(Some(Regex::new("app/").unwrap())),
            )
            .unwrap();

        let chain = vec!["RuntimeError".to_string(), "StandardError".to_string()];
        assert!(registry.catch_hit(&chain, "app/main.src").is_some());
        assert!(registry.catch_hit(&chain, "lib/vendor.src").is_none());
        assert!(registry
            .catch_hit(&["IOError".to_string()], "app/main.src")
            .is_none());
    }

    #[test]
    fn test_pending_line_resolution() {
        struct StubEngine;
        impl ExecutionEngine for StubEngine {
            fn capture_frames(&self, _: ThreadId) -> Vec<crate::debugger::engine::Frame> {
                Vec::new()
            }
            fn frame_depth(&self, _: ThreadId) -> u32 {
                0
            }
            fn eval(&self, _: ThreadId, _: usize, _: &str) -> Result<Value, String> {
                Err("no eval".to_string())
            }
            fn next_traceable_line(&self, _: &crate::debugger::engine::Location) -> Option<u32> {
                None
            }
            fn resolve_line(&self, path: &str, _: u32) -> bool {
                path == "late.src"
            }
            fn method_defined(&self, _: &str) -> bool {
                false
            }
            fn interrupt(&self, _: ThreadId) {}
            fn threads(&self) -> Vec<ThreadId> {
                Vec::new()
            }
        }

        let mut registry = BreakpointRegistry::default();
        let key = registry.add(Breakpoint::line("late.src", 2)).unwrap();
        assert!(registry.line_hit("late.src", 2).is_none());

        registry.resolve_loaded_path("late.src", &StubEngine);
        assert!(registry.line_hit("late.src", 2).is_some());
        assert!(registry.get(&key).unwrap().is_resolved());
    }
}
