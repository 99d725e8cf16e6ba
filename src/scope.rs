//! Box scopes — a stack of variable frames plus the root data tables.
//!
//! Lookup walks from the innermost frame outward; assignment always writes
//! to the innermost frame. Function and control frames merge their writes
//! back into the caller when popped (a callee's variables, `status` and the
//! `_<verb>_result` side-bands included, stay visible afterwards). Capture
//! frames — pushed around command substitutions — discard their writes.
//! Data blocks live at the root and are read-only after program start.

use std::collections::HashMap;

use crate::value::Value;

/// The distinguished status variable: after any command it holds that
/// command's exit, after a pipeline the ordered list of stage exits.
pub const STATUS_VAR: &str = "status";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FrameKind {
    Root,
    /// Function call; merges writes down on pop.
    Function,
    /// Control structure; merges writes down on pop.
    Control,
    /// Command substitution; discards writes on pop.
    Capture,
}

#[derive(Debug, Clone)]
struct Frame {
    vars: HashMap<String, Value>,
    kind: FrameKind,
    /// Namespace context for unqualified calls and data lookups inside
    /// imported functions.
    namespace: Option<String>,
}

impl Frame {
    fn new(kind: FrameKind, namespace: Option<String>) -> Self {
        Self {
            vars: HashMap::new(),
            kind,
            namespace,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Environment {
    frames: Vec<Frame>,
    /// Root-owned data tables: block name (or `namespace.block`) → field →
    /// value.
    data: HashMap<String, HashMap<String, Value>>,
}

impl Environment {
    pub fn new() -> Self {
        Self {
            frames: vec![Frame::new(FrameKind::Root, None)],
            data: HashMap::new(),
        }
    }

    // ── variables ───────────────────────────────────────────────────

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.frames.iter().rev().find_map(|f| f.vars.get(name))
    }

    pub fn set(&mut self, name: impl Into<String>, value: Value) {
        self.innermost().vars.insert(name.into(), value);
    }

    pub fn set_status(&mut self, status: i32) {
        self.set(STATUS_VAR, Value::single(status.to_string()));
    }

    pub fn set_status_list(&mut self, codes: &[i32]) {
        self.set(
            STATUS_VAR,
            codes.iter().map(|c| c.to_string()).collect::<Value>(),
        );
    }

    // ── frames ──────────────────────────────────────────────────────

    /// Enter a function body. The frame carries the namespace the function
    /// was resolved through, if any.
    pub fn push_function(&mut self, namespace: Option<String>) {
        self.frames.push(Frame::new(FrameKind::Function, namespace));
    }

    /// Enter a control-structure body. Inherits the surrounding namespace.
    pub fn push_control(&mut self) {
        let namespace = self.namespace().map(str::to_string);
        self.frames.push(Frame::new(FrameKind::Control, namespace));
    }

    /// Enter a command substitution. Reads see everything; writes vanish on
    /// pop.
    pub fn push_capture(&mut self) {
        self.frames.push(Frame::new(FrameKind::Capture, None));
    }

    pub fn pop(&mut self) {
        debug_assert!(self.frames.len() > 1, "attempted to pop the root frame");
        if self.frames.len() <= 1 {
            return;
        }
        let frame = self.frames.pop().expect("frame stack is never empty");
        match frame.kind {
            FrameKind::Function | FrameKind::Control => {
                let parent = self.innermost();
                for (name, value) in frame.vars {
                    parent.vars.insert(name, value);
                }
            }
            FrameKind::Capture | FrameKind::Root => {}
        }
    }

    /// Namespace context of the innermost frame.
    pub fn namespace(&self) -> Option<&str> {
        self.frames
            .last()
            .and_then(|f| f.namespace.as_deref())
    }

    // ── data blocks ─────────────────────────────────────────────────

    pub fn set_data_field(&mut self, block: &str, key: impl Into<String>, value: Value) {
        self.data
            .entry(block.to_string())
            .or_default()
            .insert(key.into(), value);
    }

    pub fn data_field(&self, block: &str, field: &str) -> Option<&Value> {
        self.data.get(block)?.get(field)
    }

    pub fn has_data_block(&self, block: &str) -> bool {
        self.data.contains_key(block)
    }

    fn innermost(&mut self) -> &mut Frame {
        self.frames.last_mut().expect("frame stack is never empty")
    }
}

impl Default for Environment {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_and_get() {
        let mut env = Environment::new();
        env.set("x", Value::single("1"));
        assert_eq!(env.get("x").unwrap().first(), "1");
        assert!(env.get("y").is_none());
    }

    #[test]
    fn lookup_walks_outward_assignment_stays_inner() {
        let mut env = Environment::new();
        env.set("outer", Value::single("a"));
        env.push_function(None);
        assert_eq!(env.get("outer").unwrap().first(), "a");
        env.set("inner", Value::single("b"));
        env.pop();
        // Function writes merge back into the caller.
        assert_eq!(env.get("inner").unwrap().first(), "b");
    }

    #[test]
    fn capture_frames_discard_writes() {
        let mut env = Environment::new();
        env.set("x", Value::single("before"));
        env.push_capture();
        env.set("x", Value::single("inside"));
        env.set("fresh", Value::single("gone"));
        env.pop();
        assert_eq!(env.get("x").unwrap().first(), "before");
        assert!(env.get("fresh").is_none());
    }

    #[test]
    fn control_frames_inherit_namespace() {
        let mut env = Environment::new();
        env.push_function(Some("util".to_string()));
        env.push_control();
        assert_eq!(env.namespace(), Some("util"));
        env.pop();
        env.pop();
        assert_eq!(env.namespace(), None);
    }

    #[test]
    fn status_list() {
        let mut env = Environment::new();
        env.set_status_list(&[0, 1, 0]);
        let status = env.get(STATUS_VAR).unwrap();
        assert_eq!(status.items(), ["0", "1", "0"]);
        env.set_status(7);
        assert_eq!(env.get(STATUS_VAR).unwrap().first(), "7");
    }

    #[test]
    fn data_fields() {
        let mut env = Environment::new();
        env.set_data_field("config", "name", Value::single("app"));
        assert_eq!(env.data_field("config", "name").unwrap().first(), "app");
        assert!(env.data_field("config", "missing").is_none());
        assert!(env.has_data_block("config"));
        assert!(!env.has_data_block("other"));
    }
}
