//! TG-005: Layered evaluation scopes.
//!
//! A context is a binding map plus an optional parent. Lookups walk outward,
//! so a child scope shadows its parent without mutating it. Each `for_each`
//! iteration evaluates in its own child of the module scope.

use super::expr::Value;
use rustc_hash::FxHashMap;

#[derive(Debug, Default)]
pub struct EvalContext<'p> {
    bindings: FxHashMap<String, Value>,
    parent: Option<&'p EvalContext<'p>>,
}

impl EvalContext<'static> {
    /// Empty root scope.
    pub fn new() -> Self {
        Self::default()
    }
}

impl<'p> EvalContext<'p> {
    /// New empty scope whose misses fall through to `self`.
    pub fn child(&self) -> EvalContext<'_> {
        EvalContext {
            bindings: FxHashMap::default(),
            parent: Some(self),
        }
    }

    pub fn bind(&mut self, name: &str, value: Value) {
        self.bindings.insert(name.to_string(), value);
    }

    pub fn lookup(&self, name: &str) -> Option<&Value> {
        match self.bindings.get(name) {
            Some(value) => Some(value),
            None => self.parent.and_then(|p| p.lookup(name)),
        }
    }

    /// Whether `name` is bound in this scope itself (ignoring parents).
    pub fn binds_locally(&self, name: &str) -> bool {
        self.bindings.contains_key(name)
    }
}
