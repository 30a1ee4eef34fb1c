//! The evaluation scope handed to every decoder.
//!
//! A scope is a plain set of variable bindings from which each decode site
//! builds a fresh `hcl::eval::Context`. Child scopes are copies with extra
//! bindings, so a worker can never observe or mutate its parent; the root
//! scope is shared read-only after construction.

use hcl::Value;
use hcl::eval::Context;
use hcl::value::Map;

#[derive(Clone, Debug, Default)]
pub struct EvalScope {
    vars: Map<String, Value>,
}

impl EvalScope {
    pub fn new() -> Self {
        Self::default()
    }

    /// Binds a root variable, replacing any previous binding of that name.
    pub fn declare(&mut self, name: impl Into<String>, value: Value) {
        self.vars.insert(name.into(), value);
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.vars.get(name)
    }

    /// A copy of this scope with one extra binding.
    #[must_use]
    pub fn child_with(&self, name: impl Into<String>, value: Value) -> Self {
        let mut child = self.clone();
        child.declare(name, value);
        child
    }

    /// Materializes an evaluation context over the current bindings.
    pub fn context(&self) -> Context {
        let mut ctx = Context::new();
        for (name, value) in &self.vars {
            ctx.declare_var(name.as_str(), value.clone());
        }
        ctx
    }
}
