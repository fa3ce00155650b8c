use std::{cell::RefCell, rc::Rc};

use indexmap::IndexMap;

use crate::{
    diagnostics::{EzError, Result},
    value::Value,
};

/// Scopes are shared by every closure captured in them, so they live behind a
/// reference-counted handle rather than being owned by a call frame.
pub type EnvironmentRef = Rc<RefCell<Environment>>;

#[derive(Debug, Default)]
pub struct Environment {
    parent: Option<EnvironmentRef>,
    bindings: IndexMap<String, Value>,
}

impl Environment {
    pub fn new() -> EnvironmentRef {
        Rc::new(RefCell::new(Self::default()))
    }

    pub fn with_parent(parent: EnvironmentRef) -> EnvironmentRef {
        Rc::new(RefCell::new(Self {
            parent: Some(parent),
            bindings: IndexMap::new(),
        }))
    }

    /// Child scope used for call frames, blocks and module isolation.
    pub fn extend(env: &EnvironmentRef) -> EnvironmentRef {
        Self::with_parent(Rc::clone(env))
    }

    pub fn parent(&self) -> Option<EnvironmentRef> {
        self.parent.clone()
    }

    /// Introduces `name` in this scope. Only local bindings are checked, so a
    /// parent's binding may be shadowed.
    pub fn declare(&mut self, name: impl Into<String>, value: Value) -> Result<()> {
        let name = name.into();
        if self.bindings.contains_key(&name) {
            return Err(EzError::AlreadyDeclared(name));
        }
        self.bindings.insert(name, value);
        Ok(())
    }

    pub fn define(&mut self, name: impl Into<String>, value: Value) {
        self.bindings.insert(name.into(), value);
    }

    pub fn has_local(&self, name: &str) -> bool {
        self.bindings.contains_key(name)
    }

    pub fn assign(env: &EnvironmentRef, name: &str, value: Value) -> Result<()> {
        if let Some(slot) = env.borrow_mut().bindings.get_mut(name) {
            *slot = value;
            return Ok(());
        }
        let parent = env.borrow().parent.clone();
        match parent {
            Some(parent) => Environment::assign(&parent, name, value),
            None => Err(EzError::UndefinedVariable(name.to_string())),
        }
    }

    pub fn lookup(env: &EnvironmentRef, name: &str) -> Result<Value> {
        if let Some(value) = env.borrow().bindings.get(name) {
            return Ok(value.clone());
        }
        let parent = env.borrow().parent.clone();
        match parent {
            Some(parent) => Environment::lookup(&parent, name),
            None => Err(EzError::UndefinedVariable(name.to_string())),
        }
    }

    pub fn is_declared(env: &EnvironmentRef, name: &str) -> bool {
        let mut current = Some(Rc::clone(env));
        while let Some(scope) = current {
            let scope = scope.borrow();
            if scope.bindings.contains_key(name) {
                return true;
            }
            current = scope.parent.clone();
        }
        false
    }

    /// Snapshot of this scope's own bindings in declaration order.
    pub fn local_bindings(&self) -> IndexMap<String, Value> {
        self.bindings.clone()
    }

    /// Every visible binding; ancestors first so nearer scopes win.
    pub fn get_all(env: &EnvironmentRef) -> IndexMap<String, Value> {
        let mut all = match env.borrow().parent.as_ref() {
            Some(parent) => Environment::get_all(parent),
            None => IndexMap::new(),
        };
        for (name, value) in &env.borrow().bindings {
            all.insert(name.clone(), value.clone());
        }
        all
    }
}
