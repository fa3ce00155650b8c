use std::{
    collections::HashMap,
    path::{Path, PathBuf},
};

use chrono::{DateTime, Utc};
use indexmap::{IndexMap, IndexSet};

use crate::{
    diagnostics::{EzError, Result},
    value::Value,
};

/// Bookkeeping for one registered module.
#[derive(Debug, Clone)]
pub struct ModuleMetadata {
    pub name: String,
    pub file_path: PathBuf,
    pub exports: IndexMap<String, Value>,
    pub loaded_at: DateTime<Utc>,
    pub event_handlers: Vec<String>,
    pub dependencies: Vec<String>,
    pub reload_count: u32,
}

/// Loaded modules keyed by canonical name, with a reverse index by file.
#[derive(Debug, Default)]
pub struct ModuleRegistry {
    modules: IndexMap<String, ModuleMetadata>,
    names_by_path: HashMap<PathBuf, String>,
}

impl ModuleRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registering an existing name from the same file counts as a reload:
    /// exports and timestamp are replaced and `reload_count` bumped. A
    /// different file under the same name is a conflict.
    pub fn register(
        &mut self,
        name: &str,
        file_path: &Path,
        exports: IndexMap<String, Value>,
    ) -> Result<()> {
        if let Some(existing) = self.modules.get_mut(name) {
            if existing.file_path != file_path {
                return Err(EzError::ModuleNameConflict {
                    name: name.to_string(),
                    existing: existing.file_path.clone(),
                    attempted: file_path.to_path_buf(),
                });
            }
            existing.exports = exports;
            existing.loaded_at = Utc::now();
            existing.reload_count += 1;
            return Ok(());
        }

        self.modules.insert(
            name.to_string(),
            ModuleMetadata {
                name: name.to_string(),
                file_path: file_path.to_path_buf(),
                exports,
                loaded_at: Utc::now(),
                event_handlers: Vec::new(),
                dependencies: Vec::new(),
                reload_count: 0,
            },
        );
        self.names_by_path
            .insert(file_path.to_path_buf(), name.to_string());
        Ok(())
    }

    pub fn unregister(&mut self, name: &str) -> bool {
        match self.modules.shift_remove(name) {
            Some(module) => {
                if self.name_by_path(&module.file_path) == Some(name) {
                    self.names_by_path.remove(&module.file_path);
                }
                true
            }
            None => false,
        }
    }

    pub fn get(&self, name: &str) -> Option<&ModuleMetadata> {
        self.modules.get(name)
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut ModuleMetadata> {
        self.modules.get_mut(name)
    }

    pub fn has(&self, name: &str) -> bool {
        self.modules.contains_key(name)
    }

    /// Names in registration order.
    pub fn names(&self) -> Vec<String> {
        self.modules.keys().cloned().collect()
    }

    pub fn all(&self) -> impl Iterator<Item = &ModuleMetadata> {
        self.modules.values()
    }

    pub fn len(&self) -> usize {
        self.modules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.modules.is_empty()
    }

    pub fn name_by_path(&self, file_path: &Path) -> Option<&str> {
        self.names_by_path.get(file_path).map(String::as_str)
    }

    /// Ignored when the module is not registered.
    pub fn add_event_handler(&mut self, name: &str, handler_id: &str) {
        if let Some(module) = self.modules.get_mut(name) {
            if !module.event_handlers.iter().any(|id| id == handler_id) {
                module.event_handlers.push(handler_id.to_string());
            }
        }
    }

    pub fn event_handlers(&self, name: &str) -> Vec<String> {
        self.modules
            .get(name)
            .map(|module| module.event_handlers.clone())
            .unwrap_or_default()
    }

    pub fn clear_event_handlers(&mut self, name: &str) {
        if let Some(module) = self.modules.get_mut(name) {
            module.event_handlers.clear();
        }
    }

    pub fn add_dependency(&mut self, name: &str, dependency: &str) {
        if let Some(module) = self.modules.get_mut(name) {
            if !module.dependencies.iter().any(|dep| dep == dependency) {
                module.dependencies.push(dependency.to_string());
            }
        }
    }

    pub fn clear_dependencies(&mut self, name: &str) {
        if let Some(module) = self.modules.get_mut(name) {
            module.dependencies.clear();
        }
    }

    /// Whether `name` is reachable from `dependency` through recorded
    /// dependency edges, i.e. whether adding `name -> dependency` would close
    /// a cycle.
    pub fn has_circular_dependency(&self, name: &str, dependency: &str) -> bool {
        let mut visited = IndexSet::new();
        self.reaches(dependency, name, &mut visited)
    }

    fn reaches<'a>(
        &'a self,
        current: &'a str,
        target: &str,
        visited: &mut IndexSet<&'a str>,
    ) -> bool {
        if current == target {
            return true;
        }
        if !visited.insert(current) {
            return false;
        }
        let Some(module) = self.modules.get(current) else {
            return false;
        };
        module
            .dependencies
            .iter()
            .any(|dep| self.reaches(dep, target, visited))
    }

    pub fn clear(&mut self) {
        self.modules.clear();
        self.names_by_path.clear();
    }
}
