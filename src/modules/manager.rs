use std::{
    collections::HashMap,
    path::{Path, PathBuf},
};

use indexmap::IndexMap;
use tracing::{debug, error, info, warn};

use crate::{
    config::ModuleConfig,
    diagnostics::{EzError, Result},
    environment::EnvironmentRef,
    runtime::Evaluator,
    value::Value,
};

use super::{
    loader::{LoadedModule, ModuleLoader},
    registry::ModuleRegistry,
};

/// Host hook invoked with `(module, handler_id)` for every event handler a
/// module owns when it is unloaded or reloaded.
pub type HandlerCleanup = dyn FnMut(&str, &str) -> Result<()>;

/// State of a module whose body is currently executing.
#[derive(Debug)]
struct LoadFrame {
    name: String,
    file_path: PathBuf,
    explicit_exports: IndexMap<String, Value>,
    handlers: Vec<String>,
    dependencies: Vec<String>,
}

impl LoadFrame {
    fn new(module: &LoadedModule) -> Self {
        Self {
            name: module.name.clone(),
            file_path: module.file_path.clone(),
            explicit_exports: IndexMap::new(),
            handlers: Vec::new(),
            dependencies: Vec::new(),
        }
    }
}

pub struct ModuleManager {
    registry: ModuleRegistry,
    loader: ModuleLoader,
    globals: EnvironmentRef,
    handler_owners: HashMap<String, Vec<String>>,
    cleanup: Option<Box<HandlerCleanup>>,
    loading: Vec<LoadFrame>,
    script_dir: Option<PathBuf>,
}

impl ModuleManager {
    /// Module scopes are created as children of `globals`.
    pub fn new(globals: EnvironmentRef, config: ModuleConfig) -> Self {
        Self {
            registry: ModuleRegistry::new(),
            loader: ModuleLoader::new(config),
            globals,
            handler_owners: HashMap::new(),
            cleanup: None,
            loading: Vec::new(),
            script_dir: None,
        }
    }

    pub fn registry(&self) -> &ModuleRegistry {
        &self.registry
    }

    pub fn loader(&self) -> &ModuleLoader {
        &self.loader
    }

    /// Directory relative imports resolve against outside any module body.
    pub fn set_script_dir(&mut self, dir: Option<PathBuf>) {
        self.script_dir = dir;
    }

    pub fn set_handler_cleanup<F>(&mut self, hook: F)
    where
        F: FnMut(&str, &str) -> Result<()> + 'static,
    {
        self.cleanup = Some(Box::new(hook));
    }

    /// Name of the module whose body is executing, innermost first.
    pub fn current_module(&self) -> Option<&str> {
        self.loading.last().map(|frame| frame.name.as_str())
    }

    /// File of the module whose body is executing.
    pub fn current_file(&self) -> Option<&Path> {
        self.loading.last().map(|frame| frame.file_path.as_path())
    }

    /// Loads, executes and registers the module at `path`, returning its
    /// module object. Loading a file that is already registered reloads it.
    pub fn load_module(
        &mut self,
        path: impl AsRef<Path>,
        evaluator: &mut dyn Evaluator,
    ) -> Result<Value> {
        let path = path.as_ref();
        self.load_inner(path, evaluator)
            .map_err(|source| EzError::ModuleLoad {
                path: path.display().to_string(),
                source: Box::new(source),
            })
    }

    fn load_inner(&mut self, path: &Path, evaluator: &mut dyn Evaluator) -> Result<Value> {
        let base_dir = self.base_dir();
        let module = self
            .loader
            .load_from(path, base_dir.as_deref(), &self.globals)?;
        self.ensure_not_loading(&module)?;

        if let Some(existing) = self.registry.get(&module.name) {
            if existing.file_path != module.file_path {
                return Err(EzError::ModuleNameConflict {
                    name: module.name,
                    existing: existing.file_path.clone(),
                    attempted: module.file_path,
                });
            }
            debug!(module = %module.name, "module already loaded, reloading");
            let name = module.name.clone();
            return self.reload_inner(&name, evaluator);
        }

        self.execute(module, evaluator)
    }

    /// Re-runs a registered module from its file. Event handlers are cleaned
    /// up first; the previous exports stay registered if the load fails.
    pub fn reload_module(&mut self, name: &str, evaluator: &mut dyn Evaluator) -> Result<Value> {
        let path = self
            .registry
            .get(name)
            .map(|module| module.file_path.clone())
            .ok_or_else(|| EzError::UnknownModule(name.to_string()))?;
        self.reload_inner(name, evaluator)
            .map_err(|source| EzError::ModuleLoad {
                path: path.display().to_string(),
                source: Box::new(source),
            })
    }

    fn reload_inner(&mut self, name: &str, evaluator: &mut dyn Evaluator) -> Result<Value> {
        let file_path = self
            .registry
            .get(name)
            .map(|module| module.file_path.clone())
            .ok_or_else(|| EzError::UnknownModule(name.to_string()))?;
        info!(module = %name, "reloading module");

        if let Err(err) = self.cleanup_event_handlers(name) {
            warn!(module = %name, error = %err, "event handler cleanup failed during reload");
        }

        let module = self.loader.load(&file_path, &self.globals)?;
        self.ensure_not_loading(&module)?;
        let renamed = module.name != name;
        let value = self.execute(module, evaluator)?;
        if renamed {
            info!(module = %name, "module renamed itself on reload, dropping old entry");
            self.registry.unregister(name);
        }
        Ok(value)
    }

    /// Runs the body, collects exports and registers the module. Nothing is
    /// registered unless every statement succeeds.
    fn execute(&mut self, module: LoadedModule, evaluator: &mut dyn Evaluator) -> Result<Value> {
        self.loading.push(LoadFrame::new(&module));
        let outcome = self.run_body(&module, evaluator);
        let Some(frame) = self.loading.pop() else {
            return Err(EzError::UnknownModule(module.name));
        };
        outcome?;

        let mut exports = self.scan_exports(&module.environment);
        exports.extend(frame.explicit_exports);
        let name = module.name;
        self.registry.register(&name, &module.file_path, exports)?;

        self.registry.clear_dependencies(&name);
        for dependency in frame.dependencies {
            if self.registry.has_circular_dependency(&name, &dependency) {
                warn!(
                    module = %name,
                    dependency = %dependency,
                    "skipping dependency edge that would form a cycle"
                );
                continue;
            }
            self.registry.add_dependency(&name, &dependency);
        }
        for handler in frame.handlers {
            self.attach_handler(&name, &handler);
        }
        if let Some(parent) = self.loading.last_mut() {
            if !parent.dependencies.contains(&name) {
                parent.dependencies.push(name.clone());
            }
        }

        info!(module = %name, path = %module.file_path.display(), "module loaded");
        self.create_module_object(&name)
    }

    fn run_body(&mut self, module: &LoadedModule, evaluator: &mut dyn Evaluator) -> Result<()> {
        for stmt in &module.body {
            evaluator
                .execute_statement(stmt, &module.environment, self)
                .map_err(|err| err.with_origin(&module.file_path))?;
        }
        Ok(())
    }

    fn ensure_not_loading(&self, module: &LoadedModule) -> Result<()> {
        let Some(start) = self
            .loading
            .iter()
            .position(|frame| frame.file_path == module.file_path)
        else {
            return Ok(());
        };
        let mut chain: Vec<String> = self.loading[start..]
            .iter()
            .map(|frame| frame.name.clone())
            .collect();
        chain.push(module.name.clone());
        Err(EzError::CircularDependency(chain))
    }

    fn base_dir(&self) -> Option<PathBuf> {
        match self.loading.last() {
            Some(frame) => frame.file_path.parent().map(Path::to_path_buf),
            None => self.script_dir.clone(),
        }
    }

    fn scan_exports(&self, env: &EnvironmentRef) -> IndexMap<String, Value> {
        let prefix = self.loader.config().export_prefix.as_str();
        env.borrow()
            .local_bindings()
            .into_iter()
            .filter_map(|(name, value)| {
                let exported = name.strip_prefix(prefix)?;
                (!exported.is_empty()).then(|| (exported.to_string(), value))
            })
            .collect()
    }

    /// Returns `false` (after logging) when the module is unknown or handler
    /// cleanup fails; the module then stays registered.
    pub fn unload_module(&mut self, name: &str) -> bool {
        if !self.registry.has(name) {
            warn!(module = %name, "cannot unload unknown module");
            return false;
        }
        if let Err(err) = self.cleanup_event_handlers(name) {
            error!(module = %name, error = %err, "failed to unload module");
            return false;
        }
        self.registry.unregister(name);
        info!(module = %name, "module unloaded");
        true
    }

    fn cleanup_event_handlers(&mut self, name: &str) -> Result<()> {
        for handler in self.registry.event_handlers(name) {
            match self.cleanup.as_mut() {
                Some(hook) => hook(name, &handler)?,
                None => debug!(module = %name, handler = %handler, "dropping event handler"),
            }
            if let Some(owners) = self.handler_owners.get_mut(&handler) {
                owners.retain(|owner| owner != name);
                if owners.is_empty() {
                    self.handler_owners.remove(&handler);
                }
            }
        }
        self.registry.clear_event_handlers(name);
        Ok(())
    }

    pub fn get_module(&self, name: &str) -> Result<Value> {
        self.create_module_object(name)
    }

    pub fn module_exists(&self, name: &str) -> bool {
        self.registry.has(name)
    }

    /// One summary record per registered module.
    pub fn list_modules(&self) -> Vec<Value> {
        self.registry
            .all()
            .map(|module| {
                let mut entry = IndexMap::new();
                entry.insert("name".to_string(), Value::string(module.name.clone()));
                entry.insert(
                    "file_path".to_string(),
                    Value::string(module.file_path.display().to_string()),
                );
                entry.insert(
                    "loaded_at".to_string(),
                    Value::string(module.loaded_at.to_rfc3339()),
                );
                entry.insert(
                    "reload_count".to_string(),
                    Value::number(f64::from(module.reload_count)),
                );
                entry.insert(
                    "export_count".to_string(),
                    Value::number(module.exports.len() as f64),
                );
                entry.insert(
                    "event_handlers".to_string(),
                    Value::number(module.event_handlers.len() as f64),
                );
                Value::record(entry)
            })
            .collect()
    }

    /// Adds an export to a module. A module still executing its body receives
    /// the value when it registers.
    pub fn export_value(&mut self, module: &str, export_name: &str, value: Value) -> Result<()> {
        if let Some(frame) = self.loading.iter_mut().rev().find(|f| f.name == module) {
            frame.explicit_exports.insert(export_name.to_string(), value);
            return Ok(());
        }
        match self.registry.get_mut(module) {
            Some(metadata) => {
                metadata.exports.insert(export_name.to_string(), value);
                Ok(())
            }
            None => Err(EzError::UnknownModule(module.to_string())),
        }
    }

    pub fn create_module_object(&self, name: &str) -> Result<Value> {
        let module = self
            .registry
            .get(name)
            .ok_or_else(|| EzError::UnknownModule(name.to_string()))?;
        let mut object = module.exports.clone();
        object.insert("__name__".to_string(), Value::string(module.name.clone()));
        object.insert(
            "__file__".to_string(),
            Value::string(module.file_path.display().to_string()),
        );
        Ok(Value::record(object))
    }

    pub fn register_event_handler(&mut self, module: &str, handler_id: &str) -> Result<()> {
        if let Some(frame) = self.loading.iter_mut().rev().find(|f| f.name == module) {
            frame.handlers.push(handler_id.to_string());
            return Ok(());
        }
        if !self.registry.has(module) {
            return Err(EzError::UnknownModule(module.to_string()));
        }
        self.attach_handler(module, handler_id);
        Ok(())
    }

    fn attach_handler(&mut self, module: &str, handler_id: &str) {
        self.registry.add_event_handler(module, handler_id);
        let owners = self
            .handler_owners
            .entry(handler_id.to_string())
            .or_default();
        if !owners.iter().any(|owner| owner == module) {
            owners.push(module.to_string());
        }
    }

    /// Modules that registered `handler_id`.
    pub fn modules_for_handler(&self, handler_id: &str) -> Vec<String> {
        self.handler_owners
            .get(handler_id)
            .cloned()
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use std::{cell::RefCell, fs, rc::Rc};

    use super::*;
    use crate::{environment::Environment, runtime::Executor};

    fn manager() -> ModuleManager {
        ModuleManager::new(Environment::new(), ModuleConfig::default())
    }

    fn write(dir: &Path, file: &str, source: &str) -> PathBuf {
        let path = dir.join(file);
        fs::write(&path, source).expect("write module");
        path
    }

    #[test]
    fn exports_are_stripped_of_prefix() {
        let dir = tempfile::tempdir().expect("temp dir");
        let path = write(
            dir.path(),
            "util.ez",
            "var export_answer = 42\nvar hidden = 1\nfunction export_greet() { return \"hi\" }\n",
        );
        let mut modules = manager();
        let object = modules
            .load_module(&path, &mut Executor::default())
            .expect("load");

        assert_eq!(object.get_property("answer").and_then(|v| v.as_number()), Some(42.0));
        assert!(object.get_property("greet").is_some());
        assert!(object.get_property("hidden").is_none());
        assert_eq!(
            object.get_property("__name__").and_then(|v| v.as_str().map(String::from)),
            Some("util".to_string())
        );
        let metadata = modules.registry().get("util").expect("registered");
        assert_eq!(metadata.exports.len(), 2);
    }

    #[test]
    fn loading_same_file_twice_bumps_reload_count() {
        let dir = tempfile::tempdir().expect("temp dir");
        let path = write(dir.path(), "m.ez", "# @module M\nvar export_v = 1\n");
        let mut modules = manager();
        let mut executor = Executor::default();

        modules.load_module(&path, &mut executor).expect("first load");
        assert_eq!(modules.registry().get("M").unwrap().reload_count, 0);

        fs::write(&path, "# @module M\nvar export_v = 2\n").expect("rewrite");
        let object = modules.load_module(&path, &mut executor).expect("second load");
        assert_eq!(modules.registry().get("M").unwrap().reload_count, 1);
        assert_eq!(object.get_property("v").and_then(|v| v.as_number()), Some(2.0));
    }

    #[test]
    fn second_file_claiming_same_name_conflicts() {
        let dir = tempfile::tempdir().expect("temp dir");
        let first = write(dir.path(), "a.ez", "# @module M\n");
        let second = write(dir.path(), "b.ez", "# @module M\n");
        let mut modules = manager();
        let mut executor = Executor::default();

        modules.load_module(&first, &mut executor).expect("first load");
        let err = modules.load_module(&second, &mut executor).unwrap_err();
        assert!(matches!(
            err.root_cause(),
            EzError::ModuleNameConflict { name, .. } if name == "M"
        ));
        assert_eq!(modules.registry().get("M").unwrap().file_path, first);
    }

    #[test]
    fn failed_body_leaves_registry_untouched() {
        let dir = tempfile::tempdir().expect("temp dir");
        let path = write(dir.path(), "broken.ez", "var export_a = 1\nmissing()\n");
        let mut modules = manager();
        let err = modules
            .load_module(&path, &mut Executor::default())
            .unwrap_err();
        assert!(matches!(err, EzError::ModuleLoad { .. }));
        assert!(matches!(err.root_cause(), EzError::UndefinedVariable(name) if name == "missing"));
        assert!(!modules.module_exists("broken"));
        assert!(modules.current_module().is_none());
    }

    #[test]
    fn explicit_exports_during_load_are_registered() {
        let dir = tempfile::tempdir().expect("temp dir");
        let path = write(dir.path(), "late.ez", "var export_a = 1\n");
        let mut modules = manager();
        modules
            .load_module(&path, &mut Executor::default())
            .expect("load");

        modules
            .export_value("late", "extra", Value::string("x"))
            .expect("export to registered module");
        let object = modules.get_module("late").expect("module object");
        let extra = object
            .get_property("extra")
            .and_then(|v| v.as_str().map(String::from));
        assert_eq!(extra.as_deref(), Some("x"));

        let err = modules
            .export_value("ghost", "x", Value::null())
            .unwrap_err();
        assert!(matches!(err, EzError::UnknownModule(_)));
    }

    #[test]
    fn unload_runs_cleanup_hook_for_each_handler() {
        let dir = tempfile::tempdir().expect("temp dir");
        let path = write(dir.path(), "bot.ez", "");
        let mut modules = manager();
        modules
            .load_module(&path, &mut Executor::default())
            .expect("load");
        modules.register_event_handler("bot", "message#1").unwrap();
        modules.register_event_handler("bot", "ready#1").unwrap();
        assert_eq!(modules.modules_for_handler("message#1"), vec!["bot"]);

        let seen = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&seen);
        modules.set_handler_cleanup(move |module, handler| {
            sink.borrow_mut().push(format!("{module}:{handler}"));
            Ok(())
        });

        assert!(modules.unload_module("bot"));
        assert_eq!(*seen.borrow(), vec!["bot:message#1", "bot:ready#1"]);
        assert!(modules.modules_for_handler("message#1").is_empty());
        assert!(!modules.unload_module("bot"));
    }

    #[test]
    fn failing_cleanup_keeps_module_registered() {
        let dir = tempfile::tempdir().expect("temp dir");
        let path = write(dir.path(), "bot.ez", "");
        let mut modules = manager();
        modules
            .load_module(&path, &mut Executor::default())
            .expect("load");
        modules.register_event_handler("bot", "h1").unwrap();
        modules.set_handler_cleanup(|_, _| Err(EzError::UnknownModule("host".into())));

        assert!(!modules.unload_module("bot"));
        assert!(modules.module_exists("bot"));
    }

    #[test]
    fn list_modules_reports_counts() {
        let dir = tempfile::tempdir().expect("temp dir");
        let path = write(dir.path(), "stats.ez", "var export_a = 1\nvar export_b = 2\n");
        let mut modules = manager();
        modules
            .load_module(&path, &mut Executor::default())
            .expect("load");
        modules.register_event_handler("stats", "tick").unwrap();

        let listing = modules.list_modules();
        assert_eq!(listing.len(), 1);
        let entry = &listing[0];
        assert_eq!(entry.get_property("export_count").and_then(|v| v.as_number()), Some(2.0));
        assert_eq!(entry.get_property("event_handlers").and_then(|v| v.as_number()), Some(1.0));
        assert_eq!(entry.get_property("reload_count").and_then(|v| v.as_number()), Some(0.0));
        let loaded_at = entry.get_property("loaded_at").expect("loaded_at");
        assert!(chrono::DateTime::parse_from_rfc3339(loaded_at.as_str().unwrap()).is_ok());
    }

    #[test]
    fn reload_of_unknown_module_fails() {
        let mut modules = manager();
        let err = modules
            .reload_module("nothing", &mut Executor::default())
            .unwrap_err();
        assert!(matches!(err, EzError::UnknownModule(name) if name == "nothing"));
    }
}
