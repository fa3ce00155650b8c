use std::{
    fs,
    path::{Path, PathBuf},
};

use indexmap::IndexMap;
use tracing::debug;

use crate::{
    ast::Stmt,
    config::ModuleConfig,
    diagnostics::{EzError, Result},
    environment::{Environment, EnvironmentRef},
    parser,
    value::Value,
};

/// A parsed module that has not been executed yet.
#[derive(Debug)]
pub struct LoadedModule {
    pub name: String,
    pub file_path: PathBuf,
    pub body: Vec<Stmt>,
    pub environment: EnvironmentRef,
    pub exports: IndexMap<String, Value>,
}

#[derive(Debug, Clone, Default)]
pub struct ModuleLoader {
    config: ModuleConfig,
}

impl ModuleLoader {
    pub fn new(config: ModuleConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ModuleConfig {
        &self.config
    }

    pub fn load(&self, path: &Path, parent_env: &EnvironmentRef) -> Result<LoadedModule> {
        self.load_from(path, None, parent_env)
    }

    /// Like [`load`](Self::load), resolving relative paths against
    /// `base_dir` first.
    pub fn load_from(
        &self,
        path: &Path,
        base_dir: Option<&Path>,
        parent_env: &EnvironmentRef,
    ) -> Result<LoadedModule> {
        let file_path = self.resolve(path, base_dir)?;
        if !file_path.is_file() {
            return Err(EzError::ModuleNotFound(file_path));
        }
        debug!(path = %file_path.display(), "loading module source");

        let source = fs::read_to_string(&file_path)?;
        let name = module_name(&source, &file_path);
        let body = parser::parse_program(&source)?;

        Ok(LoadedModule {
            name,
            file_path,
            body,
            environment: Environment::extend(parent_env),
            exports: IndexMap::new(),
        })
    }

    pub fn reload(
        &self,
        module: &LoadedModule,
        parent_env: &EnvironmentRef,
    ) -> Result<LoadedModule> {
        debug!(module = %module.name, "reloading module source");
        self.load(&module.file_path, parent_env)
    }

    /// Absolute path of the module file `path` refers to, with the source
    /// extension appended when it differs.
    pub fn resolve(&self, path: &Path, base_dir: Option<&Path>) -> Result<PathBuf> {
        let joined = if path.is_absolute() {
            path.to_path_buf()
        } else if let Some(base) = base_dir.or(self.config.root.as_deref()) {
            base.join(path)
        } else {
            path.to_path_buf()
        };
        let absolute = std::path::absolute(&joined)?;
        let has_extension = absolute
            .extension()
            .is_some_and(|ext| ext == self.config.extension.as_str());
        if has_extension {
            Ok(absolute)
        } else {
            let mut with_extension = absolute.into_os_string();
            with_extension.push(".");
            with_extension.push(&self.config.extension);
            Ok(PathBuf::from(with_extension))
        }
    }
}

/// Canonical module name: the `@module` directive in the leading comment
/// block, or else the file stem.
pub fn module_name(source: &str, file_path: &Path) -> String {
    directive_name(source).unwrap_or_else(|| {
        file_path
            .file_stem()
            .map(|stem| stem.to_string_lossy().into_owned())
            .unwrap_or_default()
    })
}

fn directive_name(source: &str) -> Option<String> {
    for line in source.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let comment = if let Some(rest) = line.strip_prefix('#') {
            rest
        } else if let Some(rest) = line.strip_prefix("//") {
            rest
        } else {
            return None;
        };
        let Some(rest) = comment.trim_start().strip_prefix("@module") else {
            continue;
        };
        if !rest.starts_with(char::is_whitespace) {
            continue;
        }
        let ident: String = rest
            .trim_start()
            .chars()
            .take_while(|ch| ch.is_alphanumeric() || *ch == '_')
            .collect();
        if !ident.is_empty() {
            return Some(ident);
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use std::rc::Rc;

    use super::*;

    #[test]
    fn directive_overrides_file_stem() {
        let source = "# utilities\n\n# @module helpers\nvar x = 1\n";
        assert_eq!(module_name(source, Path::new("/tmp/util.ez")), "helpers");
    }

    #[test]
    fn directive_after_code_is_ignored() {
        let source = "var x = 1\n# @module late\n";
        assert_eq!(module_name(source, Path::new("/tmp/util.ez")), "util");
    }

    #[test]
    fn slash_comment_directive_and_trailing_text() {
        let source = "// @module  chat_tools  -- shared commands\n";
        assert_eq!(module_name(source, Path::new("x.ez")), "chat_tools");
    }

    #[test]
    fn directive_requires_separator() {
        assert_eq!(directive_name("# @modulefoo\n"), None);
        assert_eq!(directive_name("# @module\n"), None);
    }

    #[test]
    fn resolve_appends_missing_extension() {
        let loader = ModuleLoader::default();
        let base = Path::new("/srv/bot");
        assert_eq!(
            loader.resolve(Path::new("lib/util"), Some(base)).unwrap(),
            PathBuf::from("/srv/bot/lib/util.ez")
        );
        assert_eq!(
            loader.resolve(Path::new("lib/util.ez"), Some(base)).unwrap(),
            PathBuf::from("/srv/bot/lib/util.ez")
        );
        assert_eq!(
            loader.resolve(Path::new("data.txt"), Some(base)).unwrap(),
            PathBuf::from("/srv/bot/data.txt.ez")
        );
    }

    #[test]
    fn resolve_uses_configured_root_without_base() {
        let loader = ModuleLoader::new(ModuleConfig {
            root: Some(PathBuf::from("/opt/mods")),
            ..ModuleConfig::default()
        });
        assert_eq!(
            loader.resolve(Path::new("greet"), None).unwrap(),
            PathBuf::from("/opt/mods/greet.ez")
        );
        assert_eq!(
            loader.resolve(Path::new("/abs/greet.ez"), None).unwrap(),
            PathBuf::from("/abs/greet.ez")
        );
    }

    #[test]
    fn load_produces_isolated_child_scope() {
        let dir = tempfile::tempdir().expect("temp dir");
        let file = dir.path().join("greet.ez");
        fs::write(&file, "# @module greeter\nfunction export_hi() { return \"hi\" }\n")
            .expect("write module");

        let globals = Environment::new();
        globals.borrow_mut().define("shared", Value::number(1.0));
        let loader = ModuleLoader::default();
        let module = loader.load(&dir.path().join("greet"), &globals).expect("load");

        assert_eq!(module.name, "greeter");
        assert_eq!(module.file_path, file);
        assert_eq!(module.body.len(), 1);
        assert!(module.exports.is_empty());
        assert!(Environment::is_declared(&module.environment, "shared"));
        assert!(module.environment.borrow().local_bindings().is_empty());

        let again = loader.reload(&module, &globals).expect("reload");
        assert_eq!(again.file_path, module.file_path);
        assert!(!Rc::ptr_eq(&again.environment, &module.environment));
    }

    #[test]
    fn missing_file_and_syntax_errors_are_reported() {
        let dir = tempfile::tempdir().expect("temp dir");
        let globals = Environment::new();
        let loader = ModuleLoader::default();

        let err = loader.load(&dir.path().join("nope"), &globals).unwrap_err();
        assert!(matches!(err, EzError::ModuleNotFound(path) if path.ends_with("nope.ez")));

        fs::write(dir.path().join("bad.ez"), "var = 3").expect("write module");
        let err = loader.load(&dir.path().join("bad.ez"), &globals).unwrap_err();
        assert!(matches!(err, EzError::Diagnostic(_)));
    }
}
