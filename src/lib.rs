//! Runtime core for the EzLang scripting language: the value model, lexical
//! scopes, and a module system with hot reload, plus a small reference front
//! end (lexer, parser, tree-walking evaluator) and REPL.

pub mod ast;
pub mod config;
pub mod diagnostics;
pub mod environment;
pub mod lexer;
pub mod logging;
pub mod modules;
pub mod parser;
pub mod repl;
pub mod runtime;
pub mod stdlib;
pub mod value;

pub use config::{ModuleConfig, RuntimeConfig};
pub use diagnostics::{Diagnostic, DiagnosticKind, EzError, Result, SourceSpan};
pub use environment::{Environment, EnvironmentRef};
pub use modules::{ModuleLoader, ModuleManager, ModuleMetadata, ModuleRegistry};
pub use repl::Repl;
pub use runtime::{Evaluator, ExecutionContext, Executor, Interpreter};
pub use value::{HostCapability, Value, ValueKind, is_truthy, value_to_string, values_equal};
