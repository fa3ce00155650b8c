//! Module system: locating and parsing `.ez` files, the registry of loaded
//! modules, and the manager that runs module bodies and tracks their exports.

pub mod loader;
pub mod manager;
pub mod registry;

pub use loader::{LoadedModule, ModuleLoader};
pub use manager::{HandlerCleanup, ModuleManager};
pub use registry::{ModuleMetadata, ModuleRegistry};
