// Clippy allows for reasonable defaults
#![allow(clippy::too_many_arguments)] // Coordination calls often need many params
#![allow(clippy::new_without_default)] // Default not always appropriate for stateful types
#![allow(clippy::collapsible_if)] // Separate ifs can be more readable

// Module declarations
pub mod config;
pub mod coordination;
pub mod database;
pub mod deploy;
mod engine;
pub mod models;
mod utils;

// Re-export models for use by embedders
pub use config::EngineConfig;
pub use engine::{CoordinationEngine, EngineStatus, MaintenanceReport};
pub use models::*;

/// Initialize env_logger from RUST_LOG for embedders that don't configure
/// their own logging. Safe to call more than once.
pub fn init_logging() {
    let _ = env_logger::Builder::from_default_env().try_init();
}
