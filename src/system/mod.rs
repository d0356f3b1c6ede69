//! System interface abstractions for testing and development

pub mod cache;
pub mod commands;
pub mod filesystem;
pub mod process;
pub mod simulated;

// Re-export commonly used traits
pub use cache::Cache;
pub use commands::{CommandExecutor, CommandOutput};
pub use filesystem::FilesystemReader;
pub use simulated::SimulatedHost;
