//! Cache-lifecycle verification: scenarios, the expectation model and the runner

pub mod catalog;
pub mod model;
pub mod report;
pub mod runner;
pub mod scenario;

#[cfg(test)]
mod integration_tests;

// Re-export commonly used items
pub use report::{CheckRecord, Outcome, Report, Summary};
pub use runner::Runner;
pub use scenario::{CacheSettings, DomainOptions, Scenario, Step};
