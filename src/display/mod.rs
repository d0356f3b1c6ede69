//! Display module for terminal output and formatting

pub mod formatter;
pub mod progress;
pub mod terminal;

// Re-export commonly used items
pub use formatter::{format_check, format_duration, format_report_line, format_step_list};
pub use progress::ProgressBar;
pub use terminal::Terminal;
