use crate::protocol::Outcome;

/// Terminal color handling
#[derive(Debug, Clone, Copy)]
pub struct Terminal {
    pub supports_color: bool,
}

impl Terminal {
    pub fn new() -> Self {
        Self {
            supports_color: console::colors_enabled(),
        }
    }

    /// Color for a pass rate: green only when everything passed
    pub fn pass_rate_style(&self, percentage: f64) -> console::Style {
        let style = console::Style::new();
        if !self.supports_color {
            return style;
        }

        if percentage >= 100.0 {
            style.green()
        } else if percentage >= 50.0 {
            style.yellow()
        } else {
            style.red()
        }
    }

    pub fn outcome_style(&self, outcome: &Outcome) -> console::Style {
        let style = console::Style::new();
        if !self.supports_color {
            return style;
        }
        match outcome {
            Outcome::Passed => style.green(),
            Outcome::Failed(_) => style.red().bold(),
            Outcome::Errored(_) => style.yellow().bold(),
        }
    }

    pub fn dim(&self) -> console::Style {
        if self.supports_color {
            console::Style::new().dim()
        } else {
            console::Style::new()
        }
    }
}

impl Default for Terminal {
    fn default() -> Self {
        Self::new()
    }
}
