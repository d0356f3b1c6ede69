use super::terminal::Terminal;

/// ASCII bar showing the share of passed scenarios
pub struct ProgressBar {
    width: usize,
    terminal: Terminal,
}

impl ProgressBar {
    pub fn new(width: usize) -> Self {
        Self::with_terminal(width, Terminal::new())
    }

    pub fn with_terminal(width: usize, terminal: Terminal) -> Self {
        Self { width, terminal }
    }

    /// Render the bar followed by the percentage and an optional label
    pub fn render(&self, percentage: f64, label: Option<&str>) -> String {
        let percentage = percentage.clamp(0.0, 100.0);
        let filled = (percentage / 100.0 * self.width as f64).round() as usize;
        let empty = self.width.saturating_sub(filled);

        let bar = format!("[{}{}]", "#".repeat(filled), ".".repeat(empty));
        let percent_text = format!("{:.1}%", percentage);
        let styled_bar = self.terminal.pass_rate_style(percentage).apply_to(&bar).to_string();

        match label {
            Some(label) => format!("{} {} {}", label, styled_bar, percent_text),
            None => format!("{} {}", styled_bar, percent_text),
        }
    }
}

impl Default for ProgressBar {
    fn default() -> Self {
        Self::new(20)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bar(width: usize) -> ProgressBar {
        ProgressBar::with_terminal(width, Terminal { supports_color: false })
    }

    #[test]
    fn test_progress_bar_full() {
        let result = bar(10).render(100.0, Some("Passed"));
        assert_eq!(result, "Passed [##########] 100.0%");
    }

    #[test]
    fn test_progress_bar_half() {
        let result = bar(10).render(50.0, None);
        assert_eq!(result, "[#####.....] 50.0%");
    }

    #[test]
    fn test_progress_bar_clamps() {
        assert_eq!(bar(4).render(-5.0, None), "[....] 0.0%");
        assert_eq!(bar(4).render(250.0, None), "[####] 100.0%");
    }
}
