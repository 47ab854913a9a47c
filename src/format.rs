//! Fixed-width table formatting for human-readable summaries.

use std::fmt::Write as _;

/// Formats rows of centered cells with fixed column widths.
#[derive(Debug, Clone)]
pub struct TableFormatter {
    widths: Vec<usize>,
}

impl TableFormatter {
    /// Create a formatter for columns of the given widths.
    #[must_use]
    pub fn new(widths: Vec<usize>) -> Self {
        Self { widths }
    }

    /// A horizontal rule spanning every column.
    #[must_use]
    pub fn line(&self) -> String {
        self.widths.iter().map(|&w| "=".repeat(w)).collect::<Vec<_>>().join("  ")
    }

    /// Format one row. With `underline`, a dashed rule is appended beneath the cells.
    #[must_use]
    pub fn row<S: AsRef<str>>(&self, cells: &[S], underline: bool) -> String {
        let mut out = String::new();
        for (idx, (cell, &width)) in cells.iter().zip(&self.widths).enumerate() {
            if idx > 0 {
                out.push_str("  ");
            }
            let _ = write!(out, "{:^width$}", cell.as_ref());
        }
        if underline {
            out.push('\n');
            out.push_str(&self.widths.iter().map(|&w| "-".repeat(w)).collect::<Vec<_>>().join("  "));
        }
        out
    }
}

/// Format a number of seconds as `H:MM:SS`, rounding to the nearest second.
#[must_use]
pub fn format_seconds(seconds: f64) -> String {
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    let total = seconds.max(0.0).round() as u64;
    format!("{}:{:02}:{:02}", total / 3600, (total % 3600) / 60, total % 60)
}
