//! The presentation collaborator. The core never renders results itself; it
//! classifies each surfaced outcome as a severity-tagged message, a bounded
//! table preview, or an artifact path, and hands it to an `OutputHandler`.

use std::path::Path;

use crate::describe;
use crate::table::Table;

/// Maximum rows shown in a table preview.
pub const PREVIEW_ROWS: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Info,
    Success,
    Warning,
    Error,
}

impl Severity {
    pub fn slug(self) -> &'static str {
        match self {
            Severity::Info => "info",
            Severity::Success => "success",
            Severity::Warning => "warning",
            Severity::Error => "error",
        }
    }
}

/// Abstraction over result presentation so the orchestrator works the same
/// under a console, a GUI embedding, or a test harness.
pub trait OutputHandler {
    fn message(&self, severity: Severity, text: &str);
    fn table(&self, table: &Table);
    fn artifact(&self, path: &Path);

    fn info(&self, text: &str) {
        self.message(Severity::Info, text);
    }
    fn success(&self, text: &str) {
        self.message(Severity::Success, text);
    }
    fn warning(&self, text: &str) {
        self.message(Severity::Warning, text);
    }
    fn error(&self, text: &str) {
        self.message(Severity::Error, text);
    }
}

/// Formatted console presentation. Warnings and errors go to stderr.
pub struct ConsoleOutput;

impl OutputHandler for ConsoleOutput {
    fn message(&self, severity: Severity, text: &str) {
        match severity {
            Severity::Warning => eprintln!("Warning: {text}"),
            Severity::Error => eprintln!("Error: {text}"),
            Severity::Info | Severity::Success => println!("{text}"),
        }
    }

    fn table(&self, table: &Table) {
        println!("{}", describe::table_preview(table, PREVIEW_ROWS));
    }

    fn artifact(&self, path: &Path) {
        println!("Saved to: {}", path.display());
    }
}

/// Machine-readable presentation: one JSON object per line on stdout.
pub struct JsonOutput;

impl OutputHandler for JsonOutput {
    fn message(&self, severity: Severity, text: &str) {
        println!(
            "{}",
            serde_json::json!({ "type": "message", "severity": severity.slug(), "text": text })
        );
    }

    fn table(&self, table: &Table) {
        println!(
            "{}",
            serde_json::json!({
                "type": "table",
                "preview": table.slice(PREVIEW_ROWS, false),
                "total_rows": table.len(),
            })
        );
    }

    fn artifact(&self, path: &Path) {
        println!(
            "{}",
            serde_json::json!({ "type": "artifact", "path": path.display().to_string() })
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_severity_slugs() {
        assert_eq!(Severity::Warning.slug(), "warning");
        assert_eq!(Severity::Success.slug(), "success");
    }
}
