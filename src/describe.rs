//! Human-readable renderings: the file/sheet context block for the planning
//! prompt and bounded table previews for display.

use crate::pool::FileContext;
use crate::table::Table;

/// The live file/sheet/column context block included in every prompt.
pub fn file_contexts(contexts: &[FileContext]) -> String {
    let mut lines = Vec::new();
    for ctx in contexts {
        lines.push(format!("File: {}", ctx.path));
        for sheet in &ctx.sheets {
            lines.push(format!("  Sheet: {}", sheet.name));
            if sheet.columns.is_empty() {
                lines.push("    Columns: (no headers found)".to_string());
            } else {
                lines.push(format!("    Columns: {}", sheet.columns.join(", ")));
            }
        }
    }
    lines.join("\n")
}

/// Render a table as aligned text, bounded to `limit` rows.
pub fn table_preview(table: &Table, limit: usize) -> String {
    if table.columns().is_empty() {
        return "(table has no columns)".to_string();
    }

    let shown = table.slice(limit, false);
    let mut widths: Vec<usize> = table.columns().iter().map(String::len).collect();
    for row in shown.rows() {
        for (i, cell) in row.iter().enumerate() {
            let len = cell.to_string().len();
            if let Some(w) = widths.get_mut(i) {
                *w = (*w).max(len);
            }
        }
    }

    let mut lines = Vec::with_capacity(shown.len() + 3);
    let header: Vec<String> = table
        .columns()
        .iter()
        .enumerate()
        .map(|(i, c)| format!("{c:<width$}", width = widths.get(i).copied().unwrap_or(0)))
        .collect();
    lines.push(header.join(" | "));
    lines.push(
        widths
            .iter()
            .map(|w| "-".repeat(*w))
            .collect::<Vec<_>>()
            .join("-+-"),
    );
    for row in shown.rows() {
        let cells: Vec<String> = row
            .iter()
            .enumerate()
            .map(|(i, c)| {
                format!(
                    "{:<width$}",
                    c.to_string(),
                    width = widths.get(i).copied().unwrap_or(0)
                )
            })
            .collect();
        lines.push(cells.join(" | "));
    }
    if table.len() > shown.len() {
        lines.push(format!(
            "... and {} more rows ({} total)",
            table.len() - shown.len(),
            table.len()
        ));
    } else if table.is_empty() {
        lines.push("(0 rows)".to_string());
    }
    lines.join("\n")
}
