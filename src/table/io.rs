//! Source file loading and table export.
//!
//! Two source formats are understood: `.csv` (a single sheet, named
//! `Sheet1`) and `.json` workbooks — either a top-level object mapping sheet
//! names to arrays of records, or a bare array of records (again a single
//! `Sheet1`). Column order is header order for CSV and first-seen key order
//! for JSON records.

use std::fs;
use std::path::{Path, PathBuf};

use serde_json::Value;

use crate::error::AppError;
use crate::table::{Cell, Table};

/// Default sheet name for sources that have no sheet concept.
pub const DEFAULT_SHEET: &str = "Sheet1";

fn transform_err(path: &Path, message: impl std::fmt::Display) -> AppError {
    AppError::Transform {
        message: format!("{}: {message}", path.display()),
    }
}

fn is_csv(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("csv"))
}

/// Enumerate the sheets of a source file without fully materializing them.
pub fn sheet_names(path: &Path) -> Result<Vec<String>, AppError> {
    if is_csv(path) {
        // Probe readability so unreadable files surface at context time.
        fs::metadata(path).map_err(|e| transform_err(path, e))?;
        return Ok(vec![DEFAULT_SHEET.to_string()]);
    }
    let text = fs::read_to_string(path).map_err(|e| transform_err(path, e))?;
    let value: Value = serde_json::from_str(&text).map_err(|e| transform_err(path, e))?;
    match value {
        Value::Object(map) => Ok(map.keys().cloned().collect()),
        Value::Array(_) => Ok(vec![DEFAULT_SHEET.to_string()]),
        _ => Err(transform_err(
            path,
            "expected a workbook object or an array of records",
        )),
    }
}

/// Load one sheet as a table. `sheet = None` selects the first sheet.
/// Returns the resolved sheet name along with the table.
pub fn load_sheet(path: &Path, sheet: Option<&str>) -> Result<(String, Table), AppError> {
    if is_csv(path) {
        if let Some(name) = sheet {
            if name != DEFAULT_SHEET {
                return Err(transform_err(
                    path,
                    format!("CSV files have a single sheet '{DEFAULT_SHEET}', not '{name}'"),
                ));
            }
        }
        return Ok((DEFAULT_SHEET.to_string(), load_csv(path)?));
    }

    let text = fs::read_to_string(path).map_err(|e| transform_err(path, e))?;
    let value: Value = serde_json::from_str(&text).map_err(|e| transform_err(path, e))?;
    match value {
        Value::Array(records) => {
            if let Some(name) = sheet {
                if name != DEFAULT_SHEET {
                    return Err(transform_err(path, format!("no sheet named '{name}'")));
                }
            }
            Ok((DEFAULT_SHEET.to_string(), records_to_table(&records)))
        }
        Value::Object(map) => {
            let (name, records) = match sheet {
                Some(name) => {
                    let records = map.get(name).ok_or_else(|| {
                        transform_err(path, format!("no sheet named '{name}'"))
                    })?;
                    (name.to_string(), records)
                }
                None => map
                    .iter()
                    .next()
                    .map(|(k, v)| (k.clone(), v))
                    .ok_or_else(|| transform_err(path, "workbook has no sheets"))?,
            };
            let records = records.as_array().ok_or_else(|| {
                transform_err(path, format!("sheet '{name}' is not an array of records"))
            })?;
            Ok((name, records_to_table(records)))
        }
        _ => Err(transform_err(
            path,
            "expected a workbook object or an array of records",
        )),
    }
}

fn load_csv(path: &Path) -> Result<Table, AppError> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_path(path)
        .map_err(|e| transform_err(path, e))?;
    let columns: Vec<String> = reader
        .headers()
        .map_err(|e| transform_err(path, e))?
        .iter()
        .map(ToString::to_string)
        .collect();
    let mut table = Table::new(columns);
    for record in reader.records() {
        let record = record.map_err(|e| transform_err(path, e))?;
        table.push_row(record.iter().map(Cell::parse).collect());
    }
    Ok(table)
}

fn records_to_table(records: &[Value]) -> Table {
    // Column order is first-seen key order across all records.
    let mut columns: Vec<String> = Vec::new();
    for record in records {
        if let Value::Object(map) = record {
            for key in map.keys() {
                if !columns.contains(key) {
                    columns.push(key.clone());
                }
            }
        }
    }
    let mut table = Table::new(columns.clone());
    for record in records {
        if let Value::Object(map) = record {
            table.push_row(
                columns
                    .iter()
                    .map(|c| map.get(c).map_or(Cell::Null, Cell::from_json))
                    .collect(),
            );
        }
    }
    table
}

// ── Export ──────────────────────────────────────────────────────

/// Write `table` to `path` in the given format, creating parent directories.
/// Returns the path written.
pub fn export(
    table: &Table,
    path: &Path,
    format: crate::registry::params::ExportFormat,
) -> Result<PathBuf, AppError> {
    use crate::registry::params::ExportFormat;

    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent).map_err(|e| AppError::ArtifactWrite {
                message: format!("{}: {e}", parent.display()),
            })?;
        }
    }

    match format {
        ExportFormat::Csv => {
            let mut writer = csv::WriterBuilder::new()
                .from_path(path)
                .map_err(|e| AppError::ArtifactWrite {
                    message: format!("{}: {e}", path.display()),
                })?;
            writer
                .write_record(table.columns())
                .map_err(|e| AppError::ArtifactWrite {
                    message: e.to_string(),
                })?;
            for row in table.rows() {
                let fields: Vec<String> = row.iter().map(ToString::to_string).collect();
                writer
                    .write_record(&fields)
                    .map_err(|e| AppError::ArtifactWrite {
                        message: e.to_string(),
                    })?;
            }
            writer.flush().map_err(|e| AppError::ArtifactWrite {
                message: e.to_string(),
            })?;
        }
        ExportFormat::Jsonl => {
            let mut out = String::new();
            for record in table_records(table) {
                out.push_str(&record.to_string());
                out.push('\n');
            }
            fs::write(path, out).map_err(|e| AppError::ArtifactWrite {
                message: format!("{}: {e}", path.display()),
            })?;
        }
        ExportFormat::Workbook => {
            let records: Vec<Value> = table_records(table);
            let workbook = serde_json::json!({ DEFAULT_SHEET: records });
            let text =
                serde_json::to_string_pretty(&workbook).map_err(|e| AppError::ArtifactWrite {
                    message: e.to_string(),
                })?;
            fs::write(path, text).map_err(|e| AppError::ArtifactWrite {
                message: format!("{}: {e}", path.display()),
            })?;
        }
    }
    Ok(path.to_path_buf())
}

fn table_records(table: &Table) -> Vec<Value> {
    table
        .rows()
        .iter()
        .map(|row| {
            let mut record = serde_json::Map::new();
            for (i, name) in table.columns().iter().enumerate() {
                record.insert(
                    name.clone(),
                    row.get(i).map_or(Value::Null, Cell::to_json),
                );
            }
            Value::Object(record)
        })
        .collect()
}
