//! Per-file table sessions and the single-session operation handlers.
//!
//! Every handler follows the same contract: require an active table, validate
//! referenced columns and enum arguments, then either replace the active
//! table wholesale or leave it untouched. A handler that fails never leaves
//! the session half-modified.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use chrono::Datelike;

use crate::error::AppError;
use crate::plot;
use crate::registry::params::{
    AddColumnParams, AddLaggedColumnParams, CleanOp, CleanTextParams, CompareValuesParams,
    ConvertColumnParams, ConvertType, DatePart, DedupeRowsParams, DescribeStatsParams,
    DropItemsParams, DropTarget, ExportTableParams, ExtractDatePartParams, ExtractPatternParams,
    FillMissingParams, FillStrategy, FilterRowsParams, GroupAggregateParams, PivotTableParams,
    PlotTableParams, PreviewRowsParams, RenameColumnParams, ScalarAggregateParams,
    SelectColumnsParams, SortRowsParams, SplitColumnParams,
};
use crate::registry::validation::{ensure_columns, ensure_not_empty, ensure_positive};
use crate::registry::OpOutput;
use crate::table::expr::{Formula, Predicate};
use crate::table::io;
use crate::table::{aggregate_cells, Aggregation, Cell, RowKey, Table};

// ── Session ─────────────────────────────────────────────────────

/// Owns one input file's identity and its current working table. The table
/// is absent until a load establishes it.
#[derive(Debug)]
pub struct TableSession {
    source: PathBuf,
    active_sheet: Option<String>,
    table: Option<Table>,
}

impl TableSession {
    pub fn new(source: impl Into<PathBuf>) -> Self {
        Self {
            source: source.into(),
            active_sheet: None,
            table: None,
        }
    }

    pub fn source(&self) -> &Path {
        &self.source
    }

    pub fn active_sheet(&self) -> Option<&str> {
        self.active_sheet.as_deref()
    }

    pub fn table(&self) -> Option<&Table> {
        self.table.as_ref()
    }

    pub fn require_table(&self) -> Result<&Table, AppError> {
        self.table.as_ref().ok_or(AppError::NoActiveTable)
    }

    /// Load a sheet from this session's source file and make it the active
    /// table. Returns the resolved sheet name.
    pub fn activate(&mut self, sheet: Option<&str>) -> Result<String, AppError> {
        let (name, table) = io::load_sheet(&self.source, sheet)?;
        self.active_sheet = Some(name.clone());
        self.table = Some(table);
        Ok(name)
    }

    /// Replace the active table in place (same sheet identity).
    pub fn replace(&mut self, table: Table) {
        self.table = Some(table);
    }

    /// Replace both the sheet identity and the table. Used by cross-session
    /// operations that materialize a combined result into this session.
    pub fn adopt(&mut self, sheet: String, table: Table) {
        self.active_sheet = Some(sheet);
        self.table = Some(table);
    }
}

// ── Shared helpers ──────────────────────────────────────────────

/// Replace the values of an existing column, or append a new one.
fn with_column(table: &Table, name: &str, values: Vec<Cell>) -> Table {
    match table.column_index(name) {
        Some(idx) => {
            let mut out = Table::new(table.columns().to_vec());
            for (row, value) in table.rows().iter().zip(values) {
                let mut cells = row.clone();
                if let Some(slot) = cells.get_mut(idx) {
                    *slot = value;
                }
                out.push_row(cells);
            }
            out
        }
        None => {
            let mut columns = table.columns().to_vec();
            columns.push(name.to_string());
            let mut out = Table::new(columns);
            for (row, value) in table.rows().iter().zip(values) {
                let mut cells = row.clone();
                cells.push(value);
                out.push_row(cells);
            }
            out
        }
    }
}

/// Cell rendered as text the way string-typed column operations see it.
/// Null stays missing rather than becoming the string "null".
fn cell_text(cell: &Cell) -> Option<String> {
    if cell.is_null() {
        None
    } else {
        Some(cell.to_string())
    }
}

fn parse_date(text: &str) -> Option<chrono::NaiveDate> {
    let trimmed = text.trim();
    for format in ["%Y-%m-%d", "%Y/%m/%d", "%m/%d/%Y", "%d-%m-%Y"] {
        if let Ok(date) = chrono::NaiveDate::parse_from_str(trimmed, format) {
            return Some(date);
        }
    }
    for format in ["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S"] {
        if let Ok(dt) = chrono::NaiveDateTime::parse_from_str(trimmed, format) {
            return Some(dt.date());
        }
    }
    None
}

/// Aggregate one column to a scalar, optionally over an ephemeral filtered
/// subset. Reads the table only; the caller's active table is never touched.
fn scalar_over(
    table: &Table,
    column: &str,
    agg: Aggregation,
    filter: Option<&str>,
) -> Result<f64, AppError> {
    ensure_columns(table, &[column])?;
    let col = table
        .column_index(column)
        .ok_or_else(|| AppError::UnknownColumn {
            columns: vec![column.to_string()],
        })?;

    let cells: Vec<&Cell> = match filter {
        Some(query) => {
            let bound = Predicate::parse(query)?.bind(table)?;
            let mut kept = Vec::new();
            for row in table.rows() {
                if bound.eval_row(row)? {
                    if let Some(cell) = row.get(col) {
                        kept.push(cell);
                    }
                }
            }
            kept
        }
        None => table.column_cells(col),
    };

    if cells.is_empty() && agg == Aggregation::Count {
        return Ok(0.0);
    }
    aggregate_cells(&cells, agg)
}

// ── Handlers ────────────────────────────────────────────────────

pub fn filter_rows(session: &mut TableSession, p: FilterRowsParams) -> Result<OpOutput, AppError> {
    let table = session.require_table()?;
    let bound = Predicate::parse(&p.query)?.bind(table)?;
    let total = table.len();
    let mut out = Table::new(table.columns().to_vec());
    for row in table.rows() {
        if bound.eval_row(row)? {
            out.push_row(row.clone());
        }
    }
    let message = format!(
        "Filtered to {} of {total} rows with query '{}'",
        out.len(),
        p.query
    );
    session.replace(out.clone());
    Ok(OpOutput::table(message, out))
}

pub fn group_aggregate(
    session: &mut TableSession,
    p: GroupAggregateParams,
) -> Result<OpOutput, AppError> {
    let table = session.require_table()?;
    ensure_not_empty(&p.group_by, "group_by")?;
    ensure_columns(table, &p.group_by)?;
    ensure_columns(table, &[p.target_column.as_str()])?;

    let group_idx: Vec<usize> = p
        .group_by
        .iter()
        .filter_map(|c| table.column_index(c))
        .collect();
    let target = table
        .column_index(&p.target_column)
        .ok_or_else(|| AppError::UnknownColumn {
            columns: vec![p.target_column.clone()],
        })?;

    let out = table.group_aggregate(&group_idx, target, p.aggregation)?;
    let message = format!(
        "Grouped by {:?}, '{}' aggregated by '{}'. Result column: '{}'",
        p.group_by,
        p.target_column,
        p.aggregation.slug(),
        p.aggregation.result_column(&p.target_column)
    );
    session.replace(out.clone());
    Ok(OpOutput::table(message, out))
}

pub fn sort_rows(session: &mut TableSession, p: SortRowsParams) -> Result<OpOutput, AppError> {
    let table = session.require_table()?;
    ensure_not_empty(&p.by, "by")?;
    ensure_columns(table, &p.by)?;
    let indices: Vec<usize> = p.by.iter().filter_map(|c| table.column_index(c)).collect();
    let out = table.sorted(&indices, p.ascending);
    let message = format!(
        "Sorted by {:?} ({})",
        p.by,
        if p.ascending { "ascending" } else { "descending" }
    );
    session.replace(out.clone());
    Ok(OpOutput::table(message, out))
}

pub fn select_columns(
    session: &mut TableSession,
    p: SelectColumnsParams,
) -> Result<OpOutput, AppError> {
    let table = session.require_table()?;
    ensure_not_empty(&p.columns, "columns")?;
    ensure_columns(table, &p.columns)?;
    let indices: Vec<usize> = p
        .columns
        .iter()
        .filter_map(|c| table.column_index(c))
        .collect();
    let mut out = Table::new(p.columns.clone());
    for row in table.rows() {
        out.push_row(
            indices
                .iter()
                .map(|&i| row.get(i).cloned().unwrap_or(Cell::Null))
                .collect(),
        );
    }
    let message = format!("Kept columns {:?}", p.columns);
    session.replace(out.clone());
    Ok(OpOutput::table(message, out))
}

pub fn add_column(session: &mut TableSession, p: AddColumnParams) -> Result<OpOutput, AppError> {
    let table = session.require_table()?;
    let formula = Formula::compile(&p.formula, table)?;
    let mut values = Vec::with_capacity(table.len());
    for row in table.rows() {
        values.push(formula.eval_row(row)?);
    }
    let out = with_column(table, &p.name, values);
    let message = format!("Column '{}' computed from formula '{}'", p.name, p.formula);
    session.replace(out.clone());
    Ok(OpOutput::table(message, out))
}

pub fn rename_column(
    session: &mut TableSession,
    p: RenameColumnParams,
) -> Result<OpOutput, AppError> {
    let table = session.require_table()?;
    ensure_columns(table, &[p.old_name.as_str()])?;
    let columns: Vec<String> = table
        .columns()
        .iter()
        .map(|c| {
            if c == &p.old_name {
                p.new_name.clone()
            } else {
                c.clone()
            }
        })
        .collect();
    let mut out = Table::new(columns);
    for row in table.rows() {
        out.push_row(row.clone());
    }
    let message = format!("Column '{}' renamed to '{}'", p.old_name, p.new_name);
    session.replace(out.clone());
    Ok(OpOutput::table(message, out))
}

pub fn drop_items(session: &mut TableSession, p: DropItemsParams) -> Result<OpOutput, AppError> {
    let table = session.require_table()?;
    ensure_not_empty(&p.identifiers, "identifiers")?;
    match p.target {
        DropTarget::Rows => {
            let mut indices = Vec::with_capacity(p.identifiers.len());
            for value in &p.identifiers {
                let idx = value
                    .as_u64()
                    .or_else(|| value.as_f64().filter(|f| f.fract() == 0.0).map(|f| f as u64))
                    .ok_or_else(|| AppError::InvalidArgument {
                        message: format!("Row identifier must be a non-negative index, got {value}"),
                    })?;
                indices.push(idx as usize);
            }
            let mut out = Table::new(table.columns().to_vec());
            for (i, row) in table.rows().iter().enumerate() {
                if !indices.contains(&i) {
                    out.push_row(row.clone());
                }
            }
            let removed = table.len() - out.len();
            let message = format!("{removed} rows deleted");
            session.replace(out.clone());
            Ok(OpOutput::table(message, out))
        }
        DropTarget::Columns => {
            let names: Vec<String> = p
                .identifiers
                .iter()
                .map(|v| {
                    v.as_str()
                        .map(ToString::to_string)
                        .ok_or_else(|| AppError::InvalidArgument {
                            message: format!("Column identifier must be a name, got {v}"),
                        })
                })
                .collect::<Result<_, _>>()?;
            ensure_columns(table, &names)?;
            let keep: Vec<usize> = table
                .columns()
                .iter()
                .enumerate()
                .filter(|(_, c)| !names.contains(c))
                .map(|(i, _)| i)
                .collect();
            let columns: Vec<String> = keep
                .iter()
                .filter_map(|&i| table.columns().get(i).cloned())
                .collect();
            let mut out = Table::new(columns);
            for row in table.rows() {
                out.push_row(
                    keep.iter()
                        .map(|&i| row.get(i).cloned().unwrap_or(Cell::Null))
                        .collect(),
                );
            }
            let message = format!("Columns {names:?} deleted");
            session.replace(out.clone());
            Ok(OpOutput::table(message, out))
        }
    }
}

pub fn dedupe_rows(session: &mut TableSession, p: DedupeRowsParams) -> Result<OpOutput, AppError> {
    let table = session.require_table()?;
    let subset_idx = match &p.subset {
        Some(subset) => {
            ensure_not_empty(subset, "subset")?;
            ensure_columns(table, subset)?;
            Some(
                subset
                    .iter()
                    .filter_map(|c| table.column_index(c))
                    .collect::<Vec<_>>(),
            )
        }
        None => None,
    };
    let out = table.deduped(subset_idx.as_deref());
    let removed = table.len() - out.len();
    let message = match &p.subset {
        Some(subset) => format!("{removed} duplicate rows removed based on columns {subset:?}"),
        None => format!("{removed} duplicate rows removed"),
    };
    session.replace(out.clone());
    Ok(OpOutput::table(message, out))
}

pub fn fill_missing(
    session: &mut TableSession,
    p: FillMissingParams,
) -> Result<OpOutput, AppError> {
    let table = session.require_table()?;
    ensure_columns(table, &[p.column.as_str()])?;
    let col = table
        .column_index(&p.column)
        .ok_or_else(|| AppError::UnknownColumn {
            columns: vec![p.column.clone()],
        })?;

    let cells = table.column_cells(col);
    let missing = cells.iter().filter(|c| c.is_null()).count();
    if missing == 0 {
        return Ok(OpOutput::table(
            format!("No missing values found in '{}'", p.column),
            table.clone(),
        ));
    }

    let numeric_fill = |agg: Aggregation| -> Result<Cell, AppError> {
        let value = aggregate_cells(&cells, agg).map_err(|_| AppError::Transform {
            message: format!("Cannot fill with {}: column '{}' is not numeric", agg.slug(), p.column),
        })?;
        Ok(Cell::Number(value))
    };

    let values: Vec<Cell> = match p.strategy {
        FillStrategy::Value => {
            let fill = p.fill_value.as_ref().ok_or_else(|| AppError::InvalidArgument {
                message: "The 'value' strategy requires a fill_value".to_string(),
            })?;
            let fill = Cell::from_json(fill);
            cells
                .iter()
                .map(|c| if c.is_null() { fill.clone() } else { (*c).clone() })
                .collect()
        }
        FillStrategy::Mean => {
            let fill = numeric_fill(Aggregation::Mean)?;
            cells
                .iter()
                .map(|c| if c.is_null() { fill.clone() } else { (*c).clone() })
                .collect()
        }
        FillStrategy::Median => {
            let mut numbers: Vec<f64> = cells.iter().filter_map(|c| c.as_number()).collect();
            if numbers.is_empty() {
                return Err(AppError::Transform {
                    message: format!("Cannot fill with median: column '{}' is not numeric", p.column),
                });
            }
            numbers.sort_by(f64::total_cmp);
            let mid = numbers.len() / 2;
            let median = if numbers.len() % 2 == 0 {
                (numbers.get(mid - 1).copied().unwrap_or(0.0)
                    + numbers.get(mid).copied().unwrap_or(0.0))
                    / 2.0
            } else {
                numbers.get(mid).copied().unwrap_or(0.0)
            };
            let fill = Cell::Number(median);
            cells
                .iter()
                .map(|c| if c.is_null() { fill.clone() } else { (*c).clone() })
                .collect()
        }
        FillStrategy::Ffill => {
            let mut last: Option<Cell> = None;
            cells
                .iter()
                .map(|c| {
                    if c.is_null() {
                        last.clone().unwrap_or(Cell::Null)
                    } else {
                        last = Some((*c).clone());
                        (*c).clone()
                    }
                })
                .collect()
        }
        FillStrategy::Bfill => {
            let mut next: Option<Cell> = None;
            let mut reversed: Vec<Cell> = cells
                .iter()
                .rev()
                .map(|c| {
                    if c.is_null() {
                        next.clone().unwrap_or(Cell::Null)
                    } else {
                        next = Some((*c).clone());
                        (*c).clone()
                    }
                })
                .collect();
            reversed.reverse();
            reversed
        }
    };

    let out = with_column(table, &p.column, values);
    let message = format!(
        "Filled {missing} missing values in '{}' using strategy '{:?}'",
        p.column, p.strategy
    );
    session.replace(out.clone());
    Ok(OpOutput::table(message, out))
}

pub fn convert_column(
    session: &mut TableSession,
    p: ConvertColumnParams,
) -> Result<OpOutput, AppError> {
    let table = session.require_table()?;
    ensure_columns(table, &[p.column.as_str()])?;
    let col = table
        .column_index(&p.column)
        .ok_or_else(|| AppError::UnknownColumn {
            columns: vec![p.column.clone()],
        })?;

    let mut coerced = 0usize;
    let values: Vec<Cell> = table
        .column_cells(col)
        .into_iter()
        .map(|cell| match p.target_type {
            ConvertType::Numeric => match cell {
                Cell::Number(n) => Cell::Number(*n),
                Cell::Bool(b) => Cell::Number(if *b { 1.0 } else { 0.0 }),
                Cell::Text(s) => match s.trim().parse::<f64>() {
                    Ok(n) => Cell::Number(n),
                    Err(_) => {
                        coerced += 1;
                        Cell::Null
                    }
                },
                Cell::Null => Cell::Null,
            },
            ConvertType::Datetime => match cell_text(cell) {
                Some(text) => match parse_date(&text) {
                    Some(date) => Cell::Text(date.format("%Y-%m-%d").to_string()),
                    None => {
                        coerced += 1;
                        Cell::Null
                    }
                },
                None => Cell::Null,
            },
            ConvertType::Text => match cell_text(cell) {
                Some(text) => Cell::Text(text),
                None => Cell::Null,
            },
        })
        .collect();

    let out = with_column(table, &p.column, values);
    let mut message = format!("Column '{}' converted to {:?}", p.column, p.target_type);
    if coerced > 0 {
        message.push_str(&format!(" ({coerced} values could not be converted and became missing)"));
    }
    session.replace(out.clone());
    Ok(OpOutput::table(message, out))
}

pub fn split_column(
    session: &mut TableSession,
    p: SplitColumnParams,
) -> Result<OpOutput, AppError> {
    let table = session.require_table()?;
    ensure_columns(table, &[p.column.as_str()])?;
    ensure_not_empty(&p.new_columns, "new_columns")?;
    if p.delimiter.is_empty() {
        return Err(AppError::InvalidArgument {
            message: "delimiter must not be empty".to_string(),
        });
    }
    let col = table
        .column_index(&p.column)
        .ok_or_else(|| AppError::UnknownColumn {
            columns: vec![p.column.clone()],
        })?;

    let parts_per_row: Vec<Vec<Option<String>>> = table
        .column_cells(col)
        .into_iter()
        .map(|cell| match cell_text(cell) {
            Some(text) => text
                .split(&p.delimiter)
                .map(|s| Some(s.to_string()))
                .collect(),
            None => Vec::new(),
        })
        .collect();

    let mut out = table.clone();
    for (i, name) in p.new_columns.iter().enumerate() {
        let values: Vec<Cell> = parts_per_row
            .iter()
            .map(|parts| match parts.get(i) {
                Some(Some(s)) => Cell::Text(s.clone()),
                _ => Cell::Null,
            })
            .collect();
        out = with_column(&out, name, values);
    }
    let message = format!(
        "Column '{}' split by '{}' into {:?}",
        p.column, p.delimiter, p.new_columns
    );
    session.replace(out.clone());
    Ok(OpOutput::table(message, out))
}

pub fn extract_pattern(
    session: &mut TableSession,
    p: ExtractPatternParams,
) -> Result<OpOutput, AppError> {
    let table = session.require_table()?;
    ensure_columns(table, &[p.column.as_str()])?;
    let re = regex::Regex::new(&p.pattern).map_err(|e| AppError::InvalidArgument {
        message: format!("Invalid regex pattern '{}': {e}", p.pattern),
    })?;
    if p.group_index >= re.captures_len() {
        return Err(AppError::InvalidArgument {
            message: format!(
                "Pattern '{}' has no capture group {}",
                p.pattern, p.group_index
            ),
        });
    }
    let col = table
        .column_index(&p.column)
        .ok_or_else(|| AppError::UnknownColumn {
            columns: vec![p.column.clone()],
        })?;

    let values: Vec<Cell> = table
        .column_cells(col)
        .into_iter()
        .map(|cell| match cell_text(cell) {
            Some(text) => re
                .captures(&text)
                .and_then(|caps| caps.get(p.group_index))
                .map_or(Cell::Null, |m| Cell::Text(m.as_str().to_string())),
            None => Cell::Null,
        })
        .collect();

    let out = with_column(table, &p.new_column, values);
    let message = format!(
        "Pattern '{}' extracted from '{}' into '{}'",
        p.pattern, p.column, p.new_column
    );
    session.replace(out.clone());
    Ok(OpOutput::table(message, out))
}

pub fn clean_text(session: &mut TableSession, p: CleanTextParams) -> Result<OpOutput, AppError> {
    let table = session.require_table()?;
    ensure_columns(table, &[p.column.as_str()])?;
    ensure_not_empty(&p.operations, "operations")?;
    let col = table
        .column_index(&p.column)
        .ok_or_else(|| AppError::UnknownColumn {
            columns: vec![p.column.clone()],
        })?;

    let values: Vec<Cell> = table
        .column_cells(col)
        .into_iter()
        .map(|cell| match cell_text(cell) {
            Some(mut text) => {
                for op in &p.operations {
                    text = match op {
                        CleanOp::Strip => text.trim().to_string(),
                        CleanOp::Lower => text.to_lowercase(),
                        CleanOp::Upper => text.to_uppercase(),
                        CleanOp::RemoveDigits => {
                            text.chars().filter(|c| !c.is_ascii_digit()).collect()
                        }
                        CleanOp::RemovePunctuation => text
                            .chars()
                            .filter(|c| c.is_alphanumeric() || c.is_whitespace() || *c == '_')
                            .collect(),
                    };
                }
                Cell::Text(text)
            }
            None => Cell::Null,
        })
        .collect();

    let out = with_column(table, &p.column, values);
    let message = format!(
        "Column '{}' cleaned with operations {:?}",
        p.column, p.operations
    );
    session.replace(out.clone());
    Ok(OpOutput::table(message, out))
}

pub fn extract_date_part(
    session: &mut TableSession,
    p: ExtractDatePartParams,
) -> Result<OpOutput, AppError> {
    let table = session.require_table()?;
    ensure_columns(table, &[p.date_column.as_str()])?;
    let col = table
        .column_index(&p.date_column)
        .ok_or_else(|| AppError::UnknownColumn {
            columns: vec![p.date_column.clone()],
        })?;

    let dates: Vec<Option<chrono::NaiveDate>> = table
        .column_cells(col)
        .into_iter()
        .map(|cell| cell_text(cell).and_then(|t| parse_date(&t)))
        .collect();
    if !table.is_empty() && dates.iter().all(Option::is_none) {
        return Err(AppError::Transform {
            message: format!(
                "Column '{}' could not be interpreted as dates",
                p.date_column
            ),
        });
    }

    let values: Vec<Cell> = dates
        .into_iter()
        .map(|date| match date {
            Some(d) => {
                let part = match p.part {
                    DatePart::Year => f64::from(d.year()),
                    DatePart::Month => f64::from(d.month()),
                    DatePart::Day => f64::from(d.day()),
                    DatePart::Quarter => f64::from((d.month() - 1) / 3 + 1),
                };
                Cell::Number(part)
            }
            None => Cell::Null,
        })
        .collect();

    let out = with_column(table, &p.new_column, values);
    let message = format!(
        "Extracted '{}' from '{}' into '{}'",
        p.part.slug(),
        p.date_column,
        p.new_column
    );
    session.replace(out.clone());
    Ok(OpOutput::table(message, out))
}

pub fn add_lagged_column(
    session: &mut TableSession,
    p: AddLaggedColumnParams,
) -> Result<OpOutput, AppError> {
    let table = session.require_table()?;
    ensure_columns(table, &[p.column.as_str()])?;
    if let Some(group) = &p.group_by {
        ensure_columns(table, group)?;
    }
    let col = table
        .column_index(&p.column)
        .ok_or_else(|| AppError::UnknownColumn {
            columns: vec![p.column.clone()],
        })?;
    let group_idx: Vec<usize> = p
        .group_by
        .iter()
        .flatten()
        .filter_map(|c| table.column_index(c))
        .collect();

    // Row indices per group, in table order. No group columns = one group.
    let mut groups: BTreeMap<RowKey, Vec<usize>> = BTreeMap::new();
    for (i, row) in table.rows().iter().enumerate() {
        let key = RowKey(
            group_idx
                .iter()
                .map(|&g| row.get(g).cloned().unwrap_or(Cell::Null))
                .collect(),
        );
        groups.entry(key).or_default().push(i);
    }

    let mut values = vec![Cell::Null; table.len()];
    for indices in groups.values() {
        for (pos, &row_idx) in indices.iter().enumerate() {
            let src_pos = pos as i64 - p.periods;
            if src_pos >= 0 {
                if let Some(&src_row) = indices.get(src_pos as usize) {
                    if let (Some(slot), Some(cell)) =
                        (values.get_mut(row_idx), table.cell(src_row, col))
                    {
                        *slot = cell.clone();
                    }
                }
            }
        }
    }

    let out = with_column(table, &p.new_column, values);
    let message = match &p.group_by {
        Some(group) => format!(
            "Lagged column '{}' added for '{}' (periods={}, grouped by {:?})",
            p.new_column, p.column, p.periods, group
        ),
        None => format!(
            "Lagged column '{}' added for '{}' (periods={})",
            p.new_column, p.column, p.periods
        ),
    };
    session.replace(out.clone());
    Ok(OpOutput::table(message, out))
}

pub fn pivot_table(session: &mut TableSession, p: PivotTableParams) -> Result<OpOutput, AppError> {
    let table = session.require_table()?;
    ensure_columns(
        table,
        &[
            p.index_column.as_str(),
            p.columns_column.as_str(),
            p.values_column.as_str(),
        ],
    )?;
    let index = table.column_index(&p.index_column).unwrap_or_default();
    let columns = table.column_index(&p.columns_column).unwrap_or_default();
    let values = table.column_index(&p.values_column).unwrap_or_default();
    let out = table.pivot(index, columns, values, p.aggregation)?;
    let message = format!(
        "Pivoted with index '{}', columns from '{}', values '{}' aggregated by '{}'",
        p.index_column,
        p.columns_column,
        p.values_column,
        p.aggregation.slug()
    );
    session.replace(out.clone());
    Ok(OpOutput::table(message, out))
}

pub fn preview_rows(
    session: &mut TableSession,
    p: PreviewRowsParams,
) -> Result<OpOutput, AppError> {
    let table = session.require_table()?;
    ensure_positive(p.num_rows, "num_rows")?;
    let preview = table.slice(p.num_rows, p.from_end);
    let message = if p.from_end {
        format!("Last {} of {} rows", preview.len(), table.len())
    } else {
        format!("First {} of {} rows", preview.len(), table.len())
    };
    Ok(OpOutput::table(message, preview))
}

pub fn describe_stats(
    session: &mut TableSession,
    _p: DescribeStatsParams,
) -> Result<OpOutput, AppError> {
    let table = session.require_table()?;
    let numeric: Vec<usize> = (0..table.columns().len())
        .filter(|&i| {
            table
                .column_cells(i)
                .iter()
                .any(|c| c.as_number().is_some())
        })
        .collect();
    if numeric.is_empty() {
        return Err(AppError::Transform {
            message: "The active table has no numeric columns to describe".to_string(),
        });
    }

    let mut columns = vec!["Statistic".to_string()];
    for &i in &numeric {
        if let Some(name) = table.columns().get(i) {
            columns.push(name.clone());
        }
    }
    let mut out = Table::new(columns);
    let stats = [
        ("count", Aggregation::Count),
        ("mean", Aggregation::Mean),
        ("std", Aggregation::Std),
        ("min", Aggregation::Min),
        ("max", Aggregation::Max),
    ];
    for (label, agg) in stats {
        let mut row = vec![Cell::Text(label.to_string())];
        for &i in &numeric {
            let cells = table.column_cells(i);
            row.push(
                aggregate_cells(&cells, agg)
                    .map(Cell::Number)
                    .unwrap_or(Cell::Null),
            );
        }
        out.push_row(row);
    }
    Ok(OpOutput::table(
        format!("Summary statistics for {} numeric columns", numeric.len()),
        out,
    ))
}

pub fn scalar_aggregate(
    session: &mut TableSession,
    p: ScalarAggregateParams,
) -> Result<OpOutput, AppError> {
    let table = session.require_table()?;
    let value = scalar_over(table, &p.column, p.aggregation, p.filter.as_deref())?;
    let message = match &p.filter {
        Some(filter) => format!(
            "Calculated {} of '{}' (filtered by '{}'): {}",
            p.aggregation.slug(),
            p.column,
            filter,
            Cell::Number(value)
        ),
        None => format!(
            "Calculated {} of '{}': {}",
            p.aggregation.slug(),
            p.column,
            Cell::Number(value)
        ),
    };
    Ok(OpOutput::scalar(message, value))
}

pub fn compare_values(
    session: &mut TableSession,
    p: CompareValuesParams,
) -> Result<OpOutput, AppError> {
    let table = session.require_table()?;
    ensure_not_empty(&p.comparisons, "comparisons")?;

    let mut out = Table::new(vec!["Comparison".to_string(), "Value".to_string()]);
    let mut skipped = Vec::new();
    for spec in &p.comparisons {
        match scalar_over(table, &spec.column, spec.aggregation, spec.filter.as_deref()) {
            Ok(value) => out.push_row(vec![
                Cell::Text(spec.label.clone()),
                Cell::Number(value),
            ]),
            Err(e) => skipped.push(format!("'{}' ({e})", spec.label)),
        }
    }
    if out.is_empty() {
        return Err(AppError::Transform {
            message: format!(
                "No comparisons could be calculated: {}",
                skipped.join("; ")
            ),
        });
    }
    let mut message = format!("Calculated {} comparison values", out.len());
    if !skipped.is_empty() {
        message.push_str(&format!("; skipped {}", skipped.join("; ")));
    }
    Ok(OpOutput::table(message, out))
}

pub fn plot_table(session: &mut TableSession, p: PlotTableParams) -> Result<OpOutput, AppError> {
    let table = session.require_table()?;
    let path = plot::render(table, &p)?;
    Ok(OpOutput::artifact(
        format!("{} plot saved to '{}'", p.plot_kind.slug(), path.display()),
        path,
    ))
}

pub fn export_table(
    session: &mut TableSession,
    p: ExportTableParams,
) -> Result<OpOutput, AppError> {
    let table = session.require_table()?;
    let path = io::export(table, Path::new(&p.output_path), p.format)?;
    Ok(OpOutput::artifact(
        format!("Table exported to '{}' as {}", path.display(), p.format.slug()),
        path,
    ))
}
