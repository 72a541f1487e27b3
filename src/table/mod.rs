//! The in-memory table model: ordered columns, rows of nullable typed cells,
//! and the transforms that need whole-table context (grouping, joins,
//! stacking, pivoting). Session-level operations build on these primitives.

pub mod expr;
pub mod io;

use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::error::AppError;

// ── Cells ───────────────────────────────────────────────────────

/// A single table cell. `Null` models a missing value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Cell {
    Null,
    Bool(bool),
    Number(f64),
    Text(String),
}

impl Cell {
    pub fn is_null(&self) -> bool {
        matches!(self, Cell::Null)
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            Cell::Number(n) => Some(*n),
            _ => None,
        }
    }

    /// Parse a raw text field (CSV cell) into the most specific cell type.
    pub fn parse(raw: &str) -> Cell {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Cell::Null;
        }
        if let Ok(n) = trimmed.parse::<f64>() {
            return Cell::Number(n);
        }
        match trimmed {
            "true" | "True" | "TRUE" => Cell::Bool(true),
            "false" | "False" | "FALSE" => Cell::Bool(false),
            _ => Cell::Text(trimmed.to_string()),
        }
    }

    pub fn from_json(value: &serde_json::Value) -> Cell {
        match value {
            serde_json::Value::Null => Cell::Null,
            serde_json::Value::Bool(b) => Cell::Bool(*b),
            serde_json::Value::Number(n) => n.as_f64().map_or(Cell::Null, Cell::Number),
            serde_json::Value::String(s) => Cell::Text(s.clone()),
            other => Cell::Text(other.to_string()),
        }
    }

    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Cell::Null => serde_json::Value::Null,
            Cell::Bool(b) => serde_json::Value::Bool(*b),
            Cell::Number(n) => serde_json::Number::from_f64(*n)
                .map_or(serde_json::Value::Null, serde_json::Value::Number),
            Cell::Text(s) => serde_json::Value::String(s.clone()),
        }
    }

    /// Total ordering across cell types: Null < Bool < Number < Text.
    /// Numbers compare via `f64::total_cmp` so sorting never panics on NaN.
    pub fn total_cmp(&self, other: &Cell) -> Ordering {
        fn rank(c: &Cell) -> u8 {
            match c {
                Cell::Null => 0,
                Cell::Bool(_) => 1,
                Cell::Number(_) => 2,
                Cell::Text(_) => 3,
            }
        }
        match (self, other) {
            (Cell::Bool(a), Cell::Bool(b)) => a.cmp(b),
            (Cell::Number(a), Cell::Number(b)) => a.total_cmp(b),
            (Cell::Text(a), Cell::Text(b)) => a.cmp(b),
            _ => rank(self).cmp(&rank(other)),
        }
    }
}

impl fmt::Display for Cell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Cell::Null => write!(f, ""),
            Cell::Bool(b) => write!(f, "{b}"),
            Cell::Number(n) => {
                if n.fract() == 0.0 && n.abs() < 1e15 {
                    write!(f, "{}", *n as i64)
                } else {
                    write!(f, "{n}")
                }
            }
            Cell::Text(s) => write!(f, "{s}"),
        }
    }
}

/// Row key used for grouping, joins, and dedup. Wraps cells with the total
/// ordering so they can live in BTree collections (ascending iteration gives
/// the ascending-group-key output order for free).
#[derive(Debug, Clone)]
pub struct RowKey(pub Vec<Cell>);

impl PartialEq for RowKey {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}
impl Eq for RowKey {}
impl PartialOrd for RowKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}
impl Ord for RowKey {
    fn cmp(&self, other: &Self) -> Ordering {
        let mut it_a = self.0.iter();
        let mut it_b = other.0.iter();
        loop {
            match (it_a.next(), it_b.next()) {
                (Some(a), Some(b)) => match a.total_cmp(b) {
                    Ordering::Equal => {}
                    non_eq => return non_eq,
                },
                (None, None) => return Ordering::Equal,
                (None, Some(_)) => return Ordering::Less,
                (Some(_), None) => return Ordering::Greater,
            }
        }
    }
}

// ── Argument enums shared with the op catalog ───────────────────

/// Aggregation kind for grouping, pivoting, and scalar calculations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum Aggregation {
    Sum,
    Mean,
    Count,
    Min,
    Max,
    Std,
}

impl Aggregation {
    pub fn slug(self) -> &'static str {
        match self {
            Aggregation::Sum => "sum",
            Aggregation::Mean => "mean",
            Aggregation::Count => "count",
            Aggregation::Min => "min",
            Aggregation::Max => "max",
            Aggregation::Std => "std",
        }
    }

    /// Name of the derived column produced by group-aggregating `target`.
    /// Later plan steps reference this name by exact string, so it is part
    /// of the operation contract: `CountOfRecords` for count, otherwise
    /// `{target}_{kind}` (e.g. `Revenue_sum`).
    pub fn result_column(self, target: &str) -> String {
        match self {
            Aggregation::Count => "CountOfRecords".to_string(),
            other => format!("{target}_{}", other.slug()),
        }
    }
}

/// Join kind for merge and lookup operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum JoinKind {
    Inner,
    Left,
    Right,
    Outer,
}

impl JoinKind {
    pub fn slug(self) -> &'static str {
        match self {
            JoinKind::Inner => "inner",
            JoinKind::Left => "left",
            JoinKind::Right => "right",
            JoinKind::Outer => "outer",
        }
    }
}

/// Aggregate a slice of cells. `Count` counts non-null cells of any type;
/// the numeric kinds operate on the numeric cells only. `Std` is the sample
/// standard deviation.
pub fn aggregate_cells(cells: &[&Cell], agg: Aggregation) -> Result<f64, AppError> {
    if agg == Aggregation::Count {
        return Ok(cells.iter().filter(|c| !c.is_null()).count() as f64);
    }
    let values: Vec<f64> = cells.iter().filter_map(|c| c.as_number()).collect();
    if values.is_empty() {
        return Err(AppError::Transform {
            message: format!("No numeric values to aggregate with '{}'", agg.slug()),
        });
    }
    let n = values.len() as f64;
    let sum: f64 = values.iter().sum();
    match agg {
        Aggregation::Sum => Ok(sum),
        Aggregation::Mean => Ok(sum / n),
        Aggregation::Min => Ok(values.iter().fold(f64::INFINITY, |a, &b| a.min(b))),
        Aggregation::Max => Ok(values.iter().fold(f64::NEG_INFINITY, |a, &b| a.max(b))),
        Aggregation::Std => {
            if values.len() < 2 {
                return Err(AppError::Transform {
                    message: "Standard deviation requires at least two numeric values".to_string(),
                });
            }
            let mean = sum / n;
            let var: f64 = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (n - 1.0);
            Ok(var.sqrt())
        }
        Aggregation::Count => Ok(n),
    }
}

// ── Table ───────────────────────────────────────────────────────

/// A 2-D labeled table: ordered columns, rows of nullable typed cells.
/// Transforms return a new table rather than mutating in place, so a failed
/// operation can never leave a session half-modified.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Table {
    columns: Vec<String>,
    rows: Vec<Vec<Cell>>,
}

impl Table {
    pub fn new(columns: Vec<String>) -> Self {
        Self {
            columns,
            rows: Vec::new(),
        }
    }

    /// Push a row, padding or truncating to the column count.
    pub fn push_row(&mut self, mut row: Vec<Cell>) {
        row.resize(self.columns.len(), Cell::Null);
        self.rows.push(row);
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn rows(&self) -> &[Vec<Cell>] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }

    /// Names from `wanted` that do not exist in this table, in input order.
    pub fn missing_columns<S: AsRef<str>>(&self, wanted: &[S]) -> Vec<String> {
        wanted
            .iter()
            .map(AsRef::as_ref)
            .filter(|w| self.column_index(w).is_none())
            .map(ToString::to_string)
            .collect()
    }

    pub fn cell(&self, row: usize, col: usize) -> Option<&Cell> {
        self.rows.get(row).and_then(|r| r.get(col))
    }

    /// All cells of one column, top to bottom.
    pub fn column_cells(&self, col: usize) -> Vec<&Cell> {
        self.rows.iter().filter_map(|r| r.get(col)).collect()
    }

    /// First (or last) `n` rows as a new table.
    pub fn slice(&self, n: usize, from_end: bool) -> Table {
        let rows = if from_end {
            let start = self.rows.len().saturating_sub(n);
            self.rows.get(start..).unwrap_or_default().to_vec()
        } else {
            self.rows.iter().take(n).cloned().collect()
        };
        Table {
            columns: self.columns.clone(),
            rows,
        }
    }

    /// Stable multi-column sort; `ascending` applies to all sort columns.
    pub fn sorted(&self, by: &[usize], ascending: bool) -> Table {
        let mut rows = self.rows.clone();
        rows.sort_by(|a, b| {
            for &idx in by {
                let ca = a.get(idx).unwrap_or(&Cell::Null);
                let cb = b.get(idx).unwrap_or(&Cell::Null);
                let ord = ca.total_cmp(cb);
                if ord != Ordering::Equal {
                    return if ascending { ord } else { ord.reverse() };
                }
            }
            Ordering::Equal
        });
        Table {
            columns: self.columns.clone(),
            rows,
        }
    }

    /// Group by `group_by` columns and aggregate `target`. The output has the
    /// group columns followed by one derived column named per
    /// [`Aggregation::result_column`], with groups in ascending key order.
    pub fn group_aggregate(
        &self,
        group_by: &[usize],
        target: usize,
        agg: Aggregation,
    ) -> Result<Table, AppError> {
        let mut groups: BTreeMap<RowKey, Vec<&Cell>> = BTreeMap::new();
        for row in &self.rows {
            let key = RowKey(
                group_by
                    .iter()
                    .map(|&i| row.get(i).cloned().unwrap_or(Cell::Null))
                    .collect(),
            );
            groups
                .entry(key)
                .or_default()
                .push(row.get(target).unwrap_or(&Cell::Null));
        }

        let target_name = self
            .columns
            .get(target)
            .cloned()
            .unwrap_or_else(|| "value".to_string());
        let mut columns: Vec<String> = group_by
            .iter()
            .filter_map(|&i| self.columns.get(i).cloned())
            .collect();
        columns.push(agg.result_column(&target_name));

        let mut out = Table::new(columns);
        for (key, cells) in groups {
            let value = aggregate_cells(&cells, agg)?;
            let mut row = key.0;
            row.push(Cell::Number(value));
            out.push_row(row);
        }
        Ok(out)
    }

    /// Pivot: one row per distinct index value (ascending), one column per
    /// distinct column value (ascending), cells aggregated from `values`.
    pub fn pivot(
        &self,
        index: usize,
        columns: usize,
        values: usize,
        agg: Aggregation,
    ) -> Result<Table, AppError> {
        let mut buckets: BTreeMap<RowKey, BTreeMap<RowKey, Vec<&Cell>>> = BTreeMap::new();
        let mut col_keys: BTreeSet<RowKey> = BTreeSet::new();
        for row in &self.rows {
            let idx_key = RowKey(vec![row.get(index).cloned().unwrap_or(Cell::Null)]);
            let col_key = RowKey(vec![row.get(columns).cloned().unwrap_or(Cell::Null)]);
            col_keys.insert(col_key.clone());
            buckets
                .entry(idx_key)
                .or_default()
                .entry(col_key)
                .or_default()
                .push(row.get(values).unwrap_or(&Cell::Null));
        }

        let index_name = self
            .columns
            .get(index)
            .cloned()
            .unwrap_or_else(|| "index".to_string());
        let mut out_columns = vec![index_name];
        for key in &col_keys {
            let label = key.0.first().map(ToString::to_string).unwrap_or_default();
            out_columns.push(label);
        }

        let mut out = Table::new(out_columns);
        for (idx_key, by_col) in buckets {
            let mut row: Vec<Cell> = Vec::with_capacity(col_keys.len() + 1);
            row.extend(idx_key.0);
            for col_key in &col_keys {
                match by_col.get(col_key) {
                    Some(cells) => row.push(Cell::Number(aggregate_cells(cells, agg)?)),
                    None => row.push(Cell::Null),
                }
            }
            out.push_row(row);
        }
        Ok(out)
    }

    /// Remove duplicate rows, keeping the first occurrence. `subset` limits
    /// which columns participate in the equality check.
    pub fn deduped(&self, subset: Option<&[usize]>) -> Table {
        let all: Vec<usize> = (0..self.columns.len()).collect();
        let key_cols = subset.unwrap_or(&all);
        let mut seen: BTreeSet<RowKey> = BTreeSet::new();
        let mut rows = Vec::new();
        for row in &self.rows {
            let key = RowKey(
                key_cols
                    .iter()
                    .map(|&i| row.get(i).cloned().unwrap_or(Cell::Null))
                    .collect(),
            );
            if seen.insert(key) {
                rows.push(row.clone());
            }
        }
        Table {
            columns: self.columns.clone(),
            rows,
        }
    }

    /// Vertical stack: `self` rows first, then `other`. Columns are the union
    /// (self's order first); cells missing on either side become Null.
    pub fn concat(&self, other: &Table) -> Table {
        let mut columns = self.columns.clone();
        for c in &other.columns {
            if !columns.contains(c) {
                columns.push(c.clone());
            }
        }
        let mut out = Table::new(columns.clone());
        for row in &self.rows {
            let cells = columns
                .iter()
                .map(|c| {
                    self.column_index(c)
                        .and_then(|i| row.get(i).cloned())
                        .unwrap_or(Cell::Null)
                })
                .collect();
            out.push_row(cells);
        }
        for row in &other.rows {
            let cells = columns
                .iter()
                .map(|c| {
                    other
                        .column_index(c)
                        .and_then(|i| row.get(i).cloned())
                        .unwrap_or(Cell::Null)
                })
                .collect();
            out.push_row(cells);
        }
        out
    }

    /// Join `self` (left) with `right` on a shared key column. The output has
    /// the left columns followed by the right columns minus the key. Unmatched
    /// cells are Null per the join kind.
    pub fn merge(&self, right: &Table, on: &str, how: JoinKind) -> Result<Table, AppError> {
        let left_key = self.column_index(on).ok_or_else(|| AppError::UnknownColumn {
            columns: vec![on.to_string()],
        })?;
        let right_key = right.column_index(on).ok_or_else(|| AppError::UnknownColumn {
            columns: vec![on.to_string()],
        })?;

        // Right columns carried into the output, with their source index.
        let carried: Vec<(usize, &String)> = right
            .columns
            .iter()
            .enumerate()
            .filter(|(i, _)| *i != right_key)
            .collect();

        let mut columns = self.columns.clone();
        for (_, name) in &carried {
            columns.push((*name).clone());
        }
        let mut out = Table::new(columns);

        let mut right_by_key: BTreeMap<RowKey, Vec<usize>> = BTreeMap::new();
        for (i, row) in right.rows.iter().enumerate() {
            let key = RowKey(vec![row.get(right_key).cloned().unwrap_or(Cell::Null)]);
            right_by_key.entry(key).or_default().push(i);
        }

        let mut matched_right: BTreeSet<usize> = BTreeSet::new();
        for row in &self.rows {
            let key = RowKey(vec![row.get(left_key).cloned().unwrap_or(Cell::Null)]);
            match right_by_key.get(&key) {
                Some(indices) => {
                    for &ri in indices {
                        matched_right.insert(ri);
                        let mut cells = row.clone();
                        for (src, _) in &carried {
                            cells.push(
                                right.cell(ri, *src).cloned().unwrap_or(Cell::Null),
                            );
                        }
                        out.push_row(cells);
                    }
                }
                None => {
                    if matches!(how, JoinKind::Left | JoinKind::Outer) {
                        let mut cells = row.clone();
                        cells.extend(std::iter::repeat(Cell::Null).take(carried.len()));
                        out.push_row(cells);
                    }
                }
            }
        }

        if matches!(how, JoinKind::Right | JoinKind::Outer) {
            for (ri, row) in right.rows.iter().enumerate() {
                if matched_right.contains(&ri) {
                    continue;
                }
                // Left side all Null except the key column carried over.
                let mut cells = vec![Cell::Null; self.columns.len()];
                if let Some(slot) = cells.get_mut(left_key) {
                    *slot = row.get(right_key).cloned().unwrap_or(Cell::Null);
                }
                for (src, _) in &carried {
                    cells.push(row.get(*src).cloned().unwrap_or(Cell::Null));
                }
                out.push_row(cells);
            }
        }

        Ok(out)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::indexing_slicing)]
mod tests {
    use super::*;

    fn sales_table() -> Table {
        let mut t = Table::new(vec!["Region".into(), "Profit".into()]);
        t.push_row(vec![Cell::Text("East".into()), Cell::Number(100.0)]);
        t.push_row(vec![Cell::Text("West".into()), Cell::Number(50.0)]);
        t.push_row(vec![Cell::Text("East".into()), Cell::Number(200.0)]);
        t
    }

    #[test]
    fn test_group_sum_naming_and_order() {
        let t = sales_table();
        let grouped = t.group_aggregate(&[0], 1, Aggregation::Sum).unwrap();
        assert_eq!(grouped.columns(), &["Region".to_string(), "Profit_sum".to_string()]);
        // Ascending group key order
        assert_eq!(grouped.rows()[0][0], Cell::Text("East".into()));
        assert_eq!(grouped.rows()[0][1], Cell::Number(300.0));
        assert_eq!(grouped.rows()[1][0], Cell::Text("West".into()));
        assert_eq!(grouped.rows()[1][1], Cell::Number(50.0));
    }

    #[test]
    fn test_group_count_is_count_of_records() {
        let t = sales_table();
        let grouped = t.group_aggregate(&[0], 1, Aggregation::Count).unwrap();
        assert_eq!(grouped.columns()[1], "CountOfRecords");
        assert_eq!(grouped.rows()[0][1], Cell::Number(2.0));
    }

    #[test]
    fn test_sample_std() {
        let cells = [Cell::Number(2.0), Cell::Number(4.0), Cell::Number(4.0), Cell::Number(4.0), Cell::Number(5.0), Cell::Number(5.0), Cell::Number(7.0), Cell::Number(9.0)];
        let refs: Vec<&Cell> = cells.iter().collect();
        let std = aggregate_cells(&refs, Aggregation::Std).unwrap();
        // Sample std (ddof=1) of this classic data set
        assert!((std - 2.138_089_935).abs() < 1e-6);
    }

    #[test]
    fn test_concat_preserves_order_and_length() {
        let mut a = Table::new(vec!["X".into()]);
        a.push_row(vec![Cell::Number(1.0)]);
        a.push_row(vec![Cell::Number(2.0)]);
        let mut b = Table::new(vec!["X".into()]);
        b.push_row(vec![Cell::Number(3.0)]);
        let out = a.concat(&b);
        assert_eq!(out.len(), 3);
        assert_eq!(out.rows()[0][0], Cell::Number(1.0));
        assert_eq!(out.rows()[2][0], Cell::Number(3.0));
    }

    #[test]
    fn test_concat_unions_columns_with_null_fill() {
        let mut a = Table::new(vec!["X".into()]);
        a.push_row(vec![Cell::Number(1.0)]);
        let mut b = Table::new(vec!["Y".into()]);
        b.push_row(vec![Cell::Number(2.0)]);
        let out = a.concat(&b);
        assert_eq!(out.columns(), &["X".to_string(), "Y".to_string()]);
        assert_eq!(out.rows()[0][1], Cell::Null);
        assert_eq!(out.rows()[1][0], Cell::Null);
    }

    fn people() -> (Table, Table) {
        let mut left = Table::new(vec!["Id".into(), "Name".into()]);
        left.push_row(vec![Cell::Number(1.0), Cell::Text("Ada".into())]);
        left.push_row(vec![Cell::Number(2.0), Cell::Text("Bo".into())]);
        left.push_row(vec![Cell::Number(3.0), Cell::Text("Cy".into())]);
        let mut right = Table::new(vec!["Id".into(), "City".into()]);
        right.push_row(vec![Cell::Number(1.0), Cell::Text("Oslo".into())]);
        right.push_row(vec![Cell::Number(3.0), Cell::Text("Bern".into())]);
        (left, right)
    }

    #[test]
    fn test_merge_inner_keeps_shared_keys_only() {
        let (left, right) = people();
        let out = left.merge(&right, "Id", JoinKind::Inner).unwrap();
        assert_eq!(out.len(), 2);
        assert_eq!(out.columns(), &["Id".to_string(), "Name".to_string(), "City".to_string()]);
        assert_eq!(out.rows()[0][2], Cell::Text("Oslo".into()));
    }

    #[test]
    fn test_merge_left_fills_unmatched_with_null() {
        let (left, right) = people();
        let out = left.merge(&right, "Id", JoinKind::Left).unwrap();
        assert_eq!(out.len(), left.len());
        // Row for Id=2 has no match
        assert_eq!(out.rows()[1][0], Cell::Number(2.0));
        assert_eq!(out.rows()[1][2], Cell::Null);
    }

    #[test]
    fn test_merge_unknown_key_errors() {
        let (left, right) = people();
        let err = left.merge(&right, "Nope", JoinKind::Inner).unwrap_err();
        assert!(matches!(err, AppError::UnknownColumn { .. }));
    }

    #[test]
    fn test_sorted_descending() {
        let t = sales_table();
        let sorted = t.sorted(&[1], false);
        assert_eq!(sorted.rows()[0][1], Cell::Number(200.0));
        assert_eq!(sorted.rows()[2][1], Cell::Number(50.0));
    }

    #[test]
    fn test_dedup_with_subset() {
        let t = sales_table();
        let out = t.deduped(Some(&[0]));
        assert_eq!(out.len(), 2);
    }

    #[test]
    fn test_pivot_shape() {
        let mut t = Table::new(vec!["Region".into(), "Product".into(), "Sales".into()]);
        t.push_row(vec![Cell::Text("East".into()), Cell::Text("A".into()), Cell::Number(10.0)]);
        t.push_row(vec![Cell::Text("East".into()), Cell::Text("B".into()), Cell::Number(20.0)]);
        t.push_row(vec![Cell::Text("West".into()), Cell::Text("A".into()), Cell::Number(5.0)]);
        let out = t.pivot(0, 1, 2, Aggregation::Sum).unwrap();
        assert_eq!(out.columns(), &["Region".to_string(), "A".to_string(), "B".to_string()]);
        assert_eq!(out.rows()[1][1], Cell::Number(5.0));
        assert_eq!(out.rows()[1][2], Cell::Null);
    }

    #[test]
    fn test_cell_parse() {
        assert_eq!(Cell::parse("3.5"), Cell::Number(3.5));
        assert_eq!(Cell::parse(""), Cell::Null);
        assert_eq!(Cell::parse("true"), Cell::Bool(true));
        assert_eq!(Cell::parse("hello"), Cell::Text("hello".into()));
    }
}
