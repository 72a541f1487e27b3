use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::table::{Aggregation, JoinKind};

// ── Argument enums ──────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum PlotKind {
    Line,
    Bar,
    Scatter,
    Histogram,
}

impl PlotKind {
    pub fn slug(self) -> &'static str {
        match self {
            PlotKind::Line => "line",
            PlotKind::Bar => "bar",
            PlotKind::Scatter => "scatter",
            PlotKind::Histogram => "histogram",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum ExportFormat {
    Csv,
    Jsonl,
    Workbook,
}

impl ExportFormat {
    pub fn slug(self) -> &'static str {
        match self {
            ExportFormat::Csv => "csv",
            ExportFormat::Jsonl => "jsonl",
            ExportFormat::Workbook => "workbook",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum CleanOp {
    Strip,
    Lower,
    Upper,
    RemoveDigits,
    RemovePunctuation,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum DatePart {
    Year,
    Month,
    Day,
    Quarter,
}

impl DatePart {
    pub fn slug(self) -> &'static str {
        match self {
            DatePart::Year => "year",
            DatePart::Month => "month",
            DatePart::Day => "day",
            DatePart::Quarter => "quarter",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum ConvertType {
    Numeric,
    Datetime,
    Text,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum FillStrategy {
    Value,
    Mean,
    Median,
    Ffill,
    Bfill,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum DropTarget {
    Rows,
    Columns,
}

// ── Defaults ────────────────────────────────────────────────────

fn default_true() -> bool {
    true
}

fn default_preview_rows() -> usize {
    5
}

fn default_periods() -> i64 {
    1
}

fn default_join_sum() -> Aggregation {
    Aggregation::Sum
}

fn default_join_inner() -> JoinKind {
    JoinKind::Inner
}

fn default_join_left() -> JoinKind {
    JoinKind::Left
}

// ── Activate params ─────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct LoadTableParams {
    /// Path of the source file, exactly as listed in the context.
    pub source: String,
    /// Sheet to load; omitted = the file's first sheet.
    #[serde(default)]
    pub sheet: Option<String>,
}

// ── Single-session params ───────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct FilterRowsParams {
    pub query: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct GroupAggregateParams {
    pub group_by: Vec<String>,
    pub target_column: String,
    pub aggregation: Aggregation,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct SortRowsParams {
    pub by: Vec<String>,
    #[serde(default = "default_true")]
    pub ascending: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct SelectColumnsParams {
    pub columns: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct AddColumnParams {
    pub name: String,
    pub formula: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct RenameColumnParams {
    pub old_name: String,
    pub new_name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct DropItemsParams {
    pub target: DropTarget,
    /// Row indices (as numbers) or column names, per `target`.
    pub identifiers: Vec<serde_json::Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct DedupeRowsParams {
    #[serde(default)]
    pub subset: Option<Vec<String>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct FillMissingParams {
    pub column: String,
    pub strategy: FillStrategy,
    #[serde(default)]
    pub fill_value: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct ConvertColumnParams {
    pub column: String,
    pub target_type: ConvertType,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct SplitColumnParams {
    pub column: String,
    pub delimiter: String,
    pub new_columns: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct ExtractPatternParams {
    pub column: String,
    pub pattern: String,
    pub new_column: String,
    #[serde(default)]
    pub group_index: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct CleanTextParams {
    pub column: String,
    pub operations: Vec<CleanOp>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct ExtractDatePartParams {
    pub date_column: String,
    pub part: DatePart,
    pub new_column: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct AddLaggedColumnParams {
    pub column: String,
    pub new_column: String,
    #[serde(default = "default_periods")]
    pub periods: i64,
    #[serde(default)]
    pub group_by: Option<Vec<String>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct PivotTableParams {
    pub index_column: String,
    pub columns_column: String,
    pub values_column: String,
    #[serde(default = "default_join_sum")]
    pub aggregation: Aggregation,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct PreviewRowsParams {
    #[serde(default = "default_preview_rows")]
    pub num_rows: usize,
    #[serde(default)]
    pub from_end: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct DescribeStatsParams {}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct ScalarAggregateParams {
    pub column: String,
    pub aggregation: Aggregation,
    /// Ephemeral row filter applied only for this calculation.
    #[serde(default)]
    pub filter: Option<String>,
}

/// One entry of a `compare_values` call. The model-facing schema for the
/// containing array is supplied by the catalog override table, not derived.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct ComparisonSpec {
    pub label: String,
    pub column: String,
    pub aggregation: Aggregation,
    #[serde(default)]
    pub filter: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct CompareValuesParams {
    pub comparisons: Vec<ComparisonSpec>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct PlotTableParams {
    pub plot_kind: PlotKind,
    /// File name for the image, written under the plots directory.
    pub output_filename: String,
    #[serde(default)]
    pub x_column: Option<String>,
    #[serde(default)]
    pub y_column: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct ExportTableParams {
    pub output_path: String,
    pub format: ExportFormat,
}

// ── Cross-session params ────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct MergeTablesParams {
    pub left_source: String,
    pub left_sheet: String,
    pub right_source: String,
    pub right_sheet: String,
    pub on_column: String,
    #[serde(default = "default_join_inner")]
    pub how: JoinKind,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct ConcatTablesParams {
    pub top_source: String,
    pub top_sheet: String,
    pub bottom_source: String,
    pub bottom_sheet: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct LookupJoinParams {
    pub lookup_source: String,
    pub lookup_sheet: String,
    /// Column in the active table to match on.
    pub on_column: String,
    /// Column in the lookup table to match on.
    pub lookup_on_column: String,
    pub columns_to_add: Vec<String>,
    #[serde(default = "default_join_left")]
    pub how: JoinKind,
}
