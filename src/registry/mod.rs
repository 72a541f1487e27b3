pub mod catalog;
pub mod params;
pub mod reference;
pub mod validation;

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::AppError;
use crate::pool::{self, ActiveRef, SessionPool};
use crate::session::{self, TableSession};
use crate::table::Table;

use params::{
    AddColumnParams, AddLaggedColumnParams, CleanTextParams, CompareValuesParams,
    ConcatTablesParams, ConvertColumnParams, DedupeRowsParams, DescribeStatsParams,
    DropItemsParams, ExportTableParams, ExtractDatePartParams, ExtractPatternParams,
    FillMissingParams, FilterRowsParams, GroupAggregateParams, LoadTableParams,
    LookupJoinParams, MergeTablesParams, PivotTableParams, PlotTableParams, PreviewRowsParams,
    RenameColumnParams, ScalarAggregateParams, SelectColumnsParams, SortRowsParams,
    SplitColumnParams,
};

// ── Operation metadata ──────────────────────────────────────────

/// Required-context kind of an operation. The orchestrator dispatches by
/// switching on this tag, never by convention over parameter names:
/// `Activate` establishes the active session, `Session` requires one,
/// `Cross` works across sessions through the pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum OpContext {
    Activate,
    Session,
    Cross,
}

pub struct OpInfo {
    pub name: &'static str,
    pub description: &'static str,
    pub context: OpContext,
}

// ── Operation output ────────────────────────────────────────────

/// Result payload of one executed operation.
#[derive(Debug, Clone)]
pub enum OpResult {
    Table(Table),
    Scalar(f64),
    Artifact(PathBuf),
    None,
}

/// What an operation hands back: a human-readable message plus the payload
/// the orchestrator classifies for presentation.
#[derive(Debug, Clone)]
pub struct OpOutput {
    pub message: String,
    pub result: OpResult,
}

impl OpOutput {
    pub fn table(message: impl Into<String>, table: Table) -> Self {
        Self {
            message: message.into(),
            result: OpResult::Table(table),
        }
    }

    pub fn scalar(message: impl Into<String>, value: f64) -> Self {
        Self {
            message: message.into(),
            result: OpResult::Scalar(value),
        }
    }

    pub fn artifact(message: impl Into<String>, path: PathBuf) -> Self {
        Self {
            message: message.into(),
            result: OpResult::Artifact(path),
        }
    }
}

// ── define_ops! macro ───────────────────────────────────────────

/// Single source of truth for all operations. Generates 5 artifacts:
/// 1. `Op` enum (serde-tagged)
/// 2. `Op::info()` — metadata (name, description, required context)
/// 3. `Op::registry_entries()` — catalog entries with JSON schemas
/// 4. `Op::from_tool_call()` — deserialize from a (name, JSON) pair
/// 5. `Op::dispatch_activate/_session/_cross()` — context-kind dispatch;
///    calling a variant through the wrong context is a defensive error, the
///    orchestrator switches on `info().context` first.
macro_rules! define_ops {
    (
        activate {
            $( $av:ident ( $ap:ty ) => $ah:path, $an:literal : $ad:literal ; )*
        }
        session {
            $( $sv:ident ( $sp:ty ) => $sh:path, $sn:literal : $sd:literal ; )*
        }
        cross {
            $( $cv:ident ( $cp:ty ) => $ch:path, $cn:literal : $cd:literal ; )*
        }
    ) => {
        // ── 1. Op enum ──
        /// Unified operation type. Every surface (CLI, planner, tests)
        /// dispatches through the same three context-typed entry points.
        #[derive(Debug, Clone, Serialize, Deserialize)]
        #[serde(tag = "op", content = "params")]
        pub enum Op {
            $( $av($ap), )*
            $( $sv($sp), )*
            $( $cv($cp), )*
        }

        // ── 2. Op::info() ──
        impl Op {
            pub fn info(&self) -> OpInfo {
                match self {
                    $( Op::$av(_) => OpInfo {
                        name: $an,
                        description: $ad,
                        context: OpContext::Activate,
                    }, )*
                    $( Op::$sv(_) => OpInfo {
                        name: $sn,
                        description: $sd,
                        context: OpContext::Session,
                    }, )*
                    $( Op::$cv(_) => OpInfo {
                        name: $cn,
                        description: $cd,
                        context: OpContext::Cross,
                    }, )*
                }
            }
        }

        // ── 3. Op::registry_entries() ──
        impl Op {
            pub(crate) fn registry_entries() -> Vec<catalog::OpRegistryEntry> {
                vec![
                    $( catalog::entry(
                        OpInfo { name: $an, description: $ad, context: OpContext::Activate },
                        catalog::schema_value::<$ap>(),
                    ), )*
                    $( catalog::entry(
                        OpInfo { name: $sn, description: $sd, context: OpContext::Session },
                        catalog::schema_value::<$sp>(),
                    ), )*
                    $( catalog::entry(
                        OpInfo { name: $cn, description: $cd, context: OpContext::Cross },
                        catalog::schema_value::<$cp>(),
                    ), )*
                ]
            }
        }

        // ── 4. Op::from_tool_call() ──
        impl Op {
            pub fn from_tool_call(name: &str, input: &Value) -> Result<Op, AppError> {
                match name {
                    $( $an => Ok(Op::$av(catalog::de(input)?)), )*
                    $( $sn => Ok(Op::$sv(catalog::de(input)?)), )*
                    $( $cn => Ok(Op::$cv(catalog::de(input)?)), )*
                    _ => Err(AppError::UnknownOperation { name: name.to_string() }),
                }
            }
        }

        // ── 5. Context-kind dispatch ──
        impl Op {
            pub(crate) fn dispatch_activate(
                self,
                pool: &mut SessionPool,
            ) -> Result<(ActiveRef, OpOutput), AppError> {
                match self {
                    $( Op::$av(p) => $ah(pool, p), )*
                    other => Err(AppError::Transform {
                        message: format!(
                            "Operation '{}' does not establish a session",
                            other.info().name,
                        ),
                    }),
                }
            }

            pub(crate) fn dispatch_session(
                self,
                session: &mut TableSession,
            ) -> Result<OpOutput, AppError> {
                match self {
                    $( Op::$sv(p) => $sh(session, p), )*
                    other => Err(AppError::Transform {
                        message: format!(
                            "Operation '{}' requires pool-level dispatch",
                            other.info().name,
                        ),
                    }),
                }
            }

            pub(crate) fn dispatch_cross(
                self,
                pool: &mut SessionPool,
                active: Option<&ActiveRef>,
            ) -> Result<(Option<ActiveRef>, OpOutput), AppError> {
                match self {
                    $( Op::$cv(p) => $ch(pool, active, p), )*
                    other => Err(AppError::Transform {
                        message: format!(
                            "Operation '{}' is not a cross-session operation",
                            other.info().name,
                        ),
                    }),
                }
            }
        }
    };
}

// ── Operation definitions ───────────────────────────────────────

define_ops! {
    activate {
        LoadTable(LoadTableParams)
        => pool::load_table, "load_table": "Load a sheet from a source file and make it the active table for all subsequent operations. Call this first for any analysis.";
    }
    session {
        FilterRows(FilterRowsParams)
        => session::filter_rows, "filter_rows": "Filter the active table to rows matching a predicate. The filtered result becomes the active table.";

        GroupAggregate(GroupAggregateParams)
        => session::group_aggregate, "group_aggregate": "Group the active table by columns and aggregate a target column. Use for 'total by', 'average by', counts per category.";

        SortRows(SortRowsParams)
        => session::sort_rows, "sort_rows": "Sort the active table by one or more columns.";

        SelectColumns(SelectColumnsParams)
        => session::select_columns, "select_columns": "Keep only the named columns, in the given order.";

        AddColumn(AddColumnParams)
        => session::add_column, "add_column": "Add a derived column computed from a numeric formula over existing columns.";

        RenameColumn(RenameColumnParams)
        => session::rename_column, "rename_column": "Rename a column of the active table.";

        DropItems(DropItemsParams)
        => session::drop_items, "drop_items": "Delete rows by index or columns by name from the active table.";

        DedupeRows(DedupeRowsParams)
        => session::dedupe_rows, "dedupe_rows": "Remove duplicate rows, optionally considering only a subset of columns.";

        FillMissing(FillMissingParams)
        => session::fill_missing, "fill_missing": "Fill missing values in a column with a constant or a strategy (mean, median, forward/backward fill).";

        ConvertColumn(ConvertColumnParams)
        => session::convert_column, "convert_column": "Convert a column to numeric, datetime (ISO dates), or text.";

        SplitColumn(SplitColumnParams)
        => session::split_column, "split_column": "Split a text column into multiple new columns on a delimiter.";

        ExtractPattern(ExtractPatternParams)
        => session::extract_pattern, "extract_pattern": "Extract a regex pattern from a text column into a new column.";

        CleanText(CleanTextParams)
        => session::clean_text, "clean_text": "Clean a text column: strip whitespace, change case, remove digits or punctuation.";

        ExtractDatePart(ExtractDatePartParams)
        => session::extract_date_part, "extract_date_part": "Extract year, month, day, or quarter from a date column into a new column.";

        AddLaggedColumn(AddLaggedColumnParams)
        => session::add_lagged_column, "add_lagged_column": "Add a column holding an earlier row's value of another column, optionally per group. For period-over-period comparisons.";

        PivotTable(PivotTableParams)
        => session::pivot_table, "pivot_table": "Pivot the active table: one row per index value, one column per distinct value of another column.";

        PreviewRows(PreviewRowsParams)
        => session::preview_rows, "preview_rows": "Show the first or last N rows of the active table without changing it.";

        DescribeStats(DescribeStatsParams)
        => session::describe_stats, "describe_stats": "Summary statistics (count, mean, std, min, max) for the numeric columns of the active table.";

        ScalarAggregate(ScalarAggregateParams)
        => session::scalar_aggregate, "scalar_aggregate": "Calculate a single value (sum, mean, count, min, max, std) of a column, optionally over an ephemeral filtered subset. Never changes the active table.";

        CompareValues(CompareValuesParams)
        => session::compare_values, "compare_values": "Calculate several labeled values and present them side by side for comparison.";

        PlotTable(PlotTableParams)
        => session::plot_table, "plot_table": "Render a chart (line, bar, scatter, histogram) of the active table to an image file under the plots directory.";

        ExportTable(ExportTableParams)
        => session::export_table, "export_table": "Write the active table to a file as csv, jsonl, or a workbook.";
    }
    cross {
        MergeTables(MergeTablesParams)
        => pool::merge_tables, "merge_tables": "Join two sheets (possibly from different files) on a shared key column. The left side holds the merged result and becomes active.";

        ConcatTables(ConcatTablesParams)
        => pool::concat_tables, "concat_tables": "Stack the rows of two sheets vertically, top rows first. The top side holds the result and becomes active.";

        LookupJoin(LookupJoinParams)
        => pool::lookup_join, "lookup_join": "Add columns from another sheet onto the active table by matching key columns, like a VLOOKUP. Requires an active table.";
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::indexing_slicing)]
mod tests {
    use super::*;

    #[test]
    fn test_from_tool_call_unknown_name() {
        let err = Op::from_tool_call("transmogrify", &serde_json::json!({})).unwrap_err();
        assert!(matches!(err, AppError::UnknownOperation { .. }));
    }

    #[test]
    fn test_from_tool_call_bad_args() {
        let err = Op::from_tool_call("filter_rows", &serde_json::json!({})).unwrap_err();
        assert!(matches!(err, AppError::InvalidArgument { .. }));
    }

    #[test]
    fn test_from_tool_call_round_trip() {
        let op = Op::from_tool_call(
            "group_aggregate",
            &serde_json::json!({
                "group_by": ["Region"],
                "target_column": "Profit",
                "aggregation": "sum",
            }),
        )
        .unwrap();
        assert_eq!(op.info().name, "group_aggregate");
        assert_eq!(op.info().context, OpContext::Session);
    }

    #[test]
    fn test_context_kinds() {
        let load = Op::from_tool_call(
            "load_table",
            &serde_json::json!({ "source": "a.csv" }),
        )
        .unwrap();
        assert_eq!(load.info().context, OpContext::Activate);

        let merge = Op::from_tool_call(
            "merge_tables",
            &serde_json::json!({
                "left_source": "a.csv", "left_sheet": "Sheet1",
                "right_source": "b.csv", "right_sheet": "Sheet1",
                "on_column": "Id",
            }),
        )
        .unwrap();
        assert_eq!(merge.info().context, OpContext::Cross);
    }
}
