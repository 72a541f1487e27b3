//! Descriptor construction: derives each operation's calling contract from
//! its parameter struct via schemars, then applies the declarative override
//! table and the session-parameter suppression rule.

use serde_json::{json, Value};

use super::{OpContext, OpInfo};
use crate::error::AppError;

/// A catalog entry: operation metadata plus the JSON schema for its params.
#[derive(Debug, Clone, serde::Serialize)]
pub struct OpRegistryEntry {
    pub name: &'static str,
    pub description: &'static str,
    pub context: OpContext,
    pub param_schema: Value,
}

pub(super) fn empty_object_schema() -> Value {
    json!({ "type": "object", "properties": {} })
}

/// Derive the JSON schema for a parameter struct. Subschemas (argument
/// enums) are inlined so the model never sees `$ref` indirection.
pub(super) fn schema_value<T: schemars::JsonSchema>() -> Value {
    let settings = schemars::gen::SchemaSettings::draft07().with(|s| {
        s.inline_subschemas = true;
        s.meta_schema = None;
    });
    let root = settings.into_generator().into_root_schema_for::<T>();
    let mut value = serde_json::to_value(root).unwrap_or_else(|_| empty_object_schema());
    if let Some(obj) = value.as_object_mut() {
        obj.remove("$schema");
        obj.remove("title");
    }
    value
}

/// Build a catalog entry: derived schema, then overrides, then suppression.
pub(super) fn entry(info: OpInfo, mut param_schema: Value) -> OpRegistryEntry {
    apply_overrides(info.name, &mut param_schema);
    if info.context == OpContext::Session {
        strip_session_params(&mut param_schema);
    }
    OpRegistryEntry {
        name: info.name,
        description: info.description,
        context: info.context,
        param_schema,
    }
}

/// Deserialize a tool-call argument object into a typed param struct.
pub(super) fn de<T: serde::de::DeserializeOwned>(input: &Value) -> Result<T, AppError> {
    serde_json::from_value(input.clone()).map_err(|e| AppError::InvalidArgument {
        message: e.to_string(),
    })
}

// ── Override table ──────────────────────────────────────────────

/// Per-parameter schema overrides keyed by (operation, parameter).
///
/// Some parameters need metadata a type signature cannot express — a worked
/// example in the description, or a fixed-shape array of objects. Wording
/// here is model-facing contract, not decoration: a vague description
/// produces malformed calls.
fn override_table() -> Vec<((&'static str, &'static str), Value)> {
    vec![
        (
            ("filter_rows", "query"),
            json!({
                "type": "string",
                "description": "Row predicate. Comparisons (==, !=, >, >=, <, <=) combined with 'and'/'or' and parentheses. Column names with spaces MUST be backtick-quoted; string values MUST be single-quoted. The value side may be arithmetic over numeric literals. Example: \"(`Discount Amount` > 500) and (Region == 'East')\""
            }),
        ),
        (
            ("scalar_aggregate", "filter"),
            json!({
                "type": "string",
                "description": "Optional predicate applied only for this calculation; the active table is NOT changed. Same syntax as filter_rows. Example: \"Department == 'Sales'\""
            }),
        ),
        (
            ("add_column", "formula"),
            json!({
                "type": "string",
                "description": "Numeric expression over existing columns, e.g. \"Profit / `Net Revenue`\" or \"(`Profit` - `Previous Month Profit`) / `Previous Month Profit`\". Backtick-quote names with spaces. Not for date or lag logic — use extract_date_part / add_lagged_column."
            }),
        ),
        (
            ("compare_values", "comparisons"),
            json!({
                "type": "array",
                "description": "Values to calculate and compare side by side.",
                "items": {
                    "type": "object",
                    "properties": {
                        "label": { "type": "string", "description": "Display label, e.g. 'Total Revenue of Gadget X'" },
                        "column": { "type": "string", "description": "Column to aggregate" },
                        "aggregation": { "type": "string", "enum": ["sum", "mean", "count", "min", "max", "std"] },
                        "filter": { "type": "string", "description": "Optional predicate applied before this aggregation only" }
                    },
                    "required": ["label", "column", "aggregation"]
                }
            }),
        ),
        (
            ("extract_pattern", "pattern"),
            json!({
                "type": "string",
                "description": "Regular expression to extract, e.g. \"\\\\d+\" for numbers. group_index selects a capture group (0 = whole match)."
            }),
        ),
        (
            ("drop_items", "identifiers"),
            json!({
                "type": "array",
                "items": {},
                "description": "Row indices (numbers, 0-based) when target is 'rows'; column names (strings) when target is 'columns'."
            }),
        ),
    ]
}

fn apply_overrides(op_name: &str, schema: &mut Value) {
    for ((op, param), fragment) in override_table() {
        if op != op_name {
            continue;
        }
        if let Some(props) = schema
            .get_mut("properties")
            .and_then(Value::as_object_mut)
        {
            if props.contains_key(param) {
                props.insert(param.to_string(), fragment);
            }
        }
    }
}

// ── Session-parameter suppression ───────────────────────────────

/// Parameters that name "which file" / "which sheet" are bound by the
/// orchestrator for single-session operations, so they are removed from
/// those descriptors. Load and the cross-session operations keep them —
/// that asymmetry is what lets the model omit boilerplate on most calls
/// while still naming files when crossing session boundaries.
const SESSION_BOUND_PARAMS: &[&str] = &["source", "sheet"];

fn strip_session_params(schema: &mut Value) {
    if let Some(props) = schema
        .get_mut("properties")
        .and_then(Value::as_object_mut)
    {
        for name in SESSION_BOUND_PARAMS {
            props.remove(*name);
        }
    }
    if let Some(required) = schema.get_mut("required").and_then(Value::as_array_mut) {
        required.retain(|v| {
            v.as_str()
                .is_none_or(|s| !SESSION_BOUND_PARAMS.contains(&s))
        });
    }
}

// ── Catalog assembly ────────────────────────────────────────────

/// The complete operation catalog, in registration order. Order is stable
/// across runs so prompts (and tests) are reproducible.
pub fn catalog() -> Vec<OpRegistryEntry> {
    super::Op::registry_entries()
}

/// The `tools` array handed to the model client: one entry per operation
/// with its name, description, and input schema.
pub fn to_llm_tools(entries: &[OpRegistryEntry]) -> Value {
    Value::Array(
        entries
            .iter()
            .map(|e| {
                json!({
                    "name": e.name,
                    "description": e.description,
                    "input_schema": e.param_schema,
                })
            })
            .collect(),
    )
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::indexing_slicing)]
mod tests {
    use super::*;
    use crate::registry::OpContext;

    #[test]
    fn test_catalog_is_deterministic() {
        let a: Vec<&str> = catalog().iter().map(|e| e.name).collect();
        let b: Vec<&str> = catalog().iter().map(|e| e.name).collect();
        assert_eq!(a, b);
        assert!(!a.is_empty());
    }

    #[test]
    fn test_required_equals_fields_without_defaults() {
        let entries = catalog();
        let group = entries.iter().find(|e| e.name == "group_aggregate").unwrap();
        let required: Vec<&str> = group.param_schema["required"]
            .as_array()
            .unwrap()
            .iter()
            .filter_map(|v| v.as_str())
            .collect();
        assert_eq!(required, vec!["aggregation", "group_by", "target_column"]);

        // sort_rows: `ascending` has a default, so only `by` is required
        let sort = entries.iter().find(|e| e.name == "sort_rows").unwrap();
        let required: Vec<&str> = sort.param_schema["required"]
            .as_array()
            .unwrap()
            .iter()
            .filter_map(|v| v.as_str())
            .collect();
        assert_eq!(required, vec!["by"]);
    }

    #[test]
    fn test_session_ops_hide_source_and_sheet() {
        for entry in catalog() {
            let props = entry.param_schema.get("properties").and_then(Value::as_object);
            let has_source = props.is_some_and(|p| {
                p.keys().any(|k| k == "source" || k == "sheet")
            });
            match entry.context {
                OpContext::Session => {
                    assert!(!has_source, "{} leaks session-bound params", entry.name);
                }
                OpContext::Activate => {
                    assert!(has_source, "load must keep its source params");
                }
                OpContext::Cross => {}
            }
        }
        // Cross-session ops keep their fully-qualified references
        let merge = catalog().into_iter().find(|e| e.name == "merge_tables").unwrap();
        let props = merge.param_schema["properties"].as_object().unwrap();
        assert!(props.contains_key("left_source"));
        assert!(props.contains_key("right_sheet"));
    }

    #[test]
    fn test_enum_is_inlined_in_schema() {
        let entries = catalog();
        let group = entries.iter().find(|e| e.name == "group_aggregate").unwrap();
        let agg = &group.param_schema["properties"]["aggregation"];
        let variants = agg["enum"].as_array().unwrap();
        let slugs: Vec<&str> = variants.iter().filter_map(|v| v.as_str()).collect();
        assert_eq!(slugs, vec!["sum", "mean", "count", "min", "max", "std"]);
    }

    #[test]
    fn test_compare_values_override_applied() {
        let entries = catalog();
        let cmp = entries.iter().find(|e| e.name == "compare_values").unwrap();
        let items = &cmp.param_schema["properties"]["comparisons"]["items"];
        let required: Vec<&str> = items["required"]
            .as_array()
            .unwrap()
            .iter()
            .filter_map(|v| v.as_str())
            .collect();
        assert_eq!(required, vec!["label", "column", "aggregation"]);
    }

    #[test]
    fn test_llm_tools_shape() {
        let entries = catalog();
        let tools = to_llm_tools(&entries);
        let arr = tools.as_array().unwrap();
        assert_eq!(arr.len(), entries.len());
        assert!(arr.iter().all(|t| t.get("name").is_some()
            && t.get("description").is_some()
            && t.get("input_schema").is_some()));
    }
}
