//! The orchestrator. One query runs through four stages: gather per-file
//! context, obtain the call plan from the planner (exactly once), execute
//! the steps in order against the session pool, then decide what to surface.
//!
//! Only configuration and planning failures abort a run. Every other failure
//! is isolated to the step that raised it: the step is reported with the
//! operation name and the arguments attempted, and execution continues.

use indexmap::IndexMap;

use crate::describe;
use crate::error::AppError;
use crate::llm::{CallRequest, Planner};
use crate::output::OutputHandler;
use crate::pool::{ActiveRef, SessionPool};
use crate::registry::params::ScalarAggregateParams;
use crate::registry::reference;
use crate::registry::{catalog, Op, OpContext, OpOutput, OpResult};
use crate::table::Aggregation;

/// Cache key for a computed scalar. Advisory run metadata only: the cache is
/// populated and shown in verbose output, but never substituted into later
/// steps' arguments — the planner is instructed to inline literal numbers.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ScalarKey {
    pub aggregation: Aggregation,
    pub column: String,
    pub filter: Option<String>,
}

pub struct Agent<'a> {
    planner: &'a dyn Planner,
    output: &'a dyn OutputHandler,
    verbose: bool,
}

impl<'a> Agent<'a> {
    pub fn new(planner: &'a dyn Planner, output: &'a dyn OutputHandler, verbose: bool) -> Self {
        Self {
            planner,
            output,
            verbose,
        }
    }

    /// Process one query against the given input files. Returns the final
    /// candidate result (the most recent non-empty success), if any.
    pub fn run(&self, files: &[String], query: &str) -> Result<Option<OpOutput>, AppError> {
        // GatheringContext
        let (mut pool, warnings) = SessionPool::build(files);
        for warning in &warnings {
            tracing::warn!(%warning, "context gathering");
            self.output.warning(&warning.to_string());
        }
        if pool.is_empty() {
            return Err(AppError::Configuration {
                message: "No readable input files to process".to_string(),
            });
        }

        // AwaitingPlan
        let entries = catalog::catalog();
        if entries.is_empty() {
            return Err(AppError::Configuration {
                message: "The operation catalog is empty".to_string(),
            });
        }
        let prompt = build_prompt(&pool, query);
        let calls = self.planner.propose(&prompt, &entries)?;
        if calls.is_empty() {
            return Err(AppError::Planning {
                message: "The model proposed no operations for this query".to_string(),
            });
        }
        tracing::debug!(steps = calls.len(), "plan received");

        // ExecutingSteps
        let mut active: Option<ActiveRef> = None;
        let mut scalar_cache: IndexMap<ScalarKey, f64> = IndexMap::new();
        let mut final_candidate: Option<OpOutput> = None;

        for (i, call) in calls.iter().enumerate() {
            if self.verbose {
                self.output
                    .info(&format!("Step {}: {} {}", i + 1, call.name, call.arguments));
            }
            match execute_step(&mut pool, &mut active, call) {
                Ok(out) => {
                    if let (Some(key), OpResult::Scalar(value)) =
                        (scalar_key_for(call), &out.result)
                    {
                        scalar_cache.insert(key.clone(), *value);
                        if self.verbose {
                            self.output.info(&format!(
                                "Stored scalar {} of '{}'{}: {value}",
                                key.aggregation.slug(),
                                key.column,
                                key.filter
                                    .as_deref()
                                    .map(|f| format!(" (filter '{f}')"))
                                    .unwrap_or_default(),
                            ));
                        }
                    }
                    if self.verbose {
                        self.present(&out);
                    }
                    if !matches!(out.result, OpResult::None) {
                        final_candidate = Some(out);
                    }
                }
                Err(e) => {
                    tracing::warn!(step = i + 1, operation = %call.name, error = %e, "step failed");
                    self.output.error(&format!(
                        "Step {} ({}) failed: {}. Arguments attempted: {}",
                        i + 1,
                        call.name,
                        e,
                        call.arguments
                    ));
                }
            }
        }

        // Done
        if !self.verbose {
            match &final_candidate {
                Some(out) => {
                    self.output
                        .success("All operations completed. Here is the final result:");
                    self.present(out);
                }
                None => {
                    self.output
                        .warning("All operations completed, but there is no result to show");
                }
            }
        } else if final_candidate.is_none() {
            self.output
                .warning("All operations completed, but there is no result to show");
        }
        Ok(final_candidate)
    }

    fn present(&self, out: &OpOutput) {
        self.output.success(&out.message);
        match &out.result {
            OpResult::Table(table) => self.output.table(table),
            OpResult::Artifact(path) => self.output.artifact(path),
            OpResult::Scalar(_) | OpResult::None => {}
        }
    }
}

/// The planning prompt: fixed usage guidance, then the live file context,
/// then the user's query.
pub fn build_prompt(pool: &SessionPool, query: &str) -> String {
    format!(
        "{}\n\nAvailable files and their structures:\n{}\n\nUser Query: {}",
        reference::usage_guide(),
        describe::file_contexts(pool.contexts()),
        query
    )
}

/// Execute one planned call. Dispatch switches on the operation's required
/// context kind, never on parameter-name conventions.
fn execute_step(
    pool: &mut SessionPool,
    active: &mut Option<ActiveRef>,
    call: &CallRequest,
) -> Result<OpOutput, AppError> {
    let op = Op::from_tool_call(&call.name, &call.arguments)?;
    match op.info().context {
        OpContext::Activate => {
            let (bound, out) = op.dispatch_activate(pool)?;
            *active = Some(bound);
            Ok(out)
        }
        OpContext::Session => {
            let current = active.as_ref().ok_or(AppError::NoActiveSession)?;
            let session = pool.get_mut(&current.source)?;
            op.dispatch_session(session)
        }
        OpContext::Cross => {
            let (rebind, out) = op.dispatch_cross(pool, active.as_ref())?;
            if let Some(bound) = rebind {
                *active = Some(bound);
            }
            Ok(out)
        }
    }
}

fn scalar_key_for(call: &CallRequest) -> Option<ScalarKey> {
    if call.name != "scalar_aggregate" {
        return None;
    }
    serde_json::from_value::<ScalarAggregateParams>(call.arguments.clone())
        .ok()
        .map(|p| ScalarKey {
            aggregation: p.aggregation,
            column: p.column,
            filter: p.filter,
        })
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::indexing_slicing)]
mod tests {
    use super::*;
    use crate::output::Severity;
    use crate::registry::catalog::OpRegistryEntry;
    use crate::table::Cell;
    use std::cell::RefCell;
    use std::fs;
    use std::path::{Path, PathBuf};

    struct StubPlanner {
        calls: Vec<CallRequest>,
    }

    impl Planner for StubPlanner {
        fn propose(
            &self,
            _prompt: &str,
            _catalog: &[OpRegistryEntry],
        ) -> Result<Vec<CallRequest>, AppError> {
            Ok(self.calls.clone())
        }
    }

    #[derive(Default)]
    struct RecordingOutput {
        events: RefCell<Vec<(Severity, String)>>,
    }

    impl OutputHandler for RecordingOutput {
        fn message(&self, severity: Severity, text: &str) {
            self.events.borrow_mut().push((severity, text.to_string()));
        }
        fn table(&self, _table: &crate::table::Table) {}
        fn artifact(&self, _path: &Path) {}
    }

    impl RecordingOutput {
        fn errors(&self) -> Vec<String> {
            self.events
                .borrow()
                .iter()
                .filter(|(s, _)| *s == Severity::Error)
                .map(|(_, t)| t.clone())
                .collect()
        }
    }

    fn temp_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("tabula_agent_{name}"));
        let _ = fs::remove_dir_all(&dir);
        fs::create_dir_all(&dir).unwrap();
        dir
    }

    fn sales_csv(dir: &Path) -> String {
        let path = dir.join("sales.csv");
        fs::write(&path, "Region,Profit\nEast,100\nWest,50\nEast,200\n").unwrap();
        path.to_string_lossy().into_owned()
    }

    fn call(name: &str, arguments: serde_json::Value) -> CallRequest {
        CallRequest {
            name: name.to_string(),
            arguments,
        }
    }

    #[test]
    fn test_filter_then_mean_yields_150() {
        let dir = temp_dir("mean");
        let file = sales_csv(&dir);
        let planner = StubPlanner {
            calls: vec![
                call("load_table", serde_json::json!({ "source": file })),
                call("filter_rows", serde_json::json!({ "query": "Region == 'East'" })),
                call(
                    "scalar_aggregate",
                    serde_json::json!({ "column": "Profit", "aggregation": "mean" }),
                ),
            ],
        };
        let output = RecordingOutput::default();
        let agent = Agent::new(&planner, &output, false);

        let result = agent.run(&[file], "average Profit for the East region").unwrap();
        match result.unwrap().result {
            OpResult::Scalar(v) => assert!((v - 150.0).abs() < f64::EPSILON),
            other => panic!("expected a scalar, got {other:?}"),
        }
        assert!(output.errors().is_empty());

        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_group_sum_result_table() {
        let dir = temp_dir("group");
        let file = sales_csv(&dir);
        let planner = StubPlanner {
            calls: vec![
                call("load_table", serde_json::json!({ "source": file })),
                call(
                    "group_aggregate",
                    serde_json::json!({
                        "group_by": ["Region"],
                        "target_column": "Profit",
                        "aggregation": "sum",
                    }),
                ),
            ],
        };
        let output = RecordingOutput::default();
        let agent = Agent::new(&planner, &output, false);

        let result = agent.run(&[file], "total Profit by Region").unwrap();
        match result.unwrap().result {
            OpResult::Table(t) => {
                assert_eq!(t.columns(), &["Region".to_string(), "Profit_sum".to_string()]);
                assert_eq!(t.rows()[0][0], Cell::Text("East".into()));
                assert_eq!(t.rows()[0][1], Cell::Number(300.0));
                assert_eq!(t.rows()[1][0], Cell::Text("West".into()));
                assert_eq!(t.rows()[1][1], Cell::Number(50.0));
            }
            other => panic!("expected a table, got {other:?}"),
        }

        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_unknown_operation_is_skipped_not_fatal() {
        let dir = temp_dir("unknown_op");
        let file = sales_csv(&dir);
        let planner = StubPlanner {
            calls: vec![
                call("load_table", serde_json::json!({ "source": file })),
                call("transmogrify", serde_json::json!({})),
                call("preview_rows", serde_json::json!({ "num_rows": 2 })),
            ],
        };
        let output = RecordingOutput::default();
        let agent = Agent::new(&planner, &output, false);

        let result = agent.run(&[file], "preview").unwrap();
        let errors = output.errors();
        assert_eq!(errors.len(), 1);
        assert!(errors[0].contains("transmogrify"));
        // The later valid step still executed and produced the final result
        match result.unwrap().result {
            OpResult::Table(t) => assert_eq!(t.len(), 2),
            other => panic!("expected a table, got {other:?}"),
        }

        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_step_without_active_session_is_skipped() {
        let dir = temp_dir("no_active");
        let file = sales_csv(&dir);
        let planner = StubPlanner {
            calls: vec![
                call("filter_rows", serde_json::json!({ "query": "Profit > 0" })),
                call("load_table", serde_json::json!({ "source": file })),
            ],
        };
        let output = RecordingOutput::default();
        let agent = Agent::new(&planner, &output, false);

        let result = agent.run(&[file], "filter then load").unwrap();
        let errors = output.errors();
        assert_eq!(errors.len(), 1);
        assert!(errors[0].contains("filter_rows"));
        assert!(result.is_some());

        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_failing_step_reports_arguments() {
        let dir = temp_dir("args");
        let file = sales_csv(&dir);
        let planner = StubPlanner {
            calls: vec![
                call("load_table", serde_json::json!({ "source": file })),
                call("filter_rows", serde_json::json!({ "query": "Nope > 1" })),
            ],
        };
        let output = RecordingOutput::default();
        let agent = Agent::new(&planner, &output, false);

        agent.run(&[file], "bad filter").unwrap();
        let errors = output.errors();
        assert_eq!(errors.len(), 1);
        assert!(errors[0].contains("Nope > 1"));

        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_empty_plan_is_a_planning_error() {
        let dir = temp_dir("empty_plan");
        let file = sales_csv(&dir);
        let planner = StubPlanner { calls: vec![] };
        let output = RecordingOutput::default();
        let agent = Agent::new(&planner, &output, false);

        let err = agent.run(&[file], "do nothing").unwrap_err();
        assert!(matches!(err, AppError::Planning { .. }));
        assert!(err.is_fatal());

        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_no_usable_files_is_a_configuration_error() {
        let planner = StubPlanner { calls: vec![] };
        let output = RecordingOutput::default();
        let agent = Agent::new(&planner, &output, false);

        let err = agent
            .run(&["/definitely/not/here.csv".to_string()], "anything")
            .unwrap_err();
        assert!(matches!(err, AppError::Configuration { .. }));
    }

    #[test]
    fn test_prompt_contains_guidance_context_and_query() {
        let dir = temp_dir("prompt");
        let file = sales_csv(&dir);
        let (pool, _) = SessionPool::build(&[file.clone()]);
        let prompt = build_prompt(&pool, "average Profit");
        assert!(prompt.contains("load_table"));
        assert!(prompt.contains(&file));
        assert!(prompt.contains("Region, Profit"));
        assert!(prompt.ends_with("User Query: average Profit"));

        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_scalar_cache_key_derivation() {
        let key = scalar_key_for(&call(
            "scalar_aggregate",
            serde_json::json!({
                "column": "Units Sold",
                "aggregation": "std",
                "filter": "Department == 'Sales'",
            }),
        ))
        .unwrap();
        assert_eq!(key.aggregation, Aggregation::Std);
        assert_eq!(key.column, "Units Sold");
        assert_eq!(key.filter.as_deref(), Some("Department == 'Sales'"));
        assert!(scalar_key_for(&call("filter_rows", serde_json::json!({}))).is_none());
    }
}
