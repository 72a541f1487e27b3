//! The session pool: one table session per input file, the per-file context
//! gathered at build time, and the cross-session operations that read two
//! sessions and materialize a result into one of them.

use std::path::Path;

use indexmap::IndexMap;
use serde::Serialize;

use crate::error::AppError;
use crate::registry::params::{ConcatTablesParams, LoadTableParams, LookupJoinParams, MergeTablesParams};
use crate::registry::validation::{ensure_columns, ensure_not_empty};
use crate::registry::OpOutput;
use crate::session::TableSession;
use crate::table::io;
use crate::table::{Cell, Table};

// ── Run-state reference ─────────────────────────────────────────

/// Which session (and sheet) is currently "active". Explicit orchestrator
/// run state, never a hidden global: every single-session step reads this or
/// fails.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActiveRef {
    pub source: String,
    pub sheet: String,
}

// ── File context ────────────────────────────────────────────────

/// One sheet's schema as gathered at context time. An empty `columns` list
/// marks a sheet that exists but yielded no headers.
#[derive(Debug, Clone, Serialize)]
pub struct SheetContext {
    pub name: String,
    pub columns: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct FileContext {
    pub path: String,
    pub sheets: Vec<SheetContext>,
}

// ── Pool ────────────────────────────────────────────────────────

/// One session per usable input file, keyed by the path string as given.
/// Iteration order is the input order (deterministic prompts).
pub struct SessionPool {
    sessions: IndexMap<String, TableSession>,
    contexts: Vec<FileContext>,
}

impl SessionPool {
    /// Build a session per file, eagerly probing each file's sheets and
    /// headers. Unreadable files are returned as warnings and excluded;
    /// sheets without headers are kept as empty-schema context entries so
    /// the planner knows they exist.
    pub fn build(paths: &[String]) -> (SessionPool, Vec<AppError>) {
        let mut sessions = IndexMap::new();
        let mut contexts = Vec::new();
        let mut warnings = Vec::new();

        for path in paths {
            let sheet_names = match io::sheet_names(Path::new(path)) {
                Ok(names) if !names.is_empty() => names,
                Ok(_) => {
                    warnings.push(AppError::ContextGathering {
                        source: path.clone(),
                        message: "no sheets found".to_string(),
                    });
                    continue;
                }
                Err(e) => {
                    warnings.push(AppError::ContextGathering {
                        source: path.clone(),
                        message: e.to_string(),
                    });
                    continue;
                }
            };

            let mut sheets = Vec::with_capacity(sheet_names.len());
            for name in sheet_names {
                match io::load_sheet(Path::new(path), Some(&name)) {
                    Ok((_, table)) if !table.columns().is_empty() => sheets.push(SheetContext {
                        name,
                        columns: table.columns().to_vec(),
                    }),
                    Ok(_) => {
                        warnings.push(AppError::ContextGathering {
                            source: path.clone(),
                            message: format!("sheet '{name}' has no column headers"),
                        });
                        sheets.push(SheetContext {
                            name,
                            columns: Vec::new(),
                        });
                    }
                    Err(e) => {
                        warnings.push(AppError::ContextGathering {
                            source: path.clone(),
                            message: format!("sheet '{name}': {e}"),
                        });
                        sheets.push(SheetContext {
                            name,
                            columns: Vec::new(),
                        });
                    }
                }
            }

            sessions.insert(path.clone(), TableSession::new(path));
            contexts.push(FileContext {
                path: path.clone(),
                sheets,
            });
        }

        (SessionPool { sessions, contexts }, warnings)
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    pub fn contexts(&self) -> &[FileContext] {
        &self.contexts
    }

    pub fn contains(&self, source: &str) -> bool {
        self.sessions.contains_key(source)
    }

    pub fn get(&self, source: &str) -> Option<&TableSession> {
        self.sessions.get(source)
    }

    /// Resolve a session by source identity, failing when the source was not
    /// among the run's input files.
    pub fn get_mut(&mut self, source: &str) -> Result<&mut TableSession, AppError> {
        self.sessions
            .get_mut(source)
            .ok_or_else(|| AppError::InvalidArgument {
                message: format!("Source '{source}' is not among the input files"),
            })
    }
}

// ── Pool-level operation handlers ───────────────────────────────

/// Load a sheet and bind it as the active table for subsequent steps.
pub fn load_table(
    pool: &mut SessionPool,
    p: LoadTableParams,
) -> Result<(ActiveRef, OpOutput), AppError> {
    let session = pool.get_mut(&p.source)?;
    let sheet = session.activate(p.sheet.as_deref())?;
    let table = session.require_table()?.clone();
    let message = format!(
        "Loaded '{}' sheet '{sheet}' ({} rows, {} columns). It is now the active table",
        p.source,
        table.len(),
        table.columns().len()
    );
    Ok((
        ActiveRef {
            source: p.source,
            sheet,
        },
        OpOutput::table(message, table),
    ))
}

fn load_side(source: &str, sheet: &str) -> Result<Table, AppError> {
    let (_, table) = io::load_sheet(Path::new(source), Some(sheet))?;
    Ok(table)
}

fn require_member(pool: &SessionPool, source: &str) -> Result<(), AppError> {
    if pool.contains(source) {
        Ok(())
    } else {
        Err(AppError::InvalidArgument {
            message: format!("Source '{source}' is not among the input files"),
        })
    }
}

fn key_on_side(table: &Table, key: &str, source: &str, sheet: &str) -> Result<(), AppError> {
    if table.column_index(key).is_none() {
        return Err(AppError::UnknownColumn {
            columns: vec![format!("{key} (in '{source}' sheet '{sheet}')")],
        });
    }
    Ok(())
}

/// Join two sheets on a shared key. Both sides load independently of the
/// active session; on success the left side's session holds the merged
/// result and becomes active.
pub fn merge_tables(
    pool: &mut SessionPool,
    _active: Option<&ActiveRef>,
    p: MergeTablesParams,
) -> Result<(Option<ActiveRef>, OpOutput), AppError> {
    require_member(pool, &p.left_source)?;
    require_member(pool, &p.right_source)?;

    let left = load_side(&p.left_source, &p.left_sheet)?;
    let right = load_side(&p.right_source, &p.right_sheet)?;
    key_on_side(&left, &p.on_column, &p.left_source, &p.left_sheet)?;
    key_on_side(&right, &p.on_column, &p.right_source, &p.right_sheet)?;

    let merged = left.merge(&right, &p.on_column, p.how)?;
    let message = format!(
        "Merged '{}' sheet '{}' with '{}' sheet '{}' on '{}' ({} join, {} rows)",
        p.left_source,
        p.left_sheet,
        p.right_source,
        p.right_sheet,
        p.on_column,
        p.how.slug(),
        merged.len()
    );

    let session = pool.get_mut(&p.left_source)?;
    session.adopt(p.left_sheet.clone(), merged.clone());
    Ok((
        Some(ActiveRef {
            source: p.left_source,
            sheet: p.left_sheet,
        }),
        OpOutput::table(message, merged),
    ))
}

/// Stack two sheets vertically, top rows first. The top side's session
/// holds the result and becomes active.
pub fn concat_tables(
    pool: &mut SessionPool,
    _active: Option<&ActiveRef>,
    p: ConcatTablesParams,
) -> Result<(Option<ActiveRef>, OpOutput), AppError> {
    require_member(pool, &p.top_source)?;
    require_member(pool, &p.bottom_source)?;

    let top = load_side(&p.top_source, &p.top_sheet)?;
    let bottom = load_side(&p.bottom_source, &p.bottom_sheet)?;
    let stacked = top.concat(&bottom);
    let message = format!(
        "Concatenated '{}' sheet '{}' ({} rows) with '{}' sheet '{}' ({} rows): {} rows total",
        p.top_source,
        p.top_sheet,
        top.len(),
        p.bottom_source,
        p.bottom_sheet,
        bottom.len(),
        stacked.len()
    );

    let session = pool.get_mut(&p.top_source)?;
    session.adopt(p.top_sheet.clone(), stacked.clone());
    Ok((
        Some(ActiveRef {
            source: p.top_source,
            sheet: p.top_sheet,
        }),
        OpOutput::table(message, stacked),
    ))
}

/// Attach columns from a lookup sheet onto the active table, VLOOKUP-style.
/// Requires a pre-existing active session; the lookup source may be any
/// readable file and is loaded without disturbing any session state.
pub fn lookup_join(
    pool: &mut SessionPool,
    active: Option<&ActiveRef>,
    p: LookupJoinParams,
) -> Result<(Option<ActiveRef>, OpOutput), AppError> {
    let active = active.ok_or(AppError::NoActiveSession)?;
    ensure_not_empty(&p.columns_to_add, "columns_to_add")?;

    let lookup = load_side(&p.lookup_source, &p.lookup_sheet)?;
    key_on_side(&lookup, &p.lookup_on_column, &p.lookup_source, &p.lookup_sheet)?;
    ensure_columns(&lookup, &p.columns_to_add)?;

    let session = pool.get_mut(&active.source)?;
    let table = session.require_table()?;
    ensure_columns(table, &[p.on_column.as_str()])?;

    // Reduce the lookup table to key + requested columns, with its key
    // renamed to the active table's key name so the join drops it.
    let lookup_key = lookup
        .column_index(&p.lookup_on_column)
        .unwrap_or_default();
    let add_idx: Vec<usize> = p
        .columns_to_add
        .iter()
        .filter_map(|c| lookup.column_index(c))
        .collect();
    let mut columns = vec![p.on_column.clone()];
    columns.extend(p.columns_to_add.iter().cloned());
    let mut reduced = Table::new(columns);
    for row in lookup.rows() {
        let mut cells = vec![row.get(lookup_key).cloned().unwrap_or(Cell::Null)];
        cells.extend(
            add_idx
                .iter()
                .map(|&i| row.get(i).cloned().unwrap_or(Cell::Null)),
        );
        reduced.push_row(cells);
    }

    let joined = table.merge(&reduced, &p.on_column, p.how)?;
    let message = format!(
        "Added columns {:?} from '{}' sheet '{}' matching '{}' to '{}'",
        p.columns_to_add, p.lookup_source, p.lookup_sheet, p.lookup_on_column, p.on_column
    );
    session.replace(joined.clone());
    Ok((None, OpOutput::table(message, joined)))
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::indexing_slicing)]
mod tests {
    use super::*;
    use crate::registry::OpResult;
    use crate::table::JoinKind;
    use std::fs;
    use std::path::PathBuf;

    fn temp_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("tabula_pool_{name}"));
        let _ = fs::remove_dir_all(&dir);
        fs::create_dir_all(&dir).unwrap();
        dir
    }

    fn write(dir: &Path, name: &str, content: &str) -> String {
        let path = dir.join(name);
        fs::write(&path, content).unwrap();
        path.to_string_lossy().into_owned()
    }

    #[test]
    fn test_build_reports_unreadable_files_but_continues() {
        let dir = temp_dir("build");
        let good = write(&dir, "good.csv", "A,B\n1,2\n");
        let missing = dir.join("missing.csv").to_string_lossy().into_owned();

        let (pool, warnings) = SessionPool::build(&[good.clone(), missing]);
        assert!(pool.contains(&good));
        assert_eq!(pool.contexts().len(), 1);
        assert_eq!(warnings.len(), 1);
        assert!(matches!(warnings[0], AppError::ContextGathering { .. }));

        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_build_keeps_headerless_sheet_as_empty_schema() {
        let dir = temp_dir("headerless");
        let path = write(&dir, "book.json", r#"{"Empty": [], "Data": [{"A": 1}]}"#);

        let (pool, warnings) = SessionPool::build(&[path.clone()]);
        let ctx = &pool.contexts()[0];
        assert_eq!(ctx.sheets.len(), 2);
        assert!(ctx.sheets[0].columns.is_empty());
        assert_eq!(ctx.sheets[1].columns, vec!["A".to_string()]);
        assert_eq!(warnings.len(), 1);

        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_load_table_binds_active_ref() {
        let dir = temp_dir("load");
        let path = write(&dir, "sales.csv", "Region,Profit\nEast,100\n");
        let (mut pool, _) = SessionPool::build(&[path.clone()]);

        let (active, out) = load_table(
            &mut pool,
            LoadTableParams {
                source: path.clone(),
                sheet: None,
            },
        )
        .unwrap();
        assert_eq!(active.source, path);
        assert_eq!(active.sheet, "Sheet1");
        assert!(matches!(out.result, OpResult::Table(_)));

        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_load_unknown_source_fails_step() {
        let dir = temp_dir("unknown");
        let path = write(&dir, "sales.csv", "Region,Profit\nEast,100\n");
        let (mut pool, _) = SessionPool::build(&[path]);

        let err = load_table(
            &mut pool,
            LoadTableParams {
                source: "other.csv".into(),
                sheet: None,
            },
        )
        .unwrap_err();
        assert!(matches!(err, AppError::InvalidArgument { .. }));

        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_merge_materializes_into_left_session() {
        let dir = temp_dir("merge");
        let left = write(&dir, "orders.csv", "Id,Item\n1,pen\n2,ink\n");
        let right = write(&dir, "names.csv", "Id,Name\n1,Ada\n");
        let (mut pool, _) = SessionPool::build(&[left.clone(), right.clone()]);

        let (rebind, out) = merge_tables(
            &mut pool,
            None,
            MergeTablesParams {
                left_source: left.clone(),
                left_sheet: "Sheet1".into(),
                right_source: right,
                right_sheet: "Sheet1".into(),
                on_column: "Id".into(),
                how: JoinKind::Inner,
            },
        )
        .unwrap();

        let rebind = rebind.unwrap();
        assert_eq!(rebind.source, left);
        match out.result {
            OpResult::Table(t) => {
                assert_eq!(t.len(), 1);
                assert_eq!(t.columns(), &["Id".to_string(), "Item".to_string(), "Name".to_string()]);
            }
            other => panic!("expected a table, got {other:?}"),
        }
        // The left session now holds the merged result
        let session = pool.get(&left).unwrap();
        assert_eq!(session.table().unwrap().len(), 1);

        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_merge_key_errors_name_the_side() {
        let dir = temp_dir("merge_key");
        let left = write(&dir, "a.csv", "Id,Item\n1,pen\n");
        let right = write(&dir, "b.csv", "Key,Name\n1,Ada\n");
        let (mut pool, _) = SessionPool::build(&[left.clone(), right.clone()]);

        let err = merge_tables(
            &mut pool,
            None,
            MergeTablesParams {
                left_source: left,
                left_sheet: "Sheet1".into(),
                right_source: right.clone(),
                right_sheet: "Sheet1".into(),
                on_column: "Id".into(),
                how: JoinKind::Inner,
            },
        )
        .unwrap_err();
        match err {
            AppError::UnknownColumn { columns } => {
                assert!(columns[0].contains(&right));
            }
            other => panic!("unexpected error: {other:?}"),
        }

        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_concat_stacks_top_first() {
        let dir = temp_dir("concat");
        let q1 = write(&dir, "q1.csv", "Region,Profit\nEast,1\nWest,2\n");
        let q2 = write(&dir, "q2.csv", "Region,Profit\nNorth,3\n");
        let (mut pool, _) = SessionPool::build(&[q1.clone(), q2.clone()]);

        let (rebind, out) = concat_tables(
            &mut pool,
            None,
            ConcatTablesParams {
                top_source: q1.clone(),
                top_sheet: "Sheet1".into(),
                bottom_source: q2,
                bottom_sheet: "Sheet1".into(),
            },
        )
        .unwrap();
        assert_eq!(rebind.unwrap().source, q1);
        match out.result {
            OpResult::Table(t) => {
                assert_eq!(t.len(), 3);
                assert_eq!(t.rows()[0][0], Cell::Text("East".into()));
                assert_eq!(t.rows()[2][0], Cell::Text("North".into()));
            }
            other => panic!("expected a table, got {other:?}"),
        }

        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_lookup_requires_active_session() {
        let dir = temp_dir("lookup_active");
        let path = write(&dir, "sales.csv", "Product,Units\npen,4\n");
        let (mut pool, _) = SessionPool::build(&[path]);

        let err = lookup_join(
            &mut pool,
            None,
            LookupJoinParams {
                lookup_source: "prices.csv".into(),
                lookup_sheet: "Sheet1".into(),
                on_column: "Product".into(),
                lookup_on_column: "Product".into(),
                columns_to_add: vec!["Price".into()],
                how: JoinKind::Left,
            },
        )
        .unwrap_err();
        assert!(matches!(err, AppError::NoActiveSession));

        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_lookup_attaches_columns_left_join() {
        let dir = temp_dir("lookup");
        let sales = write(&dir, "sales.csv", "Product,Units\npen,4\nink,2\n");
        let prices = write(&dir, "prices.csv", "Item,Price\npen,1.5\n");
        let (mut pool, _) = SessionPool::build(&[sales.clone()]);

        let (active, _) = load_table(
            &mut pool,
            LoadTableParams {
                source: sales.clone(),
                sheet: None,
            },
        )
        .unwrap();

        let (rebind, out) = lookup_join(
            &mut pool,
            Some(&active),
            LookupJoinParams {
                lookup_source: prices,
                lookup_sheet: "Sheet1".into(),
                on_column: "Product".into(),
                lookup_on_column: "Item".into(),
                columns_to_add: vec!["Price".into()],
                how: JoinKind::Left,
            },
        )
        .unwrap();
        assert!(rebind.is_none());
        match out.result {
            OpResult::Table(t) => {
                assert_eq!(t.columns(), &["Product".to_string(), "Units".to_string(), "Price".to_string()]);
                assert_eq!(t.rows()[0][2], Cell::Number(1.5));
                assert_eq!(t.rows()[1][2], Cell::Null);
            }
            other => panic!("expected a table, got {other:?}"),
        }

        let _ = fs::remove_dir_all(&dir);
    }
}
