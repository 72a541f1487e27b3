//! Shared validation helpers for operation handlers.
//!
//! Centralizes the common checks (referenced columns exist, selections are
//! non-empty) so every handler produces consistent error messages.

use crate::error::AppError;
use crate::table::Table;

/// Validate that every name in `columns` exists in `table`. The error names
/// all missing columns, not just the first.
pub fn ensure_columns<S: AsRef<str>>(table: &Table, columns: &[S]) -> Result<(), AppError> {
    let missing = table.missing_columns(columns);
    if missing.is_empty() {
        Ok(())
    } else {
        Err(AppError::UnknownColumn { columns: missing })
    }
}

/// Validate that a list argument is non-empty.
pub fn ensure_not_empty<T>(items: &[T], what: &str) -> Result<(), AppError> {
    if items.is_empty() {
        Err(AppError::InvalidArgument {
            message: format!("{what} must not be empty"),
        })
    } else {
        Ok(())
    }
}

/// Validate that a count argument is positive.
pub fn ensure_positive(value: usize, what: &str) -> Result<(), AppError> {
    if value == 0 {
        Err(AppError::InvalidArgument {
            message: format!("{what} must be positive"),
        })
    } else {
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::table::Table;

    #[test]
    fn test_ensure_columns_reports_all_missing() {
        let table = Table::new(vec!["A".into()]);
        let err = ensure_columns(&table, &["A", "B", "C"]).unwrap_err();
        match err {
            AppError::UnknownColumn { columns } => {
                assert_eq!(columns, vec!["B".to_string(), "C".to_string()]);
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_ensure_not_empty() {
        assert!(ensure_not_empty(&[1], "columns").is_ok());
        assert!(ensure_not_empty::<i32>(&[], "columns").is_err());
    }
}
