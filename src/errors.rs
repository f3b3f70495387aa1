use serde::Serialize;
use std::fmt;

/// Error taxonomy exposed to callers of the engine, matching the kinds an
/// HTTP transport maps to status codes (see `crate::http`).
#[derive(Debug, Serialize, Clone)]
#[serde(tag = "type", content = "data")]
pub enum CoreError {
    /// Unknown session/issue/project id. Surfaced as 404.
    NotFound { entity: String, id: String },
    /// Bad input shape or missing required field. Surfaced as 400.
    Validation { field: String, message: String },
    /// State-machine violation: close of a terminal session, duplicate
    /// live branch, etc. Surfaced as 409.
    Conflict { message: String },
    /// Worktree missing, dirty, or otherwise not ready for the requested
    /// operation. Surfaced as 400 with `warnings`.
    Precondition { message: String, warnings: Vec<String> },
    /// Git reported a conflict during Sync/Merge. Captured on the session,
    /// not surfaced as an HTTP error — callers get 200 with the conflict
    /// payload attached.
    ConflictMerge { files: Vec<String>, message: String },
    /// GitAdapter/WorktreeAdapter/ProcessDetector failure. Surfaced as 500;
    /// session state is left in its prior status and `last_error` is
    /// populated by the caller.
    External { operation: String, message: String },
    /// Persistence-layer failure not otherwise classified.
    Database { message: String },
}

impl CoreError {
    pub fn not_found(entity: &str, id: impl ToString) -> Self {
        CoreError::NotFound {
            entity: entity.to_string(),
            id: id.to_string(),
        }
    }

    pub fn validation(field: &str, message: impl ToString) -> Self {
        CoreError::Validation {
            field: field.to_string(),
            message: message.to_string(),
        }
    }

    pub fn conflict(message: impl ToString) -> Self {
        CoreError::Conflict {
            message: message.to_string(),
        }
    }

    pub fn precondition(message: impl ToString, warnings: Vec<String>) -> Self {
        CoreError::Precondition {
            message: message.to_string(),
            warnings,
        }
    }

    pub fn external(operation: &str, error: impl ToString) -> Self {
        CoreError::External {
            operation: operation.to_string(),
            message: error.to_string(),
        }
    }

    pub fn database(error: impl ToString) -> Self {
        CoreError::Database {
            message: error.to_string(),
        }
    }

    /// Best-effort classification of an opaque store error into
    /// `NotFound`/`Database`, mirroring the teacher's
    /// `SchaltError::from_session_lookup`.
    pub fn from_store_lookup(entity: &str, id: &str, error: impl ToString) -> Self {
        let message = error.to_string();
        let normalized = message.to_lowercase();
        if normalized.contains("query returned no rows") || normalized.contains("not found") {
            CoreError::not_found(entity, id)
        } else {
            CoreError::database(message)
        }
    }

    /// HTTP status code this error maps to, per spec.md §7.
    pub fn status_code(&self) -> u16 {
        match self {
            CoreError::NotFound { .. } => 404,
            CoreError::Validation { .. } => 400,
            CoreError::Conflict { .. } => 409,
            CoreError::Precondition { .. } => 400,
            CoreError::ConflictMerge { .. } => 200,
            CoreError::External { .. } => 500,
            CoreError::Database { .. } => 500,
        }
    }
}

impl fmt::Display for CoreError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::NotFound { entity, id } => write!(f, "{entity} '{id}' not found"),
            Self::Validation { field, message } => {
                write!(f, "Invalid input for field '{field}': {message}")
            }
            Self::Conflict { message } => write!(f, "{message}"),
            Self::Precondition { message, warnings } => {
                if warnings.is_empty() {
                    write!(f, "{message}")
                } else {
                    write!(f, "{message} ({})", warnings.join("; "))
                }
            }
            Self::ConflictMerge { files, message } => {
                write!(f, "Conflict in {} file(s): {message}", files.len())
            }
            Self::External { operation, message } => {
                write!(f, "'{operation}' failed: {message}")
            }
            Self::Database { message } => write!(f, "Database error: {message}"),
        }
    }
}

impl std::error::Error for CoreError {}

impl From<CoreError> for String {
    fn from(error: CoreError) -> Self {
        error.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_codes_match_spec_taxonomy() {
        assert_eq!(CoreError::not_found("Session", "s1").status_code(), 404);
        assert_eq!(CoreError::validation("issue_ids", "empty").status_code(), 400);
        assert_eq!(CoreError::conflict("dup").status_code(), 409);
        assert_eq!(
            CoreError::precondition("dirty", vec![]).status_code(),
            400
        );
        assert_eq!(
            CoreError::external("git fetch", "timeout").status_code(),
            500
        );
        assert_eq!(
            (CoreError::ConflictMerge {
                files: vec!["a.rs".into()],
                message: "conflict".into()
            })
            .status_code(),
            200
        );
    }

    #[test]
    fn from_store_lookup_classifies_missing_rows() {
        let err = CoreError::from_store_lookup("Session", "abc", "Query returned no rows");
        assert!(matches!(err, CoreError::NotFound { .. }));

        let err = CoreError::from_store_lookup("Session", "abc", "disk I/O error");
        assert!(matches!(err, CoreError::Database { .. }));
    }
}
