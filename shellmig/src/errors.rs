use std::borrow::Cow;
use std::path::PathBuf;
use std::process::ExitStatus;
use std::time::Duration;

use thiserror::Error;

/// Convenience alias used throughout the driver.
pub type Result<T> = std::result::Result<T, DriverError>;

/// Top-level error type returned by migration drivers.
#[derive(Debug, Error)]
pub enum DriverError {
    /// Malformed connection string or option value.
    #[error("configuration error: {message}")]
    Config { message: Cow<'static, str> },

    /// Connection string scheme does not name a known backend.
    #[error("unknown driver scheme `{scheme}`")]
    UnknownScheme { scheme: String },

    /// Backend could not be reached or did not answer a ping.
    #[error("failed to connect to {backend}: {source}")]
    Connect {
        backend: &'static str,
        source: BackendError,
    },

    #[error("no database name")]
    NoDatabaseName,

    #[error("no schema")]
    NoSchema,

    /// Lock requested on a handle that already holds it.
    #[error("can't acquire lock: already locked")]
    Locked,

    /// The lease behind a held lock lapsed and another holder may have taken it.
    #[error("lock {key} was lost before it was released")]
    LockLost { key: String },

    /// Versions below the nil sentinel cannot be recorded.
    #[error("invalid version {version}")]
    InvalidVersion { version: i64 },

    /// Version store exists but a field is missing or has the wrong type.
    #[error("schema corruption: field `{field}` is missing or not of type {expected}")]
    SchemaCorruption { field: String, expected: &'static str },

    /// Executable migration failed.
    #[error(transparent)]
    Run(#[from] RunError),

    /// Reading or writing the version store failed.
    ///
    /// `operation` is the failing query, or a short description when no single
    /// query applies. Failures of follow-up cleanup (rollback, unlock) are kept
    /// in `cleanup` instead of being dropped.
    #[error("{operation}: {source}{}", render_cleanup(.cleanup))]
    Persistence {
        operation: Cow<'static, str>,
        source: BackendError,
        cleanup: Vec<DriverError>,
    },
}

impl DriverError {
    pub fn config(message: impl Into<Cow<'static, str>>) -> Self {
        Self::Config { message: message.into() }
    }

    pub(crate) fn persistence(operation: impl Into<Cow<'static, str>>, source: impl Into<BackendError>) -> Self {
        Self::Persistence {
            operation: operation.into(),
            source: source.into(),
            cleanup: Vec::new(),
        }
    }

    /// Attaches a cleanup failure to this error.
    ///
    /// Persistence errors collect it in place; any other error is wrapped so
    /// neither failure is lost.
    pub(crate) fn with_cleanup(self, failure: DriverError) -> Self {
        match self {
            Self::Persistence {
                operation,
                source,
                mut cleanup,
            } => {
                cleanup.push(failure);
                Self::Persistence {
                    operation,
                    source,
                    cleanup,
                }
            }
            other => Self::Persistence {
                operation: Cow::Owned(other.to_string()),
                source: BackendError::Cleanup,
                cleanup: vec![failure],
            },
        }
    }

    pub fn is_locked(&self) -> bool {
        matches!(self, Self::Locked)
    }
}

fn render_cleanup(cleanup: &[DriverError]) -> String {
    if cleanup.is_empty() {
        return String::new();
    }
    let joined = cleanup.iter().map(ToString::to_string).collect::<Vec<_>>().join("; ");
    format!(" (cleanup also failed: {joined})")
}

/// Error reported by the storage backend underneath a driver.
#[derive(Debug, Error)]
pub enum BackendError {
    #[error("postgres error: {0}")]
    Postgres(#[from] sqlx::Error),

    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),

    /// In-process target rejected the operation.
    #[error("{0}")]
    Memory(Cow<'static, str>),

    /// Placeholder source for a failure that is only described by its cleanup list.
    #[error("operation failed")]
    Cleanup,
}

/// Failure of an executable migration.
#[derive(Debug, Error)]
pub enum RunError {
    /// Reading the payload or staging it on disk failed.
    #[error("failed to stage migration: {0}")]
    Stage(#[source] std::io::Error),

    /// The staged executable could not be started.
    #[error("failed to launch migration {}: {source}", .path.display())]
    Launch { path: PathBuf, source: std::io::Error },

    /// Waiting on or terminating the child failed.
    #[error("failed to supervise migration process: {0}")]
    Wait(#[source] std::io::Error),

    /// The child exited unsuccessfully.
    #[error("migration exited unsuccessfully ({status})")]
    Exit { code: Option<i32>, status: ExitStatus },

    /// The child outlived the run timeout and was killed.
    #[error("migration exceeded run timeout of {limit:?}")]
    Timeout { limit: Duration },
}

impl RunError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }

    /// Exit code of the child, when it exited on its own.
    pub fn exit_code(&self) -> Option<i32> {
        match self {
            Self::Exit { code, .. } => *code,
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn persistence_error_names_operation() {
        let err = DriverError::persistence("TRUNCATE \"schema_migrations\"", BackendError::Memory("boom".into()));
        assert_eq!(err.to_string(), "TRUNCATE \"schema_migrations\": boom");
    }

    #[test]
    fn cleanup_failures_are_aggregated() {
        let err = DriverError::persistence("INSERT", BackendError::Memory("insert failed".into()))
            .with_cleanup(DriverError::persistence("ROLLBACK", BackendError::Memory("rollback failed".into())));
        let rendered = err.to_string();
        assert!(rendered.starts_with("INSERT: insert failed"));
        assert!(rendered.contains("cleanup also failed: ROLLBACK: rollback failed"));
    }

    #[test]
    fn cleanup_on_non_persistence_error_keeps_both() {
        let err = DriverError::Locked.with_cleanup(DriverError::NoSchema);
        let rendered = err.to_string();
        assert!(rendered.contains("already locked"));
        assert!(rendered.contains("no schema"));
    }

    #[test]
    fn run_error_kinds_are_distinct() {
        let timeout = RunError::Timeout {
            limit: Duration::from_millis(50),
        };
        assert!(timeout.is_timeout());
        assert_eq!(timeout.exit_code(), None);
    }
}
