//! Connection-string parsing.
//!
//! A driver URL names the backend with its scheme and carries every driver
//! option in its query string:
//!
//! ```text
//! shell://localhost/app?x-postgres-dsn=postgres%3A%2F%2Flocalhost%2Fapp&x-run-timeout=60000
//! shell-redis:///0?x-redis-url=redis%3A%2F%2F127.0.0.1%2F0&x-schema=billing
//! shell-memory:///scratch
//! ```

use std::time::Duration;

use url::Url;

use crate::errors::{DriverError, Result};

pub const DEFAULT_MIGRATIONS_TABLE: &str = "schema_migrations";
/// Namespace used by key-value backends when none is configured.
pub const DEFAULT_NAMESPACE: &str = "migrate";
pub const DEFAULT_LOCK_LEASE: Duration = Duration::from_secs(15);

/// Storage strategy selected by the URL scheme.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
    Postgres,
    Redis,
    Memory,
}

impl BackendKind {
    pub fn from_scheme(scheme: &str) -> Option<Self> {
        match scheme {
            "shell" | "shell-postgres" => Some(Self::Postgres),
            "shell-redis" => Some(Self::Redis),
            "shell-memory" => Some(Self::Memory),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Postgres => "postgres",
            Self::Redis => "redis",
            Self::Memory => "memory",
        }
    }
}

/// Options shared by every backend.
#[derive(Debug, Clone, PartialEq)]
pub struct DriverConfig {
    /// Version table (relational) or version item (key-value) name.
    pub migrations_table: String,
    /// Empty means "ask the backend".
    pub database_name: String,
    /// Empty means "ask the backend" (postgres) or [`DEFAULT_NAMESPACE`].
    pub schema_name: String,
    pub statement_timeout: Option<Duration>,
    pub run_timeout: Option<Duration>,
    pub verbose: bool,
    pub lock_lease: Duration,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            migrations_table: DEFAULT_MIGRATIONS_TABLE.to_string(),
            database_name: String::new(),
            schema_name: String::new(),
            statement_timeout: None,
            run_timeout: None,
            verbose: true,
            lock_lease: DEFAULT_LOCK_LEASE,
        }
    }
}

impl DriverConfig {
    pub fn with_migrations_table(mut self, table: impl Into<String>) -> Self {
        self.migrations_table = table.into();
        self
    }

    pub fn with_database_name(mut self, name: impl Into<String>) -> Self {
        self.database_name = name.into();
        self
    }

    pub fn with_schema_name(mut self, name: impl Into<String>) -> Self {
        self.schema_name = name.into();
        self
    }

    pub fn with_statement_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.statement_timeout = timeout.filter(|t| !t.is_zero());
        self
    }

    pub fn with_run_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.run_timeout = timeout.filter(|t| !t.is_zero());
        self
    }

    pub fn with_verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    pub fn with_lock_lease(mut self, lease: Duration) -> Self {
        self.lock_lease = lease;
        self
    }
}

/// A fully parsed driver URL.
#[derive(Debug, Clone, PartialEq)]
pub struct ConnectionSpec {
    pub kind: BackendKind,
    /// Backend connection string, passed through verbatim. Empty for memory targets.
    pub backend_url: String,
    pub config: DriverConfig,
}

impl ConnectionSpec {
    pub fn parse(raw: &str) -> Result<Self> {
        let url = Url::parse(raw).map_err(|err| DriverError::config(format!("invalid connection string: {err}")))?;

        let kind = BackendKind::from_scheme(url.scheme()).ok_or_else(|| DriverError::UnknownScheme {
            scheme: url.scheme().to_string(),
        })?;

        let mut config = DriverConfig::default()
            .with_database_name(url.path().trim_start_matches('/'));
        let mut backend_url = String::new();

        for (key, value) in url.query_pairs() {
            match key.as_ref() {
                "x-postgres-dsn" if kind == BackendKind::Postgres => backend_url = value.into_owned(),
                "x-redis-url" if kind == BackendKind::Redis => backend_url = value.into_owned(),
                "x-migrations-table" => {
                    if !value.is_empty() {
                        config.migrations_table = value.into_owned();
                    }
                }
                "x-schema" => config.schema_name = value.into_owned(),
                "x-statement-timeout" => {
                    config = config.with_statement_timeout(parse_millis(&key, &value)?);
                }
                "x-run-timeout" => config = config.with_run_timeout(parse_millis(&key, &value)?),
                "x-verbose" => config.verbose = parse_flag(&key, &value)?,
                "x-lock-lease" => {
                    let lease = parse_millis(&key, &value)?
                        .ok_or_else(|| DriverError::config("x-lock-lease must be positive"))?;
                    config.lock_lease = lease;
                }
                // Unknown options belong to the host framework.
                _ => {}
            }
        }

        match kind {
            BackendKind::Postgres if backend_url.is_empty() => {
                return Err(DriverError::config("x-postgres-dsn is required"));
            }
            BackendKind::Redis if backend_url.is_empty() => {
                return Err(DriverError::config("x-redis-url is required"));
            }
            _ => {}
        }

        Ok(Self {
            kind,
            backend_url,
            config,
        })
    }
}

/// Parses a millisecond count; zero or empty means "unset".
fn parse_millis(key: &str, value: &str) -> Result<Option<Duration>> {
    if value.is_empty() {
        return Ok(None);
    }
    let millis: u64 = value
        .parse()
        .map_err(|err| DriverError::config(format!("{key} must be a whole number of milliseconds: {err}")))?;
    Ok(Some(Duration::from_millis(millis)).filter(|d| !d.is_zero()))
}

fn parse_flag(key: &str, value: &str) -> Result<bool> {
    match value.to_ascii_lowercase().as_str() {
        "" | "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => Err(DriverError::config(format!("{key} must be a boolean, got `{other}`"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_postgres_url_with_all_options() {
        let spec = ConnectionSpec::parse(
            "shell://localhost/app?x-postgres-dsn=postgres%3A%2F%2Fu%3Ap%40db%2Fapp\
             &x-migrations-table=versions&x-statement-timeout=1500&x-run-timeout=60000&x-verbose=false",
        )
        .unwrap();

        assert_eq!(spec.kind, BackendKind::Postgres);
        assert_eq!(spec.backend_url, "postgres://u:p@db/app");
        assert_eq!(spec.config.database_name, "app");
        assert_eq!(spec.config.migrations_table, "versions");
        assert_eq!(spec.config.statement_timeout, Some(Duration::from_millis(1500)));
        assert_eq!(spec.config.run_timeout, Some(Duration::from_secs(60)));
        assert!(!spec.config.verbose);
    }

    #[test]
    fn defaults_apply_when_options_are_absent() {
        let spec = ConnectionSpec::parse("shell-postgres://localhost?x-postgres-dsn=postgres://db").unwrap();
        assert_eq!(spec.config.migrations_table, DEFAULT_MIGRATIONS_TABLE);
        assert_eq!(spec.config.database_name, "");
        assert_eq!(spec.config.run_timeout, None);
        assert!(spec.config.verbose);
        assert_eq!(spec.config.lock_lease, DEFAULT_LOCK_LEASE);
    }

    #[test]
    fn zero_run_timeout_means_unbounded() {
        let spec = ConnectionSpec::parse("shell-memory:///db?x-run-timeout=0").unwrap();
        assert_eq!(spec.config.run_timeout, None);
    }

    #[test]
    fn parses_redis_url() {
        let spec =
            ConnectionSpec::parse("shell-redis:///0?x-redis-url=redis://127.0.0.1/0&x-schema=billing&x-lock-lease=5000")
                .unwrap();
        assert_eq!(spec.kind, BackendKind::Redis);
        assert_eq!(spec.backend_url, "redis://127.0.0.1/0");
        assert_eq!(spec.config.schema_name, "billing");
        assert_eq!(spec.config.lock_lease, Duration::from_secs(5));
    }

    #[test]
    fn rejects_unknown_scheme() {
        let err = ConnectionSpec::parse("mysql://localhost/app").unwrap_err();
        assert!(matches!(err, DriverError::UnknownScheme { scheme } if scheme == "mysql"));
    }

    #[test]
    fn rejects_missing_dsn() {
        let err = ConnectionSpec::parse("shell://localhost/app").unwrap_err();
        assert!(matches!(err, DriverError::Config { .. }));
    }

    #[test]
    fn rejects_unparsable_values() {
        assert!(ConnectionSpec::parse("shell-memory:///db?x-run-timeout=soon").is_err());
        assert!(ConnectionSpec::parse("shell-memory:///db?x-verbose=maybe").is_err());
        assert!(ConnectionSpec::parse("shell-memory:///db?x-lock-lease=0").is_err());
        assert!(ConnectionSpec::parse("not a url").is_err());
    }
}
