//! In-process backend.
//!
//! Targets live in a process-wide map keyed by `(database, schema)`, created
//! on first use, so independent drivers opened with the same names share one
//! target and compete for one lock.

use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock, PoisonError};

use log::{debug, info};
use tokio::sync::OwnedMutexGuard;

use crate::{
    backend::Backend,
    config::{DEFAULT_NAMESPACE, DriverConfig},
    errors::{BackendError, DriverError, Result},
    types::VersionRecord,
};

pub const DEFAULT_DATABASE: &str = "default";

#[derive(Debug, Clone, Hash, PartialEq, Eq)]
struct TargetKey {
    database: String,
    schema: String,
}

#[derive(Debug, Default)]
struct TargetState {
    tables: BTreeSet<String>,
    /// Row of the version table; only meaningful while that table exists.
    record: Option<VersionRecord>,
}

#[derive(Debug, Default)]
struct MemoryTarget {
    state: Mutex<TargetState>,
    lock: Arc<tokio::sync::Mutex<()>>,
}

static TARGETS: OnceLock<Mutex<HashMap<TargetKey, Arc<MemoryTarget>>>> = OnceLock::new();

fn targets() -> &'static Mutex<HashMap<TargetKey, Arc<MemoryTarget>>> {
    TARGETS.get_or_init(|| Mutex::new(HashMap::new()))
}

fn target(key: TargetKey) -> Arc<MemoryTarget> {
    let mut targets = targets().lock().unwrap_or_else(PoisonError::into_inner);
    Arc::clone(targets.entry(key).or_default())
}

/// Version store, lock handle and schema reset for one in-process target.
pub struct MemoryBackend {
    target: Arc<MemoryTarget>,
    config: DriverConfig,
    guard: Option<OwnedMutexGuard<()>>,
}

impl MemoryBackend {
    pub async fn connect(mut config: DriverConfig) -> Result<Self> {
        if config.database_name.is_empty() {
            config.database_name = DEFAULT_DATABASE.to_string();
        }
        if config.schema_name.is_empty() {
            config.schema_name = DEFAULT_NAMESPACE.to_string();
        }

        let target = target(TargetKey {
            database: config.database_name.clone(),
            schema: config.schema_name.clone(),
        });
        let mut backend = Self {
            target,
            config,
            guard: None,
        };
        backend.ensure_version_table().await?;
        Ok(backend)
    }

    pub fn config(&self) -> &DriverConfig {
        &self.config
    }

    /// Creates a table in the target; existing tables are left alone.
    pub fn create_table(&self, name: impl Into<String>) {
        self.state().tables.insert(name.into());
    }

    /// Names of every table currently in the target.
    pub fn tables(&self) -> Vec<String> {
        self.state().tables.iter().cloned().collect()
    }

    fn state(&self) -> MutexGuard<'_, TargetState> {
        self.target.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    async fn ensure_version_table(&mut self) -> Result<()> {
        self.lock().await?;
        self.create_table(self.config.migrations_table.clone());
        self.unlock().await
    }
}

impl Backend for MemoryBackend {
    fn is_locked(&self) -> bool {
        self.guard.is_some()
    }

    async fn lock(&mut self) -> Result<()> {
        if self.guard.is_some() {
            return Err(DriverError::Locked);
        }
        debug!("waiting for lock on {}/{}", self.config.database_name, self.config.schema_name);
        let guard = Arc::clone(&self.target.lock).lock_owned().await;
        self.guard = Some(guard);
        Ok(())
    }

    async fn unlock(&mut self) -> Result<()> {
        self.guard = None;
        Ok(())
    }

    async fn version(&mut self) -> Result<VersionRecord> {
        let state = self.state();
        if !state.tables.contains(&self.config.migrations_table) {
            return Ok(VersionRecord::NIL);
        }
        Ok(state.record.unwrap_or(VersionRecord::NIL))
    }

    async fn set_version(&mut self, record: VersionRecord) -> Result<()> {
        let table = self.config.migrations_table.clone();
        let mut state = self.state();
        if !state.tables.contains(&table) {
            return Err(DriverError::persistence(
                format!("TRUNCATE {table}"),
                BackendError::Memory(format!("relation \"{table}\" does not exist").into()),
            ));
        }
        state.record = record.should_persist().then_some(record);
        drop(state);

        info!("recorded version {} (dirty: {})", record.version, record.dirty);
        Ok(())
    }

    async fn drop_all(&mut self) -> Result<()> {
        let mut state = self.state();
        let tables = std::mem::take(&mut state.tables);
        for table in &tables {
            if *table == self.config.migrations_table {
                state.record = None;
            }
            debug!("dropped table {table}");
        }
        Ok(())
    }

    async fn close(self) -> Result<()> {
        Ok(())
    }
}
