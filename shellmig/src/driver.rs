//! Driver facade.
//!
//! A driver composes one [`Backend`] with an [`ExecutableRunner`] and walks
//! the lifecycle `open -> lock -> version -> run -> set_version -> unlock -> close`.

use log::{debug, warn};
use tokio::io::AsyncRead;

use crate::{
    backend::{Backend, MemoryBackend, PostgresBackend, RedisBackend},
    config::{BackendKind, ConnectionSpec, DriverConfig},
    errors::{DriverError, Result},
    runtime::ExecutableRunner,
    types::{NIL_VERSION, VersionRecord},
};

/// Operations a migration framework needs from a driver.
#[allow(async_fn_in_trait)]
pub trait Driver {
    /// Blocks until the target's lock is granted.
    async fn lock(&mut self) -> Result<()>;

    /// Releases the lock; a no-op when it is not held.
    async fn unlock(&mut self) -> Result<()>;

    /// Stages `migration` as an executable and runs it to completion.
    ///
    /// Never touches the version store.
    async fn run<R>(&mut self, migration: R) -> Result<()>
    where
        R: AsyncRead + Unpin;

    /// Replaces the stored record with `(version, dirty)`.
    async fn set_version(&mut self, version: i64, dirty: bool) -> Result<()>;

    async fn version(&mut self) -> Result<VersionRecord>;

    /// Destroys every table (or key) of the target.
    async fn drop_all(&mut self) -> Result<()>;

    /// Releases the connection. A held lock is not released first.
    async fn close(self) -> Result<()>;
}

/// A backend paired with the runner configured for it.
pub struct Migrator<B: Backend> {
    backend: B,
    runner: ExecutableRunner,
}

impl<B: Backend> Migrator<B> {
    pub fn new(backend: B, runner: ExecutableRunner) -> Self {
        Self { backend, runner }
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn backend_mut(&mut self) -> &mut B {
        &mut self.backend
    }

    pub fn runner(&self) -> &ExecutableRunner {
        &self.runner
    }

    pub fn is_locked(&self) -> bool {
        self.backend.is_locked()
    }
}

impl<B: Backend> Driver for Migrator<B> {
    async fn lock(&mut self) -> Result<()> {
        self.backend.lock().await
    }

    async fn unlock(&mut self) -> Result<()> {
        self.backend.unlock().await
    }

    async fn run<R>(&mut self, migration: R) -> Result<()>
    where
        R: AsyncRead + Unpin,
    {
        self.runner.run(migration).await.map_err(DriverError::from)
    }

    async fn set_version(&mut self, version: i64, dirty: bool) -> Result<()> {
        if version < NIL_VERSION {
            return Err(DriverError::InvalidVersion { version });
        }
        self.backend.set_version(VersionRecord::new(version, dirty)).await
    }

    async fn version(&mut self) -> Result<VersionRecord> {
        self.backend.version().await
    }

    async fn drop_all(&mut self) -> Result<()> {
        self.backend.drop_all().await
    }

    async fn close(self) -> Result<()> {
        if self.backend.is_locked() {
            warn!("closing driver while still holding its lock");
        }
        self.backend.close().await
    }
}

pub type PostgresDriver = Migrator<PostgresBackend>;
pub type RedisDriver = Migrator<RedisBackend>;
pub type MemoryDriver = Migrator<MemoryBackend>;

impl PostgresDriver {
    pub async fn connect(dsn: &str, config: DriverConfig) -> Result<Self> {
        let runner = ExecutableRunner::from_config(&config);
        Ok(Self::new(PostgresBackend::connect(dsn, config).await?, runner))
    }
}

impl RedisDriver {
    pub async fn connect(redis_url: &str, config: DriverConfig) -> Result<Self> {
        let runner = ExecutableRunner::from_config(&config);
        Ok(Self::new(RedisBackend::connect(redis_url, config).await?, runner))
    }
}

impl MemoryDriver {
    pub async fn connect(config: DriverConfig) -> Result<Self> {
        let runner = ExecutableRunner::from_config(&config);
        Ok(Self::new(MemoryBackend::connect(config).await?, runner))
    }
}

/// Driver for whichever backend a connection string selects.
pub enum AnyDriver {
    Postgres(PostgresDriver),
    Redis(RedisDriver),
    Memory(MemoryDriver),
}

/// Opens a driver for `url`, choosing the backend by scheme.
pub async fn open(url: &str) -> Result<AnyDriver> {
    let spec = ConnectionSpec::parse(url)?;
    debug!("opening {} driver", spec.kind.name());

    let driver = match spec.kind {
        BackendKind::Postgres => AnyDriver::Postgres(PostgresDriver::connect(&spec.backend_url, spec.config).await?),
        BackendKind::Redis => AnyDriver::Redis(RedisDriver::connect(&spec.backend_url, spec.config).await?),
        BackendKind::Memory => AnyDriver::Memory(MemoryDriver::connect(spec.config).await?),
    };
    Ok(driver)
}

macro_rules! dispatch {
    ($driver:expr, $inner:ident => $body:expr) => {
        match $driver {
            AnyDriver::Postgres($inner) => $body,
            AnyDriver::Redis($inner) => $body,
            AnyDriver::Memory($inner) => $body,
        }
    };
}

impl AnyDriver {
    pub fn kind(&self) -> BackendKind {
        match self {
            Self::Postgres(_) => BackendKind::Postgres,
            Self::Redis(_) => BackendKind::Redis,
            Self::Memory(_) => BackendKind::Memory,
        }
    }

    /// Options in effect after the backend filled in database and schema names.
    pub fn config(&self) -> &DriverConfig {
        dispatch!(self, driver => driver.backend().config())
    }

    pub fn is_locked(&self) -> bool {
        dispatch!(self, driver => driver.is_locked())
    }
}

impl Driver for AnyDriver {
    async fn lock(&mut self) -> Result<()> {
        dispatch!(self, driver => driver.lock().await)
    }

    async fn unlock(&mut self) -> Result<()> {
        dispatch!(self, driver => driver.unlock().await)
    }

    async fn run<R>(&mut self, migration: R) -> Result<()>
    where
        R: AsyncRead + Unpin,
    {
        dispatch!(self, driver => driver.run(migration).await)
    }

    async fn set_version(&mut self, version: i64, dirty: bool) -> Result<()> {
        dispatch!(self, driver => driver.set_version(version, dirty).await)
    }

    async fn version(&mut self) -> Result<VersionRecord> {
        dispatch!(self, driver => driver.version().await)
    }

    async fn drop_all(&mut self) -> Result<()> {
        dispatch!(self, driver => driver.drop_all().await)
    }

    async fn close(self) -> Result<()> {
        dispatch!(self, driver => driver.close().await)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn rejects_versions_below_nil() {
        let mut driver = open("shell-memory:///driver_invalid_version").await.unwrap();
        let err = driver.set_version(-2, false).await.unwrap_err();
        assert!(matches!(err, DriverError::InvalidVersion { version: -2 }));
        assert_eq!(driver.version().await.unwrap(), VersionRecord::NIL);
    }

    #[tokio::test]
    async fn open_selects_backend_by_scheme() {
        let driver = open("shell-memory:///driver_scheme?x-schema=billing").await.unwrap();
        assert_eq!(driver.kind(), BackendKind::Memory);
        assert_eq!(driver.config().database_name, "driver_scheme");
        assert_eq!(driver.config().schema_name, "billing");
    }

    #[tokio::test]
    async fn open_rejects_unknown_scheme() {
        let err = open("mysql://localhost/app").await.err().unwrap();
        assert!(matches!(err, DriverError::UnknownScheme { ref scheme } if scheme == "mysql"));
    }

    #[tokio::test]
    async fn close_while_locked_succeeds() {
        let mut driver = open("shell-memory:///driver_close_locked").await.unwrap();
        driver.lock().await.unwrap();
        driver.close().await.unwrap();
    }
}
