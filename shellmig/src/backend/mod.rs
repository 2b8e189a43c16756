//! Storage backends.
//!
//! Each backend is at once the version store, the lock handle and the schema
//! reset for one target, and owns the single connection all three share:
//! - `PostgresBackend` - single-row table plus `pg_advisory_lock`
//! - `RedisBackend` - hash item plus a lease lock woken through `BLPOP`
//! - `MemoryBackend` - in-process target for tests and dry runs

pub mod memory;
pub mod postgres;
pub mod redis;

pub use memory::MemoryBackend;
pub use postgres::PostgresBackend;
pub use self::redis::RedisBackend;

use crate::{errors::Result, types::VersionRecord};

/// Contract every storage strategy fulfils.
#[allow(async_fn_in_trait)]
pub trait Backend {
    /// Whether this handle currently believes it holds the lock.
    fn is_locked(&self) -> bool;

    /// Blocks until the target's lock is granted.
    ///
    /// Fails with [`DriverError::Locked`](crate::DriverError::Locked) without
    /// blocking when this handle already holds it.
    async fn lock(&mut self) -> Result<()>;

    /// Releases the lock; a no-op when it is not held.
    async fn unlock(&mut self) -> Result<()>;

    /// Current record, or [`VersionRecord::NIL`] when nothing is stored.
    async fn version(&mut self) -> Result<VersionRecord>;

    /// Atomically replaces the stored record.
    async fn set_version(&mut self, record: VersionRecord) -> Result<()>;

    /// Destroys every table (or key) of the target, one at a time.
    async fn drop_all(&mut self) -> Result<()>;

    /// Releases the connection.
    async fn close(self) -> Result<()>;
}
