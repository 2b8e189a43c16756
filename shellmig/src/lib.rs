//! Shellmig core library.
//!
//! A migration driver whose migrations are opaque executables. The driver
//! records the applied version and a dirty flag in PostgreSQL, Redis or an
//! in-process store, and serializes migrators on the same target through a
//! distributed lock.
//!
//! ```no_run
//! use shellmig::Driver;
//!
//! # async fn apply(payload: &[u8]) -> shellmig::Result<()> {
//! let mut driver = shellmig::open("shell-memory:///app").await?;
//! driver.lock().await?;
//! driver.set_version(1, true).await?;
//! driver.run(payload).await?;
//! driver.set_version(1, false).await?;
//! driver.unlock().await?;
//! driver.close().await
//! # }
//! ```

pub mod backend;
pub mod config;
pub mod driver;
pub mod errors;
pub mod id;
pub mod keys;
pub mod runtime;
pub mod types;

pub use backend::{Backend, MemoryBackend, PostgresBackend, RedisBackend};
pub use config::{BackendKind, ConnectionSpec, DriverConfig};
pub use driver::{AnyDriver, Driver, MemoryDriver, Migrator, PostgresDriver, RedisDriver, open};
pub use errors::*;
pub use runtime::ExecutableRunner;
pub use types::{NIL_VERSION, VersionRecord};
