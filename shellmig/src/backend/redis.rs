//! Redis backend: the version record is a hash item and the lock is a
//! lease-bounded key whose release wakes blocked contenders through `BLPOP`.

use std::collections::HashMap;
use std::time::Duration;

use log::{debug, info, warn};
use redis::aio::ConnectionManager;
use tokio::task::JoinHandle;
use url::Url;

use crate::{
    backend::Backend,
    config::{DEFAULT_NAMESPACE, DriverConfig},
    errors::{DriverError, Result},
    id::generate_owner_token,
    keys::{KeyContext, advisory_lock_id},
    runtime::scripts::{ACQUIRE_LOCK_SCRIPT, RELEASE_LOCK_SCRIPT, RENEW_LOCK_SCRIPT, SET_VERSION_SCRIPT},
    types::VersionRecord,
};

const VERSION_FIELD: &str = "Version";
const DIRTY_FIELD: &str = "Dirty";
const SCAN_COUNT: usize = 1000;

/// Version store, lock handle and schema reset for one Redis target.
pub struct RedisBackend {
    conn: ConnectionManager,
    /// Carries the blocking `BLPOP` while waiting for the lock.
    waiter: ConnectionManager,
    config: DriverConfig,
    lock_id: u32,
    owner: String,
    renewal: Option<JoinHandle<()>>,
}

impl RedisBackend {
    pub async fn connect(redis_url: &str, config: DriverConfig) -> Result<Self> {
        let client = redis::Client::open(redis_url).map_err(|err| DriverError::Connect {
            backend: "redis",
            source: err.into(),
        })?;
        let conn = connection_manager(&client).await?;
        let waiter = connection_manager(&client).await?;

        let mut config = config;
        if config.database_name.is_empty() {
            config.database_name = database_index(redis_url);
        }
        Self::with_connections(conn, waiter, config).await
    }

    /// Wraps existing connection managers after pinging `conn`.
    ///
    /// `waiter` only ever carries the blocking lock wait; pass a clone of
    /// `conn` to share one connection.
    pub async fn with_connections(
        mut conn: ConnectionManager,
        waiter: ConnectionManager,
        mut config: DriverConfig,
    ) -> Result<Self> {
        let _: String = redis::cmd("PING")
            .query_async(&mut conn)
            .await
            .map_err(|err| DriverError::Connect {
                backend: "redis",
                source: err.into(),
            })?;

        if config.database_name.is_empty() {
            return Err(DriverError::NoDatabaseName);
        }
        if config.schema_name.is_empty() {
            config.schema_name = DEFAULT_NAMESPACE.to_string();
        }

        let lock_id = advisory_lock_id(&config.database_name, &config.schema_name);
        Ok(Self {
            conn,
            waiter,
            config,
            lock_id,
            owner: generate_owner_token(),
            renewal: None,
        })
    }

    pub fn config(&self) -> &DriverConfig {
        &self.config
    }

    fn keys(&self) -> KeyContext<'_> {
        KeyContext::new(&self.config.schema_name)
    }

    fn lease_millis(&self) -> u64 {
        lease_millis(self.config.lock_lease)
    }

    /// Keeps extending the lease while the lock is held.
    fn spawn_renewal(&self) -> JoinHandle<()> {
        let mut conn = self.conn.clone();
        let key = self.keys().lock(self.lock_id);
        let owner = self.owner.clone();
        let lease = self.lease_millis();
        let period = (self.config.lock_lease / 3).max(Duration::from_millis(10));

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let mut invocation = RENEW_LOCK_SCRIPT.prepare_invoke();
                invocation.key(&key).arg(&owner).arg(lease);
                match invocation.invoke_async::<i64>(&mut conn).await {
                    Ok(1) => {}
                    Ok(_) => {
                        warn!("lock {key} is no longer held by this driver; lease renewal stopped");
                        return;
                    }
                    Err(err) => warn!("failed to renew lock {key}: {err}"),
                }
            }
        })
    }
}

impl Backend for RedisBackend {
    /// Stops reporting the lock as held once renewal finds the lease gone.
    fn is_locked(&self) -> bool {
        self.renewal.as_ref().is_some_and(|renewal| !renewal.is_finished())
    }

    async fn lock(&mut self) -> Result<()> {
        if self.is_locked() {
            return Err(DriverError::Locked);
        }

        let key = self.keys().lock(self.lock_id);
        let signal = self.keys().lock_signal(self.lock_id);
        let lease = self.lease_millis();
        debug!("waiting for lock {key}");

        loop {
            let mut invocation = ACQUIRE_LOCK_SCRIPT.prepare_invoke();
            invocation.key(&key).arg(&self.owner).arg(lease);
            let (acquired, remaining_ms): (i64, u64) = invocation
                .invoke_async(&mut self.conn)
                .await
                .map_err(|err| DriverError::persistence("try lock failed", err))?;
            if acquired == 1 {
                break;
            }

            // Woken by a release, or once the holder's current lease could have lapsed.
            let wait = Duration::from_millis(remaining_ms.max(1));
            let woken: redis::RedisResult<Option<(String, String)>> = redis::cmd("BLPOP")
                .arg(&signal)
                .arg(wait.as_secs_f64())
                .query_async(&mut self.waiter)
                .await;
            match woken {
                Ok(_) => {}
                // A caller-configured response timeout only cuts this wait short.
                Err(err) if err.is_timeout() => debug!("wait on {signal} timed out; retrying"),
                Err(err) => return Err(DriverError::persistence(format!("BLPOP {signal}"), err)),
            }
        }

        self.renewal = Some(self.spawn_renewal());
        info!("acquired lock {key}");
        Ok(())
    }

    async fn unlock(&mut self) -> Result<()> {
        let Some(renewal) = self.renewal.take() else {
            return Ok(());
        };
        renewal.abort();

        let key = self.keys().lock(self.lock_id);
        let signal = self.keys().lock_signal(self.lock_id);
        let mut invocation = RELEASE_LOCK_SCRIPT.prepare_invoke();
        invocation.key(&key).key(&signal).arg(&self.owner).arg(self.lease_millis());
        let released: i64 = invocation
            .invoke_async(&mut self.conn)
            .await
            .map_err(|err| DriverError::persistence(format!("releasing lock {key}"), err))?;

        if released == 0 {
            return Err(DriverError::LockLost { key });
        }
        info!("released lock {key}");
        Ok(())
    }

    async fn version(&mut self) -> Result<VersionRecord> {
        let item = self.keys().version_item(&self.config.migrations_table);
        let fields: HashMap<String, String> = redis::cmd("HGETALL")
            .arg(&item)
            .query_async(&mut self.conn)
            .await
            .map_err(|err| DriverError::persistence(format!("HGETALL {item}"), err))?;

        if fields.is_empty() {
            return Ok(VersionRecord::NIL);
        }
        decode_record(&fields)
    }

    async fn set_version(&mut self, record: VersionRecord) -> Result<()> {
        let item = self.keys().version_item(&self.config.migrations_table);
        let write = if record.should_persist() { "1" } else { "0" };

        let mut invocation = SET_VERSION_SCRIPT.prepare_invoke();
        invocation
            .key(&item)
            .arg(record.version.to_string())
            .arg(if record.dirty { "true" } else { "false" })
            .arg(write);
        let _: i64 = invocation
            .invoke_async(&mut self.conn)
            .await
            .map_err(|err| DriverError::persistence(format!("writing version item {item}"), err))?;

        info!("recorded version {} (dirty: {})", record.version, record.dirty);
        Ok(())
    }

    async fn drop_all(&mut self) -> Result<()> {
        let pattern = self.keys().namespace_pattern();
        let mut cursor: u64 = 0;
        let mut total_deleted: u64 = 0;

        loop {
            let (next_cursor, keys): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(&pattern)
                .arg("COUNT")
                .arg(SCAN_COUNT)
                .query_async(&mut self.conn)
                .await
                .map_err(|err| DriverError::persistence(format!("SCAN {pattern}"), err))?;

            if !keys.is_empty() {
                let deleted: u64 = redis::cmd("DEL")
                    .arg(&keys)
                    .query_async(&mut self.conn)
                    .await
                    .map_err(|err| DriverError::persistence(format!("DEL {}", keys.join(" ")), err))?;
                total_deleted += deleted;
            }

            cursor = next_cursor;
            if cursor == 0 {
                break;
            }
        }

        info!("dropped {total_deleted} key(s) matching {pattern}");
        Ok(())
    }

    async fn close(mut self) -> Result<()> {
        // The lease runs out on its own once renewal stops.
        if let Some(renewal) = self.renewal.take() {
            renewal.abort();
        }
        Ok(())
    }
}

impl Drop for RedisBackend {
    fn drop(&mut self) {
        if let Some(renewal) = self.renewal.take() {
            renewal.abort();
        }
    }
}

async fn connection_manager(client: &redis::Client) -> Result<ConnectionManager> {
    client.get_connection_manager().await.map_err(|err| DriverError::Connect {
        backend: "redis",
        source: err.into(),
    })
}

/// Lease length for `PX`, saturating instead of wrapping; never zero.
fn lease_millis(lease: Duration) -> u64 {
    u64::try_from(lease.as_millis()).unwrap_or(u64::MAX).max(1)
}

/// Logical database number of a Redis URL; `0` unless the path names one.
fn database_index(redis_url: &str) -> String {
    Url::parse(redis_url)
        .ok()
        .map(|url| url.path().trim_matches('/').to_string())
        .filter(|db| !db.is_empty())
        .unwrap_or_else(|| "0".to_string())
}

fn decode_record(fields: &HashMap<String, String>) -> Result<VersionRecord> {
    let version = fields
        .get(VERSION_FIELD)
        .and_then(|raw| raw.parse::<i64>().ok())
        .ok_or_else(|| DriverError::SchemaCorruption {
            field: VERSION_FIELD.to_string(),
            expected: "decimal string",
        })?;
    let dirty = match fields.get(DIRTY_FIELD).map(String::as_str) {
        Some("true") | Some("1") => true,
        Some("false") | Some("0") => false,
        _ => {
            return Err(DriverError::SchemaCorruption {
                field: DIRTY_FIELD.to_string(),
                expected: "boolean",
            });
        }
    };
    Ok(VersionRecord::new(version, dirty))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fields(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    #[test]
    fn database_index_comes_from_url_path() {
        assert_eq!(database_index("redis://127.0.0.1/3"), "3");
        assert_eq!(database_index("redis://127.0.0.1"), "0");
        assert_eq!(database_index("redis://127.0.0.1/"), "0");
    }

    #[test]
    fn lease_millis_saturates_and_never_hits_zero() {
        assert_eq!(lease_millis(Duration::from_secs(15)), 15_000);
        assert_eq!(lease_millis(Duration::from_micros(10)), 1);
        assert_eq!(lease_millis(Duration::MAX), u64::MAX);
    }

    #[test]
    fn decodes_complete_item() {
        let record = decode_record(&fields(&[("Version", "12"), ("Dirty", "true")])).unwrap();
        assert_eq!(record, VersionRecord::new(12, true));
    }

    #[test]
    fn missing_version_field_is_corruption() {
        let err = decode_record(&fields(&[("Dirty", "false")])).unwrap_err();
        assert!(matches!(err, DriverError::SchemaCorruption { ref field, expected: "decimal string" } if field == "Version"));
    }

    #[test]
    fn malformed_dirty_field_is_corruption() {
        let err = decode_record(&fields(&[("Version", "3"), ("Dirty", "perhaps")])).unwrap_err();
        assert!(matches!(err, DriverError::SchemaCorruption { ref field, expected: "boolean" } if field == "Dirty"));
    }
}
