//! PostgreSQL backend: a single-row version table guarded by a session-level
//! advisory lock.

use log::{debug, info};
use sqlx::{Connection, PgConnection, Row, postgres::PgRow};

use crate::{
    backend::Backend,
    config::DriverConfig,
    errors::{BackendError, DriverError, Result},
    keys::{advisory_lock_id, quote_identifier},
    types::VersionRecord,
};

/// SQLSTATE for `undefined_table`.
const UNDEFINED_TABLE: &str = "42P01";

/// Version store, lock handle and schema reset for one PostgreSQL target.
///
/// Advisory locks belong to the session that took them, so every statement
/// runs on the one connection owned here.
pub struct PostgresBackend {
    conn: PgConnection,
    config: DriverConfig,
    lock_id: i64,
    is_locked: bool,
}

impl PostgresBackend {
    /// Connects with `dsn` and prepares the target.
    pub async fn connect(dsn: &str, config: DriverConfig) -> Result<Self> {
        let conn = PgConnection::connect(dsn).await.map_err(|err| DriverError::Connect {
            backend: "postgres",
            source: err.into(),
        })?;
        Self::with_connection(conn, config).await
    }

    /// Wraps an already open connection.
    ///
    /// Pings it, fills in database and schema names the config leaves empty,
    /// applies the statement timeout and makes sure the version table exists.
    pub async fn with_connection(mut conn: PgConnection, mut config: DriverConfig) -> Result<Self> {
        conn.ping().await.map_err(|err| DriverError::Connect {
            backend: "postgres",
            source: err.into(),
        })?;

        if !config.schema_name.is_empty() {
            let query = format!("SET search_path TO {}", quote_identifier(&config.schema_name));
            sqlx::query(&query)
                .execute(&mut conn)
                .await
                .map_err(|err| DriverError::persistence(query.clone(), err))?;
        }

        if config.database_name.is_empty() {
            config.database_name = scalar(&mut conn, "SELECT CURRENT_DATABASE()").await?;
            if config.database_name.is_empty() {
                return Err(DriverError::NoDatabaseName);
            }
        }

        if config.schema_name.is_empty() {
            config.schema_name = scalar(&mut conn, "SELECT CURRENT_SCHEMA()").await?;
            if config.schema_name.is_empty() {
                return Err(DriverError::NoSchema);
            }
        }

        if let Some(timeout) = config.statement_timeout {
            let query = format!("SET statement_timeout = {}", timeout.as_millis());
            sqlx::query(&query)
                .execute(&mut conn)
                .await
                .map_err(|err| DriverError::persistence(query.clone(), err))?;
        }

        let lock_id = i64::from(advisory_lock_id(&config.database_name, &config.schema_name));
        let mut backend = Self {
            conn,
            config,
            lock_id,
            is_locked: false,
        };
        backend.ensure_version_table().await?;
        Ok(backend)
    }

    pub fn config(&self) -> &DriverConfig {
        &self.config
    }

    fn table(&self) -> String {
        quote_identifier(&self.config.migrations_table)
    }

    /// Creates the version table if it is missing.
    ///
    /// Takes the lock itself, unlike every other operation, so concurrent
    /// first opens do not race on the DDL.
    async fn ensure_version_table(&mut self) -> Result<()> {
        self.lock().await?;

        let query = format!(
            "CREATE TABLE IF NOT EXISTS {} (version bigint not null primary key, dirty boolean not null)",
            self.table()
        );
        let created = sqlx::query(&query)
            .execute(&mut self.conn)
            .await
            .map(|_| ())
            .map_err(|err| DriverError::persistence(query, err));

        match (created, self.unlock().await) {
            (Ok(()), Ok(())) => Ok(()),
            (Err(err), Ok(())) | (Ok(()), Err(err)) => Err(err),
            (Err(err), Err(unlock_err)) => Err(err.with_cleanup(unlock_err)),
        }
    }

    /// Rolls back a failed transaction, folding a rollback failure into `err`.
    async fn abort(tx: sqlx::Transaction<'_, sqlx::Postgres>, err: DriverError) -> DriverError {
        match tx.rollback().await {
            Ok(()) => err,
            Err(rollback_err) => err.with_cleanup(DriverError::persistence("ROLLBACK", rollback_err)),
        }
    }
}

impl Backend for PostgresBackend {
    fn is_locked(&self) -> bool {
        self.is_locked
    }

    async fn lock(&mut self) -> Result<()> {
        if self.is_locked {
            return Err(DriverError::Locked);
        }

        // Waits indefinitely until the lock is granted.
        let query = "SELECT pg_advisory_lock($1)";
        debug!("waiting for advisory lock {}", self.lock_id);

        if self.config.statement_timeout.is_some() {
            // A session-level advisory lock outlives the transaction; the
            // transaction only scopes the timeout override.
            let mut tx = self
                .conn
                .begin()
                .await
                .map_err(|err| DriverError::persistence("transaction start failed", err))?;
            if let Err(err) = sqlx::query("SET LOCAL statement_timeout = 0").execute(&mut *tx).await {
                return Err(Self::abort(tx, DriverError::persistence("SET LOCAL statement_timeout = 0", err)).await);
            }
            if let Err(err) = sqlx::query(query).bind(self.lock_id).execute(&mut *tx).await {
                return Err(Self::abort(tx, DriverError::persistence(query, err)).await);
            }
            tx.commit()
                .await
                .map_err(|err| DriverError::persistence("transaction commit failed", err))?;
        } else {
            sqlx::query(query)
                .bind(self.lock_id)
                .execute(&mut self.conn)
                .await
                .map_err(|err| DriverError::persistence("try lock failed: SELECT pg_advisory_lock($1)", err))?;
        }

        self.is_locked = true;
        info!("acquired advisory lock {}", self.lock_id);
        Ok(())
    }

    async fn unlock(&mut self) -> Result<()> {
        if !self.is_locked {
            return Ok(());
        }

        let query = "SELECT pg_advisory_unlock($1)";
        sqlx::query(query)
            .bind(self.lock_id)
            .execute(&mut self.conn)
            .await
            .map_err(|err| DriverError::persistence(query, err))?;

        self.is_locked = false;
        info!("released advisory lock {}", self.lock_id);
        Ok(())
    }

    async fn version(&mut self) -> Result<VersionRecord> {
        let query = format!("SELECT * FROM {} LIMIT 1", self.table());
        match sqlx::query(&query).fetch_optional(&mut self.conn).await {
            Ok(None) => Ok(VersionRecord::NIL),
            Ok(Some(row)) => decode_record(&row),
            // A dropped version table reads as an empty one.
            Err(sqlx::Error::Database(db)) if db.code().as_deref() == Some(UNDEFINED_TABLE) => {
                Ok(VersionRecord::NIL)
            }
            Err(err) => Err(DriverError::persistence(query, err)),
        }
    }

    async fn set_version(&mut self, record: VersionRecord) -> Result<()> {
        let table = self.table();
        let mut tx = self
            .conn
            .begin()
            .await
            .map_err(|err| DriverError::persistence("transaction start failed", err))?;

        let truncate = format!("TRUNCATE {table}");
        if let Err(err) = sqlx::query(&truncate).execute(&mut *tx).await {
            return Err(Self::abort(tx, DriverError::persistence(truncate, err)).await);
        }

        if record.should_persist() {
            let insert = format!("INSERT INTO {table} (version, dirty) VALUES ($1, $2)");
            if let Err(err) = sqlx::query(&insert)
                .bind(record.version)
                .bind(record.dirty)
                .execute(&mut *tx)
                .await
            {
                return Err(Self::abort(tx, DriverError::persistence(insert, err)).await);
            }
        }

        tx.commit()
            .await
            .map_err(|err| DriverError::persistence("transaction commit failed", err))?;

        info!("recorded version {} (dirty: {})", record.version, record.dirty);
        Ok(())
    }

    async fn drop_all(&mut self) -> Result<()> {
        let query = "SELECT table_name::text FROM information_schema.tables \
                     WHERE table_schema = (SELECT current_schema()) AND table_type = 'BASE TABLE'";
        let tables: Vec<String> = sqlx::query_scalar(query)
            .fetch_all(&mut self.conn)
            .await
            .map_err(|err| DriverError::persistence(query, err))?;

        // One statement per table; earlier drops stay dropped if a later one fails.
        for table in tables.iter().filter(|name| !name.is_empty()) {
            let query = format!("DROP TABLE IF EXISTS {} CASCADE", quote_identifier(table));
            sqlx::query(&query)
                .execute(&mut self.conn)
                .await
                .map_err(|err| DriverError::persistence(query.clone(), err))?;
            debug!("dropped table {table}");
        }

        info!("dropped {} table(s)", tables.len());
        Ok(())
    }

    async fn close(self) -> Result<()> {
        self.conn
            .close()
            .await
            .map_err(|err| DriverError::persistence("closing connection", err))
    }
}

/// Runs a single-value query; NULL reads as an empty string.
async fn scalar(conn: &mut PgConnection, query: &'static str) -> Result<String> {
    let value = sqlx::query_scalar::<_, Option<String>>(query)
        .fetch_one(conn)
        .await
        .map_err(|err| DriverError::persistence(query, err))?;
    Ok(value.unwrap_or_default())
}

fn decode_record(row: &PgRow) -> Result<VersionRecord> {
    let version = row.try_get::<i64, _>("version").map_err(|err| corruption("version", "bigint", err))?;
    let dirty = row.try_get::<bool, _>("dirty").map_err(|err| corruption("dirty", "boolean", err))?;
    Ok(VersionRecord::new(version, dirty))
}

fn corruption(field: &str, expected: &'static str, err: sqlx::Error) -> DriverError {
    match err {
        sqlx::Error::ColumnNotFound(_) | sqlx::Error::ColumnDecode { .. } => DriverError::SchemaCorruption {
            field: field.to_string(),
            expected,
        },
        other => DriverError::Persistence {
            operation: format!("decoding {field}").into(),
            source: BackendError::from(other),
            cleanup: Vec::new(),
        },
    }
}
