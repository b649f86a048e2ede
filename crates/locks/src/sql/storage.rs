// SPDX-License-Identifier: LGPL-2.1-or-later
// Copyright (C) 2025 DCS Scheduler Contributors
//
// This file is part of DCS Locks.
//
// DCS Locks is free software: you can redistribute it and/or modify
// it under the terms of the GNU Lesser General Public License as published by
// the Free Software Foundation, either version 2.1 of the License, or
// (at your option) any later version.
//
// DCS Locks is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Lesser General Public License for more details.
//
// You should have received a copy of the GNU Lesser General Public License
// along with DCS Locks. If not, see <https://www.gnu.org/licenses/>.

//! `sqlx`-backed storage accessor.

use super::product::DatabaseProduct;
use super::statements::{ParamValue, Placeholder, SqlStatements, Statement, TableSchema};
use super::SqlLockConfig;
use crate::accessor::{LockRecord, StorageAccessor, StorageExtension};
use crate::{LockConfiguration, LockError, LockResult};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, Utc};
use dcs_common::SharedClock;
use tracing::{debug, instrument, warn};

#[cfg(any(feature = "postgres-backend", feature = "mysql-backend"))]
use sqlx::Row;

/// Text layout of timestamps stored in SQLite (matches `STRFTIME('%Y-%m-%d %H:%M:%f')`).
#[cfg(feature = "sqlite-backend")]
const SQLITE_TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.3f";

/// Connection pool for one of the compiled-in drivers.
#[derive(Debug, Clone)]
pub enum SqlPool {
    #[cfg(feature = "sqlite-backend")]
    Sqlite(sqlx::SqlitePool),
    #[cfg(feature = "postgres-backend")]
    Postgres(sqlx::PgPool),
    #[cfg(feature = "mysql-backend")]
    MySql(sqlx::MySqlPool),
}

impl SqlPool {
    /// Connect by URL scheme (`sqlite:`, `postgres:`/`postgresql:`, `mysql:`/`mariadb:`).
    #[instrument(skip(url))]
    pub async fn connect(url: &str) -> LockResult<Self> {
        let scheme = url.split(':').next().unwrap_or_default().to_ascii_lowercase();
        match scheme.as_str() {
            #[cfg(feature = "sqlite-backend")]
            "sqlite" => {
                use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
                use std::str::FromStr;

                let options = SqliteConnectOptions::from_str(url)
                    .map_err(|e| LockError::ConfigError(format!("invalid SQLite URL: {e}")))?
                    .create_if_missing(true)
                    .busy_timeout(std::time::Duration::from_secs(5));
                // every connection to :memory: opens a separate database
                let max_connections = if url.contains(":memory:") { 1 } else { 5 };
                let pool = SqlitePoolOptions::new()
                    .max_connections(max_connections)
                    .connect_with(options)
                    .await
                    .map_err(|e| LockError::BackendError(format!("failed to connect SQLite: {e}")))?;
                Ok(SqlPool::Sqlite(pool))
            }
            #[cfg(feature = "postgres-backend")]
            "postgres" | "postgresql" => {
                let pool = sqlx::PgPool::connect(url)
                    .await
                    .map_err(|e| LockError::BackendError(format!("failed to connect PostgreSQL: {e}")))?;
                Ok(SqlPool::Postgres(pool))
            }
            #[cfg(feature = "mysql-backend")]
            "mysql" | "mariadb" => {
                let pool = sqlx::MySqlPool::connect(url)
                    .await
                    .map_err(|e| LockError::BackendError(format!("failed to connect MySQL: {e}")))?;
                Ok(SqlPool::MySql(pool))
            }
            other => Err(LockError::ConfigError(format!(
                "unsupported database scheme '{other}' (is the backend feature enabled?)"
            ))),
        }
    }

    fn placeholder(&self) -> Placeholder {
        match self {
            #[cfg(feature = "sqlite-backend")]
            SqlPool::Sqlite(_) => Placeholder::Question,
            #[cfg(feature = "postgres-backend")]
            SqlPool::Postgres(_) => Placeholder::Dollar,
            #[cfg(feature = "mysql-backend")]
            SqlPool::MySql(_) => Placeholder::Question,
        }
    }

    async fn product_name(&self) -> Result<String, sqlx::Error> {
        match self {
            #[cfg(feature = "sqlite-backend")]
            SqlPool::Sqlite(_) => Ok("SQLite".to_string()),
            #[cfg(feature = "postgres-backend")]
            SqlPool::Postgres(pool) => {
                let version: String = sqlx::query_scalar("SELECT version()").fetch_one(pool).await?;
                Ok(version.split_whitespace().next().unwrap_or_default().to_string())
            }
            #[cfg(feature = "mysql-backend")]
            SqlPool::MySql(pool) => {
                let version: String = sqlx::query_scalar("SELECT VERSION()").fetch_one(pool).await?;
                if version.to_ascii_lowercase().contains("mariadb") {
                    Ok("MariaDB".to_string())
                } else {
                    Ok("MySQL".to_string())
                }
            }
        }
    }

    async fn execute(&self, statement: &Statement, values: Vec<ParamValue>) -> Result<u64, sqlx::Error> {
        match self {
            #[cfg(feature = "sqlite-backend")]
            SqlPool::Sqlite(pool) => {
                let mut query = sqlx::query::<sqlx::Sqlite>(&statement.sql);
                for value in values {
                    query = match value {
                        ParamValue::Text(text) => query.bind(text),
                        ParamValue::Micros(micros) => query.bind(micros),
                        ParamValue::Timestamp(ts) => query.bind(ts.format(SQLITE_TIMESTAMP_FORMAT).to_string()),
                    };
                }
                Ok(query.execute(pool).await?.rows_affected())
            }
            #[cfg(feature = "postgres-backend")]
            SqlPool::Postgres(pool) => {
                let mut query = sqlx::query::<sqlx::Postgres>(&statement.sql);
                for value in values {
                    query = match value {
                        ParamValue::Text(text) => query.bind(text),
                        ParamValue::Micros(micros) => query.bind(micros),
                        ParamValue::Timestamp(ts) => query.bind(ts.naive_utc()),
                    };
                }
                Ok(query.execute(pool).await?.rows_affected())
            }
            #[cfg(feature = "mysql-backend")]
            SqlPool::MySql(pool) => {
                let mut query = sqlx::query::<sqlx::MySql>(&statement.sql);
                for value in values {
                    query = match value {
                        ParamValue::Text(text) => query.bind(text),
                        ParamValue::Micros(micros) => query.bind(micros),
                        ParamValue::Timestamp(ts) => query.bind(ts.naive_utc()),
                    };
                }
                Ok(query.execute(pool).await?.rows_affected())
            }
        }
    }

    async fn create_schema(&self, schema: &TableSchema) -> Result<(), sqlx::Error> {
        let TableSchema {
            table_name: t,
            name: n,
            lock_until: u,
            locked_at: a,
            locked_by: b,
        } = schema;
        match self {
            #[cfg(feature = "sqlite-backend")]
            SqlPool::Sqlite(pool) => {
                let ddl = format!(
                    "CREATE TABLE IF NOT EXISTS {t} ({n} VARCHAR(64) NOT NULL PRIMARY KEY, \
                     {u} TEXT NOT NULL, {a} TEXT NOT NULL, {b} VARCHAR(255) NOT NULL)"
                );
                sqlx::query(&ddl).execute(pool).await?;
            }
            #[cfg(feature = "postgres-backend")]
            SqlPool::Postgres(pool) => {
                let ddl = format!(
                    "CREATE TABLE IF NOT EXISTS {t} ({n} VARCHAR(64) NOT NULL PRIMARY KEY, \
                     {u} TIMESTAMP NOT NULL, {a} TIMESTAMP NOT NULL, {b} VARCHAR(255) NOT NULL)"
                );
                sqlx::query(&ddl).execute(pool).await?;
            }
            #[cfg(feature = "mysql-backend")]
            SqlPool::MySql(pool) => {
                let ddl = format!(
                    "CREATE TABLE IF NOT EXISTS {t} ({n} VARCHAR(64) NOT NULL PRIMARY KEY, \
                     {u} DATETIME(3) NOT NULL, {a} DATETIME(3) NOT NULL, {b} VARCHAR(255) NOT NULL)"
                );
                sqlx::query(&ddl).execute(pool).await?;
            }
        }
        Ok(())
    }

    async fn find_record(&self, schema: &TableSchema, name: &str) -> LockResult<Option<LockRecord>> {
        let TableSchema {
            table_name: t,
            name: n,
            lock_until: u,
            locked_at: a,
            locked_by: b,
        } = schema;
        match self {
            #[cfg(feature = "sqlite-backend")]
            SqlPool::Sqlite(pool) => {
                let sql = format!("SELECT {n}, {u}, {a}, {b} FROM {t} WHERE {n} = ?");
                let row: Option<(String, String, String, String)> =
                    sqlx::query_as(&sql).bind(name).fetch_optional(pool).await?;
                row.map(|(name, lock_until, locked_at, locked_by)| {
                    Ok(LockRecord {
                        name,
                        lock_until: parse_sqlite_timestamp(&lock_until)?,
                        locked_at: parse_sqlite_timestamp(&locked_at)?,
                        locked_by,
                    })
                })
                .transpose()
            }
            #[cfg(feature = "postgres-backend")]
            SqlPool::Postgres(pool) => {
                let sql = format!("SELECT {n}, {u}, {a}, {b} FROM {t} WHERE {n} = $1");
                let row = sqlx::query(&sql).bind(name).fetch_optional(pool).await?;
                row.map(|row| record_from_columns(row.try_get(0)?, row.try_get(1)?, row.try_get(2)?, row.try_get(3)?))
                    .transpose()
            }
            #[cfg(feature = "mysql-backend")]
            SqlPool::MySql(pool) => {
                let sql = format!("SELECT {n}, {u}, {a}, {b} FROM {t} WHERE {n} = ?");
                let row = sqlx::query(&sql).bind(name).fetch_optional(pool).await?;
                row.map(|row| record_from_columns(row.try_get(0)?, row.try_get(1)?, row.try_get(2)?, row.try_get(3)?))
                    .transpose()
            }
        }
    }
}

#[cfg(any(feature = "postgres-backend", feature = "mysql-backend"))]
fn record_from_columns(
    name: String,
    lock_until: NaiveDateTime,
    locked_at: NaiveDateTime,
    locked_by: String,
) -> LockResult<LockRecord> {
    Ok(LockRecord {
        name,
        lock_until: lock_until.and_utc(),
        locked_at: locked_at.and_utc(),
        locked_by,
    })
}

#[cfg(feature = "sqlite-backend")]
fn parse_sqlite_timestamp(value: &str) -> LockResult<DateTime<Utc>> {
    NaiveDateTime::parse_from_str(value, "%Y-%m-%d %H:%M:%S%.f")
        .map(|ts| ts.and_utc())
        .map_err(|e| LockError::BackendError(format!("invalid timestamp '{value}': {e}")))
}

/// Storage accessor over a shared SQL table.
///
/// All four operations are single conditional statements; success is decided
/// by the affected-row count. A unique-key violation on insert means another
/// node created the row first and is reported as "not inserted".
pub struct SqlStorageAccessor {
    pool: SqlPool,
    schema: TableSchema,
    statements: SqlStatements,
    locked_by: String,
    clock: SharedClock,
}

impl SqlStorageAccessor {
    /// Build an accessor, probing the database product unless configured.
    pub async fn new(pool: SqlPool, config: SqlLockConfig, clock: SharedClock) -> LockResult<Self> {
        let product = match config.database_product {
            Some(product) => product,
            None if config.use_db_time => match pool.product_name().await {
                Ok(name) => DatabaseProduct::match_product_name(&name),
                Err(e) => {
                    debug!(error = %e, "Could not determine database product");
                    DatabaseProduct::Unknown
                }
            },
            None => DatabaseProduct::Unknown,
        };

        let dialect = config.dialect_for(product);
        if config.use_db_time && !dialect.uses_db_time() {
            warn!(?product, "No server-time dialect for database product, using application time");
        }
        debug!(?product, ?dialect, table = %config.schema.table_name, "SQL lock storage ready");

        let statements = SqlStatements::new(dialect, &config.schema, pool.placeholder());
        Ok(Self {
            pool,
            schema: config.schema,
            statements,
            locked_by: config.locked_by,
            clock,
        })
    }

    pub fn statements(&self) -> &SqlStatements {
        &self.statements
    }

    pub fn locked_by(&self) -> &str {
        &self.locked_by
    }

    /// `CREATE TABLE IF NOT EXISTS` for the configured schema.
    pub async fn create_schema(&self) -> LockResult<()> {
        self.pool
            .create_schema(&self.schema)
            .await
            .map_err(|e| LockError::BackendError(format!("failed to create lock table: {e}")))
    }

    /// Current row for `name`, if any.
    pub async fn find_record(&self, name: &str) -> LockResult<Option<LockRecord>> {
        self.pool.find_record(&self.schema, name).await
    }

    async fn run(&self, statement: &Statement, config: &LockConfiguration) -> Result<u64, sqlx::Error> {
        let values = statement.values(config, &self.locked_by, self.clock.now());
        self.pool.execute(statement, values).await
    }
}

#[async_trait]
impl StorageAccessor for SqlStorageAccessor {
    #[instrument(skip_all, fields(lock_name = %config.name()))]
    async fn insert_record(&self, config: &LockConfiguration) -> LockResult<bool> {
        match self.run(self.statements.insert(), config).await {
            Ok(rows) => Ok(rows > 0),
            Err(sqlx::Error::Database(db)) if db.is_unique_violation() => {
                debug!("Lock row already exists");
                Ok(false)
            }
            Err(e) => Err(e.into()),
        }
    }

    #[instrument(skip_all, fields(lock_name = %config.name()))]
    async fn update_record(&self, config: &LockConfiguration) -> LockResult<bool> {
        Ok(self.run(self.statements.update(), config).await? > 0)
    }

    #[instrument(skip_all, fields(lock_name = %config.name()))]
    async fn unlock(&self, config: &LockConfiguration) -> LockResult<()> {
        self.run(self.statements.unlock(), config).await?;
        Ok(())
    }

    #[instrument(skip_all, fields(lock_name = %config.name()))]
    async fn extend(&self, config: &LockConfiguration) -> LockResult<StorageExtension> {
        if self.run(self.statements.extend(), config).await? > 0 {
            Ok(StorageExtension::Extended)
        } else {
            Ok(StorageExtension::Lost)
        }
    }
}
