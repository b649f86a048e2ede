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

//! Lock backend configuration.
//!
//! ## Configuration Hierarchy
//! 1. **CODE**: an explicit [`LockingConfig`] value (highest priority)
//! 2. **ENV**: `DCS_LOCK_*` environment variables
//! 3. **FILE**: YAML configuration file
//! 4. **DEFAULT**: in-memory backend (lowest priority)
//!
//! ## Examples
//!
//! ### From Config File (YAML)
//! ```yaml
//! backend:
//!   type: postgres
//!   url: postgres://scheduler@db/scheduler
//! table_name: shedlock
//! use_db_time: true
//! lock_at_most_for: PT10M
//! ```
//!
//! ### From Environment Variables
//! ```bash
//! export DCS_LOCK_BACKEND=sqlite
//! export DCS_LOCK_URL=sqlite://locks.db
//! export DCS_LOCK_AT_MOST_FOR=5m
//! ```
//!
//! ```rust,no_run
//! use dcs_common::system_clock;
//! use dcs_locks::LockingConfig;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = LockingConfig::load(Some("config/locks.yaml"))?;
//! let provider = config.build_provider(system_clock()).await?;
//! # Ok(())
//! # }
//! ```

use crate::configuration::{parse_duration, LockDefaults};
use crate::executor::LockingTaskExecutor;
use crate::provider::LockProvider;
use crate::sql::DatabaseProduct;
use crate::{LockError, LockResult};
use dcs_common::{holder_identity, system_clock, SharedClock};
use serde::Deserialize;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, warn};

pub const ENV_BACKEND: &str = "DCS_LOCK_BACKEND";
pub const ENV_URL: &str = "DCS_LOCK_URL";
pub const ENV_TABLE: &str = "DCS_LOCK_TABLE";
pub const ENV_USE_DB_TIME: &str = "DCS_LOCK_USE_DB_TIME";
pub const ENV_LOCKED_BY: &str = "DCS_LOCK_LOCKED_BY";
pub const ENV_REDIS_ENV: &str = "DCS_LOCK_REDIS_ENV";
pub const ENV_AT_MOST_FOR: &str = "DCS_LOCK_AT_MOST_FOR";
pub const ENV_AT_LEAST_FOR: &str = "DCS_LOCK_AT_LEAST_FOR";

/// Storage backend selection.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BackendConfig {
    #[default]
    Memory,
    Sqlite {
        url: String,
    },
    Postgres {
        url: String,
    },
    Mysql {
        url: String,
    },
    Redis {
        url: String,
        #[serde(default = "default_redis_environment")]
        environment: String,
    },
}

fn default_redis_environment() -> String {
    "default".to_string()
}

impl BackendConfig {
    pub fn kind(&self) -> &'static str {
        match self {
            BackendConfig::Memory => "memory",
            BackendConfig::Sqlite { .. } => "sqlite",
            BackendConfig::Postgres { .. } => "postgres",
            BackendConfig::Mysql { .. } => "mysql",
            BackendConfig::Redis { .. } => "redis",
        }
    }

    pub fn url(&self) -> Option<&str> {
        match self {
            BackendConfig::Memory => None,
            BackendConfig::Sqlite { url }
            | BackendConfig::Postgres { url }
            | BackendConfig::Mysql { url }
            | BackendConfig::Redis { url, .. } => Some(url),
        }
    }

    fn environment(&self) -> Option<&str> {
        match self {
            BackendConfig::Redis { environment, .. } => Some(environment),
            _ => None,
        }
    }

    fn from_parts(kind: &str, url: Option<String>, environment: Option<String>) -> LockResult<Self> {
        let kind = kind.trim().to_ascii_lowercase();
        if matches!(kind.as_str(), "memory" | "in-memory" | "in_memory") {
            return Ok(BackendConfig::Memory);
        }

        let url = url.ok_or_else(|| {
            LockError::ConfigError(format!("{ENV_URL} environment variable required for {kind} backend"))
        })?;
        match kind.as_str() {
            "sqlite" => Ok(BackendConfig::Sqlite { url }),
            "postgres" | "postgresql" => Ok(BackendConfig::Postgres { url }),
            "mysql" | "mariadb" => Ok(BackendConfig::Mysql { url }),
            "redis" => Ok(BackendConfig::Redis {
                url,
                environment: environment.unwrap_or_else(default_redis_environment),
            }),
            other => Err(LockError::ConfigError(format!("unknown lock backend '{other}'"))),
        }
    }
}

/// Complete lock backend configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct LockingConfig {
    pub backend: BackendConfig,
    /// SQL table holding lock rows.
    pub table_name: String,
    /// Compute SQL deadlines with the database server's clock.
    pub use_db_time: bool,
    /// Holder identity; defaults to `{hostname}:{pid}`.
    pub locked_by: Option<String>,
    /// Skip probing the SQL connection for its product.
    pub database_product: Option<DatabaseProduct>,
    /// Issue `CREATE TABLE IF NOT EXISTS` when building a SQL provider.
    pub create_schema: bool,
    /// Default `lock_at_most_for` (duration string).
    pub lock_at_most_for: String,
    /// Default `lock_at_least_for` (duration string).
    pub lock_at_least_for: String,
}

impl Default for LockingConfig {
    fn default() -> Self {
        Self {
            backend: BackendConfig::Memory,
            table_name: "shedlock".to_string(),
            use_db_time: false,
            locked_by: None,
            database_product: None,
            create_schema: false,
            lock_at_most_for: "30s".to_string(),
            lock_at_least_for: "0s".to_string(),
        }
    }
}

impl LockingConfig {
    /// Read a YAML file (FILE).
    ///
    /// ## Errors
    /// - `LockError::IOError`: file cannot be read
    /// - `LockError::ConfigError`: invalid YAML or unknown backend type
    pub fn from_file(path: impl AsRef<Path>) -> LockResult<Self> {
        let content = std::fs::read_to_string(path.as_ref())?;
        let config: LockingConfig = serde_yaml::from_str(&content)?;
        debug!(path = %path.as_ref().display(), backend = config.backend.kind(), "Loaded lock configuration");
        Ok(config)
    }

    /// Defaults overridden by `DCS_LOCK_*` variables (ENV).
    pub fn from_env() -> LockResult<Self> {
        let mut config = Self::default();
        config.apply_env()?;
        Ok(config)
    }

    /// Like [`LockingConfig::from_env`], falling back to the in-memory default
    /// when the environment is inconsistent.
    pub fn from_env_or_default() -> Self {
        Self::from_env().unwrap_or_else(|e| {
            warn!(error = %e, "Invalid lock configuration in environment, using in-memory backend");
            Self::default()
        })
    }

    /// File (if given) overridden by environment variables.
    pub fn load<P: AsRef<Path>>(path: Option<P>) -> LockResult<Self> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.apply_env()?;
        Ok(config)
    }

    fn apply_env(&mut self) -> LockResult<()> {
        let backend = env_var(ENV_BACKEND);
        let url = env_var(ENV_URL);
        let environment = env_var(ENV_REDIS_ENV);
        if backend.is_some() || url.is_some() || environment.is_some() {
            let kind = backend.unwrap_or_else(|| self.backend.kind().to_string());
            let url = url.or_else(|| self.backend.url().map(str::to_string));
            let environment = environment.or_else(|| self.backend.environment().map(str::to_string));
            self.backend = BackendConfig::from_parts(&kind, url, environment)?;
        }

        if let Some(table) = env_var(ENV_TABLE) {
            self.table_name = table;
        }
        if let Some(flag) = env_var(ENV_USE_DB_TIME) {
            self.use_db_time = parse_bool(&flag)?;
        }
        if let Some(locked_by) = env_var(ENV_LOCKED_BY) {
            self.locked_by = Some(locked_by);
        }
        if let Some(at_most) = env_var(ENV_AT_MOST_FOR) {
            self.lock_at_most_for = at_most;
        }
        if let Some(at_least) = env_var(ENV_AT_LEAST_FOR) {
            self.lock_at_least_for = at_least;
        }
        Ok(())
    }

    /// Parsed default durations.
    pub fn defaults(&self) -> LockResult<LockDefaults> {
        let defaults = LockDefaults {
            lock_at_most_for: parse_duration(&self.lock_at_most_for)?,
            lock_at_least_for: parse_duration(&self.lock_at_least_for)?,
        };
        if defaults.lock_at_least_for > defaults.lock_at_most_for {
            return Err(LockError::ConfigError(format!(
                "lock_at_least_for ({}) is longer than lock_at_most_for ({})",
                self.lock_at_least_for, self.lock_at_most_for
            )));
        }
        Ok(defaults)
    }

    pub fn holder(&self) -> String {
        self.locked_by.clone().unwrap_or_else(holder_identity)
    }

    /// Connect the configured backend.
    ///
    /// ## Errors
    /// - `LockError::ConfigError`: backend not compiled in (cargo feature)
    /// - `LockError::BackendError`: connection failure
    pub async fn build_provider(&self, clock: SharedClock) -> LockResult<Arc<dyn LockProvider>> {
        debug!(backend = self.backend.kind(), "Building lock provider");
        match &self.backend {
            BackendConfig::Memory => {
                #[cfg(feature = "memory-backend")]
                {
                    use crate::memory::MemoryStorageAccessor;
                    use crate::provider::StorageBasedLockProvider;

                    let accessor = MemoryStorageAccessor::new(self.holder(), clock.clone());
                    Ok(Arc::new(StorageBasedLockProvider::new(Arc::new(accessor), clock)))
                }
                #[cfg(not(feature = "memory-backend"))]
                {
                    let _ = clock;
                    Err(feature_missing("memory", "memory-backend"))
                }
            }
            BackendConfig::Sqlite { url } => {
                #[cfg(feature = "sqlite-backend")]
                {
                    self.build_sql_provider(url, clock).await
                }
                #[cfg(not(feature = "sqlite-backend"))]
                {
                    let _ = (url, clock);
                    Err(feature_missing("sqlite", "sqlite-backend"))
                }
            }
            BackendConfig::Postgres { url } => {
                #[cfg(feature = "postgres-backend")]
                {
                    self.build_sql_provider(url, clock).await
                }
                #[cfg(not(feature = "postgres-backend"))]
                {
                    let _ = (url, clock);
                    Err(feature_missing("postgres", "postgres-backend"))
                }
            }
            BackendConfig::Mysql { url } => {
                #[cfg(feature = "mysql-backend")]
                {
                    self.build_sql_provider(url, clock).await
                }
                #[cfg(not(feature = "mysql-backend"))]
                {
                    let _ = (url, clock);
                    Err(feature_missing("mysql", "mysql-backend"))
                }
            }
            BackendConfig::Redis { url, environment } => {
                #[cfg(feature = "redis-backend")]
                {
                    use crate::redis::RedisLockProvider;

                    let provider = RedisLockProvider::connect(url, environment, clock)
                        .await?
                        .with_holder(self.holder());
                    Ok(Arc::new(provider))
                }
                #[cfg(not(feature = "redis-backend"))]
                {
                    let _ = (url, environment, clock);
                    Err(feature_missing("redis", "redis-backend"))
                }
            }
        }
    }

    /// Provider wrapped in an executor on the system clock.
    pub async fn build_executor(&self) -> LockResult<LockingTaskExecutor> {
        let clock = system_clock();
        let provider = self.build_provider(clock.clone()).await?;
        Ok(LockingTaskExecutor::new(provider, clock))
    }

    #[cfg(any(feature = "sqlite-backend", feature = "postgres-backend", feature = "mysql-backend"))]
    async fn build_sql_provider(&self, url: &str, clock: SharedClock) -> LockResult<Arc<dyn LockProvider>> {
        use crate::provider::StorageBasedLockProvider;
        use crate::sql::{SqlLockConfig, SqlPool, SqlStorageAccessor};

        let mut sql_config = SqlLockConfig::default()
            .with_table_name(self.table_name.clone())
            .with_locked_by(self.holder());
        sql_config.use_db_time = self.use_db_time;
        sql_config.database_product = self.database_product;

        let pool = SqlPool::connect(url).await?;
        let accessor = SqlStorageAccessor::new(pool, sql_config, clock.clone()).await?;
        if self.create_schema {
            accessor.create_schema().await?;
        }
        Ok(Arc::new(StorageBasedLockProvider::new(Arc::new(accessor), clock)))
    }
}

#[cfg(not(all(
    feature = "memory-backend",
    feature = "sqlite-backend",
    feature = "postgres-backend",
    feature = "mysql-backend",
    feature = "redis-backend"
)))]
fn feature_missing(backend: &str, feature: &str) -> LockError {
    LockError::ConfigError(format!("{backend} backend requires '{feature}' feature"))
}

fn env_var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|value| !value.trim().is_empty())
}

fn parse_bool(value: &str) -> LockResult<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Ok(true),
        "false" | "0" | "no" | "off" => Ok(false),
        other => Err(LockError::ConfigError(format!("{ENV_USE_DB_TIME}: expected a boolean, got '{other}'"))),
    }
}
