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

//! Redis-based lock provider.
//!
//! One key per lock, `job-lock:{environment}:{name}`, holding
//! `ADDED:{timestamp}@{holder}` with a native TTL:
//!
//! - acquire: `SET key value NX PX lockAtMostFor`
//! - unlock: compare-value script that keeps the key for the remaining
//!   `lockAtLeastFor` or deletes it
//! - extend: compare-value script running `PEXPIRE`
//!
//! Comparing the value before touching the key makes release and extension
//! safe after the lease was taken over by another node.

use crate::handle::{ensure_valid, ExtendOutcome, SimpleLock};
use crate::provider::LockProvider;
use crate::{LockConfiguration, LockError, LockResult};
use async_trait::async_trait;
use chrono::{DateTime, Duration, SecondsFormat, Utc};
use dcs_common::{holder_identity, SharedClock};
use redis::aio::ConnectionManager;
use redis::Script;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, instrument};

pub const KEY_PREFIX: &str = "job-lock";
pub const DEFAULT_ENVIRONMENT: &str = "default";

const UNLOCK_SCRIPT: &str = r#"
if redis.call('GET', KEYS[1]) ~= ARGV[1] then
  return 0
end
if tonumber(ARGV[2]) > 0 then
  return redis.call('PEXPIRE', KEYS[1], ARGV[2])
end
return redis.call('DEL', KEYS[1])
"#;

const EXTEND_SCRIPT: &str = r#"
if redis.call('GET', KEYS[1]) == ARGV[1] then
  return redis.call('PEXPIRE', KEYS[1], ARGV[2])
end
return 0
"#;

struct Scripts {
    unlock: Script,
    extend: Script,
}

/// Key for lock `name` in `environment`.
pub fn lock_key(environment: &str, name: &str) -> String {
    format!("{KEY_PREFIX}:{environment}:{name}")
}

/// Value identifying one acquisition.
pub fn lock_value(now: DateTime<Utc>, holder: &str) -> String {
    format!("ADDED:{}@{}", now.to_rfc3339_opts(SecondsFormat::Millis, true), holder)
}

/// TTL in milliseconds; Redis rejects non-positive `PX`/`PEXPIRE` values.
fn ttl_millis(duration: Duration) -> i64 {
    duration.num_milliseconds().max(1)
}

/// Lock provider keeping leases as expiring Redis keys.
#[derive(Clone)]
pub struct RedisLockProvider {
    conn: ConnectionManager,
    environment: String,
    holder: String,
    clock: SharedClock,
    scripts: Arc<Scripts>,
}

impl RedisLockProvider {
    /// Create a provider over an existing connection.
    pub fn new(conn: ConnectionManager, environment: impl Into<String>, clock: SharedClock) -> Self {
        Self {
            conn,
            environment: environment.into(),
            holder: holder_identity(),
            clock,
            scripts: Arc::new(Scripts {
                unlock: Script::new(UNLOCK_SCRIPT),
                extend: Script::new(EXTEND_SCRIPT),
            }),
        }
    }

    /// Connect to `redis_url` (e.g. `redis://127.0.0.1/`).
    #[instrument(skip(redis_url, clock))]
    pub async fn connect(redis_url: &str, environment: &str, clock: SharedClock) -> LockResult<Self> {
        let client = redis::Client::open(redis_url)
            .map_err(|e| LockError::ConfigError(format!("failed to create redis client: {e}")))?;
        let conn = ConnectionManager::new(client)
            .await
            .map_err(|e| LockError::BackendError(format!("failed to connect redis: {e}")))?;
        Ok(Self::new(conn, environment, clock))
    }

    /// Override the holder written into lock values.
    pub fn with_holder(mut self, holder: impl Into<String>) -> Self {
        self.holder = holder.into();
        self
    }

    pub fn environment(&self) -> &str {
        &self.environment
    }
}

#[async_trait]
impl LockProvider for RedisLockProvider {
    #[instrument(skip(self, config), fields(lock_name = %config.name()))]
    async fn lock(&self, config: &LockConfiguration) -> LockResult<Option<Box<dyn SimpleLock>>> {
        let key = lock_key(&self.environment, config.name());
        let value = lock_value(self.clock.now(), &self.holder);
        let mut conn = self.conn.clone();

        let reply: Option<String> = redis::cmd("SET")
            .arg(&key)
            .arg(&value)
            .arg("NX")
            .arg("PX")
            .arg(ttl_millis(config.lock_at_most_for()))
            .query_async(&mut conn)
            .await?;

        if reply.is_none() {
            debug!(key = %key, "Redis lock key already present");
            return Ok(None);
        }

        Ok(Some(Box::new(RedisLock {
            config: config.clone(),
            key,
            value,
            conn: self.conn.clone(),
            clock: self.clock.clone(),
            scripts: self.scripts.clone(),
            valid: true,
        })))
    }
}

/// Handle for a lease held as a Redis key.
pub struct RedisLock {
    config: LockConfiguration,
    key: String,
    value: String,
    conn: ConnectionManager,
    clock: SharedClock,
    scripts: Arc<Scripts>,
    valid: bool,
}

impl fmt::Debug for RedisLock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RedisLock")
            .field("config", &self.config)
            .field("key", &self.key)
            .field("valid", &self.valid)
            .finish()
    }
}

#[async_trait]
impl SimpleLock for RedisLock {
    fn configuration(&self) -> &LockConfiguration {
        &self.config
    }

    fn is_valid(&self) -> bool {
        self.valid
    }

    async fn unlock(&mut self) -> LockResult<()> {
        ensure_valid(self.valid, &self.config)?;
        let keep_for = (self.config.lock_at_least_until() - self.clock.now())
            .num_milliseconds()
            .max(0);

        let mut conn = self.conn.clone();
        let touched: i64 = self
            .scripts
            .unlock
            .key(&self.key)
            .arg(&self.value)
            .arg(keep_for)
            .invoke_async(&mut conn)
            .await?;
        if touched == 0 {
            debug!(key = %self.key, "Redis lock key no longer ours at release");
        }
        self.valid = false;
        Ok(())
    }

    async fn extend(&mut self, lock_at_most_for: Duration, lock_at_least_for: Duration) -> LockResult<ExtendOutcome> {
        ensure_valid(self.valid, &self.config)?;
        let new_config =
            LockConfiguration::new(self.clock.now(), self.config.name(), lock_at_most_for, lock_at_least_for)?;

        let mut conn = self.conn.clone();
        let extended: i64 = self
            .scripts
            .extend
            .key(&self.key)
            .arg(&self.value)
            .arg(ttl_millis(lock_at_most_for))
            .invoke_async(&mut conn)
            .await?;

        self.valid = false;
        if extended == 1 {
            debug!(key = %self.key, until = %new_config.lock_at_most_until(), "Redis lock extended");
            Ok(ExtendOutcome::Extended(Box::new(RedisLock {
                config: new_config,
                key: self.key.clone(),
                value: self.value.clone(),
                conn: self.conn.clone(),
                clock: self.clock.clone(),
                scripts: self.scripts.clone(),
                valid: true,
            })))
        } else {
            debug!(key = %self.key, "Redis lock could not be extended, lease lost");
            Ok(ExtendOutcome::Lost)
        }
    }
}
