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

//! Lock handle state machine.
//!
//! A handle represents one acquired lease. It accepts exactly one terminal
//! operation:
//!
//! ```text
//! Acquired --unlock()--> Unlocked
//! Acquired --extend()--> Extended (new handle) | Lost
//! ```
//!
//! Anything after the terminal operation is a usage error
//! ([`LockError::InvalidState`]).

use crate::accessor::{StorageAccessor, StorageExtension};
use crate::{LockConfiguration, LockError, LockResult};
use async_trait::async_trait;
use chrono::Duration;
use dcs_common::SharedClock;
use std::fmt;
use std::sync::Arc;
use tracing::debug;

/// Result of [`SimpleLock::extend`].
#[derive(Debug)]
pub enum ExtendOutcome {
    /// Lease extended; the returned handle replaces the old one.
    Extended(Box<dyn SimpleLock>),
    /// The lease was taken over or had already lapsed.
    Lost,
    /// The backend cannot extend leases. The original handle is still valid.
    Unsupported,
}

/// A held lease.
#[async_trait]
pub trait SimpleLock: Send + Sync + fmt::Debug {
    /// Configuration the lease was acquired (or last extended) under.
    fn configuration(&self) -> &LockConfiguration;

    /// `false` once the handle was unlocked or extended.
    fn is_valid(&self) -> bool;

    /// Release the lease, honouring `lock_at_least_for`.
    ///
    /// ## Errors
    /// - `LockError::InvalidState`: already unlocked or extended
    /// - `LockError::BackendError`: backend failure
    async fn unlock(&mut self) -> LockResult<()>;

    /// Extend the lease with new durations measured from now.
    ///
    /// ## Errors
    /// - `LockError::InvalidState`: already unlocked or extended
    /// - `LockError::InvalidConfiguration`: invalid durations (handle unchanged)
    /// - `LockError::BackendError`: backend failure (handle unchanged)
    async fn extend(&mut self, lock_at_most_for: Duration, lock_at_least_for: Duration) -> LockResult<ExtendOutcome>;
}

pub(crate) fn ensure_valid(valid: bool, config: &LockConfiguration) -> LockResult<()> {
    if valid {
        Ok(())
    } else {
        Err(LockError::InvalidState(format!(
            "Lock {} is not valid, it has already been unlocked or extended",
            config.name()
        )))
    }
}

/// Handle for leases kept by a [`StorageAccessor`].
pub struct StorageBasedLock {
    config: LockConfiguration,
    accessor: Arc<dyn StorageAccessor>,
    clock: SharedClock,
    valid: bool,
}

impl StorageBasedLock {
    pub fn new(config: LockConfiguration, accessor: Arc<dyn StorageAccessor>, clock: SharedClock) -> Self {
        Self {
            config,
            accessor,
            clock,
            valid: true,
        }
    }
}

impl fmt::Debug for StorageBasedLock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StorageBasedLock")
            .field("config", &self.config)
            .field("valid", &self.valid)
            .finish()
    }
}

#[async_trait]
impl SimpleLock for StorageBasedLock {
    fn configuration(&self) -> &LockConfiguration {
        &self.config
    }

    fn is_valid(&self) -> bool {
        self.valid
    }

    async fn unlock(&mut self) -> LockResult<()> {
        ensure_valid(self.valid, &self.config)?;
        self.accessor.unlock(&self.config).await?;
        self.valid = false;
        Ok(())
    }

    async fn extend(&mut self, lock_at_most_for: Duration, lock_at_least_for: Duration) -> LockResult<ExtendOutcome> {
        ensure_valid(self.valid, &self.config)?;
        let new_config =
            LockConfiguration::new(self.clock.now(), self.config.name(), lock_at_most_for, lock_at_least_for)?;

        match self.accessor.extend(&new_config).await? {
            StorageExtension::Extended => {
                self.valid = false;
                debug!(lock_name = %new_config.name(), until = %new_config.lock_at_most_until(), "Lock extended");
                Ok(ExtendOutcome::Extended(Box::new(StorageBasedLock::new(
                    new_config,
                    self.accessor.clone(),
                    self.clock.clone(),
                ))))
            }
            StorageExtension::Lost => {
                self.valid = false;
                debug!(lock_name = %new_config.name(), "Lock could not be extended, lease lost");
                Ok(ExtendOutcome::Lost)
            }
            StorageExtension::Unsupported => Ok(ExtendOutcome::Unsupported),
        }
    }
}

#[cfg(all(test, feature = "memory-backend"))]
mod tests {
    use super::*;
    use crate::memory::MemoryStorageAccessor;
    use chrono::{TimeZone, Utc};
    use dcs_common::{Clock, ManualClock};

    struct Fixture {
        clock: Arc<ManualClock>,
        accessor: Arc<MemoryStorageAccessor>,
    }

    fn fixture() -> Fixture {
        let clock = Arc::new(ManualClock::new(Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap()));
        let accessor = Arc::new(MemoryStorageAccessor::new("node-a", clock.clone()));
        Fixture { clock, accessor }
    }

    async fn acquired(f: &Fixture, at_most: i64, at_least: i64) -> StorageBasedLock {
        let config = LockConfiguration::new(
            f.clock.now(),
            "job",
            Duration::seconds(at_most),
            Duration::seconds(at_least),
        )
        .unwrap();
        assert!(f.accessor.insert_record(&config).await.unwrap());
        StorageBasedLock::new(config, f.accessor.clone(), f.clock.clone())
    }

    #[tokio::test]
    async fn test_unlock_twice_is_usage_error() {
        let f = fixture();
        let mut lock = acquired(&f, 30, 0).await;
        lock.unlock().await.unwrap();
        assert!(!lock.is_valid());
        assert!(matches!(lock.unlock().await, Err(LockError::InvalidState(_))));
    }

    #[tokio::test]
    async fn test_extend_after_unlock_is_usage_error() {
        let f = fixture();
        let mut lock = acquired(&f, 30, 0).await;
        lock.unlock().await.unwrap();
        let result = lock.extend(Duration::seconds(60), Duration::zero()).await;
        assert!(matches!(result, Err(LockError::InvalidState(_))));
    }

    #[tokio::test]
    async fn test_extend_returns_new_handle_and_invalidates_old() {
        let f = fixture();
        let mut lock = acquired(&f, 30, 0).await;
        f.clock.advance(Duration::seconds(10));

        let outcome = lock.extend(Duration::seconds(60), Duration::zero()).await.unwrap();
        assert!(!lock.is_valid());
        let mut extended = match outcome {
            ExtendOutcome::Extended(handle) => handle,
            other => panic!("unexpected outcome {:?}", other),
        };
        assert!(extended.is_valid());
        assert_eq!(
            extended.configuration().lock_at_most_until(),
            Utc.with_ymd_and_hms(2025, 1, 1, 0, 1, 10).unwrap()
        );
        let record = f.accessor.find_record("job").await.unwrap();
        assert_eq!(record.lock_until, extended.configuration().lock_at_most_until());

        extended.unlock().await.unwrap();
        assert!(matches!(lock.unlock().await, Err(LockError::InvalidState(_))));
    }

    #[tokio::test]
    async fn test_extend_after_expiry_is_lost() {
        let f = fixture();
        let mut lock = acquired(&f, 30, 0).await;
        f.clock.advance(Duration::seconds(31));

        let outcome = lock.extend(Duration::seconds(60), Duration::zero()).await.unwrap();
        assert!(matches!(outcome, ExtendOutcome::Lost));
        assert!(!lock.is_valid());
    }

    #[tokio::test]
    async fn test_extend_with_invalid_durations_keeps_handle_valid() {
        let f = fixture();
        let mut lock = acquired(&f, 30, 0).await;
        let result = lock.extend(Duration::seconds(1), Duration::seconds(2)).await;
        assert!(matches!(result, Err(LockError::InvalidConfiguration(_))));
        assert!(lock.is_valid());
        lock.unlock().await.unwrap();
    }
}
