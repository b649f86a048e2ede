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

//! Lock provider trait for distributed lock coordination.

use crate::accessor::StorageAccessor;
use crate::handle::{SimpleLock, StorageBasedLock};
use crate::{LockConfiguration, LockResult};
use async_trait::async_trait;
use dcs_common::SharedClock;
use std::sync::Arc;
use tracing::{debug, instrument};

/// Turns a [`LockConfiguration`] into a held lease.
///
/// ## Returns
/// - `Ok(Some(handle))`: lock acquired
/// - `Ok(None)`: lock currently held elsewhere
/// - `Err(LockError::BackendError)`: backend failure
#[async_trait]
pub trait LockProvider: Send + Sync {
    async fn lock(&self, config: &LockConfiguration) -> LockResult<Option<Box<dyn SimpleLock>>>;
}

/// Provider for backends implementing [`StorageAccessor`].
///
/// ## Design
/// - **Insert first**: creating the record is the cheap path for a lock name
///   never seen before
/// - **Update second**: otherwise claim the record if its lease has lapsed
/// - At most two backend calls per attempt
#[derive(Clone)]
pub struct StorageBasedLockProvider {
    accessor: Arc<dyn StorageAccessor>,
    clock: SharedClock,
}

impl StorageBasedLockProvider {
    pub fn new(accessor: Arc<dyn StorageAccessor>, clock: SharedClock) -> Self {
        Self { accessor, clock }
    }

    async fn try_acquire(&self, config: &LockConfiguration) -> LockResult<bool> {
        if self.accessor.insert_record(config).await? {
            return Ok(true);
        }
        self.accessor.update_record(config).await
    }
}

#[async_trait]
impl LockProvider for StorageBasedLockProvider {
    #[instrument(skip(self, config), fields(lock_name = %config.name()))]
    async fn lock(&self, config: &LockConfiguration) -> LockResult<Option<Box<dyn SimpleLock>>> {
        match self.try_acquire(config).await {
            Ok(true) => Ok(Some(Box::new(StorageBasedLock::new(
                config.clone(),
                self.accessor.clone(),
                self.clock.clone(),
            )))),
            Ok(false) => Ok(None),
            Err(e) if e.is_lock_conflict() => {
                debug!(error = %e, "Lock acquisition raced with another holder");
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }
}
