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

//! Storage backend contract.
//!
//! A [`StorageAccessor`] owns the persisted lock records. Every operation
//! must be a single atomic conditional write on the backend; callers never
//! read a record and then decide to write it.

use crate::{LockConfiguration, LockResult};
use async_trait::async_trait;
use chrono::{DateTime, Utc};

/// Persisted state of one named lock, as stored by a backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockRecord {
    pub name: String,
    pub lock_until: DateTime<Utc>,
    pub locked_at: DateTime<Utc>,
    pub locked_by: String,
}

/// Outcome of a storage-level lease extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageExtension {
    /// Lease moved forward; caller still owns the record.
    Extended,
    /// Record no longer owned by the caller or already lapsed.
    Lost,
    /// Backend cannot extend leases.
    Unsupported,
}

/// Atomic record operations a lock backend must provide.
#[async_trait]
pub trait StorageAccessor: Send + Sync {
    /// Insert the record if absent.
    ///
    /// ## Returns
    /// - `Ok(true)`: record created, lock acquired
    /// - `Ok(false)`: record already exists
    async fn insert_record(&self, config: &LockConfiguration) -> LockResult<bool>;

    /// Claim an existing record whose `lock_until` has passed.
    ///
    /// ## Returns
    /// - `Ok(true)`: record claimed, lock acquired
    /// - `Ok(false)`: somebody holds a valid lease
    async fn update_record(&self, config: &LockConfiguration) -> LockResult<bool>;

    /// Release the lease, keeping it until `config.unlock_time(now)`.
    async fn unlock(&self, config: &LockConfiguration) -> LockResult<()>;

    /// Move `lock_until` to `config.lock_at_most_until()` if this holder still
    /// owns a live lease.
    async fn extend(&self, _config: &LockConfiguration) -> LockResult<StorageExtension> {
        Ok(StorageExtension::Unsupported)
    }
}
