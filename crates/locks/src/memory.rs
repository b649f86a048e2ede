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

//! In-memory storage accessor (for testing and single-process use).

use crate::accessor::{LockRecord, StorageAccessor, StorageExtension};
use crate::{LockConfiguration, LockResult};
use async_trait::async_trait;
use dcs_common::SharedClock;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// In-memory storage accessor.
///
/// ## Purpose
/// Implements the record contract with a `HashMap` guarded by a single
/// `RwLock`, so each operation is atomic within the process.
///
/// Several "nodes" can share one store through [`MemoryStorageAccessor::with_holder`],
/// which is how tests simulate a fleet.
///
/// ## Limitations
/// - Not persistent (records lost on restart)
/// - Not distributed (single process only)
#[derive(Clone)]
pub struct MemoryStorageAccessor {
    records: Arc<RwLock<HashMap<String, LockRecord>>>,
    holder_id: String,
    clock: SharedClock,
}

impl MemoryStorageAccessor {
    /// Create an empty store written to as `holder_id`.
    pub fn new(holder_id: impl Into<String>, clock: SharedClock) -> Self {
        Self {
            records: Arc::new(RwLock::new(HashMap::new())),
            holder_id: holder_id.into(),
            clock,
        }
    }

    /// Accessor for another holder sharing the same records.
    pub fn with_holder(&self, holder_id: impl Into<String>) -> Self {
        Self {
            records: self.records.clone(),
            holder_id: holder_id.into(),
            clock: self.clock.clone(),
        }
    }

    pub fn holder_id(&self) -> &str {
        &self.holder_id
    }

    /// Current record for `name`, if any.
    pub async fn find_record(&self, name: &str) -> Option<LockRecord> {
        self.records.read().await.get(name).cloned()
    }
}

#[async_trait]
impl StorageAccessor for MemoryStorageAccessor {
    async fn insert_record(&self, config: &LockConfiguration) -> LockResult<bool> {
        let mut records = self.records.write().await;
        if records.contains_key(config.name()) {
            return Ok(false);
        }
        records.insert(
            config.name().to_string(),
            LockRecord {
                name: config.name().to_string(),
                lock_until: config.lock_at_most_until(),
                locked_at: self.clock.now(),
                locked_by: self.holder_id.clone(),
            },
        );
        Ok(true)
    }

    async fn update_record(&self, config: &LockConfiguration) -> LockResult<bool> {
        let mut records = self.records.write().await;
        let now = self.clock.now();
        match records.get_mut(config.name()) {
            Some(record) if record.lock_until <= now => {
                record.lock_until = config.lock_at_most_until();
                record.locked_at = now;
                record.locked_by = self.holder_id.clone();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn unlock(&self, config: &LockConfiguration) -> LockResult<()> {
        let mut records = self.records.write().await;
        if let Some(record) = records.get_mut(config.name()) {
            record.lock_until = config.unlock_time(self.clock.now());
        }
        Ok(())
    }

    async fn extend(&self, config: &LockConfiguration) -> LockResult<StorageExtension> {
        let mut records = self.records.write().await;
        let now = self.clock.now();
        match records.get_mut(config.name()) {
            Some(record) if record.locked_by == self.holder_id && record.lock_until > now => {
                record.lock_until = config.lock_at_most_until();
                Ok(StorageExtension::Extended)
            }
            _ => Ok(StorageExtension::Lost),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, Duration, TimeZone, Utc};
    use dcs_common::{Clock, ManualClock};

    fn start() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap()
    }

    fn config(clock: &ManualClock, at_most: i64, at_least: i64) -> LockConfiguration {
        LockConfiguration::new(
            clock.now(),
            "test-lock",
            Duration::seconds(at_most),
            Duration::seconds(at_least),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_insert_record() {
        let clock = Arc::new(ManualClock::new(start()));
        let accessor = MemoryStorageAccessor::new("node-1", clock.clone());

        assert!(accessor.insert_record(&config(&clock, 30, 0)).await.unwrap());
        let record = accessor.find_record("test-lock").await.unwrap();
        assert_eq!(record.locked_by, "node-1");
        assert_eq!(record.locked_at, start());
        assert_eq!(record.lock_until, start() + Duration::seconds(30));
    }

    #[tokio::test]
    async fn test_insert_record_already_present() {
        let clock = Arc::new(ManualClock::new(start()));
        let node1 = MemoryStorageAccessor::new("node-1", clock.clone());
        let node2 = node1.with_holder("node-2");

        assert!(node1.insert_record(&config(&clock, 30, 0)).await.unwrap());
        assert!(!node2.insert_record(&config(&clock, 30, 0)).await.unwrap());
        assert_eq!(node2.find_record("test-lock").await.unwrap().locked_by, "node-1");
    }

    #[tokio::test]
    async fn test_update_record_only_claims_expired() {
        let clock = Arc::new(ManualClock::new(start()));
        let node1 = MemoryStorageAccessor::new("node-1", clock.clone());
        let node2 = node1.with_holder("node-2");
        node1.insert_record(&config(&clock, 30, 0)).await.unwrap();

        clock.advance(Duration::seconds(29));
        assert!(!node2.update_record(&config(&clock, 30, 0)).await.unwrap());

        clock.advance(Duration::seconds(1));
        assert!(node2.update_record(&config(&clock, 30, 0)).await.unwrap());
        assert_eq!(node2.find_record("test-lock").await.unwrap().locked_by, "node-2");
    }

    #[tokio::test]
    async fn test_update_record_missing() {
        let clock = Arc::new(ManualClock::new(start()));
        let accessor = MemoryStorageAccessor::new("node-1", clock.clone());
        assert!(!accessor.update_record(&config(&clock, 30, 0)).await.unwrap());
    }

    #[tokio::test]
    async fn test_unlock_respects_lock_at_least_for() {
        let clock = Arc::new(ManualClock::new(start()));
        let accessor = MemoryStorageAccessor::new("node-1", clock.clone());
        let cfg = config(&clock, 30, 5);
        accessor.insert_record(&cfg).await.unwrap();

        clock.advance(Duration::milliseconds(100));
        accessor.unlock(&cfg).await.unwrap();
        let record = accessor.find_record("test-lock").await.unwrap();
        assert_eq!(record.lock_until, start() + Duration::seconds(5));
    }

    #[tokio::test]
    async fn test_extend_by_other_holder_is_lost() {
        let clock = Arc::new(ManualClock::new(start()));
        let node1 = MemoryStorageAccessor::new("node-1", clock.clone());
        let node2 = node1.with_holder("node-2");
        node1.insert_record(&config(&clock, 30, 0)).await.unwrap();

        assert_eq!(
            node2.extend(&config(&clock, 60, 0)).await.unwrap(),
            StorageExtension::Lost
        );
        assert_eq!(
            node1.extend(&config(&clock, 60, 0)).await.unwrap(),
            StorageExtension::Extended
        );
    }
}
