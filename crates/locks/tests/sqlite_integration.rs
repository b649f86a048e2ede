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

//! SQLite storage integration tests.
//!
//! These tests verify:
//! - Release keeps the row until `lock_at_least_for`
//! - Unreleased rows become claimable at `lock_at_most_for`, never before
//! - Concurrent first acquisitions from two pools: exactly one winner
//! - Lease extension through the handle
//! - The server-time SQLite dialect

#[cfg(feature = "sqlite-backend")]
mod tests {
    use chrono::{DateTime, Duration, Utc};
    use dcs_common::{system_clock, Clock, ManualClock, SharedClock};
    use dcs_locks::sql::{Dialect, SqlLockConfig, SqlPool, SqlStorageAccessor};
    use dcs_locks::{
        ExtendOutcome, LockConfiguration, LockContext, LockProvider, LockingTaskExecutor, StorageAccessor,
        StorageBasedLockProvider,
    };
    use std::sync::Arc;

    struct Node {
        accessor: Arc<SqlStorageAccessor>,
        provider: StorageBasedLockProvider,
    }

    async fn node(pool: SqlPool, locked_by: &str, use_db_time: bool, clock: SharedClock) -> Node {
        let mut config = SqlLockConfig::default().with_locked_by(locked_by);
        config.use_db_time = use_db_time;
        let accessor = Arc::new(SqlStorageAccessor::new(pool, config, clock.clone()).await.unwrap());
        accessor.create_schema().await.unwrap();
        let provider = StorageBasedLockProvider::new(accessor.clone(), clock);
        Node { accessor, provider }
    }

    /// Two nodes sharing one in-memory database and one manual clock.
    async fn cluster(clock: Arc<ManualClock>) -> (Node, Node) {
        let pool = SqlPool::connect("sqlite::memory:").await.unwrap();
        let a = node(pool.clone(), "node-a", false, clock.clone()).await;
        let b = node(pool, "node-b", false, clock).await;
        (a, b)
    }

    fn config(now: DateTime<Utc>, name: &str, at_most: Duration, at_least: Duration) -> LockConfiguration {
        LockConfiguration::new(now, name, at_most, at_least).unwrap()
    }

    #[tokio::test]
    async fn test_release_keeps_lock_until_at_least() {
        let clock = Arc::new(ManualClock::starting_now());
        let (a, _) = cluster(clock.clone()).await;
        let t0 = clock.now();

        let mut lock = a
            .provider
            .lock(&config(t0, "job-1", Duration::seconds(30), Duration::seconds(5)))
            .await
            .unwrap()
            .unwrap();
        clock.advance(Duration::seconds(1));
        lock.unlock().await.unwrap();

        let record = a.accessor.find_record("job-1").await.unwrap().unwrap();
        assert_eq!(record.locked_at, t0);
        assert_eq!(record.locked_by, "node-a");
        // max(locked_at + at_least, release time)
        assert_eq!(record.lock_until, t0 + Duration::seconds(5));
    }

    #[tokio::test]
    async fn test_release_after_at_least_uses_release_time() {
        let clock = Arc::new(ManualClock::starting_now());
        let (a, _) = cluster(clock.clone()).await;

        let mut lock = a
            .provider
            .lock(&config(clock.now(), "job-1", Duration::seconds(30), Duration::seconds(2)))
            .await
            .unwrap()
            .unwrap();
        clock.advance(Duration::seconds(10));
        lock.unlock().await.unwrap();

        let record = a.accessor.find_record("job-1").await.unwrap().unwrap();
        assert_eq!(record.lock_until, clock.now());
    }

    #[tokio::test]
    async fn test_at_least_blocks_other_nodes_after_release() {
        let clock = Arc::new(ManualClock::starting_now());
        let (a, b) = cluster(clock.clone()).await;
        let t0 = clock.now();

        let mut lock = a
            .provider
            .lock(&config(t0, "report", Duration::seconds(30), Duration::seconds(5)))
            .await
            .unwrap()
            .unwrap();
        clock.advance(Duration::milliseconds(100));
        lock.unlock().await.unwrap();

        for offset in [1_000, 4_900] {
            clock.set(t0 + Duration::milliseconds(offset));
            let attempt = config(clock.now(), "report", Duration::seconds(30), Duration::zero());
            assert!(b.provider.lock(&attempt).await.unwrap().is_none(), "claimed at +{offset}ms");
        }

        clock.set(t0 + Duration::seconds(5));
        let attempt = config(clock.now(), "report", Duration::seconds(30), Duration::zero());
        assert!(b.provider.lock(&attempt).await.unwrap().is_some());
        assert_eq!(b.accessor.find_record("report").await.unwrap().unwrap().locked_by, "node-b");
    }

    #[tokio::test]
    async fn test_unreleased_lock_expires_at_most_for() {
        let clock = Arc::new(ManualClock::starting_now());
        let (a, b) = cluster(clock.clone()).await;
        let t0 = clock.now();

        // holder dies without unlocking
        let crashed = a
            .provider
            .lock(&config(t0, "job-1", Duration::seconds(30), Duration::zero()))
            .await
            .unwrap();
        assert!(crashed.is_some());
        drop(crashed);

        clock.set(t0 + Duration::seconds(29));
        let attempt = config(clock.now(), "job-1", Duration::seconds(30), Duration::zero());
        assert!(b.provider.lock(&attempt).await.unwrap().is_none());

        clock.set(t0 + Duration::seconds(30));
        let attempt = config(clock.now(), "job-1", Duration::seconds(30), Duration::zero());
        assert!(b.provider.lock(&attempt).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_extend_moves_lock_until() {
        let clock = Arc::new(ManualClock::starting_now());
        let (a, b) = cluster(clock.clone()).await;
        let t0 = clock.now();

        let mut lock = a
            .provider
            .lock(&config(t0, "long-job", Duration::seconds(10), Duration::zero()))
            .await
            .unwrap()
            .unwrap();

        clock.advance(Duration::seconds(5));
        let mut extended = match lock.extend(Duration::seconds(30), Duration::zero()).await.unwrap() {
            ExtendOutcome::Extended(handle) => handle,
            other => panic!("expected extension, got {other:?}"),
        };
        assert!(!lock.is_valid());
        assert_eq!(
            a.accessor.find_record("long-job").await.unwrap().unwrap().lock_until,
            t0 + Duration::seconds(35)
        );

        // original deadline passed, extended lease still holds
        clock.set(t0 + Duration::seconds(20));
        let attempt = config(clock.now(), "long-job", Duration::seconds(30), Duration::zero());
        assert!(b.provider.lock(&attempt).await.unwrap().is_none());

        extended.unlock().await.unwrap();
        assert!(b.provider.lock(&attempt).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_extend_after_takeover_is_lost() {
        let clock = Arc::new(ManualClock::starting_now());
        let (a, b) = cluster(clock.clone()).await;
        let t0 = clock.now();

        let mut lock = a
            .provider
            .lock(&config(t0, "job-1", Duration::seconds(10), Duration::zero()))
            .await
            .unwrap()
            .unwrap();

        clock.set(t0 + Duration::seconds(11));
        let attempt = config(clock.now(), "job-1", Duration::seconds(30), Duration::zero());
        assert!(b.provider.lock(&attempt).await.unwrap().is_some());

        let outcome = lock.extend(Duration::seconds(30), Duration::zero()).await.unwrap();
        assert!(matches!(outcome, ExtendOutcome::Lost));
        assert_eq!(a.accessor.find_record("job-1").await.unwrap().unwrap().locked_by, "node-b");
    }

    #[tokio::test]
    async fn test_concurrent_first_acquisition_single_winner() {
        let dir = tempfile::tempdir().unwrap();
        let url = format!("sqlite://{}", dir.path().join("locks.db").display());
        let clock = system_clock();

        let a = node(SqlPool::connect(&url).await.unwrap(), "node-a", false, clock.clone()).await;
        let b = node(SqlPool::connect(&url).await.unwrap(), "node-b", false, clock.clone()).await;

        for i in 0..10 {
            let name = format!("job-{i}");
            let cfg = config(clock.now(), &name, Duration::seconds(30), Duration::zero());
            let (left, right) = tokio::join!(a.provider.lock(&cfg), b.provider.lock(&cfg));
            let winners = [left.unwrap().is_some(), right.unwrap().is_some()]
                .into_iter()
                .filter(|won| *won)
                .count();
            assert_eq!(winners, 1, "lock {name}");
        }
    }

    #[tokio::test]
    async fn test_server_time_dialect() {
        let pool = SqlPool::connect("sqlite::memory:").await.unwrap();
        let clock = system_clock();
        let a = node(pool.clone(), "node-a", true, clock.clone()).await;
        let b = node(pool, "node-b", true, clock.clone()).await;
        assert_eq!(a.accessor.statements().dialect(), Dialect::Sqlite);

        let cfg = config(clock.now(), "db-time", Duration::seconds(30), Duration::seconds(10));
        let mut lock = a.provider.lock(&cfg).await.unwrap().unwrap();
        assert!(b.provider.lock(&cfg).await.unwrap().is_none());

        let record = a.accessor.find_record("db-time").await.unwrap().unwrap();
        let held_for = (record.lock_until - record.locked_at).num_milliseconds();
        assert!((29_995..=30_005).contains(&held_for), "held for {held_for}ms");

        lock.unlock().await.unwrap();
        let record = a.accessor.find_record("db-time").await.unwrap().unwrap();
        let kept_for = (record.lock_until - record.locked_at).num_milliseconds();
        assert!((9_995..=10_005).contains(&kept_for), "kept for {kept_for}ms");
        assert!(b.provider.lock(&cfg).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_server_time_unlock_requires_holder() {
        let pool = SqlPool::connect("sqlite::memory:").await.unwrap();
        let clock = system_clock();
        let a = node(pool.clone(), "node-a", true, clock.clone()).await;
        let b = node(pool, "node-b", true, clock.clone()).await;

        let cfg = config(clock.now(), "owned", Duration::seconds(30), Duration::zero());
        let _held = a.provider.lock(&cfg).await.unwrap().unwrap();
        let before = a.accessor.find_record("owned").await.unwrap().unwrap();

        // node-b's unlock statement matches no row
        b.accessor.unlock(&cfg).await.unwrap();
        let after = a.accessor.find_record("owned").await.unwrap().unwrap();
        assert_eq!(before, after);
    }

    #[tokio::test]
    async fn test_executor_over_sqlite() {
        let clock = Arc::new(ManualClock::starting_now());
        let (a, b) = cluster(clock.clone()).await;
        let executor_a = LockingTaskExecutor::new(Arc::new(a.provider), clock.clone());
        let executor_b = LockingTaskExecutor::new(Arc::new(b.provider), clock.clone());
        let t0 = clock.now();

        let ran = executor_a
            .execute_with_lock(
                &LockContext::new(),
                config(t0, "nightly", Duration::seconds(30), Duration::seconds(30)),
                |_| async { Ok::<_, std::io::Error>("done") },
            )
            .await
            .unwrap();
        assert_eq!(ran.into_result(), Some("done"));

        clock.advance(Duration::seconds(10));
        let skipped = executor_b
            .execute(
                &LockContext::new(),
                config(clock.now(), "nightly", Duration::seconds(30), Duration::zero()),
                |_| async { Ok::<_, std::io::Error>(()) },
            )
            .await
            .unwrap();
        assert!(!skipped);
    }
}
