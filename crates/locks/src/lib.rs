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

//! # DCS Locks
//!
//! ## Purpose
//! Guarantees that a scheduled task runs on at most one node of a cluster at a
//! time. Nodes coordinate through a shared store holding one lease record per
//! lock name; whoever wins the atomic conditional write runs the task, the
//! others skip it.
//!
//! ## Architecture Context
//! - **[`LockConfiguration`]**: name plus `lock_at_most_for` (safety bound if
//!   the holder dies) and `lock_at_least_for` (minimum hold, suppresses re-runs
//!   when clocks differ slightly)
//! - **[`StorageAccessor`]**: the four atomic record operations a backend provides
//! - **[`LockProvider`]**: turns a configuration into a held [`SimpleLock`] or `None`
//! - **[`LockingTaskExecutor`]**: runs a task under a lock, with reentrancy and
//!   lease extension through a [`LockContext`]
//!
//! ## Design Decisions
//! - **No blocking acquisition**: a held lock means "skip", never "wait"
//! - **Leases, not sessions**: a crashed holder's lock frees itself at
//!   `lock_at_most_for`
//! - **Explicit context**: reentrancy and extension travel with a
//!   [`LockContext`] value instead of thread-local state, so they survive
//!   `.await` points and task migration
//!
//! ## Backend Support
//!
//! - **InMemory**: HashMap-based (feature: `memory-backend`, for testing)
//! - **SQLite**: (feature: `sqlite-backend`)
//! - **PostgreSQL**: (feature: `postgres-backend`)
//! - **MySQL / MariaDB**: (feature: `mysql-backend`)
//! - **Redis**: `SET NX PX` with native TTL (feature: `redis-backend`)
//!
//! SQL backends can compute deadlines with the database server's clock
//! ([`sql::SqlLockConfig::use_db_time`]).
//!
//! ## Examples
//!
//! ### Basic Usage
//! ```rust
//! use dcs_common::system_clock;
//! use dcs_locks::memory::MemoryStorageAccessor;
//! use dcs_locks::{LockContext, LockDefaults, LockingTaskExecutor, StorageBasedLockProvider};
//! use std::sync::Arc;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
//! let clock = system_clock();
//! let accessor = Arc::new(MemoryStorageAccessor::new("node-1", clock.clone()));
//! let provider = Arc::new(StorageBasedLockProvider::new(accessor, clock.clone()));
//! let executor = LockingTaskExecutor::new(provider, clock.clone());
//!
//! let config = LockDefaults::default().configuration(clock.now(), "nightly-report", Some("PT5M"), None)?;
//! let ran = executor
//!     .execute_with_lock(&LockContext::new(), config, |_ctx| async {
//!         // generate the report
//!         Ok::<_, std::io::Error>(())
//!     })
//!     .await?;
//! assert!(ran.was_executed());
//! # Ok(())
//! # }
//! ```

pub mod accessor;
pub mod config;
pub mod configuration;
pub mod context;
pub mod error;
pub mod executor;
pub mod handle;
pub mod provider;
pub mod sql;

#[cfg(feature = "memory-backend")]
pub mod memory;

#[cfg(feature = "redis-backend")]
pub mod redis;

pub use accessor::{LockRecord, StorageAccessor, StorageExtension};
pub use config::{BackendConfig, LockingConfig};
pub use configuration::{parse_duration, LockConfiguration, LockDefaults};
pub use context::{ActiveExtension, LockContext};
pub use error::{LockError, LockResult};
pub use executor::{ExecutionError, LockingTaskExecutor, TaskResult};
pub use handle::{ExtendOutcome, SimpleLock, StorageBasedLock};
pub use provider::{LockProvider, StorageBasedLockProvider};
