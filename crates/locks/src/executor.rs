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

//! Task execution engine.
//!
//! ## Purpose
//! Runs a task only if its named lock can be acquired, then releases the
//! lease (honouring `lock_at_least_for`) once the task completes.
//!
//! ## Flow
//! 1. Name already held by this [`LockContext`]: run the task directly
//!    (reentrant call, no backend traffic)
//! 2. Ask the [`LockProvider`]; not acquired means "not executed"
//! 3. Acquired: record the lock in the context, run the task with a child
//!    context scoped to it, then release whatever handle is active for that
//!    acquisition (it may have been replaced by an extension)
//!
//! Task failures, including panics, surface only after the release ran. A
//! call dropped before completion releases nothing: its context entry is
//! removed and the lease lapses at `lock_at_most_until`.

use crate::context::{ActiveLock, HeldSlot, LockContext};
use crate::provider::LockProvider;
use crate::{LockConfiguration, LockError, LockResult};
use dcs_common::{system_clock, SharedClock};
use futures::FutureExt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, error, instrument, warn};

/// Outcome of a locked task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskResult<T> {
    executed: bool,
    result: Option<T>,
}

impl<T> TaskResult<T> {
    pub fn executed(result: T) -> Self {
        Self {
            executed: true,
            result: Some(result),
        }
    }

    pub fn not_executed() -> Self {
        Self {
            executed: false,
            result: None,
        }
    }

    pub fn was_executed(&self) -> bool {
        self.executed
    }

    pub fn result(&self) -> Option<&T> {
        self.result.as_ref()
    }

    pub fn into_result(self) -> Option<T> {
        self.result
    }
}

impl<U> TaskResult<Option<U>> {
    /// "Not executed" and "executed, returned `None`" both become `None`.
    pub fn flatten(self) -> Option<U> {
        self.result.flatten()
    }
}

/// Failure of [`LockingTaskExecutor::execute_with_lock`].
#[derive(Debug, Error)]
pub enum ExecutionError<E> {
    /// Acquiring or releasing the lock failed
    #[error(transparent)]
    Lock(#[from] LockError),

    /// The task itself failed (after its lock was released)
    #[error("Task failed: {0}")]
    Task(E),
}

/// Executes tasks under distributed locks.
///
/// ## Example
/// ```rust,no_run
/// use dcs_locks::{LockConfiguration, LockContext, LockingTaskExecutor};
/// # async fn example(executor: LockingTaskExecutor, config: LockConfiguration) -> Result<(), Box<dyn std::error::Error>> {
/// let ctx = LockContext::new();
/// let result = executor
///     .execute_with_lock(&ctx, config, |_ctx| async move { Ok::<_, std::io::Error>(42) })
///     .await?;
/// if result.was_executed() {
///     println!("computed {:?}", result.result());
/// }
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct LockingTaskExecutor {
    provider: Arc<dyn LockProvider>,
    clock: SharedClock,
}

impl LockingTaskExecutor {
    pub fn new(provider: Arc<dyn LockProvider>, clock: SharedClock) -> Self {
        Self { provider, clock }
    }

    pub fn with_system_clock(provider: Arc<dyn LockProvider>) -> Self {
        Self::new(provider, system_clock())
    }

    /// Run `task` as the outermost locked call of a new call chain.
    pub async fn run_with_lock<T, E, F, Fut>(
        &self,
        config: LockConfiguration,
        task: F,
    ) -> Result<TaskResult<T>, ExecutionError<E>>
    where
        F: FnOnce(LockContext) -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let ctx = LockContext::new();
        self.execute_with_lock(&ctx, config, task).await
    }

    /// Run a task that produces no value; returns whether it ran.
    pub async fn execute<E, F, Fut>(
        &self,
        ctx: &LockContext,
        config: LockConfiguration,
        task: F,
    ) -> Result<bool, ExecutionError<E>>
    where
        F: FnOnce(LockContext) -> Fut,
        Fut: Future<Output = Result<(), E>>,
    {
        self.execute_with_lock(ctx, config, task)
            .await
            .map(|result| result.was_executed())
    }

    /// Run `task` if `config`'s lock is free or already held by `ctx`.
    ///
    /// ## Returns
    /// - `Ok(TaskResult)`: executed with its value, or not executed (contention)
    /// - `Err(ExecutionError::Lock)`: backend failure while acquiring/releasing
    /// - `Err(ExecutionError::Task)`: the task failed; its lock was released first
    #[instrument(skip_all, fields(lock_name = %config.name(), chain_id = %ctx.chain_id()))]
    pub async fn execute_with_lock<T, E, F, Fut>(
        &self,
        ctx: &LockContext,
        config: LockConfiguration,
        task: F,
    ) -> Result<TaskResult<T>, ExecutionError<E>>
    where
        F: FnOnce(LockContext) -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let name = config.name().to_string();
        if ctx.contains(&name) {
            debug!("Already locked '{}'", name);
            return task(ctx.clone())
                .await
                .map(TaskResult::executed)
                .map_err(ExecutionError::Task);
        }

        let lock = match self.provider.lock(&config).await? {
            Some(lock) => lock,
            None => {
                debug!("Not executing '{}'. It's locked.", name);
                return Ok(TaskResult::not_executed());
            }
        };

        let (task_ctx, slot) = ctx.enter(&name, lock);
        debug!(
            "Locked '{}', lock will be held at most until {}",
            name,
            config.lock_at_most_until()
        );

        let outcome = AssertUnwindSafe(async move { task(task_ctx).await })
            .catch_unwind()
            .await;
        let released = self.release(slot, &config).await;

        match outcome {
            Ok(Ok(value)) => {
                released?;
                Ok(TaskResult::executed(value))
            }
            Ok(Err(task_error)) => {
                if let Err(e) = released {
                    error!(error = %e, "Failed to release lock '{}' after task failure", name);
                }
                Err(ExecutionError::Task(task_error))
            }
            Err(panic) => {
                if let Err(e) = released {
                    error!(error = %e, "Failed to release lock '{}' after task panic", name);
                }
                std::panic::resume_unwind(panic)
            }
        }
    }

    /// Release the lease held by `slot`, honouring `lock_at_least_for`.
    ///
    /// The slot is empty only when the task dropped an extension of its lease
    /// mid-flight. The handle went with that extension, so the originally
    /// acquired lease is not released here: it lapses at `lock_at_most_until`.
    async fn release(&self, slot: HeldSlot, config: &LockConfiguration) -> LockResult<()> {
        let name = config.name();
        match slot.finish() {
            Some(ActiveLock::Held(mut active)) => {
                active.unlock().await?;
                let lock_at_least_until = active.configuration().lock_at_least_until();
                if lock_at_least_until > self.clock.now() {
                    debug!("Task finished, lock '{}' will be released at {}", name, lock_at_least_until);
                } else {
                    debug!("Task finished, lock '{}' released", name);
                }
            }
            Some(ActiveLock::Lost) => {
                debug!("Task finished, lock '{}' was lost while extending, nothing to release", name);
            }
            None => {
                warn!(
                    "No active lock for '{}' at release, an extension was dropped mid-flight. Lease lapses at {}",
                    name,
                    config.lock_at_most_until()
                );
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_task_result_projections() {
        let executed = TaskResult::executed(7);
        assert!(executed.was_executed());
        assert_eq!(executed.result(), Some(&7));
        assert_eq!(executed.into_result(), Some(7));

        let skipped: TaskResult<i32> = TaskResult::not_executed();
        assert!(!skipped.was_executed());
        assert_eq!(skipped.into_result(), None);
    }

    #[test]
    fn test_optional_result_flattens() {
        assert_eq!(TaskResult::executed(Some("x")).flatten(), Some("x"));
        assert_eq!(TaskResult::<Option<&str>>::executed(None).flatten(), None);
        assert_eq!(TaskResult::<Option<&str>>::not_executed().flatten(), None);
    }

    #[test]
    fn test_execution_error_display() {
        let lock: ExecutionError<String> = LockError::BackendError("down".to_string()).into();
        assert_eq!(lock.to_string(), "Backend error: down");
        let task: ExecutionError<String> = ExecutionError::Task("boom".to_string());
        assert_eq!(task.to_string(), "Task failed: boom");
    }
}
