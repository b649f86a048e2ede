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

//! Lock context (per call chain).
//!
//! ## Purpose
//! Carries the locks held by one logical call chain, similar to Go's
//! `context.Context`: the executor hands every task it runs a child context
//! scoped to that task's lock, and nested locked calls receive it explicitly.
//! Nothing is thread-local, so the state follows the chain across `.await`
//! points and worker threads.
//!
//! ## State
//! - **Scope**: the lineage of locks acquired by the enclosing tasks. A nested
//!   call for a name in its own lineage runs without touching the backend.
//!   Sibling calls sharing a context do not see each other's locks.
//! - **Active entries**: one per acquisition, keyed by an id owned by the
//!   acquiring call. Only that call releases it, and only a task scoped to it
//!   can extend it ([`LockContext::extend_active_lock`] swaps in the extended
//!   handle so the executor releases the right lease).
//!
//! Entries are removed by a guard, so a call dropped mid-task (timeout,
//! `select!`) leaves nothing behind; its lease lapses at `lock_at_most_until`.
//!
//! Unrelated chains use unrelated contexts and contend on the backend as usual.

use crate::handle::{ExtendOutcome, SimpleLock};
use crate::{LockConfiguration, LockError, LockResult};
use chrono::Duration;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::debug;
use ulid::Ulid;

/// Result of [`LockContext::extend_active_lock`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActiveExtension {
    Extended,
    Lost,
    Unsupported,
}

/// Lease held for one acquisition.
#[derive(Debug)]
pub(crate) enum ActiveLock {
    Held(Box<dyn SimpleLock>),
    /// Extension found the lease gone; nothing left to release.
    Lost,
}

struct Entry {
    name: String,
    /// `None` while an extension is in flight.
    slot: Option<ActiveLock>,
}

#[derive(Default)]
struct ChainState {
    next_id: u64,
    entries: HashMap<u64, Entry>,
}

type SharedState = Arc<Mutex<ChainState>>;

fn lock_state(state: &Mutex<ChainState>) -> MutexGuard<'_, ChainState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

/// One acquired lock in a context's lineage.
struct Scope {
    id: u64,
    name: String,
    parent: Option<Arc<Scope>>,
}

impl Scope {
    fn lineage(&self) -> impl Iterator<Item = &Scope> {
        std::iter::successors(Some(self), |&scope| scope.parent.as_deref())
    }
}

/// Chain-local lock state. Cheap to clone; clones share state.
#[derive(Clone)]
pub struct LockContext {
    chain_id: Arc<str>,
    state: SharedState,
    scope: Option<Arc<Scope>>,
}

impl LockContext {
    /// Context for a new outermost call chain.
    pub fn new() -> Self {
        Self {
            chain_id: Arc::from(Ulid::new().to_string()),
            state: Arc::new(Mutex::new(ChainState::default())),
            scope: None,
        }
    }

    /// Identifier of this chain (for tracing).
    pub fn chain_id(&self) -> &str {
        &self.chain_id
    }

    /// Whether `name` is held by the tasks enclosing this context.
    pub fn contains(&self, name: &str) -> bool {
        self.scope
            .as_deref()
            .is_some_and(|scope| scope.lineage().any(|held| held.name == name))
    }

    /// Number of locks held by the tasks enclosing this context.
    pub fn depth(&self) -> usize {
        self.scope.as_deref().map_or(0, |scope| scope.lineage().count())
    }

    /// `true` when no call on this chain holds a lock.
    pub fn is_empty(&self) -> bool {
        lock_state(&self.state).entries.is_empty()
    }

    /// Configuration of the lease this context's task may extend.
    pub fn active_configuration(&self) -> Option<LockConfiguration> {
        let id = self.scope.as_ref()?.id;
        match lock_state(&self.state).entries.get(&id)?.slot.as_ref() {
            Some(ActiveLock::Held(handle)) => Some(handle.configuration().clone()),
            _ => None,
        }
    }

    /// Extend the lease acquired for the innermost task enclosing this context.
    ///
    /// ## Returns
    /// - `Ok(Extended)`: the new lease replaces the old one and will be released
    ///   when the owning task completes
    /// - `Ok(Lost)`: the lease was taken over or had lapsed
    /// - `Ok(Unsupported)`: the backend cannot extend; the lease is unchanged
    /// - `Err(LockError::NoActiveLock)`: called outside any locked task
    /// - `Err(LockError::InvalidState)`: another extension of the same lease is
    ///   still in flight
    pub async fn extend_active_lock(
        &self,
        lock_at_most_for: Duration,
        lock_at_least_for: Duration,
    ) -> LockResult<ActiveExtension> {
        let id = self.scope.as_ref().map(|scope| scope.id).ok_or(LockError::NoActiveLock)?;
        let mut handle = {
            let mut state = lock_state(&self.state);
            let entry = state.entries.get_mut(&id).ok_or(LockError::NoActiveLock)?;
            match entry.slot.take() {
                Some(ActiveLock::Held(handle)) => handle,
                Some(ActiveLock::Lost) => {
                    entry.slot = Some(ActiveLock::Lost);
                    return Ok(ActiveExtension::Lost);
                }
                None => {
                    return Err(LockError::InvalidState(format!(
                        "extension of lock '{}' already in progress",
                        entry.name
                    )))
                }
            }
        };

        let extension = handle.extend(lock_at_most_for, lock_at_least_for).await;
        let (slot, result) = match extension {
            Ok(ExtendOutcome::Extended(extended)) => (ActiveLock::Held(extended), Ok(ActiveExtension::Extended)),
            Ok(ExtendOutcome::Lost) => {
                debug!(chain_id = %self.chain_id, "Active lock lost during extension");
                (ActiveLock::Lost, Ok(ActiveExtension::Lost))
            }
            Ok(ExtendOutcome::Unsupported) => (ActiveLock::Held(handle), Ok(ActiveExtension::Unsupported)),
            Err(e) => (ActiveLock::Held(handle), Err(e)),
        };

        match lock_state(&self.state).entries.get_mut(&id) {
            Some(entry) => entry.slot = Some(slot),
            None => debug!(chain_id = %self.chain_id, "Lock released while its extension was in flight"),
        }
        result
    }

    /// Record an acquired lock. Returns the context for the task running under
    /// it and the slot through which the acquiring call releases it.
    pub(crate) fn enter(&self, name: &str, handle: Box<dyn SimpleLock>) -> (LockContext, HeldSlot) {
        let id = {
            let mut state = lock_state(&self.state);
            let id = state.next_id;
            state.next_id += 1;
            state.entries.insert(
                id,
                Entry {
                    name: name.to_string(),
                    slot: Some(ActiveLock::Held(handle)),
                },
            );
            id
        };

        let task_ctx = LockContext {
            chain_id: self.chain_id.clone(),
            state: self.state.clone(),
            scope: Some(Arc::new(Scope {
                id,
                name: name.to_string(),
                parent: self.scope.clone(),
            })),
        };
        let slot = HeldSlot {
            state: self.state.clone(),
            id,
            finished: false,
        };
        (task_ctx, slot)
    }
}

impl Default for LockContext {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for LockContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LockContext")
            .field("chain_id", &self.chain_id)
            .field("depth", &self.depth())
            .finish()
    }
}

/// Ownership of one context entry by the call that acquired it.
///
/// Dropping it without [`HeldSlot::finish`] removes the entry; the handle is
/// dropped unreleased.
pub(crate) struct HeldSlot {
    state: SharedState,
    id: u64,
    finished: bool,
}

impl HeldSlot {
    /// Remove the entry and hand back whatever lease it holds now.
    pub(crate) fn finish(mut self) -> Option<ActiveLock> {
        self.finished = true;
        self.remove()
    }

    fn remove(&self) -> Option<ActiveLock> {
        lock_state(&self.state).entries.remove(&self.id).and_then(|entry| entry.slot)
    }
}

impl Drop for HeldSlot {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        if let Some(ActiveLock::Held(handle)) = self.remove() {
            debug!(
                "Locked call for '{}' dropped before completion, lease lapses at {}",
                handle.configuration().name(),
                handle.configuration().lock_at_most_until()
            );
        }
    }
}
