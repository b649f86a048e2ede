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

//! Error types for distributed lock operations.

use thiserror::Error;

/// Result type for lock operations.
pub type LockResult<T> = Result<T, LockError>;

/// Errors that can occur during lock operations.
///
/// Contention is deliberately absent from the "error" surface callers see:
/// providers map [`LockError::LockAlreadyHeld`] to "not acquired".
#[derive(Error, Debug)]
pub enum LockError {
    /// Invalid lock configuration (empty name, bad durations)
    #[error("Invalid lock configuration: {0}")]
    InvalidConfiguration(String),

    /// Operation on a handle that was already unlocked or extended
    #[error("Invalid lock state: {0}")]
    InvalidState(String),

    /// Lock already held by another holder
    #[error("Lock already held: {0}")]
    LockAlreadyHeld(String),

    /// Lease extension requested outside of any locked task
    #[error("No active lock in the current execution context")]
    NoActiveLock,

    /// Backend error (database, network, etc.)
    #[error("Backend error: {0}")]
    BackendError(String),

    /// Configuration loading error
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// IO error
    #[error("IO error: {0}")]
    IOError(#[from] std::io::Error),
}

impl LockError {
    /// Whether this error only reports that somebody else holds the lock.
    pub fn is_lock_conflict(&self) -> bool {
        matches!(self, LockError::LockAlreadyHeld(_))
    }
}

impl From<serde_yaml::Error> for LockError {
    fn from(err: serde_yaml::Error) -> Self {
        LockError::ConfigError(format!("YAML error: {}", err))
    }
}

#[cfg(any(feature = "sqlite-backend", feature = "postgres-backend", feature = "mysql-backend"))]
impl From<sqlx::Error> for LockError {
    fn from(err: sqlx::Error) -> Self {
        LockError::BackendError(format!("SQL error: {}", err))
    }
}

#[cfg(feature = "redis-backend")]
impl From<redis::RedisError> for LockError {
    fn from(err: redis::RedisError) -> Self {
        LockError::BackendError(format!("Redis error: {}", err))
    }
}
