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

//! # Tracing Setup
//!
//! ## Purpose
//! Installs a `tracing` subscriber for processes that embed the lock crates.
//!
//! ## Configuration
//! - `RUST_LOG`: Log level filter (e.g., "info", "dcs_locks=debug")

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Initialize structured logging.
///
/// Returns an error when a global subscriber is already installed, so
/// callers that may run more than once (tests) can ignore it.
///
/// ## Examples
/// ```rust,ignore
/// std::env::set_var("RUST_LOG", "dcs_locks=debug");
/// dcs_common::tracing_setup::init_tracing()?;
/// ```
pub fn init_tracing() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(false))
        .try_init()?;

    tracing::info!("Tracing initialized");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_tracing_twice_reports_error() {
        // First call may fail if another test already installed a subscriber.
        let _ = init_tracing();
        assert!(init_tracing().is_err());
    }
}
