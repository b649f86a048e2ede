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

//! # DCS Common
//!
//! ## Purpose
//! Small building blocks shared by the lock crates: a pluggable wall clock,
//! the identity a process writes into lock records, and tracing setup.
//!
//! ## Architecture Context
//! - **Clock**: every lease computation reads time through [`Clock`] so tests
//!   can drive expiry deterministically with [`ManualClock`]
//! - **Holder identity**: the opaque `locked_by` value stored next to a lease
//! - **Tracing**: `RUST_LOG`-driven subscriber for binaries and tests

pub mod clock;
pub mod holder;
pub mod tracing_setup;

pub use clock::{system_clock, Clock, ManualClock, SharedClock, SystemClock};
pub use holder::holder_identity;
