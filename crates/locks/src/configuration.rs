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

//! Lock configuration value object.
//!
//! A [`LockConfiguration`] is created fresh for every task invocation and
//! describes the lease requested for one named lock:
//!
//! - `lock_at_most_for`: the lease lapses after this duration even if the
//!   holder never releases it (the holder most likely died)
//! - `lock_at_least_for`: the lease is kept at least this long even when the
//!   task finishes earlier, so nodes with skewed clocks cannot re-run it

use crate::{LockError, LockResult};
use chrono::{DateTime, Duration, Utc};
use std::fmt;

/// Immutable description of one requested lease.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockConfiguration {
    name: String,
    created_at: DateTime<Utc>,
    lock_at_most_for: Duration,
    lock_at_least_for: Duration,
    lock_at_most_until: DateTime<Utc>,
    lock_at_least_until: DateTime<Utc>,
}

impl LockConfiguration {
    /// Create and validate a configuration.
    ///
    /// ## Errors
    /// `LockError::InvalidConfiguration` when the name is empty, a duration is
    /// negative or too large, or `lock_at_least_for > lock_at_most_for`.
    pub fn new(
        created_at: DateTime<Utc>,
        name: impl Into<String>,
        lock_at_most_for: Duration,
        lock_at_least_for: Duration,
    ) -> LockResult<Self> {
        let name = name.into();
        if name.is_empty() {
            return Err(LockError::InvalidConfiguration("lock name can not be empty".to_string()));
        }
        if lock_at_most_for < Duration::zero() {
            return Err(LockError::InvalidConfiguration(format!(
                "lockAtMostFor is negative for lock '{}'",
                name
            )));
        }
        if lock_at_least_for < Duration::zero() {
            return Err(LockError::InvalidConfiguration(format!(
                "lockAtLeastFor is negative for lock '{}'",
                name
            )));
        }
        if lock_at_least_for > lock_at_most_for {
            return Err(LockError::InvalidConfiguration(format!(
                "lockAtLeastFor is longer than lockAtMostFor for lock '{}'",
                name
            )));
        }
        // Backends bind durations as microseconds.
        if lock_at_most_for.num_microseconds().is_none() {
            return Err(LockError::InvalidConfiguration(format!(
                "lockAtMostFor is too large for lock '{}'",
                name
            )));
        }

        let lock_at_most_until = created_at.checked_add_signed(lock_at_most_for).ok_or_else(|| {
            LockError::InvalidConfiguration(format!("lockAtMostUntil overflows for lock '{}'", name))
        })?;
        let lock_at_least_until = created_at.checked_add_signed(lock_at_least_for).ok_or_else(|| {
            LockError::InvalidConfiguration(format!("lockAtLeastUntil overflows for lock '{}'", name))
        })?;

        Ok(Self {
            name,
            created_at,
            lock_at_most_for,
            lock_at_least_for,
            lock_at_most_until,
            lock_at_least_until,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn lock_at_most_for(&self) -> Duration {
        self.lock_at_most_for
    }

    pub fn lock_at_least_for(&self) -> Duration {
        self.lock_at_least_for
    }

    /// `created_at + lock_at_most_for`
    pub fn lock_at_most_until(&self) -> DateTime<Utc> {
        self.lock_at_most_until
    }

    /// `created_at + lock_at_least_for`
    pub fn lock_at_least_until(&self) -> DateTime<Utc> {
        self.lock_at_least_until
    }

    /// Either `now` or `lock_at_least_until`, whichever is later.
    pub fn unlock_time(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        now.max(self.lock_at_least_until)
    }

    pub(crate) fn lock_at_most_for_micros(&self) -> i64 {
        self.lock_at_most_for.num_microseconds().unwrap_or(i64::MAX)
    }

    pub(crate) fn lock_at_least_for_micros(&self) -> i64 {
        // lock_at_least_for <= lock_at_most_for, which was checked to fit.
        self.lock_at_least_for.num_microseconds().unwrap_or(i64::MAX)
    }
}

impl fmt::Display for LockConfiguration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "LockConfiguration{{name='{}', lockAtMostFor={}, lockAtLeastFor={}}}",
            self.name, self.lock_at_most_for, self.lock_at_least_for
        )
    }
}

/// Defaults applied when a lock definition leaves a duration unset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockDefaults {
    pub lock_at_most_for: Duration,
    pub lock_at_least_for: Duration,
}

impl Default for LockDefaults {
    fn default() -> Self {
        Self {
            lock_at_most_for: Duration::seconds(30),
            lock_at_least_for: Duration::zero(),
        }
    }
}

impl LockDefaults {
    /// Build a configuration from a lock definition whose durations are strings.
    ///
    /// `None` or blank strings fall back to the defaults.
    pub fn configuration(
        &self,
        now: DateTime<Utc>,
        name: &str,
        lock_at_most_for: Option<&str>,
        lock_at_least_for: Option<&str>,
    ) -> LockResult<LockConfiguration> {
        let at_most = match lock_at_most_for.map(str::trim).filter(|s| !s.is_empty()) {
            Some(s) => parse_duration(s)?,
            None => self.lock_at_most_for,
        };
        let at_least = match lock_at_least_for.map(str::trim).filter(|s| !s.is_empty()) {
            Some(s) => parse_duration(s)?,
            None => self.lock_at_least_for,
        };
        LockConfiguration::new(now, name, at_most, at_least)
    }
}

/// Parse a lock duration.
///
/// Accepted forms:
/// - plain integer: milliseconds (`"5000"`)
/// - ISO-8601: `"PT30S"`, `"PT1H30M"`, `"PT0.5S"`, `"P1DT2H"`
/// - human readable: `"30s"`, `"5m"`, `"1h 30m"`, `"250ms"`
pub fn parse_duration(input: &str) -> LockResult<Duration> {
    let s = input.trim();
    if s.is_empty() {
        return Err(LockError::InvalidConfiguration("empty duration".to_string()));
    }

    if s.bytes().all(|b| b.is_ascii_digit()) {
        let millis: i64 = s
            .parse()
            .map_err(|e| LockError::InvalidConfiguration(format!("invalid duration '{}': {}", s, e)))?;
        return Ok(Duration::milliseconds(millis));
    }

    if s.starts_with('P') || s.starts_with('p') {
        return parse_iso8601(s);
    }

    let std_duration = humantime::parse_duration(s)
        .map_err(|e| LockError::InvalidConfiguration(format!("invalid duration '{}': {}", s, e)))?;
    Duration::from_std(std_duration)
        .map_err(|e| LockError::InvalidConfiguration(format!("invalid duration '{}': {}", s, e)))
}

fn parse_iso8601(input: &str) -> LockResult<Duration> {
    let invalid = || LockError::InvalidConfiguration(format!("invalid ISO-8601 duration '{}'", input));

    let upper = input.to_ascii_uppercase();
    let body = upper.strip_prefix('P').ok_or_else(invalid)?;
    let (date_part, time_part) = match body.split_once('T') {
        Some((d, t)) => {
            if t.is_empty() {
                return Err(invalid());
            }
            (d, Some(t))
        }
        None => (body, None),
    };
    if date_part.is_empty() && time_part.is_none() {
        return Err(invalid());
    }

    let mut total = Duration::zero();
    for (value, unit) in iso_components(date_part).ok_or_else(invalid)? {
        match unit {
            'D' => total += whole_units(value, 86_400_000).ok_or_else(invalid)?,
            _ => return Err(invalid()),
        }
    }
    if let Some(time_part) = time_part {
        for (value, unit) in iso_components(time_part).ok_or_else(invalid)? {
            let component = match unit {
                'H' => whole_units(value, 3_600_000),
                'M' => whole_units(value, 60_000),
                'S' => fractional_seconds(value),
                _ => None,
            };
            total += component.ok_or_else(invalid)?;
        }
    }
    Ok(total)
}

/// Split `"1H30M"` into `[("1", 'H'), ("30", 'M')]`.
fn iso_components(part: &str) -> Option<Vec<(&str, char)>> {
    let mut out = Vec::new();
    let mut start = 0;
    for (idx, ch) in part.char_indices() {
        if ch.is_ascii_alphabetic() {
            let value = &part[start..idx];
            if value.is_empty() {
                return None;
            }
            out.push((value, ch));
            start = idx + ch.len_utf8();
        }
    }
    if start != part.len() {
        return None;
    }
    Some(out)
}

fn whole_units(value: &str, millis_per_unit: i64) -> Option<Duration> {
    if !value.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let n: i64 = value.parse().ok()?;
    Some(Duration::milliseconds(n.checked_mul(millis_per_unit)?))
}

fn fractional_seconds(value: &str) -> Option<Duration> {
    let (whole, frac) = match value.split_once('.') {
        Some((w, f)) => (w, f),
        None => (value, ""),
    };
    if whole.is_empty() || !whole.bytes().all(|b| b.is_ascii_digit()) || !frac.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let secs: i64 = whole.parse().ok()?;
    let mut nanos: i64 = 0;
    for (i, digit) in frac.bytes().take(9).enumerate() {
        nanos += i64::from(digit - b'0') * 10_i64.pow(8 - i as u32);
    }
    Duration::try_seconds(secs)?.checked_add(&Duration::nanoseconds(nanos))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, 1, 10, 0, 0).unwrap()
    }

    #[test]
    fn test_derived_instants() {
        let config = LockConfiguration::new(t0(), "job-1", Duration::seconds(30), Duration::seconds(5)).unwrap();
        assert_eq!(config.lock_at_most_until(), t0() + Duration::seconds(30));
        assert_eq!(config.lock_at_least_until(), t0() + Duration::seconds(5));
        assert!(config.lock_at_least_until() <= config.lock_at_most_until());
    }

    #[test]
    fn test_unlock_time_is_never_before_lock_at_least_until() {
        let config = LockConfiguration::new(t0(), "job-1", Duration::seconds(30), Duration::seconds(5)).unwrap();
        assert_eq!(config.unlock_time(t0() + Duration::milliseconds(100)), t0() + Duration::seconds(5));
        assert_eq!(config.unlock_time(t0() + Duration::seconds(7)), t0() + Duration::seconds(7));
    }

    #[test]
    fn test_at_least_longer_than_at_most_fails() {
        let result = LockConfiguration::new(t0(), "job-1", Duration::seconds(5), Duration::seconds(6));
        assert!(matches!(result, Err(LockError::InvalidConfiguration(_))));
    }

    #[test]
    fn test_negative_at_most_fails() {
        let result = LockConfiguration::new(t0(), "job-1", Duration::seconds(-1), Duration::zero());
        assert!(matches!(result, Err(LockError::InvalidConfiguration(_))));
    }

    #[test]
    fn test_empty_name_fails() {
        let result = LockConfiguration::new(t0(), "", Duration::seconds(1), Duration::zero());
        assert!(matches!(result, Err(LockError::InvalidConfiguration(_))));
    }

    #[test]
    fn test_zero_durations_are_valid() {
        let config = LockConfiguration::new(t0(), "job", Duration::zero(), Duration::zero()).unwrap();
        assert_eq!(config.lock_at_most_until(), t0());
    }

    #[test]
    fn test_display() {
        let config = LockConfiguration::new(t0(), "job-1", Duration::seconds(30), Duration::zero()).unwrap();
        assert!(config.to_string().starts_with("LockConfiguration{name='job-1'"));
    }

    #[test]
    fn test_parse_duration_forms() {
        assert_eq!(parse_duration("5000").unwrap(), Duration::seconds(5));
        assert_eq!(parse_duration("PT30S").unwrap(), Duration::seconds(30));
        assert_eq!(parse_duration("pt1h30m").unwrap(), Duration::minutes(90));
        assert_eq!(parse_duration("PT0.25S").unwrap(), Duration::milliseconds(250));
        assert_eq!(parse_duration("P1DT1S").unwrap(), Duration::days(1) + Duration::seconds(1));
        assert_eq!(parse_duration("30s").unwrap(), Duration::seconds(30));
        assert_eq!(parse_duration("1h 30m").unwrap(), Duration::minutes(90));
        assert_eq!(parse_duration("250ms").unwrap(), Duration::milliseconds(250));
    }

    #[test]
    fn test_parse_duration_rejects_garbage() {
        for input in ["", "  ", "P", "PT", "PTS", "PT1X", "P1H", "thirty", "-5s"] {
            assert!(parse_duration(input).is_err(), "accepted {:?}", input);
        }
    }

    #[test]
    fn test_defaults_fill_missing_durations() {
        let defaults = LockDefaults {
            lock_at_most_for: Duration::minutes(10),
            lock_at_least_for: Duration::seconds(1),
        };
        let config = defaults.configuration(t0(), "report", None, Some("  ")).unwrap();
        assert_eq!(config.lock_at_most_for(), Duration::minutes(10));
        assert_eq!(config.lock_at_least_for(), Duration::seconds(1));

        let config = defaults.configuration(t0(), "report", Some("PT20S"), Some("5s")).unwrap();
        assert_eq!(config.lock_at_most_for(), Duration::seconds(20));
        assert_eq!(config.lock_at_least_for(), Duration::seconds(5));
    }

    #[test]
    fn test_defaults_still_validate() {
        let defaults = LockDefaults::default();
        let result = defaults.configuration(t0(), "report", Some("1s"), Some("2s"));
        assert!(matches!(result, Err(LockError::InvalidConfiguration(_))));
    }
}
