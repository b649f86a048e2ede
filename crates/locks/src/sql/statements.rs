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

//! SQL statement rendering.
//!
//! Templates name their parameters (`:name`, `:lockUntil`, ...). Rendering
//! replaces each token with the driver's positional placeholder and records
//! the parameter order, so one template serves both `?` and `$n` drivers.

use crate::configuration::LockConfiguration;
use chrono::{DateTime, Utc};
use serde::Deserialize;

/// Table and column names. Interpolated into statements verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct TableSchema {
    pub table_name: String,
    pub name: String,
    pub lock_until: String,
    pub locked_at: String,
    pub locked_by: String,
}

impl Default for TableSchema {
    fn default() -> Self {
        Self {
            table_name: "shedlock".to_string(),
            name: "name".to_string(),
            lock_until: "lock_until".to_string(),
            locked_at: "locked_at".to_string(),
            locked_by: "locked_by".to_string(),
        }
    }
}

/// Statement family.
///
/// `Generic` binds application-clock timestamps; the others compute every
/// deadline from the server's UTC clock and bind durations in microseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dialect {
    Generic,
    Postgres,
    MySql,
    Sqlite,
}

impl Dialect {
    pub fn uses_db_time(self) -> bool {
        !matches!(self, Dialect::Generic)
    }
}

/// Positional placeholder style of the driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Placeholder {
    /// `?` (SQLite, MySQL)
    Question,
    /// `$1`, `$2`, ... (PostgreSQL)
    Dollar,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Param {
    Name,
    LockedBy,
    LockUntil,
    Now,
    UnlockTime,
    LockAtMostForMicros,
    LockAtLeastForMicros,
}

impl Param {
    fn from_token(token: &str) -> Option<Self> {
        match token {
            "name" => Some(Param::Name),
            "lockedBy" => Some(Param::LockedBy),
            "lockUntil" => Some(Param::LockUntil),
            "now" => Some(Param::Now),
            "unlockTime" => Some(Param::UnlockTime),
            "lockAtMostForMicros" => Some(Param::LockAtMostForMicros),
            "lockAtLeastForMicros" => Some(Param::LockAtLeastForMicros),
            _ => None,
        }
    }

    /// Resolve against a lock configuration at instant `now`.
    pub fn value(self, config: &LockConfiguration, locked_by: &str, now: DateTime<Utc>) -> ParamValue {
        match self {
            Param::Name => ParamValue::Text(config.name().to_string()),
            Param::LockedBy => ParamValue::Text(locked_by.to_string()),
            Param::LockUntil => ParamValue::Timestamp(config.lock_at_most_until()),
            Param::Now => ParamValue::Timestamp(now),
            Param::UnlockTime => ParamValue::Timestamp(config.unlock_time(now)),
            Param::LockAtMostForMicros => ParamValue::Micros(config.lock_at_most_for_micros()),
            Param::LockAtLeastForMicros => ParamValue::Micros(config.lock_at_least_for_micros()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParamValue {
    Text(String),
    Timestamp(DateTime<Utc>),
    Micros(i64),
}

/// Rendered SQL plus its bind order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Statement {
    pub sql: String,
    pub params: Vec<Param>,
}

impl Statement {
    pub fn values(&self, config: &LockConfiguration, locked_by: &str, now: DateTime<Utc>) -> Vec<ParamValue> {
        self.params.iter().map(|param| param.value(config, locked_by, now)).collect()
    }
}

/// The four statements a SQL accessor runs, rendered once.
#[derive(Debug, Clone)]
pub struct SqlStatements {
    dialect: Dialect,
    insert: Statement,
    update: Statement,
    unlock: Statement,
    extend: Statement,
}

impl SqlStatements {
    pub fn new(dialect: Dialect, schema: &TableSchema, placeholder: Placeholder) -> Self {
        let [insert, update, unlock, extend] = templates(dialect, schema);
        Self {
            dialect,
            insert: render(&insert, placeholder),
            update: render(&update, placeholder),
            unlock: render(&unlock, placeholder),
            extend: render(&extend, placeholder),
        }
    }

    pub fn dialect(&self) -> Dialect {
        self.dialect
    }

    /// Create the row if absent.
    pub fn insert(&self) -> &Statement {
        &self.insert
    }

    /// Take over the row if its lease has lapsed.
    pub fn update(&self) -> &Statement {
        &self.update
    }

    /// Shorten the lease to the release time.
    pub fn unlock(&self) -> &Statement {
        &self.unlock
    }

    /// Move `lock_until` if still held by us and not lapsed.
    pub fn extend(&self) -> &Statement {
        &self.extend
    }
}

fn templates(dialect: Dialect, schema: &TableSchema) -> [String; 4] {
    let TableSchema {
        table_name: t,
        name: n,
        lock_until: u,
        locked_at: a,
        locked_by: b,
    } = schema;

    match dialect {
        Dialect::Generic => [
            format!("INSERT INTO {t}({n}, {u}, {a}, {b}) VALUES(:name, :lockUntil, :now, :lockedBy)"),
            format!("UPDATE {t} SET {u} = :lockUntil, {a} = :now, {b} = :lockedBy WHERE {n} = :name AND {u} <= :now"),
            format!("UPDATE {t} SET {u} = :unlockTime WHERE {n} = :name"),
            format!("UPDATE {t} SET {u} = :lockUntil WHERE {n} = :name AND {b} = :lockedBy AND {u} > :now"),
        ],
        Dialect::Postgres => {
            let now = "timezone('utc', CURRENT_TIMESTAMP)";
            let at_most = format!("{now} + :lockAtMostForMicros * INTERVAL '1 microsecond'");
            let at_least = format!("{a} + :lockAtLeastForMicros * INTERVAL '1 microsecond'");
            [
                format!(
                    "INSERT INTO {t}({n}, {u}, {a}, {b}) VALUES(:name, {at_most}, {now}, :lockedBy) \
                     ON CONFLICT ({n}) DO NOTHING"
                ),
                format!(
                    "UPDATE {t} SET {u} = {at_most}, {a} = {now}, {b} = :lockedBy \
                     WHERE {n} = :name AND {u} <= {now}"
                ),
                format!("UPDATE {t} SET {u} = GREATEST({at_least}, {now}) WHERE {n} = :name AND {b} = :lockedBy"),
                format!("UPDATE {t} SET {u} = {at_most} WHERE {n} = :name AND {b} = :lockedBy AND {u} > {now}"),
            ]
        }
        Dialect::MySql => {
            let now = "UTC_TIMESTAMP(3)";
            let at_most = format!("TIMESTAMPADD(MICROSECOND, :lockAtMostForMicros, {now})");
            let at_least = format!("TIMESTAMPADD(MICROSECOND, :lockAtLeastForMicros, {a})");
            [
                format!("INSERT IGNORE INTO {t}({n}, {u}, {a}, {b}) VALUES(:name, {at_most}, {now}, :lockedBy)"),
                format!(
                    "UPDATE {t} SET {u} = {at_most}, {a} = {now}, {b} = :lockedBy \
                     WHERE {n} = :name AND {u} <= {now}"
                ),
                format!(
                    "UPDATE {t} SET {u} = IF({at_least} > {now}, {at_least}, {now}) \
                     WHERE {n} = :name AND {b} = :lockedBy"
                ),
                format!("UPDATE {t} SET {u} = {at_most} WHERE {n} = :name AND {b} = :lockedBy AND {u} > {now}"),
            ]
        }
        Dialect::Sqlite => {
            let now = "STRFTIME('%Y-%m-%d %H:%M:%f', 'now')";
            let at_most = "STRFTIME('%Y-%m-%d %H:%M:%f', 'now', '+' || (:lockAtMostForMicros / 1000000.0) || ' seconds')";
            let at_least =
                format!("STRFTIME('%Y-%m-%d %H:%M:%f', {a}, '+' || (:lockAtLeastForMicros / 1000000.0) || ' seconds')");
            [
                format!("INSERT OR IGNORE INTO {t}({n}, {u}, {a}, {b}) VALUES(:name, {at_most}, {now}, :lockedBy)"),
                format!(
                    "UPDATE {t} SET {u} = {at_most}, {a} = {now}, {b} = :lockedBy \
                     WHERE {n} = :name AND {u} <= {now}"
                ),
                format!("UPDATE {t} SET {u} = MAX({at_least}, {now}) WHERE {n} = :name AND {b} = :lockedBy"),
                format!("UPDATE {t} SET {u} = {at_most} WHERE {n} = :name AND {b} = :lockedBy AND {u} > {now}"),
            ]
        }
    }
}

/// Replace `:token` parameters with positional placeholders.
///
/// Colons not followed by a known token (e.g. inside `'%H:%M'`) are kept.
fn render(template: &str, placeholder: Placeholder) -> Statement {
    let mut sql = String::with_capacity(template.len());
    let mut params = Vec::new();
    let mut rest = template;

    while let Some(pos) = rest.find(':') {
        sql.push_str(&rest[..pos]);
        let after = &rest[pos + 1..];
        let token_len = after
            .bytes()
            .take_while(|b| b.is_ascii_alphanumeric() || *b == b'_')
            .count();

        match Param::from_token(&after[..token_len]) {
            Some(param) => {
                params.push(param);
                match placeholder {
                    Placeholder::Question => sql.push('?'),
                    Placeholder::Dollar => {
                        sql.push('$');
                        sql.push_str(&params.len().to_string());
                    }
                }
                rest = &after[token_len..];
            }
            None => {
                sql.push(':');
                rest = after;
            }
        }
    }
    sql.push_str(rest);

    Statement { sql, params }
}
