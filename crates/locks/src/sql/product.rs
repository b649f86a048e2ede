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

//! Database product registry.
//!
//! Each variant carries a predicate over the product name reported by the
//! connection and a factory for its server-time dialect. Unmatched names map
//! to [`DatabaseProduct::Unknown`], which has no server-time dialect.

use super::statements::Dialect;
use serde::Deserialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
pub enum DatabaseProduct {
    #[serde(rename = "postgres")]
    Postgres,
    #[serde(rename = "mysql")]
    MySql,
    #[serde(rename = "mariadb")]
    MariaDb,
    #[serde(rename = "sqlite")]
    Sqlite,
    #[serde(rename = "unknown")]
    Unknown,
}

impl DatabaseProduct {
    /// Products in match order.
    pub const KNOWN: [DatabaseProduct; 4] = [
        DatabaseProduct::Postgres,
        DatabaseProduct::MySql,
        DatabaseProduct::MariaDb,
        DatabaseProduct::Sqlite,
    ];

    /// Whether `product_name` (as reported by the database) is this product.
    pub fn matches(self, product_name: &str) -> bool {
        let name = product_name.trim();
        match self {
            DatabaseProduct::Postgres => first_word(name).eq_ignore_ascii_case("PostgreSQL"),
            DatabaseProduct::MySql => name.eq_ignore_ascii_case("MySQL"),
            DatabaseProduct::MariaDb => name.eq_ignore_ascii_case("MariaDB"),
            DatabaseProduct::Sqlite => first_word(name).eq_ignore_ascii_case("SQLite"),
            DatabaseProduct::Unknown => false,
        }
    }

    /// First known product matching `product_name`, else `Unknown`.
    pub fn match_product_name(product_name: &str) -> Self {
        Self::KNOWN
            .into_iter()
            .find(|product| product.matches(product_name))
            .unwrap_or(DatabaseProduct::Unknown)
    }

    /// Dialect computing deadlines with this product's own clock.
    pub fn server_time_dialect(self) -> Option<Dialect> {
        match self {
            DatabaseProduct::Postgres => Some(Dialect::Postgres),
            DatabaseProduct::MySql | DatabaseProduct::MariaDb => Some(Dialect::MySql),
            DatabaseProduct::Sqlite => Some(Dialect::Sqlite),
            DatabaseProduct::Unknown => None,
        }
    }
}

fn first_word(s: &str) -> &str {
    s.split_whitespace().next().unwrap_or("")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_match_product_name() {
        assert_eq!(DatabaseProduct::match_product_name("PostgreSQL"), DatabaseProduct::Postgres);
        assert_eq!(
            DatabaseProduct::match_product_name("PostgreSQL 16.2 on x86_64-pc-linux-gnu"),
            DatabaseProduct::Postgres
        );
        assert_eq!(DatabaseProduct::match_product_name("mysql"), DatabaseProduct::MySql);
        assert_eq!(DatabaseProduct::match_product_name("MariaDB"), DatabaseProduct::MariaDb);
        assert_eq!(DatabaseProduct::match_product_name("SQLite"), DatabaseProduct::Sqlite);
        assert_eq!(DatabaseProduct::match_product_name("Oracle"), DatabaseProduct::Unknown);
        assert_eq!(DatabaseProduct::match_product_name(""), DatabaseProduct::Unknown);
    }

    #[test]
    fn test_unknown_has_no_server_time_dialect() {
        assert_eq!(DatabaseProduct::Unknown.server_time_dialect(), None);
        assert_eq!(DatabaseProduct::MariaDb.server_time_dialect(), Some(Dialect::MySql));
    }
}
