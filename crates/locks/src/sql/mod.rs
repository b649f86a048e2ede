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

//! SQL-based lock storage (SQLite, PostgreSQL, MySQL/MariaDB).
//!
//! One row per lock name in a table shaped like:
//!
//! ```sql
//! CREATE TABLE shedlock (
//!   name       VARCHAR(64)  NOT NULL PRIMARY KEY,
//!   lock_until TIMESTAMP    NOT NULL,
//!   locked_at  TIMESTAMP    NOT NULL,
//!   locked_by  VARCHAR(255) NOT NULL
//! );
//! ```
//!
//! - [`statements`] renders the four conditional statements per [`Dialect`]
//! - [`product`] maps the connected database to a server-time dialect
//! - `SqlStorageAccessor` executes them through `sqlx`
//!
//! With DB-time enabled, deadlines are computed by the database server's
//! clock, so nodes sharing one database never compare skewed clocks.

pub mod product;
pub mod statements;

#[cfg(any(feature = "sqlite-backend", feature = "postgres-backend", feature = "mysql-backend"))]
mod storage;

pub use product::DatabaseProduct;
pub use statements::{Dialect, Param, ParamValue, Placeholder, SqlStatements, Statement, TableSchema};

#[cfg(any(feature = "sqlite-backend", feature = "postgres-backend", feature = "mysql-backend"))]
pub use storage::{SqlPool, SqlStorageAccessor};

use dcs_common::holder_identity;

/// Settings for the SQL backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SqlLockConfig {
    pub schema: TableSchema,
    /// Value written to the `locked_by` column.
    pub locked_by: String,
    /// Compute deadlines with the database server's clock.
    pub use_db_time: bool,
    /// Skip probing the connection for its product name.
    pub database_product: Option<DatabaseProduct>,
}

impl Default for SqlLockConfig {
    fn default() -> Self {
        Self {
            schema: TableSchema::default(),
            locked_by: holder_identity(),
            use_db_time: false,
            database_product: None,
        }
    }
}

impl SqlLockConfig {
    pub fn with_table_name(mut self, table_name: impl Into<String>) -> Self {
        self.schema.table_name = table_name.into();
        self
    }

    pub fn with_locked_by(mut self, locked_by: impl Into<String>) -> Self {
        self.locked_by = locked_by.into();
        self
    }

    pub fn using_db_time(mut self) -> Self {
        self.use_db_time = true;
        self
    }

    pub fn with_database_product(mut self, product: DatabaseProduct) -> Self {
        self.database_product = Some(product);
        self
    }

    /// Dialect to use once the product is known.
    pub fn dialect_for(&self, product: DatabaseProduct) -> Dialect {
        if !self.use_db_time {
            return Dialect::Generic;
        }
        product.server_time_dialect().unwrap_or(Dialect::Generic)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dialect_selection() {
        let app_time = SqlLockConfig::default();
        assert_eq!(app_time.dialect_for(DatabaseProduct::Postgres), Dialect::Generic);

        let db_time = SqlLockConfig::default().using_db_time();
        assert_eq!(db_time.dialect_for(DatabaseProduct::Postgres), Dialect::Postgres);
        assert_eq!(db_time.dialect_for(DatabaseProduct::MariaDb), Dialect::MySql);
        assert_eq!(db_time.dialect_for(DatabaseProduct::Unknown), Dialect::Generic);
    }

    #[test]
    fn test_builder_methods() {
        let config = SqlLockConfig::default()
            .with_table_name("locks")
            .with_locked_by("node-a")
            .with_database_product(DatabaseProduct::Sqlite);
        assert_eq!(config.schema.table_name, "locks");
        assert_eq!(config.locked_by, "node-a");
        assert_eq!(config.database_product, Some(DatabaseProduct::Sqlite));
        assert!(!config.use_db_time);
    }
}
