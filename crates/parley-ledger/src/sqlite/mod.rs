//! SQLite layer: connection pool, migrations, row types, repositories.

pub mod connection;
pub mod repositories;
pub mod rows;
