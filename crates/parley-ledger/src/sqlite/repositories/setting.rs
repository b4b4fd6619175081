//! Setting repository — key/value rows for user-level flags.

use rusqlite::{Connection, OptionalExtension, params};

use crate::errors::Result;

/// Setting repository — stateless, every method takes `&Connection`.
pub struct SettingRepo;

impl SettingRepo {
    /// Get a setting value.
    pub fn get(conn: &Connection, key: &str) -> Result<Option<String>> {
        let value: Option<Option<String>> = conn
            .query_row(
                "SELECT value FROM settings WHERE key = ?1",
                params![key],
                |row| row.get(0),
            )
            .optional()?;
        Ok(value.flatten())
    }

    /// Upsert a setting value.
    pub fn set(conn: &Connection, key: &str, value: &str) -> Result<()> {
        let _ = conn.execute(
            "INSERT INTO settings (key, value) VALUES (?1, ?2)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
            params![key, value],
        )?;
        Ok(())
    }
}
