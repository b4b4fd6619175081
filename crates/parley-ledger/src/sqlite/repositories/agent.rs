//! Agent repository — row access for the `agents` table.
//!
//! Styles and tool-server bindings are JSON columns; parse failures on
//! read degrade to empty lists rather than poisoning the roster.

use parley_core::ids;
use rusqlite::{Connection, OptionalExtension, Row, params};
use tracing::warn;

use crate::errors::Result;
use crate::sqlite::rows::{AgentRow, McpBinding, StyleDescriptor};

/// Fields for inserting a new agent.
#[derive(Clone, Debug)]
pub struct CreateAgentOptions {
    /// Display name.
    pub name: String,
    /// System prompt text.
    pub instruction: String,
    /// Model reference.
    pub llm_id: String,
    /// Whether this is the default agent.
    pub is_main: bool,
    /// Style/tone descriptors.
    pub styles: Vec<StyleDescriptor>,
    /// Tool-server bindings.
    pub mcps: Vec<McpBinding>,
}

/// Agent repository — stateless, every method takes `&Connection`.
pub struct AgentRepo;

const COLUMNS: &str = "id, name, instruction, llm_id, is_main, styles, mcps, created_at";

impl AgentRepo {
    /// Insert an agent row.
    pub fn create(conn: &Connection, opts: &CreateAgentOptions) -> Result<AgentRow> {
        let id = ids::agent_id();
        let now = ids::now_rfc3339();
        let styles_json = serde_json::to_string(&opts.styles)?;
        let mcps_json = serde_json::to_string(&opts.mcps)?;
        let _ = conn.execute(
            "INSERT INTO agents (id, name, instruction, llm_id, is_main, styles, mcps, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                id,
                opts.name,
                opts.instruction,
                opts.llm_id,
                opts.is_main,
                styles_json,
                mcps_json,
                now
            ],
        )?;
        Ok(AgentRow {
            id,
            name: opts.name.clone(),
            instruction: opts.instruction.clone(),
            llm_id: opts.llm_id.clone(),
            is_main: opts.is_main,
            styles: opts.styles.clone(),
            mcps: opts.mcps.clone(),
            created_at: now,
        })
    }

    /// Get an agent by ID.
    pub fn get_by_id(conn: &Connection, agent_id: &str) -> Result<Option<AgentRow>> {
        let row = conn
            .query_row(
                &format!("SELECT {COLUMNS} FROM agents WHERE id = ?1"),
                params![agent_id],
                Self::map_row,
            )
            .optional()?;
        Ok(row)
    }

    /// All agents, creation order.
    pub fn list(conn: &Connection) -> Result<Vec<AgentRow>> {
        let mut stmt =
            conn.prepare(&format!("SELECT {COLUMNS} FROM agents ORDER BY rowid ASC"))?;
        let rows = stmt
            .query_map([], Self::map_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// The main (default) agent.
    pub fn main(conn: &Connection) -> Result<Option<AgentRow>> {
        let row = conn
            .query_row(
                &format!("SELECT {COLUMNS} FROM agents WHERE is_main = 1 LIMIT 1"),
                [],
                Self::map_row,
            )
            .optional()?;
        Ok(row)
    }

    fn map_row(row: &Row<'_>) -> rusqlite::Result<AgentRow> {
        let styles_json: String = row.get(5)?;
        let mcps_json: String = row.get(6)?;
        let id: String = row.get(0)?;
        let styles: Vec<StyleDescriptor> =
            serde_json::from_str(&styles_json).unwrap_or_else(|e| {
                warn!(agent_id = %id, error = %e, "unparseable agent styles column");
                Vec::new()
            });
        let mcps: Vec<McpBinding> = serde_json::from_str(&mcps_json).unwrap_or_else(|e| {
            warn!(agent_id = %id, error = %e, "unparseable agent mcps column");
            Vec::new()
        });
        Ok(AgentRow {
            id,
            name: row.get(1)?,
            instruction: row.get(2)?,
            llm_id: row.get(3)?,
            is_main: row.get(4)?,
            styles,
            mcps,
            created_at: row.get(7)?,
        })
    }
}
