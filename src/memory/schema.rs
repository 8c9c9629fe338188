// src/memory/schema.rs — Schema + migrations

use rusqlite::{params, Connection};
use tracing::info;

use crate::infra::errors::EngineError;

/// One schema step. `down` exists so a step can be reverted by hand.
pub struct Migration {
    pub version: u32,
    pub name: &'static str,
    pub up: &'static str,
    pub down: &'static str,
}

pub const MIGRATIONS: &[Migration] = &[Migration {
    version: 1,
    name: "loop_tables",
    up: include_str!("migrations/001_initial_schema.up.sql"),
    down: include_str!("migrations/001_initial_schema.down.sql"),
}];

const LEDGER: &str = "CREATE TABLE IF NOT EXISTS _migrations (
    version INTEGER PRIMARY KEY,
    name TEXT NOT NULL,
    applied_at TEXT NOT NULL DEFAULT (datetime('now'))
);";

/// Highest applied migration, 0 on a fresh database.
pub fn schema_version(conn: &Connection) -> Result<u32, EngineError> {
    conn.execute_batch(LEDGER)?;
    let version = conn.query_row("SELECT COALESCE(MAX(version), 0) FROM _migrations", [], |r| r.get(0))?;
    Ok(version)
}

/// Apply every pending migration, each in its own transaction. Returns how
/// many were applied.
pub fn run_migrations(conn: &Connection) -> Result<usize, EngineError> {
    let current = schema_version(conn)?;
    let mut applied = 0;
    for step in MIGRATIONS.iter().filter(|m| m.version > current) {
        info!(version = step.version, name = step.name, "applying migration");
        let tx = conn.unchecked_transaction()?;
        tx.execute_batch(step.up)?;
        tx.execute(
            "INSERT INTO _migrations (version, name) VALUES (?1, ?2)",
            params![step.version, step.name],
        )?;
        tx.commit()?;
        applied += 1;
    }
    Ok(applied)
}
