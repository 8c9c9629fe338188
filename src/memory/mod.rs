// src/memory/mod.rs — Run history and configuration version storage

pub mod schema;
pub mod store;
pub mod versions;

use std::path::Path;
use std::sync::{Arc, Mutex};

use rusqlite::Connection;

use crate::infra::errors::EngineError;

pub use store::Store;
pub use versions::{ConfigVersion, NewConfigVersion, VersionStore};

/// Owns the loop database until it is handed to the engine.
pub struct MemoryManager {
    pub store: Store,
}

impl MemoryManager {
    /// Open (or create) the database file and bring its schema up to date.
    pub fn open(path: &Path) -> Result<Self, EngineError> {
        let conn = Connection::open(path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        Self::prepare(conn)
    }

    pub fn in_memory() -> Result<Self, EngineError> {
        Self::prepare(Connection::open_in_memory()?)
    }

    fn prepare(conn: Connection) -> Result<Self, EngineError> {
        conn.pragma_update(None, "foreign_keys", "ON")?;
        let applied = schema::run_migrations(&conn)?;
        if applied > 0 {
            tracing::debug!(applied, "loop database migrated");
        }
        Ok(Self {
            store: Store::new(conn),
        })
    }

    /// Hand the store to concurrent users. Callers lock it per operation and
    /// never across an await.
    pub fn into_shared(self) -> Arc<Mutex<Store>> {
        Arc::new(Mutex::new(self.store))
    }
}
