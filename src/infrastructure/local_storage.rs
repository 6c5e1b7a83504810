use crate::infrastructure::error::InfraError;
use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

const SCHEMA_SQL: &str = include_str!("../../sql/schema.sql");

pub fn initialize_database(path: &Path) -> Result<(), InfraError> {
    let connection = Connection::open(path)?;
    connection.execute_batch(SCHEMA_SQL)?;
    Ok(())
}

/// Device-local key-value slots. Each slot holds one serialized snapshot and
/// is overwritten wholesale on every write.
pub trait LocalStorage: Send + Sync {
    fn read_slot(&self, name: &str) -> Result<Option<String>, InfraError>;
    fn write_slot(&self, name: &str, value: &str) -> Result<(), InfraError>;
}

/// Slot store over one connection opened up front, so a write-through is a
/// single upsert on the open handle.
#[derive(Debug)]
pub struct SqliteLocalStorage {
    connection: Mutex<Connection>,
}

impl SqliteLocalStorage {
    pub fn open(db_path: impl AsRef<Path>) -> Result<Self, InfraError> {
        let connection = Connection::open(db_path.as_ref())?;
        Ok(Self {
            connection: Mutex::new(connection),
        })
    }

    fn lock_connection(&self) -> Result<MutexGuard<'_, Connection>, InfraError> {
        self.connection
            .lock()
            .map_err(|error| InfraError::InvalidConfig(format!("local database lock poisoned: {error}")))
    }
}

impl LocalStorage for SqliteLocalStorage {
    fn read_slot(&self, name: &str) -> Result<Option<String>, InfraError> {
        let connection = self.lock_connection()?;
        let value = connection
            .prepare_cached("SELECT value FROM kv_slots WHERE name = ?1")?
            .query_row(params![name], |row| row.get::<_, String>(0))
            .optional()?;
        Ok(value)
    }

    fn write_slot(&self, name: &str, value: &str) -> Result<(), InfraError> {
        let connection = self.lock_connection()?;
        connection
            .prepare_cached(
                "INSERT INTO kv_slots (name, value, updated_at)
                 VALUES (?1, ?2, ?3)
                 ON CONFLICT(name) DO UPDATE SET
                   value = excluded.value,
                   updated_at = excluded.updated_at",
            )?
            .execute(params![name, value, Utc::now().to_rfc3339()])?;
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct InMemoryLocalStorage {
    slots: Mutex<HashMap<String, String>>,
}

impl LocalStorage for InMemoryLocalStorage {
    fn read_slot(&self, name: &str) -> Result<Option<String>, InfraError> {
        let slots = self
            .slots
            .lock()
            .map_err(|error| InfraError::InvalidConfig(format!("local slots lock poisoned: {error}")))?;
        Ok(slots.get(name).cloned())
    }

    fn write_slot(&self, name: &str, value: &str) -> Result<(), InfraError> {
        let mut slots = self
            .slots
            .lock()
            .map_err(|error| InfraError::InvalidConfig(format!("local slots lock poisoned: {error}")))?;
        slots.insert(name.to_string(), value.to_string());
        Ok(())
    }
}
