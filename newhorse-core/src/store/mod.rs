// ABOUTME: Persistent storage for providers, models, projects, agent sessions, and messages.
// ABOUTME: One SQLite connection behind a mutex, shared by the coordinator and HTTP routes.

mod messages;
mod projects;
mod providers;
mod seed;

pub use messages::{Message, MessageRole, MessageType, NewMessage};
pub use projects::Project;
pub use providers::{Model, ModelUpdate, NewModel, NewProvider, Provider, ProviderUpdate, RegistrySnapshot};
pub use seed::{BuiltinModel, BuiltinProvider, BUILTIN_PROVIDERS};

use crate::vault::Vault;
use anyhow::{Context, Result};
use rusqlite::Connection;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

#[derive(Clone)]
pub struct Store {
    db: Arc<Mutex<Connection>>,
    vault: Vault,
}

impl Store {
    /// Open (or create) the database at `path` and bring the schema up to date
    pub fn open<P: AsRef<Path>>(path: P, vault: Vault) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).context("Failed to create data directory")?;
        }

        let conn = Connection::open(path).context("Failed to open SQLite database")?;
        if let Err(e) = conn.query_row("PRAGMA journal_mode = WAL", [], |_| Ok(())) {
            tracing::warn!(error = %e, "Failed to enable WAL journal mode");
        }
        let store = Self::from_connection(conn, vault)?;

        tracing::info!(db = %path.display(), encrypted = store.vault.is_enabled(), "Store initialized");
        Ok(store)
    }

    /// Throwaway database for tests and one-off commands
    pub fn open_in_memory(vault: Vault) -> Result<Self> {
        let conn = Connection::open_in_memory().context("Failed to open in-memory database")?;
        Self::from_connection(conn, vault)
    }

    fn from_connection(conn: Connection, vault: Vault) -> Result<Self> {
        conn.pragma_update(None, "foreign_keys", "ON")?;
        create_schema(&conn)?;
        Ok(Store {
            db: Arc::new(Mutex::new(conn)),
            vault,
        })
    }

    pub fn vault(&self) -> &Vault {
        &self.vault
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.db
            .lock()
            .map_err(|e| anyhow::anyhow!("Database mutex poisoned: {}", e))
    }
}

fn create_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS providers (
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            protocol TEXT NOT NULL,
            base_url TEXT,
            api_key TEXT,
            is_builtin INTEGER NOT NULL DEFAULT 0,
            enabled INTEGER NOT NULL DEFAULT 1,
            created_at TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS provider_models (
            id TEXT PRIMARY KEY,
            provider_id TEXT NOT NULL REFERENCES providers(id) ON DELETE CASCADE,
            model_id TEXT NOT NULL,
            display_name TEXT NOT NULL,
            is_default INTEGER NOT NULL DEFAULT 0,
            created_at TEXT NOT NULL
        );

        CREATE UNIQUE INDEX IF NOT EXISTS idx_provider_models_one_default
            ON provider_models(provider_id) WHERE is_default = 1;

        CREATE TABLE IF NOT EXISTS projects (
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            description TEXT,
            repo_path TEXT,
            selected_model TEXT,
            override_provider_id TEXT,
            override_api_key TEXT,
            created_at TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS agent_sessions (
            project_id TEXT PRIMARY KEY,
            session_token TEXT NOT NULL,
            updated_at TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS messages (
            id TEXT PRIMARY KEY,
            project_id TEXT NOT NULL,
            request_id TEXT NOT NULL,
            role TEXT NOT NULL,
            message_type TEXT NOT NULL,
            content TEXT NOT NULL,
            metadata_json TEXT NOT NULL DEFAULT '{}',
            model_id TEXT,
            provider_id TEXT,
            created_at TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_messages_project ON messages(project_id);",
    )
    .context("Failed to create schema")?;

    Ok(())
}

/// Timestamp format used by every table; sorts lexically in creation order
pub(crate) fn now() -> String {
    chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Micros, true)
}

/// Short row id, matching the 8-character ids of existing databases
pub(crate) fn short_id() -> String {
    uuid::Uuid::new_v4().simple().to_string()[..8].to_string()
}
