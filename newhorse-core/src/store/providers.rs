// ABOUTME: Provider and model rows - the durable backend catalog.
// ABOUTME: Enforces builtin immutability and the one-default-model-per-provider rule.

use super::{now, short_id, Store};
use crate::error::ChatError;
use anyhow::{Context, Result};
use newhorse_runner::Protocol;
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::{Deserialize, Serialize};

#[derive(Clone, Serialize)]
pub struct Provider {
    pub id: String,
    pub name: String,
    /// Raw protocol tag; rows with an unknown tag are kept but never resolved
    pub protocol: String,
    pub base_url: Option<String>,
    /// Encrypted credential as stored
    #[serde(skip)]
    pub api_key: Option<String>,
    pub is_builtin: bool,
    pub enabled: bool,
    pub created_at: String,
}

// Custom Debug impl to redact the stored credential
impl std::fmt::Debug for Provider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Provider")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("protocol", &self.protocol)
            .field("base_url", &self.base_url)
            .field("api_key", &self.api_key.as_ref().map(|_| "[REDACTED]"))
            .field("is_builtin", &self.is_builtin)
            .field("enabled", &self.enabled)
            .finish()
    }
}

impl Provider {
    pub fn has_api_key(&self) -> bool {
        self.api_key.as_deref().is_some_and(|k| !k.is_empty())
    }

    pub fn protocol(&self) -> Option<Protocol> {
        self.protocol.parse().ok()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Model {
    pub id: String,
    pub provider_id: String,
    pub model_id: String,
    pub display_name: String,
    pub is_default: bool,
    pub created_at: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewProvider {
    pub name: String,
    pub protocol: Protocol,
    #[serde(default)]
    pub base_url: Option<String>,
    /// Plain-text credential; encrypted before it is stored
    #[serde(default)]
    pub api_key: Option<String>,
}

/// Partial update; `None` leaves a field untouched, an empty
/// `api_key` or `base_url` clears it
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ProviderUpdate {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub enabled: Option<bool>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewModel {
    pub model_id: String,
    /// Defaults to the model id
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub is_default: bool,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ModelUpdate {
    #[serde(default)]
    pub model_id: Option<String>,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub is_default: Option<bool>,
}

/// Providers and models read under one lock.
///
/// Providers are in catalog order: builtin first, then creation order, then
/// name. Models are in creation order.
#[derive(Debug, Clone, Default)]
pub struct RegistrySnapshot {
    pub providers: Vec<Provider>,
    pub models: Vec<Model>,
}

impl RegistrySnapshot {
    pub fn provider(&self, id: &str) -> Option<&Provider> {
        self.providers.iter().find(|p| p.id == id)
    }

    pub fn models_of<'a, 'b>(&'a self, provider_id: &'b str) -> impl Iterator<Item = &'a Model> + use<'a, 'b> {
        self.models.iter().filter(move |m| m.provider_id == provider_id)
    }

    pub fn default_model(&self, provider_id: &str) -> Option<&Model> {
        self.models_of(provider_id).find(|m| m.is_default)
    }
}

const PROVIDER_COLUMNS: &str =
    "id, name, protocol, base_url, api_key, is_builtin, enabled, created_at";
const MODEL_COLUMNS: &str = "id, provider_id, model_id, display_name, is_default, created_at";

fn provider_from_row(row: &Row<'_>) -> rusqlite::Result<Provider> {
    Ok(Provider {
        id: row.get(0)?,
        name: row.get(1)?,
        protocol: row.get(2)?,
        base_url: row.get(3)?,
        api_key: row.get(4)?,
        is_builtin: row.get(5)?,
        enabled: row.get(6)?,
        created_at: row.get(7)?,
    })
}

fn model_from_row(row: &Row<'_>) -> rusqlite::Result<Model> {
    Ok(Model {
        id: row.get(0)?,
        provider_id: row.get(1)?,
        model_id: row.get(2)?,
        display_name: row.get(3)?,
        is_default: row.get(4)?,
        created_at: row.get(5)?,
    })
}

fn query_provider(conn: &Connection, id: &str) -> Result<Option<Provider>> {
    let sql = format!("SELECT {} FROM providers WHERE id = ?1", PROVIDER_COLUMNS);
    Ok(conn
        .query_row(&sql, params![id], provider_from_row)
        .optional()?)
}

fn query_model(conn: &Connection, provider_id: &str, id: &str) -> Result<Option<Model>> {
    let sql = format!(
        "SELECT {} FROM provider_models WHERE id = ?1 AND provider_id = ?2",
        MODEL_COLUMNS
    );
    Ok(conn
        .query_row(&sql, params![id, provider_id], model_from_row)
        .optional()?)
}

fn query_models(conn: &Connection, provider_id: Option<&str>) -> Result<Vec<Model>> {
    let models = match provider_id {
        Some(provider_id) => {
            let sql = format!(
                "SELECT {} FROM provider_models WHERE provider_id = ?1 ORDER BY created_at, rowid",
                MODEL_COLUMNS
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt.query_map(params![provider_id], model_from_row)?;
            rows.collect::<rusqlite::Result<Vec<_>>>()?
        }
        None => {
            let sql = format!(
                "SELECT {} FROM provider_models ORDER BY created_at, rowid",
                MODEL_COLUMNS
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt.query_map([], model_from_row)?;
            rows.collect::<rusqlite::Result<Vec<_>>>()?
        }
    };
    Ok(models)
}

fn provider_not_found() -> anyhow::Error {
    ChatError::NotFound("Provider".to_string()).into()
}

fn model_not_found() -> anyhow::Error {
    ChatError::NotFound("Model".to_string()).into()
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

impl Store {
    /// All providers, builtin first then by name
    pub fn list_providers(&self) -> Result<Vec<Provider>> {
        let db = self.conn()?;
        let sql = format!(
            "SELECT {} FROM providers ORDER BY is_builtin DESC, name",
            PROVIDER_COLUMNS
        );
        let mut stmt = db.prepare(&sql)?;
        let rows = stmt.query_map([], provider_from_row)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    pub fn get_provider(&self, id: &str) -> Result<Option<Provider>> {
        let db = self.conn()?;
        query_provider(&db, id)
    }

    /// Consistent read of the whole catalog for resolution
    pub fn snapshot(&self) -> Result<RegistrySnapshot> {
        let db = self.conn()?;
        let sql = format!(
            "SELECT {} FROM providers ORDER BY is_builtin DESC, created_at, name",
            PROVIDER_COLUMNS
        );
        let mut stmt = db.prepare(&sql)?;
        let providers = stmt
            .query_map([], provider_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        let models = query_models(&db, None)?;
        Ok(RegistrySnapshot { providers, models })
    }

    /// Create a custom (non-builtin) provider
    pub fn create_provider(&self, new: NewProvider) -> Result<Provider> {
        let name = new.name.trim().to_string();
        if name.is_empty() {
            return Err(ChatError::invalid("Provider name is required").into());
        }

        let provider = Provider {
            id: short_id(),
            name,
            protocol: new.protocol.as_str().to_string(),
            base_url: non_empty(new.base_url),
            api_key: non_empty(new.api_key).map(|k| self.vault.encrypt(&k)),
            is_builtin: false,
            enabled: true,
            created_at: now(),
        };

        let db = self.conn()?;
        db.execute(
            "INSERT INTO providers (id, name, protocol, base_url, api_key, is_builtin, enabled, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, 0, 1, ?6)",
            params![
                provider.id,
                provider.name,
                provider.protocol,
                provider.base_url,
                provider.api_key,
                provider.created_at
            ],
        )
        .context("Failed to insert provider")?;

        tracing::info!(provider_id = %provider.id, name = %provider.name, protocol = %provider.protocol, "Provider created");
        Ok(provider)
    }

    /// Apply a partial update. Builtin providers keep their endpoint.
    pub fn update_provider(&self, id: &str, update: ProviderUpdate) -> Result<Provider> {
        let db = self.conn()?;
        let mut provider = query_provider(&db, id)?.ok_or_else(provider_not_found)?;

        if let Some(name) = update.name {
            let name = name.trim().to_string();
            if name.is_empty() {
                return Err(ChatError::invalid("Provider name is required").into());
            }
            provider.name = name;
        }

        if let Some(base_url) = update.base_url {
            let base_url = non_empty(Some(base_url));
            if provider.is_builtin && base_url != provider.base_url {
                return Err(ChatError::invalid("Cannot change base_url of built-in provider").into());
            }
            provider.base_url = base_url;
        }

        if let Some(api_key) = update.api_key {
            provider.api_key = non_empty(Some(api_key)).map(|k| self.vault.encrypt(&k));
        }

        if let Some(enabled) = update.enabled {
            provider.enabled = enabled;
        }

        db.execute(
            "UPDATE providers SET name = ?1, base_url = ?2, api_key = ?3, enabled = ?4 WHERE id = ?5",
            params![
                provider.name,
                provider.base_url,
                provider.api_key,
                provider.enabled,
                provider.id
            ],
        )
        .context("Failed to update provider")?;

        tracing::info!(provider_id = %provider.id, enabled = provider.enabled, "Provider updated");
        Ok(provider)
    }

    /// Delete a custom provider and its models
    pub fn delete_provider(&self, id: &str) -> Result<()> {
        let mut db = self.conn()?;
        let provider = query_provider(&db, id)?.ok_or_else(provider_not_found)?;
        if provider.is_builtin {
            return Err(ChatError::invalid("Cannot delete built-in provider").into());
        }

        let tx = db.transaction()?;
        tx.execute(
            "DELETE FROM provider_models WHERE provider_id = ?1",
            params![id],
        )?;
        tx.execute("DELETE FROM providers WHERE id = ?1", params![id])?;
        tx.commit().context("Failed to delete provider")?;

        tracing::info!(provider_id = %id, name = %provider.name, "Provider deleted");
        Ok(())
    }

    pub fn list_models(&self, provider_id: &str) -> Result<Vec<Model>> {
        let db = self.conn()?;
        query_provider(&db, provider_id)?.ok_or_else(provider_not_found)?;
        query_models(&db, Some(provider_id))
    }

    /// Add a model; a new default clears the previous one in the same transaction
    pub fn add_model(&self, provider_id: &str, new: NewModel) -> Result<Model> {
        let model_id = new.model_id.trim().to_string();
        if model_id.is_empty() {
            return Err(ChatError::invalid("model_id is required").into());
        }

        let model = Model {
            id: short_id(),
            provider_id: provider_id.to_string(),
            display_name: non_empty(new.display_name).unwrap_or_else(|| model_id.clone()),
            model_id,
            is_default: new.is_default,
            created_at: now(),
        };

        let mut db = self.conn()?;
        query_provider(&db, provider_id)?.ok_or_else(provider_not_found)?;

        let tx = db.transaction()?;
        if model.is_default {
            tx.execute(
                "UPDATE provider_models SET is_default = 0 WHERE provider_id = ?1",
                params![provider_id],
            )?;
        }
        tx.execute(
            "INSERT INTO provider_models (id, provider_id, model_id, display_name, is_default, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                model.id,
                model.provider_id,
                model.model_id,
                model.display_name,
                model.is_default,
                model.created_at
            ],
        )?;
        tx.commit().context("Failed to add model")?;

        tracing::info!(provider_id = %provider_id, model = %model.model_id, is_default = model.is_default, "Model added");
        Ok(model)
    }

    pub fn update_model(&self, provider_id: &str, id: &str, update: ModelUpdate) -> Result<Model> {
        let mut db = self.conn()?;
        let mut model = query_model(&db, provider_id, id)?.ok_or_else(model_not_found)?;

        if let Some(model_id) = update.model_id {
            let model_id = model_id.trim().to_string();
            if model_id.is_empty() {
                return Err(ChatError::invalid("model_id is required").into());
            }
            model.model_id = model_id;
        }
        if let Some(display_name) = non_empty(update.display_name) {
            model.display_name = display_name;
        }
        if let Some(is_default) = update.is_default {
            model.is_default = is_default;
        }

        let tx = db.transaction()?;
        if model.is_default {
            tx.execute(
                "UPDATE provider_models SET is_default = 0 WHERE provider_id = ?1 AND id != ?2",
                params![provider_id, id],
            )?;
        }
        tx.execute(
            "UPDATE provider_models SET model_id = ?1, display_name = ?2, is_default = ?3 WHERE id = ?4",
            params![model.model_id, model.display_name, model.is_default, id],
        )?;
        tx.commit().context("Failed to update model")?;

        Ok(model)
    }

    pub fn delete_model(&self, provider_id: &str, id: &str) -> Result<()> {
        let db = self.conn()?;
        let deleted = db.execute(
            "DELETE FROM provider_models WHERE id = ?1 AND provider_id = ?2",
            params![id, provider_id],
        )?;
        if deleted == 0 {
            return Err(model_not_found());
        }
        tracing::info!(provider_id = %provider_id, model_row = %id, "Model deleted");
        Ok(())
    }
}
