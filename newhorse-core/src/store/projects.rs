// ABOUTME: Project rows (read-only to chat) and per-project agent session tokens.
// ABOUTME: A project row is optional; chat falls back to defaults without one.

use super::{now, Store};
use anyhow::{Context, Result};
use rusqlite::{params, OptionalExtension};
use serde::{Deserialize, Serialize};

#[derive(Clone, Default, Serialize, Deserialize)]
pub struct Project {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    /// Working directory; None means `{projects_root}/{id}`
    #[serde(default)]
    pub repo_path: Option<String>,
    /// Model last chosen for this project
    #[serde(default)]
    pub selected_model: Option<String>,
    #[serde(default)]
    pub override_provider_id: Option<String>,
    /// Encrypted project-level credential
    #[serde(default, skip_serializing)]
    pub override_api_key: Option<String>,
}

// Custom Debug impl to redact the override credential
impl std::fmt::Debug for Project {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Project")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("repo_path", &self.repo_path)
            .field("selected_model", &self.selected_model)
            .field("override_provider_id", &self.override_provider_id)
            .field(
                "override_api_key",
                &self.override_api_key.as_ref().map(|_| "[REDACTED]"),
            )
            .finish()
    }
}

impl Store {
    pub fn get_project(&self, id: &str) -> Result<Option<Project>> {
        let db = self.conn()?;
        let project = db
            .query_row(
                "SELECT id, name, description, repo_path, selected_model, override_provider_id, override_api_key
                 FROM projects WHERE id = ?1",
                params![id],
                |row| {
                    Ok(Project {
                        id: row.get(0)?,
                        name: row.get(1)?,
                        description: row.get(2)?,
                        repo_path: row.get(3)?,
                        selected_model: row.get(4)?,
                        override_provider_id: row.get(5)?,
                        override_api_key: row.get(6)?,
                    })
                },
            )
            .optional()?;
        Ok(project)
    }

    /// Insert or replace a project row. `override_api_key` must already be
    /// encrypted; see [`Store::set_project_override`].
    pub fn upsert_project(&self, project: &Project) -> Result<()> {
        let db = self.conn()?;
        db.execute(
            "INSERT INTO projects (id, name, description, repo_path, selected_model, override_provider_id, override_api_key, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
             ON CONFLICT(id) DO UPDATE SET
                name = excluded.name,
                description = excluded.description,
                repo_path = excluded.repo_path,
                selected_model = excluded.selected_model,
                override_provider_id = excluded.override_provider_id,
                override_api_key = excluded.override_api_key",
            params![
                project.id,
                project.name,
                project.description,
                project.repo_path,
                project.selected_model,
                project.override_provider_id,
                project.override_api_key,
                now()
            ],
        )
        .context("Failed to save project")?;
        Ok(())
    }

    /// Attach (or clear) a project-level provider and credential.
    /// The credential is given in plain text and encrypted here.
    pub fn set_project_override(
        &self,
        project_id: &str,
        provider_id: Option<&str>,
        api_key: Option<&str>,
    ) -> Result<()> {
        let encrypted = api_key
            .filter(|k| !k.is_empty())
            .map(|k| self.vault.encrypt(k));
        let db = self.conn()?;
        let updated = db.execute(
            "UPDATE projects SET override_provider_id = ?1, override_api_key = ?2 WHERE id = ?3",
            params![provider_id, encrypted, project_id],
        )?;
        if updated == 0 {
            return Err(crate::error::ChatError::NotFound("Project".to_string()).into());
        }
        Ok(())
    }

    /// Last agent session token stored for a project
    pub fn session_token(&self, project_id: &str) -> Result<Option<String>> {
        let db = self.conn()?;
        let token = db
            .query_row(
                "SELECT session_token FROM agent_sessions WHERE project_id = ?1",
                params![project_id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(token)
    }

    pub fn save_session_token(&self, project_id: &str, token: &str) -> Result<()> {
        let db = self.conn()?;
        db.execute(
            "INSERT INTO agent_sessions (project_id, session_token, updated_at) VALUES (?1, ?2, ?3)
             ON CONFLICT(project_id) DO UPDATE SET session_token = excluded.session_token, updated_at = excluded.updated_at",
            params![project_id, token, now()],
        )
        .context("Failed to save agent session")?;
        tracing::debug!(project_id = %project_id, "Agent session token saved");
        Ok(())
    }

    pub fn clear_session_token(&self, project_id: &str) -> Result<()> {
        let db = self.conn()?;
        db.execute(
            "DELETE FROM agent_sessions WHERE project_id = ?1",
            params![project_id],
        )?;
        tracing::info!(project_id = %project_id, "Agent session reset");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vault::{generate_key, Vault};

    #[test]
    fn test_project_round_trip_and_override() {
        let store = Store::open_in_memory(Vault::new(Some(&generate_key()))).unwrap();
        assert!(store.get_project("p1").unwrap().is_none());

        store
            .upsert_project(&Project {
                id: "p1".to_string(),
                name: "Demo".to_string(),
                selected_model: Some("gpt-4o".to_string()),
                ..Default::default()
            })
            .unwrap();
        store
            .set_project_override("p1", Some("prov1"), Some("sk-project-key-123"))
            .unwrap();

        let project = store.get_project("p1").unwrap().unwrap();
        assert_eq!(project.override_provider_id.as_deref(), Some("prov1"));
        let stored = project.override_api_key.unwrap();
        assert_ne!(stored, "sk-project-key-123");
        assert_eq!(store.vault().decrypt(&stored), "sk-project-key-123");

        assert!(store.set_project_override("missing", None, None).is_err());
    }

    #[test]
    fn test_session_token_lifecycle() {
        let store = Store::open_in_memory(Vault::passthrough()).unwrap();
        assert_eq!(store.session_token("p1").unwrap(), None);
        store.save_session_token("p1", "sess-1").unwrap();
        store.save_session_token("p1", "sess-2").unwrap();
        assert_eq!(store.session_token("p1").unwrap().as_deref(), Some("sess-2"));
        store.clear_session_token("p1").unwrap();
        assert_eq!(store.session_token("p1").unwrap(), None);
    }
}
