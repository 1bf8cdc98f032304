// ABOUTME: Built-in provider catalog inserted on first start.
// ABOUTME: Skipped entirely once any builtin provider exists.

use super::{now, short_id, Store};
use anyhow::{Context, Result};
use newhorse_runner::Protocol;
use rusqlite::params;

pub struct BuiltinModel {
    pub model_id: &'static str,
    pub display_name: &'static str,
    pub is_default: bool,
}

pub struct BuiltinProvider {
    pub name: &'static str,
    pub protocol: Protocol,
    pub base_url: Option<&'static str>,
    pub models: &'static [BuiltinModel],
}

const fn model(model_id: &'static str, display_name: &'static str, is_default: bool) -> BuiltinModel {
    BuiltinModel {
        model_id,
        display_name,
        is_default,
    }
}

pub const BUILTIN_PROVIDERS: &[BuiltinProvider] = &[
    BuiltinProvider {
        name: "Anthropic",
        protocol: Protocol::Anthropic,
        base_url: None,
        models: &[
            model("claude-sonnet-4-5-20250929", "Sonnet 4.5", true),
            model("claude-opus-4-5-20251101", "Opus 4.5", false),
            model("claude-3-5-haiku-20241022", "Haiku 3.5", false),
        ],
    },
    BuiltinProvider {
        name: "OpenAI",
        protocol: Protocol::OpenAi,
        base_url: None,
        models: &[
            model("gpt-4o", "GPT-4o", true),
            model("gpt-4o-mini", "GPT-4o Mini", false),
        ],
    },
    BuiltinProvider {
        name: "Deepseek",
        protocol: Protocol::OpenAi,
        base_url: Some("https://api.deepseek.com"),
        models: &[
            model("deepseek-chat", "Deepseek V3", true),
            model("deepseek-reasoner", "Deepseek R1", false),
        ],
    },
    BuiltinProvider {
        name: "Qwen",
        protocol: Protocol::OpenAi,
        base_url: Some("https://dashscope.aliyuncs.com/compatible-mode/v1"),
        models: &[
            model("qwen-plus", "Qwen Plus", true),
            model("qwen-turbo", "Qwen Turbo", false),
            model("qwen-max", "Qwen Max", false),
        ],
    },
    BuiltinProvider {
        name: "GLM",
        protocol: Protocol::OpenAi,
        base_url: Some("https://open.bigmodel.cn/api/paas/v4"),
        models: &[
            model("glm-4-plus", "GLM-4 Plus", true),
            model("glm-4-flash", "GLM-4 Flash", false),
        ],
    },
];

impl Store {
    /// Insert the builtin catalog unless builtin providers already exist.
    /// Returns how many providers were inserted.
    pub fn seed_builtin_providers(&self) -> Result<usize> {
        let mut db = self.conn()?;
        let existing: i64 = db.query_row(
            "SELECT COUNT(*) FROM providers WHERE is_builtin = 1",
            [],
            |row| row.get(0),
        )?;
        if existing > 0 {
            tracing::debug!(existing, "Built-in providers already seeded");
            return Ok(0);
        }

        let tx = db.transaction()?;
        for builtin in BUILTIN_PROVIDERS {
            let provider_id = short_id();
            tx.execute(
                "INSERT INTO providers (id, name, protocol, base_url, api_key, is_builtin, enabled, created_at)
                 VALUES (?1, ?2, ?3, ?4, NULL, 1, 1, ?5)",
                params![
                    provider_id,
                    builtin.name,
                    builtin.protocol.as_str(),
                    builtin.base_url,
                    now()
                ],
            )?;

            for m in builtin.models {
                tx.execute(
                    "INSERT INTO provider_models (id, provider_id, model_id, display_name, is_default, created_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                    params![short_id(), provider_id, m.model_id, m.display_name, m.is_default, now()],
                )?;
            }
        }
        tx.commit().context("Failed to seed built-in providers")?;

        tracing::info!(count = BUILTIN_PROVIDERS.len(), "Seeded built-in providers");
        Ok(BUILTIN_PROVIDERS.len())
    }
}
