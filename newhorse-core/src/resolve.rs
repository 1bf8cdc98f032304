// ABOUTME: Resolution engine - picks provider, model, and credential for one request.
// ABOUTME: Pure function of a registry snapshot, the project row, and the request hints.

use crate::error::ChatError;
use crate::store::{Project, Provider, RegistrySnapshot};
use crate::vault::Vault;
use newhorse_runner::{Protocol, ResolvedTarget};

/// Per-request hints sent by the client
#[derive(Debug, Clone, Copy, Default)]
pub struct Hints<'a> {
    pub model: Option<&'a str>,
    pub provider_id: Option<&'a str>,
}

/// Which rule of the provider chain matched, for logging
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderSource {
    Explicit,
    ProjectOverride,
    ModelOwner,
    FirstWithCredential,
}

fn usable(provider: &Provider) -> Option<Protocol> {
    if !provider.enabled {
        return None;
    }
    let protocol = provider.protocol();
    if protocol.is_none() {
        tracing::warn!(
            provider_id = %provider.id,
            protocol = %provider.protocol,
            "Skipping provider with unknown protocol"
        );
    }
    protocol
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

/// Choose the provider: explicit id, then the project override, then the
/// first owner of the requested model, then the first provider holding a
/// credential. Disabled providers never match.
pub fn choose_provider<'s>(
    snapshot: &'s RegistrySnapshot,
    hints: Hints<'_>,
    project: Option<&Project>,
) -> Option<(&'s Provider, Protocol, ProviderSource)> {
    let by_id = |id: &str| {
        snapshot
            .provider(id)
            .and_then(|p| usable(p).map(|protocol| (p, protocol)))
    };

    if let Some(found) = non_empty(hints.provider_id).and_then(by_id) {
        return Some((found.0, found.1, ProviderSource::Explicit));
    }

    let override_id = project.and_then(|p| non_empty(p.override_provider_id.as_deref()));
    if let Some(found) = override_id.and_then(by_id) {
        return Some((found.0, found.1, ProviderSource::ProjectOverride));
    }

    if let Some(model) = non_empty(hints.model) {
        let owner = snapshot.providers.iter().find_map(|p| {
            let owns = snapshot.models_of(&p.id).any(|m| m.model_id == model);
            if owns {
                usable(p).map(|protocol| (p, protocol))
            } else {
                None
            }
        });
        if let Some((p, protocol)) = owner {
            return Some((p, protocol, ProviderSource::ModelOwner));
        }
    }

    snapshot
        .providers
        .iter()
        .filter(|p| p.has_api_key())
        .find_map(|p| usable(p).map(|protocol| (p, protocol, ProviderSource::FirstWithCredential)))
}

/// Resolve the concrete target for one request.
///
/// Model: the requested model if the chosen provider has it, else the
/// project's selected model if the provider has it, else the provider's
/// default. Credential: the project's override key before the provider's.
pub fn resolve(
    snapshot: &RegistrySnapshot,
    vault: &Vault,
    hints: Hints<'_>,
    project: Option<&Project>,
) -> Result<ResolvedTarget, ChatError> {
    let (provider, protocol, source) = choose_provider(snapshot, hints, project).ok_or_else(|| {
        ChatError::configuration(
            "No enabled provider with an API key is configured. Add a key under Providers.",
        )
    })?;

    let owns = |model: &str| snapshot.models_of(&provider.id).any(|m| m.model_id == model);
    let model_id = non_empty(hints.model)
        .filter(|m| owns(m))
        .or_else(|| {
            project
                .and_then(|p| non_empty(p.selected_model.as_deref()))
                .filter(|m| owns(m))
        })
        .map(str::to_string)
        .or_else(|| snapshot.default_model(&provider.id).map(|m| m.model_id.clone()))
        .ok_or_else(|| {
            ChatError::configuration(format!(
                "Provider {} has no models configured",
                provider.name
            ))
        })?;

    let project_key = project
        .and_then(|p| p.override_api_key.as_deref())
        .map(|k| vault.decrypt(k))
        .filter(|k| !k.is_empty());
    let api_key = project_key
        .or_else(|| {
            provider
                .api_key
                .as_deref()
                .map(|k| vault.decrypt(k))
                .filter(|k| !k.is_empty())
        })
        .ok_or_else(|| {
            ChatError::configuration(format!(
                "No API key configured for provider {}",
                provider.name
            ))
        })?;

    tracing::debug!(
        provider_id = %provider.id,
        provider = %provider.name,
        model = %model_id,
        source = ?source,
        "Resolved chat target"
    );

    Ok(ResolvedTarget {
        provider_id: provider.id.clone(),
        provider_name: provider.name.clone(),
        protocol,
        model_id,
        api_key,
        base_url: provider.base_url.clone(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::Model;

    fn provider(id: &str, protocol: &str, key: Option<&str>, builtin: bool) -> Provider {
        Provider {
            id: id.to_string(),
            name: id.to_uppercase(),
            protocol: protocol.to_string(),
            base_url: None,
            api_key: key.map(str::to_string),
            is_builtin: builtin,
            enabled: true,
            created_at: "2025-01-01T00:00:00.000000Z".to_string(),
        }
    }

    fn model(provider_id: &str, model_id: &str, is_default: bool) -> Model {
        Model {
            id: format!("{}-{}", provider_id, model_id),
            provider_id: provider_id.to_string(),
            model_id: model_id.to_string(),
            display_name: model_id.to_string(),
            is_default,
            created_at: "2025-01-01T00:00:00.000000Z".to_string(),
        }
    }

    fn snapshot() -> RegistrySnapshot {
        RegistrySnapshot {
            providers: vec![
                provider("anth", "anthropic", None, true),
                provider("deep", "openai", Some("sk-deep"), true),
                provider("mine", "openai", Some("sk-mine"), false),
            ],
            models: vec![
                model("anth", "claude-sonnet-4-5-20250929", true),
                model("deep", "deepseek-chat", true),
                model("deep", "deepseek-reasoner", false),
                model("mine", "llama3", true),
            ],
        }
    }

    #[test]
    fn test_first_provider_with_credential_wins() {
        let target = resolve(&snapshot(), &Vault::passthrough(), Hints::default(), None).unwrap();
        assert_eq!(target.provider_id, "deep");
        assert_eq!(target.model_id, "deepseek-chat");
        assert_eq!(target.api_key, "sk-deep");
        assert_eq!(target.protocol, Protocol::OpenAi);
    }

    #[test]
    fn test_model_hint_selects_owner() {
        let hints = Hints {
            model: Some("llama3"),
            provider_id: None,
        };
        let target = resolve(&snapshot(), &Vault::passthrough(), hints, None).unwrap();
        assert_eq!(target.provider_id, "mine");
        assert_eq!(target.model_id, "llama3");
    }

    #[test]
    fn test_explicit_disabled_provider_falls_through() {
        let mut snap = snapshot();
        snap.providers[2].enabled = false;
        let hints = Hints {
            model: None,
            provider_id: Some("mine"),
        };
        let target = resolve(&snap, &Vault::passthrough(), hints, None).unwrap();
        assert_eq!(target.provider_id, "deep");
    }

    #[test]
    fn test_unknown_protocol_is_skipped() {
        let mut snap = snapshot();
        snap.providers[1].protocol = "gemini".to_string();
        let target = resolve(&snap, &Vault::passthrough(), Hints::default(), None).unwrap();
        assert_eq!(target.provider_id, "mine");
    }

    #[test]
    fn test_selected_model_must_belong_to_provider() {
        let project = Project {
            id: "p1".to_string(),
            selected_model: Some("claude-sonnet-4-5-20250929".to_string()),
            ..Default::default()
        };
        let target =
            resolve(&snapshot(), &Vault::passthrough(), Hints::default(), Some(&project)).unwrap();
        assert_eq!(target.provider_id, "deep");
        assert_eq!(target.model_id, "deepseek-chat");

        let project = Project {
            selected_model: Some("deepseek-reasoner".to_string()),
            ..project
        };
        let target =
            resolve(&snapshot(), &Vault::passthrough(), Hints::default(), Some(&project)).unwrap();
        assert_eq!(target.model_id, "deepseek-reasoner");
    }

    #[test]
    fn test_provider_without_models_is_configuration_error() {
        let mut snap = snapshot();
        snap.models.retain(|m| m.provider_id != "deep");
        let err = resolve(&snap, &Vault::passthrough(), Hints::default(), None).unwrap_err();
        assert!(matches!(err, ChatError::Configuration(ref m) if m.contains("no models")));
    }
}
