// ABOUTME: Provider and model management routes plus the aggregated model list.
// ABOUTME: Credentials leave the server only masked; verify probes the live backend.

use super::error::{ApiError, ApiResult};
use crate::server::AppState;
use axum::{
    extract::{Path, State},
    Json,
};
use newhorse_core::store::{Model, ModelUpdate, NewModel, NewProvider, Provider, ProviderUpdate};
use newhorse_core::vault::mask;
use newhorse_core::{ChatError, ResolvedTarget};
use serde::Serialize;
use serde_json::{json, Value};

/// A provider as the management UI sees it
#[derive(Debug, Serialize)]
pub struct ProviderView {
    pub id: String,
    pub name: String,
    pub protocol: String,
    pub base_url: Option<String>,
    pub api_key_masked: String,
    pub has_api_key: bool,
    pub is_builtin: bool,
    pub enabled: bool,
    pub models: Vec<Model>,
}

#[derive(Debug, Serialize)]
pub struct VerifyResponse {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latency_ms: Option<u64>,
}

impl VerifyResponse {
    fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(error.into()),
            latency_ms: None,
        }
    }
}

fn view(state: &AppState, provider: Provider, models: Vec<Model>) -> ProviderView {
    let plain = provider
        .api_key
        .as_deref()
        .map(|k| state.store.vault().decrypt(k))
        .unwrap_or_default();
    ProviderView {
        has_api_key: provider.has_api_key(),
        api_key_masked: mask(&plain),
        id: provider.id,
        name: provider.name,
        protocol: provider.protocol,
        base_url: provider.base_url,
        is_builtin: provider.is_builtin,
        enabled: provider.enabled,
        models,
    }
}

fn view_of(state: &AppState, provider: Provider) -> ApiResult<ProviderView> {
    let models = state.store.list_models(&provider.id)?;
    Ok(view(state, provider, models))
}

/// GET /api/providers - builtin first, then by name
pub async fn list_providers(State(state): State<AppState>) -> ApiResult<Json<Vec<ProviderView>>> {
    let snapshot = state.store.snapshot()?;
    let views = state
        .store
        .list_providers()?
        .into_iter()
        .map(|p| {
            let models = snapshot.models_of(&p.id).cloned().collect();
            view(&state, p, models)
        })
        .collect();
    Ok(Json(views))
}

/// POST /api/providers
pub async fn create_provider(
    State(state): State<AppState>,
    Json(body): Json<NewProvider>,
) -> ApiResult<Json<ProviderView>> {
    let provider = state.store.create_provider(body)?;
    Ok(Json(view(&state, provider, Vec::new())))
}

/// PATCH /api/providers/{id}
pub async fn update_provider(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(body): Json<ProviderUpdate>,
) -> ApiResult<Json<ProviderView>> {
    let provider = state.store.update_provider(&id, body)?;
    Ok(Json(view_of(&state, provider)?))
}

/// DELETE /api/providers/{id}
pub async fn delete_provider(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<Value>> {
    state.store.delete_provider(&id)?;
    Ok(Json(json!({ "success": true })))
}

/// GET /api/providers/{id}/models
pub async fn list_models(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<Vec<Model>>> {
    Ok(Json(state.store.list_models(&id)?))
}

/// POST /api/providers/{id}/models
pub async fn add_model(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(body): Json<NewModel>,
) -> ApiResult<Json<Model>> {
    Ok(Json(state.store.add_model(&id, body)?))
}

/// PATCH /api/providers/{id}/models/{model_id}
pub async fn update_model(
    State(state): State<AppState>,
    Path((id, model_id)): Path<(String, String)>,
    Json(body): Json<ModelUpdate>,
) -> ApiResult<Json<Model>> {
    Ok(Json(state.store.update_model(&id, &model_id, body)?))
}

/// DELETE /api/providers/{id}/models/{model_id}
pub async fn delete_model(
    State(state): State<AppState>,
    Path((id, model_id)): Path<(String, String)>,
) -> ApiResult<Json<Value>> {
    state.store.delete_model(&id, &model_id)?;
    Ok(Json(json!({ "success": true })))
}

/// POST /api/providers/{id}/verify
///
/// Backend failures are reported in the body, not as HTTP errors.
pub async fn verify_provider(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<VerifyResponse>> {
    let provider = state
        .store
        .get_provider(&id)?
        .ok_or_else(|| ApiError::from(ChatError::NotFound("Provider".to_string())))?;

    if !provider.has_api_key() {
        return Ok(Json(VerifyResponse::failed("No API key configured")));
    }
    let Some(protocol) = provider.protocol() else {
        return Ok(Json(VerifyResponse::failed(format!(
            "Unknown protocol: {}",
            provider.protocol
        ))));
    };

    let models = state.store.list_models(&provider.id)?;
    let Some(model) = models.iter().find(|m| m.is_default).or_else(|| models.first()) else {
        return Ok(Json(VerifyResponse::failed(
            "No models configured for this provider",
        )));
    };

    let api_key = provider
        .api_key
        .as_deref()
        .map(|k| state.store.vault().decrypt(k))
        .unwrap_or_default();
    let target = ResolvedTarget {
        provider_id: provider.id.clone(),
        provider_name: provider.name.clone(),
        protocol,
        model_id: model.model_id.clone(),
        api_key,
        base_url: provider.base_url.clone(),
    };

    match newhorse_runner::probe::verify(&state.http, &target).await {
        Ok(latency) => {
            let latency_ms = latency.as_millis() as u64;
            tracing::info!(provider = %provider.name, latency_ms, "Provider verified");
            Ok(Json(VerifyResponse {
                success: true,
                error: None,
                latency_ms: Some(latency_ms),
            }))
        }
        Err(e) => {
            tracing::warn!(provider = %provider.name, error = %e, "Provider verify failed");
            Ok(Json(VerifyResponse::failed(format!("{:#}", e))))
        }
    }
}

/// One enabled provider's models, for model pickers
#[derive(Debug, Serialize)]
pub struct ModelGroup {
    pub provider_id: String,
    pub provider_name: String,
    pub protocol: String,
    pub has_api_key: bool,
    pub models: Vec<Model>,
}

/// GET /api/models - enabled providers with at least one model
pub async fn list_all_models(State(state): State<AppState>) -> ApiResult<Json<Vec<ModelGroup>>> {
    let snapshot = state.store.snapshot()?;
    let mut providers: Vec<&Provider> = snapshot.providers.iter().filter(|p| p.enabled).collect();
    providers.sort_by(|a, b| b.is_builtin.cmp(&a.is_builtin).then_with(|| a.name.cmp(&b.name)));

    let groups = providers
        .into_iter()
        .filter_map(|p| {
            let models: Vec<Model> = snapshot.models_of(&p.id).cloned().collect();
            if models.is_empty() {
                return None;
            }
            Some(ModelGroup {
                provider_id: p.id.clone(),
                provider_name: p.name.clone(),
                protocol: p.protocol.clone(),
                has_api_key: p.has_api_key(),
                models,
            })
        })
        .collect();
    Ok(Json(groups))
}
