// ABOUTME: Server state shared by every route, and the HTTP listener.
// ABOUTME: Opens the store, seeds providers, builds runners and the coordinator.

use crate::api;
use crate::connections::ConnectionManager;
use anyhow::{Context, Result};
use newhorse_core::{Config, Coordinator, RunnerRegistry, Store, Vault};
use std::sync::Arc;
use std::time::Duration;

/// Shared state behind every handler
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub store: Store,
    pub coordinator: Arc<Coordinator>,
    pub connections: ConnectionManager,
    /// Client for provider verification probes
    pub http: reqwest::Client,
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState")
            .field("config", &"...")
            .field("store", &"<Store>")
            .field("coordinator", &"<Coordinator>")
            .field("connections", &"<ConnectionManager>")
            .finish()
    }
}

impl AppState {
    /// Assemble state from already-built parts
    pub fn new(config: Arc<Config>, store: Store, runners: RunnerRegistry) -> Result<Self> {
        let http = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(config.completion.connect_timeout_secs))
            .timeout(Duration::from_secs(60))
            .build()
            .context("Failed to build HTTP client")?;
        let coordinator = Arc::new(Coordinator::new(store.clone(), runners, Arc::clone(&config)));

        Ok(Self {
            config,
            store,
            coordinator,
            connections: ConnectionManager::new(),
            http,
        })
    }

    /// Initialize every server component from configuration
    pub fn initialize(config: Config) -> Result<Self> {
        let vault = Vault::new(config.security.encryption_key.as_deref());
        let store = Store::open(config.database_path(), vault)?;

        let seeded = store.seed_builtin_providers()?;
        if seeded > 0 {
            tracing::info!(count = seeded, "Built-in providers created");
        }

        let projects_root = config.projects_root();
        std::fs::create_dir_all(&projects_root).with_context(|| {
            format!("Failed to create projects root {}", projects_root.display())
        })?;

        let runners = RunnerRegistry::standard(config.agent.clone(), config.completion.clone())?;
        tracing::info!(protocols = ?runners.available(), "Runners registered");

        Self::new(Arc::new(config), store, runners)
    }
}

/// Bind and serve until ctrl-c
pub async fn serve(state: AppState) -> Result<()> {
    let addr = format!("{}:{}", state.config.server.host, state.config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    tracing::info!(addr = %addr, "newhorse listening");

    axum::serve(listener, api::router(state))
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %e, "Failed to listen for ctrl-c");
            }
            tracing::info!("Shutdown signal received");
        })
        .await
        .context("Server error")?;

    tracing::info!("Server stopped");
    Ok(())
}
