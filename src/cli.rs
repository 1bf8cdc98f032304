// ABOUTME: Command-line interface - serve the API, inspect providers, generate keys.
// ABOUTME: Running with no subcommand starts the server.

use anyhow::Result;
use clap::{Parser, Subcommand};
use newhorse_core::vault::{generate_key, mask};
use newhorse_core::{Config, Store, Vault};

/// Multi-backend chat execution server.
#[derive(Parser, Debug)]
#[command(name = "newhorse", version, about = "Multi-backend chat execution server")]
pub struct Cli {
    /// Subcommand to execute (defaults to `serve`).
    #[command(subcommand)]
    pub command: Option<Command>,
}

/// Top-level subcommands.
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Start the HTTP/WebSocket server.
    Serve {
        /// Bind host override.
        #[arg(long)]
        host: Option<String>,
        /// Bind port override.
        #[arg(long)]
        port: Option<u16>,
    },
    /// List configured providers with masked credentials.
    Providers,
    /// Print a fresh ENCRYPTION_KEY value.
    GenerateKey,
}

/// Print every provider and its models
pub fn list_providers(config: &Config) -> Result<()> {
    let vault = Vault::new(config.security.encryption_key.as_deref());
    let store = Store::open(config.database_path(), vault)?;
    store.seed_builtin_providers()?;
    let snapshot = store.snapshot()?;

    for provider in store.list_providers()? {
        let key = provider
            .api_key
            .as_deref()
            .map(|k| mask(&store.vault().decrypt(k)))
            .filter(|m| !m.is_empty())
            .unwrap_or_else(|| "-".to_string());
        println!(
            "{:<10} {:<16} {:<10} {:<8} {:<8} {}",
            provider.id,
            provider.name,
            provider.protocol,
            if provider.is_builtin { "builtin" } else { "custom" },
            if provider.enabled { "enabled" } else { "disabled" },
            key
        );
        for model in snapshot.models_of(&provider.id) {
            let marker = if model.is_default { "*" } else { " " };
            println!("    {} {} ({})", marker, model.model_id, model.display_name);
        }
    }
    Ok(())
}

pub fn print_generated_key() {
    println!("{}", generate_key());
}
