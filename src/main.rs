// ABOUTME: Main entry point for the newhorse chat server
// ABOUTME: Loads config, initializes logging, then dispatches the CLI subcommand

use anyhow::Result;
use clap::Parser;
use newhorse::cli::{self, Cli, Command};
use newhorse::server::{self, AppState};
use newhorse_core::config::LoggingConfig;
use newhorse_core::Config;
use std::path::Path;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, Layer};

fn init_logging(logging: &LoggingConfig, log_dir: &Path) -> Option<WorkerGuard> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info,newhorse=debug".into());

    let stdout = if logging.json {
        tracing_subscriber::fmt::layer().json().boxed()
    } else {
        tracing_subscriber::fmt::layer().boxed()
    };

    let (file_layer, guard) = if logging.file {
        let appender = tracing_appender::rolling::daily(log_dir, "newhorse.log");
        let (writer, guard) = tracing_appender::non_blocking(appender);
        let layer = tracing_subscriber::fmt::layer()
            .with_ansi(false)
            .with_writer(writer)
            .boxed();
        (Some(layer), Some(guard))
    } else {
        (None, None)
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(stdout)
        .with(file_layer)
        .init();
    guard
}

#[tokio::main]
async fn main() -> Result<()> {
    // Set up panic hook to log panics before they crash the process
    std::panic::set_hook(Box::new(|panic_info| {
        eprintln!("\nPANIC! newhorse crashed with the following error:\n");
        eprintln!("{}", panic_info);
        eprintln!("\nBacktrace:");
        eprintln!("{:?}", std::backtrace::Backtrace::force_capture());
    }));

    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    if let Some(Command::GenerateKey) = cli.command {
        cli::print_generated_key();
        return Ok(());
    }

    let mut config = Config::load()?;
    let _log_guard = init_logging(&config.logging, &config.log_dir());

    match cli.command {
        Some(Command::Providers) => cli::list_providers(&config),
        Some(Command::Serve { host, port }) => {
            if let Some(host) = host {
                config.server.host = host;
            }
            if let Some(port) = port {
                config.server.port = port;
            }
            run_server(config).await
        }
        Some(Command::GenerateKey) | None => run_server(config).await,
    }
}

async fn run_server(config: Config) -> Result<()> {
    tracing::info!(
        host = %config.server.host,
        port = config.server.port,
        data_dir = %config.storage.data_dir,
        projects_root = %config.projects_root().display(),
        encryption = config.security.encryption_key.is_some(),
        agent_binary = %config.agent.binary,
        "Configuration loaded"
    );

    let state = AppState::initialize(config)?;
    server::serve(state).await
}
