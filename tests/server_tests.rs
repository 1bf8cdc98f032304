// ABOUTME: Tests for server startup against a real on-disk data directory
// ABOUTME: Seeding is idempotent and credentials survive a restart with the same key

use newhorse::AppState;
use newhorse_core::store::{NewProvider, ProviderUpdate};
use newhorse_core::vault::generate_key;
use newhorse_core::Config;
use newhorse_runner::Protocol;
use tempfile::TempDir;

fn config_in(dir: &TempDir, key: Option<String>) -> Config {
    let mut config = Config::default();
    config.storage.data_dir = dir.path().to_string_lossy().to_string();
    config.security.encryption_key = key;
    config
}

#[tokio::test]
async fn test_initialize_seeds_once_and_creates_directories() {
    let dir = TempDir::new().unwrap();

    let state = AppState::initialize(config_in(&dir, None)).unwrap();
    assert_eq!(state.store.list_providers().unwrap().len(), 5);
    assert!(dir.path().join("projects").is_dir());
    assert!(dir.path().join("newhorse.db").exists());
    drop(state);

    // A second start finds the builtins and leaves them alone
    let state = AppState::initialize(config_in(&dir, None)).unwrap();
    assert_eq!(state.store.list_providers().unwrap().len(), 5);
}

#[tokio::test]
async fn test_credentials_round_trip_across_restart() {
    let dir = TempDir::new().unwrap();
    let key = generate_key();

    let state = AppState::initialize(config_in(&dir, Some(key.clone()))).unwrap();
    let provider = state
        .store
        .create_provider(NewProvider {
            name: "Local".to_string(),
            protocol: Protocol::OpenAi,
            base_url: None,
            api_key: Some("sk-persisted-secret".to_string()),
        })
        .unwrap();
    let stored = provider.api_key.clone().unwrap();
    assert_ne!(stored, "sk-persisted-secret");
    drop(state);

    let state = AppState::initialize(config_in(&dir, Some(key))).unwrap();
    let reloaded = state.store.get_provider(&provider.id).unwrap().unwrap();
    let stored = reloaded.api_key.unwrap();
    assert_eq!(state.store.vault().decrypt(&stored), "sk-persisted-secret");

    // Clearing the key through an update removes it entirely
    let cleared = state
        .store
        .update_provider(
            &provider.id,
            ProviderUpdate {
                api_key: Some(String::new()),
                ..Default::default()
            },
        )
        .unwrap();
    assert!(!cleared.has_api_key());
}
