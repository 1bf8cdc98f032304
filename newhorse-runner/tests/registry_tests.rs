// ABOUTME: Tests for the RunnerRegistry protocol mapping.
// ABOUTME: Validates lookup, replacement, and the unsupported-protocol error.

use newhorse_runner::backends::agentic::AgenticConfig;
use newhorse_runner::backends::completion::CompletionConfig;
use newhorse_runner::backends::mock::MockRunner;
use newhorse_runner::{Protocol, RunnerRegistry};

#[test]
fn test_standard_registry_serves_both_protocols() {
    let registry =
        RunnerRegistry::standard(AgenticConfig::default(), CompletionConfig::default()).unwrap();
    assert_eq!(registry.get(Protocol::Anthropic).unwrap().name(), "agentic");
    assert_eq!(registry.get(Protocol::OpenAi).unwrap().name(), "completion");
    assert_eq!(
        registry.available(),
        vec![Protocol::Anthropic, Protocol::OpenAi]
    );
}

#[test]
fn test_unknown_protocol_errors() {
    let registry = RunnerRegistry::new().register(Protocol::OpenAi, MockRunner::new());
    match registry.get(Protocol::Anthropic) {
        Err(err) => assert!(err
            .to_string()
            .contains("No runner registered for protocol: anthropic")),
        Ok(_) => panic!("Expected error for unregistered protocol"),
    }
}

#[test]
fn test_register_replaces_existing_runner() {
    let registry = RunnerRegistry::standard(AgenticConfig::default(), CompletionConfig::default())
        .unwrap()
        .register(Protocol::Anthropic, MockRunner::new());
    assert_eq!(registry.get(Protocol::Anthropic).unwrap().name(), "mock");
    assert_eq!(registry.available().len(), 2);
}

#[test]
fn test_protocol_parses_from_tag() {
    assert_eq!("openai".parse::<Protocol>().unwrap(), Protocol::OpenAi);
    assert_eq!("anthropic".parse::<Protocol>().unwrap(), Protocol::Anthropic);
    assert!("gemini".parse::<Protocol>().is_err());
    assert_eq!(
        serde_json::to_value(Protocol::OpenAi).unwrap(),
        serde_json::json!("openai")
    );
}
