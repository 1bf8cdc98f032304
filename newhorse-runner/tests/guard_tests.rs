// ABOUTME: Tests for the stream guard's terminal-event guarantees.
// ABOUTME: Covers failures, truncated streams, trailing output, and cancellation.

use futures::stream::{self, StreamExt};
use newhorse_runner::backends::mock::MockRunner;
use newhorse_runner::{
    guard, ErrorCode, Protocol, RawEventStream, ResolvedTarget, RunRequest, Runner, RunnerEvent,
};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

fn request(instruction: &str) -> RunRequest {
    RunRequest {
        instruction: instruction.to_string(),
        target: ResolvedTarget {
            provider_id: "p1".to_string(),
            provider_name: "Mock".to_string(),
            protocol: Protocol::OpenAi,
            model_id: "mock-model".to_string(),
            api_key: "sk-mock".to_string(),
            base_url: None,
        },
        working_dir: None,
        system_prompt: None,
        history: Vec::new(),
        session_token: None,
    }
}

fn complete() -> RunnerEvent {
    RunnerEvent::SessionComplete {
        duration_ms: 1,
        usage: None,
        session_token: None,
    }
}

async fn drain(raw: RawEventStream, cancel: CancellationToken) -> Vec<RunnerEvent> {
    guard(raw, cancel, "test").collect().await
}

#[tokio::test]
async fn test_raw_failure_becomes_single_error() {
    let mock = MockRunner::new().on_prompt("go").fail_after(
        vec![RunnerEvent::TextDelta("partial".to_string())],
        "connection reset by peer",
    );

    let events = drain(mock.stream(request("go")), CancellationToken::new()).await;
    assert_eq!(events.len(), 2);
    assert_eq!(events[0], RunnerEvent::TextDelta("partial".to_string()));
    match &events[1] {
        RunnerEvent::Error { code, message } => {
            assert_eq!(*code, ErrorCode::BackendError);
            assert!(message.contains("connection reset"));
        }
        other => panic!("Expected Error, got {:?}", other),
    }
}

#[tokio::test]
async fn test_truncated_stream_is_incomplete() {
    let raw: RawEventStream = stream::iter(vec![Ok(RunnerEvent::TextDelta("a".to_string()))]).boxed();
    let events = drain(raw, CancellationToken::new()).await;
    assert_eq!(events.len(), 2);
    assert!(matches!(
        events[1],
        RunnerEvent::Error { code: ErrorCode::Incomplete, .. }
    ));
}

#[tokio::test]
async fn test_output_after_terminal_is_discarded() {
    let raw: RawEventStream = stream::iter(vec![
        Ok(RunnerEvent::TextDelta("a".to_string())),
        Ok(complete()),
        Ok(RunnerEvent::TextDelta("late".to_string())),
        Err(anyhow::anyhow!("late failure")),
    ])
    .boxed();

    let events = drain(raw, CancellationToken::new()).await;
    assert_eq!(events, vec![RunnerEvent::TextDelta("a".to_string()), complete()]);
}

#[tokio::test]
async fn test_cancel_yields_stopped_and_nothing_after() {
    let mock = MockRunner::new()
        .with_delay(Duration::from_millis(50))
        .on_prompt("long")
        .respond_with(vec![
            RunnerEvent::TextDelta("one".to_string()),
            RunnerEvent::TextDelta("two".to_string()),
            RunnerEvent::TextDelta("three".to_string()),
            complete(),
        ]);

    let cancel = CancellationToken::new();
    let guarded = guard(mock.stream(request("long")), cancel.clone(), "mock");
    tokio::pin!(guarded);

    assert_eq!(
        guarded.next().await,
        Some(RunnerEvent::TextDelta("one".to_string()))
    );
    cancel.cancel();
    assert_eq!(guarded.next().await, Some(RunnerEvent::Stopped));
    assert_eq!(guarded.next().await, None);
}

#[tokio::test]
async fn test_cancel_before_first_event() {
    let cancel = CancellationToken::new();
    cancel.cancel();
    let raw: RawEventStream = stream::pending().boxed();
    let events = drain(raw, cancel).await;
    assert_eq!(events, vec![RunnerEvent::Stopped]);
}

#[tokio::test]
async fn test_error_event_from_runner_passes_through() {
    let raw: RawEventStream = stream::iter(vec![Ok(RunnerEvent::error(
        ErrorCode::AuthFailed,
        "Invalid API key",
    ))])
    .boxed();
    let events = drain(raw, CancellationToken::new()).await;
    assert_eq!(
        events,
        vec![RunnerEvent::error(ErrorCode::AuthFailed, "Invalid API key")]
    );
}
