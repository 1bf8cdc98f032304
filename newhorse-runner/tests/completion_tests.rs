// ABOUTME: Tests for the completion runner's SSE event translation.
// ABOUTME: Feeds canned byte streams through completion_events and the guard.

use futures::stream::{self, StreamExt};
use newhorse_runner::backends::completion::{completion_events, CompletionConfig, CompletionRunner};
use newhorse_runner::{guard, ErrorCode, Protocol, ResolvedTarget, RunRequest, Runner, RunnerEvent};
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

fn sse(chunks: &[&str]) -> Vec<Result<Vec<u8>, std::io::Error>> {
    chunks
        .iter()
        .map(|c| Ok(format!("data: {}\n\n", c).into_bytes()))
        .collect()
}

async fn run(chunks: Vec<Result<Vec<u8>, std::io::Error>>) -> Vec<RunnerEvent> {
    let raw = completion_events(stream::iter(chunks), Duration::from_secs(5), Instant::now());
    guard(raw, CancellationToken::new(), "completion").collect().await
}

#[tokio::test]
async fn test_deltas_then_done_with_usage() {
    let events = run(sse(&[
        r#"{"choices":[{"delta":{"role":"assistant"}}]}"#,
        r#"{"choices":[{"delta":{"content":"Hel"}}]}"#,
        r#"{"choices":[{"delta":{"content":"lo"}}]}"#,
        r#"{"choices":[],"usage":{"prompt_tokens":9,"completion_tokens":2,"total_tokens":11}}"#,
        "[DONE]",
    ]))
    .await;

    assert_eq!(events.len(), 3);
    assert_eq!(events[0], RunnerEvent::TextDelta("Hel".to_string()));
    assert_eq!(events[1], RunnerEvent::TextDelta("lo".to_string()));
    match &events[2] {
        RunnerEvent::SessionComplete {
            usage,
            session_token,
            ..
        } => {
            let usage = usage.as_ref().expect("usage reported");
            assert_eq!(usage.input_tokens, 9);
            assert_eq!(usage.output_tokens, 2);
            assert!(session_token.is_none());
        }
        other => panic!("Expected SessionComplete, got {:?}", other),
    }
}

#[tokio::test]
async fn test_end_of_body_without_done_still_completes() {
    let events = run(sse(&[r#"{"choices":[{"delta":{"content":"ok"}}]}"#])).await;
    assert_eq!(events.len(), 2);
    assert!(matches!(
        events[1],
        RunnerEvent::SessionComplete { usage: None, .. }
    ));
}

#[tokio::test]
async fn test_chunks_split_across_reads() {
    let chunks: Vec<Result<Vec<u8>, std::io::Error>> = vec![
        Ok(b"data: {\"choices\":[{\"delta\":{\"con".to_vec()),
        Ok(b"tent\":\"split\"}}]}\n\ndata: [DONE]\n\n".to_vec()),
    ];
    let events = run(chunks).await;
    assert_eq!(events[0], RunnerEvent::TextDelta("split".to_string()));
    assert!(events[1].is_terminal());
}

#[tokio::test]
async fn test_malformed_chunk_is_skipped() {
    let events = run(sse(&[
        "not json",
        r#"{"choices":[{"delta":{"content":"fine"}}]}"#,
        "[DONE]",
    ]))
    .await;
    assert_eq!(events[0], RunnerEvent::TextDelta("fine".to_string()));
    assert_eq!(events.len(), 2);
}

#[tokio::test]
async fn test_in_stream_error_object() {
    let events = run(sse(&[
        r#"{"choices":[{"delta":{"content":"a"}}]}"#,
        r#"{"error":{"message":"Rate limit reached for requests","type":"requests"}}"#,
        r#"{"choices":[{"delta":{"content":"never"}}]}"#,
    ]))
    .await;
    assert_eq!(events.len(), 2);
    match &events[1] {
        RunnerEvent::Error { code, message } => {
            assert_eq!(*code, ErrorCode::RateLimited);
            assert_eq!(message, "Rate limit reached for requests");
        }
        other => panic!("Expected Error, got {:?}", other),
    }
}

#[tokio::test(start_paused = true)]
async fn test_idle_stream_times_out() {
    let first: Vec<Result<Vec<u8>, std::io::Error>> =
        sse(&[r#"{"choices":[{"delta":{"content":"a"}}]}"#]);
    let bytes = stream::iter(first).chain(stream::pending());
    let raw = completion_events(bytes, Duration::from_secs(1), Instant::now());

    let events: Vec<RunnerEvent> = guard(raw, CancellationToken::new(), "completion")
        .collect()
        .await;
    assert_eq!(events.len(), 2);
    assert!(matches!(
        events[1],
        RunnerEvent::Error { code: ErrorCode::Timeout, .. }
    ));
}

#[tokio::test]
async fn test_silent_endpoint_times_out_waiting_for_headers() {
    // Accepts the connection and never writes a byte
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let hold = tokio::spawn(async move {
        let mut held = Vec::new();
        while let Ok((socket, _)) = listener.accept().await {
            held.push(socket);
        }
    });

    let runner = CompletionRunner::new(CompletionConfig {
        connect_timeout_secs: 1,
        idle_timeout_secs: 1,
    })
    .unwrap();
    let request = RunRequest {
        instruction: "hi".to_string(),
        target: ResolvedTarget {
            provider_id: "p1".to_string(),
            provider_name: "Silent".to_string(),
            protocol: Protocol::OpenAi,
            model_id: "m1".to_string(),
            api_key: "sk-silent".to_string(),
            base_url: Some(format!("http://{}/v1", addr)),
        },
        working_dir: None,
        system_prompt: None,
        history: Vec::new(),
        session_token: None,
    };

    let events: Vec<RunnerEvent> = tokio::time::timeout(
        Duration::from_secs(8),
        guard(runner.stream(request), CancellationToken::new(), "completion").collect(),
    )
    .await
    .expect("runner never reached a terminal event");
    hold.abort();

    assert_eq!(events.len(), 1);
    assert!(matches!(
        events[0],
        RunnerEvent::Error { code: ErrorCode::Timeout, .. }
    ));
}
