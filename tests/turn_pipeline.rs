//! End-to-end streamed turns against in-process collaborators

mod common;

use chatrag::session::SessionRepository;
use chatrag::streaming::{StreamEvent, StreamTerminal};
use chatrag::types::Role;
use chatrag::TurnRequest;
use common::{collect, harness, seed_docs, ScriptedCompletion};
use tokio_util::sync::CancellationToken;

#[tokio::test]
async fn test_round_trip_streams_and_persists() {
    let h = harness(ScriptedCompletion::replying(&["Ownership ", "is ", "checked."]));
    seed_docs(&h.indexer).await;

    let request = TurnRequest::chat("s-1", "u1", "ownership rules").with_collection("docs", Some("7"));
    let (rx, task) = h.pipeline.stream_turn(request, CancellationToken::new());
    let events = collect(rx).await;
    let outcome = task.await.unwrap();

    assert_eq!(
        events,
        vec![
            StreamEvent::Content("Ownership ".to_string()),
            StreamEvent::Content("is ".to_string()),
            StreamEvent::Content("checked.".to_string()),
            StreamEvent::End,
        ]
    );
    assert_eq!(outcome.terminal, StreamTerminal::Completed);
    assert_eq!(outcome.full_response, "Ownership is checked.");

    // prompt carries the scoped passage only
    let requests = h.completion.requests();
    assert_eq!(requests.len(), 1);
    let system = &requests[0].messages[0];
    assert_eq!(system.role, Role::System);
    assert!(system.content.contains("[Source 1] Rust ownership rules keep memory safe"));
    assert!(!system.content.contains("another document"));
    let last = requests[0].messages.last().unwrap();
    assert_eq!(last.role, Role::User);
    assert_eq!(last.content, "ownership rules");

    h.history.drain().await;
    assert_eq!(h.repository.save_count(), 1);
    let stored = h.history.fetch("s-1").await.unwrap();
    let roles: Vec<Role> = stored.messages().iter().map(|m| m.role).collect();
    assert_eq!(roles, vec![Role::System, Role::User, Role::Assistant]);
    assert_eq!(stored.messages()[2].content, "Ownership is checked.");
}

#[tokio::test]
async fn test_second_turn_sees_history() {
    let h = harness(ScriptedCompletion::replying(&["ok"]));

    for message in ["first question", "second question"] {
        let (rx, task) = h
            .pipeline
            .stream_turn(TurnRequest::chat("s-2", "u1", message), CancellationToken::new());
        collect(rx).await;
        task.await.unwrap();
        h.history.drain().await;
    }

    let requests = h.completion.requests();
    let contents: Vec<&str> = requests[1].messages.iter().map(|m| m.content.as_str()).collect();
    assert_eq!(&contents[1..], &["first question", "ok", "second question"]);

    let stored = h.history.fetch("s-2").await.unwrap();
    assert_eq!(stored.messages().len(), 5);
}

#[tokio::test]
async fn test_cancel_finalizes_with_delivered_text() {
    let h = harness(ScriptedCompletion::stalling_after(&["a", "b", "c"]));
    let cancel = CancellationToken::new();

    let (mut rx, task) = h
        .pipeline
        .stream_turn(TurnRequest::chat("s-3", "u1", "hello"), cancel.clone());

    for expected in ["a", "b", "c"] {
        assert_eq!(rx.recv().await, Some(StreamEvent::Content(expected.to_string())));
    }
    cancel.cancel();

    let outcome = task.await.unwrap();
    assert_eq!(outcome.terminal, StreamTerminal::Cancelled);
    assert_eq!(outcome.full_response, "abc");
    // nothing after cancellation, not even a terminal frame
    assert_eq!(rx.recv().await, None);

    h.history.drain().await;
    assert_eq!(h.repository.save_count(), 1);
    let stored = h.history.fetch("s-3").await.unwrap();
    assert_eq!(stored.messages().last().unwrap().content, "abc");
}

#[tokio::test]
async fn test_dropped_receiver_counts_as_cancel() {
    let h = harness(ScriptedCompletion::stalling_after(&["x", "y"]));

    let (mut rx, task) = h
        .pipeline
        .stream_turn(TurnRequest::chat("s-4", "u1", "hello"), CancellationToken::new());
    assert_eq!(rx.recv().await, Some(StreamEvent::Content("x".to_string())));
    assert_eq!(rx.recv().await, Some(StreamEvent::Content("y".to_string())));
    drop(rx);

    let outcome = task.await.unwrap();
    assert_eq!(outcome.terminal, StreamTerminal::Cancelled);
    assert_eq!(outcome.full_response, "xy");

    h.history.drain().await;
    assert_eq!(h.repository.save_count(), 1);
}

#[tokio::test]
async fn test_retrieval_failure_emits_error_and_finalizes_once() {
    let h = harness(ScriptedCompletion::replying(&["never"]));

    let request = TurnRequest::chat("s-5", "u1", "hello").with_collection("missing", None);
    let (rx, task) = h.pipeline.stream_turn(request, CancellationToken::new());
    let events = collect(rx).await;
    let outcome = task.await.unwrap();

    assert_eq!(events.len(), 1);
    assert!(matches!(&events[0], StreamEvent::Error(m) if m.contains("missing")));
    assert!(matches!(outcome.terminal, StreamTerminal::Errored { code: 404, .. }));
    assert!(h.completion.requests().is_empty());

    h.history.drain().await;
    assert_eq!(h.repository.save_count(), 1);
    let stored = h.history.fetch("s-5").await.unwrap();
    let roles: Vec<Role> = stored.messages().iter().map(|m| m.role).collect();
    assert_eq!(roles, vec![Role::System, Role::User]);
}

#[tokio::test]
async fn test_completion_refusal_is_upstream_failure() {
    let h = harness(ScriptedCompletion::refusing("model not loaded"));

    let (rx, task) = h
        .pipeline
        .stream_turn(TurnRequest::chat("s-6", "u1", "hello"), CancellationToken::new());
    let events = collect(rx).await;
    let outcome = task.await.unwrap();

    assert_eq!(events.len(), 1);
    assert!(matches!(&events[0], StreamEvent::Error(m) if m.contains("model not loaded")));
    assert!(matches!(outcome.terminal, StreamTerminal::Errored { code: 502, .. }));

    h.history.drain().await;
    assert_eq!(h.repository.save_count(), 1);
}

#[tokio::test]
async fn test_invalid_request_is_rejected_without_saving() {
    let h = harness(ScriptedCompletion::replying(&["never"]));

    let (rx, task) = h
        .pipeline
        .stream_turn(TurnRequest::chat("bad id!", "u1", "hello"), CancellationToken::new());
    let events = collect(rx).await;
    let outcome = task.await.unwrap();

    assert_eq!(events.len(), 1);
    assert!(events[0].is_terminal());
    assert!(matches!(outcome.terminal, StreamTerminal::Errored { code: 400, .. }));

    h.history.drain().await;
    assert_eq!(h.repository.save_count(), 0);
    assert!(h.repository.list().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_summary_turn_reads_whole_document() {
    let h = harness(ScriptedCompletion::replying(&["Summary: memory safety."]));
    seed_docs(&h.indexer).await;

    let request = TurnRequest::summary("s-7", "u1").with_collection("docs", Some("7"));
    let (rx, task) = h.pipeline.stream_turn(request, CancellationToken::new());
    collect(rx).await;
    assert_eq!(task.await.unwrap().terminal, StreamTerminal::Completed);

    let requests = h.completion.requests();
    assert_eq!(requests[0].messages.len(), 1);
    let prompt = &requests[0].messages[0].content;
    assert!(prompt.contains("summarization"));
    // every passage of the scoped document, in point id order, nothing else
    let rust = prompt.find("Rust ownership rules keep memory safe").unwrap();
    let python = prompt.find("Python generators yield values lazily").unwrap();
    assert!(rust < python);
    assert!(!prompt.contains("another document"));

    h.history.drain().await;
    let stored = h.history.fetch("s-7").await.unwrap();
    let roles: Vec<Role> = stored.messages().iter().map(|m| m.role).collect();
    assert_eq!(roles, vec![Role::System, Role::Assistant]);
}

#[tokio::test]
async fn test_summary_of_missing_collection_is_not_found() {
    let h = harness(ScriptedCompletion::replying(&["never"]));

    let request = TurnRequest::summary("s-9", "u1").with_collection("missing", Some("7"));
    let (rx, task) = h.pipeline.stream_turn(request, CancellationToken::new());
    let events = collect(rx).await;

    assert_eq!(events.len(), 1);
    assert!(matches!(task.await.unwrap().terminal, StreamTerminal::Errored { code: 404, .. }));
    assert!(h.completion.requests().is_empty());
}

#[tokio::test]
async fn test_article_turn_is_stateless() {
    let h = harness(ScriptedCompletion::replying(&["# Tides\n", "The moon pulls."]));

    let (rx, task) = h
        .pipeline
        .stream_turn(TurnRequest::article("u1", "Write about tides"), CancellationToken::new());
    let events = collect(rx).await;
    let outcome = task.await.unwrap();

    assert_eq!(outcome.terminal, StreamTerminal::Completed);
    assert_eq!(outcome.full_response, "# Tides\nThe moon pulls.");
    assert_eq!(events.last(), Some(&StreamEvent::End));

    let requests = h.completion.requests();
    assert_eq!(requests.len(), 1);
    let messages = &requests[0].messages;
    assert_eq!(messages.len(), 2);
    assert_eq!(messages[0].role, Role::System);
    assert!(messages[0].content.contains("article writer"));
    assert_eq!(messages[1].role, Role::User);
    assert_eq!(messages[1].content, "Write about tides");
    assert_eq!(requests[0].max_tokens, 1024);

    h.history.drain().await;
    assert_eq!(h.repository.save_count(), 0);
    assert!(h.repository.list().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_empty_article_prompt_is_rejected() {
    let h = harness(ScriptedCompletion::replying(&["never"]));

    let answer = h.pipeline.answer_turn(TurnRequest::article("u1", " ")).await;
    assert!(!answer.success);
    assert_eq!(answer.code, 400);
    assert!(h.completion.requests().is_empty());
}

#[tokio::test]
async fn test_answer_turn_collects_response() {
    let h = harness(ScriptedCompletion::replying(&["Hel", "lo"]));

    let answer = h.pipeline.answer_turn(TurnRequest::chat("s-8", "u1", "hi")).await;
    assert!(answer.success);
    assert_eq!(answer.data.unwrap().response, "Hello");

    let failed = h
        .pipeline
        .answer_turn(TurnRequest::chat("s-8", "u1", "hi").with_collection("missing", None))
        .await;
    assert!(!failed.success);
    assert_eq!(failed.code, 404);
}
