mod common;

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use common::{FakeConnector, WAIT, eventually, text_builder};
use oai_rt_voice::{AskOutcome, CommandPolicy, Error};
use serde_json::{Value, json};
use tokio::sync::mpsc;

fn text_collector() -> (
    impl Fn(String) -> std::future::Ready<oai_rt_voice::Result<()>> + Send + Sync + 'static,
    mpsc::UnboundedReceiver<String>,
) {
    let (tx, rx) = mpsc::unbounded_channel();
    let handler = move |text: String| {
        let _ = tx.send(text);
        std::future::ready(Ok(()))
    };
    (handler, rx)
}

async fn recv_text(rx: &mut mpsc::UnboundedReceiver<String>) -> String {
    tokio::time::timeout(WAIT, rx.recv())
        .await
        .expect("timed out waiting for text")
        .expect("handler dropped")
}

fn function_output_result(frame: &Value) -> String {
    assert_eq!(frame["type"], "conversation.item.create");
    assert_eq!(frame["item"]["type"], "function_call_output");
    let output: Value = serde_json::from_str(frame["item"]["output"].as_str().unwrap()).unwrap();
    output["result"].as_str().unwrap().to_string()
}

#[tokio::test]
async fn setup_is_the_first_frame_and_queued_sends_follow() {
    let connector = FakeConnector::new();
    let mut server = connector.expect_connection();
    let mut session = text_builder(&connector).instructions("Be brief.").voice("alloy").build();

    session.start().unwrap();
    session.send_text("early").await.unwrap();

    let setup = server.next_frame().await;
    assert_eq!(setup["type"], "session.update");
    assert_eq!(setup["session"]["voice"], "alloy");
    assert_eq!(setup["session"]["instructions"], "Be brief.");
    assert_eq!(setup["session"]["output_audio_format"], "pcm16");
    assert!(setup["session"].get("tools").is_none());
    assert!(setup["session"].get("tool_choice").is_none());

    let item = server.next_frame().await;
    assert_eq!(item["type"], "conversation.item.create");
    assert_eq!(item["item"]["role"], "user");
    assert_eq!(item["item"]["content"][0], json!({ "type": "input_text", "text": "early" }));
    let create = server.next_frame().await;
    assert_eq!(create, json!({ "type": "response.create", "response": { "modalities": ["text"] } }));

    let requests = connector.requests.lock().unwrap().clone();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].api_key, "sk-test");
    assert_eq!(requests[0].endpoint, "wss://api.openai.com/v1/realtime");

    session.stop().await;
}

#[tokio::test]
async fn ask_returns_the_answer() {
    let connector = FakeConnector::new();
    let mut server = connector.expect_connection();
    let mut session = text_builder(&connector).build();
    session.start().unwrap();

    let responder = tokio::spawn(async move {
        server.next_of_kind("session.update").await;
        let item = server.next_of_kind("conversation.item.create").await;
        assert_eq!(item["item"]["content"][0]["text"], "hello");
        server.next_of_kind("response.create").await;
        tokio::time::sleep(Duration::from_millis(200)).await;
        server.push(json!({ "type": "response.text.done", "response_id": "resp_1", "text": "hi" }));
        server
    });

    let outcome = session.ask("hello", Duration::from_secs(5)).await.unwrap();
    assert_eq!(outcome, AskOutcome::Answer("hi".to_string()));

    let _server = responder.await.unwrap();
    session.stop().await;
}

#[tokio::test]
async fn ask_times_out_on_a_silent_server() {
    let connector = FakeConnector::new();
    let _server = connector.expect_connection();
    let mut session = text_builder(&connector).build();
    session.start().unwrap();

    let started = tokio::time::Instant::now();
    let outcome = session.ask("hello", Duration::from_secs(1)).await.unwrap();
    let elapsed = started.elapsed();

    assert_eq!(outcome, AskOutcome::TimedOut);
    assert!(elapsed >= Duration::from_secs(1), "returned early: {elapsed:?}");
    assert!(elapsed < Duration::from_millis(1500), "returned late: {elapsed:?}");
    session.stop().await;
}

#[tokio::test]
async fn ask_takes_the_answer_and_then_the_handler_is_back() {
    let connector = FakeConnector::new();
    let mut server = connector.expect_connection();
    let (handler, mut texts) = text_collector();
    let mut session = text_builder(&connector).on_text(handler).build();
    session.start().unwrap();
    server.next_of_kind("session.update").await;

    let push = tokio::spawn(async move {
        server.next_of_kind("response.create").await;
        server.push(json!({ "type": "response.text.done", "text": "for the asker" }));
        server.push(json!({ "type": "response.done", "response": { "output": [] } }));
        server
    });
    let outcome = session.ask("question", WAIT).await.unwrap();
    assert_eq!(outcome.into_answer().as_deref(), Some("for the asker"));

    let server = push.await.unwrap();
    server.push(json!({ "type": "response.text.done", "text": "for the handler" }));
    assert_eq!(recv_text(&mut texts).await, "for the handler");
    assert!(texts.try_recv().is_err());
    session.stop().await;
}

#[tokio::test]
async fn ask_fails_when_the_connection_ends() {
    let connector = FakeConnector::new();
    let mut server = connector.expect_connection();
    let mut session = text_builder(&connector).build();
    session.start().unwrap();

    let hang_up = tokio::spawn(async move {
        server.next_of_kind("response.create").await;
        server.hang_up();
        server
    });
    let result = session.ask("anyone?", Duration::from_secs(5)).await;
    assert!(matches!(result, Err(Error::ConnectionClosed)), "{result:?}");

    let server = hang_up.await.unwrap();
    assert!(eventually(|| !session.is_running()).await);
    assert_eq!(server.close_calls(), 0);
    assert!(matches!(session.send_text("again").await, Err(Error::ConnectionClosed)));
}

#[tokio::test]
async fn final_text_is_delivered_once_per_turn() {
    let connector = FakeConnector::new();
    let mut server = connector.expect_connection();
    let (handler, mut texts) = text_collector();
    let mut session = text_builder(&connector).on_text(handler).build();
    session.start().unwrap();
    server.next_of_kind("session.update").await;

    server.push(json!({ "type": "response.text.done", "response_id": "resp_1", "item_id": "item_1", "text": "first" }));
    server.push(json!({
        "type": "response.content_part.done",
        "response_id": "resp_1",
        "item_id": "item_1",
        "part": { "type": "text", "text": "first" }
    }));
    server.push(json!({
        "type": "response.output_item.done",
        "response_id": "resp_1",
        "item": { "type": "message", "role": "assistant", "content": [{ "type": "text", "text": "first" }] }
    }));
    server.push(json!({
        "type": "response.done",
        "response": {
            "id": "resp_1",
            "status": "completed",
            "output": [{ "type": "message", "role": "assistant", "content": [{ "type": "text", "text": "first" }] }]
        }
    }));

    // A turn whose only carriers are output_item.done and response.done, without ids.
    server.push(json!({
        "type": "response.output_item.done",
        "item": { "type": "message", "content": [{ "type": "output_text", "text": "second" }] }
    }));
    server.push(json!({
        "type": "response.done",
        "response": { "output": [{ "type": "message", "text": "second" }] }
    }));

    // A turn reported only by response.done.
    server.push(json!({
        "type": "response.done",
        "response": { "id": "resp_3", "output": [{ "type": "message", "text": "third" }] }
    }));

    // Text done without an id, then the response.done that names it.
    server.push(json!({ "type": "response.text.done", "text": "fourth" }));
    server.push(json!({
        "type": "response.done",
        "response": { "id": "resp_4", "output": [{ "type": "message", "text": "fourth" }] }
    }));

    assert_eq!(recv_text(&mut texts).await, "first");
    assert_eq!(recv_text(&mut texts).await, "second");
    assert_eq!(recv_text(&mut texts).await, "third");
    assert_eq!(recv_text(&mut texts).await, "fourth");
    tokio::time::sleep(Duration::from_millis(150)).await;
    assert!(texts.try_recv().is_err());
    session.stop().await;
}

#[tokio::test]
async fn malformed_frames_are_dropped_and_the_loop_continues() {
    let connector = FakeConnector::new();
    let mut server = connector.expect_connection();
    let (handler, mut texts) = text_collector();
    let errors = Arc::new(AtomicUsize::new(0));
    let error_count = Arc::clone(&errors);
    let mut session = text_builder(&connector)
        .on_text(handler)
        .on_error(move |_| {
            error_count.fetch_add(1, Ordering::SeqCst);
        })
        .build();
    session.start().unwrap();
    server.next_of_kind("session.update").await;

    server.push_raw("{not json");
    server.push(json!({ "type": "response.content_part.done", "response_id": "resp_1" }));
    server.push(json!({ "type": "response.text.done", "text": "" }));
    server.push(json!({ "type": "rate_limits.updated", "rate_limits": [] }));
    server.push(json!({ "type": "response.text.done", "text": "still here" }));

    assert_eq!(recv_text(&mut texts).await, "still here");
    assert!(session.is_running());
    assert_eq!(errors.load(Ordering::SeqCst), 0);
    session.stop().await;
}

#[tokio::test]
async fn server_errors_reach_the_error_hook() {
    let connector = FakeConnector::new();
    let mut server = connector.expect_connection();
    let (tx, mut rx) = mpsc::unbounded_channel();
    let mut session = text_builder(&connector)
        .on_error(move |err| {
            let _ = tx.send(err.to_string());
        })
        .build();
    session.start().unwrap();
    server.next_of_kind("session.update").await;

    server.push(json!({
        "type": "error",
        "event_id": "evt_1",
        "error": { "type": "invalid_request_error", "code": "bad", "message": "Nope" }
    }));
    let reported = tokio::time::timeout(WAIT, rx.recv()).await.unwrap().unwrap();
    assert!(reported.contains("Nope"), "{reported}");
    assert!(session.is_running());
    session.stop().await;
}

#[cfg(unix)]
#[tokio::test]
async fn run_os_command_returns_output_and_requests_a_response() {
    let connector = FakeConnector::new();
    let mut server = connector.expect_connection();
    let mut session = text_builder(&connector).function_calling(true).device("test rig").build();
    session.start().unwrap();

    let setup = server.next_of_kind("session.update").await;
    let tool = &setup["session"]["tools"][0];
    assert_eq!(tool["type"], "function");
    assert_eq!(tool["name"], "run_os_command");
    assert!(tool["description"].as_str().unwrap().contains("test rig"));
    assert_eq!(tool["parameters"]["required"], json!(["command"]));
    assert_eq!(setup["session"]["tool_choice"], "auto");

    server.push(json!({
        "type": "response.done",
        "response": {
            "id": "resp_1",
            "output": [{
                "type": "function_call",
                "name": "run_os_command",
                "call_id": "call_1",
                "arguments": "{\"command\":\"echo ok\"}"
            }]
        }
    }));

    let output = server.next_frame().await;
    assert_eq!(output["item"]["call_id"], "call_1");
    assert!(function_output_result(&output).contains("ok"));
    let follow_up = server.next_frame().await;
    assert_eq!(follow_up, json!({ "type": "response.create" }));
    server.assert_silent(Duration::from_millis(200)).await;
    session.stop().await;
}

#[tokio::test]
async fn policy_rejections_are_reported_as_results() {
    let connector = FakeConnector::new();
    let mut server = connector.expect_connection();
    let mut session = text_builder(&connector)
        .function_calling(true)
        .command_policy(CommandPolicy::AllowList(vec!["echo".to_string()]))
        .build();
    session.start().unwrap();
    server.next_of_kind("session.update").await;

    server.push(json!({
        "type": "response.done",
        "response": { "output": [{
            "type": "function_call",
            "name": "run_os_command",
            "call_id": "call_9",
            "arguments": "{\"command\":\"rm -rf /\"}"
        }] }
    }));

    let output = server.next_frame().await;
    assert_eq!(function_output_result(&output), "command rejected by policy: rm");
    assert_eq!(server.next_frame().await["type"], "response.create");
    session.stop().await;
}

#[tokio::test]
async fn unusable_function_calls_are_skipped() {
    let connector = FakeConnector::new();
    let mut server = connector.expect_connection();
    let (handler, mut texts) = text_collector();
    let mut session = text_builder(&connector).function_calling(true).on_text(handler).build();
    session.start().unwrap();
    server.next_of_kind("session.update").await;

    server.push(json!({
        "type": "response.done",
        "response": { "output": [
            { "type": "function_call", "name": "run_os_command", "call_id": "c1", "arguments": "not json" },
            { "type": "function_call", "name": "run_os_command", "call_id": "c2", "arguments": "{\"cmd\":\"ls\"}" },
            { "type": "function_call", "name": "run_os_command", "call_id": "c4", "arguments": "{\"command\":\"  \"}" },
            { "type": "function_call", "name": "launch_rockets", "call_id": "c3", "arguments": "{}" },
            { "type": "message", "text": "done anyway" }
        ] }
    }));

    assert_eq!(recv_text(&mut texts).await, "done anyway");
    server.assert_silent(Duration::from_millis(150)).await;
    session.stop().await;
}

#[cfg(unix)]
#[tokio::test]
async fn stop_interrupts_a_running_command() {
    let connector = FakeConnector::new();
    let mut server = connector.expect_connection();
    let mut session = text_builder(&connector).function_calling(true).build();
    session.start().unwrap();
    server.next_of_kind("session.update").await;

    server.push(json!({
        "type": "response.done",
        "response": { "output": [{
            "type": "function_call",
            "name": "run_os_command",
            "call_id": "call_slow",
            "arguments": "{\"command\":\"sleep 600\"}"
        }] }
    }));
    tokio::time::sleep(Duration::from_millis(100)).await;

    tokio::time::timeout(WAIT, session.stop())
        .await
        .expect("stop waited for the command to finish");
    assert!(!session.is_running());
    assert!(server.drain().iter().all(|frame| frame["type"] != "conversation.item.create"));
}

#[tokio::test]
async fn function_calls_are_ignored_without_function_calling() {
    let connector = FakeConnector::new();
    let mut server = connector.expect_connection();
    let mut session = text_builder(&connector).build();
    session.start().unwrap();
    server.next_of_kind("session.update").await;

    server.push(json!({
        "type": "response.done",
        "response": { "output": [{
            "type": "function_call",
            "name": "run_os_command",
            "call_id": "call_1",
            "arguments": "{\"command\":\"echo ok\"}"
        }] }
    }));
    server.assert_silent(Duration::from_millis(200)).await;
    session.stop().await;
}

#[tokio::test]
async fn failed_handshake_reports_and_closes() {
    let connector = FakeConnector::new();
    let (tx, mut rx) = mpsc::unbounded_channel();
    let mut session = text_builder(&connector)
        .on_error(move |err| {
            let _ = tx.send(err.to_string());
        })
        .build();
    session.start().unwrap();

    let reported = tokio::time::timeout(WAIT, rx.recv()).await.unwrap().unwrap();
    assert!(reported.contains("no fake connection queued"), "{reported}");
    assert!(eventually(|| !session.is_running()).await);
    assert!(matches!(session.send_text("hello").await, Err(Error::ConnectionClosed)));
    assert!(matches!(session.ask("hello", WAIT).await, Err(Error::ConnectionClosed)));
}

#[tokio::test]
async fn lifecycle_rules() {
    let connector = FakeConnector::new();
    let mut first = connector.expect_connection();
    let mut second = connector.expect_connection();
    let mut session = text_builder(&connector).build();

    assert!(matches!(session.send_text("too soon").await, Err(Error::ConnectionClosed)));
    session.stop().await;

    session.start().unwrap();
    assert!(matches!(session.start(), Err(Error::AlreadyStarted)));
    first.next_of_kind("session.update").await;

    session.stop().await;
    assert!(!session.is_running());
    assert_eq!(first.close_calls(), 1);
    session.stop().await;

    session.start().unwrap();
    second.next_of_kind("session.update").await;
    session.send_text("round two").await.unwrap();
    assert_eq!(second.next_frame().await["item"]["content"][0]["text"], "round two");
    session.stop().await;
}

#[test]
fn start_requires_a_runtime() {
    let connector = FakeConnector::new();
    let mut session = text_builder(&connector).build();
    assert!(matches!(session.start(), Err(Error::NoRuntime(_))));
}

#[tokio::test]
async fn no_callbacks_after_stop() {
    let connector = FakeConnector::new();
    let mut server = connector.expect_connection();
    let (handler, mut texts) = text_collector();
    let mut session = text_builder(&connector).on_text(handler).build();
    session.start().unwrap();
    server.next_of_kind("session.update").await;

    session.stop().await;
    server.push(json!({ "type": "response.text.done", "text": "too late" }));
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(texts.try_recv().is_err());
}

#[tokio::test]
async fn timestamps_are_appended_when_enabled() {
    let connector = FakeConnector::new();
    let mut server = connector.expect_connection();
    let mut session = text_builder(&connector).annotate(true, false).build();
    session.start().unwrap();
    server.next_of_kind("session.update").await;

    session.send_text("what day is it").await.unwrap();
    let item = server.next_frame().await;
    let text = item["item"]["content"][0]["text"].as_str().unwrap().to_string();
    let suffix = text.strip_prefix("what day is it (Date: ").unwrap();
    assert!(suffix.ends_with(')'));
    assert!(!suffix.contains("Time:"));
    assert!(chrono::NaiveDate::parse_from_str(suffix.trim_end_matches(')'), "%Y-%m-%d").is_ok());
    session.stop().await;
}
