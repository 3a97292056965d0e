//! Transports against a mock backend.

use chat_relay::config::ClientConfig;
use chat_relay::error::ChatError;
use chat_relay::providers::{Sampling, TurnRequest};
use chat_relay::reassembly::RawEvent;
use chat_relay::transport::{EventStream, Transport, TransportKind};
use futures_util::StreamExt;
use serde_json::{json, Value};
use std::time::{Duration, Instant};
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const CALL: &str = "/gradio_api/call/chat";
const STREAM: &str = "/gradio_api/queue/data";

fn config(server: &MockServer) -> ClientConfig {
    ClientConfig {
        base_url: server.uri(),
        poll_interval_ms: 20,
        poll_timeout_secs: 1,
        retry_delay_ms: 10,
        ..ClientConfig::default()
    }
}

fn request(text: &str) -> TurnRequest {
    TurnRequest {
        user_text: text.to_string(),
        state: Value::Null,
        history: Vec::new(),
        sampling: Sampling::default(),
        session_hash: "test-session".to_string(),
    }
}

async fn open(kind: TransportKind, server: &MockServer) -> Result<EventStream, ChatError> {
    Transport::new(kind, config(server))
        .expect("transport")
        .open(&request("hi"))
        .await
}

async fn drain(events: EventStream) -> Vec<RawEvent> {
    events.collect().await
}

async fn mount_job(server: &MockServer) {
    Mock::given(method("POST"))
        .and(path(CALL))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"event_id": "ev1"})))
        .mount(server)
        .await;
}

#[tokio::test]
async fn direct_json_body_is_one_snapshot() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(CALL))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({"data": ["Hi there", {"ctx": 1}]})),
        )
        .expect(1)
        .mount(&server)
        .await;

    let events = drain(open(TransportKind::Direct, &server).await.expect("open")).await;
    assert_eq!(events, vec![RawEvent::Data(vec![json!("Hi there"), json!({"ctx": 1})])]);
}

#[tokio::test]
async fn direct_ndjson_body_yields_tokens() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(CALL))
        .respond_with(ResponseTemplate::new(200).set_body_raw(
            "{\"delta\":\"Hel\"}\n{\"delta\":\"lo\"}\n\n{\"answer\":\"Hello!\"}",
            "application/x-ndjson",
        ))
        .mount(&server)
        .await;

    let events = drain(open(TransportKind::Direct, &server).await.expect("open")).await;
    assert_eq!(
        events,
        vec![
            RawEvent::Token("Hel".into()),
            RawEvent::Token("lo".into()),
            RawEvent::Data(vec![json!({"answer": "Hello!"})]),
        ]
    );
}

#[tokio::test]
async fn bearer_token_is_sent() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(CALL))
        .and(header("authorization", "Bearer sekrit"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"answer": "ok"})))
        .expect(1)
        .mount(&server)
        .await;

    let cfg = ClientConfig {
        bearer_token: Some("sekrit".into()),
        ..config(&server)
    };
    let events = Transport::new(TransportKind::Direct, cfg)
        .expect("transport")
        .open(&request("hi"))
        .await
        .expect("open");
    assert_eq!(drain(events).await.len(), 1);
}

#[tokio::test]
async fn unavailable_backend_is_retried_once() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(CALL))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(1)
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path(CALL))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"answer": "second try"})))
        .expect(1)
        .mount(&server)
        .await;

    let events = drain(open(TransportKind::Direct, &server).await.expect("open")).await;
    assert_eq!(events, vec![RawEvent::Data(vec![json!({"answer": "second try"})])]);
}

#[tokio::test]
async fn persistent_unavailability_surfaces_after_one_retry() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(CALL))
        .respond_with(ResponseTemplate::new(502))
        .expect(2)
        .mount(&server)
        .await;

    let err = open(TransportKind::Direct, &server).await.err().expect("error");
    assert!(matches!(err, ChatError::UpstreamUnavailable { status: 502, .. }));
}

#[tokio::test]
async fn client_errors_are_not_retried() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(CALL))
        .respond_with(ResponseTemplate::new(400).set_body_string("bad input"))
        .expect(1)
        .mount(&server)
        .await;

    let err = open(TransportKind::Direct, &server).await.err().expect("error");
    match err {
        ChatError::Http { status, body, .. } => {
            assert_eq!(status, 400);
            assert_eq!(body, "bad input");
        }
        other => panic!("expected http error, got {other:?}"),
    }
}

#[tokio::test]
async fn polling_waits_for_the_result() {
    let server = MockServer::start().await;
    mount_job(&server).await;
    Mock::given(method("GET"))
        .and(path(format!("{CALL}/ev1")))
        .respond_with(ResponseTemplate::new(404))
        .up_to_n_times(2)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path(format!("{CALL}/ev1")))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({"data": ["ready", {"s": 2}]})),
        )
        .mount(&server)
        .await;

    let events = drain(open(TransportKind::Poll, &server).await.expect("open")).await;
    assert_eq!(events, vec![RawEvent::Data(vec![json!("ready"), json!({"s": 2})])]);
}

#[tokio::test]
async fn polling_gives_up_at_the_deadline() {
    let server = MockServer::start().await;
    mount_job(&server).await;
    Mock::given(method("GET"))
        .and(path(format!("{CALL}/ev1")))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let events = drain(open(TransportKind::Poll, &server).await.expect("open")).await;
    assert_eq!(events.len(), 1);
    match &events[0] {
        RawEvent::Error(payload) => assert_eq!(payload["timeout_ms"], 1_000),
        other => panic!("expected timeout, got {other:?}"),
    }
}

#[tokio::test]
async fn polling_deadline_bounds_a_slow_check() {
    let server = MockServer::start().await;
    mount_job(&server).await;
    Mock::given(method("GET"))
        .and(path(format!("{CALL}/ev1")))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({"data": ["too late", null]}))
                .set_delay(Duration::from_secs(4)),
        )
        .mount(&server)
        .await;

    let started = Instant::now();
    let events = drain(open(TransportKind::Poll, &server).await.expect("open")).await;
    let elapsed = started.elapsed();
    assert!(elapsed < Duration::from_millis(2_500), "took {elapsed:?}");
    assert_eq!(events.len(), 1);
    assert!(matches!(&events[0], RawEvent::Error(p) if p["timeout_ms"] == 1_000));
}

#[tokio::test]
async fn event_stream_stops_at_completion() {
    let server = MockServer::start().await;
    mount_job(&server).await;
    let body = concat!(
        ": keep-alive\n\n",
        "event: generating\ndata: [\"He\", null]\n\n",
        "event: generating\r\ndata: [\"Hello\", null]\r\n\r\n",
        "event: complete\ndata: [\"Hello!\", {\"s\": 1}]\n\n",
        "event: generating\ndata: [\"after the end\", null]\n\n",
    );
    Mock::given(method("GET"))
        .and(path(format!("{STREAM}/ev1")))
        .and(header("accept", "text/event-stream"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(body, "text/event-stream"))
        .mount(&server)
        .await;

    let events = drain(open(TransportKind::Stream, &server).await.expect("open")).await;
    assert_eq!(
        events,
        vec![
            RawEvent::Data(vec![json!("He"), Value::Null]),
            RawEvent::Data(vec![json!("Hello"), Value::Null]),
            RawEvent::Data(vec![json!("Hello!"), json!({"s": 1})]),
        ]
    );
}

#[tokio::test]
async fn event_stream_closed_early_is_an_error() {
    let server = MockServer::start().await;
    mount_job(&server).await;
    Mock::given(method("GET"))
        .and(path(format!("{STREAM}/ev1")))
        .respond_with(ResponseTemplate::new(200).set_body_raw(
            "event: generating\ndata: [\"Hal\", null]\n\n",
            "text/event-stream",
        ))
        .mount(&server)
        .await;

    let events = drain(open(TransportKind::Stream, &server).await.expect("open")).await;
    assert_eq!(
        events,
        vec![
            RawEvent::Data(vec![json!("Hal"), Value::Null]),
            RawEvent::Error(json!({"error": "stream closed before completion"})),
        ]
    );
}

#[tokio::test]
async fn event_stream_final_frame_without_blank_line_completes() {
    let server = MockServer::start().await;
    mount_job(&server).await;
    Mock::given(method("GET"))
        .and(path(format!("{STREAM}/ev1")))
        .respond_with(ResponseTemplate::new(200).set_body_raw(
            "event: complete\ndata: [\"done\", null]",
            "text/event-stream",
        ))
        .mount(&server)
        .await;

    let events = drain(open(TransportKind::Stream, &server).await.expect("open")).await;
    assert_eq!(events, vec![RawEvent::Data(vec![json!("done"), Value::Null])]);
}

#[tokio::test]
async fn event_stream_error_frame_ends_stream() {
    let server = MockServer::start().await;
    mount_job(&server).await;
    let body = "data: {\"token\": \"par\"}\n\nevent: error\ndata: {\"error\": \"model crashed\"}\n\n";
    Mock::given(method("GET"))
        .and(path(format!("{STREAM}/ev1")))
        .respond_with(ResponseTemplate::new(200).set_body_raw(body, "text/event-stream"))
        .mount(&server)
        .await;

    let events = drain(open(TransportKind::Stream, &server).await.expect("open")).await;
    assert_eq!(
        events,
        vec![
            RawEvent::Token("par".into()),
            RawEvent::Error(json!({"error": "model crashed"})),
        ]
    );
}

#[tokio::test]
async fn stream_transport_fails_to_open_without_stream() {
    let server = MockServer::start().await;
    mount_job(&server).await;
    Mock::given(method("GET"))
        .and(path(format!("{STREAM}/ev1")))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let err = open(TransportKind::Stream, &server).await.err().expect("error");
    assert!(matches!(err, ChatError::Http { status: 404, .. }));
}

#[tokio::test]
async fn auto_falls_back_to_polling_the_same_job() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(CALL))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"event_id": "ev1"})))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path(format!("{STREAM}/ev1")))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path(format!("{CALL}/ev1")))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"data": ["polled", null]})))
        .mount(&server)
        .await;

    let events = drain(open(TransportKind::Auto, &server).await.expect("open")).await;
    assert_eq!(events, vec![RawEvent::Data(vec![json!("polled"), Value::Null])]);
}

#[tokio::test]
async fn auto_prefers_the_event_stream() {
    let server = MockServer::start().await;
    mount_job(&server).await;
    Mock::given(method("GET"))
        .and(path(format!("{STREAM}/ev1")))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_raw("event: complete\ndata: [\"streamed\", null]\n\n", "text/event-stream"),
        )
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path(format!("{CALL}/ev1")))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"data": ["polled", null]})))
        .expect(0)
        .mount(&server)
        .await;

    let events = drain(open(TransportKind::Auto, &server).await.expect("open")).await;
    assert_eq!(events, vec![RawEvent::Data(vec![json!("streamed"), Value::Null])]);
}

#[tokio::test]
async fn auto_does_not_resubmit_after_failed_submission() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(CALL))
        .respond_with(ResponseTemplate::new(503))
        .expect(2)
        .mount(&server)
        .await;

    let err = open(TransportKind::Auto, &server).await.err().expect("error");
    assert!(matches!(err, ChatError::UpstreamUnavailable { status: 503, .. }));
    let posts = server.received_requests().await.expect("recording on");
    assert_eq!(posts.len(), 2);
}

#[tokio::test]
async fn unreachable_backend_is_a_network_error() {
    let cfg = ClientConfig {
        base_url: "http://127.0.0.1:9".into(),
        retry_delay_ms: 10,
        ..ClientConfig::default()
    };
    let err = Transport::new(TransportKind::Direct, cfg)
        .expect("transport")
        .open(&request("hi"))
        .await
        .err()
        .expect("error");
    assert!(matches!(err, ChatError::Network { .. }));
}
