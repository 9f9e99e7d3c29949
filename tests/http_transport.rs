use bidi_agent_client::error::TransportStatus;
use bidi_agent_client::transport::{HttpSessionStream, TransportEvent, TransportListeners};
use serde_json::json;
use std::time::Duration;
use tokio::sync::mpsc;
use wiremock::matchers::{body_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const APP: &str = "projects/p/locations/us/apps/a";
const SESSION_PATH: &str = "/projects/p/locations/us/apps/a/sessions/sid:runSession";

fn stream(server: &MockServer) -> (HttpSessionStream, mpsc::UnboundedReceiver<TransportEvent>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let stream = HttpSessionStream::new(
        Some(&server.uri()),
        "unused.example.com",
        APP,
        "sid",
        Some(TransportListeners::channel_provider(tx)),
    )
    .unwrap();
    (stream, rx)
}

async fn next(rx: &mut mpsc::UnboundedReceiver<TransportEvent>) -> TransportEvent {
    tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("timed out waiting for transport event")
        .expect("listener channel closed")
}

#[tokio::test]
async fn reply_is_delivered_before_message_sent() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(SESSION_PATH))
        .and(header("authorization", "Bearer tok"))
        .and(body_json(json!({"inputs": [{"text": "hi"}]})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"outputs": [{"text": "hello"}]})))
        .expect(1)
        .mount(&server)
        .await;

    let (mut stream, mut rx) = stream(&server);
    stream.connect(Some("tok"));
    assert_eq!(next(&mut rx).await, TransportEvent::Open);
    assert!(stream.is_connected());

    stream.send(json!({"inputs": [{"text": "hi"}]}));
    assert_eq!(
        next(&mut rx).await,
        TransportEvent::Message(json!({"outputs": [{"text": "hello"}]}))
    );
    assert_eq!(
        next(&mut rx).await,
        TransportEvent::MessageSent(json!({"inputs": [{"text": "hi"}]}))
    );
}

#[tokio::test]
async fn unauthorized_reply_is_auth_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(SESSION_PATH))
        .respond_with(ResponseTemplate::new(401).set_body_string("denied"))
        .mount(&server)
        .await;

    let (mut stream, mut rx) = stream(&server);
    stream.connect(Some("expired"));
    assert_eq!(next(&mut rx).await, TransportEvent::Open);

    stream.send(json!({"inputs": []}));
    let TransportEvent::Error(error) = next(&mut rx).await else {
        panic!("expected an error event");
    };
    assert_eq!(error.status, TransportStatus::AuthError);
    assert!(error.message.contains("401"), "{}", error.message);
}

#[tokio::test]
async fn server_failure_is_send_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
        .mount(&server)
        .await;

    let (mut stream, mut rx) = stream(&server);
    stream.connect(Some("tok"));
    assert_eq!(next(&mut rx).await, TransportEvent::Open);

    stream.send(json!({"inputs": []}));
    let TransportEvent::Error(error) = next(&mut rx).await else {
        panic!("expected an error event");
    };
    assert_eq!(error.status, TransportStatus::SendError);
    assert!(error.message.contains("boom"), "{}", error.message);
}

#[tokio::test]
async fn send_after_disconnect_is_rejected() {
    let server = MockServer::start().await;
    let (mut stream, mut rx) = stream(&server);
    stream.connect(Some("tok"));
    assert_eq!(next(&mut rx).await, TransportEvent::Open);
    stream.disconnect();
    assert!(!stream.is_connected());

    stream.send(json!({"inputs": []}));
    let TransportEvent::Error(error) = next(&mut rx).await else {
        panic!("expected an error event");
    };
    assert_eq!(error.status, TransportStatus::NotConnected);
    assert!(server.received_requests().await.unwrap_or_default().is_empty());
}
