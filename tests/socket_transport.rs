use bidi_agent_client::error::TransportStatus;
use bidi_agent_client::transport::{
    ConnectionState, TransportEvent, TransportListeners, WebChannelStream, WebSocketStream,
};
use futures_util::{SinkExt, StreamExt};
use serde_json::{Value, json};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::{mpsc, oneshot};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http;

const APP: &str = "projects/demo-project/locations/us/apps/a";

async fn next(rx: &mut mpsc::UnboundedReceiver<TransportEvent>) -> TransportEvent {
    tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("timed out waiting for transport event")
        .expect("listener channel closed")
}

async fn read_json<S>(ws: &mut S) -> Value
where
    S: futures_util::Stream<Item = Result<Message, tokio_tungstenite::tungstenite::Error>> + Unpin,
{
    loop {
        match ws.next().await {
            Some(Ok(Message::Text(text))) => return serde_json::from_str(text.as_str()).unwrap(),
            Some(Ok(_)) => continue,
            other => panic!("unexpected frame: {:?}", other),
        }
    }
}

async fn listener() -> (TcpListener, SocketAddr) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    (listener, addr)
}

#[tokio::test]
async fn webchannel_round_trip_with_auth_headers() {
    let (listener, addr) = listener().await;
    let (headers_tx, headers_rx) = oneshot::channel();
    let server = tokio::spawn(async move {
        let (tcp, _) = listener.accept().await.unwrap();
        let callback = move |req: &Request, resp: Response| -> Result<Response, ErrorResponse> {
            let get = |name: &str| {
                req.headers()
                    .get(name)
                    .and_then(|v| v.to_str().ok())
                    .map(str::to_string)
            };
            let _ = headers_tx.send((get("authorization"), get("x-goog-user-project")));
            Ok(resp)
        };
        let mut ws = tokio_tungstenite::accept_hdr_async(tcp, callback).await.unwrap();
        let received = read_json(&mut ws).await;
        ws.send(Message::Text(r#"[{"sessionOutput":{"text":"hi"}},{"ignored":true}]"#.into()))
            .await
            .unwrap();
        let _ = ws.close(None).await;
        received
    });

    let (tx, mut rx) = mpsc::unbounded_channel();
    let mut stream =
        WebChannelStream::new("unused", APP, Some(TransportListeners::channel_provider(tx)))
            .unwrap()
            .with_endpoint(format!("ws://{}/ws", addr));
    stream.connect(Some("secret")).await;

    assert_eq!(next(&mut rx).await, TransportEvent::Connecting);
    assert_eq!(next(&mut rx).await, TransportEvent::Open);
    assert!(stream.is_connected());
    assert_eq!(
        headers_rx.await.unwrap(),
        (Some("Bearer secret".to_string()), Some("demo-project".to_string()))
    );

    stream.send(json!({"config": {"session": "s"}}));
    assert_eq!(
        next(&mut rx).await,
        TransportEvent::MessageSent(json!({"config": {"session": "s"}}))
    );
    assert_eq!(
        next(&mut rx).await,
        TransportEvent::Message(json!({"sessionOutput": {"text": "hi"}}))
    );
    assert_eq!(next(&mut rx).await, TransportEvent::Close);
    assert!(!stream.is_connected());
    assert_eq!(server.await.unwrap(), json!({"config": {"session": "s"}}));
}

#[tokio::test]
async fn rejected_handshake_is_auth_error() {
    let (listener, addr) = listener().await;
    tokio::spawn(async move {
        let (tcp, _) = listener.accept().await.unwrap();
        let callback = |_req: &Request, _resp: Response| -> Result<Response, ErrorResponse> {
            Err(http::Response::builder()
                .status(401)
                .body(Some("denied".to_string()))
                .unwrap())
        };
        let _ = tokio_tungstenite::accept_hdr_async(tcp, callback).await;
    });

    let (tx, mut rx) = mpsc::unbounded_channel();
    let mut stream =
        WebChannelStream::new("unused", APP, Some(TransportListeners::channel_provider(tx)))
            .unwrap()
            .with_endpoint(format!("ws://{}/ws", addr));
    stream.connect(Some("expired")).await;

    assert_eq!(next(&mut rx).await, TransportEvent::Connecting);
    let TransportEvent::Error(error) = next(&mut rx).await else {
        panic!("expected an error event");
    };
    assert_eq!(error.status, TransportStatus::AuthError);
    assert_eq!(stream.state(), ConnectionState::Disconnected);
}

#[tokio::test]
async fn external_runtime_socket_reopens_without_second_channel() {
    let (listener, addr) = listener().await;
    let (accepted_tx, mut accepted_rx) = mpsc::unbounded_channel();
    tokio::spawn(async move {
        while let Ok((tcp, _)) = listener.accept().await {
            let _ = accepted_tx.send(());
            tokio::spawn(async move {
                let mut ws = tokio_tungstenite::accept_async(tcp).await.unwrap();
                while let Some(Ok(msg)) = ws.next().await {
                    if msg.is_text() {
                        ws.send(msg).await.unwrap();
                    }
                }
            });
        }
    });

    let (tx, mut rx) = mpsc::unbounded_channel();
    let uri = format!("ws://{}/run_live", addr);
    let mut stream =
        WebSocketStream::new(None, &uri, Some(TransportListeners::channel_provider(tx))).unwrap();
    stream.connect().await;
    assert_eq!(next(&mut rx).await, TransportEvent::Connecting);
    assert_eq!(next(&mut rx).await, TransportEvent::Open);

    stream.connect().await;
    assert_eq!(next(&mut rx).await, TransportEvent::Open);

    stream.send(json!({"realtimeInput": {"text": "echo"}}));
    assert_eq!(
        next(&mut rx).await,
        TransportEvent::MessageSent(json!({"realtimeInput": {"text": "echo"}}))
    );
    assert_eq!(
        next(&mut rx).await,
        TransportEvent::Message(json!({"realtimeInput": {"text": "echo"}}))
    );

    stream.disconnect();
    assert_eq!(next(&mut rx).await, TransportEvent::Close);
    assert!(accepted_rx.try_recv().is_ok());
    assert!(accepted_rx.try_recv().is_err());
}

#[tokio::test]
async fn send_before_connect_is_not_connected() {
    let (tx, mut rx) = mpsc::unbounded_channel();
    let stream = WebSocketStream::new(
        None,
        "ws://127.0.0.1:9/ws",
        Some(TransportListeners::channel_provider(tx)),
    )
    .unwrap();
    stream.send(json!({"x": 1}));
    let TransportEvent::Error(error) = next(&mut rx).await else {
        panic!("expected an error event");
    };
    assert_eq!(error.status, TransportStatus::NotConnected);
}
