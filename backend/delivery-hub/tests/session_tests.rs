/// Websocket sessions driven end to end through a real server and client
use std::net::{SocketAddr, TcpListener};
use std::sync::Arc;
use std::time::Duration;

use actix_web::{dev::ServerHandle, web, web::Bytes, App, HttpServer};
use awc::{ws, Client};
use delivery_hub::config::DEFAULT_IDENTITY_HEADER;
use delivery_hub::storage::InMemoryStore;
use delivery_hub::websocket::Connection;
use delivery_hub::{configure_routes, AppState, Config, ConnectionRegistry};
use futures::{SinkExt, Stream, StreamExt};
use serde_json::{json, Value};

async fn start_server(state: AppState) -> std::io::Result<(SocketAddr, ServerHandle)> {
    let listener = TcpListener::bind("127.0.0.1:0")?;
    let addr = listener.local_addr()?;

    let server = HttpServer::new(move || {
        App::new()
            .app_data(web::Data::new(state.clone()))
            .configure(configure_routes)
    })
    .workers(1)
    .listen(listener)?
    .run();

    let handle = server.handle();
    actix_rt::spawn(server);
    Ok((addr, handle))
}

fn state() -> (AppState, Arc<InMemoryStore>) {
    let store = Arc::new(InMemoryStore::new());
    (AppState::new(Config::test_defaults(), store.clone()), store)
}

async fn wait_for(registry: &ConnectionRegistry, identity: &str, present: bool) {
    for _ in 0..200 {
        if registry.contains(identity).await == present {
            return;
        }
        actix_rt::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("{identity} registered = {} never reached", present);
}

async fn next_frame<S>(conn: &mut S) -> ws::Frame
where
    S: Stream<Item = Result<ws::Frame, awc::error::WsProtocolError>> + Unpin,
{
    actix_rt::time::timeout(Duration::from_secs(2), conn.next())
        .await
        .expect("timed out waiting for a frame")
        .expect("connection ended")
        .expect("protocol error")
}

async fn next_json<S>(conn: &mut S) -> Value
where
    S: Stream<Item = Result<ws::Frame, awc::error::WsProtocolError>> + Unpin,
{
    match next_frame(conn).await {
        ws::Frame::Text(bytes) => serde_json::from_slice(&bytes).unwrap(),
        other => panic!("unexpected frame: {other:?}"),
    }
}

fn message_to(target: &str, content: &str) -> ws::Message {
    ws::Message::Text(
        json!({
            "description": "message",
            "message": content,
            "chat_id": 1,
            "target_username": target
        })
        .to_string()
        .into(),
    )
}

#[actix_rt::test]
async fn test_session_registers_replies_in_order_and_unregisters() {
    let (state, store) = state();
    let (addr, handle) = start_server(state.clone()).await.expect("start server");

    let (_resp, mut conn) = Client::new()
        .ws(format!("http://{addr}/ws"))
        .header(DEFAULT_IDENTITY_HEADER, "alice")
        .connect()
        .await
        .expect("connect websocket client");
    wait_for(&state.registry, "alice", true).await;

    // Sent back to back; replies must come back in the same order.
    conn.send(message_to("bob", "first")).await.unwrap();
    conn.send(message_to("bob", "second")).await.unwrap();
    conn.send(ws::Message::Text(r#"{"description":"typing"}"#.into()))
        .await
        .unwrap();
    conn.send(ws::Message::Binary(Bytes::from_static(&[1, 2, 3])))
        .await
        .unwrap();

    let replies = vec![
        next_json(&mut conn).await,
        next_json(&mut conn).await,
        next_json(&mut conn).await,
        next_json(&mut conn).await,
    ];
    assert_eq!(replies[0]["kind"], "delivery_status");
    assert_eq!(replies[0]["status"], "stored_offline");
    assert_eq!(replies[0]["message_id"], 1);
    assert_eq!(replies[1]["status"], "stored_offline");
    assert_eq!(replies[1]["message_id"], 2);
    assert_eq!(replies[2]["kind"], "error");
    assert_eq!(replies[2]["code"], "unknown_message_type");
    assert_eq!(replies[3]["kind"], "error");
    assert_eq!(replies[3]["code"], "bad_request");

    let stored = store.messages().await;
    assert_eq!(stored.len(), 2);
    assert!(stored.iter().all(|m| m.sender == "alice"));

    conn.send(ws::Message::Close(None)).await.unwrap();
    wait_for(&state.registry, "alice", false).await;
    assert!(state.registry.is_empty().await);

    handle.stop(true).await;
}

#[actix_rt::test]
async fn test_live_sessions_exchange_messages() {
    let (state, _) = state();
    let (addr, handle) = start_server(state.clone()).await.expect("start server");
    let client = Client::new();

    let (_resp, mut alice) = client
        .ws(format!("http://{addr}/ws"))
        .header(DEFAULT_IDENTITY_HEADER, "alice")
        .connect()
        .await
        .expect("connect alice");
    let (_resp, mut bob) = client
        .ws(format!("http://{addr}/ws"))
        .header(DEFAULT_IDENTITY_HEADER, "bob")
        .connect()
        .await
        .expect("connect bob");
    wait_for(&state.registry, "alice", true).await;
    wait_for(&state.registry, "bob", true).await;

    alice.send(message_to("bob", "hi bob")).await.unwrap();

    let pushed = next_json(&mut bob).await;
    assert_eq!(pushed["kind"], "message");
    assert_eq!(pushed["sender"], "alice");
    assert_eq!(pushed["content"], "hi bob");

    let status = next_json(&mut alice).await;
    assert_eq!(status["status"], "delivered");
    assert_eq!(status["target"], "bob");

    handle.stop(true).await;
}

#[actix_rt::test]
async fn test_new_session_evicts_older_one() {
    let (state, _) = state();
    let (addr, handle) = start_server(state.clone()).await.expect("start server");
    let client = Client::new();

    let (_resp, mut first) = client
        .ws(format!("http://{addr}/ws"))
        .header(DEFAULT_IDENTITY_HEADER, "alice")
        .connect()
        .await
        .expect("connect first");
    wait_for(&state.registry, "alice", true).await;
    let first_id = state.registry.find_by_identity("alice").await.unwrap().id();

    let (_resp, mut second) = client
        .ws(format!("http://{addr}/ws"))
        .header(DEFAULT_IDENTITY_HEADER, "alice")
        .connect()
        .await
        .expect("connect second");

    match next_frame(&mut first).await {
        ws::Frame::Close(reason) => {
            assert_eq!(reason.map(|r| r.code), Some(ws::CloseCode::Away));
        }
        other => panic!("expected close frame, got {other:?}"),
    }

    // The evicted session's unregister must not remove its replacement.
    actix_rt::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(state.registry.len().await, 1);
    let current = state.registry.find_by_identity("alice").await.unwrap();
    assert_ne!(current.id(), first_id);

    second.send(message_to("bob", "still here")).await.unwrap();
    assert_eq!(next_json(&mut second).await["status"], "stored_offline");

    handle.stop(true).await;
}
