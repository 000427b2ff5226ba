use super::*;
use crate::state::test_helpers;
use serde_json::json;

fn session() -> (Session, mpsc::Receiver<Frame>) {
    let (tx, rx) = mpsc::channel(8);
    (Session { client_id: Uuid::new_v4(), user_id: 1, tx, joined: BTreeSet::new() }, rx)
}

fn request_text(syscall: &str, data: serde_json::Value) -> (Frame, String) {
    let data: Data = serde_json::from_value(data).unwrap();
    let req = Frame::request(syscall, data);
    let text = serde_json::to_string(&req).unwrap();
    (req, text)
}

#[tokio::test]
async fn malformed_json_yields_gateway_error() {
    let state = test_helpers::test_app_state();
    let (mut session, _rx) = session();

    let frames = process_inbound_text(&state, &mut session, "{not json").await;
    assert_eq!(frames.len(), 1);
    assert_eq!(frames[0].syscall, "gateway:error");
    assert!(
        frames[0]
            .data
            .get(FRAME_MESSAGE)
            .and_then(|v| v.as_str())
            .is_some_and(|m| m.starts_with("invalid json"))
    );
}

#[tokio::test]
async fn unknown_syscall_is_an_error_reply() {
    let state = test_helpers::test_app_state();
    let (mut session, _rx) = session();
    let (req, text) = request_text("chat:leave", json!({}));

    let frames = process_inbound_text(&state, &mut session, &text).await;
    assert_eq!(frames[0].status, Status::Error);
    assert_eq!(frames[0].parent_id, Some(req.id));
    assert_eq!(
        frames[0].data.get(FRAME_MESSAGE).and_then(|v| v.as_str()),
        Some("unknown syscall: chat:leave")
    );
}

#[tokio::test]
async fn entering_no_chats_is_unknown_chat() {
    let state = test_helpers::test_app_state();
    let (mut session, _rx) = session();
    let (_, text) = request_text("chat:enter", json!({ "chatIds": [] }));

    let frames = process_inbound_text(&state, &mut session, &text).await;
    assert_eq!(frames[0].status, Status::Error);
    assert_eq!(frames[0].data.get(FRAME_CODE).and_then(|v| v.as_str()), Some("E_CHAT_NOT_FOUND"));
    assert_eq!(frames[0].data.get(FRAME_MESSAGE).and_then(|v| v.as_str()), Some("unknown chat id"));
    assert!(session.joined.is_empty());
    assert!(state.rooms.read().await.is_empty());
}

#[tokio::test]
async fn bad_payloads_are_rejected_before_any_query() {
    let state = test_helpers::test_app_state();
    let (mut session, _rx) = session();

    for (syscall, data) in [
        ("chat:send", json!({ "chatId": "seven" })),
        ("chat:create", json!({})),
        ("chat:enter", json!({ "chatIds": "1" })),
    ] {
        let (_, text) = request_text(syscall, data);
        let frames = process_inbound_text(&state, &mut session, &text).await;
        assert_eq!(frames[0].status, Status::Error, "{syscall} should fail");
        assert!(
            frames[0]
                .data
                .get(FRAME_MESSAGE)
                .and_then(|v| v.as_str())
                .is_some_and(|m| m.starts_with("invalid payload")),
            "{syscall} should report the payload"
        );
    }
}

#[tokio::test]
async fn creating_a_chat_without_users_fails_cleanly() {
    let state = test_helpers::test_app_state();
    let (mut session, _rx) = session();
    let (_, text) = request_text("chat:create", json!({ "userIds": [] }));

    let frames = process_inbound_text(&state, &mut session, &text).await;
    assert_eq!(frames[0].data.get(FRAME_CODE).and_then(|v| v.as_str()), Some("E_CHAT_NO_USERS"));
}

// =============================================================================
// LIVE DB
// =============================================================================

#[cfg(feature = "live-db-tests")]
mod live {
    use super::*;
    use crate::services::auth::{JwtKeys, sign_token};
    use crate::state::test_helpers::{TEST_JWT_SECRET, integration_pool, seed_user};
    use futures::{SinkExt, StreamExt};
    use tokio::time::{Duration, timeout};
    use tokio_tungstenite::tungstenite::Message as WsMessage;
    use tokio_tungstenite::tungstenite::client::IntoClientRequest;

    type Client = tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

    async fn connect(addr: std::net::SocketAddr, token: &str) -> Client {
        let mut request = format!("ws://{addr}/chats/ws").into_client_request().unwrap();
        request
            .headers_mut()
            .insert("authorization", format!("Bearer {token}").parse().unwrap());
        let (client, _) = tokio_tungstenite::connect_async(request).await.unwrap();
        client
    }

    async fn next_frame(client: &mut Client) -> Frame {
        loop {
            let msg = timeout(Duration::from_secs(2), client.next())
                .await
                .expect("frame receive timed out")
                .expect("socket closed")
                .unwrap();
            if let WsMessage::Text(text) = msg {
                return serde_json::from_str(&text).unwrap();
            }
        }
    }

    async fn call(client: &mut Client, syscall: &str, data: serde_json::Value) -> Frame {
        let (_, text) = request_text(syscall, data);
        client.send(WsMessage::Text(text.into())).await.unwrap();
        next_frame(client).await
    }

    #[tokio::test]
    #[ignore = "requires TEST_DATABASE_URL/live Postgres"]
    async fn message_reaches_peers_but_not_sender() {
        let pool = integration_pool().await;
        let alice = seed_user(&pool, "alice", "USER").await;
        let bob = seed_user(&pool, "bob", "USER").await;

        let tmp = tempfile::tempdir().unwrap();
        let mut state = test_helpers::test_app_state_in(tmp.path());
        state.pool = pool.clone();

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(axum::serve(listener, crate::routes::app(state)).into_future());

        let keys = JwtKeys::new(TEST_JWT_SECRET, 300, 3600);
        let load = |id| {
            let pool = pool.clone();
            async move { crate::services::users::get_user_by_id(&pool, id).await.unwrap().unwrap() }
        };
        let mut a = connect(addr, &sign_token(&keys, &load(alice).await, false).unwrap()).await;
        let mut b = connect(addr, &sign_token(&keys, &load(bob).await, false).unwrap()).await;

        let welcome = next_frame(&mut a).await;
        assert_eq!(welcome.syscall, "session:connected");
        assert_eq!(welcome.data.get("user_id"), Some(&json!(alice)));
        next_frame(&mut b).await;

        let created = call(&mut a, "chat:create", json!({ "userIds": [alice, bob] })).await;
        assert_eq!(created.status, Status::Done);
        let chat_id = created.data["chat"]["id"].as_i64().unwrap();

        for client in [&mut a, &mut b] {
            let entered = call(client, "chat:enter", json!({ "chatIds": [chat_id] })).await;
            assert_eq!(entered.status, Status::Done);
        }

        let sent = call(&mut a, "chat:send", json!({ "chatId": chat_id, "message": "hi bob" })).await;
        assert_eq!(sent.status, Status::Done);
        assert_eq!(sent.data["message"]["message"], "hi bob");

        let received = next_frame(&mut b).await;
        assert_eq!(received.syscall, "chat:receive");
        assert_eq!(received.chat_id, Some(chat_id));
        assert_eq!(received.from, Some(alice));
        assert_eq!(received.data["message"]["author"]["nickname"], "alice");

        assert!(
            timeout(Duration::from_millis(150), a.next()).await.is_err(),
            "sender must not receive its own broadcast"
        );
    }
}
