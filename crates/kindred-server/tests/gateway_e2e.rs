use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde_json::{Value, json};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use uuid::Uuid;

use kindred_api::authority::JwtAuthority;
use kindred_db::Database;
use kindred_gateway::PresenceRegistry;
use kindred_server::build_app;
use kindred_server::config::Config;

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

const SECRET: &str = "e2e-secret";

struct Server {
    addr: SocketAddr,
    presence: PresenceRegistry,
    db: Arc<Database>,
    jwt: JwtAuthority,
}

impl Server {
    async fn start() -> Self {
        let config = Config::from_lookup(|key| match key {
            "KINDRED_JWT_SECRET" => Some(SECRET.to_string()),
            _ => None,
        })
        .unwrap();
        let db = Arc::new(Database::open_in_memory().unwrap());
        let (app, presence) = build_app(&config, db.clone());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self {
            addr,
            presence,
            db,
            jwt: JwtAuthority::new(SECRET, 1),
        }
    }

    fn user(&self, username: &str) -> (Uuid, String) {
        let id = Uuid::new_v4();
        self.db.create_user(&id.to_string(), username, "unused").unwrap();
        (id, self.jwt.issue(id, username).unwrap())
    }

    async fn connect(&self, user_id: Uuid, token: &str) -> Socket {
        let url = format!("ws://{}/ws?token={}&userId={}", self.addr, token, user_id);
        let (socket, _) = connect_async(url).await.unwrap();
        socket
    }

    async fn wait_online(&self, user_id: Uuid, conn_count: usize) {
        for _ in 0..100 {
            if self.presence.is_online(user_id) && self.presence.session_count() == conn_count {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("{user_id} never came online");
    }
}

async fn send(socket: &mut Socket, frame: Value) {
    socket.send(Message::Text(frame.to_string().into())).await.unwrap();
}

async fn next_json(socket: &mut Socket) -> Value {
    loop {
        let msg = tokio::time::timeout(Duration::from_secs(5), socket.next())
            .await
            .expect("timed out waiting for a frame")
            .expect("socket closed")
            .unwrap();
        if let Message::Text(text) = msg {
            return serde_json::from_str(text.as_str()).unwrap();
        }
    }
}

#[tokio::test]
async fn bad_token_is_refused_before_upgrade() {
    let server = Server::start().await;
    let (alice, _) = server.user("alice");

    let url = format!("ws://{}/ws?token=forged&userId={}", server.addr, alice);
    assert!(connect_async(url).await.is_err());

    let url = format!("ws://{}/ws", server.addr);
    assert!(connect_async(url).await.is_err());

    assert!(!server.presence.is_online(alice));
    assert_eq!(server.presence.session_count(), 0);
}

#[tokio::test]
async fn claimed_identity_must_match_token() {
    let server = Server::start().await;
    let (_, alice_token) = server.user("alice");
    let (bob, _) = server.user("bob");

    let url = format!("ws://{}/ws?token={}&userId={}", server.addr, alice_token, bob);
    assert!(connect_async(url).await.is_err());
    assert_eq!(server.presence.session_count(), 0);
}

#[tokio::test]
async fn chat_heartbeat_and_presence_over_the_wire() {
    let server = Server::start().await;
    let (alice, alice_token) = server.user("alice");
    let (bob, bob_token) = server.user("bob");

    let mut alice_ws = server.connect(alice, &alice_token).await;
    server.wait_online(alice, 1).await;
    let mut bob_ws = server.connect(bob, &bob_token).await;
    server.wait_online(bob, 2).await;

    send(&mut alice_ws, json!({ "type": "HEARTBEAT" })).await;
    assert_eq!(next_json(&mut alice_ws).await["type"], "PONG");

    // Garbage is ignored and the connection stays usable.
    alice_ws
        .send(Message::Text("{not json".to_string().into()))
        .await
        .unwrap();

    send(
        &mut alice_ws,
        json!({ "type": "PRESENCE_QUERY", "userIds": [bob, Uuid::new_v4()] }),
    )
    .await;
    let response = next_json(&mut alice_ws).await;
    assert_eq!(response["type"], "PRESENCE_RESPONSE");
    assert_eq!(response["statusMap"][bob.to_string()], true);

    send(
        &mut alice_ws,
        json!({
            "type": "CHAT",
            "senderId": alice,
            "receiverId": bob,
            "content": "hello over the wire",
            "contentType": "TEXT",
        }),
    )
    .await;

    let pushed = next_json(&mut bob_ws).await;
    assert_eq!(pushed["type"], "CHAT");
    assert_eq!(pushed["senderId"], alice.to_string());
    assert_eq!(pushed["content"], "hello over the wire");
    assert!(pushed["timestamp"].is_i64());

    let echo = next_json(&mut alice_ws).await;
    assert_eq!(echo["type"], "CHAT");
    assert_eq!(echo["messageId"], pushed["messageId"]);
}

#[tokio::test]
async fn reconnect_supersedes_and_disconnect_cleans_up() {
    let server = Server::start().await;
    let (bob, bob_token) = server.user("bob");

    let mut first = server.connect(bob, &bob_token).await;
    server.wait_online(bob, 1).await;
    let first_conn = server.presence.session(bob).unwrap().conn_id();

    let mut second = server.connect(bob, &bob_token).await;
    for _ in 0..100 {
        if server.presence.session(bob).map(|s| s.conn_id()) != Some(first_conn) {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    let closed = next_json(&mut first).await;
    assert_eq!(closed["type"], "SESSION_CLOSED");
    assert_eq!(closed["reason"], "session superseded");
    assert_eq!(server.presence.session_count(), 1);

    send(&mut second, json!({ "type": "HEARTBEAT" })).await;
    assert_eq!(next_json(&mut second).await["type"], "PONG");

    second.close(None).await.unwrap();
    for _ in 0..100 {
        if !server.presence.is_online(bob) {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("presence entry outlived the connection");
}
