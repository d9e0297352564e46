//! End-to-end tests: a real server on a loopback port driven by
//! tokio-tungstenite clients.

use futures_util::{SinkExt, StreamExt};
use parley_core::{decode_outbound, issue_token, Envelope, OutboundFrame, UserId};
use parley_server::auth::JwtAuthenticator;
use parley_server::config::ServerConfig;
use parley_server::hub::HubHandle;
use parley_server::persist::{DiscardPersister, PersistError, Persister};
use parley_server::ParleyServer;
use std::future::Future;
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

const SECRET: &[u8] = b"relay-test-secret";
const WAIT: Duration = Duration::from_secs(5);

type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

#[derive(Default)]
struct RecordingPersister {
    saved: Mutex<Vec<Envelope>>,
}

impl RecordingPersister {
    fn saved(&self) -> Vec<Envelope> {
        self.saved.lock().unwrap().clone()
    }
}

impl Persister for RecordingPersister {
    fn create<'a>(
        &'a self,
        envelope: &'a Envelope,
    ) -> Pin<Box<dyn Future<Output = Result<(), PersistError>> + Send + 'a>> {
        Box::pin(async move {
            self.saved.lock().unwrap().push(envelope.clone());
            Ok(())
        })
    }
}

struct TestServer {
    addr: SocketAddr,
    hub: HubHandle,
    stop: Option<oneshot::Sender<()>>,
    task: JoinHandle<parley_core::ParleyResult<()>>,
}

impl TestServer {
    async fn start(config: ServerConfig, persister: Arc<dyn Persister>) -> Self {
        let server = ParleyServer::bind(config, Arc::new(JwtAuthenticator::new(SECRET)), persister)
            .await
            .unwrap();
        let addr = server.local_addr().unwrap();
        let hub = server.hub();
        let (stop, stopped) = oneshot::channel::<()>();
        let task = tokio::spawn(server.run(async {
            let _ = stopped.await;
        }));
        Self {
            addr,
            hub,
            stop: Some(stop),
            task,
        }
    }

    fn url(&self, token: &str) -> String {
        format!("ws://{}/ws?token={token}", self.addr)
    }

    async fn connect(&self, user: UserId) -> Client {
        let token = issue_token(SECRET, user, 3600).unwrap();
        let (ws, _) = connect_async(self.url(&token)).await.unwrap();
        self.wait_until(|hub| async move { hub.is_online(&user).await })
            .await;
        ws
    }

    async fn wait_until<F, Fut>(&self, check: F)
    where
        F: Fn(HubHandle) -> Fut,
        Fut: Future<Output = bool>,
    {
        tokio::time::timeout(WAIT, async {
            while !check(self.hub.clone()).await {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("condition not reached in time");
    }

    async fn stop(mut self) {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
        tokio::time::timeout(WAIT, self.task)
            .await
            .expect("server did not stop")
            .unwrap()
            .unwrap();
    }
}

fn test_config() -> ServerConfig {
    let mut config = ServerConfig::default();
    config.listen = "127.0.0.1:0".parse().unwrap();
    config.shutdown_grace = Duration::from_secs(2);
    config
}

fn send_frame(to: UserId, text: &str) -> Message {
    Message::Text(
        serde_json::json!({ "receiver_id": to, "payload": text })
            .to_string()
            .into(),
    )
}

/// Next application frame, skipping keepalive traffic.
async fn next_frame(ws: &mut Client) -> OutboundFrame {
    tokio::time::timeout(WAIT, async {
        loop {
            match ws.next().await {
                Some(Ok(Message::Text(text))) => return decode_outbound(text.as_bytes()).unwrap(),
                Some(Ok(Message::Ping(_))) | Some(Ok(Message::Pong(_))) => continue,
                other => panic!("expected a text frame, got {other:?}"),
            }
        }
    })
    .await
    .expect("no frame received")
}

/// Read until the server closes; returns the close code, if one was sent.
async fn close_code(ws: &mut Client) -> Option<CloseCode> {
    tokio::time::timeout(WAIT, async {
        loop {
            match ws.next().await {
                Some(Ok(Message::Close(frame))) => return frame.map(|f| f.code),
                Some(Ok(_)) => continue,
                Some(Err(_)) | None => return None,
            }
        }
    })
    .await
    .expect("connection not closed")
}

fn rejection_status(result: Result<(Client, impl Sized), WsError>) -> u16 {
    match result {
        Err(WsError::Http(response)) => response.status().as_u16(),
        Err(e) => panic!("expected an HTTP rejection, got {e}"),
        Ok(_) => panic!("upgrade unexpectedly succeeded"),
    }
}

#[tokio::test]
async fn handshake_without_valid_token_is_rejected() {
    let server = TestServer::start(test_config(), Arc::new(DiscardPersister)).await;

    let missing = connect_async(format!("ws://{}/ws", server.addr)).await;
    assert_eq!(rejection_status(missing), 401);

    let garbage = connect_async(server.url("not-a-jwt")).await;
    assert_eq!(rejection_status(garbage), 401);

    let wrong_secret = issue_token(b"some-other-secret", UserId::random(), 3600).unwrap();
    let forged = connect_async(server.url(&wrong_secret)).await;
    assert_eq!(rejection_status(forged), 401);

    let token = issue_token(SECRET, UserId::random(), 3600).unwrap();
    let wrong_path = connect_async(format!("ws://{}/other?token={token}", server.addr)).await;
    assert_eq!(rejection_status(wrong_path), 404);

    assert_eq!(server.hub.connected_count().await, 0);
    assert_eq!(server.hub.stats().registered, 0);
    server.stop().await;
}

#[tokio::test]
async fn message_round_trip_is_stamped_and_persisted_once() {
    let persister = Arc::new(RecordingPersister::default());
    let server = TestServer::start(test_config(), persister.clone()).await;
    let (u1, u2) = (UserId::random(), UserId::random());
    let mut a = server.connect(u1).await;
    let mut b = server.connect(u2).await;

    let spoofed_id = "00000000-0000-4000-8000-000000000001";
    let spoofed_at = "2000-01-01T00:00:00.000Z";
    let frame = serde_json::json!({
        "id": spoofed_id,
        "sender_id": UserId::random(),
        "receiver_id": u2,
        "payload": "hi",
        "created_at": spoofed_at,
    });
    a.send(Message::Text(frame.to_string().into())).await.unwrap();

    let got = next_frame(&mut b).await;
    assert_eq!(got.sender_id, u1);
    assert_eq!(got.receiver_id, u2);
    assert_eq!(got.payload.as_text(), Some("hi"));
    assert_ne!(got.id.to_string(), spoofed_id);
    assert_ne!(got.created_at, spoofed_at);
    assert!(is_millis_rfc3339(&got.created_at));

    let saved = persister.saved();
    assert_eq!(saved.len(), 1);
    assert_eq!(saved[0].id, got.id);
    assert_eq!(saved[0].sender_id, u1);
    assert_eq!(saved[0].receiver_id, u2);
    assert_eq!(saved[0].payload.as_bytes(), b"hi");

    server.stop().await;
}

/// RFC 3339 UTC with millisecond precision, e.g. `2024-05-01T12:00:00.123Z`.
fn is_millis_rfc3339(ts: &str) -> bool {
    ts.len() == 24 && ts.ends_with('Z') && ts.as_bytes()[10] == b'T' && ts.as_bytes()[19] == b'.'
}

#[tokio::test]
async fn second_connection_replaces_first() {
    let server = TestServer::start(test_config(), Arc::new(DiscardPersister)).await;
    let (user, peer) = (UserId::random(), UserId::random());

    let mut first = server.connect(user).await;
    let first_session = server.hub.registry().get(&user).await.unwrap().id();
    let token = issue_token(SECRET, user, 3600).unwrap();
    let (mut second, _) = connect_async(server.url(&token)).await.unwrap();

    assert_eq!(close_code(&mut first).await, Some(CloseCode::Policy));
    server
        .wait_until(|hub| async move {
            hub.registry()
                .get(&user)
                .await
                .is_some_and(|s| s.id() != first_session)
        })
        .await;
    assert_eq!(server.hub.connected_count().await, 1);

    let mut sender = server.connect(peer).await;
    sender.send(send_frame(user, "still here?")).await.unwrap();
    let got = next_frame(&mut second).await;
    assert_eq!(got.payload.as_text(), Some("still here?"));
    assert_eq!(server.hub.stats().replaced, 1);

    server.stop().await;
}

#[tokio::test]
async fn idle_session_is_closed_and_unregistered_once() {
    let mut config = test_config();
    config.session.idle_timeout = Duration::from_millis(300);
    config.session.ping_interval = Duration::from_secs(30);
    let server = TestServer::start(config, Arc::new(DiscardPersister)).await;
    let user = UserId::random();

    let mut ws = server.connect(user).await;
    server
        .wait_until(|hub| async move { !hub.is_online(&user).await })
        .await;

    assert_eq!(close_code(&mut ws).await, Some(CloseCode::Normal));
    server.hub.sync().await.unwrap();
    let stats = server.hub.stats();
    assert_eq!(stats.registered, 1);
    assert_eq!(stats.unregistered, 1);
    assert_eq!(stats.evicted, 0);

    server.stop().await;
}

#[tokio::test]
async fn keepalive_pings_keep_silent_reader_registered() {
    let mut config = test_config();
    config.session.idle_timeout = Duration::from_millis(400);
    config.session.ping_interval = Duration::from_millis(150);
    let server = TestServer::start(config, Arc::new(DiscardPersister)).await;
    let user = UserId::random();
    let mut ws = server.connect(user).await;

    // Reading lets tungstenite answer each ping with a pong.
    let mut pings = 0;
    let _ = tokio::time::timeout(Duration::from_millis(1500), async {
        while let Some(message) = ws.next().await {
            match message {
                Ok(Message::Ping(_)) => pings += 1,
                Ok(other) => panic!("unexpected frame {other:?}"),
                Err(e) => panic!("connection failed: {e}"),
            }
        }
    })
    .await;

    assert!(pings >= 1, "no keepalive ping seen");
    assert!(server.hub.is_online(&user).await);
    let stats = server.hub.stats();
    assert_eq!(stats.unregistered, 0);
    assert_eq!(stats.evicted, 0);

    server.stop().await;
}

#[tokio::test]
async fn malformed_frames_are_skipped() {
    let server = TestServer::start(test_config(), Arc::new(DiscardPersister)).await;
    let (u1, u2) = (UserId::random(), UserId::random());
    let mut a = server.connect(u1).await;
    let mut b = server.connect(u2).await;

    a.send(Message::Text("not json".to_string().into())).await.unwrap();
    a.send(Message::Text(r#"{"payload":"no receiver"}"#.to_string().into()))
        .await
        .unwrap();
    a.send(send_frame(u2, "after garbage")).await.unwrap();

    let got = next_frame(&mut b).await;
    assert_eq!(got.payload.as_text(), Some("after garbage"));
    assert!(server.hub.is_online(&u1).await);
    assert_eq!(server.hub.stats().routed, 1);

    server.stop().await;
}

#[tokio::test]
async fn routing_to_offline_user_is_a_no_op() {
    let persister = Arc::new(RecordingPersister::default());
    let server = TestServer::start(test_config(), persister.clone()).await;
    let user = UserId::random();
    let mut ws = server.connect(user).await;

    ws.send(send_frame(UserId::random(), "anyone?")).await.unwrap();
    server
        .wait_until(|hub| async move { hub.stats().dropped_offline == 1 })
        .await;

    assert!(server.hub.is_online(&user).await);
    assert_eq!(persister.saved().len(), 1);
    assert_eq!(server.hub.stats().delivered, 0);

    server.stop().await;
}

#[tokio::test]
async fn shutdown_closes_every_client() {
    let server = TestServer::start(test_config(), Arc::new(DiscardPersister)).await;
    let mut a = server.connect(UserId::random()).await;
    let mut b = server.connect(UserId::random()).await;
    let hub = server.hub.clone();

    server.stop().await;

    assert_eq!(close_code(&mut a).await, Some(CloseCode::Away));
    assert_eq!(close_code(&mut b).await, Some(CloseCode::Away));
    assert_eq!(hub.connected_count().await, 0);
}
