#![allow(
    dead_code,
    clippy::unwrap_used,
    clippy::panic,
    clippy::missing_panics_doc,
    clippy::must_use_candidate,
    missing_debug_implementations,
    unreachable_pub
)]

use futures::{SinkExt, StreamExt};
use rendezvous_server::AppBuilder;
use rendezvous_server::config::Config;
use reqwest::StatusCode;
use serde_json::{Value, json};
use std::net::SocketAddr;
use std::sync::Once;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::watch;
use tokio_tungstenite::tungstenite::protocol::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use uuid::Uuid;

pub const PASSWORD: &str = "password123";
pub const ADMIN_USERNAME: &str = "root_admin";
pub const ADMIN_PASSWORD: &str = "admin-password";

static INIT: Once = Once::new();

pub fn setup_tracing() {
    INIT.call_once(|| {
        let filter = tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| "warn".into())
            .add_directive("rendezvous_server=debug".parse().unwrap())
            .add_directive("tower=warn".parse().unwrap())
            .add_directive("hyper=warn".parse().unwrap())
            .add_directive("reqwest=warn".parse().unwrap())
            .add_directive("tungstenite=warn".parse().unwrap());

        tracing_subscriber::fmt().with_env_filter(filter).with_test_writer().init();
    });
}

pub fn get_test_config() -> Config {
    let mut config = Config::default();
    config.server.host = "127.0.0.1".to_string();
    config.server.port = 0;
    config.auth.jwt_secret = "test_secret".to_string();
    config.auth.admin_username = Some(ADMIN_USERNAME.to_string());
    config.auth.admin_password = Some(ADMIN_PASSWORD.to_string());
    config.websocket.ack_flush_interval_ms = 20;
    config
}

pub fn generate_username(prefix: &str) -> String {
    format!("{prefix}_{}", &Uuid::new_v4().simple().to_string()[..8])
}

#[derive(Debug, Clone)]
pub struct TestUser {
    pub user_id: Uuid,
    pub token: String,
}

/// An appointment between two freshly registered users.
#[derive(Debug, Clone)]
pub struct Booking {
    pub appointment_id: Uuid,
    pub requester: TestUser,
    pub responder: TestUser,
}

pub struct TestApp {
    pub server_url: String,
    pub ws_url: String,
    pub client: reqwest::Client,
    shutdown_tx: watch::Sender<bool>,
}

impl Drop for TestApp {
    fn drop(&mut self) {
        let _ = self.shutdown_tx.send(true);
    }
}

impl TestApp {
    pub async fn spawn() -> Self {
        Self::spawn_with_config(get_test_config()).await
    }

    pub async fn spawn_with_config(config: Config) -> Self {
        setup_tracing();

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let app = AppBuilder::new(config.clone()).build().await.unwrap();
        let _workers = app.workers.spawn_all(shutdown_rx.clone());
        let router = rendezvous_server::api::app_router(config, app.services, shutdown_rx.clone());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let mut server_rx = shutdown_rx;
        tokio::spawn(async move {
            axum::serve(listener, router.into_make_service_with_connect_info::<SocketAddr>())
                .with_graceful_shutdown(async move {
                    let _ = server_rx.wait_for(|&s| s).await;
                })
                .await
                .unwrap();
        });

        Self {
            server_url: format!("http://{addr}"),
            ws_url: format!("ws://{addr}/v1/gateway"),
            client: reqwest::Client::new(),
            shutdown_tx,
        }
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}/v1{path}", self.server_url)
    }

    pub async fn post(&self, token: &str, path: &str, body: &Value) -> reqwest::Response {
        self.client.post(self.url(path)).bearer_auth(token).json(body).send().await.unwrap()
    }

    pub async fn put(&self, token: &str, path: &str, body: &Value) -> reqwest::Response {
        self.client.put(self.url(path)).bearer_auth(token).json(body).send().await.unwrap()
    }

    pub async fn patch(&self, token: &str, path: &str, body: &Value) -> reqwest::Response {
        self.client.patch(self.url(path)).bearer_auth(token).json(body).send().await.unwrap()
    }

    pub async fn get(&self, token: &str, path: &str) -> reqwest::Response {
        self.client.get(self.url(path)).bearer_auth(token).send().await.unwrap()
    }

    pub async fn delete(&self, token: &str, path: &str) -> reqwest::Response {
        self.client.delete(self.url(path)).bearer_auth(token).send().await.unwrap()
    }

    pub async fn register_user(&self, username: &str) -> TestUser {
        let resp = self
            .client
            .post(self.url("/users"))
            .json(&json!({"username": username, "password": PASSWORD}))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::CREATED, "registration failed for {username}");
        Self::session(resp).await
    }

    pub async fn login(&self, username: &str, password: &str) -> reqwest::Response {
        self.client
            .post(self.url("/sessions"))
            .json(&json!({"username": username, "password": password}))
            .send()
            .await
            .unwrap()
    }

    pub async fn login_admin(&self) -> TestUser {
        let resp = self.login(ADMIN_USERNAME, ADMIN_PASSWORD).await;
        assert_eq!(resp.status(), StatusCode::OK);
        Self::session(resp).await
    }

    async fn session(resp: reqwest::Response) -> TestUser {
        let body: Value = resp.json().await.unwrap();
        TestUser {
            user_id: body["userId"].as_str().unwrap().parse().unwrap(),
            token: body["token"].as_str().unwrap().to_string(),
        }
    }

    pub async fn create_listing(&self, owner: &TestUser) -> Uuid {
        let resp = self.post(&owner.token, "/listings", &json!({"title": "Two-bedroom flat"})).await;
        assert_eq!(resp.status(), StatusCode::CREATED);
        let body: Value = resp.json().await.unwrap();
        body["id"].as_str().unwrap().parse().unwrap()
    }

    pub async fn request_appointment(&self, requester: &TestUser, listing_id: Uuid) -> reqwest::Response {
        self.post(
            &requester.token,
            "/appointments",
            &json!({
                "listingId": listing_id,
                "date": "2031-05-04",
                "time": "14:30",
                "purpose": "Viewing",
                "message": "Is parking available?"
            }),
        )
        .await
    }

    /// Registers two users, lists something for the responder and books it for the requester.
    pub async fn book(&self) -> Booking {
        let requester = self.register_user(&generate_username("requester")).await;
        let responder = self.register_user(&generate_username("responder")).await;
        let listing_id = self.create_listing(&responder).await;

        let resp = self.request_appointment(&requester, listing_id).await;
        assert_eq!(resp.status(), StatusCode::CREATED);
        let body: Value = resp.json().await.unwrap();

        Booking { appointment_id: body["id"].as_str().unwrap().parse().unwrap(), requester, responder }
    }

    pub async fn transition(&self, user: &TestUser, appointment_id: Uuid, target: &str) -> reqwest::Response {
        self.post(&user.token, &format!("/appointments/{appointment_id}/transitions"), &json!({"target": target}))
            .await
    }

    pub async fn send_message(&self, user: &TestUser, appointment_id: Uuid, body: &str) -> Value {
        let resp = self.post(&user.token, &format!("/appointments/{appointment_id}/messages"), &json!({"body": body})).await;
        assert_eq!(resp.status(), StatusCode::CREATED);
        resp.json().await.unwrap()
    }

    pub async fn list_messages(&self, user: &TestUser, appointment_id: Uuid) -> Vec<Value> {
        let resp = self.get(&user.token, &format!("/appointments/{appointment_id}/messages")).await;
        assert_eq!(resp.status(), StatusCode::OK);
        resp.json().await.unwrap()
    }

    pub async fn connect_ws(&self, token: &str) -> TestWsClient {
        let (stream, _) = tokio_tungstenite::connect_async(format!("{}?token={token}", self.ws_url)).await.unwrap();
        let mut client = TestWsClient { stream };
        client.wait_for("ready", Duration::from_secs(5)).await.expect("no ready frame");
        client
    }
}

pub async fn error_code(resp: reqwest::Response) -> String {
    let body: Value = resp.json().await.unwrap();
    body["code"].as_str().unwrap_or_default().to_string()
}

pub struct TestWsClient {
    pub stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

impl TestWsClient {
    pub async fn send_frame(&mut self, frame: Value) {
        self.stream.send(Message::Text(frame.to_string().into())).await.unwrap();
    }

    pub async fn subscribe(&mut self, appointment_id: Uuid) {
        self.send_frame(json!({"type": "subscribe", "data": {"appointmentId": appointment_id}})).await;
        let frame = self.wait_for("subscribed", Duration::from_secs(5)).await.expect("subscription not confirmed");
        assert_eq!(frame["data"]["appointmentId"], json!(appointment_id));
    }

    /// Next JSON frame, skipping control frames. `None` on timeout or close.
    pub async fn recv_frame_timeout(&mut self, timeout: Duration) -> Option<Value> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let msg = tokio::time::timeout_at(deadline, self.stream.next()).await.ok()??;
            match msg.ok()? {
                Message::Text(text) => return serde_json::from_str(text.as_str()).ok(),
                Message::Close(_) => return None,
                _ => {}
            }
        }
    }

    /// Skips frames until one of type `kind` arrives.
    pub async fn wait_for(&mut self, kind: &str, timeout: Duration) -> Option<Value> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let remaining = deadline.checked_duration_since(tokio::time::Instant::now())?;
            let frame = self.recv_frame_timeout(remaining).await?;
            if frame["type"] == kind {
                return Some(frame);
            }
        }
    }

    /// Collects every frame that arrives within `window`.
    pub async fn drain(&mut self, window: Duration) -> Vec<Value> {
        let mut frames = Vec::new();
        let deadline = tokio::time::Instant::now() + window;
        while let Some(remaining) = deadline.checked_duration_since(tokio::time::Instant::now()) {
            match self.recv_frame_timeout(remaining).await {
                Some(frame) => frames.push(frame),
                None => break,
            }
        }
        frames
    }
}
