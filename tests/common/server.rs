//! Test server management.

use reqwest::Response;
use serde_json::Value;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use trustguard::config::Config;
use trustguard::db::{Database, User};
use trustguard::http::{AppState, serve};
use trustguard::moderation::DisabledRoleGranter;
use trustguard::SignedApiClient;

pub const API_KEY: &str = "itest-primary-key-7c41";
pub const FALLBACK_API_KEY: &str = "itest-rotated-key-9e02";
pub const SIGNING_KEY: &str = "itest-hmac-key-5b8d2f61a0c3";
const SALT: &str = "itest-salt-3a9f1c7e5b2d";

/// A test server instance. Shuts down when dropped.
pub struct TestServer {
    pub addr: SocketAddr,
    pub db: Database,
    shutdown: Option<oneshot::Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl TestServer {
    pub async fn spawn() -> Self {
        Self::spawn_with(|_| {}).await
    }

    /// Spawn with a config adjusted by `tweak`.
    pub async fn spawn_with(tweak: impl FnOnce(&mut Config)) -> Self {
        trustguard::metrics::init();

        let mut config = Config::default();
        config.database.path = ":memory:".to_string();
        config.server.trust_forwarded_for = false;
        config.security.salt = Some(SALT.to_string());
        config.security.signing_secret = Some(SIGNING_KEY.to_string());
        config.security.api_keys = vec![API_KEY.to_string(), FALLBACK_API_KEY.to_string()];
        config.rate_limit.max_requests = 1_000;
        tweak(&mut config);

        let state = AppState::build(&config, Arc::new(DisabledRoleGranter))
            .await
            .expect("build app state");
        let db = state.db.clone();

        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("local addr");
        let (tx, rx) = oneshot::channel::<()>();
        let handle = tokio::spawn(async move {
            let shutdown = async {
                let _ = rx.await;
            };
            if let Err(e) = serve(listener, Arc::new(state), shutdown).await {
                eprintln!("test server exited: {}", e);
            }
        });

        Self {
            addr,
            db,
            shutdown: Some(tx),
            handle: Some(handle),
        }
    }

    pub fn url(&self) -> String {
        format!("http://{}", self.addr)
    }

    /// Client signing with the primary API key.
    pub fn client(&self) -> SignedApiClient {
        self.client_with_key(API_KEY)
    }

    pub fn client_with_key(&self, key: &str) -> SignedApiClient {
        SignedApiClient::new(self.url(), key, SIGNING_KEY.as_bytes())
    }

    pub async fn seed_user(&self, external_id: &str) -> User {
        self.db
            .users()
            .create(external_id, None)
            .await
            .expect("seed user")
    }

    /// Register `external_id` and verify it from `ip` with `device`.
    pub async fn verified_user(&self, external_id: &str, ip: &str, device: &str) -> User {
        let user = self.seed_user(external_id).await;
        let response = self
            .client()
            .post_json(
                "/api/v1/verify",
                &serde_json::json!({
                    "UserID": external_id,
                    "IpAddress": ip,
                    "DeviceData": { "deviceId": device },
                }),
            )
            .await
            .expect("verify request");
        assert_eq!(response.status(), 200, "verify {} failed", external_id);
        user
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}

/// Status plus parsed JSON body.
pub async fn read_json(response: Response) -> (u16, Value) {
    let status = response.status().as_u16();
    let body = response.json::<Value>().await.unwrap_or(Value::Null);
    (status, body)
}
