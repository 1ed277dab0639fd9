//! Request authentication, verification, and open routes end to end.

mod common;

use bytes::Bytes;
use common::{FALLBACK_API_KEY, TestServer, read_json};
use reqwest::Method;
use serde_json::json;

const VERIFY_PATH: &str = "/api/v1/verify";
const BAN_PATH: &str = "/api/v1/moderation/bans";

fn now() -> i64 {
    chrono::Utc::now().timestamp()
}

#[tokio::test]
async fn test_health_and_metrics_are_open() {
    let server = TestServer::spawn().await;

    let response = reqwest::get(format!("{}/health", server.url())).await.unwrap();
    let (status, body) = read_json(response).await;
    assert_eq!(status, 200);
    assert_eq!(body["status"], "ok");

    // One rejected call so the labelled counter has a sample.
    reqwest::Client::new()
        .post(format!("{}{}", server.url(), BAN_PATH))
        .send()
        .await
        .unwrap();

    let text = reqwest::get(format!("{}/metrics", server.url()))
        .await
        .unwrap()
        .text()
        .await
        .unwrap();
    assert!(text.contains("trustguard_auth_failures_total"), "{}", text);
}

#[tokio::test]
async fn test_unsigned_request_is_rejected_uniformly() {
    let server = TestServer::spawn().await;
    let response = reqwest::Client::new()
        .post(format!("{}{}", server.url(), BAN_PATH))
        .json(&json!({ "UserID": "A" }))
        .send()
        .await
        .unwrap();

    let (status, body) = read_json(response).await;
    assert_eq!(status, 401);
    assert_eq!(body["success"], false);
    assert_eq!(body["error"], "unauthorized");
    assert_eq!(body["code"], "stale_timestamp");
    assert!(body["requestId"].is_string());
}

#[tokio::test]
async fn test_stale_timestamp_is_rejected() {
    let server = TestServer::spawn().await;
    let client = server.client();
    let body = Bytes::from_static(br#"{"UserID":"A"}"#);

    let stale = client.sign_at(&body, now() - 301).unwrap();
    let (status, reply) = read_json(
        client
            .send_signed(Method::POST, BAN_PATH, body.clone(), &stale)
            .await
            .unwrap(),
    )
    .await;
    assert_eq!(status, 401);
    assert_eq!(reply["code"], "stale_timestamp");

    let future = client.sign_at(&body, now() + 301).unwrap();
    let (status, _) = read_json(
        client
            .send_signed(Method::POST, BAN_PATH, body, &future)
            .await
            .unwrap(),
    )
    .await;
    assert_eq!(status, 401);
}

#[tokio::test]
async fn test_tampered_body_is_rejected() {
    let server = TestServer::spawn().await;
    server.seed_user("A").await;
    let client = server.client();

    let signed = client.sign_at(br#"{"UserID":"A"}"#, now()).unwrap();
    let (status, reply) = read_json(
        client
            .send_signed(
                Method::POST,
                BAN_PATH,
                Bytes::from_static(br#"{"UserID":"B"}"#),
                &signed,
            )
            .await
            .unwrap(),
    )
    .await;
    assert_eq!(status, 401);
    assert_eq!(reply["code"], "body_hash_mismatch");

    // Body and hash agree but the signature was made for another hash.
    let mut forged = client.sign_at(br#"{"UserID":"B"}"#, now()).unwrap();
    forged.signature = signed.signature.clone();
    let (status, reply) = read_json(
        client
            .send_signed(
                Method::POST,
                BAN_PATH,
                Bytes::from_static(br#"{"UserID":"B"}"#),
                &forged,
            )
            .await
            .unwrap(),
    )
    .await;
    assert_eq!(status, 401);
    assert_eq!(reply["code"], "invalid_signature");
    assert_eq!(server.db.bans().count().await.unwrap(), 0);
}

#[tokio::test]
async fn test_api_keys_rotate() {
    let server = TestServer::spawn().await;
    server.seed_user("A").await;

    let (status, _) = read_json(
        server
            .client_with_key(FALLBACK_API_KEY)
            .post_json(BAN_PATH, &json!({ "UserID": "A" }))
            .await
            .unwrap(),
    )
    .await;
    assert_eq!(status, 200);

    let (status, reply) = read_json(
        server
            .client_with_key("itest-unknown-key-0000")
            .post_json(BAN_PATH, &json!({ "UserID": "A" }))
            .await
            .unwrap(),
    )
    .await;
    assert_eq!(status, 401);
    assert_eq!(reply["code"], "invalid_api_key");
}

#[tokio::test]
async fn test_allowlist_blocks_unlisted_caller() {
    let server = TestServer::spawn_with(|config| {
        config.security.allowed_ips = vec!["10.0.0.0/8".to_string()];
    })
    .await;

    let (status, reply) = read_json(server.client().get(BAN_PATH).await.unwrap()).await;
    assert_eq!(status, 401);
    assert_eq!(reply["code"], "ip_not_allowed");
}

#[tokio::test]
async fn test_rate_limit_counts_every_attempt() {
    let server = TestServer::spawn_with(|config| {
        config.rate_limit.max_requests = 3;
    })
    .await;
    let client = server.client();

    for _ in 0..3 {
        let (status, _) = read_json(client.get(BAN_PATH).await.unwrap()).await;
        assert_eq!(status, 200);
    }
    let (status, reply) = read_json(client.get(BAN_PATH).await.unwrap()).await;
    assert_eq!(status, 401);
    assert_eq!(reply["code"], "rate_limited");
}

#[tokio::test]
async fn test_verify_flow() {
    let server = TestServer::spawn().await;
    server.seed_user("100").await;
    server.seed_user("200").await;
    let client = server.client();

    let (status, body) = read_json(
        client
            .post_json(
                VERIFY_PATH,
                &json!({ "UserID": "100", "IpAddress": "203.0.113.5", "DeviceData": ["ua", "tz"] }),
            )
            .await
            .unwrap(),
    )
    .await;
    assert_eq!(status, 200, "{}", body);
    assert_eq!(body["alreadyVerified"], false);
    assert_eq!(body["trustLevel"], "VERIFIED");
    assert_eq!(body["roleGranted"], false);
    assert!(body["roleError"].is_string());
    assert!(body.get("warning").is_none());

    let (status, body) = read_json(
        client
            .post_json(
                VERIFY_PATH,
                &json!({ "UserID": "200", "IpAddress": "198.51.100.9", "DeviceData": ["ua", "tz"] }),
            )
            .await
            .unwrap(),
    )
    .await;
    assert_eq!(status, 200, "{}", body);
    assert_eq!(body["trustLevel"], "SUSPICIOUS");
    assert!(body["warning"].is_string());

    let (status, body) = read_json(
        client
            .post_json(
                VERIFY_PATH,
                &json!({ "UserID": "100", "IpAddress": "203.0.113.5", "DeviceData": ["ua", "tz"] }),
            )
            .await
            .unwrap(),
    )
    .await;
    assert_eq!(status, 200);
    assert_eq!(body["alreadyVerified"], true);
}

#[tokio::test]
async fn test_verify_rejects_banned_fingerprint() {
    let server = TestServer::spawn().await;
    server.verified_user("A", "203.0.113.10", "device-a").await;
    server.seed_user("newcomer").await;
    let client = server.client();

    let (status, _) = read_json(
        client
            .post_json(BAN_PATH, &json!({ "UserID": "A", "Reason": "raid" }))
            .await
            .unwrap(),
    )
    .await;
    assert_eq!(status, 200);

    let (status, body) = read_json(
        client
            .post_json(
                VERIFY_PATH,
                &json!({ "UserID": "newcomer", "IpAddress": "192.0.2.44", "DeviceData": { "deviceId": "device-a" } }),
            )
            .await
            .unwrap(),
    )
    .await;
    assert_eq!(status, 403, "{}", body);
    assert_eq!(body["error"], "Device banned");
    assert_eq!(body["reason"], "Cascade from user A: raid");
}

#[tokio::test]
async fn test_verify_rejects_banned_user_without_fingerprints() {
    let server = TestServer::spawn().await;
    server.seed_user("X").await;
    let client = server.client();

    let (status, body) = read_json(
        client
            .post_json(BAN_PATH, &json!({ "UserID": "X", "Reason": "spam" }))
            .await
            .unwrap(),
    )
    .await;
    assert_eq!(status, 200);
    assert_eq!(body["altCount"], 0);

    let (status, body) = read_json(
        client
            .post_json(
                VERIFY_PATH,
                &json!({ "UserID": "X", "IpAddress": "198.51.100.77", "DeviceData": { "deviceId": "clean-device" } }),
            )
            .await
            .unwrap(),
    )
    .await;
    assert_eq!(status, 403, "{}", body);
    assert_eq!(body["error"], "User banned");
    assert_eq!(body["reason"], "spam");
}

#[tokio::test]
async fn test_verify_validation() {
    let server = TestServer::spawn().await;
    server.seed_user("100").await;
    let client = server.client();

    let (status, body) = read_json(
        client
            .post_json(VERIFY_PATH, &json!({ "UserID": "100", "DeviceData": "abc" }))
            .await
            .unwrap(),
    )
    .await;
    assert_eq!(status, 400);
    assert_eq!(body["error"], "IpAddress required");

    let (status, body) = read_json(
        client
            .post_json(VERIFY_PATH, &json!({ "UserID": "100", "IpAddress": "203.0.113.5" }))
            .await
            .unwrap(),
    )
    .await;
    assert_eq!(status, 400);
    assert_eq!(body["error"], "Missing device data");

    let (status, _) = read_json(
        client
            .post_json(
                VERIFY_PATH,
                &json!({ "UserID": "nobody", "IpAddress": "203.0.113.5", "DeviceData": "abc" }),
            )
            .await
            .unwrap(),
    )
    .await;
    assert_eq!(status, 404);
}
