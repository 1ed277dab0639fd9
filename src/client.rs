//! Client for signed service-to-service calls.
//!
//! Every request is signed with [`SignedHeaders`] over the exact bytes sent,
//! so the server's body-hash and signature checks pass unchanged.

use crate::security::signing::SignedHeaders;
use bytes::Bytes;
use reqwest::header::{CONTENT_TYPE, HeaderMap, HeaderValue};
use reqwest::{Method, Response};
use serde::Serialize;
use std::time::Duration;
use thiserror::Error;
use zeroize::Zeroizing;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("failed to encode request body: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("signing secret rejected")]
    Signing,
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),
}

pub struct SignedApiClient {
    http: reqwest::Client,
    base_url: String,
    api_key: Zeroizing<String>,
    secret: Zeroizing<Vec<u8>>,
}

impl std::fmt::Debug for SignedApiClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SignedApiClient")
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}

impl SignedApiClient {
    pub fn new(base_url: impl Into<String>, api_key: &str, secret: &[u8]) -> Self {
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .user_agent(concat!("trustguard/", env!("CARGO_PKG_VERSION")))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: Zeroizing::new(api_key.to_string()),
            secret: Zeroizing::new(secret.to_vec()),
        }
    }

    /// POST `value` as JSON to `path`.
    pub async fn post_json<T: Serialize + ?Sized>(
        &self,
        path: &str,
        value: &T,
    ) -> Result<Response, ClientError> {
        let body = serde_json::to_vec(value)?;
        self.send(Method::POST, path, Bytes::from(body)).await
    }

    /// GET `path` (query string included) with an empty signed body.
    pub async fn get(&self, path: &str) -> Result<Response, ClientError> {
        self.send(Method::GET, path, Bytes::new()).await
    }

    /// Sign `body` with the current time and send it.
    pub async fn send(&self, method: Method, path: &str, body: Bytes) -> Result<Response, ClientError> {
        let signed =
            SignedHeaders::now(&self.api_key, &self.secret, &body).ok_or(ClientError::Signing)?;
        self.send_signed(method, path, body, &signed).await
    }

    /// Send `body` under caller-supplied signed headers.
    ///
    /// The headers need not match the body, which lets callers exercise the
    /// server's rejection paths.
    pub async fn send_signed(
        &self,
        method: Method,
        path: &str,
        body: Bytes,
        signed: &SignedHeaders,
    ) -> Result<Response, ClientError> {
        let mut headers = HeaderMap::new();
        signed.apply(&mut headers);
        if !body.is_empty() {
            headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        }

        let response = self
            .http
            .request(method, format!("{}{}", self.base_url, path))
            .headers(headers)
            .body(body)
            .send()
            .await?;
        Ok(response)
    }

    /// Headers signed for `body` at an explicit unix timestamp.
    pub fn sign_at(&self, body: &[u8], timestamp: i64) -> Result<SignedHeaders, ClientError> {
        SignedHeaders::new(&self.api_key, &self.secret, body, timestamp).ok_or(ClientError::Signing)
    }
}
