use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use bytes::Bytes;
use futures_util::StreamExt;

use crate::credential::CredentialError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpMethod {
    Get,
    Post,
}

#[derive(Debug, Clone)]
pub struct UpstreamHttpRequest {
    pub method: HttpMethod,
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: Option<Bytes>,
    pub is_stream: bool,
}

pub enum UpstreamBody {
    Bytes(Bytes),
    Stream(tokio::sync::mpsc::Receiver<Bytes>),
}

pub struct UpstreamHttpResponse {
    pub status: u16,
    pub headers: HashMap<String, String>,
    pub body: UpstreamBody,
}

impl UpstreamHttpResponse {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum UpstreamTransportError {
    #[error("upstream transport error: {0}")]
    Transport(String),
}

/// Abstraction over the HTTP client used to reach the upstream, so the
/// credential broker, deployment registry and dispatch loop can all be unit
/// tested against a fake. The production implementation
/// ([`WreqUpstreamClient`]) wraps `wreq`, mirroring
/// `gproxy_core::upstream_client::WreqUpstreamClient`.
#[async_trait]
pub trait UpstreamClient: Send + Sync {
    async fn fetch_token(
        &self,
        auth_url: &str,
        client_id: &str,
        client_secret: &str,
    ) -> Result<(String, u64), CredentialError>;

    async fn send(&self, req: UpstreamHttpRequest) -> Result<UpstreamHttpResponse, UpstreamTransportError>;
}

#[derive(Clone)]
pub struct WreqUpstreamClient {
    client: wreq::Client,
    stream_idle_timeout: Duration,
}

impl WreqUpstreamClient {
    pub fn new(connect_timeout: Duration, request_timeout: Duration, stream_idle_timeout: Duration) -> Result<Self, wreq::Error> {
        let client = wreq::Client::builder()
            .connect_timeout(connect_timeout)
            .timeout(request_timeout)
            .read_timeout(stream_idle_timeout)
            .build()?;
        Ok(Self {
            client,
            stream_idle_timeout,
        })
    }
}

#[async_trait]
impl UpstreamClient for WreqUpstreamClient {
    async fn fetch_token(
        &self,
        auth_url: &str,
        client_id: &str,
        client_secret: &str,
    ) -> Result<(String, u64), CredentialError> {
        let basic = base64::engine::general_purpose::STANDARD
            .encode(format!("{client_id}:{client_secret}"));
        let response = self
            .client
            .post(format!("{auth_url}?grant_type=client_credentials"))
            .header("Authorization", format!("Basic {basic}"))
            .send()
            .await
            .map_err(|err| CredentialError::Network(err.to_string()))?;

        let status = response.status();
        let body = response
            .bytes()
            .await
            .map_err(|err| CredentialError::Network(err.to_string()))?;

        if !status.is_success() {
            return Err(CredentialError::UpstreamAuth(format!(
                "status {status}: {}",
                String::from_utf8_lossy(&body)
            )));
        }

        let parsed: serde_json::Value = serde_json::from_slice(&body)
            .map_err(|err| CredentialError::UpstreamAuth(err.to_string()))?;
        let token = parsed
            .get("access_token")
            .and_then(|v| v.as_str())
            .ok_or_else(|| CredentialError::UpstreamAuth("missing access_token".to_string()))?
            .to_string();
        let expires_in = parsed
            .get("expires_in")
            .and_then(|v| v.as_u64())
            .unwrap_or(3600);
        Ok((token, expires_in))
    }

    async fn send(&self, req: UpstreamHttpRequest) -> Result<UpstreamHttpResponse, UpstreamTransportError> {
        let method = match req.method {
            HttpMethod::Get => wreq::Method::GET,
            HttpMethod::Post => wreq::Method::POST,
        };
        let mut builder = self.client.request(method, &req.url);
        for (k, v) in &req.headers {
            builder = builder.header(k, v);
        }
        if let Some(body) = req.body {
            builder = builder.body(body);
        }

        let response = builder
            .send()
            .await
            .map_err(|err| UpstreamTransportError::Transport(err.to_string()))?;
        let status = response.status().as_u16();
        let headers = response
            .headers()
            .iter()
            .filter_map(|(k, v)| v.to_str().ok().map(|v| (k.as_str().to_string(), v.to_string())))
            .collect();

        let is_success = (200..300).contains(&status);
        if !is_success || !req.is_stream {
            let body = response
                .bytes()
                .await
                .map_err(|err| UpstreamTransportError::Transport(err.to_string()))?;
            return Ok(UpstreamHttpResponse {
                status,
                headers,
                body: UpstreamBody::Bytes(body),
            });
        }

        let (tx, rx) = tokio::sync::mpsc::channel::<Bytes>(16);
        let idle_timeout = self.stream_idle_timeout;
        tokio::spawn(async move {
            let mut stream = response.bytes_stream();
            loop {
                let next = tokio::time::timeout(idle_timeout, stream.next()).await;
                let Ok(item) = next else { break };
                let Some(item) = item else { break };
                let Ok(chunk) = item else { break };
                if tx.send(chunk).await.is_err() {
                    break;
                }
            }
        });

        Ok(UpstreamHttpResponse {
            status,
            headers,
            body: UpstreamBody::Stream(rx),
        })
    }
}
