use super::{wire::TARGET_PREFIX, Result};
use bytes::Bytes;
use std::time::Duration;

/// One signed HTTP POST, ready to go out.
#[derive(Clone, Debug)]
pub struct WireRequest {
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: Bytes,
    pub timeout: Duration,
}

impl WireRequest {
    /// Case-insensitive header lookup.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.iter().find(|(k, _)| k.eq_ignore_ascii_case(name)).map(|(_, v)| v.as_str())
    }

    /// The operation named by `X-Amz-Target`, without the API version prefix.
    pub fn operation(&self) -> Option<&str> {
        self.header("x-amz-target")
            .and_then(|t| t.strip_prefix(TARGET_PREFIX))
            .and_then(|t| t.strip_prefix('.'))
    }
}

#[derive(Clone, Debug)]
pub struct WireResponse {
    pub status: u16,
    pub body: Bytes,
}

impl WireResponse {
    pub fn json(status: u16, body: &serde_json::Value) -> Self {
        Self {
            status,
            body: Bytes::from(body.to_string()),
        }
    }
}

/// Delivers signed requests to the store. Implementations report network-level failures as
/// [`Error::Network`](crate::Error::Network) and every HTTP response, whatever its status, as
/// `Ok`.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, request: WireRequest) -> Result<WireResponse>;
}

#[async_trait]
impl<T: Transport + ?Sized> Transport for std::sync::Arc<T> {
    async fn send(&self, request: WireRequest) -> Result<WireResponse> {
        (**self).send(request).await
    }
}

/// Sends requests over HTTP(S). Connections are pooled and kept alive between requests.
#[derive(Clone, Debug)]
pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    pub fn new() -> Result<Self> {
        let client = reqwest::Client::builder()
            .pool_idle_timeout(Duration::from_secs(90))
            .pool_max_idle_per_host(32)
            .tcp_keepalive(Duration::from_secs(60))
            .build()?;
        Ok(Self { client })
    }

    pub fn from_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(&self, request: WireRequest) -> Result<WireResponse> {
        let mut builder = self.client.post(&request.url).timeout(request.timeout);
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        let response = builder.body(request.body).send().await?;
        let status = response.status().as_u16();
        let body = response.bytes().await?;
        Ok(WireResponse { status, body })
    }
}
