use super::{Error, Result};
use reqwest::Url;
use serde::Deserialize;
use std::{collections::BTreeMap, path::Path, time::Duration};

/// Connection and behaviour settings for a [`Client`](crate::Client).
#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Base URL of the Alternator endpoint. `https` endpoints use TLS.
    pub endpoint: String,
    /// Overrides the port in `endpoint` when set.
    pub port: Option<u16>,
    pub region: String,
    pub access_key: String,
    pub secret_key: String,
    /// Total attempts per wire call, including the first.
    pub max_attempts: u32,
    /// Delay before the first retry in milliseconds. Doubles on every further retry.
    pub initial_backoff_ms: u64,
    /// Per-attempt timeout in milliseconds.
    pub request_timeout_ms: u64,
    pub cache_enabled: bool,
    /// Sent with every request. Cannot replace any of the signed headers.
    pub custom_headers: BTreeMap<String, String>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            endpoint: "http://localhost".to_string(),
            port: Some(8000),
            region: "us-east-1".to_string(),
            access_key: "alternator".to_string(),
            secret_key: "secret_pass".to_string(),
            max_attempts: 3,
            initial_backoff_ms: 100,
            request_timeout_ms: 5000,
            cache_enabled: false,
            custom_headers: BTreeMap::new(),
        }
    }
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Result<Option<T>> {
    match std::env::var(name) {
        Ok(v) => v
            .parse()
            .map(Some)
            .map_err(|_| Error::Config(format!("{} has an invalid value: {:?}", name, v))),
        Err(_) => Ok(None),
    }
}

impl ClientConfig {
    /// Starts from the defaults and applies whichever `ALTERNATOR_*` and `AWS_*` variables are set.
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();
        if let Some(v) = env_parse::<String>("ALTERNATOR_ENDPOINT")? {
            // An explicit port in the endpoint wins over the default one.
            if Url::parse(&v).ok().and_then(|u| u.port()).is_some() {
                config.port = None;
            }
            config.endpoint = v;
        }
        if let Some(v) = env_parse("ALTERNATOR_PORT")? {
            config.port = Some(v);
        }
        if let Some(v) = env_parse("AWS_REGION")? {
            config.region = v;
        }
        if let Some(v) = env_parse("AWS_ACCESS_KEY_ID")? {
            config.access_key = v;
        }
        if let Some(v) = env_parse("AWS_SECRET_ACCESS_KEY")? {
            config.secret_key = v;
        }
        if let Some(v) = env_parse("ALTERNATOR_MAX_ATTEMPTS")? {
            config.max_attempts = v;
        }
        if let Some(v) = env_parse("ALTERNATOR_BACKOFF_MS")? {
            config.initial_backoff_ms = v;
        }
        if let Some(v) = env_parse("ALTERNATOR_CACHE")? {
            config.cache_enabled = v;
        }
        config.validate()?;
        Ok(config)
    }

    /// Reads a JSON config file. Missing fields take their defaults.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_attempts == 0 {
            return Err(Error::Config("max_attempts must be at least 1".to_string()));
        }
        if self.region.is_empty() {
            return Err(Error::Config("region is required".to_string()));
        }
        self.url().map(|_| ())
    }

    /// The endpoint with the configured port applied.
    pub fn url(&self) -> Result<Url> {
        let mut url = Url::parse(&self.endpoint).map_err(|e| Error::Config(format!("invalid endpoint {:?}: {}", self.endpoint, e)))?;
        if url.host_str().is_none() {
            return Err(Error::Config(format!("endpoint {:?} has no host", self.endpoint)));
        }
        if let Some(port) = self.port {
            url.set_port(Some(port))
                .map_err(|_| Error::Config(format!("cannot set port on {:?}", self.endpoint)))?;
        }
        Ok(url)
    }

    /// The Host header the transport will send for [`url`](Self::url).
    pub fn host_header(&self) -> Result<String> {
        let url = self.url()?;
        let host = url.host_str().unwrap_or_default();
        Ok(match url.port() {
            Some(port) => format!("{}:{}", host, port),
            None => host.to_string(),
        })
    }

    pub fn is_secure(&self) -> bool {
        self.endpoint.starts_with("https://")
    }

    pub fn initial_backoff(&self) -> Duration {
        Duration::from_millis(self.initial_backoff_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}
