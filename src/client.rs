use super::{
    cache::ItemCache,
    config::ClientConfig,
    schema::SchemaRegistry,
    sigv4::{self, Signer},
    wire::{ErrorEnvelope, Operation},
    DynTransport, Error, HttpTransport, Result, ResultExt, Transport, WireRequest,
};
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;
use std::{collections::BTreeMap, sync::Mutex};
use tracing::{error, warn};

/// Diagnostics for one failed wire call. Kept for inspection only, the client never reads them.
#[derive(Clone, Debug, PartialEq)]
pub struct ErrorRecord {
    pub target: String,
    /// `None` for network-level failures.
    pub status: Option<u16>,
    pub error_type: Option<String>,
    pub message: Option<String>,
    pub raw_body: Option<String>,
    pub parsed_body: Option<Value>,
    pub payload: String,
    pub headers: Vec<(String, String)>,
    pub recorded_at: DateTime<Utc>,
}

/// A connection to one Alternator endpoint along with the table schemas, item cache and error log
/// used by its operations. Cheap operations take `&self`, so a client is typically created once
/// and shared.
pub struct Client<T = DynTransport> {
    config: ClientConfig,
    signer: Signer,
    transport: T,
    schemas: SchemaRegistry,
    pub(crate) cache: ItemCache,
    errors: Mutex<Vec<ErrorRecord>>,
}

fn signer_for(config: &ClientConfig) -> Result<Signer> {
    Ok(Signer::new(
        config.access_key.clone(),
        config.secret_key.clone(),
        config.region.clone(),
        config.host_header()?,
    ))
}

impl Client<DynTransport> {
    /// Creates a client that talks HTTP to `config.endpoint`.
    pub fn new(config: ClientConfig) -> Result<Self> {
        Self::with_transport(config, HttpTransport::new()?.into())
    }
}

impl<T: Transport> Client<T> {
    pub fn with_transport(config: ClientConfig, transport: T) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            signer: signer_for(&config)?,
            cache: ItemCache::new(config.cache_enabled),
            config,
            transport,
            schemas: SchemaRegistry::new(),
            errors: Mutex::default(),
        })
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn schemas(&self) -> &SchemaRegistry {
        &self.schemas
    }

    /// Applies `f` to a copy of the configuration and adopts it if it is valid.
    pub fn configure<F: FnOnce(&mut ClientConfig)>(&mut self, f: F) -> Result<()> {
        let mut config = self.config.clone();
        f(&mut config);
        config.validate()?;
        self.signer = signer_for(&config)?;
        self.cache.set_enabled(config.cache_enabled);
        self.config = config;
        Ok(())
    }

    pub fn set_custom_headers(&mut self, headers: BTreeMap<String, String>) {
        self.config.custom_headers = headers;
    }

    pub fn errors(&self) -> Vec<ErrorRecord> {
        self.errors.lock().unwrap().clone()
    }

    pub fn clear_errors(&self) {
        self.errors.lock().unwrap().clear();
    }

    pub fn clear_cache(&self) {
        self.cache.clear();
    }

    /// Sends `payload` as operation `target` (e.g. `"DescribeEndpoints"`) with the usual signing
    /// and retries, and returns the response body as is.
    #[tracing::instrument(skip_all, fields(operation = target, otel.status_code, error.msg, otel.span_kind = "client"))]
    pub async fn raw_request(&self, target: &str, payload: &Value) -> Result<Value> {
        self.request(target, payload, None).await.spanify_err()
    }

    pub(crate) async fn call<I: Serialize, O: DeserializeOwned>(&self, operation: Operation, input: &I, attempts: Option<u32>) -> Result<O> {
        let body = self.request(operation.as_str(), input, attempts).await?;
        Ok(serde_json::from_value(body)?)
    }

    fn headers(&self, target: &str, payload: &str) -> Result<Vec<(String, String)>> {
        let (amz_date, date_stamp) = sigv4::timestamp(Utc::now());
        let mut headers = self.signer.sign(target, payload, &amz_date, &date_stamp)?;
        headers.push(("content-length".to_string(), payload.len().to_string()));
        for (name, value) in &self.config.custom_headers {
            if name.eq_ignore_ascii_case("host") || headers.iter().any(|(k, _)| k.eq_ignore_ascii_case(name)) {
                continue;
            }
            headers.push((name.clone(), value.clone()));
        }
        Ok(headers)
    }

    /// The one path every wire call takes. Each attempt is signed afresh; retryable failures are
    /// attempted up to `attempts` (or the configured maximum) times with the delay doubling in
    /// between.
    async fn request<I: Serialize + ?Sized>(&self, target: &str, input: &I, attempts: Option<u32>) -> Result<Value> {
        let payload = serde_json::to_string(input)?;
        let max_attempts = attempts.unwrap_or(self.config.max_attempts).max(1);
        let url = self.config.url()?.to_string();
        let mut delay = self.config.initial_backoff();
        let mut attempt = 1;

        loop {
            let headers = self.headers(target, &payload)?;
            let request = WireRequest {
                url: url.clone(),
                headers: headers.clone(),
                body: Bytes::from(payload.clone()),
                timeout: self.config.request_timeout(),
            };

            let (err, raw_body, parsed_body) = match self.transport.send(request).await {
                Ok(response) if response.status == 200 => {
                    if response.body.iter().all(u8::is_ascii_whitespace) {
                        return Ok(Value::Object(Default::default()));
                    }
                    return Ok(serde_json::from_slice(&response.body)?);
                }
                Ok(response) => {
                    let parsed: Option<Value> = serde_json::from_slice(&response.body).ok();
                    let envelope: ErrorEnvelope = parsed.clone().and_then(|v| serde_json::from_value(v).ok()).unwrap_or_default();
                    let err = Error::Remote {
                        target: target.to_string(),
                        status: response.status,
                        error_type: envelope.error_type,
                        message: envelope.message,
                    };
                    (err, Some(String::from_utf8_lossy(&response.body).into_owned()), parsed)
                }
                Err(err) => (err, None, None),
            };

            if err.is_retryable() && attempt < max_attempts {
                warn!(operation = target, attempt, delay_ms = delay.as_millis() as u64, error = %err, "retrying request");
                tokio::time::sleep(delay).await;
                delay *= 2;
                attempt += 1;
                continue;
            }

            self.errors.lock().unwrap().push(ErrorRecord {
                target: target.to_string(),
                status: err.status(),
                error_type: err.error_type().map(str::to_string),
                message: err.message().map(str::to_string),
                raw_body,
                parsed_body,
                payload,
                headers,
                recorded_at: Utc::now(),
            });

            return Err(if err.is_retryable() {
                error!(operation = target, attempts = attempt, error = %err, "request failed after retries");
                Error::RetriesExhausted {
                    attempts: attempt,
                    last: Box::new(err),
                }
            } else {
                error!(operation = target, error = %err, "request failed");
                err
            });
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::testutil::{body, config, Scripted, ScriptedTransport};
    use serde_json::json;
    use std::time::Duration;

    fn client(transport: ScriptedTransport) -> Client<ScriptedTransport> {
        Client::with_transport(config(), transport).unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_bound_with_doubling_delay() {
        let c = client(ScriptedTransport::new(Scripted::error(503, "ServiceUnavailable")));

        let err = c.raw_request("ListTables", &json!({})).await.unwrap_err();
        assert!(matches!(err, Error::RetriesExhausted { attempts: 3, .. }), "{}", err);
        assert_eq!(err.status(), Some(503));

        let arrivals = c.transport().arrivals();
        assert_eq!(arrivals.len(), 3);
        let first = arrivals[1] - arrivals[0];
        let second = arrivals[2] - arrivals[1];
        assert!(first >= Duration::from_millis(10), "{:?}", first);
        assert!(second >= first * 2, "{:?} then {:?}", first, second);

        assert_eq!(c.errors().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_throttling_then_success() {
        let c = client(
            ScriptedTransport::new(Scripted::ok(json!({"TableNames": []})))
                .then(Scripted::error(400, "ProvisionedThroughputExceededException"))
                .then(Scripted::NetworkError),
        );

        let body = c.raw_request("ListTables", &json!({})).await.unwrap();
        assert_eq!(body, json!({"TableNames": []}));
        assert_eq!(c.transport().count(), 3);
        assert!(c.errors().is_empty());
    }

    #[tokio::test]
    async fn test_permanent_failure_is_not_retried() {
        let c = client(ScriptedTransport::new(Scripted::error(400, "ValidationException")));

        let err = c.raw_request("PutItem", &json!({"TableName": "users"})).await.unwrap_err();
        assert_eq!(err.error_code(), Some("ValidationException"));
        assert_eq!(err.message(), Some("scripted failure"));
        assert_eq!(c.transport().count(), 1);

        let errors = c.errors();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].target, "PutItem");
        assert_eq!(errors[0].status, Some(400));
        assert_eq!(errors[0].payload, r#"{"TableName":"users"}"#);
        assert!(errors[0].parsed_body.is_some());

        c.clear_errors();
        assert!(c.errors().is_empty());
    }

    #[tokio::test]
    async fn test_request_headers() {
        let mut c = client(ScriptedTransport::new(Scripted::ok(json!({}))));
        c.set_custom_headers(
            vec![
                ("X-Trace".to_string(), "abc".to_string()),
                ("Authorization".to_string(), "forged".to_string()),
            ]
            .into_iter()
            .collect(),
        );

        c.raw_request("DescribeTable", &json!({"TableName": "users"})).await.unwrap();
        let requests = c.transport().requests();
        let request = &requests[0];
        assert_eq!(request.url, "http://localhost:8000/");
        assert_eq!(request.operation(), Some("DescribeTable"));
        assert_eq!(request.header("content-type"), Some("application/x-amz-json-1.0"));
        assert_eq!(request.header("content-length"), Some(request.body.len().to_string().as_str()));
        assert_eq!(request.header("x-trace"), Some("abc"));
        assert!(request.header("authorization").unwrap().starts_with("AWS4-HMAC-SHA256 Credential=alternator/"));
        assert_eq!(request.headers.iter().filter(|(k, _)| k.eq_ignore_ascii_case("authorization")).count(), 1);
        assert_eq!(body(request), json!({"TableName": "users"}));
    }

    #[tokio::test]
    async fn test_missing_target_fails_before_sending() {
        let c = client(ScriptedTransport::new(Scripted::ok(json!({}))));
        assert!(matches!(c.raw_request("", &json!({})).await, Err(Error::Validation(_))));
        assert_eq!(c.transport().count(), 0);
    }

    #[test]
    fn test_configure() {
        let mut c = client(ScriptedTransport::new(Scripted::ok(json!({}))));
        c.configure(|config| {
            config.port = Some(8043);
            config.cache_enabled = true;
        })
        .unwrap();
        assert_eq!(c.config().port, Some(8043));
        assert!(c.cache.is_enabled());

        assert!(c.configure(|config| config.max_attempts = 0).is_err());
        assert_eq!(c.config().max_attempts, 3);
    }
}
