use super::{memorystore, Client, ClientConfig, Error, Item, KeyAttributeType, Result, TableConfig, Transport, WireRequest, WireResponse};
use serde_json::{json, Value};
use std::{collections::VecDeque, sync::Mutex};
use tokio::time::Instant;

pub fn item(v: Value) -> Item {
    v.as_object().cloned().unwrap_or_default()
}

pub fn body(request: &WireRequest) -> Value {
    serde_json::from_slice(&request.body).unwrap()
}

#[derive(Clone, Debug)]
pub enum Scripted {
    Respond(u16, Value),
    NetworkError,
}

impl Scripted {
    pub fn ok(body: Value) -> Self {
        Self::Respond(200, body)
    }

    pub fn error(status: u16, error_type: &str) -> Self {
        Self::Respond(
            status,
            json!({"__type": format!("com.amazonaws.dynamodb.v20120810#{}", error_type), "message": "scripted failure"}),
        )
    }
}

/// Plays back queued responses, then `fallback` forever. Records every request along with the
/// (tokio) instant it arrived.
pub struct ScriptedTransport {
    script: Mutex<VecDeque<Scripted>>,
    fallback: Scripted,
    requests: Mutex<Vec<(Instant, WireRequest)>>,
}

impl ScriptedTransport {
    pub fn new(fallback: Scripted) -> Self {
        Self {
            script: Mutex::default(),
            fallback,
            requests: Mutex::default(),
        }
    }

    pub fn then(self, response: Scripted) -> Self {
        self.script.lock().unwrap().push_back(response);
        self
    }

    pub fn requests(&self) -> Vec<WireRequest> {
        self.requests.lock().unwrap().iter().map(|(_, r)| r.clone()).collect()
    }

    pub fn arrivals(&self) -> Vec<Instant> {
        self.requests.lock().unwrap().iter().map(|(t, _)| *t).collect()
    }

    pub fn count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn send(&self, request: WireRequest) -> Result<WireResponse> {
        self.requests.lock().unwrap().push((Instant::now(), request));
        let next = self.script.lock().unwrap().pop_front().unwrap_or_else(|| self.fallback.clone());
        match next {
            Scripted::Respond(status, body) => Ok(WireResponse::json(status, &body)),
            Scripted::NetworkError => Err(Error::Network(Box::new(std::io::Error::new(
                std::io::ErrorKind::ConnectionReset,
                "connection reset by peer",
            )))),
        }
    }
}

type Fault = Box<dyn Fn(&WireRequest) -> Option<WireResponse> + Send + Sync>;

/// Wraps the in-memory store, counting requests and optionally replacing some responses.
pub struct Recorder {
    inner: memorystore::Backend,
    operations: Mutex<Vec<String>>,
    fault: Mutex<Option<Fault>>,
}

impl Recorder {
    pub fn new(inner: memorystore::Backend) -> Self {
        Self {
            inner,
            operations: Mutex::default(),
            fault: Mutex::default(),
        }
    }

    /// Answers with `response` instead of forwarding whenever `f` returns one.
    pub fn inject<F: Fn(&WireRequest) -> Option<WireResponse> + Send + Sync + 'static>(&self, f: F) {
        *self.fault.lock().unwrap() = Some(Box::new(f));
    }

    pub fn operations(&self) -> Vec<String> {
        self.operations.lock().unwrap().clone()
    }

    pub fn count(&self) -> usize {
        self.operations.lock().unwrap().len()
    }

    pub fn reset(&self) {
        self.operations.lock().unwrap().clear();
    }
}

#[async_trait]
impl Transport for Recorder {
    async fn send(&self, request: WireRequest) -> Result<WireResponse> {
        self.operations.lock().unwrap().push(request.operation().unwrap_or_default().to_string());
        let injected = self.fault.lock().unwrap().as_ref().and_then(|f| f(&request));
        match injected {
            Some(response) => Ok(response),
            None => self.inner.send(request).await,
        }
    }
}

pub fn config() -> ClientConfig {
    ClientConfig {
        initial_backoff_ms: 10,
        ..ClientConfig::default()
    }
}

/// A client over a fresh in-memory store holding two empty tables: `users` keyed by the string
/// `id`, and `events` keyed by the string `id` and the number `sort`. The recorder starts out
/// with no requests.
pub async fn memory_client(cache_enabled: bool) -> Client<Recorder> {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
    let client = Client::with_transport(
        ClientConfig {
            cache_enabled,
            ..config()
        },
        Recorder::new(memorystore::Backend::new()),
    )
    .unwrap();
    client.schemas().register("users", TableConfig::new("id"));
    client.schemas().register("events", TableConfig::new("id").with_sort_key("sort").with_sort_key_type(KeyAttributeType::N));
    client.create_table("users").await.unwrap();
    client.create_table("events").await.unwrap();
    client.transport().reset();
    client
}
