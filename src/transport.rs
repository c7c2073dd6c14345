use crate::client::HttpBackend;
use crate::config::{ConsoleConfig, TransportKind};
use crate::error::{ConsoleError, ConsoleResult};
use crate::execution::ExecutionEvent;
use crate::model::ResultScreen;
use crate::sse;
use async_trait::async_trait;
use futures::future;
use futures::stream::{self, BoxStream, StreamExt};
use reqwest::header::ACCEPT;
use reqwest::Method;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, warn};

pub type EventStream = BoxStream<'static, ConsoleResult<ExecutionEvent>>;

/// Body sent to open an execution
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExecutionRequest {
    pub script_name: String,
    pub resource_ip: String,
}

/// Strategy delivering the execution events of one run
#[async_trait]
pub trait ExecutionTransport: Send + Sync {
    async fn open(&self, request: &ExecutionRequest) -> ConsoleResult<EventStream>;
}

/// Picks the transport the deployment is configured for
pub fn transport_for(backend: &HttpBackend) -> Arc<dyn ExecutionTransport> {
    let config: &ConsoleConfig = backend.config();
    info!("Using {} execution transport", config.transport);
    match config.transport {
        TransportKind::Streaming => Arc::new(SseTransport::new(backend.clone())),
        TransportKind::Synchronous => Arc::new(SyncTransport::new(backend.clone())),
    }
}

/// Event stream over server-sent events, one event per `data:` payload
#[derive(Debug, Clone)]
pub struct SseTransport {
    backend: HttpBackend,
}

impl SseTransport {
    pub fn new(backend: HttpBackend) -> Self {
        Self { backend }
    }
}

fn decode_event(payload: &str) -> Option<ExecutionEvent> {
    match serde_json::from_str(payload) {
        Ok(event) => Some(event),
        Err(e) => {
            warn!("Skipping undecodable execution event: {} ({})", payload, e);
            None
        }
    }
}

#[async_trait]
impl ExecutionTransport for SseTransport {
    async fn open(&self, request: &ExecutionRequest) -> ConsoleResult<EventStream> {
        let path = self.backend.config().execution_path.clone();
        debug!("Opening event stream for {:?}", request);
        let response = self
            .backend
            .stream_request(Method::POST, &path)?
            .header(ACCEPT, "text/event-stream")
            .json(request)
            .send()
            .await?;
        let response = HttpBackend::check(response).await?;

        let events = sse::data_stream(response.bytes_stream()).filter_map(|item| {
            future::ready(match item {
                Ok(payload) => decode_event(&payload).map(Ok),
                Err(e) => Some(Err(ConsoleError::from(e))),
            })
        });
        Ok(events.boxed())
    }
}

#[derive(Debug, Deserialize)]
struct SyncReply {
    #[serde(default)]
    scan_results: Option<Vec<ResultScreen>>,
    #[serde(default)]
    logs: Vec<String>,
    #[serde(default)]
    error: Option<String>,
}

impl SyncReply {
    fn into_events(self) -> Vec<ExecutionEvent> {
        if let Some(message) = self.error {
            return vec![ExecutionEvent::Error { message }];
        }
        let mut events: Vec<ExecutionEvent> = self
            .logs
            .into_iter()
            .map(|message| ExecutionEvent::Status { message })
            .collect();
        events.push(ExecutionEvent::Complete {
            results: self.scan_results.unwrap_or_default(),
        });
        events
    }
}

/// One request answered with the whole result, replayed as the usual event sequence
#[derive(Debug, Clone)]
pub struct SyncTransport {
    backend: HttpBackend,
}

impl SyncTransport {
    pub fn new(backend: HttpBackend) -> Self {
        Self { backend }
    }
}

#[async_trait]
impl ExecutionTransport for SyncTransport {
    async fn open(&self, request: &ExecutionRequest) -> ConsoleResult<EventStream> {
        let path = self.backend.config().execution_path.clone();
        debug!("Requesting synchronous execution for {:?}", request);
        let response = self
            .backend
            .stream_request(Method::POST, &path)?
            .json(request)
            .send()
            .await?;

        let events = match HttpBackend::check(response).await {
            Ok(response) => {
                let body = response.text().await?;
                serde_json::from_str::<SyncReply>(&body)?.into_events()
            }
            // The execution endpoint reports plugin failures as 4xx/5xx with an `error` field
            Err(ConsoleError::Rejected {
                message: Some(message),
                ..
            }) => vec![ExecutionEvent::Error { message }],
            Err(e) => return Err(e),
        };
        Ok(stream::iter(events.into_iter().map(Ok)).boxed())
    }
}
