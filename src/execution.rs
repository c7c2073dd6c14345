//! Runs a plugin against a resource and folds the incoming events into the
//! execution session shown to the operator.

use crate::error::{ConsoleError, ConsoleResult};
use crate::model::{ExecutionSession, Plugin, Resource, ResultScreen};
use crate::store::{Action, Store};
use crate::transport::{ExecutionRequest, ExecutionTransport};
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

pub const CONNECTION_FAILED: &str = "Connection failed";
const COMPLETED: &str = "\nExecution completed successfully!";

/// Events of the execution channel, tagged by `type`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ExecutionEvent {
    Status {
        message: String,
    },
    Error {
        message: String,
    },
    CommandStart {
        screen_index: usize,
        #[serde(default)]
        commands: Vec<String>,
    },
    Output {
        data: String,
    },
    ErrorOutput {
        data: String,
    },
    Complete {
        #[serde(default, alias = "screens")]
        results: Vec<ResultScreen>,
    },
}

/// What one event does to the session
#[derive(Debug, Clone, PartialEq)]
pub enum Step {
    Log(Vec<String>),
    Fail(Vec<String>),
    Complete {
        lines: Vec<String>,
        results: Vec<ResultScreen>,
    },
}

/// Per-run state: output only counts once a command block has started
#[derive(Debug, Default)]
pub struct LogAccumulator {
    active_screen: Option<usize>,
}

impl LogAccumulator {
    pub fn apply(&mut self, event: ExecutionEvent) -> Step {
        match event {
            ExecutionEvent::Status { message } => Step::Log(vec![message]),
            ExecutionEvent::Error { message } => Step::Fail(vec![format!("ERROR: {}", message)]),
            ExecutionEvent::CommandStart {
                screen_index,
                commands,
            } => {
                self.active_screen = Some(screen_index);
                let mut lines = vec![format!(
                    "\n=== Executing commands for screen {} ===",
                    screen_index.saturating_add(1)
                )];
                lines.extend(commands.iter().map(|cmd| format!("$ {}", cmd)));
                Step::Log(lines)
            }
            ExecutionEvent::Output { data } => match self.active_screen {
                Some(_) => Step::Log(vec![data]),
                None => Step::Log(vec![]),
            },
            ExecutionEvent::ErrorOutput { data } => match self.active_screen {
                Some(_) => Step::Log(vec![format!("ERROR: {}", data)]),
                None => Step::Log(vec![]),
            },
            ExecutionEvent::Complete { results } => Step::Complete {
                lines: vec![COMPLETED.to_string()],
                results,
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ExecutionOutcome {
    pub session: Uuid,
    pub plugin: Plugin,
    pub resource: Resource,
    pub results: Vec<ResultScreen>,
    pub logs: Vec<String>,
}

/// Owns a spawned run. Dropping it aborts the task and releases the connection.
#[derive(Debug)]
pub struct ExecutionHandle<T> {
    pub session: Uuid,
    task: Option<JoinHandle<ConsoleResult<T>>>,
}

impl<T> ExecutionHandle<T> {
    pub fn new(session: Uuid, task: JoinHandle<ConsoleResult<T>>) -> Self {
        Self {
            session,
            task: Some(task),
        }
    }

    pub fn is_finished(&self) -> bool {
        self.task.as_ref().map_or(true, |t| t.is_finished())
    }

    pub async fn join(mut self) -> ConsoleResult<T> {
        match self.task.take() {
            Some(task) => task
                .await
                .map_err(|e| ConsoleError::Stream(format!("execution task ended: {}", e)))?,
            None => Err(ConsoleError::Stream("execution already joined".to_string())),
        }
    }
}

impl<T> Drop for ExecutionHandle<T> {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            if !task.is_finished() {
                debug!("Aborting execution {}", self.session);
            }
            task.abort();
        }
    }
}

/// Clears the session from the store when a run is dropped before reaching a terminal state
struct SessionGuard {
    store: Store,
    session: Uuid,
    armed: bool,
}

impl SessionGuard {
    fn new(store: Store, session: Uuid) -> Self {
        Self {
            store,
            session,
            armed: true,
        }
    }

    fn disarm(&mut self) {
        self.armed = false;
    }
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let store = self.store.clone();
        let session = self.session;
        debug!("Execution {} abandoned, clearing its session", session);
        match Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move { store.dispatch(Action::ExecutionCleared(session)).await });
            }
            Err(e) => warn!("Could not clear abandoned execution {}: {}", session, e),
        }
    }
}

#[derive(Clone)]
pub struct Executor {
    store: Store,
    transport: Arc<dyn ExecutionTransport>,
}

impl Executor {
    pub fn new(store: Store, transport: Arc<dyn ExecutionTransport>) -> Self {
        Self { store, transport }
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    /// Runs to the end, dispatching every event to the store as it arrives
    pub async fn run(&self, plugin: Plugin, resource: Resource) -> ConsoleResult<ExecutionOutcome> {
        let session = ExecutionSession::new(plugin, resource);
        self.run_session(session).await
    }

    /// Same as `run` on a spawned task
    pub fn spawn(&self, plugin: Plugin, resource: Resource) -> ExecutionHandle<ExecutionOutcome> {
        let session = ExecutionSession::new(plugin, resource);
        let id = session.id;
        let executor = self.clone();
        ExecutionHandle::new(id, tokio::spawn(async move { executor.run_session(session).await }))
    }

    pub(crate) async fn run_session(
        &self,
        session: ExecutionSession,
    ) -> ConsoleResult<ExecutionOutcome> {
        let id = session.id;
        let mut guard = SessionGuard::new(self.store.clone(), id);
        let result = self.drive(session).await;
        guard.disarm();
        result
    }

    async fn drive(&self, session: ExecutionSession) -> ConsoleResult<ExecutionOutcome> {
        let id = session.id;
        let plugin = session.plugin.clone();
        let resource = session.resource.clone();
        let mut logs = session.logs.clone();
        info!(
            "Executing {} on {} ({})",
            plugin.name, resource.hostname, resource.ip_address
        );
        self.store.dispatch(Action::ExecutionStarted(session)).await;

        let request = ExecutionRequest {
            script_name: plugin.name.clone(),
            resource_ip: resource.ip_address.clone(),
        };
        let mut events = match self.transport.open(&request).await {
            Ok(events) => events,
            Err(e) => {
                warn!("Could not open execution channel: {}", e);
                self.fail(id, vec![CONNECTION_FAILED.to_string()]).await;
                return Err(e);
            }
        };

        let mut accumulator = LogAccumulator::default();
        while let Some(event) = events.next().await {
            let event = match event {
                Ok(event) => event,
                Err(e) => {
                    warn!("Execution channel failed: {}", e);
                    self.fail(id, vec![CONNECTION_FAILED.to_string()]).await;
                    return Err(e);
                }
            };
            match accumulator.apply(event) {
                Step::Log(lines) => {
                    if lines.is_empty() {
                        continue;
                    }
                    logs.extend(lines.iter().cloned());
                    self.store
                        .dispatch(Action::ExecutionLogged { session: id, lines })
                        .await;
                }
                Step::Fail(lines) => {
                    let message = lines.join("\n");
                    self.fail(id, lines).await;
                    return Err(ConsoleError::Stream(message));
                }
                Step::Complete { lines, results } => {
                    logs.extend(lines.iter().cloned());
                    self.store
                        .dispatch(Action::ExecutionLogged { session: id, lines })
                        .await;
                    self.store
                        .dispatch(Action::ExecutionCompleted { session: id })
                        .await;
                    info!("Execution of {} on {} completed", plugin.name, resource.hostname);
                    return Ok(ExecutionOutcome {
                        session: id,
                        plugin,
                        resource,
                        results,
                        logs,
                    });
                }
            }
        }

        warn!("Execution channel closed before completion");
        self.fail(id, vec![CONNECTION_FAILED.to_string()]).await;
        Err(ConsoleError::Stream(CONNECTION_FAILED.to_string()))
    }

    async fn fail(&self, session: Uuid, lines: Vec<String>) {
        self.store
            .dispatch(Action::ExecutionFailed { session, lines })
            .await;
    }
}
