//! Shared test doubles: a scripted protocol transport, a recording script
//! executor, and canned neural providers.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;

use meshproto::{Command, CommandTransport, ProtocolError, Response};
use meshwright::executor::Connector;
use meshwright::neural::{GenerationRequest, GenerationResult, NeuralProvider, ProviderError};
use meshwright::pipeline::{ScriptError, ScriptExecutor};

pub fn ok(result: Value) -> Result<Response, ProtocolError> {
    Ok(Response::from_bytes(
        json!({"status": "ok", "result": result}).to_string().as_bytes(),
    ))
}

pub fn remote_error(message: &str) -> Result<Response, ProtocolError> {
    Ok(Response::from_bytes(
        json!({"status": "error", "message": message}).to_string().as_bytes(),
    ))
}

/// State shared between a connector and every transport it opened.
#[derive(Default)]
pub struct TransportLog {
    replies: Mutex<VecDeque<Result<Response, ProtocolError>>>,
    pub commands: Mutex<Vec<Command>>,
    pub opens: AtomicUsize,
    pub closes: AtomicUsize,
}

impl TransportLog {
    pub fn command_types(&self) -> Vec<String> {
        self.commands
            .lock()
            .unwrap()
            .iter()
            .map(|c| c.command_type.clone())
            .collect()
    }

    pub fn closes(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }
}

pub struct ScriptedTransport {
    log: Arc<TransportLog>,
}

#[async_trait]
impl CommandTransport for ScriptedTransport {
    async fn execute(&mut self, command: Command) -> Result<Response, ProtocolError> {
        self.log.commands.lock().unwrap().push(command);
        let next = self.log.replies.lock().unwrap().pop_front();
        next.unwrap_or_else(|| ok(json!({})))
    }

    async fn close(&mut self) {
        self.log.closes.fetch_add(1, Ordering::SeqCst);
    }
}

/// Hands out transports that replay queued replies; an empty queue answers
/// `{"status": "ok", "result": {}}`.
#[derive(Clone, Default)]
pub struct ScriptedConnector {
    pub log: Arc<TransportLog>,
}

impl ScriptedConnector {
    pub fn with_replies(replies: Vec<Result<Response, ProtocolError>>) -> Self {
        let connector = Self::default();
        connector.log.replies.lock().unwrap().extend(replies);
        connector
    }
}

impl Connector for ScriptedConnector {
    fn open(&self) -> Box<dyn CommandTransport> {
        self.log.opens.fetch_add(1, Ordering::SeqCst);
        Box::new(ScriptedTransport {
            log: self.log.clone(),
        })
    }
}

/// Records every script; fails any script containing `fail_on`.
#[derive(Default)]
pub struct RecordingScripts {
    pub scripts: Mutex<Vec<String>>,
    pub fail_on: Option<&'static str>,
}

impl RecordingScripts {
    pub fn failing_on(marker: &'static str) -> Self {
        Self {
            fail_on: Some(marker),
            ..Default::default()
        }
    }

    pub fn count(&self) -> usize {
        self.scripts.lock().unwrap().len()
    }

    pub fn containing(&self, needle: &str) -> usize {
        self.scripts
            .lock()
            .unwrap()
            .iter()
            .filter(|s| s.contains(needle))
            .count()
    }
}

#[async_trait]
impl ScriptExecutor for RecordingScripts {
    async fn run_script(&self, code: &str) -> Result<Value, ScriptError> {
        self.scripts.lock().unwrap().push(code.to_string());
        match self.fail_on {
            Some(marker) if code.contains(marker) => Err(ScriptError::Failed(format!("{} exploded", marker))),
            _ => Ok(json!({"ok": true})),
        }
    }
}

/// What a stub provider does when asked to generate.
pub enum StubBehaviour {
    Produce(PathBuf),
    FailRemote(String),
    Error(String),
}

pub struct StubProvider {
    slug: &'static str,
    behaviour: StubBehaviour,
    pub calls: Mutex<Vec<GenerationRequest>>,
}

impl StubProvider {
    pub fn new(slug: &'static str, behaviour: StubBehaviour) -> Arc<Self> {
        Arc::new(Self {
            slug,
            behaviour,
            calls: Mutex::new(Vec::new()),
        })
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

#[async_trait]
impl NeuralProvider for StubProvider {
    fn slug(&self) -> &'static str {
        self.slug
    }

    async fn generate(
        &self,
        request: &GenerationRequest,
        _cancel: &CancellationToken,
    ) -> Result<GenerationResult, ProviderError> {
        self.calls.lock().unwrap().push(request.clone());
        let started = Instant::now();
        match &self.behaviour {
            StubBehaviour::Produce(path) => Ok(GenerationResult::completed(self.slug, path.clone(), started)),
            StubBehaviour::FailRemote(message) => Ok(GenerationResult::failed(self.slug, message.clone(), started)),
            StubBehaviour::Error(message) => Err(ProviderError::Remote {
                provider: self.slug.to_string(),
                message: message.clone(),
            }),
        }
    }

    async fn health_check(&self) -> bool {
        true
    }
}
