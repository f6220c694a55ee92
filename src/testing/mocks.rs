use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use crate::catalog::{Arguments, ContentType, OperationError, OperationExecutor};
use crate::confirmation::{ConfirmationChannel, ConfirmationDecision, PlanSummary};
use crate::intent::LanguageModel;
use crate::validator::{ResolveError, ResourceResolver};

fn locked<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Operation executor with scripted results.
///
/// Results are handed out in order; the last one repeats once the script runs
/// out. Every call's arguments are recorded.
pub struct MockOperation {
    script: Mutex<VecDeque<Result<Value, OperationError>>>,
    last: Mutex<Result<Value, OperationError>>,
    delay: Option<Duration>,
    calls: Mutex<Vec<Arguments>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl MockOperation {
    pub fn scripted(results: Vec<Result<Value, OperationError>>) -> Self {
        Self {
            script: Mutex::new(results.into()),
            last: Mutex::new(Ok(Value::Null)),
            delay: None,
            calls: Mutex::new(Vec::new()),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        }
    }

    pub fn succeeding(result: Value) -> Self {
        Self::scripted(vec![Ok(result)])
    }

    pub fn failing_permanently(message: &str) -> Self {
        Self::scripted(vec![Err(OperationError::permanent(message))])
    }

    pub fn failing_transiently(message: &str) -> Self {
        Self::scripted(vec![Err(OperationError::transient(message))])
    }

    /// Sleep this long inside every call
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn calls(&self) -> Vec<Arguments> {
        locked(&self.calls).clone()
    }

    pub fn call_count(&self) -> usize {
        locked(&self.calls).len()
    }

    /// Highest number of calls observed running at the same time
    pub fn max_concurrency(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    fn next_result(&self) -> Result<Value, OperationError> {
        let mut last = locked(&self.last);
        if let Some(next) = locked(&self.script).pop_front() {
            *last = next;
        }
        last.clone()
    }
}

#[async_trait]
impl OperationExecutor for MockOperation {
    async fn execute(&self, arguments: &Arguments) -> Result<Value, OperationError> {
        locked(&self.calls).push(arguments.clone());
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        let result = self.next_result();
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        result
    }
}

/// Resolver over a fixed set of known names
#[derive(Debug, Default)]
pub struct MockResolver {
    known: HashMap<(ContentType, String), String>,
    unavailable: bool,
}

impl MockResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, content_type: ContentType, name: &str, id: &str) -> Self {
        self.known
            .insert((content_type, name.to_string()), id.to_string());
        self
    }

    /// Every lookup fails as if the site were unreachable
    pub fn unavailable() -> Self {
        Self {
            unavailable: true,
            ..Self::default()
        }
    }
}

#[async_trait]
impl ResourceResolver for MockResolver {
    async fn resolve_name_to_id(
        &self,
        content_type: ContentType,
        name: &str,
        _scope: Option<&str>,
    ) -> Result<String, ResolveError> {
        if self.unavailable {
            return Err(ResolveError::Unavailable("mock resolver offline".into()));
        }
        self.known
            .get(&(content_type, name.to_string()))
            .cloned()
            .ok_or_else(|| ResolveError::NotFound {
                content_type,
                name: name.to_string(),
            })
    }
}

/// Language model returning a canned completion and recording prompts
pub struct MockLanguageModel {
    response: Option<String>,
    prompts: Mutex<Vec<String>>,
}

impl MockLanguageModel {
    pub fn responding(response: &str) -> Self {
        Self {
            response: Some(response.to_string()),
            prompts: Mutex::new(Vec::new()),
        }
    }

    pub fn failing() -> Self {
        Self {
            response: None,
            prompts: Mutex::new(Vec::new()),
        }
    }

    pub fn prompts(&self) -> Vec<String> {
        locked(&self.prompts).clone()
    }
}

#[async_trait]
impl LanguageModel for MockLanguageModel {
    async fn complete(&self, prompt: &str) -> Result<String> {
        locked(&self.prompts).push(prompt.to_string());
        self.response
            .clone()
            .ok_or_else(|| anyhow::anyhow!("model endpoint unavailable"))
    }
}

/// Confirmation channel answering with a fixed decision
pub struct RecordingConfirmation {
    decision: ConfirmationDecision,
    requests: Mutex<Vec<PlanSummary>>,
}

impl RecordingConfirmation {
    pub fn new(decision: ConfirmationDecision) -> Self {
        Self {
            decision,
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn requests(&self) -> Vec<PlanSummary> {
        locked(&self.requests).clone()
    }
}

#[async_trait]
impl ConfirmationChannel for RecordingConfirmation {
    async fn request_confirmation(&self, summary: &PlanSummary) -> ConfirmationDecision {
        locked(&self.requests).push(summary.clone());
        self.decision
    }
}
