//! The per-invocation context handed to handlers.

use std::{
    fmt,
    future::Future,
    sync::{Arc, Mutex},
    time::Duration,
};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::{task::JoinHandle, time::Instant};
use tokio_util::task::TaskTracker;
use uuid::Uuid;

use crate::{
    completion::{CompletionSender, CompletionSignal},
    loader::InvocationParams,
    logs::{ContextLogger, LogStream, SharedLogStream, DEFAULT_LOG_CAPACITY},
};

/// Platform identity settings shared by every invocation of a run.
#[derive(Debug, Clone)]
pub struct ContextOptions {
    pub region: String,
    pub account_id: String,
    pub function_version: String,
    /// Whether outstanding work is awaited after completion.
    pub callback_waits_for_empty_event_loop: bool,
    /// Byte budget for the context logger.
    pub log_capacity: usize,
}

impl Default for ContextOptions {
    fn default() -> Self {
        Self {
            region: "us-east-1".to_string(),
            account_id: "123456789012".to_string(),
            function_version: "$LATEST".to_string(),
            callback_waits_for_empty_event_loop: true,
            log_capacity: DEFAULT_LOG_CAPACITY,
        }
    }
}

/// Static identity fields, computed once when the context is built.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContextMetadata {
    pub function_name: Option<String>,
    pub function_version: String,
    #[serde(rename = "memoryLimitInMB")]
    pub memory_limit_in_mb: Option<u32>,
    pub timeout: Option<u64>,
    pub aws_request_id: String,
    pub log_group_name: String,
    pub log_stream_name: String,
    pub invoked_function_arn: String,
    pub identity: Option<Value>,
    pub client_context: Option<Value>,
    pub callback_waits_for_empty_event_loop: bool,
    pub started_at: DateTime<Utc>,
}

impl ContextMetadata {
    pub fn new(params: &InvocationParams, options: &ContextOptions) -> Self {
        let request_id = Uuid::new_v4();
        let started_at = Utc::now();
        let name = params.function_name.as_deref().unwrap_or_default();

        Self {
            function_name: params.function_name.clone(),
            function_version: options.function_version.clone(),
            memory_limit_in_mb: params.memory_limit_in_mb,
            timeout: params.timeout_seconds,
            aws_request_id: request_id.to_string(),
            log_group_name: format!("/aws/lambda/{name}"),
            log_stream_name: format!(
                "{}/[{}]{}",
                started_at.format("%Y/%m/%d"),
                options.function_version,
                request_id.simple()
            ),
            invoked_function_arn: format!(
                "arn:aws:lambda:{}:{}:function:{name}",
                options.region, options.account_id
            ),
            identity: None,
            client_context: None,
            callback_waits_for_empty_event_loop: options.callback_waits_for_empty_event_loop,
            started_at,
        }
    }

    /// The wall-clock instant the emulated timeout expires.
    pub fn deadline(&self) -> Option<DateTime<Utc>> {
        let timeout = chrono::TimeDelta::try_seconds(i64::try_from(self.timeout?).ok()?)?;
        self.started_at.checked_add_signed(timeout)
    }
}

/// What a handler sees of its invocation.
///
/// Clones refer to the same invocation: completing through any of them
/// completes the invocation, and only the first completion counts.
#[derive(Debug, Clone)]
pub struct InvocationContext {
    metadata: Arc<ContextMetadata>,
    started_at: Instant,
    completion: CompletionSender,
    tracker: TaskTracker,
    logs: SharedLogStream,
}

impl InvocationContext {
    pub(crate) fn new(
        params: &InvocationParams,
        options: &ContextOptions,
        completion: CompletionSender,
    ) -> Self {
        Self {
            metadata: Arc::new(ContextMetadata::new(params, options)),
            started_at: Instant::now(),
            completion,
            tracker: TaskTracker::new(),
            logs: Arc::new(Mutex::new(LogStream::with_capacity(options.log_capacity))),
        }
    }

    pub fn metadata(&self) -> &ContextMetadata {
        &self.metadata
    }

    pub fn function_name(&self) -> Option<&str> {
        self.metadata.function_name.as_deref()
    }

    pub fn memory_limit_in_mb(&self) -> Option<u32> {
        self.metadata.memory_limit_in_mb
    }

    pub fn aws_request_id(&self) -> &str {
        &self.metadata.aws_request_id
    }

    pub fn invoked_function_arn(&self) -> &str {
        &self.metadata.invoked_function_arn
    }

    /// Time left before the emulated timeout; zero once it has passed or when
    /// no timeout was given. Advisory only, nothing is cancelled at zero.
    pub fn remaining_time(&self) -> Duration {
        self.remaining_time_at(Instant::now())
    }

    pub fn remaining_time_in_millis(&self) -> u64 {
        u64::try_from(self.remaining_time().as_millis()).unwrap_or(u64::MAX)
    }

    fn remaining_time_at(&self, now: Instant) -> Duration {
        let Some(timeout) = self.metadata.timeout.map(Duration::from_secs) else {
            return Duration::ZERO;
        };
        timeout.saturating_sub(now.saturating_duration_since(self.started_at))
    }

    pub fn succeed<T: Serialize>(&self, value: T) {
        let _ = self.completion.complete(CompletionSignal::success(value));
    }

    pub fn fail(&self, error: impl fmt::Display) {
        let _ = self.completion.complete(CompletionSignal::failure(error));
    }

    /// Legacy combined form of [`succeed`](Self::succeed) and [`fail`](Self::fail).
    pub fn done<T, E>(&self, result: Result<T, E>)
    where
        T: Serialize,
        E: fmt::Display,
    {
        match result {
            Ok(value) => self.succeed(value),
            Err(error) => self.fail(error),
        }
    }

    /// Runs `future` as background work of this invocation. It counts as
    /// pending work when the context waits for an empty event loop.
    pub fn spawn<F>(&self, future: F) -> JoinHandle<F::Output>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        self.tracker.spawn(future)
    }

    pub fn log(&self, message: impl AsRef<str>) {
        self.logger().log(message);
    }

    pub fn logger(&self) -> ContextLogger {
        ContextLogger::new(self.logs.clone())
    }

    pub(crate) fn completion(&self) -> &CompletionSender {
        &self.completion
    }

    pub(crate) fn tracker(&self) -> &TaskTracker {
        &self.tracker
    }

    pub(crate) fn log_stream(&self) -> &SharedLogStream {
        &self.logs
    }

    pub(crate) fn shared_metadata(&self) -> Arc<ContextMetadata> {
        self.metadata.clone()
    }

    pub(crate) fn started_at(&self) -> Instant {
        self.started_at
    }
}
