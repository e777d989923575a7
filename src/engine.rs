use std::{
    any::Any,
    sync::{Arc, PoisonError},
};

use tokio::{
    sync::oneshot::error::RecvError,
    task::{JoinError, JoinHandle},
    time::Instant,
};
use tokio_util::task::TaskTracker;
use tracing::{debug, warn};

use crate::{
    completion::{self, CompletionReceiver, CompletionSignal},
    context::{ContextMetadata, ContextOptions, InvocationContext},
    error::{HarnessResult, ProtocolViolation},
    invocation_result::InvocationResult,
    loader::{HandlerReference, InvocationRequest},
    logs::SharedLogStream,
    registry::{HandlerRegistry, HandlerShape},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvocationState {
    Constructed,
    Dispatched,
    Completed,
}

/// One dispatched handler call and the means to observe its outcome.
///
/// The engine holds no completion handle of its own, so once the handler and
/// everything it spawned have dropped their context the invocation is known
/// never to complete.
#[derive(Debug)]
pub struct Invocation {
    state: InvocationState,
    handler: HandlerReference,
    metadata: Arc<ContextMetadata>,
    started_at: Instant,
    task: Option<JoinHandle<()>>,
    receiver: CompletionReceiver,
    tracker: TaskTracker,
    logs: SharedLogStream,
    result: Option<InvocationResult>,
}

enum Wake {
    Signaled(Result<CompletionSignal, RecvError>),
    Returned(Result<(), JoinError>),
}

impl Invocation {
    /// Builds the context and starts `shape` on it. Must run inside a tokio
    /// runtime.
    pub fn dispatch(
        shape: &HandlerShape,
        request: InvocationRequest,
        options: &ContextOptions,
    ) -> Self {
        let (sender, receiver) = completion::channel();
        let context = InvocationContext::new(&request.params, options, sender);
        let mut invocation = Self {
            state: InvocationState::Constructed,
            handler: request.handler,
            metadata: context.shared_metadata(),
            started_at: context.started_at(),
            task: None,
            receiver,
            tracker: context.tracker().clone(),
            logs: context.log_stream().clone(),
            result: None,
        };

        let completion = context.completion().clone();
        let future = shape.call(request.event, context);
        invocation.task = Some(tokio::spawn(async move {
            if let Err(error) = future.await {
                let _ = completion.complete(CompletionSignal::failure(error));
            }
        }));
        invocation.transition(InvocationState::Dispatched);

        invocation
    }

    pub fn state(&self) -> InvocationState {
        self.state
    }

    pub fn metadata(&self) -> &ContextMetadata {
        &self.metadata
    }

    /// Waits for the first completion signal.
    ///
    /// Returns `None` if every completion handle was dropped without one. A
    /// handler panic with no earlier signal counts as a failure. Calling this
    /// again returns the same result.
    pub async fn wait_for_completion(&mut self) -> Option<InvocationResult> {
        if self.state == InvocationState::Completed {
            return self.result.clone();
        }

        let wake = match self.task.as_mut() {
            Some(task) => tokio::select! {
                biased;
                signal = &mut self.receiver => Wake::Signaled(signal),
                joined = task => Wake::Returned(joined),
            },
            None => Wake::Signaled((&mut self.receiver).await),
        };

        let signal = match wake {
            Wake::Signaled(Ok(signal)) => Some(signal),
            // Every handle is gone. A panicking handler drops its handles while
            // unwinding, so the task outcome decides between panic and silence.
            Wake::Signaled(Err(_)) => match self.task.take() {
                Some(task) => task
                    .await
                    .err()
                    .map(|error| CompletionSignal::failure(join_error_message(error))),
                None => None,
            },
            // Work spawned through the context may still complete.
            Wake::Returned(Ok(())) => {
                self.task = None;
                (&mut self.receiver).await.ok()
            }
            Wake::Returned(Err(error)) => {
                self.task = None;
                match self.receiver.try_recv() {
                    Ok(signal) => Some(signal),
                    Err(_) => {
                        self.receiver.close();
                        Some(CompletionSignal::failure(join_error_message(error)))
                    }
                }
            }
        };

        self.transition(InvocationState::Completed);
        self.result = match signal {
            Some(outcome) => Some(InvocationResult::new(
                self.metadata.function_name.clone(),
                self.metadata.aws_request_id.clone(),
                self.handler.to_string(),
                self.started_at.elapsed(),
                self.captured_logs(),
                outcome,
            )),
            None => {
                let violation = ProtocolViolation::NeverCompleted;
                warn!(%violation, handler = %self.handler);
                None
            }
        };
        self.result.clone()
    }

    /// Lets outstanding work finish when the context waits for an empty event
    /// loop, otherwise abandons it.
    ///
    /// Returns the completed result with every log line written up to this
    /// point, including those from work that ran after completion.
    pub async fn settle(mut self) -> Option<InvocationResult> {
        self.tracker.close();

        if self.metadata.callback_waits_for_empty_event_loop {
            if let Some(task) = self.task.take() {
                if let Err(error) = task.await {
                    warn!(error = %join_error_message(error), "handler failed after completion");
                }
            }
            self.tracker.wait().await;
        } else {
            if let Some(task) = self.task.take() {
                task.abort();
            }
            debug!(pending = self.tracker.len(), "not waiting for pending work");
        }

        let logs = self.captured_logs();
        self.result.take().map(|mut result| {
            result.logs = logs;
            result
        })
    }

    fn captured_logs(&self) -> String {
        self.logs
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .to_string()
    }

    fn transition(&mut self, next: InvocationState) {
        debug!(
            request_id = %self.metadata.aws_request_id,
            handler = %self.handler,
            from = ?self.state,
            to = ?next,
            "invocation state"
        );
        self.state = next;
    }
}

/// Resolves, dispatches and settles one invocation.
pub async fn run(
    registry: &HandlerRegistry,
    request: InvocationRequest,
    options: &ContextOptions,
) -> HarnessResult<Option<InvocationResult>> {
    let shape = registry.resolve(&request.handler)?;
    let mut invocation = Invocation::dispatch(shape, request, options);
    invocation.wait_for_completion().await;
    Ok(invocation.settle().await)
}

fn join_error_message(error: JoinError) -> String {
    if !error.is_panic() {
        return error.to_string();
    }
    let payload = error.into_panic();
    format!("handler panicked: {}", panic_message(payload.as_ref()))
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message
    } else {
        "unknown panic payload"
    }
}
