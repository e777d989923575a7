//! The at-most-once completion channel shared by every completion path.

use std::{
    fmt,
    sync::{Arc, Mutex, PoisonError},
};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::oneshot;
use tracing::warn;

use crate::error::ProtocolViolation;

/// The outcome of an invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", content = "value", rename_all = "snake_case")]
pub enum CompletionSignal {
    Success(Value),
    Failure(String),
}

impl CompletionSignal {
    /// A success carrying `value`, or a failure if it does not serialize.
    pub fn success<T: Serialize>(value: T) -> Self {
        match serde_json::to_value(value) {
            Ok(value) => Self::Success(value),
            Err(e) => Self::Failure(format!("Couldn't serialize handler output: {e}")),
        }
    }

    /// A failure described by `error`, including its cause chain when the
    /// error carries one.
    pub fn failure(error: impl fmt::Display) -> Self {
        Self::Failure(format!("{error:#}"))
    }
}

/// Renders the framed outcome line, without the trailing newline.
///
/// Single-line strings are written raw. Strings spanning several lines are
/// written as escaped JSON strings so the outcome stays on one line, and any
/// other value is written as compact JSON.
impl fmt::Display for CompletionSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Success(Value::String(text)) => write!(f, "output: {}", OneLine(text)),
            Self::Success(value) => write!(f, "output: {value}"),
            Self::Failure(error) => write!(f, "fail: {}", OneLine(error)),
        }
    }
}

struct OneLine<'a>(&'a str);

impl fmt::Display for OneLine<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.contains(['\n', '\r']) {
            write!(f, "{}", Value::from(self.0))
        } else {
            f.write_str(self.0)
        }
    }
}

/// Write side of the channel. Clones share a single slot; the first
/// [`complete`](Self::complete) takes it and every later call is a
/// [`ProtocolViolation::DuplicateCompletion`].
#[derive(Debug, Clone)]
pub(crate) struct CompletionSender {
    slot: Arc<Mutex<Option<oneshot::Sender<CompletionSignal>>>>,
}

impl CompletionSender {
    pub(crate) fn complete(&self, signal: CompletionSignal) -> Result<(), ProtocolViolation> {
        let sender = self
            .slot
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();

        // A closed receiver means the engine already settled on another outcome.
        match sender.map(|sender| sender.send(signal)) {
            Some(Ok(())) => Ok(()),
            Some(Err(_)) | None => {
                let violation = ProtocolViolation::DuplicateCompletion;
                warn!(%violation);
                Err(violation)
            }
        }
    }
}

pub(crate) type CompletionReceiver = oneshot::Receiver<CompletionSignal>;

pub(crate) fn channel() -> (CompletionSender, CompletionReceiver) {
    let (sender, receiver) = oneshot::channel();
    let sender = CompletionSender {
        slot: Arc::new(Mutex::new(Some(sender))),
    };
    (sender, receiver)
}

/// The completion callback handed to three-argument handlers.
#[derive(Debug, Clone)]
pub struct Done {
    sender: CompletionSender,
}

impl Done {
    pub(crate) fn new(sender: CompletionSender) -> Self {
        Self { sender }
    }

    /// Signals completion: `Err` is a failure, `Ok` a success.
    pub fn call<T, E>(&self, result: Result<T, E>)
    where
        T: Serialize,
        E: fmt::Display,
    {
        let signal = match result {
            Ok(value) => CompletionSignal::success(value),
            Err(error) => CompletionSignal::failure(error),
        };
        let _ = self.sender.complete(signal);
    }

    pub fn ok<T: Serialize>(&self, value: T) {
        let _ = self.sender.complete(CompletionSignal::success(value));
    }

    pub fn err(&self, error: impl fmt::Display) {
        let _ = self.sender.complete(CompletionSignal::failure(error));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_render_string_success_raw() {
        assert_eq!(CompletionSignal::success("ok").to_string(), "output: ok");
    }

    #[test]
    fn test_render_object_success_compact() {
        let signal = CompletionSignal::success(json!({"ok": true}));
        assert_eq!(signal.to_string(), r#"output: {"ok":true}"#);
    }

    #[test]
    fn test_render_failure() {
        assert_eq!(CompletionSignal::failure("boom").to_string(), "fail: boom");
    }

    #[test]
    fn test_render_multiline_stays_on_one_line() {
        let success = CompletionSignal::success("line1\nline2").to_string();
        assert_eq!(success, r#"output: "line1\nline2""#);
        assert_eq!(success.lines().count(), 1);

        let failure = CompletionSignal::failure("first\r\nsecond").to_string();
        assert_eq!(failure, r#"fail: "first\r\nsecond""#);
        assert_eq!(failure.lines().count(), 1);
    }

    #[test]
    fn test_failure_keeps_cause_chain() {
        let error = anyhow::anyhow!("root cause").context("outer");
        assert_eq!(
            CompletionSignal::failure(error).to_string(),
            "fail: outer: root cause"
        );

        let (sender, mut receiver) = channel();
        Done::new(sender).call(Err::<(), _>(anyhow::anyhow!("root cause").context("outer")));
        assert_eq!(
            receiver.try_recv().unwrap(),
            CompletionSignal::Failure("outer: root cause".to_string())
        );
    }

    #[test]
    fn test_first_signal_wins() {
        let (sender, mut receiver) = channel();
        let other = sender.clone();

        assert!(sender.complete(CompletionSignal::success("first")).is_ok());
        assert_eq!(
            other.complete(CompletionSignal::failure("second")),
            Err(ProtocolViolation::DuplicateCompletion)
        );
        assert_eq!(receiver.try_recv().unwrap(), CompletionSignal::success("first"));
    }

    #[test]
    fn test_dropping_every_sender_closes_channel() {
        let (sender, mut receiver) = channel();
        let done = Done::new(sender.clone());
        drop(sender);
        drop(done);

        assert!(matches!(
            receiver.try_recv(),
            Err(oneshot::error::TryRecvError::Closed)
        ));
    }

    #[test]
    fn test_done_call() {
        let (sender, mut receiver) = channel();
        Done::new(sender).call(Err::<(), _>(anyhow::anyhow!("x")));
        assert_eq!(receiver.try_recv().unwrap(), CompletionSignal::failure("x"));

        let (sender, mut receiver) = channel();
        Done::new(sender).call(Ok::<_, String>(json!({"ok": true})));
        assert_eq!(
            receiver.try_recv().unwrap(),
            CompletionSignal::Success(json!({"ok": true}))
        );
    }

    #[test]
    fn test_signal_json_shape() {
        let json = serde_json::to_value(CompletionSignal::failure("boom")).unwrap();
        assert_eq!(json, json!({"status": "failure", "value": "boom"}));
    }
}
