use colored::Colorize;
use serde::{Deserialize, Serialize};
use std::{fmt, time::Duration};

use crate::completion::CompletionSignal;

/// The single reported outcome of an invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InvocationResult {
    pub name: Option<String>,
    pub request_id: String,
    pub handler: String,
    pub runtime: Duration,
    pub logs: String,
    pub outcome: CompletionSignal,
}

impl InvocationResult {
    pub fn new(
        name: Option<String>,
        request_id: String,
        handler: String,
        runtime: Duration,
        logs: String,
        outcome: CompletionSignal,
    ) -> Self {
        InvocationResult {
            name,
            request_id,
            handler,
            runtime,
            logs,
            outcome,
        }
    }

    /// Single-line JSON report.
    pub fn to_json(&self) -> String {
        serde_json::to_string(&self).unwrap_or_else(|error| error.to_string())
    }

    /// The captured context logs under a banner, for a terminal.
    pub fn logs_banner(&self) -> String {
        format!(
            "{}\n\n{}",
            "            Logs             ".black().on_bright_blue(),
            self.logs
        )
    }
}

/// The framed `output:` / `fail:` line.
impl fmt::Display for InvocationResult {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn result(outcome: CompletionSignal) -> InvocationResult {
        InvocationResult::new(
            Some("hello".to_string()),
            "request".to_string(),
            "samples.hello".to_string(),
            Duration::from_millis(3),
            "loading\n".to_string(),
            outcome,
        )
    }

    #[test]
    fn test_display_is_outcome_line() {
        assert_eq!(
            result(CompletionSignal::success("value1")).to_string(),
            "output: value1"
        );
        assert_eq!(
            result(CompletionSignal::failure("boom")).to_string(),
            "fail: boom"
        );
    }

    #[test]
    fn test_json_report_is_one_line() {
        let report = result(CompletionSignal::success(json!({"a": [1, 2]}))).to_json();
        assert!(!report.contains('\n'));

        let parsed: InvocationResult = serde_json::from_str(&report).unwrap();
        assert_eq!(parsed.outcome, CompletionSignal::Success(json!({"a": [1, 2]})));
        assert_eq!(parsed.logs, "loading\n");
    }
}
