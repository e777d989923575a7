//! Handlers compiled into the `lambda-runner` binary.

use std::time::Duration;

use anyhow::anyhow;
use serde_json::{json, Value};

use crate::{completion::Done, context::InvocationContext, registry::HandlerRegistry};

/// Greets `event.name`, or the world.
async fn hello(event: Value, context: InvocationContext) -> anyhow::Result<()> {
    let name = event["name"].as_str().unwrap_or("world");
    context.log(format!("greeting {name}"));
    context.succeed(format!("hello {name}"));
    Ok(())
}

async fn echo(event: Value, context: InvocationContext) -> anyhow::Result<()> {
    context.succeed(event);
    Ok(())
}

async fn fail(event: Value, context: InvocationContext) -> anyhow::Result<()> {
    context.fail(event["message"].as_str().unwrap_or("boom"));
    Ok(())
}

/// Reports what the handler can see of its context.
async fn describe(_event: Value, context: InvocationContext) -> anyhow::Result<()> {
    context.succeed(json!({
        "context": context.metadata(),
        "remainingTimeInMillis": context.remaining_time_in_millis(),
    }));
    Ok(())
}

/// Completes from background work after the handler has returned.
async fn deferred(event: Value, context: InvocationContext) -> anyhow::Result<()> {
    let delay = Duration::from_millis(event["delayMs"].as_u64().unwrap_or(10));
    let background = context.clone();
    context.spawn(async move {
        tokio::time::sleep(delay).await;
        background.succeed("deferred");
    });
    Ok(())
}

async fn error(_event: Value, _context: InvocationContext) -> anyhow::Result<()> {
    Err(anyhow!("handler raised an error"))
}

/// Returns without ever signaling completion.
async fn silent(_event: Value, _context: InvocationContext) -> anyhow::Result<()> {
    Ok(())
}

async fn callback_echo(event: Value, _context: InvocationContext, done: Done) -> anyhow::Result<()> {
    done.ok(event);
    Ok(())
}

async fn callback_fail(event: Value, _context: InvocationContext, done: Done) -> anyhow::Result<()> {
    let message = event["message"].as_str().unwrap_or("x").to_string();
    done.call(Err::<(), _>(anyhow!(message)));
    Ok(())
}

async fn callback_twice(_event: Value, _context: InvocationContext, done: Done) -> anyhow::Result<()> {
    done.ok("first");
    done.ok("second");
    Ok(())
}

pub fn registry() -> HandlerRegistry {
    let mut registry = HandlerRegistry::new();
    registry
        .register("samples", "hello", hello)
        .register("samples", "echo", echo)
        .register("samples", "fail", fail)
        .register("samples", "describe", describe)
        .register("samples", "deferred", deferred)
        .register("samples", "error", error)
        .register("samples", "silent", silent)
        .register("samples.callback", "echo", callback_echo)
        .register("samples.callback", "fail", callback_fail)
        .register("samples.callback", "twice", callback_twice);
    registry
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{engine, loader::InvocationParams, ContextOptions, InvocationRequest};

    async fn run(handler: &str, event: Value) -> Option<String> {
        let request = InvocationRequest {
            event,
            handler: handler.parse().unwrap(),
            params: InvocationParams {
                function_name: Some("samples".to_string()),
                memory_limit_in_mb: Some(256),
                timeout_seconds: Some(30),
            },
        };
        engine::run(&registry(), request, &ContextOptions::default())
            .await
            .unwrap()
            .map(|result| result.to_string())
    }

    #[tokio::test]
    async fn test_hello() {
        assert_eq!(
            run("samples.hello", json!({"name": "gordon"})).await.as_deref(),
            Some("output: hello gordon")
        );
    }

    #[tokio::test]
    async fn test_describe_reports_context() {
        let line = run("samples.describe", json!({})).await.unwrap();
        let json: Value = serde_json::from_str(line.strip_prefix("output: ").unwrap()).unwrap();

        assert_eq!(json["context"]["functionName"], "samples");
        assert_eq!(json["context"]["memoryLimitInMB"], 256);
        assert!(json["remainingTimeInMillis"].as_u64().unwrap() <= 30_000);
    }

    #[tokio::test]
    async fn test_callback_fail() {
        assert_eq!(
            run("samples.callback.fail", json!({"message": "x"})).await.as_deref(),
            Some("fail: x")
        );
    }

    #[test]
    fn test_every_sample_is_listed() {
        assert_eq!(registry().references().count(), 10);
    }
}
