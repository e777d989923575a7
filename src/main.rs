use std::{
    fs::File,
    io::{self, Read},
    path::PathBuf,
};

use anyhow::{anyhow, Result};
use clap::Parser;
use is_terminal::IsTerminal;
use lambda_runner::{
    loader, logs::DEFAULT_LOG_CAPACITY, samples, ContextOptions, HandlerRegistry, HarnessError,
    Invocation, InvocationParams,
};
use tracing_subscriber::EnvFilter;

/// Local harness which runs a registered handler against a JSON event, the way
/// the function platform would invoke it.
#[derive(Parser)]
#[clap(version)]
struct Opts {
    /// Handler to invoke, in the format MODULE.SYMBOL
    #[clap(required_unless_present = "list")]
    handler: Option<String>,

    /// Ignored; keeps the positional arguments in their historical order
    #[clap(hide = true)]
    event: Option<String>,

    /// Function name exposed through the context
    function_name: Option<String>,

    /// Memory limit in MB exposed through the context
    memory_limit_in_mb: Option<u32>,

    /// Timeout in seconds used for the remaining time budget
    timeout: Option<u64>,

    /// Path to a JSON file containing the event. Reads stdin when omitted
    #[clap(short, long)]
    input: Option<PathBuf>,

    /// Print a JSON report instead of the framed outcome line
    #[clap(short, long)]
    json: bool,

    /// List the registered handlers and exit
    #[clap(long)]
    list: bool,

    #[clap(long, env = "LAMBDA_RUNNER_REGION", default_value = "us-east-1")]
    region: String,

    #[clap(long, env = "LAMBDA_RUNNER_ACCOUNT_ID", default_value = "123456789012")]
    account_id: String,

    #[clap(long, env = "LAMBDA_RUNNER_FUNCTION_VERSION", default_value = "$LATEST")]
    function_version: String,

    /// Exit as soon as the handler completes instead of waiting for its
    /// background work
    #[clap(long)]
    no_wait_for_empty_event_loop: bool,

    /// Maximum bytes kept from the context logger
    #[clap(long, default_value_t = DEFAULT_LOG_CAPACITY)]
    log_capacity: usize,
}

impl Opts {
    fn params(&self) -> InvocationParams {
        InvocationParams {
            function_name: self.function_name.clone(),
            memory_limit_in_mb: self.memory_limit_in_mb,
            timeout_seconds: self.timeout,
        }
    }

    fn context_options(&self) -> ContextOptions {
        ContextOptions {
            region: self.region.clone(),
            account_id: self.account_id.clone(),
            function_version: self.function_version.clone(),
            callback_waits_for_empty_event_loop: !self.no_wait_for_empty_event_loop,
            log_capacity: self.log_capacity,
        }
    }

    fn input(&self) -> Result<Box<dyn Read>> {
        if let Some(path) = &self.input {
            let file = File::open(path)
                .map_err(|e| anyhow!("Couldn't load input {:?}: {}", path, e))?;
            Ok(Box::new(file))
        } else if !io::stdin().is_terminal() {
            Ok(Box::new(io::stdin()))
        } else {
            Err(HarnessError::MissingInput.into())
        }
    }
}

fn list(registry: &HandlerRegistry) {
    for (reference, arity) in registry.references() {
        println!("{reference} ({arity} arguments)");
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(io::stderr)
        .with_target(false)
        .without_time()
        .init();

    let opts: Opts = Opts::parse();
    let registry = samples::registry();

    let Some(handler) = opts.handler.as_deref().filter(|_| !opts.list) else {
        list(&registry);
        return Ok(());
    };

    let request = loader::load(opts.input()?, handler, opts.params())?;
    let shape = registry.resolve(&request.handler)?;

    let mut invocation = Invocation::dispatch(shape, request, &opts.context_options());
    if let Some(result) = invocation.wait_for_completion().await {
        if !opts.json {
            println!("{result}");
        }
    }

    if let Some(result) = invocation.settle().await {
        if opts.json {
            println!("{}", result.to_json());
        } else if !result.logs.is_empty() {
            if io::stderr().is_terminal() {
                eprintln!("{}", result.logs_banner());
            } else {
                eprint!("{}", result.logs);
            }
        }
    }

    Ok(())
}
