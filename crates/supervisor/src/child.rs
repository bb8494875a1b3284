use std::time::Duration;

use serde_json::Value;

use crate::registry::{TargetOutcomeErr, TargetRegistry};
use crate::retry::{run_retry_loop, ChildOutcome, RetryPolicy};

/// Everything a supervised child needs to run its target and report back,
/// carried across the `std::process::Command` boundary on the command line
/// by whichever binary embeds [`run`] (see `services/worker`).
pub struct ChildConfig {
    pub target_name: String,
    pub args: Value,
    pub kwargs: Value,
    pub server_addr: Option<String>,
    pub result_addr: String,
    pub retry_for: Vec<String>,
    pub retry_delay: Duration,
    pub max_retries: Option<u32>,
    pub retry_args: Option<Value>,
    pub retry_kwargs: Option<Value>,
}

/// Runs the retry loop for a supervised target to completion and reports
/// the outcome over the parent's result socket, then exits the process.
///
/// This is the Rust counterpart of `zproc/child.py`'s `child_process`: no
/// caller of this function ever sees it return, since the whole point is
/// that the OS exit code is the signal the parent's `wait()` reads first.
pub async fn run(config: ChildConfig, registry: &TargetRegistry) -> ! {
    let Some(target) = registry.get(&config.target_name) else {
        eprintln!("no supervised target registered under {:?}", config.target_name);
        std::process::exit(70);
    };

    let policy = RetryPolicy {
        retry_for: config.retry_for,
        retry_delay: config.retry_delay,
        max_retries: config.max_retries,
        retry_args: config.retry_args,
        retry_kwargs: config.retry_kwargs,
    };

    let outcome =
        run_retry_loop(target, config.args, config.kwargs, config.server_addr, &policy).await;

    match outcome {
        Ok(ChildOutcome::Returned(value)) => {
            report(&config.result_addr, &value).await;
            std::process::exit(0);
        }
        Ok(ChildOutcome::Exited(code)) => {
            report(&config.result_addr, &Value::Null).await;
            std::process::exit(code);
        }
        Err(TargetOutcomeErr::ProcessExit(code)) => {
            report(&config.result_addr, &Value::Null).await;
            std::process::exit(code);
        }
        Err(TargetOutcomeErr::Failure { kind, message }) => {
            eprintln!("supervised target failed permanently: {kind}: {message}");
            std::process::exit(1);
        }
    }
}

async fn report(result_addr: &str, value: &Value) {
    match tokio::net::TcpStream::connect(result_addr).await {
        Ok(mut stream) => {
            if let Err(e) = transport::write_frame(&mut stream, value).await {
                eprintln!("failed to report result to {result_addr}: {e}");
            }
        }
        Err(e) => eprintln!("failed to connect to result socket {result_addr}: {e}"),
    }
}
