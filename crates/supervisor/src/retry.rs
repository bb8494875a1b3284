use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;

use crate::registry::{TargetFn, TargetOutcomeErr};
use crate::signal::signal_kind_from_name;

/// Retry policy for a supervised target, ported from `zproc/child.py`'s
/// `target_wrapper`: `retry_for` names the exception kinds (and, on Unix,
/// signal names) that are caught and retried; anything else propagates and
/// ends the child with a non-zero exit.
pub struct RetryPolicy {
    pub retry_for: Vec<String>,
    pub retry_delay: Duration,
    pub max_retries: Option<u32>,
    pub retry_args: Option<Value>,
    pub retry_kwargs: Option<Value>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy {
            retry_for: Vec::new(),
            retry_delay: Duration::from_secs(0),
            max_retries: None,
            retry_args: None,
            retry_kwargs: None,
        }
    }
}

/// What the retry loop produced once the target stops being retried.
pub enum ChildOutcome {
    Returned(Value),
    Exited(i32),
}

/// Runs `target` on a blocking thread, racing it against the signals named
/// in `signal_names` so that a listed signal can be treated like any other
/// retryable failure. The blocking call cannot truly be cancelled if a
/// signal wins the race — the `spawn_blocking` task is left to finish on
/// its own thread, matching the reality that preempting foreign blocking
/// code is never free, async or not.
#[cfg(unix)]
async fn call_with_signal_interrupt(
    target: Arc<TargetFn>,
    args: Value,
    kwargs: Value,
    server_addr: Option<String>,
    signal_names: &[String],
) -> Result<Value, TargetOutcomeErr> {
    use tokio::sync::mpsc;

    let (sig_tx, mut sig_rx) = mpsc::unbounded_channel::<String>();
    for name in signal_names {
        if let Some(kind) = signal_kind_from_name(name) {
            if let Ok(mut stream) = tokio::signal::unix::signal(kind) {
                let tx = sig_tx.clone();
                let name = name.clone();
                tokio::spawn(async move {
                    stream.recv().await;
                    let _ = tx.send(name);
                });
            }
        }
    }
    drop(sig_tx);

    let call = tokio::task::spawn_blocking(move || (target)(&args, &kwargs, server_addr.as_deref()));

    tokio::select! {
        joined = call => joined.unwrap_or_else(|e| Err(TargetOutcomeErr::Failure {
            kind: "JoinError".into(),
            message: e.to_string(),
        })),
        Some(name) = sig_rx.recv() => Err(TargetOutcomeErr::Failure {
            kind: name,
            message: "signal received".into(),
        }),
    }
}

#[cfg(not(unix))]
async fn call_with_signal_interrupt(
    target: Arc<TargetFn>,
    args: Value,
    kwargs: Value,
    server_addr: Option<String>,
    _signal_names: &[String],
) -> Result<Value, TargetOutcomeErr> {
    tokio::task::spawn_blocking(move || (target)(&args, &kwargs, server_addr.as_deref()))
        .await
        .unwrap_or_else(|e| Err(TargetOutcomeErr::Failure { kind: "JoinError".into(), message: e.to_string() }))
}

/// The retry loop itself. `retries` is pre-incremented before each attempt
/// (so the first attempt is retry number 1), matching `target_wrapper`'s
/// counter so `max_retries` bounds the number of *extra* attempts after the
/// first.
pub async fn run_retry_loop(
    target: Arc<TargetFn>,
    mut args: Value,
    mut kwargs: Value,
    server_addr: Option<String>,
    policy: &RetryPolicy,
) -> Result<ChildOutcome, TargetOutcomeErr> {
    let mut retries: u32 = 0;
    loop {
        retries += 1;
        match call_with_signal_interrupt(
            Arc::clone(&target),
            args.clone(),
            kwargs.clone(),
            server_addr.clone(),
            &policy.retry_for,
        )
        .await
        {
            Ok(value) => return Ok(ChildOutcome::Returned(value)),
            Err(TargetOutcomeErr::ProcessExit(code)) => return Ok(ChildOutcome::Exited(code)),
            Err(TargetOutcomeErr::Failure { kind, message }) => {
                if !policy.retry_for.iter().any(|k| k == &kind) {
                    return Err(TargetOutcomeErr::Failure { kind, message });
                }
                if let Some(max) = policy.max_retries {
                    if retries > max {
                        return Err(TargetOutcomeErr::Failure { kind, message });
                    }
                }
                tracing::error!(kind = %kind, %message, retries, "supervised target failed, retrying");
                tokio::time::sleep(policy.retry_delay).await;
                if let Some(ra) = &policy.retry_args {
                    args = ra.clone();
                }
                if let Some(rk) = &policy.retry_kwargs {
                    kwargs = rk.clone();
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn succeeds_without_retrying_when_target_returns_ok() {
        let target: Arc<TargetFn> = Arc::new(|args, _kwargs, _addr| Ok(args.clone()));
        let policy = RetryPolicy::default();
        let outcome = run_retry_loop(target, json!([1]), json!({}), None, &policy).await;
        assert!(matches!(outcome, Ok(ChildOutcome::Returned(v)) if v == json!([1])));
    }

    #[tokio::test]
    async fn retries_until_success_when_kind_is_listed() {
        let attempts = Arc::new(AtomicU32::new(0));
        let target: Arc<TargetFn> = {
            let attempts = Arc::clone(&attempts);
            Arc::new(move |_args, _kwargs, _addr| {
                let n = attempts.fetch_add(1, Ordering::SeqCst);
                if n < 2 {
                    Err(TargetOutcomeErr::Failure { kind: "Flaky".into(), message: "not yet".into() })
                } else {
                    Ok(json!("done"))
                }
            })
        };
        let policy = RetryPolicy { retry_for: vec!["Flaky".into()], max_retries: Some(5), ..RetryPolicy::default() };
        let outcome = run_retry_loop(target, json!([]), json!({}), None, &policy).await;
        assert!(matches!(outcome, Ok(ChildOutcome::Returned(v)) if v == json!("done")));
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn unretryable_kind_propagates_immediately() {
        let target: Arc<TargetFn> =
            Arc::new(|_args, _kwargs, _addr| Err(TargetOutcomeErr::Failure { kind: "Fatal".into(), message: "nope".into() }));
        let policy = RetryPolicy { retry_for: vec!["Flaky".into()], ..RetryPolicy::default() };
        let outcome = run_retry_loop(target, json!([]), json!({}), None, &policy).await;
        assert!(matches!(outcome, Err(TargetOutcomeErr::Failure { kind, .. }) if kind == "Fatal"));
    }

    #[tokio::test]
    async fn exhausting_max_retries_propagates_the_last_failure() {
        let target: Arc<TargetFn> =
            Arc::new(|_args, _kwargs, _addr| Err(TargetOutcomeErr::Failure { kind: "Flaky".into(), message: "still broken".into() }));
        let policy = RetryPolicy { retry_for: vec!["Flaky".into()], max_retries: Some(2), ..RetryPolicy::default() };
        let outcome = run_retry_loop(target, json!([]), json!({}), None, &policy).await;
        assert!(matches!(outcome, Err(TargetOutcomeErr::Failure { kind, .. }) if kind == "Flaky"));
    }

    #[tokio::test]
    async fn process_exit_short_circuits_without_retrying() {
        let attempts = Arc::new(AtomicU32::new(0));
        let target: Arc<TargetFn> = {
            let attempts = Arc::clone(&attempts);
            Arc::new(move |_args, _kwargs, _addr| {
                attempts.fetch_add(1, Ordering::SeqCst);
                Err(TargetOutcomeErr::ProcessExit(0))
            })
        };
        let policy = RetryPolicy { retry_for: vec!["ProcessExit".into()], ..RetryPolicy::default() };
        let outcome = run_retry_loop(target, json!([]), json!({}), None, &policy).await;
        assert!(matches!(outcome, Ok(ChildOutcome::Exited(0))));
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }
}
