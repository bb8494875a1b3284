mod ops;
mod targets;

use std::env;
use std::time::Duration;

use client::Client;
use engine::map_plus;
use proto::{
    error_codes, RemoteException, ResultReply, ResultRequest, ServerMeta, TaskResult, WorkItem,
    WorkMessage,
};
use serde_json::Value;
use supervisor::ChildConfig;
use tokio::net::TcpStream;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;
use transport::{client_handshake, read_frame, RrConnection};

#[tokio::main]
async fn main() {
    let log_level = env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_owned());
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_new(&log_level).unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    if env::var("ZPROC_CHILD_TARGET").is_ok() {
        run_supervised_child().await;
        return;
    }

    let server_addr = env::var("ZPROC_SERVER_ADDRESS").expect("ZPROC_SERVER_ADDRESS must be set");
    let secret = env::var("ZPROC_SIGNING_KEY").expect("ZPROC_SIGNING_KEY must be set");

    info!(server_addr, "worker starting");
    if let Err(e) = run_task_worker(&server_addr, &secret).await {
        warn!(error = %e, "worker exiting after a connection error");
        std::process::exit(1);
    }
}

/// Pulls `WorkItem`s off the Task Proxy's worker-pull endpoint until a
/// `Shutdown` sentinel arrives, grounded on `zproc/task/worker.py`'s
/// `worker_process` loop.
async fn run_task_worker(server_addr: &str, secret: &str) -> Result<(), proto::ZprocError> {
    let meta = fetch_server_meta(server_addr, secret).await?;
    let registry = ops::builtin_registry();

    let mut task_stream = TcpStream::connect(&meta.task_proxy_out)
        .await
        .map_err(|e| proto::ZprocError::Connection(e.to_string()))?;
    let mut result_conn = RrConnection::connect(&meta.task_result_pull)
        .await
        .map_err(|e| proto::ZprocError::Connection(e.to_string()))?;
    client_handshake(&mut result_conn, secret)
        .await
        .map_err(|e| proto::ZprocError::Connection(e.to_string()))?;

    loop {
        let msg: WorkMessage = match read_frame(&mut task_stream).await {
            Ok(msg) => msg,
            Err(transport::FramingError::Closed) => {
                info!("task proxy connection closed, exiting");
                return Ok(());
            }
            Err(e) => return Err(proto::ZprocError::Connection(e.to_string())),
        };

        match msg {
            WorkMessage::Shutdown => {
                info!("received shutdown sentinel, exiting");
                return Ok(());
            }
            WorkMessage::Item(item) => {
                let chunk_id = item.chunk_id.clone();
                let result = execute_item(&registry, server_addr, secret, item).await;
                let _reply: ResultReply = result_conn
                    .call(&ResultRequest::Deliver { chunk_id, result })
                    .await
                    .map_err(|e| proto::ZprocError::Connection(e.to_string()))?;
            }
        }
    }
}

async fn fetch_server_meta(server_addr: &str, secret: &str) -> Result<ServerMeta, proto::ZprocError> {
    // The bootstrap namespace here is never touched; it only exists because
    // `Client::connect` needs one to construct a dict-mimic facade we throw
    // away immediately after reading `server_meta()`.
    let bootstrap = Client::connect(server_addr, secret, "__worker_bootstrap__").await?;
    Ok(bootstrap.server_meta().clone())
}

/// Runs one dispatched item to completion, looking up its op, optionally
/// fetching a state snapshot for `pass_state`, and routing through
/// `map_plus` when any map input is present.
///
/// Workers never get live mutable access to the State Server's map the way
/// an atomic op on the server does — fetching a snapshot via
/// [`Client::get_state`] is a deliberate simplification of `pass_state`;
/// mutations a task makes to the passed-in map are local to the worker and
/// are not written back. A task that needs to mutate shared state should
/// call back into an atomic op instead.
async fn execute_item(
    registry: &engine::OpRegistry,
    server_addr: &str,
    secret: &str,
    item: WorkItem,
) -> TaskResult {
    let Some(op) = registry.get(&item.op) else {
        return TaskResult::Error(RemoteException::new(
            error_codes::UNKNOWN_OP,
            format!("no task op registered under {:?}", item.op),
        ));
    };

    let mut state = if item.params.pass_state {
        match Client::connect(server_addr, secret, item.params.namespace.clone()).await {
            Ok(mut c) => match c.get_state().await {
                Ok(s) => Some(s),
                Err(e) => return TaskResult::Error(remote_exception_for(&e)),
            },
            Err(e) => return TaskResult::Error(remote_exception_for(&e)),
        }
    } else {
        None
    };

    let has_map_input =
        item.params.map_iter.is_some() || item.params.map_args.is_some() || item.params.map_kwargs.is_some();

    if has_map_input {
        match map_plus(
            op,
            item.params.map_iter.as_deref(),
            item.params.map_args.as_deref(),
            &item.params.args,
            item.params.map_kwargs.as_deref(),
            &item.params.kwargs,
            state.as_mut(),
        ) {
            Ok(items) => TaskResult::Items(items),
            Err(e) => TaskResult::Error(e),
        }
    } else {
        match op.call(&item.params.args, &item.params.kwargs, state.as_mut()) {
            Ok(value) => TaskResult::Scalar(value),
            Err(e) => TaskResult::Error(e),
        }
    }
}

fn remote_exception_for(e: &proto::ZprocError) -> RemoteException {
    RemoteException::new(error_codes::PROTOCOL_ERROR, e.to_string())
}

/// Re-exec entry point: this binary also serves as the generic process a
/// [`supervisor::spawn`] caller launches, dispatching by `target_name`
/// instead of running the task-worker loop. Configuration arrives entirely
/// through environment variables since the parent controls the child's
/// `Command` directly.
async fn run_supervised_child() -> ! {
    let target_name = env::var("ZPROC_CHILD_TARGET").expect("ZPROC_CHILD_TARGET must be set");
    let result_addr = env::var("ZPROC_CHILD_RESULT_ADDR").expect("ZPROC_CHILD_RESULT_ADDR must be set");
    let server_addr = env::var("ZPROC_SERVER_ADDRESS").ok();

    let args = parse_json_env("ZPROC_CHILD_ARGS").unwrap_or(Value::Null);
    let kwargs = parse_json_env("ZPROC_CHILD_KWARGS").unwrap_or(Value::Null);
    let retry_args = parse_json_env("ZPROC_CHILD_RETRY_ARGS");
    let retry_kwargs = parse_json_env("ZPROC_CHILD_RETRY_KWARGS");

    let retry_for: Vec<String> = env::var("ZPROC_CHILD_RETRY_FOR")
        .unwrap_or_default()
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_owned)
        .collect();
    let retry_delay_ms: u64 = env::var("ZPROC_CHILD_RETRY_DELAY_MS")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(0);
    let max_retries: Option<u32> = env::var("ZPROC_CHILD_MAX_RETRIES").ok().and_then(|s| s.parse().ok());

    debug!(target_name, "running as a supervised child process");

    let config = ChildConfig {
        target_name,
        args,
        kwargs,
        server_addr,
        result_addr,
        retry_for,
        retry_delay: Duration::from_millis(retry_delay_ms),
        max_retries,
        retry_args,
        retry_kwargs,
    };

    let registry = targets::builtin_registry();
    supervisor::run_child(config, &registry).await
}

fn parse_json_env(name: &str) -> Option<Value> {
    env::var(name).ok().and_then(|s| serde_json::from_str(&s).ok())
}
