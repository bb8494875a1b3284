use std::env;

use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    let log_level = env::var("ZPROC_LOG_LEVEL").unwrap_or_else(|_| "info".to_owned());
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_new(&log_level).unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let secret = env::var("ZPROC_SIGNING_KEY").expect("ZPROC_SIGNING_KEY must be set");
    let bind_addr = env::var("ZPROC_BIND_ADDR").unwrap_or_else(|_| "127.0.0.1:5670".to_owned());
    let http_addr = env::var("ZPROC_HTTP_ADDR").unwrap_or_else(|_| "127.0.0.1:5680".to_owned());

    let atomic_ops = server::ops::builtin_registry();
    let meta = server::bootstrap(secret, &bind_addr, atomic_ops).await.expect("failed to bind server endpoints");

    info!(
        state_router = %meta.state_router,
        watcher_router = %meta.watcher_router,
        task_proxy_in = %meta.task_proxy_in,
        task_proxy_out = %meta.task_proxy_out,
        task_result_pull = %meta.task_result_pull,
        "server starting"
    );

    let http_listener = tokio::net::TcpListener::bind(&http_addr).await.expect("failed to bind http endpoint");
    info!(addr = %http_addr, "healthz listening");
    tokio::spawn(async move {
        axum::serve(http_listener, server::build_router()).await.expect("http server error");
    });

    shutdown_signal().await;
    info!("server shut down gracefully");
}

/// Resolves once either signal fires, so the caller can tear down the
/// listeners and worker connections before the process exits.
async fn shutdown_signal() {
    use tokio::signal;

    let sigint = async {
        signal::ctrl_c().await.expect("failed to install SIGINT handler");
        info!("caught SIGINT");
    };

    #[cfg(unix)]
    let sigterm = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
        info!("caught SIGTERM");
    };

    #[cfg(not(unix))]
    let sigterm = std::future::pending::<()>();

    tokio::select! {
        () = sigint => {},
        () = sigterm => {},
    }
}
