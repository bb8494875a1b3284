pub mod ops;
mod rr_auth;

use std::sync::Arc;
use std::time::Instant;

use axum::routing::get;
use axum::Router;
use engine::{ChangeLog, OpRegistry, ResultHandle, StateHandle};
use proto::{
    ClientIdentity, DictMethod, ResultReply, ResultRequest, RrReply, RrRequest, ServerMeta,
    WatcherReply, WatcherRequest,
};
use tokio::net::TcpListener;

pub use rr_auth::serve_authenticated_rr;

/// Every long-running piece this process owns, handed to the four endpoint
/// loops in `main`.
pub struct Server {
    pub state: StateHandle,
    pub results: ResultHandle,
    pub changelog: Arc<ChangeLog>,
}

impl Server {
    #[must_use]
    pub fn new(meta: ServerMeta, atomic_ops: OpRegistry) -> Self {
        let changelog = Arc::new(ChangeLog::new());
        let state = engine::StateServer::new(meta, Arc::clone(&changelog), atomic_ops).spawn();
        let results = engine::ResultStore::new().spawn();
        Server { state, results, changelog }
    }

    /// Serves the watcher, result-store and task-proxy endpoints as
    /// background tasks against already-bound listeners. The caller binds
    /// every listener up front (including the state endpoint, served
    /// separately via [`handle_state_request`]) so that every address can
    /// be resolved into one consistent [`ServerMeta`] before any of them
    /// start accepting connections.
    pub fn serve(
        self,
        secret: String,
        watcher_listener: TcpListener,
        result_listener: TcpListener,
        task_proxy_in_listener: TcpListener,
        task_proxy_out_listener: TcpListener,
    ) {
        let changelog = Arc::clone(&self.changelog);
        tokio::spawn(serve_authenticated_rr(watcher_listener, secret.clone(), move |req: WatcherRequest| {
            let changelog = Arc::clone(&changelog);
            async move { handle_watcher_request(&changelog, req).await }
        }));

        let results = self.results.clone();
        tokio::spawn(serve_authenticated_rr(result_listener, secret.clone(), move |req: ResultRequest| {
            let results = results.clone();
            async move { handle_result_request(&results, req).await }
        }));

        let task_proxy = Arc::new(transport::TaskProxy::new());
        tokio::spawn(Arc::clone(&task_proxy).serve_producers(task_proxy_in_listener));
        tokio::spawn(task_proxy.serve_workers(task_proxy_out_listener));
    }
}

async fn handle_watcher_request(changelog: &ChangeLog, req: WatcherRequest) -> WatcherReply {
    // No client-supplied deadline travels on the wire (SPEC_FULL §4.D): the
    // caller enforces its own timeout client-side and is responsible for
    // reconnecting after one fires, the same one-outstanding-request
    // constraint a blocking REQ/REP socket has in the original.
    let deadline: Option<Instant> = None;
    match changelog
        .wait_for(&req.namespace, req.only_after, req.identical_okay, req.live, &req.identity, deadline)
        .await
    {
        Ok(entry) => WatcherReply {
            before: entry.update.before.clone(),
            after: entry.update.after.clone(),
            timestamp: entry.update.timestamp,
            is_identical: entry.update.is_identical,
        },
        Err(_) => unreachable!("an unbounded wait_for never times out"),
    }
}

async fn handle_result_request(results: &ResultHandle, req: ResultRequest) -> ResultReply {
    match req {
        ResultRequest::Lookup { chunk_id } => {
            let (tx, rx) = tokio::sync::oneshot::channel();
            let _ = results.send(engine::ResultCommand::Lookup { chunk_id, reply: tx }).await;
            ResultReply::Result { result: rx.await.expect("result store never drops a pending reply") }
        }
        ResultRequest::Deliver { chunk_id, result } => {
            let (tx, rx) = tokio::sync::oneshot::channel();
            let _ = results.send(engine::ResultCommand::Deliver { chunk_id, result, reply: tx }).await;
            let _ = rx.await;
            ResultReply::Delivered
        }
    }
}

/// Dispatches one State Server request over `state`, the shared entry point
/// every client-facing command funnels through.
pub async fn handle_state_request(state: &StateHandle, req: RrRequest) -> RrReply {
    match req {
        RrRequest::Ping { echo, .. } => {
            let (tx, rx) = tokio::sync::oneshot::channel();
            let _ = state.send(engine::StateCommand::Ping { echo, reply: tx }).await;
            RrReply::ok(rx.await.unwrap_or(serde_json::Value::Null))
        }
        RrRequest::GetServerMeta { .. } => {
            let (tx, rx) = tokio::sync::oneshot::channel();
            let _ = state.send(engine::StateCommand::GetServerMeta { reply: tx }).await;
            let meta = rx.await.expect("state actor never drops a pending reply");
            RrReply::ok(serde_json::to_value(meta).expect("ServerMeta always serializes"))
        }
        RrRequest::GetState { namespace, .. } => {
            let (tx, rx) = tokio::sync::oneshot::channel();
            let _ = state.send(engine::StateCommand::GetState { namespace, reply: tx }).await;
            into_reply(rx.await, |value| serde_json::to_value(value).expect("a state map always serializes"))
        }
        RrRequest::SetState { namespace, state: new_state, identity, .. } => {
            let (tx, rx) = tokio::sync::oneshot::channel();
            let _ = state
                .send(engine::StateCommand::SetState { namespace, state: new_state, identity, reply: tx })
                .await;
            into_reply(rx.await, std::convert::identity)
        }
        RrRequest::RunDictMethod { namespace, method, identity, .. } => {
            run_dict_method(state, namespace, method, identity).await
        }
        RrRequest::RunFnAtomically { namespace, op, args, kwargs, identity, .. } => {
            let (tx, rx) = tokio::sync::oneshot::channel();
            let _ = state
                .send(engine::StateCommand::RunFnAtomically { namespace, op, args, kwargs, identity, reply: tx })
                .await;
            into_reply(rx.await, std::convert::identity)
        }
        RrRequest::Time { .. } => {
            let (tx, rx) = tokio::sync::oneshot::channel();
            let _ = state.send(engine::StateCommand::Time { reply: tx }).await;
            RrReply::ok(serde_json::json!(rx.await.unwrap_or(0.0)))
        }
    }
}

async fn run_dict_method(
    state: &StateHandle,
    namespace: String,
    method: DictMethod,
    identity: ClientIdentity,
) -> RrReply {
    let (tx, rx) = tokio::sync::oneshot::channel();
    let _ = state.send(engine::StateCommand::RunDictMethod { namespace, method, identity, reply: tx }).await;
    into_reply(rx.await, std::convert::identity)
}

fn into_reply<T>(
    received: Result<Result<T, proto::RemoteException>, tokio::sync::oneshot::error::RecvError>,
    to_value: impl FnOnce(T) -> serde_json::Value,
) -> RrReply {
    match received.expect("state actor never drops a pending reply") {
        Ok(value) => RrReply::ok(to_value(value)),
        Err(err) => RrReply::err(err),
    }
}

/// Binds every endpoint this process exposes and starts serving them all
/// as background tasks, returning the resulting [`ServerMeta`] once every
/// address in it is real and already accepting connections.
///
/// Shared between `main` (bound to configured addresses) and integration
/// tests (bound to `127.0.0.1:0` throughout) so the two never drift apart.
pub async fn bootstrap(
    secret: String,
    bind_addr: &str,
    atomic_ops: OpRegistry,
) -> std::io::Result<ServerMeta> {
    let state_listener = TcpListener::bind(bind_addr).await?;
    let watcher_listener = TcpListener::bind("127.0.0.1:0").await?;
    let result_listener = TcpListener::bind("127.0.0.1:0").await?;
    let task_proxy_in_listener = TcpListener::bind("127.0.0.1:0").await?;
    let task_proxy_out_listener = TcpListener::bind("127.0.0.1:0").await?;

    let meta = ServerMeta {
        version: proto::PROTOCOL_VERSION.to_owned(),
        state_router: addr_string(&state_listener),
        watcher_router: addr_string(&watcher_listener),
        task_router: addr_string(&task_proxy_in_listener),
        task_result_pull: addr_string(&result_listener),
        task_proxy_in: addr_string(&task_proxy_in_listener),
        task_proxy_out: addr_string(&task_proxy_out_listener),
    };

    let coordinator = Server::new(meta.clone(), atomic_ops);
    let state_handle = coordinator.state.clone();
    tokio::spawn(serve_authenticated_rr(state_listener, secret.clone(), move |req: RrRequest| {
        let state_handle = state_handle.clone();
        async move { handle_state_request(&state_handle, req).await }
    }));
    coordinator.serve(secret, watcher_listener, result_listener, task_proxy_in_listener, task_proxy_out_listener);

    Ok(meta)
}

fn addr_string(listener: &TcpListener) -> String {
    listener.local_addr().expect("bound listener always has a local address").to_string()
}

/// Bare ambient HTTP surface: a liveness probe, nothing else — this is a
/// coordination service reached over the RR/WQ protocols above, not a web
/// app.
pub fn build_router() -> Router {
    Router::new()
        .route("/healthz", get(health::healthz))
        .layer(tower_http::trace::TraceLayer::new_for_http())
}

mod health {
    use axum::response::IntoResponse;
    pub async fn healthz() -> impl IntoResponse {
        "ok"
    }
}
