use engine::{NamedOp, OpRegistry};
use proto::{error_codes, ChunkId, RemoteException, ResultReply, ResultRequest, ServerMeta, TaskId, TaskParams, WorkItem, WorkMessage};
use serde_json::{json, Map, Value};
use tokio::net::TcpStream;
use transport::{client_handshake, read_frame, write_frame, RrConnection};

async fn start_server() -> (ServerMeta, String) {
    let secret = "task-dispatch-secret".to_owned();
    let ops = server::ops::builtin_registry();
    let meta = server::bootstrap(secret.clone(), "127.0.0.1:0", ops).await.expect("server failed to bind");
    (meta, secret)
}

fn square_op_registry() -> OpRegistry {
    let mut registry = OpRegistry::new();
    registry.register(NamedOp::new("square", |args, _kwargs, _state| {
        let n = args
            .first()
            .and_then(Value::as_f64)
            .ok_or_else(|| RemoteException::new(error_codes::UNKNOWN_OP, "square needs a numeric argument"))?;
        Ok(json!(n * n))
    }));
    registry
}

/// A single-task stand-in for `services/worker`'s task loop: pulls one
/// `WorkMessage` off the worker endpoint, executes it against a local
/// registry, and delivers the result — enough to exercise the proxy and
/// result store without spawning a real worker process.
async fn run_one_task(meta: &ServerMeta, secret: &str, registry: &OpRegistry) {
    let mut worker_stream = TcpStream::connect(&meta.task_proxy_out).await.unwrap();
    let message: WorkMessage = read_frame(&mut worker_stream).await.unwrap();
    let WorkMessage::Item(item) = message else { panic!("expected a work item") };

    let op = registry.get(&item.op).expect("op must be registered");
    let result = match op.call(&item.params.args, &item.params.kwargs, None) {
        Ok(value) => proto::TaskResult::Scalar(value),
        Err(err) => proto::TaskResult::Error(err),
    };

    let mut result_conn = RrConnection::connect(&meta.task_result_pull).await.unwrap();
    client_handshake(&mut result_conn, secret).await.unwrap();
    let reply: ResultReply =
        result_conn.call(&ResultRequest::Deliver { chunk_id: item.chunk_id, result }).await.unwrap();
    assert!(matches!(reply, ResultReply::Delivered));
}

#[tokio::test]
async fn a_submitted_item_is_dispatched_to_a_worker_and_its_result_is_retrievable() {
    let (meta, secret) = start_server().await;
    let registry = square_op_registry();

    let chunk_id = ChunkId::single(TaskId::new_single());
    let item = WorkItem {
        chunk_id: chunk_id.clone(),
        op: "square".to_owned(),
        params: TaskParams {
            map_iter: None,
            map_args: None,
            args: vec![json!(7)],
            map_kwargs: None,
            kwargs: Map::new(),
            pass_state: false,
            namespace: "tasks".to_owned(),
        },
    };

    let mut producer_stream = TcpStream::connect(&meta.task_proxy_in).await.unwrap();
    write_frame(&mut producer_stream, &WorkMessage::Item(item)).await.unwrap();

    run_one_task(&meta, &secret, &registry).await;

    let mut result_conn = RrConnection::connect(&meta.task_result_pull).await.unwrap();
    client_handshake(&mut result_conn, &secret).await.unwrap();
    let reply: ResultReply = result_conn.call(&ResultRequest::Lookup { chunk_id }).await.unwrap();
    match reply {
        ResultReply::Result { result: proto::TaskResult::Scalar(value) } => assert_eq!(value, json!(49)),
        other => panic!("unexpected reply: {other:?}"),
    }
}

#[tokio::test]
async fn a_lookup_issued_before_delivery_blocks_until_the_result_arrives() {
    let (meta, secret) = start_server().await;
    let registry = square_op_registry();

    let chunk_id = ChunkId::single(TaskId::new_single());
    let item = WorkItem {
        chunk_id: chunk_id.clone(),
        op: "square".to_owned(),
        params: TaskParams {
            map_iter: None,
            map_args: None,
            args: vec![json!(6)],
            map_kwargs: None,
            kwargs: Map::new(),
            pass_state: false,
            namespace: "tasks".to_owned(),
        },
    };

    let mut producer_stream = TcpStream::connect(&meta.task_proxy_in).await.unwrap();
    write_frame(&mut producer_stream, &WorkMessage::Item(item)).await.unwrap();

    let mut lookup_conn = RrConnection::connect(&meta.task_result_pull).await.unwrap();
    client_handshake(&mut lookup_conn, &secret).await.unwrap();
    let lookup_chunk = chunk_id.clone();
    let lookup_task = tokio::spawn(async move {
        let reply: ResultReply = lookup_conn.call(&ResultRequest::Lookup { chunk_id: lookup_chunk }).await.unwrap();
        reply
    });

    tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    run_one_task(&meta, &secret, &registry).await;

    match lookup_task.await.unwrap() {
        ResultReply::Result { result: proto::TaskResult::Scalar(value) } => assert_eq!(value, json!(36)),
        other => panic!("unexpected reply: {other:?}"),
    }
}
