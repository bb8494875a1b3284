use std::collections::HashMap;
use std::sync::Arc;

use proto::{error_codes, ClientIdentity, RemoteException, ServerMeta, StateMap, StateUpdate};
use serde_json::{Map, Value};
use tokio::sync::{mpsc, oneshot};

use crate::changelog::ChangeLog;
use crate::dict_ops;
use crate::namespace;
use crate::registry::OpRegistry;

type Reply<T> = oneshot::Sender<Result<T, RemoteException>>;

/// Requests accepted by the State Server's single inbox, one per `spec.md`
/// §4.C operation.
pub enum StateCommand {
    Ping { echo: Value, reply: oneshot::Sender<Value> },
    GetServerMeta { reply: oneshot::Sender<ServerMeta> },
    GetState { namespace: String, reply: Reply<StateMap> },
    SetState { namespace: String, state: StateMap, identity: ClientIdentity, reply: Reply<Value> },
    RunDictMethod {
        namespace: String,
        method: proto::DictMethod,
        identity: ClientIdentity,
        reply: Reply<Value>,
    },
    RunFnAtomically {
        namespace: String,
        op: String,
        args: Vec<Value>,
        kwargs: Map<String, Value>,
        identity: ClientIdentity,
        reply: Reply<Value>,
    },
    Time { reply: oneshot::Sender<f64> },
}

pub type StateHandle = mpsc::Sender<StateCommand>;

/// Sole owner of every namespaced map; processes one request at a time from
/// its inbox, per Design Notes §9 ("treat it as an actor with a single
/// inbox and no shared mutable state outside"). Grounded in shape on
/// `services/server/src/state.rs`'s `AppState` registries, generalized from
/// a shared `RwLock` to an owned actor loop.
pub struct StateServer {
    stores: HashMap<String, StateMap>,
    meta: ServerMeta,
    changelog: Arc<ChangeLog>,
    atomic_ops: OpRegistry,
}

impl StateServer {
    #[must_use]
    pub fn new(meta: ServerMeta, changelog: Arc<ChangeLog>, atomic_ops: OpRegistry) -> Self {
        StateServer { stores: HashMap::new(), meta, changelog, atomic_ops }
    }

    pub fn spawn(self) -> StateHandle {
        let (tx, mut rx) = mpsc::channel(256);
        tokio::spawn(async move {
            let mut this = self;
            while let Some(cmd) = rx.recv().await {
                this.handle(cmd).await;
            }
        });
        tx
    }

    async fn handle(&mut self, cmd: StateCommand) {
        match cmd {
            StateCommand::Ping { echo, reply } => {
                let _ = reply.send(echo);
            }
            StateCommand::GetServerMeta { reply } => {
                let _ = reply.send(self.meta.clone());
            }
            StateCommand::GetState { namespace: ns, reply } => {
                let result = namespace::validate(&ns)
                    .map(|()| self.stores.entry(ns).or_default().clone());
                let _ = reply.send(result);
            }
            StateCommand::SetState { namespace: ns, state, identity, reply } => {
                self.commit(&ns, identity, move |map| {
                    *map = state;
                    Ok(Value::Bool(true))
                }, reply)
                .await;
            }
            StateCommand::RunDictMethod { namespace: ns, method, identity, reply } => {
                self.commit(&ns, identity, move |map| Ok(dict_ops::apply(map, method)), reply)
                    .await;
            }
            StateCommand::RunFnAtomically { namespace: ns, op, args, kwargs, identity, reply } => {
                let registry = &self.atomic_ops;
                let outcome = match registry.get(&op) {
                    Some(named_op) => Some(named_op.clone()),
                    None => None,
                };
                match outcome {
                    None => {
                        let _ = reply.send(Err(RemoteException::new(
                            error_codes::UNKNOWN_OP,
                            format!("no atomic op registered: {op}"),
                        )));
                    }
                    Some(named_op) => {
                        self.commit(&ns, identity, move |map| {
                            named_op.call(&args, &kwargs, Some(map))
                        }, reply)
                        .await;
                    }
                }
            }
            StateCommand::Time { reply } => {
                let _ = reply.send(proto::now_seconds());
            }
        }
    }

    /// Implements the commit protocol from spec.md §4.C: deep-copy `before`,
    /// run `op` on the live map, commit and broadcast on success, roll back
    /// and reply with a `RemoteException` on failure.
    async fn commit<F>(&mut self, ns: &str, identity: ClientIdentity, op: F, reply: Reply<Value>)
    where
        F: FnOnce(&mut StateMap) -> Result<Value, RemoteException>,
    {
        if let Err(e) = namespace::validate(ns) {
            let _ = reply.send(Err(e));
            return;
        }
        let map = self.stores.entry(ns.to_owned()).or_default();
        let before = map.clone();
        match op(map) {
            Ok(value) => {
                let after = map.clone();
                let is_identical = before == after;
                let update = StateUpdate { before, after, timestamp: proto::now_seconds(), is_identical };
                self.changelog.append(ns, identity, update).await;
                let _ = reply.send(Ok(value));
            }
            Err(e) => {
                *map = before;
                let _ = reply.send(Err(e));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::NamedOp;
    use serde_json::json;

    fn meta() -> ServerMeta {
        ServerMeta {
            version: proto::PROTOCOL_VERSION.to_owned(),
            state_router: "x".into(),
            watcher_router: "x".into(),
            task_router: "x".into(),
            task_result_pull: "x".into(),
            task_proxy_in: "x".into(),
            task_proxy_out: "x".into(),
        }
    }

    async fn handle(cmd: StateCommand) -> StateHandle {
        let changelog = Arc::new(ChangeLog::new());
        let mut ops = OpRegistry::new();
        ops.register(NamedOp::new("inc", |_args, _kwargs, state| {
            let map = state.expect("atomic op gets the live map");
            let current = map.get("c").and_then(Value::as_i64).unwrap_or(0);
            map.insert("c".into(), json!(current + 1));
            Ok(json!(current + 1))
        }));
        ops.register(NamedOp::new("boom", |_args, _kwargs, _state| {
            Err(RemoteException::new("BOOM", "deliberate failure"))
        }));
        let tx = StateServer::new(meta(), changelog, ops).spawn();
        tx.send(cmd).await.unwrap();
        tx
    }

    #[tokio::test]
    async fn set_state_then_get_state_round_trips() {
        let changelog = Arc::new(ChangeLog::new());
        let tx = StateServer::new(meta(), changelog, OpRegistry::new()).spawn();
        let mut state = Map::new();
        state.insert("x".into(), json!(1));
        let (reply_tx, reply_rx) = oneshot::channel();
        tx.send(StateCommand::SetState {
            namespace: "ns".into(),
            state: state.clone(),
            identity: ClientIdentity::random(),
            reply: reply_tx,
        })
        .await
        .unwrap();
        reply_rx.await.unwrap().unwrap();

        let (reply_tx, reply_rx) = oneshot::channel();
        tx.send(StateCommand::GetState { namespace: "ns".into(), reply: reply_tx }).await.unwrap();
        let got = reply_rx.await.unwrap().unwrap();
        assert_eq!(got, state);
    }

    #[tokio::test]
    async fn failing_atomic_op_rolls_back_and_emits_no_update() {
        let changelog = Arc::new(ChangeLog::new());
        let mut ops = OpRegistry::new();
        ops.register(NamedOp::new("boom", |_args, _kwargs, _state| {
            Err(RemoteException::new("BOOM", "deliberate failure"))
        }));
        let tx = StateServer::new(meta(), Arc::clone(&changelog), ops).spawn();

        let (reply_tx, reply_rx) = oneshot::channel();
        tx.send(StateCommand::RunFnAtomically {
            namespace: "ns".into(),
            op: "boom".into(),
            args: vec![],
            kwargs: Map::new(),
            identity: ClientIdentity::random(),
            reply: reply_tx,
        })
        .await
        .unwrap();
        assert!(reply_rx.await.unwrap().is_err());

        let (reply_tx, reply_rx) = oneshot::channel();
        tx.send(StateCommand::GetState { namespace: "ns".into(), reply: reply_tx }).await.unwrap();
        assert_eq!(reply_rx.await.unwrap().unwrap(), Map::new());

        let result = changelog
            .wait_for(
                "ns",
                0.0,
                true,
                false,
                &ClientIdentity::random(),
                Some(std::time::Instant::now() + std::time::Duration::from_millis(20)),
            )
            .await;
        assert!(result.is_err(), "no StateUpdate should have been emitted");
    }

    #[tokio::test]
    async fn empty_namespace_is_rejected_for_mutations() {
        let tx = handle(StateCommand::Ping { echo: json!(1), reply: oneshot::channel().0 }).await;
        let (reply_tx, reply_rx) = oneshot::channel();
        tx.send(StateCommand::SetState {
            namespace: String::new(),
            state: Map::new(),
            identity: ClientIdentity::random(),
            reply: reply_tx,
        })
        .await
        .unwrap();
        assert!(reply_rx.await.unwrap().is_err());
    }

    #[tokio::test]
    async fn atomic_increment_is_observed_in_sequence() {
        let changelog = Arc::new(ChangeLog::new());
        let mut ops = OpRegistry::new();
        ops.register(NamedOp::new("inc", |_args, _kwargs, state| {
            let map = state.expect("live map");
            let current = map.get("c").and_then(Value::as_i64).unwrap_or(0);
            map.insert("c".into(), json!(current + 1));
            Ok(json!(current + 1))
        }));
        let tx = StateServer::new(meta(), changelog, ops).spawn();
        for _ in 0..10 {
            let (reply_tx, reply_rx) = oneshot::channel();
            tx.send(StateCommand::RunFnAtomically {
                namespace: "ns".into(),
                op: "inc".into(),
                args: vec![],
                kwargs: Map::new(),
                identity: ClientIdentity::random(),
                reply: reply_tx,
            })
            .await
            .unwrap();
            reply_rx.await.unwrap().unwrap();
        }
        let (reply_tx, reply_rx) = oneshot::channel();
        tx.send(StateCommand::GetState { namespace: "ns".into(), reply: reply_tx }).await.unwrap();
        let state = reply_rx.await.unwrap().unwrap();
        assert_eq!(state["c"], json!(10));
    }
}
