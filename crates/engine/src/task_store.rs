use std::collections::hash_map::Entry;
use std::collections::{HashMap, VecDeque};

use proto::{ChunkId, TaskResult};
use tokio::sync::{mpsc, oneshot};

/// Requests accepted by the Task Result Store's single inbox.
pub enum ResultCommand {
    /// Returns the cached result if present; otherwise the sender is queued
    /// and answered by a later `Deliver`.
    Lookup { chunk_id: ChunkId, reply: oneshot::Sender<TaskResult> },
    Deliver { chunk_id: ChunkId, result: TaskResult, reply: oneshot::Sender<()> },
}

pub type ResultHandle = mpsc::Sender<ResultCommand>;

/// Durable per-chunk result cache with pending-request fanout, grounded on
/// `zproc/task/server.py`'s `TaskResultServer`.
#[derive(Default)]
pub struct ResultStore {
    results: HashMap<ChunkId, TaskResult>,
    pending: HashMap<ChunkId, VecDeque<oneshot::Sender<TaskResult>>>,
}

impl ResultStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn spawn(self) -> ResultHandle {
        let (tx, mut rx) = mpsc::channel(256);
        tokio::spawn(async move {
            let mut this = self;
            while let Some(cmd) = rx.recv().await {
                this.handle(cmd);
            }
        });
        tx
    }

    fn handle(&mut self, cmd: ResultCommand) {
        match cmd {
            ResultCommand::Lookup { chunk_id, reply } => {
                if let Some(result) = self.results.get(&chunk_id) {
                    let _ = reply.send(result.clone());
                } else {
                    self.pending.entry(chunk_id).or_default().push_back(reply);
                }
            }
            ResultCommand::Deliver { chunk_id, result, reply } => {
                // Write-once: a ChunkID's result is stored exactly once;
                // subsequent delivers are ignored (spec.md §4.E invariants).
                if let Entry::Vacant(slot) = self.results.entry(chunk_id.clone()) {
                    slot.insert(result.clone());
                    if let Some(waiters) = self.pending.remove(&chunk_id) {
                        for waiter in waiters {
                            let _ = waiter.send(result.clone());
                        }
                    }
                }
                let _ = reply.send(());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proto::TaskId;
    use serde_json::json;

    fn id() -> ChunkId {
        ChunkId::single(TaskId::new_single())
    }

    #[tokio::test]
    async fn lookup_after_deliver_replies_immediately() {
        let tx = ResultStore::new().spawn();
        let chunk = id();

        let (dtx, drx) = oneshot::channel();
        tx.send(ResultCommand::Deliver { chunk_id: chunk.clone(), result: TaskResult::Scalar(json!(5)), reply: dtx })
            .await
            .unwrap();
        drx.await.unwrap();

        let (ltx, lrx) = oneshot::channel();
        tx.send(ResultCommand::Lookup { chunk_id: chunk, reply: ltx }).await.unwrap();
        match lrx.await.unwrap() {
            TaskResult::Scalar(v) => assert_eq!(v, json!(5)),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn lookup_before_deliver_blocks_then_resolves() {
        let tx = ResultStore::new().spawn();
        let chunk = id();

        let (ltx, lrx) = oneshot::channel();
        tx.send(ResultCommand::Lookup { chunk_id: chunk.clone(), reply: ltx }).await.unwrap();

        let (dtx, drx) = oneshot::channel();
        tx.send(ResultCommand::Deliver { chunk_id: chunk, result: TaskResult::Scalar(json!(7)), reply: dtx })
            .await
            .unwrap();
        drx.await.unwrap();

        match lrx.await.unwrap() {
            TaskResult::Scalar(v) => assert_eq!(v, json!(7)),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn duplicate_deliver_is_ignored() {
        let tx = ResultStore::new().spawn();
        let chunk = id();

        let (d1, r1) = oneshot::channel();
        tx.send(ResultCommand::Deliver { chunk_id: chunk.clone(), result: TaskResult::Scalar(json!(1)), reply: d1 })
            .await
            .unwrap();
        r1.await.unwrap();

        let (d2, r2) = oneshot::channel();
        tx.send(ResultCommand::Deliver { chunk_id: chunk.clone(), result: TaskResult::Scalar(json!(2)), reply: d2 })
            .await
            .unwrap();
        r2.await.unwrap();

        let (ltx, lrx) = oneshot::channel();
        tx.send(ResultCommand::Lookup { chunk_id: chunk, reply: ltx }).await.unwrap();
        match lrx.await.unwrap() {
            TaskResult::Scalar(v) => assert_eq!(v, json!(1), "first delivery wins"),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn multiple_pending_lookups_drain_in_fifo_order() {
        let tx = ResultStore::new().spawn();
        let chunk = id();

        let (l1tx, l1rx) = oneshot::channel();
        tx.send(ResultCommand::Lookup { chunk_id: chunk.clone(), reply: l1tx }).await.unwrap();
        let (l2tx, l2rx) = oneshot::channel();
        tx.send(ResultCommand::Lookup { chunk_id: chunk.clone(), reply: l2tx }).await.unwrap();

        let (dtx, drx) = oneshot::channel();
        tx.send(ResultCommand::Deliver { chunk_id: chunk, result: TaskResult::Scalar(json!(3)), reply: dtx })
            .await
            .unwrap();
        drx.await.unwrap();

        assert!(matches!(l1rx.await.unwrap(), TaskResult::Scalar(v) if v == json!(3)));
        assert!(matches!(l2rx.await.unwrap(), TaskResult::Scalar(v) if v == json!(3)));
    }
}
