use std::process::Stdio;

use proto::{error_codes, ChunkId, RemoteException, ResultReply, ResultRequest, TaskId, TaskParams, TaskResult, WorkItem, WorkMessage, ZprocError};
use serde_json::{Map, Value};
use tokio::net::TcpStream;
use tokio::process::{Child, Command};
use transport::RrConnection;

/// Submits tasks to the Task Proxy + Worker Pool and spawns/retires worker
/// processes, grounded on `zproc/task/swarm.py`'s `Swarm`.
///
/// Workers are real OS processes running the `services/worker` binary
/// (spec.md §5's "each logical service is an independent OS process"), not
/// an in-process thread pool.
pub struct Swarm {
    namespace: String,
    server_addr: String,
    secret: String,
    task_proxy_in: TcpStream,
    result_conn: RrConnection,
    worker_binary: std::path::PathBuf,
    workers: Vec<Child>,
}

impl Swarm {
    pub async fn connect(
        server_addr: &str,
        secret: &str,
        namespace: impl Into<String>,
        task_proxy_in_addr: &str,
        task_result_pull_addr: &str,
        worker_binary: impl Into<std::path::PathBuf>,
    ) -> Result<Self, ZprocError> {
        let task_proxy_in = TcpStream::connect(task_proxy_in_addr)
            .await
            .map_err(|e| ZprocError::Connection(e.to_string()))?;
        let result_conn = RrConnection::connect(task_result_pull_addr)
            .await
            .map_err(|e| ZprocError::Connection(e.to_string()))?;
        Ok(Swarm {
            namespace: namespace.into(),
            server_addr: server_addr.to_owned(),
            secret: secret.to_owned(),
            task_proxy_in,
            result_conn,
            worker_binary: worker_binary.into(),
            workers: Vec::new(),
        })
    }

    /// Number of worker processes this swarm believes are still running.
    /// Matches `Swarm.count`'s `is_alive()` liveness filter by reaping
    /// exited children first.
    pub fn count(&mut self) -> usize {
        self.workers.retain_mut(|child| !matches!(child.try_wait(), Ok(Some(_))));
        self.workers.len()
    }

    /// Grows or shrinks the pool to `target` workers: spawning
    /// `services/worker` processes on growth, or pushing that many
    /// `Shutdown` sentinels through the task proxy on shrink (a shrinking
    /// worker finishes its current item, then exits on its own).
    pub async fn set_count(&mut self, target: usize) -> Result<(), ZprocError> {
        let current = self.count();
        if target > current {
            for _ in 0..(target - current) {
                self.spawn_one()?;
            }
        } else {
            for _ in 0..(current - target) {
                self.submit_raw(WorkMessage::Shutdown).await?;
            }
        }
        Ok(())
    }

    pub async fn start(&mut self, count: Option<usize>) -> Result<(), ZprocError> {
        let target = count.unwrap_or_else(num_cpus_fallback);
        self.set_count(target).await
    }

    pub async fn stop(&mut self) -> Result<(), ZprocError> {
        self.set_count(0).await
    }

    fn spawn_one(&mut self) -> Result<(), ZprocError> {
        let child = Command::new(&self.worker_binary)
            .env("ZPROC_SERVER_ADDRESS", &self.server_addr)
            .env("ZPROC_SIGNING_KEY", &self.secret)
            .stdin(Stdio::null())
            .spawn()
            .map_err(|e| ZprocError::Connection(format!("failed to spawn worker: {e}")))?;
        tracing::debug!(pid = ?child.id(), "spawned worker process");
        self.workers.push(child);
        Ok(())
    }

    async fn submit_raw(&mut self, msg: WorkMessage) -> Result<(), ZprocError> {
        transport::write_frame(&mut self.task_proxy_in, &msg)
            .await
            .map_err(|e| ZprocError::Connection(e.to_string()))
    }

    async fn await_result(&mut self, chunk_id: ChunkId) -> Result<TaskResult, ZprocError> {
        let reply: ResultReply = self
            .result_conn
            .call(&ResultRequest::Lookup { chunk_id })
            .await
            .map_err(|e| ZprocError::Connection(e.to_string()))?;
        match reply {
            ResultReply::Result { result } => Ok(result),
            ResultReply::Delivered => unreachable!("Lookup never answers with Delivered"),
        }
    }

    /// Submits one single-call task, blocking until its result is ready.
    pub async fn run(
        &mut self,
        op: impl Into<String>,
        args: Vec<Value>,
        kwargs: Map<String, Value>,
        pass_state: bool,
    ) -> Result<Value, ZprocError> {
        let chunk_id = ChunkId::single(TaskId::new_single());
        let item = WorkItem {
            chunk_id: chunk_id.clone(),
            op: op.into(),
            params: TaskParams {
                map_iter: None,
                map_args: None,
                args,
                map_kwargs: None,
                kwargs,
                pass_state,
                namespace: self.namespace.clone(),
            },
        };
        self.submit_raw(WorkMessage::Item(item)).await?;
        match self.await_result(chunk_id).await? {
            TaskResult::Scalar(value) => Ok(value),
            TaskResult::Items(mut items) => Ok(items.pop().unwrap_or(Value::Null)),
            TaskResult::Error(e) => Err(ZprocError::Remote(e)),
        }
    }

    /// Splits `map_iter` into `num_chunks` contiguous, equally sized
    /// pieces (the last chunk absorbing any remainder), submits one
    /// [`WorkItem`] per chunk, then gathers and concatenates every chunk's
    /// results in order — the Rust counterpart of `Swarm.map`.
    pub async fn map(
        &mut self,
        op: impl Into<String>,
        map_iter: Vec<Value>,
        args: Vec<Value>,
        kwargs: Map<String, Value>,
        pass_state: bool,
        num_chunks: usize,
    ) -> Result<Vec<Value>, ZprocError> {
        let op = op.into();
        let length = map_iter.len();
        if length == 0 || num_chunks == 0 {
            return Ok(Vec::new());
        }
        validate_chunk_count(length, num_chunks)?;
        let task_id = TaskId::new_chunked(length as u32, num_chunks as u32);
        let chunk_length = match &task_id {
            TaskId::Chunked { chunk_length, .. } => *chunk_length as usize,
            TaskId::Single { .. } => length,
        };

        let mut chunk_ids = Vec::with_capacity(num_chunks);
        for (index, chunk) in map_iter.chunks(chunk_length).enumerate() {
            let chunk_id = ChunkId::chunk(task_id.clone(), index as u32);
            let item = WorkItem {
                chunk_id: chunk_id.clone(),
                op: op.clone(),
                params: TaskParams {
                    map_iter: Some(chunk.to_vec()),
                    map_args: None,
                    args: args.clone(),
                    map_kwargs: None,
                    kwargs: kwargs.clone(),
                    pass_state,
                    namespace: self.namespace.clone(),
                },
            };
            self.submit_raw(WorkMessage::Item(item)).await?;
            chunk_ids.push(chunk_id);
        }

        let mut out = Vec::with_capacity(length);
        for chunk_id in chunk_ids {
            match self.await_result(chunk_id).await? {
                TaskResult::Items(items) => out.extend(items),
                TaskResult::Scalar(value) => out.push(value),
                TaskResult::Error(e) => return Err(ZprocError::Remote(e)),
            }
        }
        Ok(out)
    }
}

fn num_cpus_fallback() -> usize {
    std::thread::available_parallelism().map(std::num::NonZeroUsize::get).unwrap_or(1)
}

/// Rejects a chunk count that leaves one or more chunks empty, matching the
/// original's `assert length > num_chunks` at submission time rather than
/// silently shrinking the request.
fn validate_chunk_count(length: usize, num_chunks: usize) -> Result<(), ZprocError> {
    if length <= num_chunks {
        return Err(ZprocError::Remote(RemoteException::new(
            error_codes::CHUNK_COUNT_INVALID,
            format!("map_iter has {length} item(s), which cannot be split into {num_chunks} chunk(s)"),
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn num_chunks_equal_to_length_is_rejected() {
        let err = validate_chunk_count(4, 4).unwrap_err();
        match err {
            ZprocError::Remote(e) => assert_eq!(e.code, error_codes::CHUNK_COUNT_INVALID),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn num_chunks_greater_than_length_is_rejected() {
        assert!(validate_chunk_count(3, 5).is_err());
    }

    #[test]
    fn num_chunks_one_less_than_length_is_accepted() {
        assert!(validate_chunk_count(4, 3).is_ok());
    }
}
