use std::sync::Arc;

use proto::WorkMessage;
use tokio::net::TcpListener;
use tokio::sync::{mpsc, Mutex};

use crate::framing::{read_frame, write_frame, FramingError};

/// A stateless PUSH→proxy→PULL fabric: producers push work items on one
/// listener, workers pull from another, and the proxy fair-queues between
/// them.
///
/// Fair-queuing is realized as a single shared channel with many competing
/// consumers (one per connected worker) rather than explicit round-robin
/// bookkeeping — whichever worker is next to ask gets the next item, which
/// is both simpler and more robust to workers connecting/disconnecting than
/// indexed round robin.
pub struct TaskProxy {
    tx: mpsc::UnboundedSender<WorkMessage>,
    rx: Arc<Mutex<mpsc::UnboundedReceiver<WorkMessage>>>,
}

impl TaskProxy {
    #[must_use]
    pub fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        TaskProxy { tx, rx: Arc::new(Mutex::new(rx)) }
    }

    /// Enqueues a work item (or shutdown sentinel) for the next available
    /// worker. Used directly by in-process submitters; remote submitters go
    /// through [`TaskProxy::serve_producers`].
    pub fn submit(&self, msg: WorkMessage) {
        // An unbounded channel send only fails once every worker-side
        // receiver clone is dropped, which only happens alongside this
        // TaskProxy itself.
        let _ = self.tx.send(msg);
    }

    pub async fn serve_producers(self: Arc<Self>, listener: TcpListener) {
        loop {
            let (mut stream, peer) = match listener.accept().await {
                Ok(pair) => pair,
                Err(e) => {
                    tracing::warn!(error = %e, "task producer accept failed");
                    continue;
                }
            };
            let this = Arc::clone(&self);
            tokio::spawn(async move {
                loop {
                    match read_frame::<_, WorkMessage>(&mut stream).await {
                        Ok(msg) => this.submit(msg),
                        Err(FramingError::Closed) => break,
                        Err(e) => {
                            tracing::debug!(%peer, error = %e, "task producer connection error");
                            break;
                        }
                    }
                }
            });
        }
    }

    pub async fn serve_workers(self: Arc<Self>, listener: TcpListener) {
        loop {
            let (mut stream, peer) = match listener.accept().await {
                Ok(pair) => pair,
                Err(e) => {
                    tracing::warn!(error = %e, "worker accept failed");
                    continue;
                }
            };
            let this = Arc::clone(&self);
            tokio::spawn(async move {
                loop {
                    let msg = { this.rx.lock().await.recv().await };
                    let Some(msg) = msg else { break };
                    let is_shutdown = matches!(msg, WorkMessage::Shutdown);
                    if let Err(e) = write_frame(&mut stream, &msg).await {
                        tracing::debug!(%peer, error = %e, "worker write failed, item lost");
                        break;
                    }
                    if is_shutdown {
                        break;
                    }
                }
            });
        }
    }
}

impl Default for TaskProxy {
    fn default() -> Self {
        Self::new()
    }
}
