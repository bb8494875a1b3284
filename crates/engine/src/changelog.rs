use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Instant;

use proto::{ClientIdentity, StateUpdate, ZprocError};
use tokio::sync::{Mutex, Notify};

/// One retained entry: the update itself plus the identity of the client
/// whose request produced it, needed for live-mode echo suppression.
#[derive(Clone, Debug)]
pub struct ChangeLogEntry {
    pub identity: ClientIdentity,
    pub update: StateUpdate,
}

/// Per-namespace, append-only, timestamp-ordered log of every
/// [`StateUpdate`] committed by the State Server.
///
/// Backs both buffered watchers (replay everything after a stored cursor)
/// and live watchers (reset cursor to now, then wait for the next append)
/// without a second wire protocol — see `DESIGN.md`'s Open Question
/// resolution on the two overlapping watcher layers in the original source.
pub struct ChangeLog {
    namespaces: Mutex<HashMap<String, VecDeque<Arc<ChangeLogEntry>>>>,
    notify: Notify,
}

impl ChangeLog {
    #[must_use]
    pub fn new() -> Self {
        ChangeLog { namespaces: Mutex::new(HashMap::new()), notify: Notify::new() }
    }

    pub async fn append(&self, namespace: &str, identity: ClientIdentity, update: StateUpdate) {
        let entry = Arc::new(ChangeLogEntry { identity, update });
        let mut guard = self.namespaces.lock().await;
        guard.entry(namespace.to_owned()).or_default().push_back(entry);
        drop(guard);
        self.notify.notify_waiters();
    }

    async fn find_after(
        &self,
        namespace: &str,
        only_after: f64,
        identical_okay: bool,
        echo_suppress: Option<&ClientIdentity>,
    ) -> Option<Arc<ChangeLogEntry>> {
        let guard = self.namespaces.lock().await;
        let log = guard.get(namespace)?;
        log.iter()
            .find(|entry| {
                let passes_echo = match echo_suppress {
                    Some(me) => &entry.identity != me,
                    None => true,
                };
                entry.update.timestamp > only_after
                    && (identical_okay || !entry.update.is_identical)
                    && passes_echo
            })
            .cloned()
    }

    /// Blocks until a `StateUpdate` matching the cursor/mode is available,
    /// or `deadline` elapses.
    ///
    /// `live` controls echo suppression (spec.md §4.D: only live-mode
    /// watchers skip events the requester itself caused).
    pub async fn wait_for(
        &self,
        namespace: &str,
        only_after: f64,
        identical_okay: bool,
        live: bool,
        requester: &ClientIdentity,
        deadline: Option<Instant>,
    ) -> Result<Arc<ChangeLogEntry>, ZprocError> {
        let echo_suppress = live.then_some(requester);
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            if let Some(entry) = self.find_after(namespace, only_after, identical_okay, echo_suppress).await {
                return Ok(entry);
            }
            match deadline {
                Some(d) => {
                    let remaining = d.saturating_duration_since(Instant::now());
                    if remaining.is_zero() {
                        return Err(ZprocError::Timeout);
                    }
                    if tokio::time::timeout(remaining, notified).await.is_err() {
                        return Err(ZprocError::Timeout);
                    }
                }
                None => notified.await,
            }
        }
    }
}

impl Default for ChangeLog {
    fn default() -> Self {
        Self::new()
    }
}
