use std::collections::BTreeSet;
use std::time::Duration;

use proto::{ClientIdentity, StateMap, WatcherReply, WatcherRequest, ZprocError};
use serde_json::Value;
use tokio::time::Instant;
use transport::{client_handshake, RrConnection};

/// Per-namespace subscription handle, grounded on `zproc/state/api.py`'s
/// `StateWatcher` and the older `zproc/state/watcher.py::Watcher`.
///
/// Holds a dedicated RR connection carrying a four-field request
/// `(identity, namespace, identical_okay, only_after)` and a two-field
/// reply `(StateUpdate, is_identical)`, matching the timestamp-cursor
/// contract spec.md §4.D/§6 freezes. The higher-level `when_*` predicate
/// methods here are all built on [`Watcher::next_change`], the way the
/// original layers `when`/`when_truthy`/... on `when_change_raw`.
pub struct Watcher {
    conn: RrConnection,
    identity: ClientIdentity,
    namespace: String,
    only_after: f64,
    /// Persistent mode, set once at construction: a live watcher resets its
    /// cursor to "now" before every poll and has its own updates echo-
    /// suppressed by the server. A buffered (non-live) watcher instead
    /// replays everything after its cursor in order.
    live: bool,
    /// Maximum number of successful yields this watcher will deliver before
    /// refusing with [`ZprocError::Stopped`], mirroring `StateWatcher`'s
    /// `count`/`_iter_limit`. `None` means unlimited.
    count: Option<usize>,
    /// Yields delivered so far; only incremented on a non-identical (or
    /// `identical_okay`) reply, never on a timeout or a filtered-out one.
    iters: usize,
}

impl Watcher {
    pub(crate) async fn connect(
        watcher_addr: &str,
        secret: &str,
        identity: ClientIdentity,
        namespace: String,
    ) -> Result<Self, ZprocError> {
        let mut conn = RrConnection::connect(watcher_addr)
            .await
            .map_err(|e| ZprocError::Connection(e.to_string()))?;
        client_handshake(&mut conn, secret).await.map_err(|e| ZprocError::Connection(e.to_string()))?;
        Ok(Watcher {
            conn,
            identity,
            namespace,
            only_after: proto::now_seconds(),
            live: false,
            count: None,
            iters: 0,
        })
    }

    /// Switches this watcher into (or out of) live mode for every
    /// subsequent poll.
    pub fn set_live(&mut self, live: bool) {
        self.live = live;
    }

    /// Resets the cursor to "now", discarding any buffered updates older
    /// than this call, without changing live mode. Only this watcher's
    /// cursor moves — other iterators sharing the same namespace are
    /// untouched.
    pub fn go_live(&mut self) {
        self.only_after = proto::now_seconds();
    }

    /// Overrides the cursor this watcher starts from, the Rust counterpart
    /// of `StateWatcher(start_time=...)`. Only meaningful before the first
    /// poll; a live watcher overwrites it again on its first call anyway.
    pub fn set_start_time(&mut self, start_time: f64) {
        self.only_after = start_time;
    }

    /// Caps the number of successful yields this watcher will deliver.
    /// `None` restores unlimited yields. Past the limit, every `when_*`
    /// call returns [`ZprocError::Stopped`] instead of blocking.
    pub fn set_count(&mut self, count: Option<usize>) {
        self.count = count;
        self.iters = 0;
    }

    async fn poll_raw(&mut self, identical_okay: bool) -> Result<WatcherReply, ZprocError> {
        if self.live {
            self.only_after = proto::now_seconds();
        }
        let request = WatcherRequest {
            identity: self.identity.clone(),
            namespace: self.namespace.clone(),
            identical_okay,
            only_after: self.only_after,
            live: self.live,
        };
        let reply: WatcherReply =
            self.conn.call(&request).await.map_err(|e| ZprocError::Connection(e.to_string()))?;
        if !self.live {
            self.only_after = reply.timestamp;
        }
        Ok(reply)
    }

    /// Returns `Err(ZprocError::Stopped)` once `count` successful yields
    /// have already been delivered, matching `StateWatcher.__next__`
    /// raising `StopIteration` once `_iters >= _iter_limit`.
    fn check_not_stopped(&self) -> Result<(), ZprocError> {
        if self.count.is_some_and(|limit| self.iters >= limit) {
            return Err(ZprocError::Stopped);
        }
        Ok(())
    }

    /// Blocks until the next update, filtering out identical ones unless
    /// `identical_okay` is set. Shared by [`Watcher::next_change`] and the
    /// higher-level predicates, none of which count a raw poll as a yield
    /// until it is the one actually handed back to the caller.
    async fn poll_until_change(
        &mut self,
        identical_okay: bool,
        timeout: Option<Duration>,
    ) -> Result<WatcherReply, ZprocError> {
        let deadline = timeout.map(|d| Instant::now() + d);
        loop {
            let reply = match deadline {
                Some(dl) => {
                    let remaining = dl.saturating_duration_since(Instant::now());
                    tokio::time::timeout(remaining, self.poll_raw(identical_okay))
                        .await
                        .map_err(|_| ZprocError::Timeout)??
                }
                None => self.poll_raw(identical_okay).await?,
            };
            if reply.is_identical && !identical_okay {
                continue;
            }
            return Ok(reply);
        }
    }

    /// The low-level hook every other predicate is built on: blocks until
    /// the next update, filtering out identical ones unless
    /// `identical_okay` is set. Counts as one yield against `count`.
    pub async fn next_change(
        &mut self,
        identical_okay: bool,
        timeout: Option<Duration>,
    ) -> Result<WatcherReply, ZprocError> {
        self.check_not_stopped()?;
        let reply = self.poll_until_change(identical_okay, timeout).await?;
        self.iters += 1;
        Ok(reply)
    }

    /// Blocks until a change touching any of `keys` is observed (or any
    /// change at all, if `keys` is empty), then returns a snapshot of the
    /// state after that change. `exclude` inverts the key set, as in
    /// `StateAPI.when_change(..., exclude=True)`. Only the matching update
    /// counts as a yield against `count`, not every raw poll along the way.
    pub async fn when_change(
        &mut self,
        keys: &[&str],
        exclude: bool,
        timeout: Option<Duration>,
    ) -> Result<StateMap, ZprocError> {
        self.check_not_stopped()?;
        let after = if keys.is_empty() {
            self.poll_until_change(false, timeout).await?.after
        } else {
            loop {
                let reply = self.poll_until_change(false, timeout).await?;
                let selected = select_keys(&reply.before, &reply.after, keys, exclude);
                let changed = selected.iter().any(|k| reply.before.get(k) != reply.after.get(k));
                if changed {
                    break reply.after;
                }
            }
        };
        self.iters += 1;
        Ok(after)
    }

    /// Blocks until `test_fn(snapshot)` returns `true` for the state after
    /// some update, then returns that snapshot. Only the matching update
    /// counts as a yield against `count`.
    pub async fn when<F>(&mut self, mut test_fn: F, timeout: Option<Duration>) -> Result<StateMap, ZprocError>
    where
        F: FnMut(&StateMap) -> bool,
    {
        self.check_not_stopped()?;
        let after = loop {
            let reply = self.poll_until_change(false, timeout).await?;
            if test_fn(&reply.after) {
                break reply.after;
            }
        };
        self.iters += 1;
        Ok(after)
    }

    pub async fn when_truthy(&mut self, key: &str, timeout: Option<Duration>) -> Result<StateMap, ZprocError> {
        self.when(|snapshot| snapshot.get(key).is_some_and(is_truthy), timeout).await
    }

    pub async fn when_falsy(&mut self, key: &str, timeout: Option<Duration>) -> Result<StateMap, ZprocError> {
        self.when(
            |snapshot| match snapshot.get(key) {
                Some(v) => !is_truthy(v),
                None => false,
            },
            timeout,
        )
        .await
    }

    pub async fn when_equal(&mut self, key: &str, value: &Value, timeout: Option<Duration>) -> Result<StateMap, ZprocError> {
        self.when(|snapshot| snapshot.get(key) == Some(value), timeout).await
    }

    pub async fn when_not_equal(&mut self, key: &str, value: &Value, timeout: Option<Duration>) -> Result<StateMap, ZprocError> {
        self.when(|snapshot| snapshot.get(key).is_some_and(|v| v != value), timeout).await
    }

    pub async fn when_none(&mut self, key: &str, timeout: Option<Duration>) -> Result<StateMap, ZprocError> {
        self.when(|snapshot| matches!(snapshot.get(key), Some(Value::Null)), timeout).await
    }

    pub async fn when_not_none(&mut self, key: &str, timeout: Option<Duration>) -> Result<StateMap, ZprocError> {
        self.when(|snapshot| snapshot.get(key).is_some_and(|v| !v.is_null()), timeout).await
    }

    pub async fn when_available(&mut self, key: &str, timeout: Option<Duration>) -> Result<StateMap, ZprocError> {
        self.when(|snapshot| snapshot.contains_key(key), timeout).await
    }
}

fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(a) => !a.is_empty(),
        Value::Object(o) => !o.is_empty(),
    }
}

fn select_keys(before: &StateMap, after: &StateMap, keys: &[&str], exclude: bool) -> BTreeSet<String> {
    let mut selected: BTreeSet<String> = before.keys().chain(after.keys()).cloned().collect();
    if exclude {
        for k in keys {
            selected.remove(*k);
        }
    } else {
        let wanted: BTreeSet<&str> = keys.iter().copied().collect();
        selected.retain(|k| wanted.contains(k.as_str()));
    }
    selected
}
