use std::time::Duration;

use proto::{ClientIdentity, DictMethod, RrReply, RrRequest, ServerMeta, StateMap, ZprocError};
use serde_json::{Map, Value};
use transport::{client_handshake, RrConnection};

use crate::watcher::Watcher;

/// Dict-mimic facade and atomic-call builder for one namespace on the State
/// Server, grounded on `zproc/state/api.py`'s `StateAPI`/`State`.
///
/// Holds one persistent connection, so every request on a `Client` is
/// attributed to the same [`ClientIdentity`] — the property the watcher's
/// echo suppression and the atomic-call re-entrancy check both rely on.
pub struct Client {
    conn: RrConnection,
    identity: ClientIdentity,
    namespace: String,
    meta: ServerMeta,
    server_addr: String,
    secret: String,
}

impl Client {
    /// Connects to the State Server's bootstrap RR endpoint, completes the
    /// auth handshake and fetches [`ServerMeta`] — the full address book
    /// every other service (watcher, task proxy, result store) is reached
    /// through.
    pub async fn connect(
        server_addr: &str,
        secret: &str,
        namespace: impl Into<String>,
    ) -> Result<Self, ZprocError> {
        let mut conn = RrConnection::connect(server_addr)
            .await
            .map_err(|e| ZprocError::Connection(e.to_string()))?;
        client_handshake(&mut conn, secret).await.map_err(|e| ZprocError::Connection(e.to_string()))?;

        let identity = ClientIdentity::random();
        let reply: RrReply = conn
            .call(&RrRequest::GetServerMeta { identity: identity.clone() })
            .await
            .map_err(|e| ZprocError::Connection(e.to_string()))?;
        let meta: ServerMeta =
            serde_json::from_value(reply.into_result()?).map_err(|e| ZprocError::protocol_error(&e))?;
        tracing::debug!(server_addr, protocol_version = %meta.version, "client connected and fetched server meta");

        Ok(Client {
            conn,
            identity,
            namespace: namespace.into(),
            meta,
            server_addr: server_addr.to_owned(),
            secret: secret.to_owned(),
        })
    }

    #[must_use]
    pub fn identity(&self) -> &ClientIdentity {
        &self.identity
    }

    #[must_use]
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    #[must_use]
    pub fn server_meta(&self) -> &ServerMeta {
        &self.meta
    }

    /// Opens a dedicated connection to the Watcher Service for this
    /// namespace, sharing this client's identity for echo suppression.
    pub async fn watcher(&self) -> Result<Watcher, ZprocError> {
        Watcher::connect(&self.meta.watcher_router, &self.secret, self.identity.clone(), self.namespace.clone())
            .await
    }

    #[must_use]
    pub fn server_address(&self) -> &str {
        &self.server_addr
    }

    async fn call(&mut self, request: RrRequest) -> Result<Value, ZprocError> {
        let reply: RrReply =
            self.conn.call(&request).await.map_err(|e| ZprocError::Connection(e.to_string()))?;
        reply.into_result().map_err(ZprocError::from)
    }

    pub async fn ping(&mut self, echo: Value) -> Result<Value, ZprocError> {
        self.call(RrRequest::Ping { identity: self.identity.clone(), echo }).await
    }

    pub async fn time(&mut self) -> Result<f64, ZprocError> {
        let value = self.call(RrRequest::Time { identity: self.identity.clone() }).await?;
        serde_json::from_value(value).map_err(|e| ZprocError::protocol_error(&e))
    }

    pub async fn get_state(&mut self) -> Result<StateMap, ZprocError> {
        let value = self
            .call(RrRequest::GetState { identity: self.identity.clone(), namespace: self.namespace.clone() })
            .await?;
        serde_json::from_value(value).map_err(|e| ZprocError::protocol_error(&e))
    }

    pub async fn set_state(&mut self, state: StateMap) -> Result<(), ZprocError> {
        self.call(RrRequest::SetState { identity: self.identity.clone(), namespace: self.namespace.clone(), state })
            .await?;
        Ok(())
    }

    async fn run_dict_method(&mut self, method: DictMethod) -> Result<Value, ZprocError> {
        self.call(RrRequest::RunDictMethod {
            identity: self.identity.clone(),
            namespace: self.namespace.clone(),
            method,
        })
        .await
    }

    pub async fn get(&mut self, key: impl Into<String>) -> Result<Value, ZprocError> {
        self.run_dict_method(DictMethod::Get { key: key.into() }).await
    }

    pub async fn set(&mut self, key: impl Into<String>, value: Value) -> Result<(), ZprocError> {
        self.run_dict_method(DictMethod::Set { key: key.into(), value }).await?;
        Ok(())
    }

    pub async fn update(&mut self, entries: StateMap) -> Result<(), ZprocError> {
        self.run_dict_method(DictMethod::Update { entries }).await?;
        Ok(())
    }

    pub async fn merge(&mut self, entries: StateMap) -> Result<(), ZprocError> {
        self.run_dict_method(DictMethod::Merge { entries }).await?;
        Ok(())
    }

    pub async fn clear(&mut self) -> Result<(), ZprocError> {
        self.run_dict_method(DictMethod::Clear).await?;
        Ok(())
    }

    pub async fn pop(&mut self, key: impl Into<String>) -> Result<Value, ZprocError> {
        self.run_dict_method(DictMethod::Pop { key: key.into() }).await
    }

    pub async fn keys(&mut self) -> Result<Vec<String>, ZprocError> {
        let value = self.run_dict_method(DictMethod::Keys).await?;
        serde_json::from_value(value).map_err(|e| ZprocError::protocol_error(&e))
    }

    pub async fn values(&mut self) -> Result<Vec<Value>, ZprocError> {
        let value = self.run_dict_method(DictMethod::Values).await?;
        serde_json::from_value(value).map_err(|e| ZprocError::protocol_error(&e))
    }

    pub async fn items(&mut self) -> Result<Vec<(String, Value)>, ZprocError> {
        let value = self.run_dict_method(DictMethod::Items).await?;
        serde_json::from_value(value).map_err(|e| ZprocError::protocol_error(&e))
    }

    pub async fn get_path(&mut self, path: impl Into<String>) -> Result<Value, ZprocError> {
        self.run_dict_method(DictMethod::GetPath { path: path.into() }).await
    }

    pub async fn set_path(&mut self, path: impl Into<String>, value: Value) -> Result<(), ZprocError> {
        self.run_dict_method(DictMethod::SetPath { path: path.into(), value }).await?;
        Ok(())
    }

    /// Runs a pre-registered named op atomically against this namespace's
    /// live map on the server, per spec.md §4.G. Times out after
    /// `deadline` if given, surfacing [`ZprocError::Timeout`].
    pub async fn run_fn_atomically(
        &mut self,
        op: impl Into<String>,
        args: Vec<Value>,
        kwargs: Map<String, Value>,
        deadline: Option<Duration>,
    ) -> Result<Value, ZprocError> {
        let request = RrRequest::RunFnAtomically {
            identity: self.identity.clone(),
            namespace: self.namespace.clone(),
            op: op.into(),
            args,
            kwargs,
        };
        match deadline {
            Some(d) => {
                tokio::time::timeout(d, self.call(request)).await.map_err(|_| ZprocError::Timeout)?
            }
            None => self.call(request).await,
        }
    }
}
