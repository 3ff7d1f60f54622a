//! Scripted `TelemetryApi` for tests.
//!
//! Replies are scripted per device: queued replies are consumed first, then
//! the sticky reply (if any) answers every further call. Unscripted devices
//! are rejected with result code 3. Logins succeed with `session-N` unless a
//! reply was queued with [`ScriptedApi::script_login`].

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{json, Value};

use crate::client::TelemetryApi;
use crate::error::{FetchError, Result};
use crate::session::SessionToken;

/// A scripted response.
#[derive(Debug, Clone)]
pub enum Reply {
    Json(Value),
    Timeout,
    Network(String),
    /// Panic inside the call, for exercising task isolation
    Panic,
}

impl Reply {
    fn into_result(self) -> Result<Value> {
        match self {
            Reply::Json(body) => Ok(body),
            Reply::Timeout => Err(FetchError::Timeout),
            Reply::Network(message) => Err(FetchError::Network(message)),
            Reply::Panic => panic!("scripted upstream panic"),
        }
    }
}

#[derive(Debug, Default)]
struct Script {
    queued: VecDeque<Reply>,
    sticky: Option<Reply>,
}

impl Script {
    fn next(&mut self) -> Option<Reply> {
        self.queued.pop_front().or_else(|| self.sticky.clone())
    }
}

/// In-memory upstream with call counters.
#[derive(Debug, Default)]
pub struct ScriptedApi {
    logins: Mutex<VecDeque<Reply>>,
    status: Mutex<HashMap<String, Script>>,
    metadata: Mutex<HashMap<String, Script>>,
    login_delay: Option<Duration>,
    login_calls: AtomicU64,
    status_calls: AtomicU64,
    metadata_calls: AtomicU64,
}

impl ScriptedApi {
    pub fn new() -> Self {
        Self::default()
    }

    /// Delay every login, to widen race windows.
    pub fn with_login_delay(mut self, delay: Duration) -> Self {
        self.login_delay = Some(delay);
        self
    }

    /// Queue a reply for the next login.
    pub fn script_login(&self, reply: Reply) {
        self.logins.lock().push_back(reply);
    }

    /// Answer every status call for `device_id` with `reply`.
    pub fn set_status(&self, device_id: &str, reply: Reply) {
        self.status.lock().entry(device_id.to_string()).or_default().sticky = Some(reply);
    }

    /// Answer the next status call for `device_id` with `reply`.
    pub fn queue_status(&self, device_id: &str, reply: Reply) {
        self.status
            .lock()
            .entry(device_id.to_string())
            .or_default()
            .queued
            .push_back(reply);
    }

    /// Answer every metadata call for `device_id` with `reply`.
    pub fn set_metadata(&self, device_id: &str, reply: Reply) {
        self.metadata.lock().entry(device_id.to_string()).or_default().sticky = Some(reply);
    }

    /// Answer the next metadata call for `device_id` with `reply`.
    pub fn queue_metadata(&self, device_id: &str, reply: Reply) {
        self.metadata
            .lock()
            .entry(device_id.to_string())
            .or_default()
            .queued
            .push_back(reply);
    }

    pub fn login_calls(&self) -> u64 {
        self.login_calls.load(Ordering::SeqCst)
    }

    pub fn status_calls(&self) -> u64 {
        self.status_calls.load(Ordering::SeqCst)
    }

    pub fn metadata_calls(&self) -> u64 {
        self.metadata_calls.load(Ordering::SeqCst)
    }

    fn reply_for(scripts: &Mutex<HashMap<String, Script>>, device_id: &str) -> Reply {
        scripts
            .lock()
            .get_mut(device_id)
            .and_then(Script::next)
            .unwrap_or_else(|| Reply::Json(json!({"result": 3})))
    }
}

#[async_trait]
impl TelemetryApi for ScriptedApi {
    async fn login(&self, _account: &str, _password: &str) -> Result<Value> {
        let n = self.login_calls.fetch_add(1, Ordering::SeqCst) + 1;
        if let Some(delay) = self.login_delay {
            tokio::time::sleep(delay).await;
        }
        let scripted = self.logins.lock().pop_front();
        scripted
            .unwrap_or_else(|| Reply::Json(json!({"result": 0, "jsession": format!("session-{n}")})))
            .into_result()
    }

    async fn device_status(&self, _session: &SessionToken, device_id: &str) -> Result<Value> {
        self.status_calls.fetch_add(1, Ordering::SeqCst);
        Self::reply_for(&self.status, device_id).into_result()
    }

    async fn device_metadata(&self, _session: &SessionToken, device_id: &str) -> Result<Value> {
        self.metadata_calls.fetch_add(1, Ordering::SeqCst);
        Self::reply_for(&self.metadata, device_id).into_result()
    }
}
