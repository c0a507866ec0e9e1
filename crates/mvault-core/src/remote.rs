//! Remote Broker: bearer-session task delivery to a single remote
//! agent, held entirely in memory.
//!
//! Uses the same cooperative wake-up shape as a DB-backed job-control poll
//! loop, reimplemented here over `tokio::sync::Notify` since the broker has
//! no DB-backed queue row to poll. The session and its tasks vanish on
//! `end_session()` or expiry; nothing here is durable.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use rand::RngCore;
use serde_json::{Map, Value};
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Notify, RwLock};

const DEFAULT_TTL: ChronoDuration = ChronoDuration::hours(4);
const LONG_POLL_TIMEOUT: Duration = Duration::from_secs(20);
const DOWNLOAD_URLS: &str = "DOWNLOAD_URLS";

#[derive(Debug, Clone, serde::Serialize)]
pub struct RemoteStatus {
    pub active: bool,
    pub expires_at: Option<DateTime<Utc>>,
    pub agent_info: Option<Value>,
    pub last_heartbeat: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BrokerError {
    NoActiveSession,
    TaskNotFound,
}

impl std::fmt::Display for BrokerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BrokerError::NoActiveSession => write!(f, "no active remote session"),
            BrokerError::TaskNotFound => write!(f, "remote task not found"),
        }
    }
}

impl std::error::Error for BrokerError {}

#[derive(Debug, Clone, serde::Serialize)]
pub struct RemoteTask {
    pub id: String,
    pub task_type: String,
    pub payload: Value,
    pub status: String,
    pub progress: f64,
    pub message: Option<String>,
    pub error: Option<String>,
    pub meta: Map<String, Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl RemoteTask {
    fn new(task_type: &str, payload: Value) -> Self {
        let now = Utc::now();
        RemoteTask {
            id: uuid::Uuid::new_v4().to_string(),
            task_type: task_type.to_string(),
            payload,
            status: "pending".to_string(),
            progress: 0.0,
            message: None,
            error: None,
            meta: Map::new(),
            created_at: now,
            updated_at: now,
        }
    }

    fn item_keys(&self) -> Vec<String> {
        self.payload
            .get("items")
            .and_then(Value::as_array)
            .map(|items| items.iter().filter_map(item_key).collect())
            .unwrap_or_default()
    }
}

fn item_key(item: &Value) -> Option<String> {
    item.get("relpath")
        .or_else(|| item.get("url"))
        .and_then(Value::as_str)
        .map(str::to_string)
}

fn items_array_mut(task: &mut RemoteTask) -> &mut Vec<Value> {
    if !matches!(task.payload.get("items"), Some(Value::Array(_))) {
        task.payload = Value::Object({
            let mut m = Map::new();
            m.insert("items".to_string(), Value::Array(Vec::new()));
            m
        });
    }
    task.payload.get_mut("items").unwrap().as_array_mut().unwrap()
}

struct RemoteSession {
    api_key: String,
    expires_at: DateTime<Utc>,
    agent_info: Option<Value>,
    last_heartbeat: Option<DateTime<Utc>>,
    tasks: VecDeque<RemoteTask>,
}

impl RemoteSession {
    fn new(ttl: ChronoDuration) -> Self {
        RemoteSession {
            api_key: generate_bearer(),
            expires_at: Utc::now() + ttl,
            agent_info: None,
            last_heartbeat: None,
            tasks: VecDeque::new(),
        }
    }

    fn is_expired(&self) -> bool {
        Utc::now() >= self.expires_at
    }
}

fn generate_bearer() -> String {
    let mut bytes = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut bytes);
    encode_url_safe(&bytes)
}

/// URL-safe base64 without padding, hand-rolled to avoid adding a base64
/// dependency for 32 bytes of random data.
fn encode_url_safe(bytes: &[u8]) -> String {
    const ALPHABET: &[u8; 64] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789-_";
    let mut out = String::with_capacity((bytes.len() * 4).div_ceil(3));
    for chunk in bytes.chunks(3) {
        let b0 = chunk[0] as u32;
        let b1 = *chunk.get(1).unwrap_or(&0) as u32;
        let b2 = *chunk.get(2).unwrap_or(&0) as u32;
        let n = (b0 << 16) | (b1 << 8) | b2;
        out.push(ALPHABET[(n >> 18 & 0x3f) as usize] as char);
        out.push(ALPHABET[(n >> 12 & 0x3f) as usize] as char);
        if chunk.len() > 1 {
            out.push(ALPHABET[(n >> 6 & 0x3f) as usize] as char);
        }
        if chunk.len() > 2 {
            out.push(ALPHABET[(n & 0x3f) as usize] as char);
        }
    }
    out
}

/// Constant-time byte comparison so bearer checks don't leak timing
/// information about where the mismatch occurred.
fn constant_time_eq(a: &str, b: &str) -> bool {
    let (a, b) = (a.as_bytes(), b.as_bytes());
    if a.len() != b.len() {
        return false;
    }
    let mut diff = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        diff |= x ^ y;
    }
    diff == 0
}

#[derive(Clone)]
pub struct RemoteBroker {
    session: Arc<RwLock<Option<RemoteSession>>>,
    notify: Arc<Notify>,
}

impl Default for RemoteBroker {
    fn default() -> Self {
        Self::new()
    }
}

impl RemoteBroker {
    pub fn new() -> Self {
        RemoteBroker {
            session: Arc::new(RwLock::new(None)),
            notify: Arc::new(Notify::new()),
        }
    }

    /// Starts a fresh session, discarding any prior one and its tasks.
    pub async fn enable_session(&self) -> String {
        let mut guard = self.session.write().await;
        let session = RemoteSession::new(DEFAULT_TTL);
        let key = session.api_key.clone();
        *guard = Some(session);
        key
    }

    pub async fn end_session(&self) {
        *self.session.write().await = None;
        self.notify.notify_waiters();
    }

    /// Clears an expired session as a side effect of checking it, so the
    /// next caller sees a clean `None` rather than a stale expired one.
    async fn active_session(&self) -> bool {
        let mut guard = self.session.write().await;
        match guard.as_ref() {
            Some(s) if s.is_expired() => {
                *guard = None;
                false
            }
            Some(_) => true,
            None => false,
        }
    }

    pub async fn validate_key(&self, key: &str) -> bool {
        if !self.active_session().await {
            return false;
        }
        let guard = self.session.read().await;
        match guard.as_ref() {
            Some(s) => constant_time_eq(&s.api_key, key),
            None => false,
        }
    }

    /// Snapshot for `GET /api/remote/status`; never exposes the bearer key.
    pub async fn status(&self) -> RemoteStatus {
        if !self.active_session().await {
            return RemoteStatus { active: false, expires_at: None, agent_info: None, last_heartbeat: None };
        }
        let guard = self.session.read().await;
        match guard.as_ref() {
            Some(s) => RemoteStatus {
                active: true,
                expires_at: Some(s.expires_at),
                agent_info: s.agent_info.clone(),
                last_heartbeat: s.last_heartbeat,
            },
            None => RemoteStatus { active: false, expires_at: None, agent_info: None, last_heartbeat: None },
        }
    }

    pub async fn register_agent(&self, info: Value) -> Result<(), BrokerError> {
        let mut guard = self.session.write().await;
        let session = guard.as_mut().ok_or(BrokerError::NoActiveSession)?;
        session.agent_info = Some(info);
        session.last_heartbeat = Some(Utc::now());
        Ok(())
    }

    /// Bumps `last_heartbeat` only; does not extend `expires_at`.
    pub async fn heartbeat(&self) -> Result<(), BrokerError> {
        let mut guard = self.session.write().await;
        let session = guard.as_mut().ok_or(BrokerError::NoActiveSession)?;
        session.last_heartbeat = Some(Utc::now());
        Ok(())
    }

    /// Long-poll: returns the earliest pending task immediately, or waits
    /// for a wake-up (a new enqueue) up to 20 seconds.
    pub async fn next_task(&self) -> Result<Option<RemoteTask>, BrokerError> {
        if let Some(task) = self.try_take_pending().await? {
            return Ok(Some(task));
        }
        let notified = self.notify.notified();
        tokio::select! {
            _ = notified => {}
            _ = tokio::time::sleep(LONG_POLL_TIMEOUT) => {}
        }
        self.try_take_pending().await
    }

    async fn try_take_pending(&self) -> Result<Option<RemoteTask>, BrokerError> {
        let mut guard = self.session.write().await;
        let session = guard.as_mut().ok_or(BrokerError::NoActiveSession)?;
        if let Some(task) = session.tasks.iter_mut().find(|t| t.status == "pending") {
            task.status = "running".to_string();
            task.updated_at = Utc::now();
            return Ok(Some(task.clone()));
        }
        Ok(None)
    }

    /// Mutates a task's status/progress/message/error/meta. `meta.items_status`
    /// is merged key-by-key. Updates other than `cancelled` are discarded once
    /// the UI has cancelled the task.
    pub async fn progress(&self, task_id: &str, update: ProgressUpdate) -> Result<(), BrokerError> {
        let mut guard = self.session.write().await;
        let session = guard.as_mut().ok_or(BrokerError::NoActiveSession)?;
        let task = session.tasks.iter_mut().find(|t| t.id == task_id).ok_or(BrokerError::TaskNotFound)?;

        if task.status == "cancelled" && update.status.as_deref() != Some("cancelled") {
            return Ok(());
        }

        if let Some(status) = update.status {
            task.status = status;
        }
        if let Some(progress) = update.progress {
            task.progress = progress;
        }
        if let Some(message) = update.message {
            task.message = Some(message);
        }
        if let Some(error) = update.error {
            task.error = Some(error);
        }
        if let Some(items_status) = update.items_status {
            let entry = task
                .meta
                .entry("items_status".to_string())
                .or_insert_with(|| Value::Object(Map::new()));
            if let Value::Object(existing) = entry {
                for (k, v) in items_status {
                    existing.insert(k, v);
                }
            }
        }
        task.updated_at = Utc::now();
        Ok(())
    }

    pub async fn list_tasks(&self) -> Vec<RemoteTask> {
        let guard = self.session.read().await;
        guard.as_ref().map(|s| s.tasks.iter().cloned().collect()).unwrap_or_default()
    }

    pub async fn cancel_task(&self, task_id: &str) -> Result<(), BrokerError> {
        let mut guard = self.session.write().await;
        let session = guard.as_mut().ok_or(BrokerError::NoActiveSession)?;
        let task = session.tasks.iter_mut().find(|t| t.id == task_id).ok_or(BrokerError::TaskNotFound)?;
        task.status = "cancelled".to_string();
        task.updated_at = Utc::now();
        Ok(())
    }

    /// Enqueues a task. For `DOWNLOAD_URLS`, dedupes incoming items against
    /// any `pending`/`running` task of the same type first.
    pub async fn enqueue_task(&self, task_type: &str, payload: Value) -> Result<RemoteTask, BrokerError> {
        let mut guard = self.session.write().await;
        let session = guard.as_mut().ok_or(BrokerError::NoActiveSession)?;

        let task = if task_type == DOWNLOAD_URLS {
            Self::enqueue_download_urls(session, payload)
        } else {
            let task = RemoteTask::new(task_type, payload);
            session.tasks.push_back(task.clone());
            task
        };

        drop(guard);
        self.notify.notify_waiters();
        Ok(task)
    }

    fn enqueue_download_urls(session: &mut RemoteSession, payload: Value) -> RemoteTask {
        let incoming: Vec<Value> = payload.get("items").and_then(Value::as_array).cloned().unwrap_or_default();
        let incoming_keys: Vec<String> = incoming.iter().filter_map(item_key).collect();

        let seen: std::collections::HashSet<String> = session
            .tasks
            .iter()
            .filter(|t| t.task_type == DOWNLOAD_URLS && (t.status == "pending" || t.status == "running"))
            .flat_map(|t| t.item_keys())
            .collect();

        let fresh_items: Vec<Value> = incoming
            .into_iter()
            .zip(incoming_keys.iter())
            .filter(|(_, key)| !seen.contains(*key))
            .map(|(item, _)| item)
            .collect();

        if fresh_items.is_empty() {
            if let Some(existing) = session
                .tasks
                .iter()
                .find(|t| t.task_type == DOWNLOAD_URLS && (t.status == "pending" || t.status == "running"))
            {
                return existing.clone();
            }
        }

        if let Some(pending) = session
            .tasks
            .iter_mut()
            .find(|t| t.task_type == DOWNLOAD_URLS && t.status == "pending")
        {
            items_array_mut(pending).extend(fresh_items);
            pending.updated_at = Utc::now();
            return pending.clone();
        }

        let new_payload = serde_json::json!({"items": fresh_items});
        let task = RemoteTask::new(DOWNLOAD_URLS, new_payload);
        session.tasks.push_back(task.clone());
        task
    }
}

#[derive(Debug, Default, serde::Deserialize)]
pub struct ProgressUpdate {
    pub status: Option<String>,
    pub progress: Option<f64>,
    pub message: Option<String>,
    pub error: Option<String>,
    pub items_status: Option<Map<String, Value>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn validate_key_requires_active_session() {
        let broker = RemoteBroker::new();
        assert!(!broker.validate_key("anything").await);
        let key = broker.enable_session().await;
        assert!(broker.validate_key(&key).await);
        assert!(!broker.validate_key("wrong").await);
        broker.end_session().await;
        assert!(!broker.validate_key(&key).await);
    }

    #[tokio::test]
    async fn next_task_returns_immediately_when_pending() {
        let broker = RemoteBroker::new();
        broker.enable_session().await;
        broker.enqueue_task(DOWNLOAD_URLS, serde_json::json!({"items": [{"relpath": "a.bin"}]})).await.unwrap();
        let task = broker.next_task().await.unwrap().unwrap();
        assert_eq!(task.task_type, DOWNLOAD_URLS);
        assert_eq!(task.status, "running");
    }

    #[tokio::test]
    async fn download_urls_coalesces_redundant_items() {
        let broker = RemoteBroker::new();
        broker.enable_session().await;
        let first = broker
            .enqueue_task(DOWNLOAD_URLS, serde_json::json!({"items": [{"relpath": "a.bin"}]}))
            .await
            .unwrap();

        // fully redundant: returns the existing pending task untouched
        let redundant = broker
            .enqueue_task(DOWNLOAD_URLS, serde_json::json!({"items": [{"relpath": "a.bin"}]}))
            .await
            .unwrap();
        assert_eq!(redundant.id, first.id);
        assert_eq!(redundant.item_keys().len(), 1);

        // partially fresh: B is appended to the same pending task
        let appended = broker
            .enqueue_task(
                DOWNLOAD_URLS,
                serde_json::json!({"items": [{"relpath": "a.bin"}, {"relpath": "b.bin"}]}),
            )
            .await
            .unwrap();
        assert_eq!(appended.id, first.id);
        assert_eq!(appended.item_keys().len(), 2);
    }

    #[tokio::test]
    async fn download_urls_creates_follow_up_when_first_is_running() {
        let broker = RemoteBroker::new();
        broker.enable_session().await;
        broker
            .enqueue_task(DOWNLOAD_URLS, serde_json::json!({"items": [{"relpath": "a.bin"}]}))
            .await
            .unwrap();
        broker.next_task().await.unwrap(); // moves it to running

        let follow_up = broker
            .enqueue_task(DOWNLOAD_URLS, serde_json::json!({"items": [{"relpath": "b.bin"}]}))
            .await
            .unwrap();
        assert_eq!(follow_up.status, "pending");
        assert_eq!(follow_up.item_keys(), vec!["b.bin".to_string()]);
    }

    #[tokio::test]
    async fn progress_merges_items_status_and_respects_cancellation() {
        let broker = RemoteBroker::new();
        broker.enable_session().await;
        let task = broker.enqueue_task("SCAN", serde_json::json!({})).await.unwrap();

        let mut items = Map::new();
        items.insert("a".to_string(), serde_json::json!("done"));
        broker
            .progress(&task.id, ProgressUpdate { items_status: Some(items), ..Default::default() })
            .await
            .unwrap();

        let mut more = Map::new();
        more.insert("b".to_string(), serde_json::json!("done"));
        broker
            .progress(&task.id, ProgressUpdate { items_status: Some(more), ..Default::default() })
            .await
            .unwrap();

        let tasks = broker.list_tasks().await;
        let t = tasks.iter().find(|t| t.id == task.id).unwrap();
        let items_status = t.meta.get("items_status").unwrap().as_object().unwrap();
        assert_eq!(items_status.len(), 2);

        broker.cancel_task(&task.id).await.unwrap();
        broker
            .progress(&task.id, ProgressUpdate { status: Some("running".to_string()), ..Default::default() })
            .await
            .unwrap();
        let tasks = broker.list_tasks().await;
        let t = tasks.iter().find(|t| t.id == task.id).unwrap();
        assert_eq!(t.status, "cancelled");
    }
}
