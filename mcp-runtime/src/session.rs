use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use futures::future::AbortHandle;
use serde_json::Value;
use uuid::Uuid;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionKind {
    Stdio,
    Sse,
    StreamableHttp,
}

impl SessionKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Stdio => "stdio",
            Self::Sse => "sse",
            Self::StreamableHttp => "streamable-http",
        }
    }
}

/// One logical client conversation. Owns the request-scoped dashboard cache
/// and the handles of requests still in flight, so closing a session drops
/// both.
#[derive(Debug)]
pub struct Session {
    id: String,
    kind: SessionKind,
    opened_at: DateTime<Utc>,
    last_seen: Mutex<Instant>,
    dashboards: Mutex<HashMap<String, Value>>,
    in_flight: Mutex<HashMap<String, InFlight>>,
    next_generation: AtomicU64,
    closed: AtomicBool,
}

#[derive(Debug)]
struct InFlight {
    generation: u64,
    handle: AbortHandle,
}

/// Keeps a request registered as in flight. Dropping it releases the entry,
/// whether the request completed or its future was dropped mid-call.
#[derive(Debug)]
#[must_use = "the request is released as soon as the guard drops"]
pub struct RequestGuard<'a> {
    session: &'a Session,
    request_id: String,
    generation: u64,
}

impl Drop for RequestGuard<'_> {
    fn drop(&mut self) {
        self.session.release(&self.request_id, self.generation);
    }
}

impl Session {
    pub fn new(kind: SessionKind) -> Self {
        let id = match kind {
            SessionKind::Stdio => format!("stdio-{}", Uuid::now_v7()),
            _ => Uuid::now_v7().simple().to_string(),
        };
        Self::with_id(id, kind)
    }

    pub fn with_id(id: impl Into<String>, kind: SessionKind) -> Self {
        Self {
            id: id.into(),
            kind,
            opened_at: Utc::now(),
            last_seen: Mutex::new(Instant::now()),
            dashboards: Mutex::new(HashMap::new()),
            in_flight: Mutex::new(HashMap::new()),
            next_generation: AtomicU64::new(0),
            closed: AtomicBool::new(false),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn kind(&self) -> SessionKind {
        self.kind
    }

    pub fn opened_at(&self) -> DateTime<Utc> {
        self.opened_at
    }

    pub fn touch(&self) {
        if let Ok(mut last_seen) = self.last_seen.lock() {
            *last_seen = Instant::now();
        }
    }

    pub fn idle_for(&self) -> Duration {
        self.last_seen
            .lock()
            .map(|last_seen| last_seen.elapsed())
            .unwrap_or_default()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn cached_dashboard(&self, uid: &str) -> Option<Value> {
        self.dashboards.lock().ok()?.get(uid).cloned()
    }

    pub fn cache_dashboard(&self, uid: &str, dashboard: Value) {
        if self.is_closed() {
            return;
        }
        if let Ok(mut cache) = self.dashboards.lock() {
            cache.insert(uid.to_string(), dashboard);
        }
    }

    pub fn cached_dashboard_count(&self) -> usize {
        self.dashboards.lock().map(|cache| cache.len()).unwrap_or(0)
    }

    /// Remember how to abort an in-flight request, keyed by its JSON-RPC id.
    /// Returns `None` when a request with the same id is still running.
    pub fn track_request(&self, request_id: &str, handle: AbortHandle) -> Option<RequestGuard<'_>> {
        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
        let mut in_flight = self.in_flight.lock().ok()?;
        if in_flight.contains_key(request_id) {
            tracing::warn!(
                event = "rpc.duplicate_id",
                session_id = %self.id,
                request_id,
            );
            return None;
        }
        in_flight.insert(request_id.to_string(), InFlight { generation, handle });
        Some(RequestGuard {
            session: self,
            request_id: request_id.to_string(),
            generation,
        })
    }

    /// Only the registration that created the entry may remove it.
    fn release(&self, request_id: &str, generation: u64) {
        if let Ok(mut in_flight) = self.in_flight.lock() {
            if in_flight
                .get(request_id)
                .is_some_and(|entry| entry.generation == generation)
            {
                in_flight.remove(request_id);
            }
        }
    }

    /// Abort a request still in flight. Returns false if it already finished.
    pub fn cancel_request(&self, request_id: &str) -> bool {
        let handle = self
            .in_flight
            .lock()
            .ok()
            .and_then(|mut in_flight| in_flight.remove(request_id));
        match handle {
            Some(entry) => {
                entry.handle.abort();
                true
            }
            None => false,
        }
    }

    pub fn pending_requests(&self) -> usize {
        self.in_flight
            .lock()
            .map(|in_flight| in_flight.len())
            .unwrap_or(0)
    }

    /// Abort everything still running and drop the cache. Idempotent.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Ok(mut in_flight) = self.in_flight.lock() {
            for (_, entry) in in_flight.drain() {
                entry.handle.abort();
            }
        }
        if let Ok(mut cache) = self.dashboards.lock() {
            cache.clear();
        }
        tracing::debug!(event = "session.closed", session_id = %self.id, kind = self.kind.as_str());
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.close();
    }
}

/// JSON-RPC request ids carried by an incoming message (one per request in
/// a batch; notifications carry none).
pub fn request_ids(message: &Value) -> Vec<String> {
    let single = |item: &Value| -> Option<String> {
        let obj = item.as_object()?;
        obj.get("method")?;
        obj.get("id").map(request_key)
    };
    match message {
        Value::Array(items) => items.iter().filter_map(single).collect(),
        other => single(other).into_iter().collect(),
    }
}

/// Canonical string form of a JSON-RPC id, so `1` and `"1"` stay distinct.
pub fn request_key(id: &Value) -> String {
    id.to_string()
}
