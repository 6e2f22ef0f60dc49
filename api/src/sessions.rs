//! Open HTTP sessions, keyed by session id.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use grafana_mcp_runtime::dispatch::Inbound;
use grafana_mcp_runtime::lifecycle::{ServerState, shutdown_requested};
use grafana_mcp_runtime::session::{Session, SessionKind};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

#[derive(Clone, Debug)]
pub struct SessionEntry {
    pub session: Arc<Session>,
    /// Event-stream sessions feed a message pump; streamable sessions
    /// answer inline and have none.
    pub inbound: Option<mpsc::Sender<Inbound>>,
}

#[derive(Debug, Default)]
pub struct SessionRegistry {
    entries: Mutex<HashMap<String, SessionEntry>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, session: Arc<Session>, inbound: Option<mpsc::Sender<Inbound>>) {
        let id = session.id().to_string();
        if let Ok(mut entries) = self.entries.lock() {
            entries.insert(id.clone(), SessionEntry { session, inbound });
        }
        tracing::info!(event = "session.opened", session_id = %id, open = self.len());
    }

    pub fn get(&self, id: &str) -> Option<SessionEntry> {
        let entry = self
            .entries
            .lock()
            .ok()
            .and_then(|entries| entries.get(id).cloned())?;
        if entry.session.is_closed() {
            self.remove(id);
            return None;
        }
        Some(entry)
    }

    /// Drop a session and abort whatever it still has running.
    pub fn remove(&self, id: &str) -> bool {
        let removed = self
            .entries
            .lock()
            .ok()
            .and_then(|mut entries| entries.remove(id));
        match removed {
            Some(entry) => {
                entry.session.close();
                true
            }
            None => false,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.lock().map(|entries| entries.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Close streamable sessions idle for longer than `ttl`. Event-stream
    /// sessions live as long as their connection.
    pub fn reap_idle(&self, ttl: Duration) -> usize {
        let expired: Vec<String> = self
            .entries
            .lock()
            .map(|entries| {
                entries
                    .iter()
                    .filter(|(_, entry)| {
                        entry.session.kind() == SessionKind::StreamableHttp
                            && entry.session.idle_for() > ttl
                    })
                    .map(|(id, _)| id.clone())
                    .collect()
            })
            .unwrap_or_default();
        for id in &expired {
            self.remove(id);
            tracing::info!(event = "session.expired", session_id = %id);
        }
        expired.len()
    }

    pub fn close_all(&self) -> usize {
        let drained: Vec<SessionEntry> = self
            .entries
            .lock()
            .map(|mut entries| entries.drain().map(|(_, entry)| entry).collect())
            .unwrap_or_default();
        for entry in &drained {
            entry.session.close();
        }
        drained.len()
    }
}

pub fn spawn_reaper(
    registry: Arc<SessionRegistry>,
    ttl: Duration,
    interval: Duration,
    shutdown: watch::Receiver<ServerState>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.tick().await;
        let stop = shutdown_requested(shutdown);
        tokio::pin!(stop);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let reaped = registry.reap_idle(ttl);
                    if reaped > 0 {
                        tracing::info!(event = "session.reaped", reaped, open = registry.len());
                    }
                }
                _ = &mut stop => break,
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn remove_closes_the_session() {
        let registry = SessionRegistry::new();
        let session = Arc::new(Session::new(SessionKind::StreamableHttp));
        registry.insert(Arc::clone(&session), None);
        assert!(registry.get(session.id()).is_some());
        assert!(registry.remove(session.id()));
        assert!(session.is_closed());
        assert!(registry.get(session.id()).is_none());
        assert!(!registry.remove(session.id()));
    }

    #[tokio::test]
    async fn only_idle_streamable_sessions_are_reaped() {
        let registry = SessionRegistry::new();
        let streamable = Arc::new(Session::new(SessionKind::StreamableHttp));
        let sse = Arc::new(Session::new(SessionKind::Sse));
        registry.insert(Arc::clone(&streamable), None);
        registry.insert(Arc::clone(&sse), None);

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(registry.reap_idle(Duration::from_millis(5)), 1);
        assert!(streamable.is_closed());
        assert!(!sse.is_closed());
        assert_eq!(registry.len(), 1);

        assert_eq!(registry.close_all(), 1);
        assert!(sse.is_closed());
        assert!(registry.is_empty());
    }
}
