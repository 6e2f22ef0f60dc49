//! Process lifecycle: `Unstarted -> Listening -> ShuttingDown -> Stopped`.
//!
//! Transports subscribe to the state and stop accepting work once it leaves
//! `Listening`. A shutdown requested before the listener is up skips straight
//! to `ShuttingDown`.

use grafana_mcp_core::error::{Error, Result};
use serde::Serialize;
use tokio::sync::watch;

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ServerState {
    Unstarted,
    Listening,
    ShuttingDown,
    Stopped,
}

impl ServerState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Unstarted => "unstarted",
            Self::Listening => "listening",
            Self::ShuttingDown => "shutting_down",
            Self::Stopped => "stopped",
        }
    }

    fn can_move_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Unstarted, Self::Listening)
                | (Self::Unstarted, Self::ShuttingDown)
                | (Self::Listening, Self::ShuttingDown)
                | (Self::ShuttingDown, Self::Stopped)
        )
    }
}

#[derive(Debug)]
pub struct Lifecycle {
    state: watch::Sender<ServerState>,
}

impl Default for Lifecycle {
    fn default() -> Self {
        Self::new()
    }
}

impl Lifecycle {
    pub fn new() -> Self {
        let (state, _) = watch::channel(ServerState::Unstarted);
        Self { state }
    }

    pub fn state(&self) -> ServerState {
        *self.state.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<ServerState> {
        self.state.subscribe()
    }

    pub fn transition(&self, next: ServerState) -> Result<()> {
        let mut outcome = Ok(());
        self.state.send_if_modified(|current| {
            if current.can_move_to(next) {
                tracing::info!(event = "lifecycle.transition", from = current.as_str(), to = next.as_str());
                *current = next;
                true
            } else {
                outcome = Err(Error::Internal(format!(
                    "invalid lifecycle transition {} -> {}",
                    current.as_str(),
                    next.as_str()
                )));
                false
            }
        });
        outcome
    }

    /// Request shutdown from any live state. Returns false if shutdown was
    /// already under way.
    pub fn begin_shutdown(&self) -> bool {
        self.transition(ServerState::ShuttingDown).is_ok()
    }
}

/// Resolve once the observed state reaches `ShuttingDown` or later.
pub async fn shutdown_requested(mut state: watch::Receiver<ServerState>) {
    // A closed channel means the owner is gone; treat it as shutdown.
    let _ = state
        .wait_for(|state| *state >= ServerState::ShuttingDown)
        .await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn happy_path_transitions() {
        let lifecycle = Lifecycle::new();
        assert_eq!(lifecycle.state(), ServerState::Unstarted);
        lifecycle.transition(ServerState::Listening).expect("listen");
        assert!(lifecycle.begin_shutdown());
        lifecycle.transition(ServerState::Stopped).expect("stop");
        assert_eq!(lifecycle.state(), ServerState::Stopped);
    }

    #[test]
    fn invalid_transitions_are_rejected() {
        let lifecycle = Lifecycle::new();
        assert!(lifecycle.transition(ServerState::Stopped).is_err());
        lifecycle.transition(ServerState::Listening).expect("listen");
        assert!(lifecycle.transition(ServerState::Listening).is_err());
        assert!(lifecycle.begin_shutdown());
        assert!(!lifecycle.begin_shutdown());
    }

    #[tokio::test]
    async fn subscribers_observe_shutdown() {
        let lifecycle = Lifecycle::new();
        lifecycle.transition(ServerState::Listening).expect("listen");
        let waiter = tokio::spawn(shutdown_requested(lifecycle.subscribe()));
        lifecycle.begin_shutdown();
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("waiter finished")
            .expect("waiter joined");
    }
}
