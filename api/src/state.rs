use std::sync::Arc;

use grafana_mcp_runtime::McpServer;
use grafana_mcp_runtime::lifecycle::{Lifecycle, ServerState};

use crate::sessions::SessionRegistry;
use crate::settings::TransportSettings;

#[derive(Clone)]
pub struct AppState {
    pub server: Arc<McpServer>,
    pub sessions: Arc<SessionRegistry>,
    pub settings: Arc<TransportSettings>,
    pub lifecycle: Arc<Lifecycle>,
}

impl AppState {
    pub fn new(server: Arc<McpServer>, settings: TransportSettings, lifecycle: Arc<Lifecycle>) -> Self {
        Self {
            server,
            sessions: Arc::new(SessionRegistry::new()),
            settings: Arc::new(settings),
            lifecycle,
        }
    }

    pub fn accepting(&self) -> bool {
        self.lifecycle.state() <= ServerState::Listening
    }
}
