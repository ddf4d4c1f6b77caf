//! Server health reporting
//!
//! Backs `GET /health`. Proxy managers judge endpoints with a `ping`
//! instead, since not every transport has a health route.

use {
    crate::{protocol::LATEST_PROTOCOL_VERSION, server::ServerState},
    chrono::{DateTime, Utc},
    serde::{Deserialize, Serialize},
    std::time::Instant,
};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthStatus {
    /// `"healthy"` while serving, otherwise the lifecycle state.
    pub status: String,
    pub server: String,
    pub version: String,
    pub protocol_version: String,
    pub session_count: usize,
    pub in_flight: usize,
    pub uptime_seconds: u64,
    pub checked_at: DateTime<Utc>,
}

impl HealthStatus {
    pub fn is_healthy(&self) -> bool {
        self.status == "healthy"
    }
}

#[derive(Debug, Clone)]
pub struct HealthChecker {
    started: Instant,
    server: String,
    version: String,
}

impl HealthChecker {
    pub fn new(server: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            started: Instant::now(),
            server: server.into(),
            version: version.into(),
        }
    }

    pub fn status(&self, state: ServerState, session_count: usize, in_flight: usize) -> HealthStatus {
        HealthStatus {
            status: match state {
                ServerState::Serving => "healthy".to_string(),
                other => other.to_string(),
            },
            server: self.server.clone(),
            version: self.version.clone(),
            protocol_version: LATEST_PROTOCOL_VERSION.to_string(),
            session_count,
            in_flight,
            uptime_seconds: self.started.elapsed().as_secs(),
            checked_at: Utc::now(),
        }
    }
}
