//! Server lifecycle: constructed -> negotiated -> serving -> stopping -> stopped.
//!
//! Transitions only move forward. Calls are admitted only while serving;
//! stopping waits for admitted calls to finish before anything is torn down.

use {
    crate::error::{McpError, McpResult},
    parking_lot::Mutex,
    std::{
        fmt,
        sync::{
            atomic::{AtomicUsize, Ordering},
            Arc,
        },
    },
    tokio::sync::Notify,
    tokio_util::sync::CancellationToken,
    tracing::info,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ServerState {
    Constructed,
    Negotiated,
    Serving,
    Stopping,
    Stopped,
}

impl fmt::Display for ServerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Constructed => "constructed",
            Self::Negotiated => "negotiated",
            Self::Serving => "serving",
            Self::Stopping => "stopping",
            Self::Stopped => "stopped",
        };
        f.write_str(name)
    }
}

impl ServerState {
    fn can_advance_to(self, next: ServerState) -> bool {
        use ServerState::*;
        matches!(
            (self, next),
            (Constructed, Negotiated)
                | (Negotiated, Serving)
                | (Constructed | Negotiated | Serving, Stopping)
                | (Stopping, Stopped)
        )
    }
}

#[derive(Debug)]
pub struct Lifecycle {
    state: Mutex<ServerState>,
    in_flight: AtomicUsize,
    drained: Notify,
    /// Cancelled once in-flight calls have drained; connections and
    /// listeners exit on it.
    shutdown: CancellationToken,
    stopped: CancellationToken,
}

impl Default for Lifecycle {
    fn default() -> Self {
        Self::new()
    }
}

impl Lifecycle {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(ServerState::Constructed),
            in_flight: AtomicUsize::new(0),
            drained: Notify::new(),
            shutdown: CancellationToken::new(),
            stopped: CancellationToken::new(),
        }
    }

    pub fn state(&self) -> ServerState {
        *self.state.lock()
    }

    pub fn advance(&self, next: ServerState) -> McpResult<()> {
        let mut state = self.state.lock();
        if !state.can_advance_to(next) {
            return Err(McpError::InvalidTransition {
                from: state.to_string(),
                to: next.to_string(),
            });
        }
        let from = *state;
        info!(from = %from, to = %next, "Server state change");
        *state = next;
        if next == ServerState::Stopped {
            self.stopped.cancel();
        }
        Ok(())
    }

    /// Admit one call. The returned guard keeps the call counted until
    /// dropped.
    pub fn begin_call(self: &Arc<Self>) -> McpResult<InFlightGuard> {
        // Checked and counted under the state lock so a concurrent stop
        // cannot miss this call.
        let state = self.state.lock();
        if *state != ServerState::Serving {
            return Err(McpError::NotServing(state.to_string()));
        }
        self.in_flight.fetch_add(1, Ordering::AcqRel);
        Ok(InFlightGuard {
            lifecycle: Arc::clone(self),
        })
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::Acquire)
    }

    /// Wait until no admitted call is running.
    pub async fn drain(&self) {
        loop {
            let notified = self.drained.notified();
            if self.in_flight() == 0 {
                return;
            }
            notified.await;
        }
    }

    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    pub(crate) fn signal_shutdown(&self) {
        self.shutdown.cancel();
    }

    pub async fn wait_stopped(&self) {
        self.stopped.cancelled().await;
    }
}

#[derive(Debug)]
pub struct InFlightGuard {
    lifecycle: Arc<Lifecycle>,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        if self.lifecycle.in_flight.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.lifecycle.drained.notify_waiters();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn serving() -> Arc<Lifecycle> {
        let lifecycle = Arc::new(Lifecycle::new());
        lifecycle.advance(ServerState::Negotiated).unwrap();
        lifecycle.advance(ServerState::Serving).unwrap();
        lifecycle
    }

    #[test]
    fn test_transitions_only_move_forward() {
        let lifecycle = Lifecycle::new();
        assert!(lifecycle.advance(ServerState::Serving).is_err());
        lifecycle.advance(ServerState::Negotiated).unwrap();
        lifecycle.advance(ServerState::Serving).unwrap();
        lifecycle.advance(ServerState::Stopping).unwrap();
        let err = lifecycle.advance(ServerState::Serving).unwrap_err();
        assert!(matches!(err, McpError::InvalidTransition { .. }));
        lifecycle.advance(ServerState::Stopped).unwrap();
        assert!(lifecycle.advance(ServerState::Stopping).is_err());
    }

    #[test]
    fn test_calls_rejected_outside_serving() {
        let lifecycle = Arc::new(Lifecycle::new());
        assert!(matches!(lifecycle.begin_call(), Err(McpError::NotServing(_))));
        let lifecycle = serving();
        let guard = lifecycle.begin_call().unwrap();
        assert_eq!(lifecycle.in_flight(), 1);
        lifecycle.advance(ServerState::Stopping).unwrap();
        assert!(lifecycle.begin_call().is_err());
        drop(guard);
        assert_eq!(lifecycle.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_drain_waits_for_in_flight() {
        let lifecycle = serving();
        let guard = lifecycle.begin_call().unwrap();
        lifecycle.advance(ServerState::Stopping).unwrap();

        let waiter = {
            let lifecycle = lifecycle.clone();
            tokio::spawn(async move { lifecycle.drain().await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());
        drop(guard);
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
    }
}
