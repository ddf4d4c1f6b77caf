use {
    serde::Serialize,
    std::sync::atomic::{AtomicU64, Ordering},
};

/// Counters since the client connected.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ClientStats {
    /// Requests written to the transport, retries included.
    pub requests: u64,
    pub retries: u64,
    /// Calls that surfaced an error to the caller.
    pub failures: u64,
    pub notifications: u64,
}

#[derive(Debug, Default)]
pub(crate) struct StatsRecorder {
    requests: AtomicU64,
    retries: AtomicU64,
    failures: AtomicU64,
    notifications: AtomicU64,
}

impl StatsRecorder {
    pub(crate) fn request(&self) {
        self.requests.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn retry(&self) {
        self.retries.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn failure(&self) {
        self.failures.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn notification(&self) {
        self.notifications.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn snapshot(&self) -> ClientStats {
        ClientStats {
            requests: self.requests.load(Ordering::Relaxed),
            retries: self.retries.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
            notifications: self.notifications.load(Ordering::Relaxed),
        }
    }
}
