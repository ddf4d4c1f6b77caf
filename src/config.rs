//! Configuration values for servers, clients, proxies and the manager.
//!
//! Every struct deserializes from partial input (`#[serde(default)]`) and
//! reads durations in human form, e.g. `"30s"` or `"250ms"`.

use {
    crate::{capabilities::CapabilitySet, limits::ResourceLimits},
    rand::Rng,
    serde::{Deserialize, Serialize},
    std::time::Duration,
};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub name: String,
    pub version: String,
    /// Feature groups this server offers before negotiation.
    pub capabilities: CapabilitySet,
    pub limits: ResourceLimits,
    /// HTTP sessions quiet for longer than this are closed by the listener.
    /// `None` keeps them until the client deletes them.
    #[serde(with = "humantime_serde")]
    pub session_idle_timeout: Option<Duration>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            name: "mcpmesh-server".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            capabilities: CapabilitySet::all(),
            limits: ResourceLimits::default(),
            session_idle_timeout: Some(Duration::from_secs(30 * 60)),
        }
    }
}

/// Bounded retry with geometric backoff.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Attempts after the first one.
    pub max_retries: u32,
    #[serde(with = "humantime_serde")]
    pub initial_delay: Duration,
    #[serde(with = "humantime_serde")]
    pub max_delay: Duration,
    pub multiplier: f64,
    /// Spread each delay by up to ±25%.
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(5),
            multiplier: 2.0,
            jitter: true,
        }
    }
}

impl RetryPolicy {
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            ..Self::default()
        }
    }

    /// Delay before retry number `attempt` (1-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(31) as i32;
        let factor = self.multiplier.max(1.0).powi(exponent);
        let capped = if self.initial_delay.as_secs_f64() * factor >= self.max_delay.as_secs_f64() {
            self.max_delay
        } else {
            self.initial_delay.mul_f64(factor)
        };
        if self.jitter && !capped.is_zero() {
            capped.mul_f64(rand::rng().random_range(0.75..=1.25))
        } else {
            capped
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    pub client_name: String,
    pub client_version: String,
    /// Per-attempt deadline for one call.
    #[serde(with = "humantime_serde")]
    pub request_timeout: Duration,
    pub retry: RetryPolicy,
    /// Feature groups requested during `initialize`.
    pub capabilities: CapabilitySet,
    /// Notifications buffered per subscriber before the oldest are dropped.
    pub notification_buffer: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            client_name: "mcpmesh-client".to_string(),
            client_version: env!("CARGO_PKG_VERSION").to_string(),
            request_timeout: Duration::from_secs(30),
            retry: RetryPolicy::default(),
            capabilities: CapabilitySet::all(),
            notification_buffer: 256,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Maximum live entries. Zero disables the cache.
    pub capacity: usize,
    /// Entry lifetime. Zero disables the cache.
    #[serde(with = "humantime_serde")]
    pub ttl: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            capacity: 1_000,
            ttl: Duration::from_secs(300),
        }
    }
}

impl CacheConfig {
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        Self { capacity, ttl }
    }

    pub fn disabled() -> Self {
        Self::new(0, Duration::ZERO)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProxyConfig {
    pub client: ClientConfig,
    pub tool_cache: CacheConfig,
    pub resource_cache: CacheConfig,
    /// Proxies created by one factory share a single cache per kind.
    pub share_caches: bool,
    /// Pooled connections kept open; the least recently used is closed
    /// when a new address would exceed this. `None` means unbounded.
    pub max_connections: Option<usize>,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            client: ClientConfig::default(),
            tool_cache: CacheConfig::default(),
            resource_cache: CacheConfig::new(256, Duration::from_secs(60)),
            share_caches: false,
            max_connections: Some(32),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ManagerConfig {
    #[serde(with = "humantime_serde")]
    pub health_check_interval: Duration,
    #[serde(with = "humantime_serde")]
    pub health_check_timeout: Duration,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            health_check_interval: Duration::from_secs(30),
            health_check_timeout: Duration::from_secs(5),
        }
    }
}
