//! Server capacity bounds.
//!
//! Exceeding any of these is reported to the peer as capacity-exceeded.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResourceLimits {
    /// Open sessions across all connections. `None` is unbounded.
    pub max_sessions: Option<usize>,
    /// Largest encoded message accepted, checked before parsing.
    pub max_message_size: usize,
    pub max_tools: Option<usize>,
    pub max_resources: Option<usize>,
    pub max_prompts: Option<usize>,
    /// Execution records kept per tool; the oldest are dropped first.
    pub max_history: usize,
}

const MIB: usize = 1024 * 1024;

/// Default for [`ResourceLimits::max_message_size`] and for transports
/// built without an explicit frame bound.
pub const DEFAULT_MAX_MESSAGE_SIZE: usize = 2 * MIB;

impl Default for ResourceLimits {
    fn default() -> Self {
        Self {
            max_sessions: Some(10_000),
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
            max_tools: Some(1_000),
            max_resources: Some(10_000),
            max_prompts: Some(1_000),
            max_history: 100,
        }
    }
}

impl ResourceLimits {
    pub fn unlimited() -> Self {
        Self {
            max_sessions: None,
            max_message_size: usize::MAX,
            max_tools: None,
            max_resources: None,
            max_prompts: None,
            max_history: usize::MAX,
        }
    }

    /// Tight bounds for embedded use and tests.
    pub fn strict() -> Self {
        Self {
            max_sessions: Some(100),
            max_message_size: MIB / 4,
            max_tools: Some(50),
            max_resources: Some(100),
            max_prompts: Some(50),
            max_history: 10,
        }
    }
}

/// `Err(limit)` when adding one more item would exceed `limit`.
pub(crate) fn check_capacity(current: usize, limit: Option<usize>) -> Result<(), usize> {
    match limit {
        Some(limit) if current >= limit => Err(limit),
        _ => Ok(()),
    }
}
