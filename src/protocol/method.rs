//! Closed set of protocol methods.

use {
    crate::capabilities::CapabilityGroup,
    std::{fmt, str::FromStr},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum McpMethod {
    Initialize,
    Ping,
    Initialized,
    Cancelled,
    ResourcesList,
    ResourcesRead,
    ResourcesSubscribe,
    ResourcesUnsubscribe,
    ToolsList,
    ToolsCall,
    PromptsList,
    PromptsGet,
    SamplingCreateMessage,
    // Server -> client notifications
    ResourceUpdated,
    ResourcesListChanged,
    ToolsListChanged,
    PromptsListChanged,
}

impl McpMethod {
    pub const ALL: [McpMethod; 17] = [
        Self::Initialize,
        Self::Ping,
        Self::Initialized,
        Self::Cancelled,
        Self::ResourcesList,
        Self::ResourcesRead,
        Self::ResourcesSubscribe,
        Self::ResourcesUnsubscribe,
        Self::ToolsList,
        Self::ToolsCall,
        Self::PromptsList,
        Self::PromptsGet,
        Self::SamplingCreateMessage,
        Self::ResourceUpdated,
        Self::ResourcesListChanged,
        Self::ToolsListChanged,
        Self::PromptsListChanged,
    ];

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Initialize => "initialize",
            Self::Ping => "ping",
            Self::Initialized => "notifications/initialized",
            Self::Cancelled => "notifications/cancelled",
            Self::ResourcesList => "resources/list",
            Self::ResourcesRead => "resources/read",
            Self::ResourcesSubscribe => "resources/subscribe",
            Self::ResourcesUnsubscribe => "resources/unsubscribe",
            Self::ToolsList => "tools/list",
            Self::ToolsCall => "tools/call",
            Self::PromptsList => "prompts/list",
            Self::PromptsGet => "prompts/get",
            Self::SamplingCreateMessage => "sampling/createMessage",
            Self::ResourceUpdated => "notifications/resources/updated",
            Self::ResourcesListChanged => "notifications/resources/list_changed",
            Self::ToolsListChanged => "notifications/tools/list_changed",
            Self::PromptsListChanged => "notifications/prompts/list_changed",
        }
    }

    /// The feature group gating this method, `None` for lifecycle methods.
    pub const fn capability_group(self) -> Option<CapabilityGroup> {
        match self {
            Self::ResourcesList
            | Self::ResourcesRead
            | Self::ResourcesSubscribe
            | Self::ResourcesUnsubscribe
            | Self::ResourceUpdated
            | Self::ResourcesListChanged => Some(CapabilityGroup::Resources),
            Self::ToolsList | Self::ToolsCall | Self::ToolsListChanged => {
                Some(CapabilityGroup::Tools)
            }
            Self::PromptsList | Self::PromptsGet | Self::PromptsListChanged => {
                Some(CapabilityGroup::Prompts)
            }
            Self::SamplingCreateMessage => Some(CapabilityGroup::Sampling),
            Self::Initialize | Self::Ping | Self::Initialized | Self::Cancelled => None,
        }
    }

    pub const fn requires_subscriptions(self) -> bool {
        matches!(self, Self::ResourcesSubscribe | Self::ResourcesUnsubscribe)
    }

    pub const fn is_notification(self) -> bool {
        matches!(
            self,
            Self::Initialized
                | Self::Cancelled
                | Self::ResourceUpdated
                | Self::ResourcesListChanged
                | Self::ToolsListChanged
                | Self::PromptsListChanged
        )
    }
}

impl fmt::Display for McpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownMethod(pub String);

impl FromStr for McpMethod {
    type Err = UnknownMethod;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .copied()
            .find(|m| m.as_str() == s)
            .ok_or_else(|| UnknownMethod(s.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_every_method_parses_back() {
        for method in McpMethod::ALL {
            assert_eq!(method.as_str().parse::<McpMethod>(), Ok(method));
        }
    }

    #[test]
    fn test_unknown_method() {
        assert_eq!(
            "tools/delete".parse::<McpMethod>(),
            Err(UnknownMethod("tools/delete".to_string()))
        );
    }

    #[test]
    fn test_groups() {
        assert_eq!(McpMethod::ToolsCall.capability_group(), Some(CapabilityGroup::Tools));
        assert_eq!(
            McpMethod::SamplingCreateMessage.capability_group(),
            Some(CapabilityGroup::Sampling)
        );
        assert_eq!(McpMethod::Ping.capability_group(), None);
    }
}
