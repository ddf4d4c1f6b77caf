//! Capability Registry
//!
//! Declares which feature groups a server supports and answers, for every
//! method, whether the negotiated set allows it.

use {
    crate::protocol::McpMethod,
    serde::{Deserialize, Serialize},
    std::fmt,
};

/// A named feature group a server may support.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CapabilityGroup {
    Resources,
    Tools,
    Prompts,
    Sampling,
}

impl fmt::Display for CapabilityGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Resources => "resources",
            Self::Tools => "tools",
            Self::Prompts => "prompts",
            Self::Sampling => "sampling",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourcesCapability {
    #[serde(default)]
    pub subscribe: bool,
    #[serde(default)]
    pub list_changed: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListChangedCapability {
    #[serde(default)]
    pub list_changed: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SamplingCapability {}

/// Per-server declaration of enabled feature groups and their sub-features.
///
/// Serializes to the wire shape used in `initialize`:
/// `{"resources": {"subscribe": true, "listChanged": true}, "tools": {...}}`.
/// An absent group is disabled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct CapabilitySet {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resources: Option<ResourcesCapability>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tools: Option<ListChangedCapability>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompts: Option<ListChangedCapability>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sampling: Option<SamplingCapability>,
}

impl CapabilitySet {
    /// No feature groups enabled.
    pub fn none() -> Self {
        Self::default()
    }

    /// Every group and sub-feature enabled.
    pub fn all() -> Self {
        Self {
            resources: Some(ResourcesCapability {
                subscribe: true,
                list_changed: true,
            }),
            tools: Some(ListChangedCapability { list_changed: true }),
            prompts: Some(ListChangedCapability { list_changed: true }),
            sampling: Some(SamplingCapability {}),
        }
    }

    pub fn with_resources(mut self, subscribe: bool, list_changed: bool) -> Self {
        self.resources = Some(ResourcesCapability {
            subscribe,
            list_changed,
        });
        self
    }

    pub fn with_tools(mut self, list_changed: bool) -> Self {
        self.tools = Some(ListChangedCapability { list_changed });
        self
    }

    pub fn with_prompts(mut self, list_changed: bool) -> Self {
        self.prompts = Some(ListChangedCapability { list_changed });
        self
    }

    pub fn with_sampling(mut self) -> Self {
        self.sampling = Some(SamplingCapability {});
        self
    }

    pub fn without(mut self, group: CapabilityGroup) -> Self {
        match group {
            CapabilityGroup::Resources => self.resources = None,
            CapabilityGroup::Tools => self.tools = None,
            CapabilityGroup::Prompts => self.prompts = None,
            CapabilityGroup::Sampling => self.sampling = None,
        }
        self
    }

    pub fn has_group(&self, group: CapabilityGroup) -> bool {
        match group {
            CapabilityGroup::Resources => self.resources.is_some(),
            CapabilityGroup::Tools => self.tools.is_some(),
            CapabilityGroup::Prompts => self.prompts.is_some(),
            CapabilityGroup::Sampling => self.sampling.is_some(),
        }
    }

    pub fn supports_subscriptions(&self) -> bool {
        self.resources.is_some_and(|r| r.subscribe)
    }

    /// Intersection with `requested`. Never a superset of `self`.
    pub fn negotiate(&self, requested: &CapabilitySet) -> CapabilitySet {
        CapabilitySet {
            resources: match (self.resources, requested.resources) {
                (Some(ours), Some(theirs)) => Some(ResourcesCapability {
                    subscribe: ours.subscribe && theirs.subscribe,
                    list_changed: ours.list_changed && theirs.list_changed,
                }),
                _ => None,
            },
            tools: intersect_list_changed(self.tools, requested.tools),
            prompts: intersect_list_changed(self.prompts, requested.prompts),
            sampling: self.sampling.and(requested.sampling),
        }
    }

    /// Whether `method` may be dispatched under this set. Lifecycle methods
    /// belong to no group and are always enabled.
    pub fn is_enabled(&self, method: McpMethod) -> bool {
        let Some(group) = method.capability_group() else {
            return true;
        };
        if !self.has_group(group) {
            return false;
        }
        if method.requires_subscriptions() {
            return self.supports_subscriptions();
        }
        true
    }
}

fn intersect_list_changed(
    ours: Option<ListChangedCapability>,
    theirs: Option<ListChangedCapability>,
) -> Option<ListChangedCapability> {
    match (ours, theirs) {
        (Some(a), Some(b)) => Some(ListChangedCapability {
            list_changed: a.list_changed && b.list_changed,
        }),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_negotiate_is_never_a_superset() {
        let server = CapabilitySet::none().with_tools(false).with_resources(false, true);
        let negotiated = server.negotiate(&CapabilitySet::all());
        assert_eq!(negotiated.tools, Some(ListChangedCapability { list_changed: false }));
        assert_eq!(
            negotiated.resources,
            Some(ResourcesCapability {
                subscribe: false,
                list_changed: true
            })
        );
        assert!(negotiated.prompts.is_none());
        assert!(negotiated.sampling.is_none());
    }

    #[test]
    fn test_negotiate_drops_unrequested_groups() {
        let requested = CapabilitySet::none().with_prompts(true);
        let negotiated = CapabilitySet::all().negotiate(&requested);
        assert!(negotiated.prompts.is_some());
        assert!(negotiated.tools.is_none());
        assert!(!negotiated.is_enabled(McpMethod::ToolsCall));
        assert!(negotiated.is_enabled(McpMethod::PromptsGet));
    }

    #[test]
    fn test_lifecycle_methods_always_enabled() {
        let empty = CapabilitySet::none();
        assert!(empty.is_enabled(McpMethod::Initialize));
        assert!(empty.is_enabled(McpMethod::Ping));
        assert!(!empty.is_enabled(McpMethod::ResourcesList));
    }

    #[test]
    fn test_subscribe_requires_sub_feature() {
        let set = CapabilitySet::none().with_resources(false, false);
        assert!(set.is_enabled(McpMethod::ResourcesRead));
        assert!(!set.is_enabled(McpMethod::ResourcesSubscribe));
        assert!(!set.is_enabled(McpMethod::ResourcesUnsubscribe));
    }

    #[test]
    fn test_wire_shape() {
        let set = CapabilitySet::none().with_resources(true, false).with_sampling();
        let value = serde_json::to_value(set).unwrap();
        assert_eq!(
            value,
            json!({"resources": {"subscribe": true, "listChanged": false}, "sampling": {}})
        );
        let parsed: CapabilitySet = serde_json::from_value(json!({"tools": {}})).unwrap();
        assert_eq!(parsed.tools, Some(ListChangedCapability { list_changed: false }));
    }
}
