use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PropertyKind {
    Setting,
    Action,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Property {
    Value,
    Label,
    Visibility,
    ReadOnly,
    Choices,
    Enabled,
}

impl fmt::Display for Property {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Property::Value => write!(f, "value"),
            Property::Label => write!(f, "label"),
            Property::Visibility => write!(f, "visibility"),
            Property::ReadOnly => write!(f, "read_only"),
            Property::Choices => write!(f, "choices"),
            Property::Enabled => write!(f, "enabled"),
        }
    }
}

/// One observable change on a setting or action of a live instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PropertyUpdate {
    pub instance_id: String,
    pub key: String,
    pub kind: PropertyKind,
    pub property: Property,
    pub value: serde_json::Value,
    pub at: DateTime<Utc>,
}

impl PropertyUpdate {
    pub fn setting(
        instance_id: impl Into<String>,
        key: impl Into<String>,
        property: Property,
        value: serde_json::Value,
    ) -> Self {
        Self::new(instance_id, key, PropertyKind::Setting, property, value)
    }

    pub fn action(
        instance_id: impl Into<String>,
        key: impl Into<String>,
        property: Property,
        value: serde_json::Value,
    ) -> Self {
        Self::new(instance_id, key, PropertyKind::Action, property, value)
    }

    fn new(
        instance_id: impl Into<String>,
        key: impl Into<String>,
        kind: PropertyKind,
        property: Property,
        value: serde_json::Value,
    ) -> Self {
        Self {
            instance_id: instance_id.into(),
            key: key.into(),
            kind,
            property,
            value,
            at: Utc::now(),
        }
    }
}

/// Which instances a subscriber wants updates for.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum InstanceFilter {
    #[default]
    All,
    Only(HashSet<String>),
}

impl InstanceFilter {
    pub fn only<I, S>(ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        InstanceFilter::Only(ids.into_iter().map(Into::into).collect())
    }

    /// An empty id list means every instance.
    pub fn from_ids(ids: Vec<String>) -> Self {
        if ids.is_empty() {
            InstanceFilter::All
        } else {
            InstanceFilter::only(ids)
        }
    }

    pub fn matches(&self, instance_id: &str) -> bool {
        match self {
            InstanceFilter::All => true,
            InstanceFilter::Only(ids) => ids.contains(instance_id),
        }
    }
}

/// Why a subscription returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionEnd {
    Cancelled,
    Replaced,
    SinkFailed,
}
