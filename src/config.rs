//! Adapter configuration.

use crate::error::Result;
use crate::types::{Capabilities, DeliveryMode};
use serde::{Deserialize, Serialize};

/// What to do with an `added` notification for an id the view already holds.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DuplicateAddPolicy {
    /// Drop it: it replays data the bulk load already delivered.
    #[default]
    Drop,
    /// Apply it as an update of the existing record.
    Update,
}

/// Adapter configuration.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AdapterConfig {
    /// Field the record id is injected under on delivery and stripped from on write.
    /// Default: "id"
    pub id_field: String,

    /// Field primitive remote values are wrapped under.
    /// Default: "value"
    pub value_field: String,

    /// Overrides the delivery shape the backend advertises.
    pub delivery: Option<DeliveryMode>,

    /// Overrides whether deletes are written as null tombstones.
    pub tombstone_deletes: Option<bool>,

    /// Handling of `added` notifications for ids already present.
    pub duplicate_adds: DuplicateAddPolicy,
}

impl Default for AdapterConfig {
    fn default() -> Self {
        Self {
            id_field: "id".to_string(),
            value_field: "value".to_string(),
            delivery: None,
            tombstone_deletes: None,
            duplicate_adds: DuplicateAddPolicy::Drop,
        }
    }
}

impl AdapterConfig {
    /// Parse a configuration from JSON. Missing keys take their defaults.
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn with_id_field(mut self, field: impl Into<String>) -> Self {
        self.id_field = field.into();
        self
    }

    pub fn with_value_field(mut self, field: impl Into<String>) -> Self {
        self.value_field = field.into();
        self
    }

    pub fn with_delivery(mut self, delivery: DeliveryMode) -> Self {
        self.delivery = Some(delivery);
        self
    }

    pub fn with_tombstone_deletes(mut self, tombstone: bool) -> Self {
        self.tombstone_deletes = Some(tombstone);
        self
    }

    pub fn with_duplicate_adds(mut self, policy: DuplicateAddPolicy) -> Self {
        self.duplicate_adds = policy;
        self
    }

    /// Combine the backend's capabilities with the overrides.
    pub fn effective_capabilities(&self, backend: Capabilities) -> Capabilities {
        Capabilities {
            delivery: self.delivery.unwrap_or(backend.delivery),
            native_delete: match self.tombstone_deletes {
                Some(tombstone) => !tombstone,
                None => backend.native_delete,
            },
        }
    }
}
