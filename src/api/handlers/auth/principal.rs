//! Authenticated principal and its capability set.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use utoipa::ToSchema;
use uuid::Uuid;

/// Capability set keyed by resource, then action.
///
/// `{"projects": {"read": true, "write": false}}` allows reading projects
/// and nothing else. Unknown resources and actions are denied.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq, ToSchema)]
#[serde(transparent)]
pub struct CapabilitySet(HashMap<String, HashMap<String, bool>>);

impl CapabilitySet {
    #[must_use]
    pub fn allows(&self, resource: &str, action: &str) -> bool {
        self.0
            .get(resource)
            .and_then(|actions| actions.get(action))
            .copied()
            .unwrap_or(false)
    }

    /// Parse from the JSON column representation. An empty or null column
    /// yields an empty set.
    pub fn from_json(json: Option<&str>) -> serde_json::Result<Self> {
        match json {
            None | Some("") | Some("null") => Ok(Self::default()),
            Some(json) => serde_json::from_str(json),
        }
    }
}

impl<const N: usize> From<[(&str, &[(&str, bool)]); N]> for CapabilitySet {
    fn from(entries: [(&str, &[(&str, bool)]); N]) -> Self {
        Self(
            entries
                .into_iter()
                .map(|(resource, actions)| {
                    (
                        resource.to_string(),
                        actions
                            .iter()
                            .map(|(action, allowed)| ((*action).to_string(), *allowed))
                            .collect(),
                    )
                })
                .collect(),
        )
    }
}

/// The outcome of authentication: who is acting and what they may do.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, ToSchema)]
pub struct Principal {
    pub account_id: Uuid,
    pub email: String,
    pub role: String,
    pub capabilities: CapabilitySet,
}
