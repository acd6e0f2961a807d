//! Track and template types.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors returned by the track catalog.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CatalogError {
    /// The requested track is not one of the fixed set.
    #[error("unknown track '{track}', available tracks are: {available}")]
    UnknownTrack { track: String, available: String },

    /// A configured template override is unusable.
    #[error("invalid template for track '{track}': {reason}")]
    InvalidTemplate { track: String, reason: String },
}

impl CatalogError {
    pub(crate) fn unknown(track: impl Into<String>) -> Self {
        Self::UnknownTrack {
            track: track.into(),
            available: EnvironmentTrack::ALL
                .iter()
                .map(|t| t.as_str())
                .collect::<Vec<_>>()
                .join(", "),
        }
    }
}

/// A named provisioning profile.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EnvironmentTrack {
    /// Short-lived, cost-optimized demo environments.
    Demo,
    /// Persistent environments dedicated to a customer.
    Customer,
    /// Long-lived, highly available platform environments.
    Platform,
}

impl EnvironmentTrack {
    /// Every track, in catalog order.
    pub const ALL: [EnvironmentTrack; 3] = [
        EnvironmentTrack::Demo,
        EnvironmentTrack::Customer,
        EnvironmentTrack::Platform,
    ];

    /// Returns the track name as used in identifiers and on the wire.
    pub fn as_str(&self) -> &'static str {
        match self {
            EnvironmentTrack::Demo => "demo",
            EnvironmentTrack::Customer => "customer",
            EnvironmentTrack::Platform => "platform",
        }
    }
}

impl fmt::Display for EnvironmentTrack {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EnvironmentTrack {
    type Err = CatalogError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        EnvironmentTrack::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| CatalogError::unknown(s))
    }
}

/// Provisioning template for a track.
///
/// Templates are read-only once the catalog is built. Requests copy the
/// template at creation time, so the snapshot stored with a request never
/// changes afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Template {
    /// Human readable summary of the track.
    pub description: String,
    /// Reference to the infrastructure template used for every resource.
    pub infrastructure_template: String,
    /// Reference to the CI/CD profile.
    pub ci_cd_profile: String,
    /// Reference to the agent orchestration policy.
    pub agent_policy: String,
    /// Resource kinds to provision, in order.
    pub resources: Vec<String>,
}

impl Template {
    pub(crate) fn validate(&self, track: EnvironmentTrack) -> Result<(), CatalogError> {
        let invalid = |reason: &str| CatalogError::InvalidTemplate {
            track: track.to_string(),
            reason: reason.to_string(),
        };

        if self.resources.is_empty() {
            return Err(invalid("resource list is empty"));
        }
        if self.resources.iter().any(|r| r.trim().is_empty()) {
            return Err(invalid("resource kinds must not be blank"));
        }
        if self.infrastructure_template.trim().is_empty() {
            return Err(invalid("infrastructure_template is blank"));
        }
        if self.ci_cd_profile.trim().is_empty() {
            return Err(invalid("ci_cd_profile is blank"));
        }
        if self.agent_policy.trim().is_empty() {
            return Err(invalid("agent_policy is blank"));
        }
        Ok(())
    }
}
