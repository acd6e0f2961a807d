//! Track catalog: the fixed set of environment tracks and their templates.
//!
//! The catalog is built once at startup and shared read-only (`Arc<ConfigCatalog>`)
//! by every request.

mod types;

use std::collections::BTreeMap;

pub use types::{CatalogError, EnvironmentTrack, Template};

/// Immutable mapping from track to provisioning template.
#[derive(Debug, Clone)]
pub struct ConfigCatalog {
    templates: BTreeMap<EnvironmentTrack, Template>,
}

impl Default for ConfigCatalog {
    fn default() -> Self {
        Self::builtin()
    }
}

impl ConfigCatalog {
    /// Catalog containing the built-in templates for every track.
    pub fn builtin() -> Self {
        let templates = EnvironmentTrack::ALL
            .into_iter()
            .map(|track| (track, builtin_template(track)))
            .collect();
        Self { templates }
    }

    /// Built-in catalog with some tracks replaced by configured templates.
    pub fn with_overrides(
        overrides: &BTreeMap<EnvironmentTrack, Template>,
    ) -> Result<Self, CatalogError> {
        let mut catalog = Self::builtin();
        for (track, template) in overrides {
            template.validate(*track)?;
            catalog.templates.insert(*track, template.clone());
        }
        Ok(catalog)
    }

    /// Resolve a track name to its template.
    pub fn resolve(&self, track: &str) -> Result<Template, CatalogError> {
        let track: EnvironmentTrack = track.parse()?;
        Ok(self.get(track).clone())
    }

    /// Template for a known track.
    pub fn get(&self, track: EnvironmentTrack) -> &Template {
        // Every track is inserted at construction and entries are never removed.
        &self.templates[&track]
    }

    /// All tracks with their templates, in catalog order.
    pub fn tracks(&self) -> impl Iterator<Item = (EnvironmentTrack, &Template)> {
        self.templates.iter().map(|(t, tpl)| (*t, tpl))
    }
}

fn builtin_template(track: EnvironmentTrack) -> Template {
    let (description, resources): (&str, &[&str]) = match track {
        EnvironmentTrack::Demo => (
            "Short-Term Demo Environment - ephemeral, cost-optimized, rapid.",
            &["Lambda", "DynamoDB (on-demand)", "API Gateway"],
        ),
        EnvironmentTrack::Customer => (
            "Medium-Term Customer Environment - stable, scalable, persistent.",
            &["EC2 (Auto Scaling)", "RDS", "EKS", "S3"],
        ),
        EnvironmentTrack::Platform => (
            "Long-Term Platform Environment - durable, highly available, secure.",
            &[
                "EC2 (Dedicated Instances)",
                "Aurora Global DB",
                "EKS (Multi-AZ)",
                "VPC Endpoints",
                "GuardDuty",
            ],
        ),
    };

    let name = track.as_str();
    Template {
        description: description.to_string(),
        infrastructure_template: format!("aws_{}_template.json", name),
        ci_cd_profile: format!("{}_ci_cd_profile.json", name),
        agent_policy: format!("{}_agent_policy.json", name),
        resources: resources.iter().map(|r| r.to_string()).collect(),
    }
}
