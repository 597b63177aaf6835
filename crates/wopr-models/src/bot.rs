// [crates/wopr-models/src/bot.rs]
//! BotProfile (declared state, §3) and BotInstance (runtime + billing
//! state, §3). `env` is a string->string map per §6.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RestartPolicy {
    No,
    Always,
    OnFailure,
    UnlessStopped,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReleaseChannel {
    Stable,
    Canary,
    Staging,
    Pinned,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UpdatePolicy {
    Manual,
    OnPush,
    Nightly,
    Cron(String),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthCheck {
    pub command: Option<Vec<String>>,
    pub interval_s: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BotProfile {
    pub id: Uuid,
    pub tenant_id: String,
    pub name: String,
    pub description: String,
    pub image: String,
    pub env: HashMap<String, String>,
    pub restart_policy: RestartPolicy,
    pub release_channel: ReleaseChannel,
    pub update_policy: UpdatePolicy,
    pub volumes: Option<Vec<String>>,
    pub health_check: Option<HealthCheck>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BillingState {
    Active,
    Suspended,
    Destroyed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BotInstance {
    pub id: Uuid,
    pub tenant: String,
    pub name: String,
    pub node_id: Option<String>,
    pub billing_state: BillingState,
    pub suspended_at: Option<DateTime<Utc>>,
    pub destroy_after: Option<DateTime<Utc>>,
    pub resource_tier: String,
    pub storage_tier: String,
    pub created_by_user_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Parses the `[registry/]owner/repo[:tag]` image reference grammar of
/// §6. A first segment containing `.` or `:` is treated as the
/// registry; otherwise the registry defaults to `ghcr.io` and the tag
/// defaults to `latest`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageRef {
    pub registry: String,
    pub owner: String,
    pub repo: String,
    pub tag: String,
}

impl ImageRef {
    pub fn parse(raw: &str) -> ImageRef {
        let (image_and_maybe_registry, tag) = match raw.rsplit_once(':') {
            // Guard against `registry:port/owner/repo` being split on the port colon.
            Some((left, right)) if !right.contains('/') => (left, right.to_string()),
            _ => (raw, "latest".to_string()),
        };

        let segments: Vec<&str> = image_and_maybe_registry.split('/').collect();
        let (registry, rest): (String, Vec<&str>) = match segments.as_slice() {
            [first, tail @ ..] if (first.contains('.') || first.contains(':')) && !tail.is_empty() => {
                (first.to_string(), tail.to_vec())
            }
            _ => ("ghcr.io".to_string(), segments),
        };

        let (owner, repo) = match rest.as_slice() {
            [owner, repo] => (owner.to_string(), repo.to_string()),
            [repo] => ("library".to_string(), repo.to_string()),
            parts if parts.len() > 2 => {
                let owner = parts[..parts.len() - 1].join("/");
                (owner, parts[parts.len() - 1].to_string())
            }
            [] => (String::new(), String::new()),
        };

        ImageRef { registry, owner, repo, tag }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_registry_and_tag() {
        let img = ImageRef::parse("acme/bot");
        assert_eq!(img.registry, "ghcr.io");
        assert_eq!(img.owner, "acme");
        assert_eq!(img.repo, "bot");
        assert_eq!(img.tag, "latest");
    }

    #[test]
    fn explicit_registry_and_tag() {
        let img = ImageRef::parse("docker.io/acme/bot:v2");
        assert_eq!(img.registry, "docker.io");
        assert_eq!(img.owner, "acme");
        assert_eq!(img.repo, "bot");
        assert_eq!(img.tag, "v2");
    }

    #[test]
    fn registry_with_port() {
        let img = ImageRef::parse("registry.local:5000/acme/bot:v2");
        assert_eq!(img.registry, "registry.local:5000");
        assert_eq!(img.repo, "bot");
        assert_eq!(img.tag, "v2");
    }
}
