// [apps/control-plane/src/registry.rs]
//! `RegistryClient` backed by a container registry's v2 HTTP API —
//! resolves a tag to its manifest digest without pulling the manifest
//! body.

use async_trait::async_trait;
use reqwest::Client;
use std::time::Duration;
use tracing::instrument;
use wopr_fleet::{FleetError, RegistryClient};
use wopr_models::bot::ImageRef;

pub struct HttpRegistryClient {
    client: Client,
}

impl HttpRegistryClient {
    pub fn new() -> Self {
        Self {
            client: Client::builder()
                .timeout(Duration::from_secs(10))
                .user_agent("wopr-control-plane/registry")
                .build()
                .expect("reqwest client must build with static config"),
        }
    }
}

impl Default for HttpRegistryClient {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RegistryClient for HttpRegistryClient {
    #[instrument(skip(self))]
    async fn resolve_digest(&self, image: &str) -> Result<String, FleetError> {
        let reference = ImageRef::parse(image);

        let url = format!(
            "https://{}/v2/{}/{}/manifests/{}",
            reference.registry, reference.owner, reference.repo, reference.tag
        );

        let response = self
            .client
            .head(&url)
            .header("Accept", "application/vnd.oci.image.manifest.v1+json")
            .send()
            .await
            .map_err(|e| FleetError::NotFound(format!("registry unreachable: {e}")))?;

        if !response.status().is_success() {
            return Err(FleetError::NotFound(format!("registry returned {} for {image}", response.status())));
        }

        response
            .headers()
            .get("Docker-Content-Digest")
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
            .ok_or_else(|| FleetError::NotFound(format!("registry response for {image} carried no digest header")))
    }
}
