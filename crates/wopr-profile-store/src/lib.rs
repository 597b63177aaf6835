// [crates/wopr-profile-store/src/lib.rs]
//! =================================================================
//! Profile Store (C3).
//!
//! Persists each `BotProfile` as an independent JSON blob keyed by its
//! id. `safe_path` rejects any id that is not a version-4 UUID *before*
//! any path composition, and refuses to resolve outside the configured
//! data directory even if canonicalization would otherwise allow it.
//! =================================================================

use once_cell::sync::Lazy;
use regex::Regex;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::warn;
use uuid::Uuid;
use wopr_models::bot::BotProfile;

static UUID_V4_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)^[0-9a-f]{8}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{12}$",
    )
    .expect("static UUID regex is valid")
});

#[derive(Error, Debug)]
pub enum ProfileStoreError {
    #[error("[VALIDATION]: '{0}' is not a valid UUID-v4 identifier")]
    InvalidId(String),

    #[error("[VALIDATION]: resolved path escapes the configured data directory")]
    PathEscape,

    #[error("[NOT_FOUND]: profile '{0}' does not exist")]
    NotFound(Uuid),

    #[error("[IO]: {0}")]
    Io(#[from] std::io::Error),

    #[error("[SERIALIZATION]: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub struct ProfileStore {
    data_dir: PathBuf,
}

impl ProfileStore {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self { data_dir: data_dir.into() }
    }

    /// Rejects anything that isn't a lowercase/uppercase v4-shaped UUID
    /// *before* composing a path, then asserts the composed path still
    /// lies strictly under `data_dir` (defends against a future change
    /// to the regex or the data dir being a symlink).
    fn safe_path(&self, id: &str) -> Result<PathBuf, ProfileStoreError> {
        if !UUID_V4_RE.is_match(id) {
            return Err(ProfileStoreError::InvalidId(id.to_string()));
        }

        let candidate = self.data_dir.join(format!("{id}.json"));
        let data_dir_abs = absolute(&self.data_dir);
        let candidate_abs = absolute(&candidate);

        if !candidate_abs.starts_with(&data_dir_abs) {
            return Err(ProfileStoreError::PathEscape);
        }

        Ok(candidate)
    }

    pub async fn save(&self, profile: &BotProfile) -> Result<(), ProfileStoreError> {
        tokio::fs::create_dir_all(&self.data_dir).await?;
        let path = self.safe_path(&profile.id.to_string())?;
        let bytes = serde_json::to_vec_pretty(profile)?;
        tokio::fs::write(path, bytes).await?;
        Ok(())
    }

    pub async fn get(&self, id: Uuid) -> Result<BotProfile, ProfileStoreError> {
        let path = self.safe_path(&id.to_string())?;
        let bytes = tokio::fs::read(&path)
            .await
            .map_err(|_| ProfileStoreError::NotFound(id))?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    pub async fn delete(&self, id: Uuid) -> Result<(), ProfileStoreError> {
        let path = self.safe_path(&id.to_string())?;
        match tokio::fs::remove_file(path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Tolerant listing: files that fail to parse as a `BotProfile` are
    /// skipped (and logged) rather than aborting the whole listing.
    pub async fn list(&self) -> Result<Vec<BotProfile>, ProfileStoreError> {
        tokio::fs::create_dir_all(&self.data_dir).await?;
        let mut entries = tokio::fs::read_dir(&self.data_dir).await?;
        let mut profiles = Vec::new();

        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            match tokio::fs::read(&path).await {
                Ok(bytes) => match serde_json::from_slice::<BotProfile>(&bytes) {
                    Ok(profile) => profiles.push(profile),
                    Err(e) => warn!("skipping unparsable profile {:?}: {}", path, e),
                },
                Err(e) => warn!("skipping unreadable profile {:?}: {}", path, e),
            }
        }

        Ok(profiles)
    }
}

/// Lexical path normalisation that does not require the path to exist
/// (unlike `Path::canonicalize`), so a not-yet-created data dir still
/// gets compared correctly.
fn absolute(path: &Path) -> PathBuf {
    let mut stack: Vec<std::ffi::OsString> = Vec::new();
    for component in path.components() {
        use std::path::Component;
        match component {
            Component::ParentDir => {
                stack.pop();
            }
            Component::CurDir => {}
            Component::Normal(seg) => stack.push(seg.to_os_string()),
            Component::RootDir | Component::Prefix(_) => {
                stack.clear();
                stack.push(component.as_os_str().to_os_string());
            }
        }
    }
    stack.into_iter().collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use wopr_models::bot::{ReleaseChannel, RestartPolicy, UpdatePolicy};

    fn sample_profile(id: Uuid) -> BotProfile {
        BotProfile {
            id,
            tenant_id: "tenant-1".into(),
            name: "bot".into(),
            description: "".into(),
            image: "acme/bot:latest".into(),
            env: HashMap::new(),
            restart_policy: RestartPolicy::Always,
            release_channel: ReleaseChannel::Stable,
            update_policy: UpdatePolicy::Manual,
            volumes: None,
            health_check: None,
        }
    }

    #[tokio::test]
    async fn rejects_non_uuid_ids_before_touching_disk() {
        let tmp = tempfile::tempdir().unwrap();
        let store = ProfileStore::new(tmp.path());
        let err = store.get(Uuid::nil()).await; // nil uuid is valid-shaped, should 404 not error
        assert!(matches!(err, Err(ProfileStoreError::NotFound(_))));

        let err = store.safe_path("../../etc/passwd");
        assert!(matches!(err, Err(ProfileStoreError::InvalidId(_))));

        let err = store.safe_path("not-a-uuid-at-all-nope-nope-nope");
        assert!(matches!(err, Err(ProfileStoreError::InvalidId(_))));
    }

    #[tokio::test]
    async fn save_get_roundtrip() {
        let tmp = tempfile::tempdir().unwrap();
        let store = ProfileStore::new(tmp.path());
        let id = Uuid::new_v4();
        let profile = sample_profile(id);

        store.save(&profile).await.unwrap();
        let loaded = store.get(id).await.unwrap();
        assert_eq!(loaded.id, id);
        assert_eq!(loaded.name, "bot");
    }

    #[tokio::test]
    async fn list_skips_corrupt_files() {
        let tmp = tempfile::tempdir().unwrap();
        let store = ProfileStore::new(tmp.path());
        let good_id = Uuid::new_v4();
        store.save(&sample_profile(good_id)).await.unwrap();

        // Drop a garbage file with a valid-looking uuid name but bad contents.
        let bad_id = Uuid::new_v4();
        tokio::fs::write(tmp.path().join(format!("{bad_id}.json")), b"not json")
            .await
            .unwrap();

        let listed = store.list().await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].id, good_id);
    }

    #[tokio::test]
    async fn delete_is_idempotent() {
        let tmp = tempfile::tempdir().unwrap();
        let store = ProfileStore::new(tmp.path());
        let id = Uuid::new_v4();
        store.delete(id).await.unwrap();
        store.delete(id).await.unwrap();
    }
}
