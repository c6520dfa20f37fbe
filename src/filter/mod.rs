//! Voice-signature ignore filter.
//!
//! Gates the pipeline: frames whose fingerprint matches a registered
//! profile at the active sensitivity are dropped before transcription.

pub mod features;
pub mod profiles;

pub use profiles::{MatchResult, ProfileRegistry, VoiceProfile};

use crate::error::Result;
use std::path::PathBuf;
use tokio::sync::RwLock;
use tracing::{debug, warn};

/// Shared, persistence-backed wrapper around the profile registry.
pub struct VoiceFilter {
    registry: RwLock<ProfileRegistry>,
    store_path: Option<PathBuf>,
}

impl VoiceFilter {
    /// Creates a filter around an existing registry, without persistence.
    pub fn new(registry: ProfileRegistry) -> Self {
        Self {
            registry: RwLock::new(registry),
            store_path: None,
        }
    }

    /// Creates a filter backed by a JSON store, restoring it if present.
    pub fn with_store(path: PathBuf, sensitivity: f32) -> Self {
        let registry = if path.exists() {
            match ProfileRegistry::load(&path) {
                Ok(mut registry) => {
                    registry.set_sensitivity(sensitivity);
                    registry
                }
                Err(e) => {
                    warn!(path = %path.display(), "failed to load profile store: {e}");
                    ProfileRegistry::new(sensitivity)
                }
            }
        } else {
            ProfileRegistry::new(sensitivity)
        };
        Self {
            registry: RwLock::new(registry),
            store_path: Some(path),
        }
    }

    /// Check one PCM frame; matches update usage counters.
    pub async fn check(&self, pcm: &[u8]) -> MatchResult {
        let mut registry = self.registry.write().await;
        if registry.is_empty() {
            return MatchResult {
                is_match: false,
                confidence: 0.0,
                profile_id: None,
            };
        }
        let result = registry.match_frame(pcm);
        if result.is_match {
            debug!(
                profile = result.profile_id.as_deref().unwrap_or(""),
                confidence = result.confidence,
                "frame matched ignore profile"
            );
        }
        result
    }

    /// Register a profile and persist the store.
    pub async fn add(&self, id: &str, frames: &[Vec<u8>], name: Option<&str>) -> Result<VoiceProfile> {
        let profile = {
            let mut registry = self.registry.write().await;
            registry.add(id, frames, name)?.clone()
        };
        self.persist().await;
        Ok(profile)
    }

    /// Remove a profile and persist the store; returns whether it existed.
    pub async fn remove(&self, id: &str) -> bool {
        let existed = self.registry.write().await.remove(id);
        if existed {
            self.persist().await;
        }
        existed
    }

    /// All profiles.
    pub async fn list(&self) -> Vec<VoiceProfile> {
        self.registry.read().await.list()
    }

    /// Rename a profile and persist the store.
    pub async fn rename(&self, id: &str, name: &str) -> Result<()> {
        self.registry.write().await.rename(id, name)?;
        self.persist().await;
        Ok(())
    }

    /// Update sensitivity for all subsequent frames.
    pub async fn set_sensitivity(&self, sensitivity: f32) {
        self.registry.write().await.set_sensitivity(sensitivity);
    }

    /// Active sensitivity.
    pub async fn sensitivity(&self) -> f32 {
        self.registry.read().await.sensitivity()
    }

    async fn persist(&self) {
        if let Some(path) = &self.store_path {
            let registry = self.registry.read().await;
            if let Err(e) = registry.save(path) {
                warn!(path = %path.display(), "failed to persist profiles: {e}");
            }
        }
    }
}
