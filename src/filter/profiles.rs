//! Voice profile registry.
//!
//! Keyed store of speaker fingerprints with usage counters and JSON
//! persistence. Profile ids are caller-supplied and unique; a profile's
//! signature is immutable after creation.

use crate::defaults;
use crate::error::{AttuneError, Result};
use crate::filter::features;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;

/// A registered speaker fingerprint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VoiceProfile {
    pub id: String,
    pub name: String,
    /// 128-element unit-norm feature vector.
    pub signature: Vec<f32>,
    pub created_at: DateTime<Utc>,
    pub last_used_at: Option<DateTime<Utc>>,
    pub match_count: u64,
}

/// Result of checking one frame against the registry.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MatchResult {
    pub is_match: bool,
    pub confidence: f32,
    pub profile_id: Option<String>,
}

impl MatchResult {
    fn no_match() -> Self {
        Self {
            is_match: false,
            confidence: 0.0,
            profile_id: None,
        }
    }
}

/// In-memory registry of voice profiles plus the active sensitivity.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct ProfileRegistry {
    sensitivity: f32,
    profiles: HashMap<String, VoiceProfile>,
}

impl Default for ProfileRegistry {
    fn default() -> Self {
        Self {
            sensitivity: defaults::SENSITIVITY,
            profiles: HashMap::new(),
        }
    }
}

impl ProfileRegistry {
    /// Creates an empty registry with the given sensitivity.
    pub fn new(sensitivity: f32) -> Self {
        Self {
            sensitivity: sensitivity.clamp(0.0, 1.0),
            profiles: HashMap::new(),
        }
    }

    /// Register a profile trained from one or more PCM sample frames.
    ///
    /// Fails with `InvalidInput` when the id is taken or no frames are given.
    pub fn add(&mut self, id: &str, frames: &[Vec<u8>], name: Option<&str>) -> Result<&VoiceProfile> {
        if frames.is_empty() {
            return Err(AttuneError::InvalidInput {
                message: "profile requires at least one training frame".to_string(),
            });
        }
        if self.profiles.contains_key(id) {
            return Err(AttuneError::InvalidInput {
                message: format!("profile id '{id}' already exists"),
            });
        }

        let signatures: Vec<Vec<f32>> = frames
            .iter()
            .map(|pcm| features::extract_signature(&features::decode_pcm(pcm)))
            .collect();
        let signature = features::average_signatures(&signatures);

        let profile = VoiceProfile {
            id: id.to_string(),
            name: name.unwrap_or(id).to_string(),
            signature,
            created_at: Utc::now(),
            last_used_at: None,
            match_count: 0,
        };
        Ok(self.profiles.entry(id.to_string()).or_insert(profile))
    }

    /// Remove a profile; returns whether it existed.
    pub fn remove(&mut self, id: &str) -> bool {
        self.profiles.remove(id).is_some()
    }

    /// All profiles, sorted by id.
    pub fn list(&self) -> Vec<VoiceProfile> {
        let mut profiles: Vec<VoiceProfile> = self.profiles.values().cloned().collect();
        profiles.sort_by(|a, b| a.id.cmp(&b.id));
        profiles
    }

    /// Look up one profile.
    pub fn get(&self, id: &str) -> Option<&VoiceProfile> {
        self.profiles.get(id)
    }

    /// Rename a profile.
    pub fn rename(&mut self, id: &str, name: &str) -> Result<()> {
        match self.profiles.get_mut(id) {
            Some(profile) => {
                profile.name = name.to_string();
                Ok(())
            }
            None => Err(AttuneError::InvalidInput {
                message: format!("no profile with id '{id}'"),
            }),
        }
    }

    /// Number of registered profiles.
    pub fn len(&self) -> usize {
        self.profiles.len()
    }

    /// Returns true when no profiles are registered.
    pub fn is_empty(&self) -> bool {
        self.profiles.is_empty()
    }

    /// Active sensitivity.
    pub fn sensitivity(&self) -> f32 {
        self.sensitivity
    }

    /// Update sensitivity; applies to all subsequent frames.
    pub fn set_sensitivity(&mut self, sensitivity: f32) {
        self.sensitivity = sensitivity.clamp(0.0, 1.0);
    }

    /// Check a PCM frame against every profile.
    ///
    /// The winning profile is the similarity argmax; it is a match iff its
    /// similarity reaches the sensitivity. Matches bump the profile's usage
    /// counters.
    pub fn match_frame(&mut self, pcm: &[u8]) -> MatchResult {
        let signature = features::extract_signature(&features::decode_pcm(pcm));

        let mut best: Option<(String, f32)> = None;
        for profile in self.profiles.values() {
            let score = features::similarity(&signature, &profile.signature);
            let better = match &best {
                Some((_, best_score)) => score > *best_score,
                None => true,
            };
            if better {
                best = Some((profile.id.clone(), score));
            }
        }

        match best {
            Some((id, score)) if score >= self.sensitivity => {
                if let Some(profile) = self.profiles.get_mut(&id) {
                    profile.match_count += 1;
                    profile.last_used_at = Some(Utc::now());
                }
                MatchResult {
                    is_match: true,
                    confidence: score,
                    profile_id: Some(id),
                }
            }
            Some((_, score)) => MatchResult {
                is_match: false,
                confidence: score,
                profile_id: None,
            },
            None => MatchResult::no_match(),
        }
    }

    /// Load a registry from a JSON file.
    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&contents)?)
    }

    /// Save the registry (profiles + sensitivity) as JSON.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// PCM for an alternating square wave with the given half-period.
    fn pcm_tone(len: usize, period: usize, amplitude: i16) -> Vec<u8> {
        let mut pcm = Vec::with_capacity(len * 2);
        for i in 0..len {
            let sample = if (i / period) % 2 == 0 {
                amplitude
            } else {
                -amplitude
            };
            pcm.extend_from_slice(&sample.to_le_bytes());
        }
        pcm
    }

    #[test]
    fn test_add_and_list_roundtrip() {
        let mut registry = ProfileRegistry::new(0.7);
        registry
            .add("tv", &[pcm_tone(3200, 8, 12000)], Some("Living room TV"))
            .unwrap();

        let listed = registry.list();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].id, "tv");
        assert_eq!(listed[0].name, "Living room TV");
        assert_eq!(listed[0].match_count, 0);
        assert!(listed[0].last_used_at.is_none());

        // Signature is unit-norm
        let norm: f32 = listed[0].signature.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-4);
    }

    #[test]
    fn test_add_with_no_frames_fails() {
        let mut registry = ProfileRegistry::new(0.7);
        let result = registry.add("empty", &[], None);
        assert!(matches!(result, Err(AttuneError::InvalidInput { .. })));
    }

    #[test]
    fn test_add_duplicate_id_fails() {
        let mut registry = ProfileRegistry::new(0.7);
        registry.add("tv", &[pcm_tone(1600, 8, 9000)], None).unwrap();
        let result = registry.add("tv", &[pcm_tone(1600, 4, 9000)], None);
        assert!(matches!(result, Err(AttuneError::InvalidInput { .. })));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_name_defaults_to_id() {
        let mut registry = ProfileRegistry::new(0.7);
        registry.add("radio", &[pcm_tone(1600, 8, 9000)], None).unwrap();
        assert_eq!(registry.get("radio").unwrap().name, "radio");
    }

    #[test]
    fn test_remove_reports_existence() {
        let mut registry = ProfileRegistry::new(0.7);
        registry.add("tv", &[pcm_tone(1600, 8, 9000)], None).unwrap();

        assert!(registry.remove("tv"));
        assert!(registry.list().is_empty());
        assert!(!registry.remove("tv"));
    }

    #[test]
    fn test_rename() {
        let mut registry = ProfileRegistry::new(0.7);
        registry.add("tv", &[pcm_tone(1600, 8, 9000)], None).unwrap();

        registry.rename("tv", "Kitchen TV").unwrap();
        assert_eq!(registry.get("tv").unwrap().name, "Kitchen TV");

        let missing = registry.rename("radio", "x");
        assert!(matches!(missing, Err(AttuneError::InvalidInput { .. })));
    }

    #[test]
    fn test_identical_frame_matches_its_profile() {
        let mut registry = ProfileRegistry::new(0.7);
        let training = pcm_tone(3200, 8, 12000);
        registry.add("tv", &[training.clone()], None).unwrap();

        let result = registry.match_frame(&training);
        assert!(result.is_match);
        assert_eq!(result.profile_id.as_deref(), Some("tv"));
        assert!(result.confidence > 0.99);
    }

    #[test]
    fn test_match_updates_usage_counters() {
        let mut registry = ProfileRegistry::new(0.7);
        let training = pcm_tone(3200, 8, 12000);
        registry.add("tv", &[training.clone()], None).unwrap();

        registry.match_frame(&training);
        registry.match_frame(&training);

        let profile = registry.get("tv").unwrap();
        assert_eq!(profile.match_count, 2);
        assert!(profile.last_used_at.is_some());
    }

    #[test]
    fn test_no_profiles_never_matches() {
        let mut registry = ProfileRegistry::new(0.0);
        let result = registry.match_frame(&pcm_tone(1600, 8, 9000));
        assert!(!result.is_match);
        assert!(result.profile_id.is_none());
    }

    #[test]
    fn test_winner_is_argmax() {
        let mut registry = ProfileRegistry::new(0.0);
        let fast = pcm_tone(3200, 2, 12000);
        let slow = pcm_tone(3200, 64, 12000);
        registry.add("fast", &[fast.clone()], None).unwrap();
        registry.add("slow", &[slow], None).unwrap();

        let result = registry.match_frame(&fast);
        assert!(result.is_match);
        assert_eq!(result.profile_id.as_deref(), Some("fast"));
    }

    #[test]
    fn test_match_monotone_in_sensitivity() {
        let training = pcm_tone(3200, 8, 12000);
        let probe = pcm_tone(3200, 7, 11000);

        let mut previous_matched = true;
        for step in 0..=10 {
            let sensitivity = step as f32 / 10.0;
            let mut registry = ProfileRegistry::new(sensitivity);
            registry.add("tv", &[training.clone()], None).unwrap();
            let matched = registry.match_frame(&probe).is_match;
            // Raising sensitivity can only turn matches off, never on
            assert!(
                previous_matched || !matched,
                "match appeared when sensitivity rose to {sensitivity}"
            );
            previous_matched = matched;
        }
    }

    #[test]
    fn test_silence_does_not_match() {
        let mut registry = ProfileRegistry::new(0.5);
        registry
            .add("tv", &[pcm_tone(3200, 8, 12000)], None)
            .unwrap();
        let silence = vec![0u8; 3200];
        let result = registry.match_frame(&silence);
        assert!(!result.is_match);
        assert_eq!(result.confidence, 0.0);
    }

    #[test]
    fn test_registry_persistence_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("profiles.json");

        let mut registry = ProfileRegistry::new(0.55);
        registry
            .add("tv", &[pcm_tone(3200, 8, 12000)], Some("TV"))
            .unwrap();
        registry.match_frame(&pcm_tone(3200, 8, 12000));
        registry.save(&path).unwrap();

        let restored = ProfileRegistry::load(&path).unwrap();
        assert_eq!(restored, registry);
        assert_eq!(restored.sensitivity(), 0.55);
        assert_eq!(restored.get("tv").unwrap().match_count, 1);
    }

    #[test]
    fn test_sensitivity_is_clamped() {
        let mut registry = ProfileRegistry::new(1.7);
        assert_eq!(registry.sensitivity(), 1.0);
        registry.set_sensitivity(-0.2);
        assert_eq!(registry.sensitivity(), 0.0);
    }
}
