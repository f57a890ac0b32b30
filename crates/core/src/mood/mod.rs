use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::warn;

/// Key of the profile used when nothing else was selected.
pub const DEFAULT_MOOD: &str = "calm";

/// Base values a mood contributes to the parameter mapping.
///
/// Tuning fields missing from a config file fall back to the calm profile's
/// values. `key` has no such fallback: an unnamed entry deserializes with an
/// empty key, which [`AppConfig::validate`](crate::AppConfig::validate)
/// rejects and [`MoodCatalog::insert`] ignores.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MoodProfile {
    #[serde(default)]
    pub key: String,
    #[serde(default = "calm::speed")]
    pub speed: f32,
    #[serde(default = "calm::dreaminess")]
    pub dreaminess: f32,
    #[serde(default = "calm::fluidity")]
    pub fluidity: f32,
    #[serde(default = "calm::morph_speed")]
    pub morph_speed: f32,
    #[serde(default = "calm::bloom")]
    pub bloom: f32,
    #[serde(default = "calm::warmth")]
    pub warmth: f32,
    #[serde(default = "calm::volume")]
    pub volume: f32,
}

mod calm {
    pub fn speed() -> f32 {
        0.8
    }

    pub fn dreaminess() -> f32 {
        0.5
    }

    pub fn fluidity() -> f32 {
        0.5
    }

    pub fn morph_speed() -> f32 {
        0.5
    }

    pub fn bloom() -> f32 {
        1.0
    }

    pub fn warmth() -> f32 {
        0.5
    }

    pub fn volume() -> f32 {
        0.7
    }
}

impl Default for MoodProfile {
    fn default() -> Self {
        Self {
            key: DEFAULT_MOOD.to_string(),
            speed: calm::speed(),
            dreaminess: calm::dreaminess(),
            fluidity: calm::fluidity(),
            morph_speed: calm::morph_speed(),
            bloom: calm::bloom(),
            warmth: calm::warmth(),
            volume: calm::volume(),
        }
    }
}

impl MoodProfile {
    /// Copy with every non-finite value replaced by the default profile's.
    pub fn sanitized(&self) -> Self {
        let fallback = Self::default();
        let pick = |value: f32, default: f32| if value.is_finite() { value } else { default };
        Self {
            key: self.key.clone(),
            speed: pick(self.speed, fallback.speed),
            dreaminess: pick(self.dreaminess, fallback.dreaminess),
            fluidity: pick(self.fluidity, fallback.fluidity),
            morph_speed: pick(self.morph_speed, fallback.morph_speed),
            bloom: pick(self.bloom, fallback.bloom),
            warmth: pick(self.warmth, fallback.warmth),
            volume: pick(self.volume, fallback.volume),
        }
    }
}

/// Read-only lookup of mood profiles by key.
#[derive(Debug, Clone, Default)]
pub struct MoodCatalog {
    profiles: BTreeMap<String, MoodProfile>,
}

impl MoodCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Catalog with the stock profiles.
    pub fn builtin() -> Self {
        let mut catalog = Self::new();
        catalog.insert(MoodProfile::default());
        catalog.insert(MoodProfile {
            key: "energetic".to_string(),
            speed: 1.4,
            dreaminess: 0.2,
            fluidity: 0.3,
            morph_speed: 1.0,
            bloom: 1.3,
            warmth: 0.6,
            volume: 0.85,
        });
        catalog.insert(MoodProfile {
            key: "dreamy".to_string(),
            speed: 0.5,
            dreaminess: 0.8,
            fluidity: 0.9,
            morph_speed: 0.3,
            bloom: 1.6,
            warmth: 0.4,
            volume: 0.6,
        });
        catalog.insert(MoodProfile {
            key: "dark".to_string(),
            speed: 0.7,
            dreaminess: 0.4,
            fluidity: 0.4,
            morph_speed: 0.4,
            bloom: 0.6,
            warmth: 0.2,
            volume: 0.65,
        });
        catalog
    }

    /// Built-in profiles overlaid with `extra`; same keys replace stock ones.
    pub fn with_profiles(extra: impl IntoIterator<Item = MoodProfile>) -> Self {
        let mut catalog = Self::builtin();
        for profile in extra {
            catalog.insert(profile);
        }
        catalog
    }

    /// Adds or replaces a profile. Profiles without a key are dropped.
    pub fn insert(&mut self, profile: MoodProfile) {
        if profile.key.trim().is_empty() {
            warn!("ignoring mood profile without a key");
            return;
        }
        self.profiles.insert(profile.key.clone(), profile.sanitized());
    }

    pub fn get(&self, key: &str) -> Option<&MoodProfile> {
        self.profiles.get(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.profiles.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.profiles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.profiles.is_empty()
    }
}
