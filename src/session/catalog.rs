//! Voice catalog

use serde::Serialize;

use crate::{Error, Result};

/// A selectable synthesis voice
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VoiceInfo {
    pub id: String,
    pub name: String,
}

/// Available voices and the fallback default
#[derive(Debug, Clone)]
pub struct VoiceCatalog {
    voices: Vec<String>,
    default: String,
}

impl Default for VoiceCatalog {
    fn default() -> Self {
        Self {
            voices: vec!["Chelsie".to_string(), "Ethan".to_string()],
            default: "Chelsie".to_string(),
        }
    }
}

impl VoiceCatalog {
    /// Build a catalog
    ///
    /// # Errors
    ///
    /// Returns error if the list is empty or `default` is not in it
    pub fn new(voices: Vec<String>, default: String) -> Result<Self> {
        if voices.is_empty() {
            return Err(Error::Config("voice catalog is empty".to_string()));
        }
        if !voices.contains(&default) {
            return Err(Error::Config(format!(
                "default voice {default} is not one of {}",
                voices.join(", ")
            )));
        }
        Ok(Self { voices, default })
    }

    #[must_use]
    pub fn default_voice(&self) -> &str {
        &self.default
    }

    #[must_use]
    pub fn contains(&self, voice: &str) -> bool {
        self.voices.iter().any(|v| v == voice)
    }

    /// Return `voice` when it is known, otherwise the default
    #[must_use]
    pub fn resolve(&self, voice: Option<&str>) -> String {
        match voice {
            Some(v) if self.contains(v) => v.to_string(),
            Some(v) => {
                tracing::debug!(voice = v, fallback = %self.default, "unknown voice");
                self.default.clone()
            }
            None => self.default.clone(),
        }
    }

    /// Voices as id/name pairs
    #[must_use]
    pub fn voices(&self) -> Vec<VoiceInfo> {
        self.voices
            .iter()
            .map(|v| VoiceInfo {
                id: v.clone(),
                name: v.clone(),
            })
            .collect()
    }
}
