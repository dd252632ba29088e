use crate::chord_classifier::DEFAULT_DEBOUNCE;
use crate::note_tracker::HoldPolicy;
use crate::selector::*;
use crate::soloist::DEFAULT_PROGRESSION_WINDOW;
use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::io;
use std::path::Path;
use std::time::Duration;

/// Engine settings. Every field is optional in the file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub debounce_ms: u64,
    pub tempo_bpm: f64,
    /// Absolute pitch of root C for corpus patterns
    pub base_note: u8,
    pub fallback_register: u8,
    pub hold_policy: HoldPolicy,
    pub progression_window: usize,
    /// Classifier re-evaluation tick for live input
    pub poll_ms: u64,
    pub selector: SelectorConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            debounce_ms: DEFAULT_DEBOUNCE.as_millis() as u64,
            tempo_bpm: DEFAULT_TEMPO_BPM,
            base_note: DEFAULT_BASE_NOTE,
            fallback_register: DEFAULT_FALLBACK_REGISTER,
            hold_policy: HoldPolicy::default(),
            progression_window: DEFAULT_PROGRESSION_WINDOW,
            poll_ms: 20,
            selector: SelectorConfig::default(),
        }
    }
}

impl EngineConfig {
    pub fn load(path: &Path) -> Option<Self> {
        let data = std::fs::read_to_string(path).ok()?;
        match serde_json::from_str(&data) {
            Ok(c) => {
                info!("Loaded engine config from {:?}", path);
                Some(c)
            }
            Err(e) => {
                warn!("Failed to parse config file {:?}: {}", path, e);
                None
            }
        }
    }

    pub fn save(&self, path: &Path) -> io::Result<()> {
        let json = serde_json::to_string_pretty(self).map_err(io::Error::other)?;
        std::fs::write(path, json)?;
        info!("Engine config saved to {:?}", path);
        Ok(())
    }

    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_ms.max(1))
    }

    /// Build a selector over `store` with these settings.
    pub fn selector_for(&self, store: crate::pattern_store::PatternStore) -> PatternSelector {
        PatternSelector::new(store, self.selector.clone())
            .with_register(self.base_note, self.fallback_register)
            .with_tempo(self.tempo_bpm)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_file_keeps_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("engine.json");
        std::fs::write(
            &path,
            r#"{"debounce_ms": 150, "hold_policy": "ref_counted", "selector": {"style_weight": 0.7}}"#,
        )
        .unwrap();
        let c = EngineConfig::load(&path).unwrap();
        assert_eq!(c.debounce(), Duration::from_millis(150));
        assert_eq!(c.hold_policy, HoldPolicy::RefCounted);
        assert_eq!(c.selector.style_weight, 0.7);
        assert_eq!(c.selector.usage_weight, 0.3);
        assert_eq!(c.tempo_bpm, 120.0);
        assert_eq!(c.progression_window, 4);
    }

    #[test]
    fn test_malformed_file_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("engine.json");
        std::fs::write(&path, "{ not json").unwrap();
        assert!(EngineConfig::load(&path).is_none());
        assert!(EngineConfig::load(&dir.path().join("absent.json")).is_none());
    }

    #[test]
    fn test_save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("engine.json");
        let mut c = EngineConfig::default();
        c.selector.variation_seed = Some(42);
        c.save(&path).unwrap();
        assert_eq!(EngineConfig::load(&path), Some(c));
    }
}
