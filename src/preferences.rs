use arc_swap::ArcSwap;
use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;

/// Weight assumed for a style the table doesn't mention.
pub const DEFAULT_STYLE_WEIGHT: f32 = 0.5;

#[derive(Debug, Error, PartialEq)]
pub enum PreferenceError {
    #[error("weight {weight} for {style:?} is outside 0.0–1.0")]
    OutOfRange { style: String, weight: f32 },
}

/// Per-style weights in 0.0–1.0 biasing pattern selection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PreferenceTable {
    weights: BTreeMap<String, f32>,
}

impl PreferenceTable {
    pub fn empty() -> Self {
        Self {
            weights: BTreeMap::new(),
        }
    }

    pub fn weight(&self, style: &str) -> f32 {
        self.weights.get(style).copied().unwrap_or(DEFAULT_STYLE_WEIGHT)
    }

    pub fn set(&mut self, style: &str, weight: f32) -> Result<(), PreferenceError> {
        if !(0.0..=1.0).contains(&weight) {
            return Err(PreferenceError::OutOfRange {
                style: style.to_string(),
                weight,
            });
        }
        self.weights.insert(style.to_string(), weight);
        Ok(())
    }

    pub fn with(mut self, style: &str, weight: f32) -> Result<Self, PreferenceError> {
        self.set(style, weight)?;
        Ok(self)
    }

    /// Style with the highest weight (first alphabetically on ties).
    pub fn favourite(&self) -> Option<&str> {
        let mut best: Option<(&str, f32)> = None;
        for (style, &w) in &self.weights {
            if best.map_or(true, |(_, bw)| w > bw) {
                best = Some((style.as_str(), w));
            }
        }
        best.map(|(s, _)| s)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, f32)> {
        self.weights.iter().map(|(s, &w)| (s.as_str(), w))
    }

    /// Load from a JSON object of style → weight. Out-of-range weights are
    /// dropped with a warning; an absent or unreadable file gives None.
    pub fn load(path: &Path) -> Option<Self> {
        let data = std::fs::read_to_string(path).ok()?;
        match serde_json::from_str::<BTreeMap<String, f32>>(&data) {
            Ok(raw) => {
                let mut table = Self::empty();
                for (style, weight) in raw {
                    if let Err(e) = table.set(&style, weight) {
                        warn!("Preferences {:?}: {}", path, e);
                    }
                }
                info!("Loaded style preferences from {:?}", path);
                Some(table)
            }
            Err(e) => {
                warn!("Failed to parse preferences file {:?}: {}", path, e);
                None
            }
        }
    }
}

impl Default for PreferenceTable {
    fn default() -> Self {
        let mut weights = BTreeMap::new();
        weights.insert("jazz".to_string(), 0.8);
        weights.insert("blues".to_string(), 0.9);
        weights.insert("classical".to_string(), 0.6);
        weights.insert("rock".to_string(), 0.7);
        Self { weights }
    }
}

/// Preference table shared between the soloist (reader) and whatever
/// feedback process adjusts it (writer). Readers always see a whole table.
#[derive(Clone)]
pub struct SharedPreferences {
    inner: Arc<ArcSwap<PreferenceTable>>,
}

impl SharedPreferences {
    pub fn new(table: PreferenceTable) -> Self {
        Self {
            inner: Arc::new(ArcSwap::from_pointee(table)),
        }
    }

    pub fn snapshot(&self) -> Arc<PreferenceTable> {
        self.inner.load_full()
    }

    pub fn replace(&self, table: PreferenceTable) {
        self.inner.store(Arc::new(table));
    }

    /// Copy-on-write update of one style's weight.
    pub fn set_weight(&self, style: &str, weight: f32) -> Result<(), PreferenceError> {
        // Validate once up front so the rcu closure can't fail
        PreferenceTable::empty().set(style, weight)?;
        self.inner.rcu(|current| {
            let mut next = PreferenceTable::clone(current);
            let _ = next.set(style, weight);
            next
        });
        info!("Style preference {} = {:.2}", style, weight);
        Ok(())
    }
}

impl Default for SharedPreferences {
    fn default() -> Self {
        Self::new(PreferenceTable::default())
    }
}
