use crate::pattern_store::*;
use crate::preferences::PreferenceTable;
use crate::types::*;
use log::{debug, info};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

pub const DEFAULT_BASE_NOTE: u8 = 60;
pub const DEFAULT_FALLBACK_REGISTER: u8 = 48;
pub const DEFAULT_TEMPO_BPM: f64 = 120.0;

const ARPEGGIO_STEP_BEATS: f32 = 0.25;
const ARPEGGIO_VELOCITY: u8 = 70;
const VARIATION_SPREAD: i32 = 20;
const VARIATION_MIN_VELOCITY: i32 = 60;

/// Weights and targets for ranking competing candidates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SelectorConfig {
    pub style_weight: f32,
    pub usage_weight: f32,
    pub rating_weight: f32,
    pub difficulty_weight: f32,
    pub target_difficulty: f32,
    pub max_difficulty: f32,
    /// Usage count at which the usage term saturates at 1.0
    pub usage_saturation: u32,
    /// A stored progression must be strictly more similar than this to be reused
    pub min_similarity: f32,
    /// Enables seeded velocity humanisation
    pub variation_seed: Option<u64>,
}

impl Default for SelectorConfig {
    fn default() -> Self {
        Self {
            style_weight: 0.4,
            usage_weight: 0.3,
            rating_weight: 0.2,
            difficulty_weight: 0.1,
            target_difficulty: 2.5,
            max_difficulty: MAX_DIFFICULTY as f32,
            usage_saturation: 10,
            min_similarity: 0.0,
            variation_seed: None,
        }
    }
}

/// Where a resolved solo came from.
#[derive(Debug, Clone, PartialEq)]
pub enum SoloSource {
    Exact(PatternId),
    Transposed { pattern: PatternId, semitones: i32 },
    Progression { progression: ProgressionId, semitones: i32, similarity: f32 },
    Arpeggio,
}

/// One concrete note ready for scheduling.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SoloNote {
    pub note: u8,
    pub velocity: u8,
    pub start_secs: f64,
    pub duration_secs: f64,
}

/// A pattern turned into absolute pitches and seconds for one chord.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedSolo {
    pub chord: ChordLabel,
    pub style: String,
    pub source: SoloSource,
    pub notes: Vec<SoloNote>,
}

impl ResolvedSolo {
    pub fn pitches(&self) -> Vec<u8> {
        self.notes.iter().map(|n| n.note).collect()
    }
}

/// Shift every offset by `semitones`. Intervals between notes are untouched
/// unless an offset has to be clamped to the i8 range.
pub fn transpose(notes: &[PatternNote], semitones: i32) -> Vec<PatternNote> {
    notes
        .iter()
        .map(|n| {
            let shifted = n.offset as i32 + semitones;
            let offset = shifted.clamp(i8::MIN as i32, i8::MAX as i32);
            if offset != shifted {
                debug!("Offset {} clamped to {} transposing by {}", shifted, offset, semitones);
            }
            PatternNote {
                offset: offset as i8,
                ..*n
            }
        })
        .collect()
}

/// Cosine similarity between two chord sequences treated as bags of labels.
pub fn progression_similarity<A: AsRef<str>, B: AsRef<str>>(a: &[A], b: &[B]) -> f32 {
    fn bag<S: AsRef<str>>(items: &[S]) -> HashMap<&str, f32> {
        let mut counts = HashMap::new();
        for item in items {
            *counts.entry(item.as_ref()).or_insert(0.0) += 1.0;
        }
        counts
    }
    let (a, b) = (bag(a), bag(b));
    let dot: f32 = a
        .iter()
        .filter_map(|(k, va)| b.get(k).map(|vb| va * vb))
        .sum();
    let norm = |m: &HashMap<&str, f32>| m.values().map(|v| v * v).sum::<f32>().sqrt();
    let denom = norm(&a) * norm(&b);
    if denom == 0.0 {
        0.0
    } else {
        dot / denom
    }
}

/// Fold an out-of-range pitch back into MIDI range by octaves.
fn fold_into_midi(wanted: i32) -> u8 {
    let mut pitch = wanted;
    while pitch > 127 {
        pitch -= 12;
    }
    while pitch < 0 {
        pitch += 12;
    }
    if pitch != wanted {
        debug!("Pitch {} folded into MIDI range as {}", wanted, pitch);
    }
    pitch as u8
}

/// Picks and adapts a stored pattern for a detected chord.
///
/// # Fallback chain
///
/// 1. Patterns stored under the exact chord key.
/// 2. Patterns of the same quality under any root, transposed by
///    (detected root − stored root).
/// 3. An up-then-down arpeggio over the chord's own members.
///
/// The first step with candidates wins; competing candidates are ranked by
/// `score`. Step 3 always produces notes, so selection never comes back empty.
///
/// With a chord history, `select_with_history` first looks for the most
/// similar stored progression and reuses its phrase, then falls back to the
/// same chain.
pub struct PatternSelector {
    store: PatternStore,
    config: SelectorConfig,
    base_note: u8,
    fallback_register: u8,
    tempo_bpm: f64,
    rng: Option<fastrand::Rng>,
}

impl PatternSelector {
    pub fn new(store: PatternStore, config: SelectorConfig) -> Self {
        let rng = config.variation_seed.map(fastrand::Rng::with_seed);
        Self {
            store,
            config,
            base_note: DEFAULT_BASE_NOTE,
            fallback_register: DEFAULT_FALLBACK_REGISTER,
            tempo_bpm: DEFAULT_TEMPO_BPM,
            rng,
        }
    }

    /// `base_note` is where root C of a stored pattern sounds; the arpeggio
    /// sits one octave above `fallback_register`.
    pub fn with_register(mut self, base_note: u8, fallback_register: u8) -> Self {
        self.base_note = base_note;
        self.fallback_register = fallback_register;
        self
    }

    pub fn with_tempo(mut self, bpm: f64) -> Self {
        self.set_tempo(bpm);
        self
    }

    pub fn set_tempo(&mut self, bpm: f64) {
        if bpm.is_finite() && bpm > 0.0 {
            self.tempo_bpm = bpm;
        }
    }

    pub fn tempo_bpm(&self) -> f64 {
        self.tempo_bpm
    }

    pub fn store(&self) -> &PatternStore {
        &self.store
    }

    fn score_parts(
        &self,
        style: &str,
        usage_count: u32,
        rating: f32,
        difficulty: u8,
        prefs: &PreferenceTable,
    ) -> f32 {
        let c = &self.config;
        let usage = (usage_count as f32 / c.usage_saturation.max(1) as f32).min(1.0);
        let fit = 1.0 - (difficulty as f32 - c.target_difficulty).abs() / c.max_difficulty.max(1.0);
        c.style_weight * prefs.weight(style)
            + c.usage_weight * usage
            + c.rating_weight * (rating / MAX_RATING)
            + c.difficulty_weight * fit
    }

    pub fn score(&self, record: &PatternRecord, prefs: &PreferenceTable) -> f32 {
        self.score_parts(
            &record.style,
            record.usage_count,
            record.rating,
            record.difficulty,
            prefs,
        )
    }

    /// Highest-scoring candidate; the earliest in corpus order wins ties.
    fn best_of(&self, candidates: &[&PatternRecord], prefs: &PreferenceTable) -> Option<PatternId> {
        let mut best: Option<(PatternId, f32)> = None;
        for record in candidates {
            let s = self.score(record, prefs);
            debug!("  candidate {} {} score {:.3}", record.key, record.style, s);
            if best.map_or(true, |(_, bs)| s > bs) {
                best = Some((record.id, s));
            }
        }
        best.map(|(id, _)| id)
    }

    /// Pick and resolve a solo for one chord. Never empty.
    pub fn select(&mut self, label: &ChordLabel, prefs: &PreferenceTable) -> ResolvedSolo {
        let key = label.key();

        let exact = self.best_of(&self.store.find_exact(&key), prefs);
        if let Some(id) = exact {
            self.store.record_usage(id);
            if let Some(record) = self.store.get(id) {
                info!("Exact pattern for {}: {} ({})", key, record.key, record.style);
                let (notes, root, style) = (record.notes.clone(), record.root, record.style.clone());
                return self.resolve(label, &notes, root, style, SoloSource::Exact(id));
            }
        }

        let same_quality = self.best_of(&self.store.find_by_quality(label.quality), prefs);
        if let Some(id) = same_quality {
            self.store.record_usage(id);
            if let Some(record) = self.store.get(id) {
                let semitones = label.root as i32 - record.root as i32;
                info!(
                    "Transposed pattern for {}: {} ({}) by {:+}",
                    key, record.key, record.style, semitones
                );
                let notes = transpose(&record.notes, semitones);
                let (root, style) = (record.root, record.style.clone());
                return self.resolve(
                    label,
                    &notes,
                    root,
                    style,
                    SoloSource::Transposed {
                        pattern: id,
                        semitones,
                    },
                );
            }
        }

        info!("No stored pattern for {}; arpeggio", key);
        self.arpeggio(label)
    }

    /// Progression-aware selection. `history` holds the recent labels, oldest
    /// first; `label` is appended if it isn't already the last one.
    pub fn select_with_history(
        &mut self,
        label: &ChordLabel,
        history: &[ChordLabel],
        prefs: &PreferenceTable,
    ) -> ResolvedSolo {
        let mut keys: Vec<String> = history.iter().map(|l| l.key()).collect();
        if history.last().map_or(true, |last| !last.same_chord(label)) {
            keys.push(label.key());
        }

        let mut best: Option<(ProgressionId, f32, f32)> = None;
        for prog in self.store.progressions() {
            let similarity = progression_similarity(&keys, &prog.chords);
            if similarity <= self.config.min_similarity {
                continue;
            }
            let preference = prefs.weight(&prog.style);
            let better = match best {
                None => true,
                Some((_, bs, bp)) => {
                    similarity > bs + f32::EPSILON
                        || ((similarity - bs).abs() <= f32::EPSILON && preference > bp)
                }
            };
            if better {
                best = Some((prog.id, similarity, preference));
            }
        }

        if let Some((id, similarity, _)) = best {
            self.store.record_progression_usage(id);
            if let Some(prog) = self.store.progression(id) {
                let semitones = label.root as i32 - prog.anchor_root as i32;
                info!(
                    "Progression {} ~ {} (similarity {:.2}, {})",
                    keys.join("-"),
                    prog.chords.join("-"),
                    similarity,
                    prog.style
                );
                let notes = transpose(&prog.notes, semitones);
                let (root, style) = (prog.anchor_root, prog.style.clone());
                return self.resolve(
                    label,
                    &notes,
                    root,
                    style,
                    SoloSource::Progression {
                        progression: id,
                        semitones,
                        similarity,
                    },
                );
            }
        }

        debug!("No similar progression for {}", keys.join("-"));
        self.select(label, prefs)
    }

    /// Up-then-down arpeggio over the chord members, root first.
    pub fn arpeggio(&mut self, label: &ChordLabel) -> ResolvedSolo {
        let members = if label.members.is_empty() {
            std::iter::once(label.root).collect()
        } else {
            label.members
        };
        let up: Vec<i8> = members.intervals_from(label.root).iter().map(|i| i as i8).collect();
        let offsets: Vec<i8> = up.iter().chain(up.iter().rev()).copied().collect();
        let notes = even_notes(&offsets, ARPEGGIO_VELOCITY, ARPEGGIO_STEP_BEATS);

        // The arpeggio is voiced from the fallback register, not the corpus base
        let anchor = self.fallback_register as i32 + 12 - self.base_note as i32;
        self.resolve_at(
            label,
            &notes,
            anchor,
            label.root,
            "arpeggio".into(),
            SoloSource::Arpeggio,
        )
    }

    fn resolve(
        &mut self,
        label: &ChordLabel,
        notes: &[PatternNote],
        root: PitchClass,
        style: String,
        source: SoloSource,
    ) -> ResolvedSolo {
        self.resolve_at(label, notes, 0, root, style, source)
    }

    /// Absolute pitch = base note + `register_shift` + root + offset.
    fn resolve_at(
        &mut self,
        label: &ChordLabel,
        notes: &[PatternNote],
        register_shift: i32,
        root: PitchClass,
        style: String,
        source: SoloSource,
    ) -> ResolvedSolo {
        let secs_per_beat = 60.0 / self.tempo_bpm;
        let anchor = self.base_note as i32 + register_shift + root as i32;

        let notes = notes
            .iter()
            .map(|n| {
                let mut velocity = n.velocity.min(127);
                if let Some(rng) = self.rng.as_mut() {
                    let v = velocity as i32 + rng.i32(-VARIATION_SPREAD..=VARIATION_SPREAD);
                    velocity = v.clamp(VARIATION_MIN_VELOCITY, 127) as u8;
                }
                SoloNote {
                    note: fold_into_midi(anchor + n.offset as i32),
                    velocity,
                    start_secs: n.start_beat as f64 * secs_per_beat,
                    duration_secs: n.duration_beats as f64 * secs_per_beat,
                }
            })
            .collect();

        ResolvedSolo {
            chord: label.clone(),
            style,
            source,
            notes,
        }
    }
}
