//! Melodic pattern corpus: patterns keyed by chord, progressions keyed by
//! chord sequence, plus the JSON file format they load from and save to.

use crate::chord_table::ChordTable;
use crate::types::*;
use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::io::{BufReader, Read, Write};
use std::path::Path;
use thiserror::Error;

pub const MAX_RATING: f32 = 5.0;
pub const MIN_DIFFICULTY: u8 = 1;
pub const MAX_DIFFICULTY: u8 = 5;
/// Latest beat a stored note may end on.
pub const MAX_PATTERN_BEATS: f32 = 1024.0;
/// Widest offset from the declared root, in semitones.
pub const MAX_OFFSET: i8 = 48;

#[derive(Debug, Error)]
pub enum CorpusError {
    #[error("corpus I/O: {0}")]
    Io(#[from] std::io::Error),
    #[error("corpus JSON: {0}")]
    Json(#[from] serde_json::Error),
}

/// One note of a stored pattern, relative to the pattern's declared root.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PatternNote {
    /// Semitones above (or below) the declared root
    pub offset: i8,
    pub velocity: u8,
    pub start_beat: f32,
    pub duration_beats: f32,
}

impl PatternNote {
    pub fn new(offset: i8, velocity: u8, start_beat: f32, duration_beats: f32) -> Self {
        Self {
            offset,
            velocity,
            start_beat,
            duration_beats,
        }
    }

    fn is_valid(&self) -> bool {
        self.velocity <= 127
            && self.start_beat.is_finite()
            && self.start_beat >= 0.0
            && self.duration_beats.is_finite()
            && self.duration_beats > 0.0
            && self.start_beat + self.duration_beats <= MAX_PATTERN_BEATS
            && (-MAX_OFFSET..=MAX_OFFSET).contains(&self.offset)
    }
}

/// Evenly spaced notes from a list of offsets.
pub fn even_notes(offsets: &[i8], velocity: u8, step_beats: f32) -> Vec<PatternNote> {
    offsets
        .iter()
        .enumerate()
        .map(|(i, &o)| PatternNote::new(o, velocity, i as f32 * step_beats, step_beats))
        .collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PatternId(pub usize);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ProgressionId(pub usize);

/// A reusable phrase for one chord.
#[derive(Debug, Clone, PartialEq)]
pub struct PatternRecord {
    pub id: PatternId,
    /// Chord key as stored, e.g. "C_major7"
    pub key: String,
    /// Root the note offsets are measured from
    pub root: PitchClass,
    pub quality: String,
    pub style: String,
    pub notes: Vec<PatternNote>,
    pub usage_count: u32,
    /// 0.0–5.0
    pub rating: f32,
    /// 1–5
    pub difficulty: u8,
}

/// A phrase recorded over a chord sequence. Offsets are relative to the root
/// of the last chord in `chords`.
#[derive(Debug, Clone, PartialEq)]
pub struct ProgressionRecord {
    pub id: ProgressionId,
    pub chords: Vec<String>,
    pub anchor_root: PitchClass,
    pub style: String,
    pub notes: Vec<PatternNote>,
    pub usage_count: u32,
    pub rating: f32,
    pub difficulty: u8,
}

// ─── File format ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PatternEntry {
    pub style: String,
    pub notes: Vec<PatternNote>,
    #[serde(default)]
    pub usage_count: u32,
    #[serde(default)]
    pub rating: f32,
    #[serde(default = "default_difficulty")]
    pub difficulty: u8,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProgressionEntry {
    pub chords: Vec<String>,
    pub style: String,
    pub notes: Vec<PatternNote>,
    #[serde(default)]
    pub usage_count: u32,
    #[serde(default)]
    pub rating: f32,
    #[serde(default = "default_difficulty")]
    pub difficulty: u8,
}

fn default_difficulty() -> u8 {
    2
}

/// Entries stay as raw JSON until validated, so one bad entry can't sink the file.
#[derive(Debug, Default, Deserialize)]
struct CorpusFile {
    #[serde(default)]
    patterns: BTreeMap<String, Vec<serde_json::Value>>,
    #[serde(default)]
    progressions: Vec<serde_json::Value>,
}

#[derive(Serialize)]
struct CorpusFileOut {
    patterns: BTreeMap<String, Vec<PatternEntry>>,
    progressions: Vec<ProgressionEntry>,
}

fn check_stats(notes: &[PatternNote], rating: f32, difficulty: u8) -> Result<(), String> {
    if notes.is_empty() {
        return Err("no notes".into());
    }
    if let Some(bad) = notes.iter().find(|n| !n.is_valid()) {
        return Err(format!("bad note {:?}", bad));
    }
    if !(0.0..=MAX_RATING).contains(&rating) {
        return Err(format!("rating {} outside 0–5", rating));
    }
    if !(MIN_DIFFICULTY..=MAX_DIFFICULTY).contains(&difficulty) {
        return Err(format!("difficulty {} outside 1–5", difficulty));
    }
    Ok(())
}

// ─── Store ──────────────────────────────────────────────────────────────────

/// In-memory corpus. Records are never removed; only usage counts change.
#[derive(Debug, Clone, Default)]
pub struct PatternStore {
    patterns: Vec<PatternRecord>,
    by_key: HashMap<String, Vec<PatternId>>,
    progressions: Vec<ProgressionRecord>,
}

impl PatternStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a pattern under a chord key. Returns None if the key doesn't parse
    /// or the entry is malformed.
    pub fn insert(&mut self, key: &str, entry: PatternEntry) -> Option<PatternId> {
        let Some((root, quality)) = parse_chord_key(key) else {
            warn!("Corpus: unparseable chord key {:?}, skipped", key);
            return None;
        };
        if let Err(why) = check_stats(&entry.notes, entry.rating, entry.difficulty) {
            warn!("Corpus: {} {} entry skipped: {}", key, entry.style, why);
            return None;
        }
        if ChordTable::standard().quality_tag(quality).is_none() {
            warn!(
                "Corpus: {} {} entry has a quality the classifier never reports; only progressions can reach it",
                key, entry.style
            );
        }
        // Store under the canonical spelling so "Db_major" and "C#_major" meet
        let canonical = chord_key(root, quality);
        let id = PatternId(self.patterns.len());
        self.patterns.push(PatternRecord {
            id,
            key: canonical.clone(),
            root,
            quality: quality.to_string(),
            style: entry.style,
            notes: entry.notes,
            usage_count: entry.usage_count,
            rating: entry.rating,
            difficulty: entry.difficulty,
        });
        self.by_key.entry(canonical).or_default().push(id);
        Some(id)
    }

    pub fn insert_progression(&mut self, entry: ProgressionEntry) -> Option<ProgressionId> {
        let mut chords = Vec::with_capacity(entry.chords.len());
        for key in &entry.chords {
            match parse_chord_key(key) {
                Some((root, quality)) => chords.push((root, chord_key(root, quality))),
                None => {
                    warn!("Corpus: progression chord {:?} unparseable, skipped", key);
                    return None;
                }
            }
        }
        let Some(&(anchor_root, _)) = chords.last() else {
            warn!("Corpus: empty progression skipped");
            return None;
        };
        if let Err(why) = check_stats(&entry.notes, entry.rating, entry.difficulty) {
            warn!("Corpus: progression {:?} skipped: {}", entry.chords, why);
            return None;
        }
        let id = ProgressionId(self.progressions.len());
        self.progressions.push(ProgressionRecord {
            id,
            chords: chords.into_iter().map(|(_, k)| k).collect(),
            anchor_root,
            style: entry.style,
            notes: entry.notes,
            usage_count: entry.usage_count,
            rating: entry.rating,
            difficulty: entry.difficulty,
        });
        Some(id)
    }

    /// Patterns stored under exactly this chord key, in corpus order.
    pub fn find_exact(&self, chord_key: &str) -> Vec<&PatternRecord> {
        let canonical = match parse_chord_key(chord_key) {
            Some((root, quality)) => crate::types::chord_key(root, quality),
            None => return Vec::new(),
        };
        self.by_key
            .get(&canonical)
            .map(|ids| ids.iter().map(|id| &self.patterns[id.0]).collect())
            .unwrap_or_default()
    }

    /// Patterns of this quality under any root, in corpus order.
    pub fn find_by_quality(&self, quality: &str) -> Vec<&PatternRecord> {
        self.patterns.iter().filter(|p| p.quality == quality).collect()
    }

    pub fn record_usage(&mut self, id: PatternId) -> bool {
        match self.patterns.get_mut(id.0) {
            Some(p) => {
                p.usage_count = p.usage_count.saturating_add(1);
                true
            }
            None => false,
        }
    }

    pub fn record_progression_usage(&mut self, id: ProgressionId) -> bool {
        match self.progressions.get_mut(id.0) {
            Some(p) => {
                p.usage_count = p.usage_count.saturating_add(1);
                true
            }
            None => false,
        }
    }

    pub fn get(&self, id: PatternId) -> Option<&PatternRecord> {
        self.patterns.get(id.0)
    }

    pub fn progression(&self, id: ProgressionId) -> Option<&ProgressionRecord> {
        self.progressions.get(id.0)
    }

    pub fn patterns(&self) -> &[PatternRecord] {
        &self.patterns
    }

    pub fn progressions(&self) -> &[ProgressionRecord] {
        &self.progressions
    }

    pub fn len(&self) -> usize {
        self.patterns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty() && self.progressions.is_empty()
    }

    // ─── Persistence ────────────────────────────────────────────────────

    /// Parse a corpus, skipping malformed entries. Returns the store and the
    /// number of entries skipped.
    pub fn from_reader<R: Read>(reader: R) -> Result<(Self, usize), CorpusError> {
        let file: CorpusFile = serde_json::from_reader(reader)?;
        let mut store = Self::new();
        let mut skipped = 0;

        for (key, entries) in file.patterns {
            for raw in entries {
                let inserted = match serde_json::from_value::<PatternEntry>(raw) {
                    Ok(entry) => store.insert(&key, entry).is_some(),
                    Err(e) => {
                        warn!("Corpus: {} entry unreadable: {}", key, e);
                        false
                    }
                };
                if !inserted {
                    skipped += 1;
                }
            }
        }

        for raw in file.progressions {
            let inserted = match serde_json::from_value::<ProgressionEntry>(raw) {
                Ok(entry) => store.insert_progression(entry).is_some(),
                Err(e) => {
                    warn!("Corpus: progression unreadable: {}", e);
                    false
                }
            };
            if !inserted {
                skipped += 1;
            }
        }

        Ok((store, skipped))
    }

    pub fn load(path: &Path) -> Result<Self, CorpusError> {
        let file = std::fs::File::open(path)?;
        let (store, skipped) = Self::from_reader(BufReader::new(file))?;
        info!(
            "Loaded corpus {:?}: {} patterns, {} progressions ({} skipped)",
            path,
            store.patterns.len(),
            store.progressions.len(),
            skipped
        );
        Ok(store)
    }

    pub fn to_writer<W: Write>(&self, writer: W) -> Result<(), CorpusError> {
        let mut patterns: BTreeMap<String, Vec<PatternEntry>> = BTreeMap::new();
        for p in &self.patterns {
            patterns.entry(p.key.clone()).or_default().push(PatternEntry {
                style: p.style.clone(),
                notes: p.notes.clone(),
                usage_count: p.usage_count,
                rating: p.rating,
                difficulty: p.difficulty,
            });
        }
        let progressions = self
            .progressions
            .iter()
            .map(|p| ProgressionEntry {
                chords: p.chords.clone(),
                style: p.style.clone(),
                notes: p.notes.clone(),
                usage_count: p.usage_count,
                rating: p.rating,
                difficulty: p.difficulty,
            })
            .collect();
        serde_json::to_writer_pretty(
            writer,
            &CorpusFileOut {
                patterns,
                progressions,
            },
        )?;
        Ok(())
    }

    pub fn save(&self, path: &Path) -> Result<(), CorpusError> {
        let file = std::fs::File::create(path)?;
        self.to_writer(std::io::BufWriter::new(file))?;
        info!("Corpus saved to {:?}", path);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(style: &str, offsets: &[i8]) -> PatternEntry {
        PatternEntry {
            style: style.into(),
            notes: even_notes(offsets, 90, 0.25),
            usage_count: 0,
            rating: 0.0,
            difficulty: 2,
        }
    }

    #[test]
    fn test_find_exact_and_by_quality() {
        let mut s = PatternStore::new();
        s.insert("C_major", entry("jazz", &[0, 4, 7])).unwrap();
        s.insert("A_minor", entry("jazz", &[0, 3, 7])).unwrap();
        s.insert("F_major", entry("rock", &[0, 7])).unwrap();

        let exact = s.find_exact("C_major");
        assert_eq!(exact.len(), 1);
        assert_eq!(exact[0].root, 0);

        let majors: Vec<&str> = s.find_by_quality("major").iter().map(|p| p.key.as_str()).collect();
        assert_eq!(majors, vec!["C_major", "F_major"]);
        assert!(s.find_exact("G_major").is_empty());
        assert!(s.find_exact("garbage").is_empty());
    }

    #[test]
    fn test_enharmonic_keys_meet() {
        let mut s = PatternStore::new();
        s.insert("Db_major", entry("jazz", &[0, 4, 7])).unwrap();
        assert_eq!(s.find_exact("C#_major").len(), 1);
        assert_eq!(s.patterns()[0].key, "C#_major");
    }

    #[test]
    fn test_record_usage() {
        let mut s = PatternStore::new();
        let id = s.insert("C_major", entry("jazz", &[0])).unwrap();
        assert!(s.record_usage(id));
        assert!(s.record_usage(id));
        assert_eq!(s.get(id).unwrap().usage_count, 2);
        assert!(!s.record_usage(PatternId(99)));
    }

    #[test]
    fn test_rejects_malformed_entries() {
        let mut s = PatternStore::new();
        assert!(s.insert("C_major", entry("jazz", &[])).is_none());
        let mut bad = entry("jazz", &[0]);
        bad.rating = 7.0;
        assert!(s.insert("C_major", bad).is_none());
        assert!(s.insert("nokey", entry("jazz", &[0])).is_none());
        assert!(s.is_empty());
    }

    #[test]
    fn test_load_skips_malformed_entries() {
        let json = r#"{
            "patterns": {
                "C_major": [
                    {"style": "jazz", "notes": [{"offset": 0, "velocity": 90, "start_beat": 0.0, "duration_beats": 0.5}]},
                    {"notes": [{"offset": 0, "velocity": 90, "start_beat": 0.0, "duration_beats": 0.5}]},
                    {"style": "rock", "notes": []}
                ],
                "Q_major": [
                    {"style": "jazz", "notes": [{"offset": 0, "velocity": 90, "start_beat": 0.0, "duration_beats": 0.5}]}
                ]
            },
            "progressions": [
                {"chords": ["D_minor7", "G_dominant7"], "style": "jazz",
                 "notes": [{"offset": 2, "velocity": 80, "start_beat": 0.0, "duration_beats": 0.25}]},
                {"chords": [], "style": "jazz",
                 "notes": [{"offset": 2, "velocity": 80, "start_beat": 0.0, "duration_beats": 0.25}]}
            ]
        }"#;
        let (s, skipped) = PatternStore::from_reader(json.as_bytes()).unwrap();
        assert_eq!(s.patterns().len(), 1);
        assert_eq!(s.progressions().len(), 1);
        assert_eq!(s.progressions()[0].anchor_root, 7);
        assert_eq!(skipped, 4);
        assert_eq!(s.patterns()[0].difficulty, 2, "default difficulty");
    }

    #[test]
    fn test_load_skips_notes_beyond_the_beat_limit() {
        let json = r#"{
            "patterns": {
                "C_major": [
                    {"style": "jazz", "notes": [{"offset": 0, "velocity": 90, "start_beat": 1e30, "duration_beats": 0.5}]},
                    {"style": "blues", "notes": [{"offset": 0, "velocity": 90, "start_beat": 1023.5, "duration_beats": 1.0}]},
                    {"style": "rock", "notes": [{"offset": 0, "velocity": 90, "start_beat": 1023.0, "duration_beats": 1.0}]}
                ]
            },
            "progressions": [
                {"chords": ["G_major", "C_major"], "style": "jazz",
                 "notes": [{"offset": 0, "velocity": 80, "start_beat": 0.0, "duration_beats": 1e30}]}
            ]
        }"#;
        let (s, skipped) = PatternStore::from_reader(json.as_bytes()).unwrap();
        assert_eq!(skipped, 3);
        assert_eq!(s.patterns().len(), 1);
        assert_eq!(s.patterns()[0].style, "rock");
        assert!(s.progressions().is_empty());
    }

    #[test]
    fn test_rejects_offsets_too_far_from_the_root() {
        let mut s = PatternStore::new();
        assert!(s.insert("C_major", entry("jazz", &[0, 49])).is_none());
        assert!(s.insert("C_major", entry("jazz", &[-49, 0])).is_none());
        assert!(s.insert("C_major", entry("jazz", &[-48, 0, 48])).is_some());
        assert_eq!(s.len(), 1);
    }

    #[test]
    fn test_syntax_error_is_an_error() {
        assert!(matches!(
            PatternStore::from_reader("{not json".as_bytes()),
            Err(CorpusError::Json(_))
        ));
    }

    #[test]
    fn test_save_and_reload_keeps_usage() {
        let mut s = PatternStore::new();
        let id = s.insert("G_dominant7", entry("blues", &[0, 4, 7, 10])).unwrap();
        s.record_usage(id);
        s.insert_progression(ProgressionEntry {
            chords: vec!["C_major".into(), "G_major".into()],
            style: "rock".into(),
            notes: even_notes(&[0, 2], 80, 0.5),
            usage_count: 3,
            rating: 4.5,
            difficulty: 1,
        })
        .unwrap();

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("corpus.json");
        s.save(&path).unwrap();
        let back = PatternStore::load(&path).unwrap();
        assert_eq!(back.patterns()[0].usage_count, 1);
        assert_eq!(back.patterns()[0].notes, s.patterns()[0].notes);
        assert_eq!(back.progressions()[0].usage_count, 3);
        assert_eq!(back.progressions()[0].anchor_root, 7);
    }
}
