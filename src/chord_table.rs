use crate::types::*;
use lazy_static::lazy_static;
use log::warn;
use std::collections::HashMap;

/// Interval sets (semitones above the root) and the quality tag they name.
/// Order matters only for duplicate detection: the first entry wins.
pub const STANDARD_QUALITIES: &[(&[u8], &str)] = &[
    (&[0, 4, 7], "major"),
    (&[0, 3, 7], "minor"),
    (&[0, 4, 7, 11], "major7"),
    (&[0, 4, 7, 10], "dominant7"),
    (&[0, 3, 7, 10], "minor7"),
    (&[0, 3, 6], "diminished"),
    (&[0, 4, 8], "augmented"),
    (&[0, 5, 7], "sus4"),
    (&[0, 2, 7], "sus2"),
    (&[0, 7], "power5"),
    (&[0, 4, 7, 9], "major6"),
    (&[0, 3, 7, 9], "minor6"),
    (&[0, 3, 7, 11], "minorMaj7"),
    (&[0, 2, 4, 7, 11], "major9"),
    (&[0, 2, 3, 7, 10], "minor9"),
    (&[0, 3, 6, 9], "diminished7"),
    (&[0, 5, 7, 10], "7sus4"),
];

lazy_static! {
    static ref STANDARD: ChordTable = ChordTable::from_entries(STANDARD_QUALITIES);
}

/// Immutable lookup from a root-relative interval set to a quality tag.
#[derive(Debug, Clone)]
pub struct ChordTable {
    by_intervals: HashMap<PitchClassSet, &'static str>,
    qualities: Vec<&'static str>,
}

impl ChordTable {
    /// The process-wide standard vocabulary.
    pub fn standard() -> &'static ChordTable {
        &STANDARD
    }

    pub fn from_entries(entries: &[(&[u8], &'static str)]) -> Self {
        let mut by_intervals = HashMap::with_capacity(entries.len());
        let mut qualities = Vec::with_capacity(entries.len());
        for &(intervals, quality) in entries {
            let set: PitchClassSet = intervals.iter().copied().collect();
            if !set.contains(0) {
                warn!("Chord table entry {} lacks a root interval, skipped", quality);
                continue;
            }
            if let Some(existing) = by_intervals.get(&set) {
                warn!("Chord table: {} duplicates {} ({}), skipped", quality, existing, set);
                continue;
            }
            by_intervals.insert(set, quality);
            qualities.push(quality);
        }
        Self {
            by_intervals,
            qualities,
        }
    }

    /// A copy of this table without the named qualities.
    pub fn without(&self, excluded: &[&str]) -> Self {
        let by_intervals: HashMap<_, _> = self
            .by_intervals
            .iter()
            .filter(|(_, q)| !excluded.contains(*q))
            .map(|(k, v)| (*k, *v))
            .collect();
        let qualities = self
            .qualities
            .iter()
            .copied()
            .filter(|q| !excluded.contains(q))
            .collect();
        Self {
            by_intervals,
            qualities,
        }
    }

    pub fn lookup(&self, intervals: PitchClassSet) -> Option<&'static str> {
        self.by_intervals.get(&intervals).copied()
    }

    /// Root-relative intervals for a quality tag.
    pub fn intervals_of(&self, quality: &str) -> Option<PitchClassSet> {
        self.by_intervals
            .iter()
            .find(|(_, q)| **q == quality)
            .map(|(set, _)| *set)
    }

    /// Intern a quality string from outside (corpus keys) to the table's tag.
    pub fn quality_tag(&self, quality: &str) -> Option<&'static str> {
        self.qualities.iter().copied().find(|q| *q == quality)
    }

    pub fn qualities(&self) -> &[&'static str] {
        &self.qualities
    }

    pub fn len(&self) -> usize {
        self.qualities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.qualities.is_empty()
    }
}
