use crate::chord_table::ChordTable;
use crate::note_tracker::NoteTracker;
use crate::types::*;
use log::{debug, info, trace};
use std::time::Duration;

pub const DEFAULT_DEBOUNCE: Duration = Duration::from_millis(300);

/// Fewer stable pitch classes than this never form a chord.
pub const MIN_CHORD_SIZE: usize = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClassifierState {
    Silent,
    ChordDetected,
}

/// Turns the tracker's stable pitch classes into chord labels.
///
/// # Emission rules
///
/// - `Changed` fires when a label is found whose (root, quality) differs from
///   the last one emitted. Re-voicing the same chord never re-triggers.
/// - `Released` fires when fewer than two stable pitch classes remain after a
///   label has been emitted. This also forgets the last emission, so playing
///   the same chord again after letting go triggers again.
/// - Two or more stable pitch classes that match no table entry drop the
///   current label without an event. That is the normal outcome for most
///   random note clusters.
pub struct ChordClassifier {
    table: ChordTable,
    debounce: Duration,
    current: Option<ChordLabel>,
    last_emitted: Option<ChordLabel>,
}

impl ChordClassifier {
    pub fn new(table: ChordTable, debounce: Duration) -> Self {
        Self {
            table,
            debounce,
            current: None,
            last_emitted: None,
        }
    }

    pub fn standard() -> Self {
        Self::new(ChordTable::standard().clone(), DEFAULT_DEBOUNCE)
    }

    pub fn debounce(&self) -> Duration {
        self.debounce
    }

    pub fn table(&self) -> &ChordTable {
        &self.table
    }

    pub fn state(&self) -> ClassifierState {
        if self.current.is_some() {
            ClassifierState::ChordDetected
        } else {
            ClassifierState::Silent
        }
    }

    pub fn current(&self) -> Option<&ChordLabel> {
        self.current.as_ref()
    }

    /// Best label for a set of pitch classes, or None.
    ///
    /// Every member is tried as the root. Among matching roots the one
    /// explaining the most notes wins; ties go to the lowest pitch class.
    pub fn classify(&self, stable: PitchClassSet, now_us: u64) -> Option<ChordLabel> {
        if stable.len() < MIN_CHORD_SIZE {
            return None;
        }

        let mut best: Option<ChordLabel> = None;
        for root in stable.iter() {
            let intervals = stable.intervals_from(root);
            let Some(quality) = self.table.lookup(intervals) else {
                continue;
            };
            let confidence = intervals.len();
            // Roots are visited in ascending order, so strict > keeps the lowest on ties
            if best.as_ref().map_or(true, |b| confidence > b.confidence) {
                best = Some(ChordLabel {
                    root,
                    quality,
                    members: stable,
                    confidence,
                    detected_at_us: now_us,
                });
            }
        }

        if best.is_none() {
            trace!("No chord for {}", stable);
        }
        best
    }

    /// Re-evaluate against the tracker. Returns an event only on a transition.
    pub fn update(&mut self, tracker: &NoteTracker, now_us: u64) -> Option<ChordEvent> {
        let stable = tracker.stable_held_pitch_classes(self.debounce, now_us);

        if stable.len() < MIN_CHORD_SIZE {
            self.current = None;
            return self.last_emitted.take().map(|label| {
                info!("Chord released: {} {}", note_name(label.root), label.quality);
                ChordEvent::Released {
                    timestamp_us: now_us,
                }
            });
        }

        let label = self.classify(stable, now_us);
        let Some(label) = label else {
            if let Some(dropped) = self.current.take() {
                debug!("{} no longer matches ({} held)", dropped, stable);
            }
            return None;
        };

        let is_new = self
            .last_emitted
            .as_ref()
            .map_or(true, |prev| !prev.same_chord(&label));

        // Keep the detection timestamp of an unchanged chord
        let unchanged_current = self
            .current
            .as_ref()
            .is_some_and(|cur| cur.same_chord(&label));
        if !unchanged_current {
            self.current = Some(label.clone());
        }

        if is_new {
            info!("Chord detected: {} (confidence {})", label, label.confidence);
            self.last_emitted = Some(label.clone());
            Some(ChordEvent::Changed(label))
        } else {
            None
        }
    }

    pub fn reset(&mut self) {
        self.current = None;
        self.last_emitted = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MS: u64 = 1000;

    fn hold(notes: &[u8], at_us: u64) -> NoteTracker {
        let mut t = NoteTracker::new();
        for &n in notes {
            t.note_on(n, 90, at_us);
        }
        t
    }

    fn changed(ev: Option<ChordEvent>) -> ChordLabel {
        match ev {
            Some(ChordEvent::Changed(label)) => label,
            other => panic!("expected Changed, got {:?}", other),
        }
    }

    #[test]
    fn test_c_major_after_debounce() {
        let mut c = ChordClassifier::standard();
        let t = hold(&[60, 64, 67], 0);
        assert_eq!(c.update(&t, 299 * MS), None);
        assert_eq!(c.state(), ClassifierState::Silent);
        let label = changed(c.update(&t, 300 * MS));
        assert_eq!(label.root, 0);
        assert_eq!(label.quality, "major");
        assert_eq!(label.confidence, 3);
        assert_eq!(label.key(), "C_major");
        assert_eq!(c.state(), ClassifierState::ChordDetected);
    }

    #[test]
    fn test_a_minor_root_in_any_voicing() {
        let mut c = ChordClassifier::standard();
        // C4 E4 A4: A is not the bass note
        let t = hold(&[60, 64, 69], 0);
        let label = changed(c.update(&t, 400 * MS));
        assert_eq!(label.root, 9);
        assert_eq!(label.quality, "minor");
    }

    #[test]
    fn test_unknown_interval_set_yields_nothing() {
        let table = ChordTable::standard().without(&["sus2", "sus4"]);
        let mut c = ChordClassifier::new(table, DEFAULT_DEBOUNCE);
        let t = hold(&[60, 62, 67], 0);
        assert_eq!(c.update(&t, 500 * MS), None);
        assert!(c.current().is_none());
    }

    #[test]
    fn test_tie_break_prefers_lowest_root() {
        // C D G is C sus2 and G sus4 at once
        let c = ChordClassifier::standard();
        let label = c
            .classify([0, 2, 7].into_iter().collect(), 0)
            .unwrap();
        assert_eq!(label.root, 0);
        assert_eq!(label.quality, "sus2");

        // C E G A is C major6 and A minor7
        let label = c
            .classify([0, 4, 7, 9].into_iter().collect(), 0)
            .unwrap();
        assert_eq!(label.root, 0);
        assert_eq!(label.quality, "major6");
    }

    #[test]
    fn test_every_table_entry_is_recognised_from_every_root() {
        let c = ChordClassifier::standard();
        for &(intervals, quality) in crate::chord_table::STANDARD_QUALITIES {
            for root in 0..12u8 {
                let set: PitchClassSet = intervals.iter().map(|i| (root + i) % 12).collect();
                let label = c.classify(set, 0).unwrap();
                assert_eq!(label.confidence, intervals.len());
                // Symmetric shapes may resolve to another root; the label must still
                // describe exactly the same notes
                let rebuilt: PitchClassSet = c
                    .table()
                    .intervals_of(label.quality)
                    .unwrap()
                    .iter()
                    .map(|i| (label.root + i) % 12)
                    .collect();
                assert_eq!(rebuilt, set, "{} from {}", quality, root);
            }
        }
    }

    #[test]
    fn test_dropping_the_third_reports_power_chord() {
        let mut c = ChordClassifier::standard();
        let mut t = hold(&[60, 64, 67], 0);
        changed(c.update(&t, 300 * MS));

        t.note_off(64, 400 * MS);
        let label = changed(c.update(&t, 400 * MS));
        assert_eq!((label.root, label.quality), (0, "power5"));

        // The third comes back in another octave and has to settle first
        t.note_on(76, 90, 450 * MS);
        assert_eq!(c.update(&t, 500 * MS), None);
        let label = changed(c.update(&t, 750 * MS));
        assert_eq!((label.root, label.quality), (0, "major"));
    }

    #[test]
    fn test_same_chord_after_unrecognised_shape_is_quiet() {
        let table = ChordTable::standard().without(&["power5"]);
        let mut c = ChordClassifier::new(table, DEFAULT_DEBOUNCE);
        let mut t = hold(&[60, 64, 67], 0);
        changed(c.update(&t, 300 * MS));

        t.note_off(64, 400 * MS);
        assert_eq!(c.update(&t, 400 * MS), None);
        assert!(c.current().is_none(), "no stale label while C+G is unrecognised");

        t.note_on(76, 90, 450 * MS);
        assert_eq!(c.update(&t, 750 * MS), None, "same chord as last emission");
        assert_eq!(c.current().map(|l| l.quality), Some("major"));
    }

    #[test]
    fn test_removing_a_note_changes_label() {
        let mut c = ChordClassifier::standard();
        let mut t = hold(&[60, 64, 67, 70], 0);
        assert_eq!(changed(c.update(&t, 300 * MS)).quality, "dominant7");
        t.note_off(70, 350 * MS);
        let label = changed(c.update(&t, 350 * MS));
        assert_eq!((label.root, label.quality), (0, "major"));
    }

    #[test]
    fn test_release_and_replay() {
        let mut c = ChordClassifier::standard();
        let mut t = hold(&[57, 60, 64], 0);
        changed(c.update(&t, 300 * MS));

        t.note_off(57, 400 * MS);
        t.note_off(60, 400 * MS);
        assert_eq!(
            c.update(&t, 400 * MS),
            Some(ChordEvent::Released {
                timestamp_us: 400 * MS
            })
        );
        assert_eq!(c.state(), ClassifierState::Silent);
        // Nothing further to release
        assert_eq!(c.update(&t, 410 * MS), None);

        t.note_on(57, 90, 500 * MS);
        t.note_on(60, 90, 500 * MS);
        assert_eq!(changed(c.update(&t, 800 * MS)).quality, "minor");
    }
}
