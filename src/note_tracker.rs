use crate::types::*;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// How releases are matched against presses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HoldPolicy {
    /// Releasing any octave of a pitch class drops the pitch class, even if
    /// another octave of it is still down.
    #[default]
    PitchClass,
    /// A pitch class stays held while any MIDI note of it is down.
    RefCounted,
}

/// Tracks which pitch classes are held and when each was last pressed.
///
/// Owned by the coordinator thread; nothing else mutates it.
pub struct NoteTracker {
    policy: HoldPolicy,
    held: PitchClassSet,
    /// Onset time per pitch class, µs. Only meaningful while held.
    onset_us: [Option<u64>; 12],
    /// Individual MIDI notes down, one bit each (RefCounted only).
    notes_down: u128,
}

impl NoteTracker {
    pub fn new() -> Self {
        Self::with_policy(HoldPolicy::default())
    }

    pub fn with_policy(policy: HoldPolicy) -> Self {
        Self {
            policy,
            held: PitchClassSet::EMPTY,
            onset_us: [None; 12],
            notes_down: 0,
        }
    }

    pub fn policy(&self) -> HoldPolicy {
        self.policy
    }

    /// Apply a key event. A note-on with velocity 0 counts as a release.
    pub fn apply(&mut self, event: &NoteEvent) {
        if event.is_onset && event.velocity > 0 {
            self.note_on(event.note, event.velocity, event.timestamp_us);
        } else {
            self.note_off(event.note, event.timestamp_us);
        }
    }

    pub fn note_on(&mut self, note: u8, velocity: u8, time_us: u64) {
        if velocity == 0 {
            self.note_off(note, time_us);
            return;
        }
        let pc = pitch_class(note);
        self.held.insert(pc);
        self.onset_us[pc as usize] = Some(time_us);
        self.notes_down |= 1u128 << (note & 0x7F);
    }

    pub fn note_off(&mut self, note: u8, _time_us: u64) {
        let pc = pitch_class(note);
        self.notes_down &= !(1u128 << (note & 0x7F));

        if self.policy == HoldPolicy::RefCounted && self.any_octave_down(pc) {
            return;
        }
        self.held.remove(pc);
        self.onset_us[pc as usize] = None;
    }

    fn any_octave_down(&self, pc: PitchClass) -> bool {
        (pc..128).step_by(12).any(|n| self.notes_down & (1u128 << n) != 0)
    }

    pub fn held_pitch_classes(&self) -> PitchClassSet {
        self.held
    }

    /// Held pitch classes whose onset is at least `debounce` before `now_us`.
    pub fn stable_held_pitch_classes(&self, debounce: Duration, now_us: u64) -> PitchClassSet {
        let debounce_us = debounce.as_micros() as u64;
        self.held
            .iter()
            .filter(|&pc| match self.onset_us[pc as usize] {
                Some(onset) => now_us.saturating_sub(onset) >= debounce_us && now_us >= onset,
                None => false,
            })
            .collect()
    }

    /// Earliest time at which a currently-unstable note becomes stable.
    pub fn next_stable_at(&self, debounce: Duration, now_us: u64) -> Option<u64> {
        let debounce_us = debounce.as_micros() as u64;
        self.held
            .iter()
            .filter_map(|pc| self.onset_us[pc as usize])
            .map(|onset| onset + debounce_us)
            .filter(|&t| t > now_us)
            .min()
    }

    pub fn clear(&mut self) {
        self.held = PitchClassSet::EMPTY;
        self.onset_us = [None; 12];
        self.notes_down = 0;
    }
}

impl Default for NoteTracker {
    fn default() -> Self {
        Self::new()
    }
}
