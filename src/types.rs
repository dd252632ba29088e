use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Instant;

// ─── Pitch classes ──────────────────────────────────────────────────────────

/// A note identity in 0..=11 with the octave discarded (C=0 … B=11).
pub type PitchClass = u8;

pub const NOTE_NAMES: [&str; 12] = [
    "C", "C#", "D", "D#", "E", "F", "F#", "G", "G#", "A", "A#", "B",
];

pub fn pitch_class(midi_note: u8) -> PitchClass {
    midi_note % 12
}

pub fn note_name(pc: PitchClass) -> &'static str {
    NOTE_NAMES[(pc % 12) as usize]
}

/// Parse a root name ("C", "F#", "Bb", "Db") into a pitch class.
pub fn parse_note_name(name: &str) -> Option<PitchClass> {
    let mut chars = name.chars();
    let letter = chars.next()?.to_ascii_uppercase();
    let natural: i32 = match letter {
        'C' => 0,
        'D' => 2,
        'E' => 4,
        'F' => 5,
        'G' => 7,
        'A' => 9,
        'B' => 11,
        _ => return None,
    };
    let accidental = match chars.as_str() {
        "" => 0,
        "#" => 1,
        "b" => -1,
        _ => return None,
    };
    Some((natural + accidental).rem_euclid(12) as PitchClass)
}

/// Pretty name with octave, e.g. 60 → "C4".
pub fn midi_note_name(midi_note: u8) -> String {
    format!("{}{}", note_name(pitch_class(midi_note)), midi_note as i32 / 12 - 1)
}

/// A set of pitch classes packed into the low 12 bits of a u16.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct PitchClassSet(u16);

impl PitchClassSet {
    pub const EMPTY: PitchClassSet = PitchClassSet(0);

    pub fn insert(&mut self, pc: PitchClass) {
        self.0 |= 1 << (pc % 12);
    }

    pub fn remove(&mut self, pc: PitchClass) {
        self.0 &= !(1 << (pc % 12));
    }

    pub fn contains(&self, pc: PitchClass) -> bool {
        self.0 & (1 << (pc % 12)) != 0
    }

    pub fn len(&self) -> usize {
        self.0.count_ones() as usize
    }

    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }

    /// Ascending pitch classes.
    pub fn iter(&self) -> impl Iterator<Item = PitchClass> + '_ {
        (0..12u8).filter(move |&pc| self.contains(pc))
    }

    /// Re-express every member as its interval above `root`.
    pub fn intervals_from(&self, root: PitchClass) -> PitchClassSet {
        let mut out = PitchClassSet::EMPTY;
        for pc in self.iter() {
            out.insert((pc + 12 - root % 12) % 12);
        }
        out
    }
}

impl FromIterator<PitchClass> for PitchClassSet {
    fn from_iter<I: IntoIterator<Item = PitchClass>>(iter: I) -> Self {
        let mut set = PitchClassSet::EMPTY;
        for pc in iter {
            set.insert(pc);
        }
        set
    }
}

impl fmt::Display for PitchClassSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<&str> = self.iter().map(note_name).collect();
        write!(f, "{{{}}}", names.join(" "))
    }
}

// ─── Keyboard input ─────────────────────────────────────────────────────────

/// A key press or release from the keyboard bridge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct NoteEvent {
    pub note: u8,
    pub velocity: u8,
    pub is_onset: bool,
    /// Microseconds since session start
    pub timestamp_us: u64,
}

impl NoteEvent {
    pub fn on(note: u8, velocity: u8, timestamp_us: u64) -> Self {
        Self {
            note,
            velocity,
            is_onset: velocity > 0,
            timestamp_us,
        }
    }

    pub fn off(note: u8, timestamp_us: u64) -> Self {
        Self {
            note,
            velocity: 0,
            is_onset: false,
            timestamp_us,
        }
    }
}

impl fmt::Display for NoteEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "t={:>10}µs  {} {:<4} v={}",
            self.timestamp_us,
            if self.is_onset { "ON " } else { "OFF" },
            midi_note_name(self.note),
            self.velocity,
        )
    }
}

// ─── Chord labels ───────────────────────────────────────────────────────────

/// The chord the classifier currently believes is being held.
/// Replaced wholesale on re-analysis; never mutated in place.
#[derive(Debug, Clone, PartialEq)]
pub struct ChordLabel {
    pub root: PitchClass,
    pub quality: &'static str,
    pub members: PitchClassSet,
    /// Number of held pitch classes the label explains
    pub confidence: usize,
    pub detected_at_us: u64,
}

impl ChordLabel {
    /// Corpus key, e.g. "C_major7".
    pub fn key(&self) -> String {
        chord_key(self.root, self.quality)
    }

    pub fn same_chord(&self, other: &ChordLabel) -> bool {
        self.root == other.root && self.quality == other.quality
    }
}

impl fmt::Display for ChordLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} {}", note_name(self.root), self.quality, self.members)
    }
}

pub fn chord_key(root: PitchClass, quality: &str) -> String {
    format!("{}_{}", note_name(root), quality)
}

/// Split a corpus key "F#_minor7" into (root, quality).
pub fn parse_chord_key(key: &str) -> Option<(PitchClass, &str)> {
    let (root, quality) = key.split_once('_')?;
    if quality.is_empty() {
        return None;
    }
    Some((parse_note_name(root)?, quality))
}

// ─── Inter-thread messages ──────────────────────────────────────────────────

/// Everything the input side can hand to the coordinator.
#[derive(Debug, Clone, PartialEq)]
pub enum InputEvent {
    Note(NoteEvent),
    /// Time passed with no key activity; lets held notes mature past the debounce.
    Clock(u64),
    /// Transport stopped (host stop, all-notes-off).
    TransportStop,
}

/// Emitted by the coordinator, consumed by the soloist.
#[derive(Debug, Clone, PartialEq)]
pub enum ChordEvent {
    Changed(ChordLabel),
    Released { timestamp_us: u64 },
    Stop,
}

/// Decode a raw MIDI message from the input bridge.
///
/// Note-on with velocity 0 is a release. Transport stop (0xFC) and
/// CC 123 (all notes off) become `TransportStop`. Anything else is ignored.
pub fn parse_midi_message(bytes: &[u8], timestamp_us: u64) -> Option<InputEvent> {
    let status = *bytes.first()?;
    if status == 0xFC {
        return Some(InputEvent::TransportStop);
    }
    match status & 0xF0 {
        0x90 if bytes.len() >= 3 => {
            let (note, velocity) = (bytes[1] & 0x7F, bytes[2] & 0x7F);
            if velocity > 0 {
                Some(InputEvent::Note(NoteEvent::on(note, velocity, timestamp_us)))
            } else {
                Some(InputEvent::Note(NoteEvent::off(note, timestamp_us)))
            }
        }
        0x80 if bytes.len() >= 3 => Some(InputEvent::Note(NoteEvent::off(bytes[1] & 0x7F, timestamp_us))),
        0xB0 if bytes.len() >= 3 && bytes[1] == 123 => Some(InputEvent::TransportStop),
        _ => None,
    }
}

// ─── Session clock ──────────────────────────────────────────────────────────

/// Monotonic clock for the session.
#[derive(Clone)]
pub struct SessionClock {
    start: Instant,
}

impl SessionClock {
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    pub fn now_us(&self) -> u64 {
        self.start.elapsed().as_micros() as u64
    }
}

impl Default for SessionClock {
    fn default() -> Self {
        Self::new()
    }
}
