use crate::pattern_store::*;
use crate::types::*;

/// Absolute pitch of root C when the sample phrases were written down.
const SAMPLE_BASE: i32 = 60;
const SAMPLE_VELOCITY: u8 = 80;
const SIXTEENTH: f32 = 0.25;

/// Sample phrases as absolute MIDI notes, keyed by chord.
/// (key, style, difficulty, notes)
const SAMPLE_PATTERNS: &[(&str, &str, u8, &[u8])] = &[
    ("C_major", "jazz", 2, &[60, 62, 64, 65, 67, 69, 71, 72]),
    ("C_major", "blues", 2, &[60, 63, 64, 67, 70, 67, 64, 60]),
    ("C_major", "classical", 1, &[72, 71, 69, 67, 65, 64, 62, 60]),
    ("C_major", "rock", 2, &[60, 62, 64, 67, 65, 62, 60]),
    ("A_minor", "jazz", 2, &[57, 60, 62, 64, 65, 67, 69, 72]),
    ("A_minor", "blues", 2, &[57, 60, 63, 65, 67, 65, 60, 57]),
    ("A_minor", "classical", 1, &[69, 67, 65, 64, 62, 60, 57]),
    ("A_minor", "rock", 2, &[57, 60, 62, 65, 67, 65, 60, 57]),
    ("F_major", "jazz", 2, &[53, 55, 57, 58, 60, 62, 64, 65]),
    ("F_major", "blues", 2, &[53, 56, 58, 60, 63, 60, 58, 53]),
    ("F_major", "classical", 1, &[65, 64, 62, 60, 58, 57, 55, 53]),
    ("F_major", "rock", 2, &[53, 55, 58, 60, 62, 60, 58, 53]),
    ("G_major", "jazz", 2, &[55, 57, 59, 60, 62, 64, 66, 67]),
    ("G_major", "blues", 2, &[55, 58, 59, 62, 65, 62, 59, 55]),
    ("G_major", "classical", 1, &[67, 66, 64, 62, 60, 59, 57, 55]),
    ("G_major", "rock", 2, &[55, 57, 59, 62, 64, 62, 59, 55]),
    ("D_minor", "jazz", 2, &[50, 53, 55, 57, 58, 60, 62, 65]),
    ("D_minor", "blues", 2, &[50, 53, 56, 58, 61, 58, 53, 50]),
    ("D_minor", "classical", 1, &[62, 60, 58, 57, 55, 53, 50]),
    ("D_minor", "rock", 2, &[50, 53, 55, 58, 60, 58, 55, 50]),
    ("E_minor", "jazz", 2, &[52, 55, 57, 59, 60, 62, 64, 67]),
    ("E_minor", "blues", 2, &[52, 55, 58, 60, 63, 60, 55, 52]),
    ("E_minor", "classical", 1, &[64, 62, 60, 59, 57, 55, 52]),
    ("E_minor", "rock", 2, &[52, 55, 57, 60, 62, 60, 57, 52]),
    ("B_diminished", "jazz", 3, &[59, 62, 65, 68, 71, 68, 65, 62]),
    ("B_diminished", "classical", 2, &[71, 68, 65, 62, 59]),
    ("B_diminished", "rock", 2, &[59, 62, 65, 68, 65, 62, 59]),
    ("C_dominant7", "jazz", 3, &[60, 64, 67, 70, 72, 70, 67, 64]),
    ("C_dominant7", "blues", 3, &[60, 63, 65, 67, 70, 67, 65, 63]),
];

/// (chords, style, difficulty, notes)
const SAMPLE_PROGRESSIONS: &[(&[&str], &str, u8, &[u8])] = &[
    (
        &["C_major", "A_minor", "F_major", "G_major"],
        "jazz",
        2,
        &[60, 62, 64, 65, 67, 65, 64, 62],
    ),
    (
        &["C_major", "A_minor", "F_major", "G_major"],
        "classical",
        1,
        &[72, 69, 67, 65, 64, 62, 60],
    ),
    (
        &["C_major", "F_major", "G_major", "C_major"],
        "blues",
        2,
        &[60, 64, 67, 69, 67, 64, 65, 62],
    ),
    (
        &["D_minor7", "G_dominant7", "C_major7"],
        "jazz",
        3,
        &[62, 65, 67, 69, 71, 69, 67, 65, 64, 62, 60],
    ),
    (
        &["A_minor7", "D_dominant7", "G_major7"],
        "jazz",
        3,
        &[69, 67, 66, 64, 62, 64, 66, 67, 69],
    ),
    (
        &["C_dominant7", "F_dominant7", "G_dominant7"],
        "blues",
        2,
        &[60, 63, 64, 66, 67, 66, 64, 63, 60],
    ),
];

/// Offsets of absolute sample notes from `root` placed at the sample base.
fn offsets_from(root: PitchClass, notes: &[u8]) -> Vec<i8> {
    let anchor = SAMPLE_BASE + root as i32;
    notes.iter().map(|&n| (n as i32 - anchor) as i8).collect()
}

/// The corpus used when no corpus file is given.
pub fn sample_corpus() -> PatternStore {
    let mut store = PatternStore::new();

    for &(key, style, difficulty, notes) in SAMPLE_PATTERNS {
        let Some((root, _)) = parse_chord_key(key) else {
            continue;
        };
        store.insert(
            key,
            PatternEntry {
                style: style.to_string(),
                notes: even_notes(&offsets_from(root, notes), SAMPLE_VELOCITY, SIXTEENTH),
                usage_count: 0,
                rating: 0.0,
                difficulty,
            },
        );
    }

    for &(chords, style, difficulty, notes) in SAMPLE_PROGRESSIONS {
        let Some((anchor, _)) = chords.last().and_then(|k| parse_chord_key(k)) else {
            continue;
        };
        store.insert_progression(ProgressionEntry {
            chords: chords.iter().map(|c| c.to_string()).collect(),
            style: style.to_string(),
            notes: even_notes(&offsets_from(anchor, notes), SAMPLE_VELOCITY, SIXTEENTH),
            usage_count: 0,
            rating: 0.0,
            difficulty,
        });
    }

    store
}
