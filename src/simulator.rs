use crate::types::*;
use crossbeam_channel::Sender;
use log::{info, warn};
use std::thread;
use std::time::Duration;

/// Plays scripted chord progressions into the engine without any hardware.
///
/// Time is virtual: timestamps advance by the script, and `Clock` ticks are
/// sent while chords are held so the debounce can mature. With `pace` on
/// (the default) each tick also sleeps for real, so playback keeps up.
pub struct Simulator {
    tx: Sender<InputEvent>,
    now_us: u64,
    tick_ms: u32,
    pace: bool,
    held: Vec<u8>,
    sent: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Demo {
    /// C – Am – F – G
    Basic,
    /// Dm7 – G7 – Cmaj7
    Jazz,
    /// C7 – F7 – G7 – C7
    Blues,
}

impl Demo {
    pub const ALL: [Demo; 3] = [Demo::Basic, Demo::Jazz, Demo::Blues];

    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "basic" => Some(Demo::Basic),
            "jazz" => Some(Demo::Jazz),
            "blues" => Some(Demo::Blues),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Demo::Basic => "basic",
            Demo::Jazz => "jazz",
            Demo::Blues => "blues",
        }
    }

    /// Chord voicings as MIDI notes, in playing order.
    pub fn voicings(&self) -> &'static [&'static [u8]] {
        match self {
            Demo::Basic => &[&[60, 64, 67], &[57, 60, 64], &[53, 57, 60], &[55, 59, 62]],
            Demo::Jazz => &[&[50, 53, 57, 60], &[55, 59, 62, 65], &[48, 52, 55, 59]],
            Demo::Blues => &[
                &[48, 52, 55, 58],
                &[53, 57, 60, 63],
                &[55, 59, 62, 65],
                &[48, 52, 55, 58],
            ],
        }
    }
}

impl Simulator {
    pub fn new(tx: Sender<InputEvent>) -> Self {
        Self {
            tx,
            now_us: 0,
            tick_ms: 20,
            pace: true,
            held: Vec::new(),
            sent: 0,
        }
    }

    pub fn with_pace(mut self, pace: bool) -> Self {
        self.pace = pace;
        self
    }

    pub fn with_tick_ms(mut self, tick_ms: u32) -> Self {
        self.tick_ms = tick_ms.max(1);
        self
    }

    /// Run a demo progression, ending with a transport stop. Blocks the
    /// calling thread. Returns the number of events sent.
    pub fn run(&mut self, demo: Demo, chord_ms: u32) -> u64 {
        info!("Simulator starting {} demo...", demo.name());
        self.play(&demo_sequence(demo, chord_ms));
        info!("Demo sequence complete ({} events)", self.sent);
        self.sent
    }

    /// Execute an arbitrary gesture script.
    pub fn play(&mut self, gestures: &[Gesture]) {
        for gesture in gestures {
            if !self.execute(gesture) {
                warn!("Simulator: engine gone, stopping early");
                return;
            }
        }
    }

    fn execute(&mut self, gesture: &Gesture) -> bool {
        match gesture {
            Gesture::Hold { ms } => {
                let ticks = (*ms / self.tick_ms).max(1);
                for _ in 0..ticks {
                    self.now_us += self.tick_ms as u64 * 1000;
                    if self.pace {
                        thread::sleep(Duration::from_millis(self.tick_ms as u64));
                    }
                    if !self.send(InputEvent::Clock(self.now_us)) {
                        return false;
                    }
                }
                true
            }

            Gesture::Press { notes, velocity } => {
                let names: Vec<String> = notes.iter().map(|&n| midi_note_name(n)).collect();
                info!("  press {}", names.join(" "));
                for &n in notes {
                    self.held.push(n);
                    if !self.send(InputEvent::Note(NoteEvent::on(n, *velocity, self.now_us))) {
                        return false;
                    }
                }
                true
            }

            Gesture::Release { notes } => {
                for &n in notes {
                    self.held.retain(|&h| h != n);
                    if !self.send(InputEvent::Note(NoteEvent::off(n, self.now_us))) {
                        return false;
                    }
                }
                true
            }

            Gesture::ReleaseAll => {
                let held = std::mem::take(&mut self.held);
                held.into_iter()
                    .all(|n| self.send(InputEvent::Note(NoteEvent::off(n, self.now_us))))
            }

            Gesture::Stop => {
                info!("  transport stop");
                self.send(InputEvent::TransportStop)
            }
        }
    }

    fn send(&mut self, event: InputEvent) -> bool {
        self.sent += 1;
        self.tx.send(event).is_ok()
    }
}

// ─── Gesture types ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub enum Gesture {
    /// Let virtual time pass, ticking the engine.
    Hold { ms: u32 },
    Press { notes: Vec<u8>, velocity: u8 },
    Release { notes: Vec<u8> },
    ReleaseAll,
    Stop,
}

/// Each chord is held for `chord_ms`, then released with a short gap.
pub fn demo_sequence(demo: Demo, chord_ms: u32) -> Vec<Gesture> {
    let mut gestures = vec![Gesture::Hold { ms: 100 }];
    for voicing in demo.voicings() {
        gestures.push(Gesture::Press {
            notes: voicing.to_vec(),
            velocity: 90,
        });
        gestures.push(Gesture::Hold { ms: chord_ms });
        gestures.push(Gesture::ReleaseAll);
        gestures.push(Gesture::Hold { ms: 100 });
    }
    gestures.push(Gesture::Stop);
    gestures
}
