use crate::player::PlayerCommand;
use crate::preferences::SharedPreferences;
use crate::selector::PatternSelector;
use crate::types::*;
use crossbeam_channel::{Receiver, Sender};
use log::{debug, info};

pub const DEFAULT_PROGRESSION_WINDOW: usize = 4;

/// Consumer side of the engine: turns chord changes into solos.
///
/// Each label is treated as an immutable snapshot. Preferences are read as a
/// whole-table snapshot per selection, so a concurrent writer is never seen
/// half-applied.
pub struct Soloist {
    rx: Receiver<ChordEvent>,
    player_tx: Sender<PlayerCommand>,
    selector: PatternSelector,
    prefs: SharedPreferences,
    history: Vec<ChordLabel>,
    window: usize,
}

impl Soloist {
    pub fn new(
        rx: Receiver<ChordEvent>,
        player_tx: Sender<PlayerCommand>,
        selector: PatternSelector,
        prefs: SharedPreferences,
    ) -> Self {
        Self {
            rx,
            player_tx,
            selector,
            prefs,
            history: Vec::new(),
            window: DEFAULT_PROGRESSION_WINDOW,
        }
    }

    /// How many recent chords are matched against stored progressions.
    /// Below 2 only single-chord retrieval is used.
    pub fn with_progression_window(mut self, window: usize) -> Self {
        self.window = window;
        self
    }

    pub fn run(&mut self) {
        info!("Soloist running (progression window {})", self.window);
        let mut count: u64 = 0;
        while let Ok(event) = self.rx.recv() {
            count += 1;
            if let Some(command) = self.respond(event) {
                if self.player_tx.send(command).is_err() {
                    debug!("Player gone; command dropped");
                }
            }
        }
        info!("Soloist shutting down after {} chord events", count);
    }

    /// Decide what the player should do about one chord event.
    pub fn respond(&mut self, event: ChordEvent) -> Option<PlayerCommand> {
        match event {
            ChordEvent::Changed(label) => {
                info!(
                    "Chord {} {} ({} notes)",
                    note_name(label.root),
                    label.quality,
                    label.confidence
                );
                self.remember(&label);
                let prefs = self.prefs.snapshot();
                let solo = if self.window >= 2 && self.history.len() >= 2 {
                    self.selector.select_with_history(&label, &self.history, &prefs)
                } else {
                    self.selector.select(&label, &prefs)
                };
                Some(PlayerCommand::Play(solo))
            }
            ChordEvent::Released { timestamp_us } => {
                debug!("Chord released at {:.3}s", timestamp_us as f64 / 1e6);
                None
            }
            ChordEvent::Stop => {
                self.history.clear();
                Some(PlayerCommand::StopAll)
            }
        }
    }

    fn remember(&mut self, label: &ChordLabel) {
        if self.history.last().map_or(false, |last| last.same_chord(label)) {
            return;
        }
        self.history.push(label.clone());
        let excess = self.history.len().saturating_sub(self.window.max(1));
        self.history.drain(..excess);
    }

    pub fn history(&self) -> &[ChordLabel] {
        &self.history
    }

    pub fn selector(&self) -> &PatternSelector {
        &self.selector
    }
}
