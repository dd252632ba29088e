use crate::chord_classifier::ChordClassifier;
use crate::note_tracker::NoteTracker;
use crate::types::*;
use crossbeam_channel::{select, tick, Receiver, Sender};
use log::{debug, info, trace};
use std::time::Duration;

/// The coordinator owns all producer-side state: the held notes and the
/// current chord. It receives InputEvents from the keyboard bridge (or the
/// simulator), re-evaluates the chord, and hands ChordEvents to the soloist.
///
/// It never waits on generation or playback, so key capture keeps going while
/// a solo is sounding.
///
/// # Re-evaluation
///
/// Notes only count once held for the debounce duration, but nothing arrives
/// from the keyboard at the moment a held chord matures. Two sources close
/// that gap:
///
/// - `InputEvent::Clock` ticks from the input side (the simulator sends them).
/// - An internal ticker driven by a `SessionClock` (live hardware input),
///   enabled with `with_ticker`.
pub struct Coordinator {
    input_rx: Receiver<InputEvent>,
    chord_tx: Sender<ChordEvent>,
    tracker: NoteTracker,
    classifier: ChordClassifier,
    ticker: Option<(SessionClock, Duration)>,
    last_time_us: u64,
}

impl Coordinator {
    pub fn new(
        input_rx: Receiver<InputEvent>,
        chord_tx: Sender<ChordEvent>,
        tracker: NoteTracker,
        classifier: ChordClassifier,
    ) -> Self {
        Self {
            input_rx,
            chord_tx,
            tracker,
            classifier,
            ticker: None,
            last_time_us: 0,
        }
    }

    /// Re-evaluate every `interval` using the session clock, even without input.
    pub fn with_ticker(mut self, clock: SessionClock, interval: Duration) -> Self {
        self.ticker = Some((clock, interval));
        self
    }

    pub fn run(&mut self) {
        info!(
            "Coordinator running (debounce {}ms, hold policy {:?})",
            self.classifier.debounce().as_millis(),
            self.tracker.policy()
        );
        let mut event_count: u64 = 0;

        match self.ticker.clone() {
            Some((clock, interval)) => {
                let ticks = tick(interval);
                let input_rx = self.input_rx.clone();
                loop {
                    select! {
                        recv(input_rx) -> msg => match msg {
                            Ok(event) => {
                                event_count += 1;
                                self.handle(event);
                            }
                            Err(_) => break,
                        },
                        recv(ticks) -> _ => self.evaluate(clock.now_us()),
                    }
                }
            }
            None => {
                while let Ok(event) = self.input_rx.recv() {
                    event_count += 1;
                    self.handle(event);
                }
            }
        }

        info!("Coordinator shutting down after {} input events", event_count);
    }

    /// Apply one input event and forward any resulting chord transition.
    pub fn handle(&mut self, event: InputEvent) {
        match event {
            InputEvent::Note(note) => {
                trace!("{}", note);
                self.tracker.apply(&note);
                self.evaluate(note.timestamp_us);
            }
            InputEvent::Clock(now_us) => self.evaluate(now_us),
            InputEvent::TransportStop => {
                info!("Transport stop");
                self.tracker.clear();
                self.classifier.reset();
                self.emit(ChordEvent::Stop);
            }
        }
    }

    fn evaluate(&mut self, now_us: u64) {
        // Ticks and events come from different threads; never step backwards
        let now_us = now_us.max(self.last_time_us);
        self.last_time_us = now_us;

        if let Some(event) = self.classifier.update(&self.tracker, now_us) {
            self.emit(event);
        }
    }

    fn emit(&self, event: ChordEvent) {
        if self.chord_tx.send(event).is_err() {
            debug!("Soloist gone; chord event dropped");
        }
    }

    pub fn tracker(&self) -> &NoteTracker {
        &self.tracker
    }

    pub fn classifier(&self) -> &ChordClassifier {
        &self.classifier
    }
}

/// Pass events from an input source to the coordinator until the source
/// closes or `shutdown` fires (a closed shutdown channel counts). A shutdown
/// is followed by a TransportStop so the player is silenced before the
/// pipeline drains. Returns true when stopped by `shutdown`.
pub fn forward_input(
    source: &Receiver<InputEvent>,
    input_tx: &Sender<InputEvent>,
    shutdown: &Receiver<()>,
) -> bool {
    loop {
        select! {
            recv(shutdown) -> _ => {
                info!("Shutdown requested; stopping transport");
                if input_tx.send(InputEvent::TransportStop).is_err() {
                    debug!("Coordinator gone before transport stop");
                }
                return true;
            }
            recv(source) -> msg => match msg {
                Ok(event) => {
                    if input_tx.send(event).is_err() {
                        return false;
                    }
                }
                Err(_) => return false,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossbeam_channel::unbounded;

    const MS: u64 = 1000;

    fn coordinator() -> (Coordinator, Receiver<ChordEvent>) {
        let (_in_tx, in_rx) = unbounded();
        let (tx, rx) = unbounded();
        let c = Coordinator::new(in_rx, tx, NoteTracker::new(), ChordClassifier::standard());
        (c, rx)
    }

    #[test]
    fn test_clock_tick_matures_chord() {
        let (mut c, rx) = coordinator();
        for n in [60, 64, 67] {
            c.handle(InputEvent::Note(NoteEvent::on(n, 90, 0)));
        }
        assert!(rx.try_recv().is_err(), "nothing before debounce");
        c.handle(InputEvent::Clock(310 * MS));
        match rx.try_recv() {
            Ok(ChordEvent::Changed(label)) => assert_eq!(label.key(), "C_major"),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_transport_stop_clears_state() {
        let (mut c, rx) = coordinator();
        for n in [60, 64, 67] {
            c.handle(InputEvent::Note(NoteEvent::on(n, 90, 0)));
        }
        c.handle(InputEvent::Clock(400 * MS));
        let _ = rx.try_recv();
        c.handle(InputEvent::TransportStop);
        assert_eq!(rx.try_recv(), Ok(ChordEvent::Stop));
        assert!(c.tracker().held_pitch_classes().is_empty());
        assert!(c.classifier().current().is_none());
    }

    #[test]
    fn test_time_never_runs_backwards() {
        let (mut c, rx) = coordinator();
        for n in [57, 60, 64] {
            c.handle(InputEvent::Note(NoteEvent::on(n, 90, 0)));
        }
        c.handle(InputEvent::Clock(350 * MS));
        assert!(matches!(rx.try_recv(), Ok(ChordEvent::Changed(_))));
        // A late, stale timestamp must not make the chord look unstable
        c.handle(InputEvent::Clock(100 * MS));
        assert!(rx.try_recv().is_err());
        assert!(c.classifier().current().is_some());
    }

    #[test]
    fn test_forward_input_until_source_closes() {
        let (src_tx, src_rx) = unbounded();
        let (in_tx, in_rx) = unbounded();
        let (_stop_tx, stop_rx) = unbounded::<()>();
        src_tx.send(InputEvent::Clock(MS)).unwrap();
        src_tx.send(InputEvent::Clock(2 * MS)).unwrap();
        drop(src_tx);

        assert!(!forward_input(&src_rx, &in_tx, &stop_rx));
        let got: Vec<_> = in_rx.try_iter().collect();
        assert_eq!(got, vec![InputEvent::Clock(MS), InputEvent::Clock(2 * MS)]);
    }

    #[test]
    fn test_shutdown_sends_transport_stop() {
        let (_src_tx, src_rx) = unbounded::<InputEvent>();
        let (in_tx, in_rx) = unbounded();
        let (stop_tx, stop_rx) = unbounded();
        stop_tx.send(()).unwrap();

        assert!(forward_input(&src_rx, &in_tx, &stop_rx));
        assert_eq!(in_rx.try_iter().last(), Some(InputEvent::TransportStop));
    }
}
