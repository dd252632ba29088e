use crate::selector::ResolvedSolo;
use crate::sink::{OutputEvent, OutputSink};
use crate::types::midi_note_name;
use crossbeam_channel::{Receiver, RecvTimeoutError};
use log::{debug, info};
use std::thread;
use std::time::{Duration, Instant};

#[derive(Debug, Clone)]
pub enum PlayerCommand {
    Play(ResolvedSolo),
    StopAll,
}

/// One output event at an offset from the start of the solo.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScheduledEvent {
    pub at_secs: f64,
    pub event: OutputEvent,
}

impl ResolvedSolo {
    /// The exact on/off schedule. Notes are monophonic: each starts at its own
    /// start time or when the previous one is released, whichever is later.
    pub fn timeline(&self) -> Vec<ScheduledEvent> {
        let mut events = Vec::with_capacity(self.notes.len() * 2);
        let mut cursor = 0.0f64;
        for n in &self.notes {
            let on = n.start_secs.max(cursor);
            let off = on + n.duration_secs.max(0.0);
            events.push(ScheduledEvent {
                at_secs: on,
                event: OutputEvent::NoteOn {
                    note: n.note,
                    velocity: n.velocity,
                },
            });
            events.push(ScheduledEvent {
                at_secs: off,
                event: OutputEvent::NoteOff { note: n.note },
            });
            cursor = off;
        }
        events
    }

    pub fn total_secs(&self) -> f64 {
        self.timeline().last().map_or(0.0, |e| e.at_secs)
    }
}

enum Outcome {
    Finished,
    Preempted(PlayerCommand),
    Disconnected,
}

/// Plays solos on its own thread so capture never waits on it.
///
/// A new command preempts the solo that is sounding: its note is released
/// straight away. Commands that pile up while one is being handled are
/// collapsed to the newest, with any StopAll among them still honoured.
pub struct Player {
    rx: Receiver<PlayerCommand>,
    sink: Option<Box<dyn OutputSink>>,
    sounding: Option<u8>,
    solos: u64,
}

impl Player {
    /// `sink: None` logs what would have played.
    pub fn new(rx: Receiver<PlayerCommand>, sink: Option<Box<dyn OutputSink>>) -> Self {
        Self {
            rx,
            sink,
            sounding: None,
            solos: 0,
        }
    }

    /// Blocks until the command channel closes.
    pub fn run(&mut self) {
        info!(
            "Player running → {}",
            self.sink.as_ref().map_or("no output".to_string(), |s| s.name())
        );
        let mut pending: Option<PlayerCommand> = None;

        loop {
            let command = match pending.take() {
                Some(c) => c,
                None => match self.rx.recv() {
                    Ok(c) => c,
                    Err(_) => break,
                },
            };

            let (saw_stop, latest) = self.collapse(command);
            if saw_stop {
                self.stop_all();
            }
            if let PlayerCommand::Play(solo) = latest {
                match self.play(&solo) {
                    Outcome::Finished => {}
                    Outcome::Preempted(next) => pending = Some(next),
                    Outcome::Disconnected => break,
                }
            }
        }

        self.stop_all();
        info!("Player shutting down after {} solos", self.solos);
    }

    /// Drain whatever else is queued. Returns whether a StopAll was among
    /// them and the newest command.
    fn collapse(&self, first: PlayerCommand) -> (bool, PlayerCommand) {
        let mut saw_stop = matches!(first, PlayerCommand::StopAll);
        let mut latest = first;
        let mut dropped = 0;
        while let Ok(next) = self.rx.try_recv() {
            saw_stop |= matches!(next, PlayerCommand::StopAll);
            if matches!(latest, PlayerCommand::Play(_)) {
                dropped += 1;
            }
            latest = next;
        }
        if dropped > 0 {
            debug!("Skipped {} queued solos", dropped);
        }
        (saw_stop, latest)
    }

    fn play(&mut self, solo: &ResolvedSolo) -> Outcome {
        self.solos += 1;
        let timeline = solo.timeline();
        info!(
            "▶ {} over {} ({} notes, {:.2}s)",
            solo.style,
            solo.chord.key(),
            solo.notes.len(),
            solo.total_secs()
        );

        if self.sink.is_none() {
            for e in &timeline {
                if let OutputEvent::NoteOn { note, velocity } = e.event {
                    debug!("  {:>6.3}s {} vel {}", e.at_secs, midi_note_name(note), velocity);
                }
            }
            return Outcome::Finished;
        }

        let start = Instant::now();
        let mut closed = false;
        for e in &timeline {
            let Some(deadline) = Duration::try_from_secs_f64(e.at_secs)
                .ok()
                .and_then(|offset| start.checked_add(offset))
            else {
                debug!("Event at {:e}s is past any reachable time; solo cut short", e.at_secs);
                self.release_sounding();
                break;
            };
            if closed {
                thread::sleep(deadline.saturating_duration_since(Instant::now()));
            } else {
                match self.rx.recv_deadline(deadline) {
                    Ok(next) => {
                        self.release_sounding();
                        return Outcome::Preempted(next);
                    }
                    Err(RecvTimeoutError::Timeout) => {}
                    Err(RecvTimeoutError::Disconnected) => {
                        // Nobody can interrupt any more; let this solo finish
                        closed = true;
                        thread::sleep(deadline.saturating_duration_since(Instant::now()));
                    }
                }
            }
            self.send(e.event);
        }

        if closed {
            Outcome::Disconnected
        } else {
            Outcome::Finished
        }
    }

    fn send(&mut self, event: OutputEvent) {
        let Some(sink) = self.sink.as_mut() else {
            return;
        };
        let result = match event {
            OutputEvent::NoteOn { note, velocity } => {
                self.sounding = Some(note);
                sink.note_on(note, velocity)
            }
            OutputEvent::NoteOff { note } => {
                if self.sounding == Some(note) {
                    self.sounding = None;
                }
                sink.note_off(note)
            }
        };
        if let Err(e) = result {
            debug!("Output unavailable: {}", e);
        }
    }

    fn release_sounding(&mut self) {
        if let Some(note) = self.sounding {
            self.send(OutputEvent::NoteOff { note });
        }
    }

    /// Release every pitch.
    pub fn stop_all(&mut self) {
        self.sounding = None;
        let Some(sink) = self.sink.as_mut() else {
            return;
        };
        for note in 0..=127u8 {
            if let Err(e) = sink.note_off(note) {
                debug!("Output unavailable during stop: {}", e);
                break;
            }
        }
        debug!("All notes off");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::selector::{SoloNote, SoloSource};
    use crate::sink::{ChannelSink, SinkError};
    use crate::types::ChordLabel;
    use crossbeam_channel::{unbounded, Sender};

    /// Reports every attempt, then fails it like a port that went away.
    struct FailingSink {
        attempts: Sender<OutputEvent>,
    }

    impl OutputSink for FailingSink {
        fn note_on(&mut self, note: u8, velocity: u8) -> Result<(), SinkError> {
            let _ = self.attempts.send(OutputEvent::NoteOn { note, velocity });
            Err(SinkError::Send("port closed".into()))
        }

        fn note_off(&mut self, note: u8) -> Result<(), SinkError> {
            let _ = self.attempts.send(OutputEvent::NoteOff { note });
            Err(SinkError::Send("port closed".into()))
        }
    }

    fn solo(notes: &[(u8, f64, f64)]) -> ResolvedSolo {
        ResolvedSolo {
            chord: ChordLabel {
                root: 0,
                quality: "major",
                members: [0, 4, 7].into_iter().collect(),
                confidence: 3,
                detected_at_us: 0,
            },
            style: "jazz".into(),
            source: SoloSource::Arpeggio,
            notes: notes
                .iter()
                .map(|&(note, start_secs, duration_secs)| SoloNote {
                    note,
                    velocity: 80,
                    start_secs,
                    duration_secs,
                })
                .collect(),
        }
    }

    fn spawn_player() -> (Sender<PlayerCommand>, Receiver<OutputEvent>, thread::JoinHandle<()>) {
        let (cmd_tx, cmd_rx) = unbounded();
        let (out_tx, out_rx) = unbounded();
        let handle = thread::spawn(move || {
            Player::new(cmd_rx, Some(Box::new(ChannelSink::new(out_tx)))).run();
        });
        (cmd_tx, out_rx, handle)
    }

    fn next(rx: &Receiver<OutputEvent>) -> OutputEvent {
        rx.recv_timeout(Duration::from_secs(2)).expect("player output")
    }

    #[test]
    fn test_timeline_is_sequential() {
        // second note overlaps the first on paper; it waits for the release
        let s = solo(&[(60, 0.0, 0.5), (64, 0.25, 0.25), (67, 1.0, 0.1)]);
        let t = s.timeline();
        let times: Vec<f64> = t.iter().map(|e| e.at_secs).collect();
        assert_eq!(times, vec![0.0, 0.5, 0.5, 0.75, 1.0, 1.1]);
        assert_eq!(
            t[0].event,
            OutputEvent::NoteOn {
                note: 60,
                velocity: 80
            }
        );
        assert_eq!(t[1].event, OutputEvent::NoteOff { note: 60 });
    }

    #[test]
    fn test_plays_each_note_on_then_off() {
        let (tx, out, handle) = spawn_player();
        tx.send(PlayerCommand::Play(solo(&[(60, 0.0, 0.01), (64, 0.01, 0.01)])))
            .unwrap();
        assert_eq!(next(&out), OutputEvent::NoteOn { note: 60, velocity: 80 });
        assert_eq!(next(&out), OutputEvent::NoteOff { note: 60 });
        assert_eq!(next(&out), OutputEvent::NoteOn { note: 64, velocity: 80 });
        assert_eq!(next(&out), OutputEvent::NoteOff { note: 64 });
        drop(tx);
        handle.join().unwrap();
    }

    #[test]
    fn test_new_solo_preempts_sounding_note() {
        let (tx, out, handle) = spawn_player();
        tx.send(PlayerCommand::Play(solo(&[(60, 0.0, 5.0), (62, 5.0, 5.0)])))
            .unwrap();
        assert_eq!(next(&out), OutputEvent::NoteOn { note: 60, velocity: 80 });

        tx.send(PlayerCommand::Play(solo(&[(72, 0.0, 0.01)]))).unwrap();
        assert_eq!(next(&out), OutputEvent::NoteOff { note: 60 });
        assert_eq!(next(&out), OutputEvent::NoteOn { note: 72, velocity: 80 });
        assert_eq!(next(&out), OutputEvent::NoteOff { note: 72 });
        drop(tx);
        handle.join().unwrap();
    }

    #[test]
    fn test_stop_all_releases_every_pitch() {
        let (tx, out, handle) = spawn_player();
        tx.send(PlayerCommand::Play(solo(&[(60, 0.0, 5.0)]))).unwrap();
        assert_eq!(next(&out), OutputEvent::NoteOn { note: 60, velocity: 80 });
        tx.send(PlayerCommand::StopAll).unwrap();

        // the sounding note first, then all 128
        assert_eq!(next(&out), OutputEvent::NoteOff { note: 60 });
        for n in 0..=127u8 {
            assert_eq!(next(&out), OutputEvent::NoteOff { note: n });
        }
        drop(tx);
        handle.join().unwrap();
    }

    #[test]
    fn test_queued_solos_collapse_to_newest() {
        let (cmd_tx, cmd_rx) = unbounded();
        let (out_tx, out_rx) = unbounded();
        // queue everything before the player starts
        cmd_tx.send(PlayerCommand::Play(solo(&[(60, 0.0, 0.01)]))).unwrap();
        cmd_tx.send(PlayerCommand::Play(solo(&[(62, 0.0, 0.01)]))).unwrap();
        cmd_tx.send(PlayerCommand::Play(solo(&[(64, 0.0, 0.01)]))).unwrap();
        drop(cmd_tx);
        Player::new(cmd_rx, Some(Box::new(ChannelSink::new(out_tx)))).run();

        let got: Vec<_> = out_rx.try_iter().collect();
        assert_eq!(got[0], OutputEvent::NoteOn { note: 64, velocity: 80 });
        assert_eq!(got[1], OutputEvent::NoteOff { note: 64 });
        // then the shutdown sweep
        assert_eq!(got.len(), 2 + 128);
    }

    #[test]
    fn test_without_sink_is_a_no_op() {
        let (tx, rx) = unbounded();
        tx.send(PlayerCommand::Play(solo(&[(60, 0.0, 10.0)]))).unwrap();
        drop(tx);
        let started = Instant::now();
        Player::new(rx, None).run();
        assert!(started.elapsed() < Duration::from_secs(1));
    }

    #[test]
    fn test_unreachable_note_time_cuts_the_solo_short() {
        let (tx, out, handle) = spawn_player();
        tx.send(PlayerCommand::Play(solo(&[(60, 0.0, 0.01), (62, 1e30, 0.01)])))
            .unwrap();
        assert_eq!(next(&out), OutputEvent::NoteOn { note: 60, velocity: 80 });
        assert_eq!(next(&out), OutputEvent::NoteOff { note: 60 });

        // a note that would never end is released instead
        tx.send(PlayerCommand::Play(solo(&[(64, 0.0, 1e30)]))).unwrap();
        assert_eq!(next(&out), OutputEvent::NoteOn { note: 64, velocity: 80 });
        assert_eq!(next(&out), OutputEvent::NoteOff { note: 64 });

        // and the player is still taking commands
        tx.send(PlayerCommand::Play(solo(&[(67, 0.0, 0.01)]))).unwrap();
        assert_eq!(next(&out), OutputEvent::NoteOn { note: 67, velocity: 80 });
        assert_eq!(next(&out), OutputEvent::NoteOff { note: 67 });
        drop(tx);
        handle.join().unwrap();
    }

    #[test]
    fn test_failing_sink_does_not_stop_the_player() {
        let (cmd_tx, cmd_rx) = unbounded();
        let (attempt_tx, attempts) = unbounded();
        let handle = thread::spawn(move || {
            Player::new(cmd_rx, Some(Box::new(FailingSink { attempts: attempt_tx }))).run();
        });

        cmd_tx.send(PlayerCommand::Play(solo(&[(60, 0.0, 0.01)]))).unwrap();
        assert_eq!(next(&attempts), OutputEvent::NoteOn { note: 60, velocity: 80 });
        assert_eq!(next(&attempts), OutputEvent::NoteOff { note: 60 });

        cmd_tx.send(PlayerCommand::Play(solo(&[(64, 0.0, 0.01)]))).unwrap();
        assert_eq!(next(&attempts), OutputEvent::NoteOn { note: 64, velocity: 80 });
        assert_eq!(next(&attempts), OutputEvent::NoteOff { note: 64 });

        drop(cmd_tx);
        handle.join().expect("player survives a failing sink");
        // the shutdown sweep gives up at the first failure
        let sweep: Vec<_> = attempts.try_iter().collect();
        assert_eq!(sweep, vec![OutputEvent::NoteOff { note: 0 }]);
    }
}
