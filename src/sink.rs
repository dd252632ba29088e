use crate::types::midi_note_name;
use crossbeam_channel::Sender;
use log::info;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SinkError {
    #[error("output sink disconnected")]
    Disconnected,
    #[error("no MIDI output port available")]
    NoPort,
    #[error("MIDI output init failed: {0}")]
    Init(String),
    #[error("MIDI send failed: {0}")]
    Send(String),
}

/// What the player hands to a sink.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputEvent {
    NoteOn { note: u8, velocity: u8 },
    NoteOff { note: u8 },
}

/// The "send onset" / "send release" primitives playback needs.
pub trait OutputSink: Send {
    fn note_on(&mut self, note: u8, velocity: u8) -> Result<(), SinkError>;
    fn note_off(&mut self, note: u8) -> Result<(), SinkError>;

    fn name(&self) -> String {
        "sink".into()
    }
}

/// Forwards events into a channel. Used by tests and anything in-process.
pub struct ChannelSink {
    tx: Sender<OutputEvent>,
}

impl ChannelSink {
    pub fn new(tx: Sender<OutputEvent>) -> Self {
        Self { tx }
    }
}

impl OutputSink for ChannelSink {
    fn note_on(&mut self, note: u8, velocity: u8) -> Result<(), SinkError> {
        self.tx
            .send(OutputEvent::NoteOn { note, velocity })
            .map_err(|_| SinkError::Disconnected)
    }

    fn note_off(&mut self, note: u8) -> Result<(), SinkError> {
        self.tx
            .send(OutputEvent::NoteOff { note })
            .map_err(|_| SinkError::Disconnected)
    }

    fn name(&self) -> String {
        "channel".into()
    }
}

/// Prints onsets to the log. Releases are too chatty to show.
#[derive(Default)]
pub struct LogSink;

impl OutputSink for LogSink {
    fn note_on(&mut self, note: u8, velocity: u8) -> Result<(), SinkError> {
        info!("  ♪ {:<4} vel {}", midi_note_name(note), velocity);
        Ok(())
    }

    fn note_off(&mut self, _note: u8) -> Result<(), SinkError> {
        Ok(())
    }

    fn name(&self) -> String {
        "log".into()
    }
}

// ─── Hardware output ────────────────────────────────────────────────────────

#[cfg(feature = "hardware")]
pub use hardware::{output_port_names, MidirSink};

#[cfg(feature = "hardware")]
mod hardware {
    use super::{OutputSink, SinkError};
    use log::info;
    use midir::{MidiOutput, MidiOutputConnection};

    /// Ports picked automatically when no name is given.
    const PREFERRED_PORTS: &[&str] = &["loopMIDI", "FL Studio"];

    pub fn output_port_names() -> Result<Vec<String>, SinkError> {
        let out = MidiOutput::new("chord-improv scanner").map_err(|e| SinkError::Init(e.to_string()))?;
        Ok(out
            .ports()
            .iter()
            .filter_map(|p| out.port_name(p).ok())
            .collect())
    }

    pub struct MidirSink {
        conn: MidiOutputConnection,
        port_name: String,
        channel: u8,
    }

    impl MidirSink {
        /// Connect to the first port whose name contains `name`. Without a
        /// name, a virtual loopback or DAW port is preferred, then the first port.
        pub fn connect(name: Option<&str>, channel: u8) -> Result<Self, SinkError> {
            let out = MidiOutput::new("chord-improv").map_err(|e| SinkError::Init(e.to_string()))?;
            let ports = out.ports();
            let names: Vec<String> = ports
                .iter()
                .map(|p| out.port_name(p).unwrap_or_default())
                .collect();

            let position = |needle: &str| names.iter().position(|n| n.contains(needle));
            let index = match name {
                Some(needle) => position(needle),
                None => PREFERRED_PORTS
                    .iter()
                    .find_map(|p| position(*p))
                    .or(if names.is_empty() { None } else { Some(0) }),
            }
            .ok_or(SinkError::NoPort)?;

            let port_name = names[index].clone();
            let conn = out
                .connect(&ports[index], "chord-improv-out")
                .map_err(|e| SinkError::Init(e.to_string()))?;
            info!("MIDI output → {} (channel {})", port_name, channel + 1);

            Ok(Self {
                conn,
                port_name,
                channel: channel & 0x0F,
            })
        }

        fn send(&mut self, bytes: &[u8]) -> Result<(), SinkError> {
            self.conn.send(bytes).map_err(|e| SinkError::Send(e.to_string()))
        }
    }

    impl OutputSink for MidirSink {
        fn note_on(&mut self, note: u8, velocity: u8) -> Result<(), SinkError> {
            self.send(&[0x90 | self.channel, note & 0x7F, velocity & 0x7F])
        }

        fn note_off(&mut self, note: u8) -> Result<(), SinkError> {
            self.send(&[0x80 | self.channel, note & 0x7F, 0])
        }

        fn name(&self) -> String {
            self.port_name.clone()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossbeam_channel::unbounded;

    #[test]
    fn test_channel_sink_forwards_in_order() {
        let (tx, rx) = unbounded();
        let mut sink = ChannelSink::new(tx);
        sink.note_on(60, 90).unwrap();
        sink.note_off(60).unwrap();
        let got: Vec<_> = rx.try_iter().collect();
        assert_eq!(
            got,
            vec![
                OutputEvent::NoteOn {
                    note: 60,
                    velocity: 90
                },
                OutputEvent::NoteOff { note: 60 },
            ]
        );
    }

    #[test]
    fn test_channel_sink_reports_disconnect() {
        let (tx, rx) = unbounded();
        let mut sink = ChannelSink::new(tx);
        drop(rx);
        assert!(matches!(sink.note_on(60, 90), Err(SinkError::Disconnected)));
    }
}
