use crate::types::*;
use crossbeam_channel::Sender;
use log::{debug, info};
use midir::{Ignore, MidiInput, MidiInputConnection};
use std::error::Error;

pub fn input_port_names() -> Result<Vec<String>, Box<dyn Error>> {
    let midi_in = MidiInput::new("chord-improv scanner")?;
    Ok(midi_in
        .ports()
        .iter()
        .filter_map(|p| midi_in.port_name(p).ok())
        .collect())
}

/// Keeps a midir input connection open and feeds parsed events into the
/// engine. The connection closes when this is dropped.
pub struct MidiInputBridge {
    _conn: MidiInputConnection<()>,
    port_name: String,
}

impl MidiInputBridge {
    /// Connect to the first port whose name contains `name`, or the first
    /// port at all if none does. Events are stamped with `clock` so they line
    /// up with the coordinator's ticker.
    pub fn connect(
        name: Option<&str>,
        clock: SessionClock,
        tx: Sender<InputEvent>,
    ) -> Result<Self, Box<dyn Error>> {
        let mut midi_in = MidiInput::new("chord-improv")?;
        // Transport stop (0xFC) is a timing message; keep it
        midi_in.ignore(Ignore::Sysex | Ignore::ActiveSense);

        let ports = midi_in.ports();
        if ports.is_empty() {
            return Err("no MIDI input ports".into());
        }
        let index = name
            .and_then(|needle| {
                ports.iter().position(|p| {
                    midi_in
                        .port_name(p)
                        .map_or(false, |n| n.contains(needle))
                })
            })
            .unwrap_or(0);
        let port = ports[index].clone();
        let port_name = midi_in.port_name(&port)?;

        let conn = midi_in.connect(
            &port,
            "chord-improv-in",
            move |_, message, _| match parse_midi_message(message, clock.now_us()) {
                Some(event) => {
                    let _ = tx.send(event);
                }
                None => debug!("MIDI in: ignored {:02X?}", message),
            },
            (),
        )?;
        info!("MIDI input ← {}", port_name);

        Ok(Self {
            _conn: conn,
            port_name,
        })
    }

    pub fn port_name(&self) -> &str {
        &self.port_name
    }
}
