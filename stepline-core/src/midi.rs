//! Outbound MIDI messages and the transport they are written to.

use std::sync::{Arc, Mutex};

use midir::{MidiOutput, MidiOutputConnection};

use crate::error::PlaybackError;

/// A channel message in wire form. Channels are zero-based; every data byte
/// is masked into the 0-127 range when encoded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MidiMessage {
    NoteOn { channel: u8, note: u8, velocity: u8 },
    NoteOff { channel: u8, note: u8 },
    ControlChange { channel: u8, controller: u8, value: u8 },
    ProgramChange { channel: u8, program: u8 },
}

impl MidiMessage {
    pub fn is_note_on(&self) -> bool {
        matches!(self, MidiMessage::NoteOn { .. })
    }

    pub fn is_note_off(&self) -> bool {
        matches!(self, MidiMessage::NoteOff { .. })
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        match *self {
            MidiMessage::NoteOn { channel, note, velocity } => {
                vec![0x90 | (channel & 0x0F), note & 0x7F, velocity & 0x7F]
            }
            MidiMessage::NoteOff { channel, note } => {
                vec![0x80 | (channel & 0x0F), note & 0x7F, 0]
            }
            MidiMessage::ControlChange { channel, controller, value } => {
                vec![0xB0 | (channel & 0x0F), controller & 0x7F, value & 0x7F]
            }
            MidiMessage::ProgramChange { channel, program } => {
                vec![0xC0 | (channel & 0x0F), program & 0x7F]
            }
        }
    }

    /// Decode a raw channel message. Note-on with velocity 0 reads as note-off.
    pub fn parse(data: &[u8]) -> Option<Self> {
        let (&status, rest) = data.split_first()?;
        let channel = status & 0x0F;
        match (status & 0xF0, rest) {
            (0x80, [note, _, ..]) => Some(MidiMessage::NoteOff { channel, note: *note }),
            (0x90, [note, 0, ..]) => Some(MidiMessage::NoteOff { channel, note: *note }),
            (0x90, [note, velocity, ..]) => Some(MidiMessage::NoteOn {
                channel,
                note: *note,
                velocity: *velocity,
            }),
            (0xB0, [controller, value, ..]) => Some(MidiMessage::ControlChange {
                channel,
                controller: *controller,
                value: *value,
            }),
            (0xC0, [program, ..]) => Some(MidiMessage::ProgramChange {
                channel,
                program: *program,
            }),
            _ => None,
        }
    }
}

/// Sink for outbound messages. Implementations may block; callers serialise
/// access through [`SharedTransport`].
pub trait MidiTransport: Send {
    fn send(&mut self, message: &MidiMessage) -> Result<(), PlaybackError>;

    fn name(&self) -> &str {
        "transport"
    }
}

pub type SharedTransport = Arc<Mutex<Box<dyn MidiTransport>>>;

pub fn shared(transport: Box<dyn MidiTransport>) -> SharedTransport {
    Arc::new(Mutex::new(transport))
}

/// Send through the transport mutex. A poisoned lock is recovered: the
/// transport holds no invariants a panicking sender could break.
pub fn send_locked(transport: &SharedTransport, message: &MidiMessage) -> Result<(), PlaybackError> {
    let mut guard = transport.lock().unwrap_or_else(|e| e.into_inner());
    guard.send(message)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MidiPortInfo {
    pub index: usize,
    pub name: String,
}

/// Output port opened through midir.
pub struct MidirTransport {
    connection: MidiOutputConnection,
    port_name: String,
}

impl MidirTransport {
    pub fn list_ports(client_name: &str) -> Result<Vec<MidiPortInfo>, PlaybackError> {
        let output = MidiOutput::new(client_name).map_err(|e| PlaybackError::Init(e.to_string()))?;
        Ok(output
            .ports()
            .iter()
            .enumerate()
            .filter_map(|(index, port)| {
                output
                    .port_name(port)
                    .ok()
                    .map(|name| MidiPortInfo { index, name })
            })
            .collect())
    }

    /// Open the first port whose name contains `port`, or the first port
    /// when no filter is given.
    pub fn connect(client_name: &str, port: Option<&str>) -> Result<Self, PlaybackError> {
        let output = MidiOutput::new(client_name).map_err(|e| PlaybackError::Init(e.to_string()))?;
        let ports = output.ports();
        if ports.is_empty() {
            return Err(PlaybackError::NoOutputPorts);
        }

        let selected = match port {
            Some(filter) => ports
                .iter()
                .find(|p| output.port_name(p).is_ok_and(|name| name.contains(filter)))
                .ok_or_else(|| PlaybackError::PortNotFound(filter.to_string()))?,
            None => &ports[0],
        };
        let port_name = output
            .port_name(selected)
            .unwrap_or_else(|_| "Unknown".to_string());

        let connection = output
            .connect(selected, &format!("{}-out", client_name))
            .map_err(|e| PlaybackError::Connect(e.to_string()))?;

        log::info!(target: "midi", "connected to output port {}", port_name);
        Ok(Self {
            connection,
            port_name,
        })
    }
}

impl MidiTransport for MidirTransport {
    fn send(&mut self, message: &MidiMessage) -> Result<(), PlaybackError> {
        self.connection
            .send(&message.to_bytes())
            .map_err(|e| PlaybackError::Send(e.to_string()))
    }

    fn name(&self) -> &str {
        &self.port_name
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encodes_channel_messages() {
        let on = MidiMessage::NoteOn { channel: 2, note: 60, velocity: 100 };
        assert_eq!(on.to_bytes(), vec![0x92, 60, 100]);
        let off = MidiMessage::NoteOff { channel: 0, note: 60 };
        assert_eq!(off.to_bytes(), vec![0x80, 60, 0]);
        let cc = MidiMessage::ControlChange { channel: 15, controller: 7, value: 64 };
        assert_eq!(cc.to_bytes(), vec![0xBF, 7, 64]);
        let pc = MidiMessage::ProgramChange { channel: 1, program: 5 };
        assert_eq!(pc.to_bytes(), vec![0xC1, 5]);
    }

    #[test]
    fn data_bytes_are_masked() {
        let on = MidiMessage::NoteOn { channel: 0, note: 200, velocity: 255 };
        let bytes = on.to_bytes();
        assert!(bytes[1] <= 127 && bytes[2] <= 127);
    }

    #[test]
    fn parses_what_it_encodes() {
        let messages = [
            MidiMessage::NoteOn { channel: 3, note: 36, velocity: 90 },
            MidiMessage::NoteOff { channel: 3, note: 36 },
            MidiMessage::ControlChange { channel: 9, controller: 1, value: 12 },
            MidiMessage::ProgramChange { channel: 0, program: 4 },
        ];
        for message in messages {
            assert_eq!(MidiMessage::parse(&message.to_bytes()), Some(message));
        }
    }

    #[test]
    fn zero_velocity_note_on_is_note_off() {
        assert_eq!(
            MidiMessage::parse(&[0x90, 60, 0]),
            Some(MidiMessage::NoteOff { channel: 0, note: 60 })
        );
    }

    #[test]
    fn short_or_unknown_messages_do_not_parse() {
        assert!(MidiMessage::parse(&[]).is_none());
        assert!(MidiMessage::parse(&[0x90, 60]).is_none());
        assert!(MidiMessage::parse(&[0xF8]).is_none());
    }
}
