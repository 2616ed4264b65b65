//! MIDI output via midir
//!
//! Message encoding plus a thin port abstraction, so the MPE sink can be
//! driven by a real device or by an in-memory port in tests.

use std::sync::{Arc, Mutex, PoisonError};

use midir::{MidiOutput, MidiOutputConnection};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

/// Channel voice messages the engine emits.
///
/// Channels are 0-based (`0..16`). Pitch bend is signed around center.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MidiMessage {
    NoteOn { channel: u8, pitch: u8, velocity: u8 },
    NoteOff { channel: u8, pitch: u8 },
    ControlChange { channel: u8, controller: u8, value: u8 },
    ProgramChange { channel: u8, program: u8 },
    ChannelPressure { channel: u8, pressure: u8 },
    /// `-8192..=8191`
    PitchBend { channel: u8, value: i16 },
}

/// Controller numbers used by the engine.
pub mod cc {
    /// MPE "slide" (timbre) dimension.
    pub const SLIDE: u8 = 74;
    pub const DATA_ENTRY_MSB: u8 = 6;
    pub const DATA_ENTRY_LSB: u8 = 38;
    pub const RPN_LSB: u8 = 100;
    pub const RPN_MSB: u8 = 101;
    pub const ALL_NOTES_OFF: u8 = 123;
}

/// Information about a discovered MIDI port
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MidiPortInfo {
    pub index: usize,
    pub name: String,
}

/// Error type for MIDI operations
#[derive(Debug, thiserror::Error)]
pub enum MidiError {
    #[error("Failed to initialize MIDI: {0}")]
    InitFailed(String),

    #[error("Port not found: {0}")]
    PortNotFound(String),

    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Send failed: {0}")]
    SendFailed(String),
}

/// Encoded bytes of one message. At most three, so no allocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MidiBytes {
    data: [u8; 3],
    len: usize,
}

impl MidiBytes {
    fn two(a: u8, b: u8) -> Self {
        Self {
            data: [a, b, 0],
            len: 2,
        }
    }

    fn three(a: u8, b: u8, c: u8) -> Self {
        Self {
            data: [a, b, c],
            len: 3,
        }
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.data[..self.len]
    }
}

/// Encode a MidiMessage to raw MIDI bytes
pub fn encode_midi_message(msg: &MidiMessage) -> MidiBytes {
    match *msg {
        MidiMessage::NoteOn {
            channel,
            pitch,
            velocity,
        } => MidiBytes::three(0x90 | (channel & 0x0F), pitch & 0x7F, velocity & 0x7F),
        MidiMessage::NoteOff { channel, pitch } => {
            MidiBytes::three(0x80 | (channel & 0x0F), pitch & 0x7F, 0)
        }
        MidiMessage::ControlChange {
            channel,
            controller,
            value,
        } => MidiBytes::three(0xB0 | (channel & 0x0F), controller & 0x7F, value & 0x7F),
        MidiMessage::ProgramChange { channel, program } => {
            MidiBytes::two(0xC0 | (channel & 0x0F), program & 0x7F)
        }
        MidiMessage::ChannelPressure { channel, pressure } => {
            MidiBytes::two(0xD0 | (channel & 0x0F), pressure & 0x7F)
        }
        MidiMessage::PitchBend { channel, value } => {
            let centered = (value.clamp(-8192, 8191) + 8192) as u16;
            let lsb = (centered & 0x7F) as u8;
            let msb = ((centered >> 7) & 0x7F) as u8;
            MidiBytes::three(0xE0 | (channel & 0x0F), lsb, msb)
        }
    }
}

/// Parse raw MIDI bytes into a MidiMessage
pub fn parse_midi_bytes(data: &[u8]) -> Option<MidiMessage> {
    let (&status, rest) = data.split_first()?;
    let channel = status & 0x0F;

    match (status & 0xF0, rest) {
        (0x90, [pitch, 0, ..]) => Some(MidiMessage::NoteOff {
            channel,
            pitch: *pitch,
        }),
        (0x90, [pitch, velocity, ..]) => Some(MidiMessage::NoteOn {
            channel,
            pitch: *pitch,
            velocity: *velocity,
        }),
        (0x80, [pitch, _, ..]) => Some(MidiMessage::NoteOff {
            channel,
            pitch: *pitch,
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
        (0xD0, [pressure, ..]) => Some(MidiMessage::ChannelPressure {
            channel,
            pressure: *pressure,
        }),
        (0xE0, [lsb, msb, ..]) => {
            let value = (((*msb as i16) << 7) | *lsb as i16) - 8192;
            Some(MidiMessage::PitchBend { channel, value })
        }
        _ => {
            debug!("Unhandled MIDI message type: {:02X}", status);
            None
        }
    }
}

/// Somewhere to write MIDI bytes.
pub trait MidiPort: Send {
    fn name(&self) -> &str;

    fn is_open(&self) -> bool;

    fn send_raw(&mut self, data: &[u8]) -> Result<(), MidiError>;

    fn send(&mut self, msg: &MidiMessage) -> Result<(), MidiError> {
        self.send_raw(encode_midi_message(msg).as_slice())
    }
}

/// List available MIDI output ports
pub fn list_output_ports() -> Result<Vec<MidiPortInfo>, MidiError> {
    let midi_out =
        MidiOutput::new("contour-scan").map_err(|e| MidiError::InitFailed(e.to_string()))?;

    let ports: Vec<MidiPortInfo> = midi_out
        .ports()
        .iter()
        .enumerate()
        .filter_map(|(i, port)| {
            midi_out
                .port_name(port)
                .ok()
                .map(|name| MidiPortInfo { index: i, name })
        })
        .collect();

    Ok(ports)
}

/// A hardware or virtual output port opened through midir.
pub struct MidirPort {
    connection: Option<MidiOutputConnection>,
    port_name: String,
}

impl MidirPort {
    /// Open the first output port whose name contains `port_pattern`
    pub fn open(port_pattern: &str) -> Result<Self, MidiError> {
        let midi_out =
            MidiOutput::new("contour-out").map_err(|e| MidiError::InitFailed(e.to_string()))?;

        let ports = midi_out.ports();
        let port = ports
            .iter()
            .find(|p| {
                midi_out
                    .port_name(p)
                    .map(|n| n.contains(port_pattern))
                    .unwrap_or(false)
            })
            .ok_or_else(|| MidiError::PortNotFound(port_pattern.to_string()))?;

        let port_name = midi_out
            .port_name(port)
            .map_err(|e| MidiError::ConnectionFailed(e.to_string()))?;

        let connection = midi_out
            .connect(port, "contour-output")
            .map_err(|e| MidiError::ConnectionFailed(e.to_string()))?;

        info!("Opened MIDI output: {}", port_name);

        Ok(Self {
            connection: Some(connection),
            port_name,
        })
    }

    pub fn close(&mut self) {
        if let Some(conn) = self.connection.take() {
            conn.close();
            info!("Closed MIDI output: {}", self.port_name);
        }
    }
}

impl MidiPort for MidirPort {
    fn name(&self) -> &str {
        &self.port_name
    }

    fn is_open(&self) -> bool {
        self.connection.is_some()
    }

    fn send_raw(&mut self, data: &[u8]) -> Result<(), MidiError> {
        match self.connection.as_mut() {
            Some(conn) => conn
                .send(data)
                .map_err(|e| MidiError::SendFailed(e.to_string())),
            None => Err(MidiError::SendFailed("Connection closed".to_string())),
        }
    }
}

impl Drop for MidirPort {
    fn drop(&mut self) {
        self.close();
    }
}

/// Collects sent messages in memory. Clones share the same buffer.
#[derive(Debug, Clone, Default)]
pub struct MemoryPort {
    sent: Arc<Mutex<Vec<MidiMessage>>>,
}

impl MemoryPort {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take everything sent so far.
    pub fn take(&self) -> Vec<MidiMessage> {
        std::mem::take(&mut *self.sent.lock().unwrap_or_else(PoisonError::into_inner))
    }
}

impl MidiPort for MemoryPort {
    fn name(&self) -> &str {
        "memory"
    }

    fn is_open(&self) -> bool {
        true
    }

    fn send_raw(&mut self, data: &[u8]) -> Result<(), MidiError> {
        let msg = parse_midi_bytes(data)
            .ok_or_else(|| MidiError::SendFailed(format!("unparseable bytes {data:02X?}")))?;
        self.sent
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(msg);
        Ok(())
    }
}
