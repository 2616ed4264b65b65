//! Per-note-expression MIDI sink.
//!
//! Every voice gets a channel of its own from a [`ChannelPool`], so pressure,
//! slide and pitch bend can be sent per note as channel messages. Fractional
//! pitches are played as the nearest key plus a pitch-bend offset.
//!
//! | expression | message                    |
//! |------------|----------------------------|
//! | pressure   | channel pressure (`0xD0`)  |
//! | slide      | CC 74                      |
//! | bend       | 14-bit pitch bend          |

use contourconf::MidiConfig;
use tracing::{debug, info, warn};

use crate::instrument::InstrumentMap;
use crate::midi_io::{cc, MidiError, MidiMessage, MidiPort, MidirPort};
use crate::sink::{NoteOn, OutputSink, SinkError, VoiceId};
use crate::voice_pool::ChannelPool;

/// Default pitch bend range in semitones, each direction.
pub const DEFAULT_BEND_RANGE: f64 = 48.0;

#[derive(Debug, Clone, Copy, PartialEq)]
struct MpeVoice {
    key: u8,
    /// Semitones between the requested pitch and `key`.
    base_bend: f64,
}

/// Wraps a port and reports send failures once per outage.
struct Output<P> {
    port: P,
    failing: bool,
}

impl<P: MidiPort> Output<P> {
    fn send(&mut self, msg: MidiMessage) {
        match self.port.send(&msg) {
            Ok(()) => {
                if self.failing {
                    info!("MIDI output {} recovered", self.port.name());
                    self.failing = false;
                }
            }
            Err(e) => {
                if !self.failing {
                    warn!("MIDI output {}: {}", self.port.name(), e);
                    self.failing = true;
                }
            }
        }
    }
}

pub struct MpeSink<P> {
    name: String,
    out: Output<P>,
    pool: ChannelPool<MpeVoice>,
    instruments: InstrumentMap,
    bend_range: f64,
    programs: [Option<u8>; 16],
}

impl MpeSink<MidirPort> {
    /// Open the configured output port. `Ok(None)` when no port is configured.
    pub fn open(config: &MidiConfig) -> Result<Option<Self>, MidiError> {
        let Some(pattern) = config.output_port.as_deref() else {
            return Ok(None);
        };
        let port = MidirPort::open(pattern)?;
        Ok(Some(Self::new(port, config)))
    }
}

impl<P: MidiPort> MpeSink<P> {
    pub fn new(port: P, config: &MidiConfig) -> Self {
        let bend_range = if config.bend_range > 0.0 && config.bend_range.is_finite() {
            config.bend_range
        } else {
            DEFAULT_BEND_RANGE
        };

        Self {
            name: format!("mpe:{}", port.name()),
            out: Output {
                port,
                failing: false,
            },
            pool: ChannelPool::new(config.channel_range()),
            instruments: InstrumentMap::from_config(config),
            bend_range,
            programs: [None; 16],
        }
    }

    pub fn bend_range(&self) -> f64 {
        self.bend_range
    }

    pub fn active_voices(&self) -> usize {
        self.pool.active_count()
    }

    fn bend_message(&self, channel: u8, semitones: f64) -> MidiMessage {
        MidiMessage::PitchBend {
            channel,
            value: bend_to_14bit(semitones, self.bend_range),
        }
    }
}

impl<P: MidiPort> OutputSink for MpeSink<P> {
    fn name(&self) -> &str {
        &self.name
    }

    /// Set the pitch bend range (RPN 0) on every pool channel.
    fn init(&mut self) -> Result<(), SinkError> {
        let range = self.bend_range.round().clamp(0.0, 127.0) as u8;
        for &channel in self.pool.channels() {
            let rpn = [
                (cc::RPN_MSB, 0),
                (cc::RPN_LSB, 0),
                (cc::DATA_ENTRY_MSB, range),
                (cc::DATA_ENTRY_LSB, 0),
                (cc::RPN_MSB, 127),
                (cc::RPN_LSB, 127),
            ];
            for (controller, value) in rpn {
                let msg = MidiMessage::ControlChange {
                    channel,
                    controller,
                    value,
                };
                self.out.port.send(&msg).map_err(|e| SinkError::Init {
                    sink: self.name.clone(),
                    message: e.to_string(),
                })?;
            }
        }
        debug!(
            "{}: bend range ±{} on {} channels",
            self.name,
            range,
            self.pool.capacity()
        );
        Ok(())
    }

    fn is_ready(&self) -> bool {
        self.out.port.is_open() && self.pool.capacity() > 0
    }

    fn note_on(&mut self, note: &NoteOn<'_>) -> Option<VoiceId> {
        if !note.pitch.is_finite() {
            return None;
        }
        let rounded = note.pitch.round().clamp(0.0, 127.0);
        let voice = MpeVoice {
            key: rounded as u8,
            base_bend: note.pitch - rounded,
        };
        let program = self.instruments.resolve(note.instrument);

        let allocation = self.pool.allocate(voice)?;
        if let Some(evicted) = allocation.evicted {
            debug!(
                "{}: stealing channel {} from voice {}",
                self.name, evicted.channel, evicted.id
            );
            self.out.send(MidiMessage::NoteOff {
                channel: evicted.channel,
                pitch: evicted.data.key,
            });
        }

        let channel = allocation.channel;
        let slot = &mut self.programs[channel as usize & 0x0F];
        if *slot != Some(program) {
            *slot = Some(program);
            self.out
                .send(MidiMessage::ProgramChange { channel, program });
        }

        // Reset whatever the previous voice left on the channel
        let bend = self.bend_message(channel, voice.base_bend);
        self.out.send(bend);
        self.out.send(MidiMessage::ChannelPressure {
            channel,
            pressure: 0,
        });
        self.out.send(MidiMessage::ControlChange {
            channel,
            controller: cc::SLIDE,
            value: 0,
        });
        self.out.send(MidiMessage::NoteOn {
            channel,
            pitch: voice.key,
            velocity: velocity_to_midi(note.velocity),
        });

        Some(allocation.id)
    }

    fn set_pressure(&mut self, voice: VoiceId, pressure: f64) {
        if let Some(v) = self.pool.get(voice) {
            let msg = MidiMessage::ChannelPressure {
                channel: v.channel,
                pressure: unit_to_7bit(pressure),
            };
            self.out.send(msg);
        }
    }

    fn set_slide(&mut self, voice: VoiceId, slide: f64) {
        if let Some(v) = self.pool.get(voice) {
            let msg = MidiMessage::ControlChange {
                channel: v.channel,
                controller: cc::SLIDE,
                value: unit_to_7bit(slide),
            };
            self.out.send(msg);
        }
    }

    fn set_bend(&mut self, voice: VoiceId, semitones: f64) {
        if let Some(v) = self.pool.get(voice) {
            let msg = self.bend_message(v.channel, v.data.base_bend + semitones);
            self.out.send(msg);
        }
    }

    fn release(&mut self, voice: VoiceId) {
        if let Some(v) = self.pool.release(voice) {
            self.out.send(MidiMessage::NoteOff {
                channel: v.channel,
                pitch: v.data.key,
            });
        }
    }

    fn all_notes_off(&mut self) {
        let Self { out, pool, .. } = self;
        for v in pool.drain() {
            out.send(MidiMessage::NoteOff {
                channel: v.channel,
                pitch: v.data.key,
            });
        }
        for &channel in pool.channels() {
            out.send(MidiMessage::ControlChange {
                channel,
                controller: cc::ALL_NOTES_OFF,
                value: 0,
            });
        }
    }
}

/// `0.0..=1.0` to `1..=127`. A sounding note never gets velocity 0, which
/// receivers read as note-off.
pub fn velocity_to_midi(velocity: f64) -> u8 {
    unit_to_7bit(velocity).max(1)
}

/// `0.0..=1.0` to `0..=127`.
pub fn unit_to_7bit(value: f64) -> u8 {
    if value.is_nan() {
        return 0;
    }
    (value.clamp(0.0, 1.0) * 127.0).round() as u8
}

/// Semitones to a signed 14-bit bend for a ±`range` semitone setting.
pub fn bend_to_14bit(semitones: f64, range: f64) -> i16 {
    if !semitones.is_finite() || range <= 0.0 {
        return 0;
    }
    (semitones / range * 8192.0).round().clamp(-8192.0, 8191.0) as i16
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::midi_io::MemoryPort;

    fn sink_with(channels: u8) -> (MpeSink<MemoryPort>, MemoryPort) {
        let port = MemoryPort::new();
        let config = MidiConfig {
            channels,
            ..MidiConfig::default()
        };
        (MpeSink::new(port.clone(), &config), port)
    }

    fn note(pitch: f64, velocity: f64) -> NoteOn<'static> {
        NoteOn {
            stream: "lead",
            pitch,
            velocity,
            instrument: None,
            time: 0.0,
        }
    }

    fn note_ons(messages: &[MidiMessage]) -> Vec<(u8, u8, u8)> {
        messages
            .iter()
            .filter_map(|m| match *m {
                MidiMessage::NoteOn {
                    channel,
                    pitch,
                    velocity,
                } => Some((channel, pitch, velocity)),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn conversions() {
        assert_eq!(velocity_to_midi(0.0), 1);
        assert_eq!(velocity_to_midi(1.0), 127);
        assert_eq!(velocity_to_midi(0.5), 64);
        assert_eq!(unit_to_7bit(2.0), 127);
        assert_eq!(unit_to_7bit(f64::NAN), 0);
        assert_eq!(bend_to_14bit(0.0, 48.0), 0);
        assert_eq!(bend_to_14bit(48.0, 48.0), 8191);
        assert_eq!(bend_to_14bit(-48.0, 48.0), -8192);
        assert_eq!(bend_to_14bit(-100.0, 48.0), -8192);
        assert_eq!(bend_to_14bit(12.0, 48.0), 2048);
    }

    #[test]
    fn init_sets_bend_range_on_each_channel() {
        let (mut sink, port) = sink_with(2);
        sink.init().unwrap();
        let sent = port.take();
        assert_eq!(sent.len(), 12);
        assert!(sent.contains(&MidiMessage::ControlChange {
            channel: 1,
            controller: cc::DATA_ENTRY_MSB,
            value: 48,
        }));
    }

    #[test]
    fn each_voice_gets_its_own_channel() {
        let (mut sink, port) = sink_with(16);
        let a = sink.note_on(&note(60.0, 1.0)).unwrap();
        let b = sink.note_on(&note(64.0, 0.5)).unwrap();
        assert_ne!(a, b);

        let sent = port.take();
        assert_eq!(note_ons(&sent), vec![(0, 60, 127), (1, 64, 64)]);
        // Program is only sent once per channel
        assert_eq!(
            sent.iter()
                .filter(|m| matches!(m, MidiMessage::ProgramChange { .. }))
                .count(),
            2
        );
    }

    #[test]
    fn fractional_pitch_becomes_base_bend() {
        let (mut sink, port) = sink_with(16);
        let voice = sink.note_on(&note(60.5, 0.7)).unwrap();
        let sent = port.take();
        // 60.5 rounds up to key 61, bent down half a semitone
        assert!(sent.contains(&MidiMessage::PitchBend {
            channel: 0,
            value: bend_to_14bit(-0.5, 48.0),
        }));
        assert_eq!(note_ons(&sent), vec![(0, 61, 89)]);

        sink.set_bend(voice, 1.0);
        assert_eq!(
            port.take(),
            vec![MidiMessage::PitchBend {
                channel: 0,
                value: bend_to_14bit(0.5, 48.0),
            }]
        );
    }

    #[test]
    fn expression_goes_to_the_voice_channel() {
        let (mut sink, port) = sink_with(16);
        sink.note_on(&note(60.0, 0.7)).unwrap();
        let voice = sink.note_on(&note(62.0, 0.7)).unwrap();
        port.take();

        sink.set_pressure(voice, 0.5);
        sink.set_slide(voice, 1.0);
        assert_eq!(
            port.take(),
            vec![
                MidiMessage::ChannelPressure {
                    channel: 1,
                    pressure: 64
                },
                MidiMessage::ControlChange {
                    channel: 1,
                    controller: cc::SLIDE,
                    value: 127
                },
            ]
        );
    }

    #[test]
    fn reused_channel_starts_with_neutral_expression() {
        let (mut sink, port) = sink_with(1);
        let first = sink.note_on(&note(60.0, 0.7)).unwrap();
        sink.set_pressure(first, 1.0);
        sink.set_slide(first, 1.0);
        sink.set_bend(first, 2.0);
        sink.release(first);
        port.take();

        sink.note_on(&note(62.0, 0.7)).unwrap();
        assert_eq!(
            port.take(),
            vec![
                MidiMessage::PitchBend {
                    channel: 0,
                    value: 0
                },
                MidiMessage::ChannelPressure {
                    channel: 0,
                    pressure: 0
                },
                MidiMessage::ControlChange {
                    channel: 0,
                    controller: cc::SLIDE,
                    value: 0
                },
                MidiMessage::NoteOn {
                    channel: 0,
                    pitch: 62,
                    velocity: 89
                },
            ]
        );
    }

    #[test]
    fn full_pool_steals_oldest_voice_with_note_off() {
        let (mut sink, port) = sink_with(16);
        let first = sink.note_on(&note(40.0, 0.7)).unwrap();
        for pitch in 41..56 {
            sink.note_on(&note(pitch as f64, 0.7)).unwrap();
        }
        port.take();

        let extra = sink.note_on(&note(80.0, 0.7)).unwrap();
        let sent = port.take();
        assert_eq!(
            sent.first(),
            Some(&MidiMessage::NoteOff {
                channel: 0,
                pitch: 40
            })
        );
        assert_eq!(note_ons(&sent), vec![(0, 80, 89)]);
        assert_eq!(sink.active_voices(), 16);

        // The evicted voice's handle no longer reaches channel 0
        sink.release(first);
        sink.set_pressure(first, 1.0);
        assert!(port.take().is_empty());

        sink.release(extra);
        assert_eq!(
            port.take(),
            vec![MidiMessage::NoteOff {
                channel: 0,
                pitch: 80
            }]
        );
    }

    #[test]
    fn instruments_map_to_program_changes() {
        let (mut sink, port) = sink_with(16);
        sink.note_on(&NoteOn {
            instrument: Some("bass"),
            ..note(36.0, 0.7)
        })
        .unwrap();
        assert!(port.take().contains(&MidiMessage::ProgramChange {
            channel: 0,
            program: 33
        }));
    }

    #[test]
    fn all_notes_off_releases_everything() {
        let (mut sink, port) = sink_with(2);
        sink.note_on(&note(60.0, 0.7)).unwrap();
        port.take();

        sink.all_notes_off();
        let sent = port.take();
        assert_eq!(
            sent[0],
            MidiMessage::NoteOff {
                channel: 0,
                pitch: 60
            }
        );
        assert_eq!(sent.len(), 3);
        assert_eq!(sink.active_voices(), 0);
    }

    #[test]
    fn non_finite_pitch_is_declined() {
        let (mut sink, port) = sink_with(16);
        assert!(sink.note_on(&note(f64::NAN, 0.7)).is_none());
        assert!(port.take().is_empty());
    }
}
