//! Raw input events and classification
//!
//! The transport (midir callback, network listener, test harness) hands the
//! bus [`RawEvent`]s. Only note-on and control-change messages are mappable;
//! everything else classifies to `None` and is dropped.
//!
//! MIDI message format handled by [`RawEvent::parse`]:
//! - Note Off: 0x8n nn vv (n=channel, nn=note, vv=velocity)
//! - Note On: 0x9n nn vv
//! - Control Change: 0xBn cc vv (cc=controller, vv=value)

use crate::normalize::normalize;
use crate::types::{CcTrigger, Event, NoteTrigger, Payload};
use midly::live::{LiveEvent, SystemCommon, SystemRealtime};
use midly::MidiMessage;

/// Value encoding as delivered by the transport
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RawValue {
    /// MIDI 1.0 7-bit value (0-127)
    Midi1(u8),
    /// MIDI 2.0 32-bit value
    Midi2(u32),
    /// Already scaled to 0.0-1.0
    UnitInterval(f64),
}

impl RawValue {
    /// Value scaled to 0.0-1.0
    pub fn unit_interval(&self) -> f64 {
        match self {
            Self::Midi1(v) => (*v).min(127) as f64 / 127.0,
            Self::Midi2(v) => *v as f64 / u32::MAX as f64,
            Self::UnitInterval(v) => v.clamp(0.0, 1.0),
        }
    }
}

/// Raw input event (before classification)
#[derive(Debug, Clone, PartialEq)]
pub enum RawEvent {
    NoteOn {
        channel: u8,
        note: u8,
        velocity: RawValue,
    },
    NoteOff {
        channel: u8,
        note: u8,
        velocity: RawValue,
    },
    ControlChange {
        channel: u8,
        controller: u8,
        value: RawValue,
    },
    ProgramChange {
        channel: u8,
        program: u8,
    },
    /// 14-bit bend, 0x2000 is centered
    PitchBend {
        channel: u8,
        value: u16,
    },
    /// MIDI timing clock tick
    Clock,
    /// System exclusive data (without the framing bytes)
    SysEx(Vec<u8>),
    /// Anything else (aftertouch, transport, song position...)
    Other,
}

impl RawEvent {
    /// Control change with a 0.0-1.0 value
    pub fn cc(controller: u8, value: f64) -> Self {
        Self::ControlChange {
            channel: 0,
            controller,
            value: RawValue::UnitInterval(value),
        }
    }

    /// Note on with a 0.0-1.0 velocity
    pub fn note_on(note: u8, velocity: f64) -> Self {
        Self::NoteOn {
            channel: 0,
            note,
            velocity: RawValue::UnitInterval(velocity),
        }
    }

    /// Parse one live MIDI message
    ///
    /// Note On with velocity 0 is reported as Note Off. Returns `None` for
    /// bytes that are not a complete message.
    pub fn parse(data: &[u8]) -> Option<Self> {
        let event = match LiveEvent::parse(data) {
            Ok(event) => event,
            Err(e) => {
                log::trace!("[INPUT] Unparseable MIDI bytes {:02X?}: {}", data, e);
                return None;
            }
        };

        let raw = match event {
            LiveEvent::Midi { channel, message } => {
                let channel = channel.as_int();
                match message {
                    MidiMessage::NoteOn { key, vel } if vel.as_int() == 0 => Self::NoteOff {
                        channel,
                        note: key.as_int(),
                        velocity: RawValue::Midi1(0),
                    },
                    MidiMessage::NoteOn { key, vel } => Self::NoteOn {
                        channel,
                        note: key.as_int(),
                        velocity: RawValue::Midi1(vel.as_int()),
                    },
                    MidiMessage::NoteOff { key, vel } => Self::NoteOff {
                        channel,
                        note: key.as_int(),
                        velocity: RawValue::Midi1(vel.as_int()),
                    },
                    MidiMessage::Controller { controller, value } => Self::ControlChange {
                        channel,
                        controller: controller.as_int(),
                        value: RawValue::Midi1(value.as_int()),
                    },
                    MidiMessage::ProgramChange { program } => Self::ProgramChange {
                        channel,
                        program: program.as_int(),
                    },
                    MidiMessage::PitchBend { bend } => Self::PitchBend {
                        channel,
                        value: bend.0.as_int(),
                    },
                    _ => Self::Other,
                }
            }
            LiveEvent::Realtime(SystemRealtime::TimingClock) => Self::Clock,
            LiveEvent::Common(SystemCommon::SysEx(bytes)) => {
                Self::SysEx(bytes.iter().map(|b| b.as_int()).collect())
            }
            _ => Self::Other,
        };
        Some(raw)
    }
}

/// Classify a raw event into a mappable event
///
/// The result is unscoped; the dispatcher attaches the source controller.
pub fn classify(raw: &RawEvent) -> Option<Event> {
    match raw {
        RawEvent::ControlChange { controller, .. } => {
            Some(Event::ControlChange(CcTrigger::new(*controller)))
        }
        RawEvent::NoteOn { note, .. } => Some(Event::Note(NoteTrigger::new(*note))),
        _ => None,
    }
}

/// Build the normalized payload for a classifiable raw event
pub fn payload_for(raw: &RawEvent, decimal_places: u32) -> Option<Payload> {
    match raw {
        RawEvent::ControlChange { value, .. } => Some(Payload {
            value: normalize(Some(value.unit_interval()), decimal_places),
            ..Payload::default()
        }),
        RawEvent::NoteOn { note, velocity, .. } => Some(Payload {
            value: normalize(Some(*note as f64), decimal_places),
            value2: normalize(Some(velocity.unit_interval()), decimal_places),
            message: None,
        }),
        _ => None,
    }
}
