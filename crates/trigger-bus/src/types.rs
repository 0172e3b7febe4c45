//! Trigger, event and payload value types
//!
//! A [`Trigger`] describes a control that can be mapped to an action. An
//! [`Event`] is one occurrence of such a control, classified from a raw
//! hardware message. Values never take part in trigger identity; they travel
//! separately in a [`Payload`].

use serde::{Deserialize, Serialize};
use std::fmt;

/// Protocol family of a physical controller
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerKind {
    Midi,
    Hid,
    Osc,
}

/// Identity of a physical controller source
///
/// Used to scope a trigger to one device. Unscoped triggers match the same
/// note or CC from any device.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Controller {
    /// Stable device identifier supplied by the transport (e.g. port name)
    pub identifier: String,
    pub trigger_kind: TriggerKind,
}

impl Controller {
    pub fn new(identifier: impl Into<String>, trigger_kind: TriggerKind) -> Self {
        Self {
            identifier: identifier.into(),
            trigger_kind,
        }
    }

    /// Shorthand for a MIDI controller
    pub fn midi(identifier: impl Into<String>) -> Self {
        Self::new(identifier, TriggerKind::Midi)
    }
}

fn default_note_on() -> bool {
    true
}

/// MIDI note trigger
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NoteTrigger {
    /// Source controller, `None` matches any controller
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub controller: Option<Controller>,
    /// Note number (0-127)
    pub note: u8,
    #[serde(default = "default_note_on")]
    pub note_on: bool,
}

impl NoteTrigger {
    /// Note-on trigger from any controller
    pub fn new(note: u8) -> Self {
        Self {
            controller: None,
            note,
            note_on: true,
        }
    }

    pub fn with_controller(mut self, controller: Controller) -> Self {
        self.controller = Some(controller);
        self
    }
}

/// MIDI control change trigger
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CcTrigger {
    /// Source controller, `None` matches any controller
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub controller: Option<Controller>,
    /// Controller number (0-127)
    pub cc: u8,
}

impl CcTrigger {
    /// CC trigger from any controller
    pub fn new(cc: u8) -> Self {
        Self {
            controller: None,
            cc,
        }
    }

    pub fn with_controller(mut self, controller: Controller) -> Self {
        self.controller = Some(controller);
        self
    }
}

/// A mappable control
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Trigger {
    Note(NoteTrigger),
    ControlChange(CcTrigger),
}

impl Trigger {
    /// Note-on trigger from any controller
    pub fn note(note: u8) -> Self {
        Self::Note(NoteTrigger::new(note))
    }

    /// CC trigger from any controller
    pub fn cc(cc: u8) -> Self {
        Self::ControlChange(CcTrigger::new(cc))
    }

    /// Check whether an occurred event fires this trigger
    ///
    /// Note/CC fields must be equal. A scoped trigger additionally requires
    /// the event to come from the same controller; an unscoped one accepts
    /// any source.
    pub fn matches(&self, event: &Event) -> bool {
        match (self, event) {
            (Self::Note(mapped), Event::Note(seen)) => {
                mapped.note == seen.note
                    && mapped.note_on == seen.note_on
                    && scope_matches(&mapped.controller, &seen.controller)
            }
            (Self::ControlChange(mapped), Event::ControlChange(seen)) => {
                mapped.cc == seen.cc && scope_matches(&mapped.controller, &seen.controller)
            }
            _ => false,
        }
    }
}

fn scope_matches(mapped: &Option<Controller>, source: &Option<Controller>) -> bool {
    match mapped {
        None => true,
        Some(controller) => source.as_ref() == Some(controller),
    }
}

impl From<Event> for Trigger {
    fn from(event: Event) -> Self {
        match event {
            Event::Note(t) => Trigger::Note(t),
            Event::ControlChange(t) => Trigger::ControlChange(t),
        }
    }
}

/// A classified control occurrence
///
/// Two events are equal when their triggers are equal. This is what learn
/// mode reports back so the application can create a mapping from it.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    Note(NoteTrigger),
    ControlChange(CcTrigger),
}

impl Event {
    /// The trigger that would match exactly this event
    pub fn trigger(&self) -> Trigger {
        self.clone().into()
    }

    /// Attach the originating controller (if the transport knows it)
    pub fn scoped(self, source: Option<Controller>) -> Self {
        match self {
            Self::Note(mut t) => {
                t.controller = source;
                Self::Note(t)
            }
            Self::ControlChange(mut t) => {
                t.controller = source;
                Self::ControlChange(t)
            }
        }
    }

    /// Controller the event came from, if the transport knew it
    pub fn controller(&self) -> Option<&Controller> {
        match self {
            Self::Note(t) => t.controller.as_ref(),
            Self::ControlChange(t) => t.controller.as_ref(),
        }
    }

    /// Human-readable label, e.g. "CC: 7" or "Note: 60 (C3)"
    pub fn name(&self) -> String {
        match self {
            Self::ControlChange(t) => format!("CC: {}", t.cc),
            Self::Note(t) => format!("Note: {} ({})", t.note, note_name(t.note)),
        }
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name())?;
        if let Some(controller) = self.controller() {
            write!(f, " @ {}", controller.identifier)?;
        }
        Ok(())
    }
}

const NOTE_NAMES: [&str; 12] = [
    "C", "C#", "D", "D#", "E", "F", "F#", "G", "G#", "A", "A#", "B",
];

/// Name a MIDI note number, with middle C (60) as "C3"
pub fn note_name(note: u8) -> String {
    let octave = (note / 12) as i32 - 2;
    format!("{}{}", NOTE_NAMES[(note % 12) as usize], octave)
}

/// Normalized data accompanying a dispatched event
///
/// Equality is structural. Lanes compare payloads to detect an identical
/// invocation that is already pending.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Payload {
    /// Primary magnitude: 0.0-1.0 for CC values, the note number for notes
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<f64>,
    /// Secondary data, e.g. note velocity (0.0-1.0)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value2: Option<f64>,
    /// Reserved for text-bearing sources
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl Payload {
    pub fn with_value(value: f64) -> Self {
        Self {
            value: Some(value),
            ..Self::default()
        }
    }
}
