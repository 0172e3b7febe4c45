//! Control-surface event bus
//!
//! This crate provides:
//! - Classification of raw MIDI input into note / control-change events
//! - Payload normalization at a configurable precision
//! - A live, mutable table of action mappings
//! - Per-mapping coalescing lanes so a callback never runs concurrently with
//!   itself and only ever sees the latest value
//! - Event observation for learn mode
//!
//! # Architecture
//!
//! ```text
//! Transport → Bus::handle_event → flume → dispatch thread → lane thread → callback
//! ```
//!
//! The transport (midir callback, test harness) may call into the bus from
//! any thread. Everything that touches the mapping table runs on the single
//! dispatch thread, in the order it was requested.

mod config;
mod dispatch;
mod input;
mod lane;
mod mapping;
mod normalize;
mod types;

pub use config::{load_bus_config, read_bus_config, BusConfig};
pub use dispatch::EventObserver;
pub use input::{classify, payload_for, RawEvent, RawValue};
pub use mapping::{AppAction, Mapping, TriggerCallback};
pub use normalize::{normalize, round_to, DEFAULT_DECIMAL_PLACES, MAX_DECIMAL_PLACES};
pub use types::{
    note_name, CcTrigger, Controller, Event, NoteTrigger, Payload, Trigger, TriggerKind,
};
pub use uuid::Uuid;

use dispatch::{Command, Dispatcher, MappingSnapshot};
use flume::{Receiver, Sender};
use std::path::Path;
use std::sync::{Arc, PoisonError, RwLock};
use std::thread::JoinHandle;

/// Error type for bus construction
#[derive(Debug, thiserror::Error)]
pub enum BusError {
    #[error("Failed to load bus config: {0:#}")]
    ConfigError(#[from] anyhow::Error),

    #[error("Failed to spawn {name} thread: {source}")]
    ThreadSpawn {
        name: String,
        #[source]
        source: std::io::Error,
    },
}

/// Capacity of the learn-mode event channel
const LEARN_CHANNEL_CAPACITY: usize = 256;

/// Handle to a running bus
///
/// Owns the dispatch thread. All methods are non-blocking except
/// [`Bus::flush`]. Mapping changes take effect in call order relative to
/// events, so an event handled after `add_mapping` sees the new mapping;
/// [`Bus::mappings`] reflects a change once the dispatch thread has applied
/// it (call `flush` to wait for that).
pub struct Bus<A: AppAction> {
    config: BusConfig,
    decimal_places: u32,
    command_tx: Sender<Command<A>>,
    mappings: MappingSnapshot<A>,
    _dispatch_thread: JoinHandle<()>,
}

impl<A: AppAction> Bus<A> {
    /// Start a bus with the given configuration
    pub fn new(config: BusConfig) -> Result<Self, BusError> {
        let decimal_places = config.effective_decimal_places();
        let mappings: MappingSnapshot<A> = Arc::new(RwLock::new(Vec::new()));
        let (command_tx, command_rx) = flume::unbounded();

        let dispatcher = Dispatcher::new(decimal_places, Arc::clone(&mappings));
        let name = "trigger-dispatch".to_string();
        let thread = std::thread::Builder::new()
            .name(name.clone())
            .spawn(move || dispatcher.run(command_rx))
            .map_err(|source| BusError::ThreadSpawn { name, source })?;

        Ok(Self {
            config,
            decimal_places,
            command_tx,
            mappings,
            _dispatch_thread: thread,
        })
    }

    /// Start a bus configured from a YAML file
    pub fn from_config_file(path: &Path) -> Result<Self, BusError> {
        let config = read_bus_config(path)?;
        Self::new(config)
    }

    pub fn config(&self) -> &BusConfig {
        &self.config
    }

    /// Precision payload values are rounded to
    pub fn decimal_places(&self) -> u32 {
        self.decimal_places
    }

    fn send(&self, command: Command<A>) {
        if self.command_tx.send(command).is_err() {
            log::warn!("Bus: dispatch thread has stopped, command dropped");
        }
    }

    /// Add a mapping, or replace the mapping with the same id in place
    pub fn add_mapping<F>(&self, mapping: Mapping<A>, callback: F)
    where
        F: Fn(Payload) + Send + Sync + 'static,
    {
        self.send(Command::AddMapping {
            mapping,
            callback: Arc::new(callback),
        });
    }

    /// Remove a mapping; unknown ids are ignored
    ///
    /// Once applied, the mapping's callback will not be invoked again, even
    /// for events matched before the removal.
    pub fn remove_mapping(&self, id: Uuid) {
        self.send(Command::RemoveMapping(id));
    }

    /// Snapshot of the current mappings in listing order
    pub fn mappings(&self) -> Vec<Mapping<A>> {
        self.mappings
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Mappings bound to one action
    pub fn mappings_for(&self, action: &A) -> Vec<Mapping<A>> {
        let mappings = self.mappings.read().unwrap_or_else(PoisonError::into_inner);
        mapping::mappings_for(&mappings, action).cloned().collect()
    }

    /// Actions without any mapping, in `AppAction::all` order
    pub fn unmapped_actions(&self) -> Vec<A> {
        let mappings = self.mappings.read().unwrap_or_else(PoisonError::into_inner);
        A::all()
            .into_iter()
            .filter(|action| !mappings.iter().any(|m| &m.action == action))
            .collect()
    }

    /// Handle a raw event from an unidentified source
    pub fn handle_event(&self, event: RawEvent) {
        self.send(Command::RawEvent {
            source: None,
            event,
        });
    }

    /// Handle a raw event from a known controller
    ///
    /// Triggers scoped to that controller can match it.
    pub fn handle_event_from(&self, source: Controller, event: RawEvent) {
        self.send(Command::RawEvent {
            source: Some(source),
            event,
        });
    }

    /// Parse and handle one raw MIDI message
    ///
    /// Suitable as the body of a midir input callback. Unparseable bytes are
    /// dropped.
    pub fn handle_midi_bytes(&self, source: Option<Controller>, data: &[u8]) {
        if let Some(event) = RawEvent::parse(data) {
            self.send(Command::RawEvent { source, event });
        }
    }

    /// Install the event observer, replacing any previous one
    ///
    /// The observer runs on the dispatch thread for every classified event,
    /// whether or not a mapping matched. Keep it fast.
    pub fn set_event_observer<F>(&self, observer: F)
    where
        F: Fn(&Event) + Send + 'static,
    {
        self.send(Command::SetObserver(Some(Box::new(observer))));
    }

    pub fn clear_event_observer(&self) {
        self.send(Command::SetObserver(None));
    }

    /// Capture classified events for learn mode
    ///
    /// Installs an observer that forwards into a bounded channel and returns
    /// its receiver. Events are dropped while the channel is full.
    pub fn learn_events(&self) -> Receiver<Event> {
        let (tx, rx) = flume::bounded(LEARN_CHANNEL_CAPACITY);
        self.set_event_observer(move |event| {
            if tx.try_send(event.clone()).is_err() {
                log::trace!("Bus: learn channel full or closed, dropping {}", event);
            }
        });
        rx
    }

    /// Block until every earlier call has been applied by the dispatch thread
    ///
    /// Callbacks run on their lanes and may still be in progress.
    pub fn flush(&self) {
        let (done_tx, done_rx) = flume::bounded(1);
        self.send(Command::Flush(done_tx));
        let _ = done_rx.recv();
    }
}
