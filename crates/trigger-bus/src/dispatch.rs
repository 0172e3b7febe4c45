//! Dispatch thread
//!
//! All registry mutation and all event matching run on one dedicated thread,
//! fed by a single command channel. Commands are handled strictly in the
//! order they were sent, so a match pass never sees a half-applied add or
//! remove, and an add followed by an event always finds the new mapping.
//!
//! ```text
//! Bus handle → flume commands → Dispatcher (registry, lanes) → Lane threads → callbacks
//! ```

use crate::input::{classify, payload_for, RawEvent};
use crate::lane::{Lane, Submission};
use crate::mapping::{AppAction, Mapping, MappingRegistry, TriggerCallback};
use crate::types::{Controller, Event};
use flume::{Receiver, Sender};
use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, PoisonError, RwLock};
use uuid::Uuid;

/// Observer notified of every classified event (learn mode)
pub type EventObserver = Box<dyn Fn(&Event) + Send>;

/// Mapping listing shared with the bus handle
pub(crate) type MappingSnapshot<A> = Arc<RwLock<Vec<Mapping<A>>>>;

pub(crate) enum Command<A> {
    AddMapping {
        mapping: Mapping<A>,
        callback: TriggerCallback,
    },
    RemoveMapping(Uuid),
    RawEvent {
        source: Option<Controller>,
        event: RawEvent,
    },
    SetObserver(Option<EventObserver>),
    /// Answered once every earlier command has been handled
    Flush(Sender<()>),
}

pub(crate) struct Dispatcher<A> {
    decimal_places: u32,
    registry: MappingRegistry<A>,
    /// Lanes are created on first submission and live as long as their mapping
    lanes: HashMap<Uuid, Lane>,
    observer: Option<EventObserver>,
    snapshot: MappingSnapshot<A>,
}

impl<A: AppAction> Dispatcher<A> {
    pub fn new(decimal_places: u32, snapshot: MappingSnapshot<A>) -> Self {
        Self {
            decimal_places,
            registry: MappingRegistry::new(),
            lanes: HashMap::new(),
            observer: None,
            snapshot,
        }
    }

    /// Thread body: handle commands until every bus handle is gone
    pub fn run(mut self, rx: Receiver<Command<A>>) {
        log::info!(
            "[DISPATCH] Started (decimal places: {})",
            self.decimal_places
        );
        while let Ok(command) = rx.recv() {
            self.handle(command);
        }
        log::info!(
            "[DISPATCH] Bus dropped, shutting down {} lane(s)",
            self.lanes.len()
        );
    }

    pub fn handle(&mut self, command: Command<A>) {
        match command {
            Command::AddMapping { mapping, callback } => self.add_mapping(mapping, callback),
            Command::RemoveMapping(id) => self.remove_mapping(id),
            Command::RawEvent { source, event } => self.on_raw_event(source, &event),
            Command::SetObserver(observer) => {
                log::debug!(
                    "[DISPATCH] Event observer {}",
                    if observer.is_some() { "set" } else { "cleared" }
                );
                self.observer = observer;
            }
            Command::Flush(done) => {
                let _ = done.send(());
            }
        }
    }

    fn add_mapping(&mut self, mapping: Mapping<A>, callback: TriggerCallback) {
        let id = mapping.id;
        log::debug!(
            "[DISPATCH] Add mapping {} ({:?} -> {:?})",
            id,
            mapping.event,
            mapping.action
        );
        if self.registry.add(mapping, callback) {
            // The replaced callback must not fire after this point
            if self.lanes.get(&id).is_some_and(|lane| lane.cancel()) {
                log::debug!("[DISPATCH] Discarded pending invocation of replaced mapping {}", id);
            }
            log::debug!("[DISPATCH] Mapping {} updated in place", id);
        }
        self.publish_snapshot();
    }

    fn remove_mapping(&mut self, id: Uuid) {
        match self.registry.remove(id) {
            Some(mapping) => {
                // Dropping the lane cancels whatever it still had queued
                self.lanes.remove(&id);
                log::debug!("[DISPATCH] Removed mapping {} ({:?})", id, mapping.action);
                self.publish_snapshot();
            }
            None => log::trace!("[DISPATCH] Remove of unknown mapping {} ignored", id),
        }
    }

    /// Classify, match and hand every match to its lane
    pub fn on_raw_event(&mut self, source: Option<Controller>, raw: &RawEvent) {
        let (event, payload) = match (classify(raw), payload_for(raw, self.decimal_places)) {
            (Some(event), Some(payload)) => (event.scoped(source), payload),
            _ => {
                log::trace!("[DISPATCH] Ignoring unsupported event {:?}", raw);
                return;
            }
        };

        log::debug!("[DISPATCH] {} {:?}", event, payload);

        let matches = self.registry.find_matches(&event);
        if matches.is_empty() {
            log::trace!("[DISPATCH] -> (no mapping)");
        }

        for matched in matches {
            let lane = match self.lane_for(matched.id) {
                Some(lane) => lane,
                None => continue,
            };
            match lane.submit(payload.clone(), matched.callback) {
                Submission::Queued => {
                    log::debug!("[DISPATCH] -> {:?} ({})", matched.action, matched.id)
                }
                Submission::Coalesced => {
                    log::trace!("[DISPATCH] -> {:?} already pending", matched.action)
                }
                Submission::Dropped => {
                    // Worker died; start over with a fresh lane next time
                    self.lanes.remove(&matched.id);
                }
            }
        }

        if let Some(observer) = &self.observer {
            if panic::catch_unwind(AssertUnwindSafe(|| observer(&event))).is_err() {
                log::error!("[DISPATCH] Event observer panicked on {}", event);
            }
        }
    }

    fn lane_for(&mut self, id: Uuid) -> Option<&Lane> {
        if !self.lanes.contains_key(&id) {
            match Lane::spawn(id) {
                Ok(lane) => {
                    self.lanes.insert(id, lane);
                }
                Err(e) => {
                    log::error!("[DISPATCH] Failed to spawn lane for mapping {}: {}", id, e);
                    return None;
                }
            }
        }
        self.lanes.get(&id)
    }

    fn publish_snapshot(&self) {
        let listing = self.registry.mappings().to_vec();
        let mut snapshot = self
            .snapshot
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        *snapshot = listing;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Payload, Trigger};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    enum TestAction {
        Play,
        Volume,
    }

    impl AppAction for TestAction {
        fn all() -> Vec<Self> {
            vec![Self::Play, Self::Volume]
        }
    }

    fn dispatcher() -> Dispatcher<TestAction> {
        Dispatcher::new(2, Arc::new(RwLock::new(Vec::new())))
    }

    fn recording_callback() -> (TriggerCallback, Receiver<Payload>) {
        let (tx, rx) = flume::unbounded();
        let callback: TriggerCallback = Arc::new(move |p| {
            let _ = tx.send(p);
        });
        (callback, rx)
    }

    #[test]
    fn test_snapshot_follows_mutations() {
        let mut dispatcher = dispatcher();
        let snapshot = Arc::clone(&dispatcher.snapshot);
        let mapping = Mapping::new(TestAction::Volume, Trigger::cc(7));

        dispatcher.handle(Command::AddMapping {
            mapping: mapping.clone(),
            callback: Arc::new(|_| {}),
        });
        assert_eq!(*snapshot.read().unwrap(), vec![mapping.clone()]);

        dispatcher.handle(Command::RemoveMapping(mapping.id));
        assert!(snapshot.read().unwrap().is_empty());
    }

    #[test]
    fn test_match_submits_normalized_payload() {
        let mut dispatcher = dispatcher();
        let (callback, rx) = recording_callback();
        dispatcher.handle(Command::AddMapping {
            mapping: Mapping::new(TestAction::Volume, Trigger::cc(7)),
            callback,
        });

        dispatcher.on_raw_event(None, &RawEvent::cc(7, 0.333));
        assert_eq!(
            rx.recv_timeout(Duration::from_secs(1)).unwrap(),
            Payload::with_value(0.33)
        );
        assert_eq!(dispatcher.lanes.len(), 1);
    }

    #[test]
    fn test_observer_fires_without_match() {
        let mut dispatcher = dispatcher();
        let seen = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&seen);
        dispatcher.handle(Command::SetObserver(Some(Box::new(move |_: &Event| {
            counter.fetch_add(1, Ordering::SeqCst);
        }))));

        dispatcher.on_raw_event(None, &RawEvent::note_on(60, 1.0));
        dispatcher.on_raw_event(None, &RawEvent::Clock);

        // Observer runs synchronously on the dispatch thread
        assert_eq!(seen.load(Ordering::SeqCst), 1);
        assert!(dispatcher.lanes.is_empty());
    }

    #[test]
    fn test_remove_drops_lane() {
        let mut dispatcher = dispatcher();
        let (callback, _rx) = recording_callback();
        let mapping = Mapping::new(TestAction::Play, Trigger::note(36));
        dispatcher.handle(Command::AddMapping {
            mapping: mapping.clone(),
            callback,
        });
        dispatcher.on_raw_event(None, &RawEvent::note_on(36, 0.8));
        assert!(dispatcher.lanes.contains_key(&mapping.id));

        dispatcher.handle(Command::RemoveMapping(mapping.id));
        assert!(dispatcher.lanes.is_empty());

        // Unknown id: nothing happens
        dispatcher.handle(Command::RemoveMapping(mapping.id));
    }

    #[test]
    fn test_source_controller_scopes_event() {
        let mut dispatcher = dispatcher();
        let (callback, rx) = recording_callback();
        let scoped = Trigger::ControlChange(
            crate::types::CcTrigger::new(7).with_controller(Controller::midi("Left")),
        );
        dispatcher.handle(Command::AddMapping {
            mapping: Mapping::new(TestAction::Volume, scoped),
            callback,
        });

        dispatcher.on_raw_event(Some(Controller::midi("Right")), &RawEvent::cc(7, 0.1));
        dispatcher.on_raw_event(Some(Controller::midi("Left")), &RawEvent::cc(7, 0.2));

        assert_eq!(
            rx.recv_timeout(Duration::from_secs(1)).unwrap(),
            Payload::with_value(0.2)
        );
        assert!(rx.recv_timeout(Duration::from_millis(100)).is_err());
    }

    #[test]
    fn test_panicking_observer_keeps_dispatching() {
        let mut dispatcher = dispatcher();
        let (callback, rx) = recording_callback();
        dispatcher.handle(Command::AddMapping {
            mapping: Mapping::new(TestAction::Volume, Trigger::cc(1)),
            callback,
        });
        dispatcher.handle(Command::SetObserver(Some(Box::new(|_: &Event| {
            panic!("observer failure");
        }))));

        let wait = Duration::from_secs(1);
        dispatcher.on_raw_event(None, &RawEvent::cc(1, 0.5));
        assert_eq!(rx.recv_timeout(wait).unwrap(), Payload::with_value(0.5));
        dispatcher.on_raw_event(None, &RawEvent::cc(1, 0.7));
        assert_eq!(rx.recv_timeout(wait).unwrap(), Payload::with_value(0.7));
        assert!(dispatcher.observer.is_some());
    }
}
