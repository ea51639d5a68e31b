use dashmap::DashMap;
use tokio::sync::broadcast;
use ulid::Ulid;

use crate::model::Event;

const CHANNEL_CAPACITY: usize = 256;
const FIREHOSE_CAPACITY: usize = 4096;

/// Broadcast hub for committed events, per slot and tenant-wide.
pub struct NotifyHub {
    channels: DashMap<Ulid, broadcast::Sender<Event>>,
    all: broadcast::Sender<Event>,
}

impl Default for NotifyHub {
    fn default() -> Self {
        Self::new()
    }
}

impl NotifyHub {
    pub fn new() -> Self {
        Self {
            channels: DashMap::new(),
            all: broadcast::channel(FIREHOSE_CAPACITY).0,
        }
    }

    /// Subscribe to events for one slot. Creates the channel if needed.
    pub fn subscribe(&self, slot_id: Ulid) -> broadcast::Receiver<Event> {
        let sender = self
            .channels
            .entry(slot_id)
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0);
        sender.subscribe()
    }

    /// Every event of the tenant, e.g. for invoicing.
    pub fn subscribe_all(&self) -> broadcast::Receiver<Event> {
        self.all.subscribe()
    }

    /// Publish a committed event. No-op if nobody is listening.
    pub fn send(&self, event: &Event) {
        let _ = self.all.send(event.clone());
        let Some(slot_id) = event.slot_id() else { return };
        if let Some(sender) = self.channels.get(&slot_id) {
            let _ = sender.send(event.clone());
        }
        if matches!(event, Event::SlotDeleted { .. }) {
            self.remove(&slot_id);
        }
    }

    /// Drop a slot's channel; its receivers see the stream close.
    pub fn remove(&self, slot_id: &Ulid) {
        self.channels.remove(slot_id);
    }
}
