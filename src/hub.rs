//! Fan-out of committed room events to subscribers.
//!
//! The hub is registered as the engine's [`CommitListener`], so it
//! publishes while the room is still locked and subscribers receive a
//! room's broadcasts in revision order.

use crate::engine::{CommitListener, Committed};
use serde::Serialize;
use squarely_rules::{RoomEvent, RoomId, RoomState};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::broadcast;
use tracing::{debug, instrument};

/// Default buffered broadcasts per room.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 64;

/// One message delivered to a room's subscribers.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RoomBroadcast {
    /// Room state after the transition; absent once the room is closed.
    pub state: Option<RoomState>,
    /// What happened.
    pub event: RoomEvent,
}

type Channels = HashMap<RoomId, broadcast::Sender<RoomBroadcast>>;

/// Per-room broadcast channels.
#[derive(Debug, Clone)]
pub struct RoomHub {
    channels: Arc<Mutex<Channels>>,
    capacity: usize,
}

impl Default for RoomHub {
    fn default() -> Self {
        Self::new(DEFAULT_CHANNEL_CAPACITY)
    }
}

impl RoomHub {
    /// Creates a hub buffering `capacity` broadcasts per room.
    #[instrument]
    pub fn new(capacity: usize) -> Self {
        Self {
            channels: Arc::new(Mutex::new(HashMap::new())),
            capacity: capacity.max(1),
        }
    }

    fn channels(&self) -> MutexGuard<'_, Channels> {
        self.channels.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Listens to a room's broadcasts from now on.
    #[instrument(skip(self, room_id), fields(room_id = %room_id))]
    pub fn subscribe(&self, room_id: &RoomId) -> broadcast::Receiver<RoomBroadcast> {
        let capacity = self.capacity;
        self.channels()
            .entry(room_id.clone())
            .or_insert_with(|| broadcast::channel(capacity).0)
            .subscribe()
    }

    /// Sends one broadcast per committed event. Returns how many
    /// subscribers were listening; zero is not an error.
    #[instrument(skip(self, room_id, committed), fields(room_id = %room_id, events = committed.events.len()))]
    pub fn publish(&self, room_id: &RoomId, committed: &Committed) -> usize {
        let channels = self.channels();
        let Some(sender) = channels.get(room_id) else {
            debug!("No subscribers");
            return 0;
        };
        let receivers = sender.receiver_count();
        for event in &committed.events {
            // Only fails when every receiver is gone.
            let _ = sender.send(RoomBroadcast {
                state: Some(committed.state.clone()),
                event: event.clone(),
            });
        }
        debug!(receivers, "Published");
        receivers
    }

    /// Announces the room's closure and drops its channel, ending every
    /// subscriber's stream.
    #[instrument(skip(self, room_id), fields(room_id = %room_id))]
    pub fn close(&self, room_id: &RoomId) {
        if let Some(sender) = self.channels().remove(room_id) {
            let _ = sender.send(RoomBroadcast {
                state: None,
                event: RoomEvent::RoomClosed,
            });
            debug!(receivers = sender.receiver_count(), "Room channel closed");
        }
    }

    /// Drops the room's channel if nobody listens to it any more.
    pub fn release_if_idle(&self, room_id: &RoomId) {
        let mut channels = self.channels();
        if channels
            .get(room_id)
            .is_some_and(|sender| sender.receiver_count() == 0)
        {
            channels.remove(room_id);
        }
    }

    /// Rooms that currently have a channel.
    pub fn room_ids(&self) -> Vec<RoomId> {
        self.channels().keys().cloned().collect()
    }

    /// Drops channels nobody listens to. Returns how many were removed.
    pub fn prune(&self) -> usize {
        let mut channels = self.channels();
        let before = channels.len();
        channels.retain(|_, sender| sender.receiver_count() > 0);
        before - channels.len()
    }

    /// Number of rooms with a channel.
    pub fn room_count(&self) -> usize {
        self.channels().len()
    }
}

impl CommitListener for RoomHub {
    fn committed(&self, room_id: &RoomId, committed: &Committed) {
        self.publish(room_id, committed);
    }

    fn closed(&self, room_id: &RoomId) {
        self.close(room_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use squarely_rules::GameRules;

    fn committed(events: Vec<RoomEvent>) -> (RoomId, Committed) {
        let room_id = RoomId::parse("424242").unwrap();
        let state = RoomState::create(room_id.clone(), GameRules::default(), Utc::now());
        (room_id, Committed { state, events })
    }

    #[test]
    fn test_publish_without_subscribers_is_silent() {
        let hub = RoomHub::default();
        let (room_id, committed) = committed(vec![RoomEvent::RoomReset]);
        assert_eq!(hub.publish(&room_id, &committed), 0);
        assert_eq!(hub.room_count(), 0);
    }

    #[tokio::test]
    async fn test_subscriber_receives_each_event_in_order() {
        let hub = RoomHub::new(8);
        let (room_id, committed) = committed(vec![
            RoomEvent::TurnSkipped {
                slot: squarely_rules::Slot::FIRST,
                name: "Ada".to_string(),
            },
            RoomEvent::RoomReset,
        ]);
        let mut rx = hub.subscribe(&room_id);
        assert_eq!(hub.publish(&room_id, &committed), 1);

        let first = rx.recv().await.unwrap();
        assert_eq!(first.event.name(), "turnSkipped");
        assert_eq!(first.state.as_ref(), Some(&committed.state));
        assert_eq!(rx.recv().await.unwrap().event, RoomEvent::RoomReset);
    }

    #[tokio::test]
    async fn test_close_announces_and_ends_stream() {
        let hub = RoomHub::new(8);
        let room_id = RoomId::parse("515151").unwrap();
        let mut rx = hub.subscribe(&room_id);
        hub.close(&room_id);

        let last = rx.recv().await.unwrap();
        assert_eq!(last.event, RoomEvent::RoomClosed);
        assert!(last.state.is_none());
        assert!(matches!(
            rx.recv().await,
            Err(broadcast::error::RecvError::Closed)
        ));
        assert_eq!(hub.room_count(), 0);
    }

    #[test]
    fn test_release_keeps_listened_channels() {
        let hub = RoomHub::default();
        let room_id = RoomId::parse("717171").unwrap();
        let rx = hub.subscribe(&room_id);
        hub.release_if_idle(&room_id);
        assert_eq!(hub.room_ids(), vec![room_id.clone()]);
        drop(rx);
        hub.release_if_idle(&room_id);
        assert_eq!(hub.room_count(), 0);
    }

    #[test]
    fn test_prune_drops_abandoned_channels() {
        let hub = RoomHub::default();
        let room_id = RoomId::parse("616161").unwrap();
        drop(hub.subscribe(&room_id));
        assert_eq!(hub.room_count(), 1);
        assert_eq!(hub.prune(), 1);
        assert_eq!(hub.room_count(), 0);
    }
}
