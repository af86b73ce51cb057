use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, RwLock};
use tracing::debug;
use uuid::Uuid;

use boxoffice_core::services::{FanOut, SubscriberId};
use boxoffice_core::{SeatDelta, StoreError};

struct Subscriber {
    tx: mpsc::Sender<SeatDelta>,
    rooms: HashSet<Uuid>,
}

#[derive(Default)]
struct HubState {
    rooms: HashMap<Uuid, HashSet<SubscriberId>>,
    subscribers: HashMap<SubscriberId, Subscriber>,
}

/// In-process rooms keyed by event id.
///
/// Each subscriber owns a bounded queue; a subscriber that falls behind
/// loses deltas instead of slowing publishers down.
pub struct RoomHub {
    state: RwLock<HubState>,
    buffer: usize,
}

impl RoomHub {
    pub fn new(buffer: usize) -> Self {
        Self {
            state: RwLock::new(HubState::default()),
            buffer: buffer.max(1),
        }
    }

    pub async fn connect(&self) -> (SubscriberId, mpsc::Receiver<SeatDelta>) {
        let (tx, rx) = mpsc::channel(self.buffer);
        let id = SubscriberId::new();
        self.state.write().await.subscribers.insert(
            id,
            Subscriber {
                tx,
                rooms: HashSet::new(),
            },
        );
        (id, rx)
    }

    /// Drops the subscriber from every room it joined.
    pub async fn disconnect(&self, id: SubscriberId) {
        let mut state = self.state.write().await;
        let HubState { rooms, subscribers } = &mut *state;

        if let Some(subscriber) = subscribers.remove(&id) {
            for event_id in subscriber.rooms {
                remove_member(rooms, event_id, id);
            }
        }
    }

    pub async fn room_size(&self, event_id: Uuid) -> usize {
        self.state
            .read()
            .await
            .rooms
            .get(&event_id)
            .map_or(0, HashSet::len)
    }

    /// Pushes `delta` to the members of its room. Returns how many got it.
    pub async fn deliver(&self, delta: &SeatDelta) -> usize {
        let state = self.state.read().await;
        let Some(members) = state.rooms.get(&delta.event_id) else {
            return 0;
        };

        let mut delivered = 0;
        for member in members {
            let Some(subscriber) = state.subscribers.get(member) else {
                continue;
            };
            match subscriber.tx.try_send(delta.clone()) {
                Ok(()) => delivered += 1,
                Err(TrySendError::Full(_)) => {
                    debug!(event_id = %delta.event_id, "Subscriber lagging, dropped seat update");
                }
                Err(TrySendError::Closed(_)) => {
                    debug!(event_id = %delta.event_id, "Subscriber gone, dropped seat update");
                }
            }
        }
        delivered
    }
}

fn remove_member(rooms: &mut HashMap<Uuid, HashSet<SubscriberId>>, event_id: Uuid, id: SubscriberId) {
    if let Some(members) = rooms.get_mut(&event_id) {
        members.remove(&id);
        if members.is_empty() {
            rooms.remove(&event_id);
        }
    }
}

#[async_trait]
impl FanOut for RoomHub {
    async fn join(&self, subscriber: SubscriberId, event_id: Uuid) {
        let mut state = self.state.write().await;
        let HubState { rooms, subscribers } = &mut *state;

        if let Some(entry) = subscribers.get_mut(&subscriber) {
            entry.rooms.insert(event_id);
            rooms.entry(event_id).or_default().insert(subscriber);
        }
    }

    async fn leave(&self, subscriber: SubscriberId, event_id: Uuid) {
        let mut state = self.state.write().await;
        let HubState { rooms, subscribers } = &mut *state;

        if let Some(entry) = subscribers.get_mut(&subscriber) {
            entry.rooms.remove(&event_id);
        }
        remove_member(rooms, event_id, subscriber);
    }

    async fn publish(&self, delta: SeatDelta) -> Result<(), StoreError> {
        self.deliver(&delta).await;
        Ok(())
    }
}
