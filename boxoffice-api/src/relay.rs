use std::sync::Arc;

use async_trait::async_trait;
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{Consumer, StreamConsumer};
use rdkafka::message::Message;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use boxoffice_core::services::{FanOut, SubscriberId};
use boxoffice_core::{SeatDelta, StoreError};
use boxoffice_reservation::RoomHub;
use boxoffice_store::EventProducer;

/// Fan-out through the seat topic. Membership stays in the local hub; every
/// node's relay delivers what is published, including this node's own deltas.
pub struct KafkaFanOut {
    hub: Arc<RoomHub>,
    producer: EventProducer,
    topic: String,
}

impl KafkaFanOut {
    pub fn new(hub: Arc<RoomHub>, producer: EventProducer, topic: impl Into<String>) -> Self {
        Self {
            hub,
            producer,
            topic: topic.into(),
        }
    }
}

#[async_trait]
impl FanOut for KafkaFanOut {
    async fn join(&self, subscriber: SubscriberId, event_id: Uuid) {
        self.hub.join(subscriber, event_id).await;
    }

    async fn leave(&self, subscriber: SubscriberId, event_id: Uuid) {
        self.hub.leave(subscriber, event_id).await;
    }

    async fn publish(&self, delta: SeatDelta) -> Result<(), StoreError> {
        let payload = serde_json::to_string(&delta)?;
        self.producer
            .publish(&self.topic, &delta.event_id.to_string(), &payload)
            .await
    }
}

/// Consumes the seat topic and delivers each delta to this node's rooms.
///
/// Each node uses its own consumer group so every node sees every delta,
/// starting from the latest offset.
pub async fn run_seat_relay(
    brokers: String,
    group_prefix: String,
    topic: String,
    hub: Arc<RoomHub>,
    mut shutdown: watch::Receiver<bool>,
) -> anyhow::Result<()> {
    let group_id = format!("{}-{}", group_prefix, Uuid::new_v4());
    let consumer: StreamConsumer = ClientConfig::new()
        .set("bootstrap.servers", &brokers)
        .set("group.id", &group_id)
        .set("enable.auto.commit", "true")
        .set("auto.offset.reset", "latest")
        .create()?;

    consumer.subscribe(&[topic.as_str()])?;

    info!("Seat relay started, listening to {} as {}", topic, group_id);

    loop {
        tokio::select! {
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
            received = consumer.recv() => match received {
                Err(e) => error!("Kafka error: {}", e),
                Ok(m) => match m.payload_view::<str>() {
                    Some(Ok(payload)) => match serde_json::from_str::<SeatDelta>(payload) {
                        Ok(delta) => {
                            let delivered = hub.deliver(&delta).await;
                            debug!(event_id = %delta.event_id, delivered, "Relayed seat delta");
                        }
                        Err(e) => warn!("Dropping malformed seat delta: {}", e),
                    },
                    Some(Err(e)) => error!("Error reading payload: {}", e),
                    None => {}
                },
            }
        }
    }

    info!("Seat relay stopped");
    Ok(())
}
