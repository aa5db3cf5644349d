use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use futures::StreamExt;
use lapin::options::{
    BasicConsumeOptions, BasicPublishOptions, ExchangeDeclareOptions, QueueBindOptions,
    QueueDeclareOptions,
};
use lapin::types::{AMQPValue, FieldTable};
use lapin::{BasicProperties, Channel, Connection, ConnectionProperties, ExchangeKind};
use serde_json::Value;
use tracing::{error, info, warn};

use crate::events::routing;
use crate::session::SessionRegistry;

use super::{dispatch_inbound, DuelBus};

pub const EXCHANGE: &str = "duels.topic";
const INBOUND_QUEUE: &str = "duel.critical.events";
const QUEUE_MESSAGE_TTL_MS: i64 = 300_000;

/// AMQP transport. One connection, one channel; the channel is safe to use
/// from any task.
pub struct AmqpBus {
    _connection: Connection,
    channel: Channel,
}

impl AmqpBus {
    pub async fn connect(url: &str) -> Result<Self> {
        let connection = Connection::connect(url, ConnectionProperties::default())
            .await
            .with_context(|| format!("Failed to connect to the bus at {url}"))?;
        let channel = connection
            .create_channel()
            .await
            .context("Failed to open a bus channel")?;

        channel
            .exchange_declare(
                EXCHANGE,
                ExchangeKind::Topic,
                ExchangeDeclareOptions { durable: true, ..Default::default() },
                FieldTable::default(),
            )
            .await
            .with_context(|| format!("Failed to declare exchange {EXCHANGE}"))?;

        info!(url, exchange = EXCHANGE, "Connected to the bus");
        Ok(Self { _connection: connection, channel })
    }

    /// Declares the durable inbound queue, binds the player action routing
    /// keys and spawns the long-lived consumer task.
    pub async fn start_consumer(&self, registry: Arc<SessionRegistry>) -> Result<()> {
        let mut arguments = FieldTable::default();
        arguments.insert("x-message-ttl".into(), AMQPValue::LongLongInt(QUEUE_MESSAGE_TTL_MS));

        let queue = self
            .channel
            .queue_declare(
                INBOUND_QUEUE,
                QueueDeclareOptions { durable: true, ..Default::default() },
                arguments,
            )
            .await
            .with_context(|| format!("Failed to declare queue {INBOUND_QUEUE}"))?;

        for key in routing::INBOUND {
            self.channel
                .queue_bind(
                    queue.name().as_str(),
                    EXCHANGE,
                    key,
                    QueueBindOptions::default(),
                    FieldTable::default(),
                )
                .await
                .with_context(|| format!("Failed to bind {key}"))?;
        }

        let mut consumer = self
            .channel
            .basic_consume(
                queue.name().as_str(),
                "duel-core",
                BasicConsumeOptions { no_ack: true, ..Default::default() },
                FieldTable::default(),
            )
            .await
            .context("Failed to start consuming inbound events")?;

        tokio::spawn(async move {
            info!(queue = INBOUND_QUEUE, "Inbound consumer started");
            while let Some(delivery) = consumer.next().await {
                match delivery {
                    Ok(delivery) => {
                        dispatch_inbound(&registry, delivery.routing_key.as_str(), &delivery.data);
                    }
                    Err(e) => warn!("Inbound consumer delivery error: {e}"),
                }
            }
            error!(queue = INBOUND_QUEUE, "Inbound consumer stream ended");
        });

        Ok(())
    }
}

#[async_trait]
impl DuelBus for AmqpBus {
    async fn publish(&self, routing_key: &str, payload: Value) -> Result<()> {
        let body = serde_json::to_vec(&payload).context("Failed to encode bus payload")?;

        self.channel
            .basic_publish(
                EXCHANGE,
                routing_key,
                BasicPublishOptions::default(),
                &body,
                BasicProperties::default()
                    .with_content_type("application/json".into())
                    .with_delivery_mode(2),
            )
            .await
            .with_context(|| format!("Failed to publish to {routing_key}"))?
            .await
            .with_context(|| format!("Publish to {routing_key} was not confirmed"))?;

        Ok(())
    }
}
