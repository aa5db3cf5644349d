use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value;
use tracing::warn;

use crate::events::{routing, AnswerSubmitted, DuelEvent, PlayerPresence};
use crate::session::{AnswerEvent, SessionRegistry};

pub mod amqp;

/// Outbound transport towards the gateway. JSON payloads on a durable topic
/// exchange; delivery is at-least-once.
#[async_trait]
pub trait DuelBus: Send + Sync {
    async fn publish(&self, routing_key: &str, payload: Value) -> Result<()>;
}

/// Publishes an event, logging instead of failing: duel progression never
/// blocks on transport.
pub async fn publish_event(bus: &dyn DuelBus, routing_key: &str, event: &DuelEvent) {
    let payload = match serde_json::to_value(event) {
        Ok(payload) => payload,
        Err(e) => {
            warn!(routing_key, "Failed to serialize outbound event: {e}");
            return;
        }
    };
    if let Err(e) = bus.publish(routing_key, payload).await {
        warn!(routing_key, duel_id = %event.duel_id, "Failed to publish event: {e:#}");
    }
}

/// Routes one inbound gateway message into the owning session's channels.
/// Malformed messages and unknown routing keys are dropped with a warning;
/// the consumer loop itself never fails.
pub fn dispatch_inbound(registry: &SessionRegistry, routing_key: &str, body: &[u8]) {
    match routing_key {
        routing::ANSWER_SUBMITTED => {
            let Some(message) = parse::<AnswerSubmitted>(routing_key, body) else {
                return;
            };
            let Some(duel_id) = parse_duel_id(routing_key, &message.duel_id) else {
                return;
            };
            registry.forward_answer(
                duel_id,
                &message.user_id,
                AnswerEvent { question_id: message.question_id, answer: message.answer },
            );
        }
        routing::PLAYER_CONNECTED => {
            let Some(message) = parse::<PlayerPresence>(routing_key, body) else {
                return;
            };
            let Some(duel_id) = parse_duel_id(routing_key, &message.duel_id) else {
                return;
            };
            registry.mark_connected(duel_id, &message.user_id);
        }
        routing::PLAYER_DISCONNECTED => {
            let Some(message) = parse::<PlayerPresence>(routing_key, body) else {
                return;
            };
            let Some(duel_id) = parse_duel_id(routing_key, &message.duel_id) else {
                return;
            };
            registry.mark_disconnected(duel_id, &message.user_id);
        }
        other => warn!(routing_key = other, "Ignoring message with unknown routing key"),
    }
}

fn parse<T: serde::de::DeserializeOwned>(routing_key: &str, body: &[u8]) -> Option<T> {
    match serde_json::from_slice(body) {
        Ok(message) => Some(message),
        Err(e) => {
            warn!(routing_key, "Dropping malformed inbound message: {e}");
            None
        }
    }
}

fn parse_duel_id(routing_key: &str, raw: &str) -> Option<i64> {
    match raw.parse::<i64>() {
        Ok(id) if id > 0 => Some(id),
        _ => {
            warn!(routing_key, duel_id = raw, "Dropping message with invalid duel id");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;

    struct NoopBus;

    #[async_trait]
    impl DuelBus for NoopBus {
        async fn publish(&self, _routing_key: &str, _payload: Value) -> Result<()> {
            Ok(())
        }
    }

    #[test]
    fn inbound_answers_land_in_the_player_inbox() {
        let registry = SessionRegistry::new(Arc::new(NoopBus));
        let mut handles = registry.create(7, "ana", "ben").unwrap();

        let body = br#"{"duelId":"7","userId":"ana","questionId":"q-1","answer":"4","timestamp":1.0}"#;
        dispatch_inbound(&registry, routing::ANSWER_SUBMITTED, body);

        let mut inbox = handles.answers.remove("ana").unwrap();
        let event = inbox.try_recv().unwrap();
        assert_eq!(event.question_id, "q-1");
        assert_eq!(event.answer, "4");
    }

    #[test]
    fn inbound_presence_updates_the_session() {
        let registry = SessionRegistry::new(Arc::new(NoopBus));
        let mut handles = registry.create(8, "ana", "ben").unwrap();

        dispatch_inbound(
            &registry,
            routing::PLAYER_CONNECTED,
            br#"{"duelId":"8","userId":"ben"}"#,
        );

        let event = handles.presence.try_recv().unwrap();
        assert_eq!(event.player_id, "ben");
        assert!(event.connected);
    }

    #[test]
    fn garbage_input_is_dropped_quietly() {
        let registry = SessionRegistry::new(Arc::new(NoopBus));
        let _handles = registry.create(9, "ana", "ben").unwrap();

        dispatch_inbound(&registry, routing::ANSWER_SUBMITTED, b"not json");
        dispatch_inbound(
            &registry,
            routing::ANSWER_SUBMITTED,
            br#"{"duelId":"abc","userId":"ana","questionId":"q","answer":"x"}"#,
        );
        dispatch_inbound(&registry, "duel.unknown.key", b"{}");
    }
}
