use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::bus::{publish_event, DuelBus};
use crate::error::DuelError;
use crate::events::{routing, DuelEvent};

/// Single producer (the bus dispatcher) and single consumer (the
/// orchestrator); a handful of slots is plenty and bounds a storm.
pub const ANSWER_INBOX_CAPACITY: usize = 8;
const PRESENCE_INBOX_CAPACITY: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Acceptance {
    Accepted,
    Rejected,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnswerEvent {
    pub question_id: String,
    pub answer: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PresenceEvent {
    pub player_id: String,
    pub connected: bool,
}

/// Sending halves, owned by the registry until `remove` drops them, which
/// closes every channel of the duel exactly once.
struct Session {
    acceptance: Option<oneshot::Sender<Acceptance>>,
    presence: mpsc::Sender<PresenceEvent>,
    answers: HashMap<String, mpsc::Sender<AnswerEvent>>,
    connected: HashMap<String, bool>,
    cancel: CancellationToken,
}

/// Receiving halves, handed to the session lifecycle task at creation and
/// from there into the orchestrator.
pub struct SessionHandles {
    pub duel_id: i64,
    pub acceptance: oneshot::Receiver<Acceptance>,
    pub presence: mpsc::Receiver<PresenceEvent>,
    pub answers: HashMap<String, mpsc::Receiver<AnswerEvent>>,
    pub cancel: CancellationToken,
}

/// Process-wide table of live duel sessions. The mutex only ever guards
/// map and channel-handle operations; nothing awaits under it.
pub struct SessionRegistry {
    sessions: Mutex<HashMap<i64, Session>>,
    notifiers: Mutex<HashMap<String, Arc<UserNotifier>>>,
    bus: Arc<dyn DuelBus>,
}

impl SessionRegistry {
    pub fn new(bus: Arc<dyn DuelBus>) -> Self {
        Self {
            sessions: Mutex::new(HashMap::new()),
            notifiers: Mutex::new(HashMap::new()),
            bus,
        }
    }

    pub fn create(
        &self,
        duel_id: i64,
        challenger_id: &str,
        opponent_id: &str,
    ) -> Result<SessionHandles, DuelError> {
        let (acceptance_tx, acceptance_rx) = oneshot::channel();
        let (presence_tx, presence_rx) = mpsc::channel(PRESENCE_INBOX_CAPACITY);

        let mut answer_txs = HashMap::new();
        let mut answer_rxs = HashMap::new();
        for player_id in [challenger_id, opponent_id] {
            let (tx, rx) = mpsc::channel(ANSWER_INBOX_CAPACITY);
            answer_txs.insert(player_id.to_string(), tx);
            answer_rxs.insert(player_id.to_string(), rx);
        }

        let cancel = CancellationToken::new();
        let session = Session {
            acceptance: Some(acceptance_tx),
            presence: presence_tx,
            answers: answer_txs,
            connected: HashMap::new(),
            cancel: cancel.clone(),
        };

        let mut sessions = self.sessions.lock().unwrap();
        if sessions.contains_key(&duel_id) {
            return Err(DuelError::conflict(format!(
                "duel {duel_id} already has a live session"
            )));
        }
        sessions.insert(duel_id, session);

        Ok(SessionHandles {
            duel_id,
            acceptance: acceptance_rx,
            presence: presence_rx,
            answers: answer_rxs,
            cancel,
        })
    }

    pub fn contains(&self, duel_id: i64) -> bool {
        self.sessions.lock().unwrap().contains_key(&duel_id)
    }

    /// Fires the acceptance signal. Returns false when the session is gone
    /// or was already signalled.
    pub fn accept(&self, duel_id: i64) -> bool {
        self.signal(duel_id, Acceptance::Accepted)
    }

    pub fn reject(&self, duel_id: i64) -> bool {
        self.signal(duel_id, Acceptance::Rejected)
    }

    fn signal(&self, duel_id: i64, acceptance: Acceptance) -> bool {
        let sender = {
            let mut sessions = self.sessions.lock().unwrap();
            sessions.get_mut(&duel_id).and_then(|s| s.acceptance.take())
        };
        match sender {
            Some(tx) => tx.send(acceptance).is_ok(),
            None => false,
        }
    }

    pub fn forward_answer(&self, duel_id: i64, player_id: &str, event: AnswerEvent) {
        let sender = {
            let sessions = self.sessions.lock().unwrap();
            sessions
                .get(&duel_id)
                .and_then(|s| s.answers.get(player_id).cloned())
        };
        let Some(sender) = sender else {
            warn!(duel_id, player_id, "Dropping answer for unknown duel or player");
            return;
        };
        if let Err(e) = sender.try_send(event) {
            warn!(duel_id, player_id, "Dropping answer, inbox unavailable: {e}");
        }
    }

    pub fn mark_connected(&self, duel_id: i64, player_id: &str) {
        self.mark_presence(duel_id, player_id, true);
    }

    pub fn mark_disconnected(&self, duel_id: i64, player_id: &str) {
        self.mark_presence(duel_id, player_id, false);
    }

    fn mark_presence(&self, duel_id: i64, player_id: &str, connected: bool) {
        let sender = {
            let mut sessions = self.sessions.lock().unwrap();
            let Some(session) = sessions.get_mut(&duel_id) else {
                debug!(duel_id, player_id, connected, "Presence event for unknown duel");
                return;
            };
            // The bus redelivers; only state transitions are events.
            if session.connected.insert(player_id.to_string(), connected) == Some(connected) {
                return;
            }
            session.presence.clone()
        };
        let event = PresenceEvent { player_id: player_id.to_string(), connected };
        if let Err(e) = sender.try_send(event) {
            warn!(duel_id, player_id, "Dropping presence event: {e}");
        }
    }

    /// Drops the session, closing all of its channels. Idempotent.
    pub fn remove(&self, duel_id: i64) {
        self.sessions.lock().unwrap().remove(&duel_id);
    }

    /// Cancels every live duel; used on process shutdown.
    pub fn shutdown(&self) {
        let sessions = self.sessions.lock().unwrap();
        for session in sessions.values() {
            session.cancel.cancel();
        }
    }

    pub fn live_sessions(&self) -> usize {
        self.sessions.lock().unwrap().len()
    }

    /// Out-of-band notification sink for a user; notifications travel over
    /// the bus, the core never holds a socket.
    pub fn notifier(&self, user_id: &str) -> Arc<UserNotifier> {
        let mut notifiers = self.notifiers.lock().unwrap();
        notifiers
            .entry(user_id.to_string())
            .or_insert_with(|| {
                Arc::new(UserNotifier { user_id: user_id.to_string(), bus: self.bus.clone() })
            })
            .clone()
    }
}

pub struct UserNotifier {
    user_id: String,
    bus: Arc<dyn DuelBus>,
}

impl UserNotifier {
    pub async fn duel_request(&self, duel_id: i64, requester_id: &str) {
        let event = DuelEvent::duel_request_notification(duel_id, requester_id, &self.user_id);
        publish_event(self.bus.as_ref(), routing::NOTIFICATION, &event).await;
    }
}

#[cfg(test)]
mod tests {
    use anyhow::Result;
    use async_trait::async_trait;

    use super::*;

    struct NoopBus;

    #[async_trait]
    impl DuelBus for NoopBus {
        async fn publish(&self, _routing_key: &str, _payload: serde_json::Value) -> Result<()> {
            Ok(())
        }
    }

    fn registry() -> SessionRegistry {
        SessionRegistry::new(Arc::new(NoopBus))
    }

    fn answer(question_id: &str, answer: &str) -> AnswerEvent {
        AnswerEvent { question_id: question_id.into(), answer: answer.into() }
    }

    #[test]
    fn one_session_per_duel() {
        let registry = registry();
        let handles = registry.create(1, "ana", "ben").unwrap();
        assert_eq!(handles.answers.len(), 2);
        assert!(matches!(
            registry.create(1, "ana", "ben"),
            Err(DuelError::Conflict(_))
        ));
    }

    #[test]
    fn acceptance_signal_fires_once() {
        let registry = registry();
        let mut handles = registry.create(2, "ana", "ben").unwrap();

        assert!(registry.accept(2));
        assert!(!registry.accept(2));
        assert_eq!(handles.acceptance.try_recv().unwrap(), Acceptance::Accepted);
    }

    #[test]
    fn answers_reach_the_right_inbox() {
        let registry = registry();
        let mut handles = registry.create(3, "ana", "ben").unwrap();

        registry.forward_answer(3, "ana", answer("q-1", "4"));
        let mut inbox = handles.answers.remove("ana").unwrap();
        assert_eq!(inbox.try_recv().unwrap(), answer("q-1", "4"));
        assert!(handles.answers.remove("ben").unwrap().try_recv().is_err());
    }

    #[test]
    fn unknown_targets_drop_without_panicking() {
        let registry = registry();
        registry.forward_answer(99, "ana", answer("q-1", "4"));
        registry.mark_connected(99, "ana");
        registry.remove(99);
    }

    #[test]
    fn full_inbox_drops_the_overflow() {
        let registry = registry();
        let mut handles = registry.create(4, "ana", "ben").unwrap();

        for i in 0..ANSWER_INBOX_CAPACITY + 3 {
            registry.forward_answer(4, "ana", answer("q-1", &i.to_string()));
        }

        let mut inbox = handles.answers.remove("ana").unwrap();
        let mut received = 0;
        while inbox.try_recv().is_ok() {
            received += 1;
        }
        assert_eq!(received, ANSWER_INBOX_CAPACITY);
    }

    #[test]
    fn remove_closes_channels_idempotently() {
        let registry = registry();
        let mut handles = registry.create(5, "ana", "ben").unwrap();

        registry.remove(5);
        registry.remove(5);

        assert_eq!(registry.live_sessions(), 0);
        let mut inbox = handles.answers.remove("ana").unwrap();
        assert!(matches!(
            inbox.try_recv(),
            Err(mpsc::error::TryRecvError::Disconnected)
        ));
    }

    #[test]
    fn presence_events_buffer_until_the_orchestrator_reads() {
        let registry = registry();
        let mut handles = registry.create(6, "ana", "ben").unwrap();

        registry.mark_connected(6, "ana");
        // Redelivered connect events are not new transitions.
        registry.mark_connected(6, "ana");
        registry.mark_connected(6, "ben");
        registry.mark_disconnected(6, "ben");
        registry.mark_disconnected(6, "ben");

        let mut seen = Vec::new();
        while let Ok(event) = handles.presence.try_recv() {
            seen.push(event);
        }
        assert_eq!(
            seen,
            vec![
                PresenceEvent { player_id: "ana".into(), connected: true },
                PresenceEvent { player_id: "ben".into(), connected: true },
                PresenceEvent { player_id: "ben".into(), connected: false },
            ]
        );
    }
}
