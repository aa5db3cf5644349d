use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::questions::Question;
use crate::rating::Rank;

/// Routing keys on the `duels.topic` exchange.
pub mod routing {
    pub const QUESTION: &str = "duel.websocket.question";
    pub const STATUS: &str = "duel.websocket.status";
    pub const RESULTS: &str = "duel.websocket.results";
    pub const NOTIFICATION: &str = "duel.websocket.notification";

    pub const ANSWER_SUBMITTED: &str = "duel.answer.submitted";
    pub const PLAYER_CONNECTED: &str = "duel.player.connected";
    pub const PLAYER_DISCONNECTED: &str = "duel.player.disconnected";

    pub const INBOUND: &[&str] = &[ANSWER_SUBMITTED, PLAYER_CONNECTED, PLAYER_DISCONNECTED];
}

/// Envelope of every event published towards the gateway.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DuelEvent {
    #[serde(rename = "type")]
    pub event_type: String,
    #[serde(rename = "duelId")]
    pub duel_id: String,
    #[serde(rename = "userId", skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl DuelEvent {
    pub fn question(duel_id: i64, question: &Question) -> Self {
        DuelEvent {
            event_type: "question".into(),
            duel_id: duel_id.to_string(),
            user_id: None,
            data: serde_json::to_value(QuestionPayload::from(question)).ok(),
            message: None,
        }
    }

    pub fn status(duel_id: i64, message: impl Into<String>) -> Self {
        DuelEvent {
            event_type: "status".into(),
            duel_id: duel_id.to_string(),
            user_id: None,
            data: None,
            message: Some(message.into()),
        }
    }

    pub fn results(duel_id: i64, results: &DuelResults) -> Self {
        DuelEvent {
            event_type: "results".into(),
            duel_id: duel_id.to_string(),
            user_id: None,
            data: serde_json::to_value(results).ok(),
            message: None,
        }
    }

    pub fn duel_request_notification(duel_id: i64, requester_id: &str, opponent_id: &str) -> Self {
        let notification = serde_json::json!({
            "userId": opponent_id,
            "notification": {
                "type": "duel_request",
                "duelId": duel_id.to_string(),
                "requesterId": requester_id,
                "requesterName": requester_id,
                "timestamp": Utc::now().timestamp(),
            },
        });
        DuelEvent {
            event_type: "notification".into(),
            duel_id: duel_id.to_string(),
            user_id: Some(opponent_id.to_string()),
            data: Some(notification),
            message: None,
        }
    }
}

/// The question as broadcast to clients. The correct answer stays out of
/// this payload; it only ever leaves the core through scoring.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuestionPayload {
    pub id: String,
    pub text: String,
    pub options: Vec<String>,
    pub duration: u64,
}

impl From<&Question> for QuestionPayload {
    fn from(q: &Question) -> Self {
        QuestionPayload {
            id: q.id.clone(),
            text: q.text.clone(),
            options: q.options.clone(),
            duration: q.duration,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EloChange {
    pub previous: i64,
    pub current: i64,
    pub change: i64,
}

impl EloChange {
    pub fn new(previous: i64, current: i64) -> Self {
        EloChange { previous, current, change: current - previous }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DuelResults {
    pub player1_id: String,
    pub player2_id: String,
    pub player1_score: i64,
    pub player2_score: i64,
    pub player1_elo: EloChange,
    pub player2_elo: EloChange,
    pub player1_rank: Rank,
    pub player2_rank: Rank,
    pub is_draw: bool,
    /// Empty string on a draw.
    pub winner_id: String,
}

/// Inbound gateway → core messages.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnswerSubmitted {
    #[serde(rename = "duelId")]
    pub duel_id: String,
    #[serde(rename = "userId")]
    pub user_id: String,
    #[serde(rename = "questionId")]
    pub question_id: String,
    pub answer: String,
    #[serde(default)]
    pub timestamp: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlayerPresence {
    #[serde(rename = "duelId")]
    pub duel_id: String,
    #[serde(rename = "userId")]
    pub user_id: String,
    #[serde(default)]
    pub timestamp: f64,
}
