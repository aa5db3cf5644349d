use std::future::Future;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::questions::Question;
use crate::rating::{Rank, DEFAULT_ELO};

pub mod sqlite;

/// Every store call the core makes is bounded; a wedged store must not
/// wedge a duel or an HTTP reply.
pub const CALL_TIMEOUT: Duration = Duration::from_secs(5);

pub async fn bounded<T>(fut: impl Future<Output = Result<T>>) -> Result<T> {
    match tokio::time::timeout(CALL_TIMEOUT, fut).await {
        Ok(result) => result,
        Err(_) => anyhow::bail!("store call timed out after {CALL_TIMEOUT:?}"),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DuelStatus {
    Pending,
    Accepted,
    Completed,
    Cancelled,
}

impl DuelStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            DuelStatus::Pending => "pending",
            DuelStatus::Accepted => "accepted",
            DuelStatus::Completed => "completed",
            DuelStatus::Cancelled => "cancelled",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(DuelStatus::Pending),
            "accepted" => Some(DuelStatus::Accepted),
            "completed" => Some(DuelStatus::Completed),
            "cancelled" => Some(DuelStatus::Cancelled),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Duel {
    pub id: i64,
    pub challenger_id: String,
    pub opponent_id: String,
    pub category: String,
    pub status: DuelStatus,
    pub winner_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl Duel {
    pub fn pending(id: i64, challenger_id: &str, opponent_id: &str, category: &str) -> Self {
        Duel {
            id,
            challenger_id: challenger_id.to_string(),
            opponent_id: opponent_id.to_string(),
            category: category.to_string(),
            status: DuelStatus::Pending,
            winner_id: None,
            created_at: Utc::now(),
            completed_at: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlayerRecord {
    pub player_id: String,
    pub elo: i64,
    pub rank: Rank,
}

impl PlayerRecord {
    /// A player that has never dueled before.
    pub fn with_defaults(player_id: &str) -> Self {
        PlayerRecord {
            player_id: player_id.to_string(),
            elo: DEFAULT_ELO,
            rank: Rank::of(DEFAULT_ELO),
        }
    }
}

#[async_trait]
pub trait DuelStore: Send + Sync {
    /// Strictly monotonic duel id backed by a persisted counter.
    async fn next_id(&self) -> Result<i64>;
    async fn create(&self, duel: &Duel) -> Result<()>;
    async fn get(&self, duel_id: i64) -> Result<Option<Duel>>;
    async fn update_status(
        &self,
        duel_id: i64,
        status: DuelStatus,
        winner_id: Option<&str>,
    ) -> Result<()>;
}

#[async_trait]
pub trait PlayerStore: Send + Sync {
    /// Unknown players materialize with default elo and rank.
    async fn get(&self, player_id: &str) -> Result<PlayerRecord>;
    async fn upsert(&self, player: &PlayerRecord) -> Result<()>;
}

#[async_trait]
pub trait QuestionStore: Send + Sync {
    /// Up to `limit` questions of the category, in random order.
    async fn sample(&self, category: &str, limit: usize) -> Result<Vec<Question>>;
}
