use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicUsize, Ordering};
use std::sync::Mutex;

use anyhow::{bail, Result};
use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;
use tokio::sync::broadcast;

use quizduel::bus::DuelBus;
use quizduel::questions::Question;
use quizduel::store::{Duel, DuelStatus, DuelStore, PlayerRecord, PlayerStore, QuestionStore};

/// Records every published event and fans it out to test subscribers.
pub struct MemoryBus {
    tx: broadcast::Sender<(String, Value)>,
    published: Mutex<Vec<(String, Value)>>,
}

impl MemoryBus {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(256);
        Self { tx, published: Mutex::new(Vec::new()) }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<(String, Value)> {
        self.tx.subscribe()
    }

    pub fn published(&self) -> Vec<(String, Value)> {
        self.published.lock().unwrap().clone()
    }

    pub fn count(&self, routing_key: &str) -> usize {
        self.published
            .lock()
            .unwrap()
            .iter()
            .filter(|(key, _)| key == routing_key)
            .count()
    }
}

#[async_trait]
impl DuelBus for MemoryBus {
    async fn publish(&self, routing_key: &str, payload: Value) -> Result<()> {
        self.published.lock().unwrap().push((routing_key.to_string(), payload.clone()));
        // No subscribers is fine; tests subscribe only when they care.
        let _ = self.tx.send((routing_key.to_string(), payload));
        Ok(())
    }
}

pub struct MemoryDuelStore {
    duels: Mutex<HashMap<i64, Duel>>,
    counter: AtomicI64,
}

impl MemoryDuelStore {
    pub fn new() -> Self {
        Self { duels: Mutex::new(HashMap::new()), counter: AtomicI64::new(0) }
    }

    pub fn duel(&self, duel_id: i64) -> Option<Duel> {
        self.duels.lock().unwrap().get(&duel_id).cloned()
    }
}

#[async_trait]
impl DuelStore for MemoryDuelStore {
    async fn next_id(&self) -> Result<i64> {
        Ok(self.counter.fetch_add(1, Ordering::SeqCst) + 1)
    }

    async fn create(&self, duel: &Duel) -> Result<()> {
        self.duels.lock().unwrap().insert(duel.id, duel.clone());
        Ok(())
    }

    async fn get(&self, duel_id: i64) -> Result<Option<Duel>> {
        Ok(self.duels.lock().unwrap().get(&duel_id).cloned())
    }

    async fn update_status(
        &self,
        duel_id: i64,
        status: DuelStatus,
        winner_id: Option<&str>,
    ) -> Result<()> {
        let mut duels = self.duels.lock().unwrap();
        let Some(duel) = duels.get_mut(&duel_id) else {
            bail!("duel {duel_id} does not exist");
        };
        duel.status = status;
        if let Some(winner_id) = winner_id {
            duel.winner_id = Some(winner_id.to_string());
        }
        if status == DuelStatus::Completed {
            duel.completed_at = Some(Utc::now());
        }
        Ok(())
    }
}

pub struct MemoryPlayerStore {
    players: Mutex<HashMap<String, PlayerRecord>>,
    upserts: AtomicUsize,
}

impl MemoryPlayerStore {
    pub fn new() -> Self {
        Self { players: Mutex::new(HashMap::new()), upserts: AtomicUsize::new(0) }
    }

    pub fn seed(&self, record: PlayerRecord) {
        self.players.lock().unwrap().insert(record.player_id.clone(), record);
    }

    pub fn upsert_count(&self) -> usize {
        self.upserts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PlayerStore for MemoryPlayerStore {
    async fn get(&self, player_id: &str) -> Result<PlayerRecord> {
        Ok(self
            .players
            .lock()
            .unwrap()
            .get(player_id)
            .cloned()
            .unwrap_or_else(|| PlayerRecord::with_defaults(player_id)))
    }

    async fn upsert(&self, player: &PlayerRecord) -> Result<()> {
        self.upserts.fetch_add(1, Ordering::SeqCst);
        self.players.lock().unwrap().insert(player.player_id.clone(), player.clone());
        Ok(())
    }
}

pub struct MemoryQuestionStore {
    questions: Vec<Question>,
    fail: AtomicBool,
}

impl MemoryQuestionStore {
    pub fn new(questions: Vec<Question>) -> Self {
        Self { questions, fail: AtomicBool::new(false) }
    }

    #[allow(dead_code)]
    pub fn fail_lookups(&self) {
        self.fail.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl QuestionStore for MemoryQuestionStore {
    async fn sample(&self, category: &str, limit: usize) -> Result<Vec<Question>> {
        if self.fail.load(Ordering::SeqCst) {
            bail!("question store down");
        }
        Ok(self
            .questions
            .iter()
            .filter(|q| q.category == category)
            .take(limit)
            .cloned()
            .collect())
    }
}

#[allow(dead_code)]
pub fn question(id: &str, category: &str, answer: &str, duration: u64) -> Question {
    Question {
        id: id.to_string(),
        category: category.to_string(),
        text: format!("Pregunta {id}"),
        answer: answer.to_string(),
        options: vec![
            answer.to_string(),
            "opción 2".to_string(),
            "opción 3".to_string(),
            "opción 4".to_string(),
        ],
        duration,
    }
}

#[allow(dead_code)]
pub fn rated_player(player_id: &str, elo: i64) -> PlayerRecord {
    PlayerRecord { player_id: player_id.to_string(), elo, rank: quizduel::rating::Rank::of(elo) }
}
