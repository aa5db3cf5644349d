use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::{Row, SqlitePool};

use crate::questions::Question;
use crate::rating::Rank;

use super::{Duel, DuelStatus, DuelStore, PlayerRecord, PlayerStore, QuestionStore};

pub async fn connect(url: &str) -> Result<SqlitePool> {
    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect(url)
        .await
        .with_context(|| format!("Failed to open store at {url}"))?;

    init_schema(&pool).await?;
    Ok(pool)
}

async fn init_schema(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS duels (
            id           INTEGER PRIMARY KEY,
            challenger_id TEXT NOT NULL,
            opponent_id  TEXT NOT NULL,
            category     TEXT NOT NULL,
            status       TEXT NOT NULL,
            winner_id    TEXT,
            created_at   TEXT NOT NULL,
            completed_at TEXT
        );

        CREATE TABLE IF NOT EXISTS players (
            player_id TEXT PRIMARY KEY,
            elo       INTEGER NOT NULL,
            rank      TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS questions (
            id       TEXT PRIMARY KEY,
            category TEXT NOT NULL,
            text     TEXT NOT NULL,
            answer   TEXT NOT NULL,
            options  TEXT NOT NULL,
            duration INTEGER NOT NULL
        );

        CREATE TABLE IF NOT EXISTS counters (
            id  TEXT PRIMARY KEY,
            seq INTEGER NOT NULL
        );
        "#,
    )
    .execute(pool)
    .await
    .context("Failed to initialize store schema")?;

    Ok(())
}

#[derive(Clone)]
pub struct SqliteDuelStore {
    pool: SqlitePool,
}

impl SqliteDuelStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl DuelStore for SqliteDuelStore {
    async fn next_id(&self) -> Result<i64> {
        let mut tx = self
            .pool
            .begin()
            .await
            .context("Failed to start counter transaction")?;

        sqlx::query("INSERT INTO counters (id, seq) VALUES ('duel_id', 0) ON CONFLICT(id) DO NOTHING")
            .execute(&mut tx)
            .await
            .context("Failed to seed the duel id counter")?;
        sqlx::query("UPDATE counters SET seq = seq + 1 WHERE id = 'duel_id'")
            .execute(&mut tx)
            .await
            .context("Failed to advance the duel id counter")?;
        let row = sqlx::query("SELECT seq FROM counters WHERE id = 'duel_id'")
            .fetch_one(&mut tx)
            .await
            .context("Failed to read the duel id counter")?;

        tx.commit().await.context("Failed to commit the duel id counter")?;
        Ok(row.try_get("seq")?)
    }

    async fn create(&self, duel: &Duel) -> Result<()> {
        sqlx::query(
            "INSERT INTO duels (id, challenger_id, opponent_id, category, status, winner_id, created_at, completed_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(duel.id)
        .bind(&duel.challenger_id)
        .bind(&duel.opponent_id)
        .bind(&duel.category)
        .bind(duel.status.as_str())
        .bind(duel.winner_id.as_deref())
        .bind(duel.created_at)
        .bind(duel.completed_at)
        .execute(&self.pool)
        .await
        .with_context(|| format!("Failed to create duel {}", duel.id))?;

        Ok(())
    }

    async fn get(&self, duel_id: i64) -> Result<Option<Duel>> {
        let row = sqlx::query("SELECT * FROM duels WHERE id = ?")
            .bind(duel_id)
            .fetch_optional(&self.pool)
            .await
            .with_context(|| format!("Failed to fetch duel {duel_id}"))?;

        let Some(row) = row else {
            return Ok(None);
        };

        let status: String = row.try_get("status")?;
        Ok(Some(Duel {
            id: row.try_get("id")?,
            challenger_id: row.try_get("challenger_id")?,
            opponent_id: row.try_get("opponent_id")?,
            category: row.try_get("category")?,
            status: DuelStatus::parse(&status)
                .with_context(|| format!("Duel {duel_id} has unknown status {status:?}"))?,
            winner_id: row.try_get("winner_id")?,
            created_at: row.try_get::<DateTime<Utc>, _>("created_at")?,
            completed_at: row.try_get::<Option<DateTime<Utc>>, _>("completed_at")?,
        }))
    }

    async fn update_status(
        &self,
        duel_id: i64,
        status: DuelStatus,
        winner_id: Option<&str>,
    ) -> Result<()> {
        let completed_at = (status == DuelStatus::Completed).then(Utc::now);

        sqlx::query(
            "UPDATE duels
             SET status = ?,
                 winner_id = COALESCE(?, winner_id),
                 completed_at = COALESCE(?, completed_at)
             WHERE id = ?",
        )
        .bind(status.as_str())
        .bind(winner_id)
        .bind(completed_at)
        .bind(duel_id)
        .execute(&self.pool)
        .await
        .with_context(|| format!("Failed to update duel {duel_id} to {}", status.as_str()))?;

        Ok(())
    }
}

#[derive(Clone)]
pub struct SqlitePlayerStore {
    pool: SqlitePool,
}

impl SqlitePlayerStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl PlayerStore for SqlitePlayerStore {
    async fn get(&self, player_id: &str) -> Result<PlayerRecord> {
        let row = sqlx::query("SELECT elo, rank FROM players WHERE player_id = ?")
            .bind(player_id)
            .fetch_optional(&self.pool)
            .await
            .with_context(|| format!("Failed to fetch player {player_id}"))?;

        let Some(row) = row else {
            return Ok(PlayerRecord::with_defaults(player_id));
        };

        let elo: i64 = row.try_get("elo")?;
        let rank: String = row.try_get("rank")?;
        Ok(PlayerRecord {
            player_id: player_id.to_string(),
            elo,
            // A rank written by an older bucket table is rederived from elo.
            rank: rank.parse().unwrap_or_else(|_| Rank::of(elo)),
        })
    }

    async fn upsert(&self, player: &PlayerRecord) -> Result<()> {
        sqlx::query(
            "INSERT INTO players (player_id, elo, rank) VALUES (?, ?, ?)
             ON CONFLICT(player_id) DO UPDATE SET
                 elo = excluded.elo,
                 rank = excluded.rank",
        )
        .bind(&player.player_id)
        .bind(player.elo)
        .bind(player.rank.as_str())
        .execute(&self.pool)
        .await
        .with_context(|| format!("Failed to upsert player {}", player.player_id))?;

        Ok(())
    }
}

#[derive(Clone)]
pub struct SqliteQuestionStore {
    pool: SqlitePool,
}

impl SqliteQuestionStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl QuestionStore for SqliteQuestionStore {
    async fn sample(&self, category: &str, limit: usize) -> Result<Vec<Question>> {
        let rows = sqlx::query(
            "SELECT id, category, text, answer, options, duration
             FROM questions WHERE category = ?
             ORDER BY RANDOM() LIMIT ?",
        )
        .bind(category)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .with_context(|| format!("Failed to sample questions for category {category}"))?;

        let mut questions = Vec::with_capacity(rows.len());
        for row in rows {
            let options: String = row.try_get("options")?;
            questions.push(Question {
                id: row.try_get("id")?,
                category: row.try_get("category")?,
                text: row.try_get("text")?,
                answer: row.try_get("answer")?,
                options: serde_json::from_str(&options)
                    .context("Question options column is not a JSON string array")?,
                duration: row.try_get::<i64, _>("duration")?.max(0) as u64,
            });
        }

        Ok(questions)
    }
}
