use std::cmp::Ordering;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::{self, Instant};
use tracing::{error, info, warn};

use crate::bus::{publish_event, DuelBus};
use crate::config::DuelSettings;
use crate::events::{routing, DuelEvent, DuelResults, EloChange};
use crate::questions::{Question, QuestionProvider};
use crate::rating::{self, Outcome, Rank};
use crate::session::{AnswerEvent, PresenceEvent, SessionHandles, SessionRegistry};
use crate::store::{self, Duel, DuelStatus, DuelStore, PlayerRecord, PlayerStore};

/// Gateway plumbing the clients emit alongside real answers. Non-answers:
/// they neither score nor consume the round.
const CONTROL_MESSAGES: &[&str] =
    &["", "ping", "connection_heartbeat", "connection_test", "ready_check"];

fn is_control_message(answer: &str) -> bool {
    CONTROL_MESSAGES.contains(&answer)
}

#[derive(Debug, Clone, PartialEq)]
enum RoundAnswer {
    Answered { text: String, elapsed_seconds: f64 },
    TimedOut,
}

/// Correct answers earn 10 plus one point per full second left on the
/// clock; anything else consumed, including the timeout, costs 5.
fn score_round(question: &Question, answer: &RoundAnswer) -> i64 {
    match answer {
        RoundAnswer::Answered { text, elapsed_seconds } if *text == question.answer => {
            let bonus = (question.duration as f64 - elapsed_seconds) as i64;
            10 + bonus.max(0)
        }
        _ => -5,
    }
}

/// One side of the duel as the orchestrator tracks it.
struct PlayerSide {
    record: PlayerRecord,
    score: i64,
}

impl PlayerSide {
    fn new(record: PlayerRecord) -> Self {
        Self { record, score: 0 }
    }
}

/// Removes the session on every exit path, including panics, so a duel's
/// resources are released exactly once.
struct TeardownGuard {
    registry: Arc<SessionRegistry>,
    duel_id: i64,
}

impl Drop for TeardownGuard {
    fn drop(&mut self) {
        self.registry.remove(self.duel_id);
    }
}

/// The per-duel state machine. One instance, one task, one duel.
pub struct DuelOrchestrator {
    duel_id: i64,
    settings: DuelSettings,
    bus: Arc<dyn DuelBus>,
    duels: Arc<dyn DuelStore>,
    players: Arc<dyn PlayerStore>,
    questions: QuestionProvider,
    registry: Arc<SessionRegistry>,
}

impl DuelOrchestrator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        duel_id: i64,
        settings: DuelSettings,
        bus: Arc<dyn DuelBus>,
        duels: Arc<dyn DuelStore>,
        players: Arc<dyn PlayerStore>,
        questions: QuestionProvider,
        registry: Arc<SessionRegistry>,
    ) -> Self {
        Self { duel_id, settings, bus, duels, players, questions, registry }
    }

    pub async fn run(self, mut handles: SessionHandles) {
        let _teardown = TeardownGuard { registry: self.registry.clone(), duel_id: self.duel_id };

        let duel = match store::bounded(self.duels.get(self.duel_id)).await {
            Ok(Some(duel)) if duel.status == DuelStatus::Accepted => duel,
            Ok(Some(duel)) => {
                warn!(
                    duel_id = self.duel_id,
                    status = duel.status.as_str(),
                    "Refusing to run a duel that is not in accepted state"
                );
                return;
            }
            Ok(None) => {
                error!(duel_id = self.duel_id, "Duel vanished before the orchestrator started");
                return;
            }
            Err(e) => {
                error!(duel_id = self.duel_id, "Failed to load duel: {e:#}");
                self.abort("El duelo fue cancelado.").await;
                return;
            }
        };

        let challenger = match store::bounded(self.players.get(&duel.challenger_id)).await {
            Ok(record) => PlayerSide::new(record),
            Err(e) => {
                error!(duel_id = self.duel_id, "Failed to load challenger: {e:#}");
                self.abort("El duelo fue cancelado.").await;
                return;
            }
        };
        let opponent = match store::bounded(self.players.get(&duel.opponent_id)).await {
            Ok(record) => PlayerSide::new(record),
            Err(e) => {
                error!(duel_id = self.duel_id, "Failed to load opponent: {e:#}");
                self.abort("El duelo fue cancelado.").await;
                return;
            }
        };

        let questions = self.questions.questions_for_duel(&duel.category).await;
        if questions.is_empty() {
            error!(duel_id = self.duel_id, category = %duel.category, "No questions available");
            self.abort("El duelo fue cancelado.").await;
            return;
        }

        let Some(challenger_inbox) = handles.answers.remove(&duel.challenger_id) else {
            error!(duel_id = self.duel_id, "Session has no inbox for the challenger");
            return;
        };
        let Some(opponent_inbox) = handles.answers.remove(&duel.opponent_id) else {
            error!(duel_id = self.duel_id, "Session has no inbox for the opponent");
            return;
        };

        info!(
            duel_id = self.duel_id,
            challenger = %duel.challenger_id,
            opponent = %duel.opponent_id,
            rounds = questions.len(),
            "Duel starting"
        );

        let max_duration = questions.iter().map(|q| q.duration).max().unwrap_or(0);
        let overall = self.settings.overall_deadline(questions.len(), max_duration);
        let cancel = handles.cancel.clone();

        let outcome = tokio::select! {
            outcome = self.drive(
                &duel,
                &questions,
                challenger,
                opponent,
                handles.presence,
                challenger_inbox,
                opponent_inbox,
            ) => outcome,
            _ = cancel.cancelled() => Err("El duelo fue cancelado."),
            _ = time::sleep(overall) => {
                warn!(duel_id = self.duel_id, "Duel exceeded its overall deadline");
                Err("El duelo fue cancelado.")
            }
        };

        if let Err(status_message) = outcome {
            self.abort(status_message).await;
        }
    }

    /// Readiness, rounds and settlement. An `Err` carries the status
    /// message the abort path broadcasts.
    #[allow(clippy::too_many_arguments)]
    async fn drive(
        &self,
        duel: &Duel,
        questions: &[Question],
        mut challenger: PlayerSide,
        mut opponent: PlayerSide,
        mut presence: mpsc::Receiver<PresenceEvent>,
        mut challenger_inbox: mpsc::Receiver<AnswerEvent>,
        mut opponent_inbox: mpsc::Receiver<AnswerEvent>,
    ) -> Result<(), &'static str> {
        self.publish_status("Esperando a los jugadores...").await;

        if !self.wait_for_players(duel, &mut presence).await {
            info!(duel_id = self.duel_id, "A player never connected, aborting");
            return Err("El oponente no se conectó a tiempo. Duelo cancelado.");
        }

        self.publish_status("¡Duelo listo!").await;

        for question in questions {
            let (challenger_answer, opponent_answer) = self
                .run_round(question, &mut challenger_inbox, &mut opponent_inbox)
                .await;

            challenger.score += score_round(question, &challenger_answer);
            opponent.score += score_round(question, &opponent_answer);

            info!(
                duel_id = self.duel_id,
                question_id = %question.id,
                challenger_score = challenger.score,
                opponent_score = opponent.score,
                "Round scored"
            );
        }

        self.settle(duel, challenger, opponent).await;
        Ok(())
    }

    /// Both players must connect before the readiness deadline. A player
    /// who connects and drops again before the deadline is not ready.
    async fn wait_for_players(
        &self,
        duel: &Duel,
        presence: &mut mpsc::Receiver<PresenceEvent>,
    ) -> bool {
        let deadline = Instant::now() + self.settings.readiness_timeout();
        let mut connected: HashSet<String> = HashSet::new();

        while !(connected.contains(&duel.challenger_id) && connected.contains(&duel.opponent_id)) {
            match time::timeout_at(deadline, presence.recv()).await {
                Err(_) => return false,
                Ok(None) => return false,
                Ok(Some(PresenceEvent { player_id, connected: true })) => {
                    info!(duel_id = self.duel_id, %player_id, "Player connected");
                    connected.insert(player_id);
                }
                Ok(Some(PresenceEvent { player_id, connected: false })) => {
                    info!(duel_id = self.duel_id, %player_id, "Player disconnected");
                    connected.remove(&player_id);
                }
            }
        }
        true
    }

    /// Broadcasts the question and collects at most one answer per player
    /// within the half-open window [start, start + duration + grace).
    async fn run_round(
        &self,
        question: &Question,
        challenger_inbox: &mut mpsc::Receiver<AnswerEvent>,
        opponent_inbox: &mut mpsc::Receiver<AnswerEvent>,
    ) -> (RoundAnswer, RoundAnswer) {
        let event = DuelEvent::question(self.duel_id, question);
        publish_event(self.bus.as_ref(), routing::QUESTION, &event).await;

        let started = Instant::now();
        let deadline =
            started + Duration::from_secs(question.duration) + self.settings.round_grace();

        tokio::join!(
            collect_answer(challenger_inbox, &question.id, started, deadline),
            collect_answer(opponent_inbox, &question.id, started, deadline),
        )
    }

    async fn settle(&self, duel: &Duel, challenger: PlayerSide, opponent: PlayerSide) {
        let (challenger_outcome, opponent_outcome, winner_id) =
            match challenger.score.cmp(&opponent.score) {
                Ordering::Greater => {
                    (Outcome::Win, Outcome::Loss, Some(duel.challenger_id.clone()))
                }
                Ordering::Less => (Outcome::Loss, Outcome::Win, Some(duel.opponent_id.clone())),
                Ordering::Equal => (Outcome::Draw, Outcome::Draw, None),
            };

        // Both deltas come from the same pre-duel elo pair.
        let challenger_elo = EloChange::new(
            challenger.record.elo,
            rating::new_elo(challenger.record.elo, opponent.record.elo, challenger_outcome),
        );
        let opponent_elo = EloChange::new(
            opponent.record.elo,
            rating::new_elo(opponent.record.elo, challenger.record.elo, opponent_outcome),
        );

        let challenger_record = PlayerRecord {
            player_id: duel.challenger_id.clone(),
            elo: challenger_elo.current,
            rank: Rank::of(challenger_elo.current),
        };
        let opponent_record = PlayerRecord {
            player_id: duel.opponent_id.clone(),
            elo: opponent_elo.current,
            rank: Rank::of(opponent_elo.current),
        };

        self.upsert_with_retry(&challenger_record).await;
        self.upsert_with_retry(&opponent_record).await;
        self.update_duel_with_retry(DuelStatus::Completed, winner_id.as_deref()).await;

        let results = DuelResults {
            player1_id: duel.challenger_id.clone(),
            player2_id: duel.opponent_id.clone(),
            player1_score: challenger.score,
            player2_score: opponent.score,
            player1_elo: challenger_elo,
            player2_elo: opponent_elo,
            player1_rank: challenger_record.rank,
            player2_rank: opponent_record.rank,
            is_draw: winner_id.is_none(),
            winner_id: winner_id.clone().unwrap_or_default(),
        };
        let event = DuelEvent::results(self.duel_id, &results);
        publish_event(self.bus.as_ref(), routing::RESULTS, &event).await;

        info!(
            duel_id = self.duel_id,
            winner = winner_id.as_deref().unwrap_or("draw"),
            challenger_score = challenger.score,
            opponent_score = opponent.score,
            "Duel settled"
        );
    }

    /// Settlement writes are best-effort with a single retry; the results
    /// event is the clients' source of truth either way.
    async fn upsert_with_retry(&self, record: &PlayerRecord) {
        if let Err(e) = store::bounded(self.players.upsert(record)).await {
            warn!(player_id = %record.player_id, "Player upsert failed, retrying: {e:#}");
            if let Err(e) = store::bounded(self.players.upsert(record)).await {
                error!(player_id = %record.player_id, "Giving up on player upsert: {e:#}");
            }
        }
    }

    async fn update_duel_with_retry(&self, status: DuelStatus, winner_id: Option<&str>) {
        if let Err(e) =
            store::bounded(self.duels.update_status(self.duel_id, status, winner_id)).await
        {
            warn!(duel_id = self.duel_id, "Duel update failed, retrying: {e:#}");
            if let Err(e) =
                store::bounded(self.duels.update_status(self.duel_id, status, winner_id)).await
            {
                error!(duel_id = self.duel_id, "Giving up on duel update: {e:#}");
            }
        }
    }

    async fn publish_status(&self, message: &str) {
        let event = DuelEvent::status(self.duel_id, message);
        publish_event(self.bus.as_ref(), routing::STATUS, &event).await;
    }

    /// Abort path: tell the clients, mark the duel cancelled, leave ratings
    /// untouched.
    async fn abort(&self, status_message: &str) {
        self.publish_status(status_message).await;
        self.update_duel_with_retry(DuelStatus::Cancelled, None).await;
    }
}

/// Waits for this player's answer to the outstanding question. Control
/// messages, duplicates of consumed answers and answers to other questions
/// are discarded without ending the wait.
async fn collect_answer(
    inbox: &mut mpsc::Receiver<AnswerEvent>,
    question_id: &str,
    started: Instant,
    deadline: Instant,
) -> RoundAnswer {
    loop {
        match time::timeout_at(deadline, inbox.recv()).await {
            Err(_) => return RoundAnswer::TimedOut,
            Ok(None) => return RoundAnswer::TimedOut,
            Ok(Some(event)) => {
                if event.question_id != question_id {
                    continue;
                }
                if is_control_message(&event.answer) {
                    continue;
                }
                return RoundAnswer::Answered {
                    text: event.answer,
                    elapsed_seconds: started.elapsed().as_secs_f64(),
                };
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn question(answer: &str, duration: u64) -> Question {
        Question {
            id: "q-1".into(),
            category: "matematica".into(),
            text: "¿Cuánto es 2 + 2?".into(),
            answer: answer.into(),
            options: vec!["3".into(), "4".into(), "5".into(), "6".into()],
            duration,
        }
    }

    fn answered(text: &str, elapsed_seconds: f64) -> RoundAnswer {
        RoundAnswer::Answered { text: text.into(), elapsed_seconds }
    }

    #[test]
    fn control_messages_are_not_answers() {
        for control in ["", "ping", "connection_heartbeat", "connection_test", "ready_check"] {
            assert!(is_control_message(control));
        }
        assert!(!is_control_message("4"));
        assert!(!is_control_message("timeout"));
        assert!(!is_control_message("PING"));
    }

    #[test]
    fn correct_answers_earn_base_plus_time_bonus() {
        let q = question("4", 30);
        assert_eq!(score_round(&q, &answered("4", 5.0)), 35);
        assert_eq!(score_round(&q, &answered("4", 0.0)), 40);
        // Partial seconds truncate toward zero, like the clock display.
        assert_eq!(score_round(&q, &answered("4", 5.4)), 34);
    }

    #[test]
    fn bonus_floors_at_zero_once_the_clock_runs_out() {
        let q = question("4", 10);
        assert_eq!(score_round(&q, &answered("4", 10.0)), 10);
        assert_eq!(score_round(&q, &answered("4", 13.9)), 10);
    }

    #[test]
    fn wrong_answers_and_timeouts_cost_five() {
        let q = question("4", 30);
        assert_eq!(score_round(&q, &answered("5", 1.0)), -5);
        assert_eq!(score_round(&q, &RoundAnswer::TimedOut), -5);
        // Exact match only; no case folding.
        assert_eq!(score_round(&question("Paris", 10), &answered("paris", 1.0)), -5);
    }
}
