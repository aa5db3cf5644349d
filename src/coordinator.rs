use std::sync::Arc;

use tokio::time;
use tracing::{info, warn};

use crate::bus::{publish_event, DuelBus};
use crate::config::Settings;
use crate::error::DuelError;
use crate::events::{routing, DuelEvent};
use crate::orchestrator::DuelOrchestrator;
use crate::questions::{is_known_category, Category, QuestionProvider, CATEGORIES};
use crate::session::{Acceptance, SessionHandles, SessionRegistry};
use crate::store::{self, Duel, DuelStatus, DuelStore, PlayerRecord, PlayerStore};

/// Façade the HTTP adapter talks to. Owns duel admission and the session
/// lifecycle; everything mid-duel belongs to the orchestrator.
pub struct RequestCoordinator {
    settings: Settings,
    duels: Arc<dyn DuelStore>,
    players: Arc<dyn PlayerStore>,
    provider: QuestionProvider,
    bus: Arc<dyn DuelBus>,
    registry: Arc<SessionRegistry>,
}

impl RequestCoordinator {
    pub fn new(
        settings: Settings,
        duels: Arc<dyn DuelStore>,
        players: Arc<dyn PlayerStore>,
        provider: QuestionProvider,
        bus: Arc<dyn DuelBus>,
        registry: Arc<SessionRegistry>,
    ) -> Self {
        Self { settings, duels, players, provider, bus, registry }
    }

    /// Persists a pending duel under a fresh monotonic id, opens its
    /// session and notifies the opponent. Multiple pending duels between
    /// the same pair are allowed.
    pub async fn request_duel(
        &self,
        requester_id: &str,
        opponent_id: &str,
        category: &str,
    ) -> Result<i64, DuelError> {
        if requester_id.is_empty() || opponent_id.is_empty() {
            return Err(DuelError::invalid("requester_id and opponent_id are required"));
        }
        if requester_id == opponent_id {
            return Err(DuelError::invalid("a player cannot duel themselves"));
        }
        if !is_known_category(category) {
            return Err(DuelError::invalid(format!("unknown category {category:?}")));
        }

        let duel_id = store::bounded(self.duels.next_id()).await.map_err(DuelError::store)?;
        let duel = Duel::pending(duel_id, requester_id, opponent_id, category);
        store::bounded(self.duels.create(&duel)).await.map_err(DuelError::store)?;

        let handles = self.registry.create(duel_id, requester_id, opponent_id)?;
        self.spawn_session_lifecycle(handles);

        // Fire and forget; a broken bus must not fail the request.
        let notifier = self.registry.notifier(opponent_id);
        let requester = requester_id.to_string();
        tokio::spawn(async move {
            notifier.duel_request(duel_id, &requester).await;
        });

        info!(duel_id, requester_id, opponent_id, category, "Duel requested");
        Ok(duel_id)
    }

    /// Flips a pending duel to accepted and fires the acceptance signal;
    /// the session lifecycle task starts the orchestrator after the grace
    /// delay. A duel whose session already expired is gone (404), even if
    /// its row still exists.
    pub async fn accept_duel(&self, duel_id: i64) -> Result<(), DuelError> {
        let duel = self.pending_duel(duel_id).await?;

        store::bounded(self.duels.update_status(duel.id, DuelStatus::Accepted, None))
            .await
            .map_err(DuelError::store)?;

        if !self.registry.accept(duel.id) {
            warn!(duel_id, "Acceptance signal had no listener");
        }
        info!(duel_id, "Duel accepted");
        Ok(())
    }

    /// Declines a pending duel: persists the cancellation and signals the
    /// lifecycle task, which informs the requester and tears down.
    pub async fn reject_duel(&self, duel_id: i64) -> Result<(), DuelError> {
        let duel = self.pending_duel(duel_id).await?;

        store::bounded(self.duels.update_status(duel.id, DuelStatus::Cancelled, None))
            .await
            .map_err(DuelError::store)?;

        self.registry.reject(duel.id);
        info!(duel_id, "Duel rejected");
        Ok(())
    }

    pub async fn get_player(&self, player_id: &str) -> Result<PlayerRecord, DuelError> {
        if player_id.is_empty() {
            return Err(DuelError::invalid("player id is required"));
        }
        store::bounded(self.players.get(player_id)).await.map_err(DuelError::store)
    }

    pub fn get_categories(&self) -> Vec<Category> {
        CATEGORIES.to_vec()
    }

    async fn pending_duel(&self, duel_id: i64) -> Result<Duel, DuelError> {
        if duel_id <= 0 {
            return Err(DuelError::invalid("duel id must be a positive integer"));
        }
        let duel = store::bounded(self.duels.get(duel_id))
            .await
            .map_err(DuelError::store)?
            .ok_or_else(|| DuelError::not_found(format!("duel {duel_id} does not exist")))?;

        match duel.status {
            DuelStatus::Pending => {}
            // Expired or declined duels are gone as far as callers care.
            DuelStatus::Cancelled => {
                return Err(DuelError::not_found(format!("duel {duel_id} has expired")));
            }
            status => {
                return Err(DuelError::conflict(format!(
                    "duel {duel_id} is {}, not pending",
                    status.as_str()
                )));
            }
        }
        if !self.registry.contains(duel_id) {
            return Err(DuelError::not_found(format!("duel {duel_id} has expired")));
        }
        Ok(duel)
    }

    /// One task per session, spawned at request time. It resolves the
    /// acceptance signal exactly once: into an orchestrator run, a
    /// rejection teardown, or an expiry teardown. This is the only place
    /// orchestrators are spawned, so a duel can never get two.
    fn spawn_session_lifecycle(&self, mut handles: SessionHandles) {
        let duel_id = handles.duel_id;
        let settings = self.settings.duel.clone();
        let bus = self.bus.clone();
        let duels = self.duels.clone();
        let players = self.players.clone();
        let provider = self.provider.clone();
        let registry = self.registry.clone();

        tokio::spawn(async move {
            match time::timeout(settings.readiness_timeout(), &mut handles.acceptance).await {
                Ok(Ok(Acceptance::Accepted)) => {
                    // Both clients get a moment to attach to the gateway.
                    time::sleep(settings.acceptance_grace()).await;
                    DuelOrchestrator::new(
                        duel_id, settings, bus, duels, players, provider, registry,
                    )
                    .run(handles)
                    .await;
                }
                Ok(Ok(Acceptance::Rejected)) => {
                    let event = DuelEvent::status(duel_id, "El duelo fue rechazado.");
                    publish_event(bus.as_ref(), routing::STATUS, &event).await;
                    registry.remove(duel_id);
                }
                Ok(Err(_)) => {
                    // Session was torn down elsewhere; nothing left to do.
                    registry.remove(duel_id);
                }
                Err(_) => {
                    info!(duel_id, "Duel was never accepted, expiring the session");
                    if let Err(e) = store::bounded(duels.update_status(
                        duel_id,
                        DuelStatus::Cancelled,
                        None,
                    ))
                    .await
                    {
                        warn!(duel_id, "Failed to mark expired duel cancelled: {e:#}");
                    }
                    let event = DuelEvent::status(duel_id, "El duelo no fue aceptado a tiempo.");
                    publish_event(bus.as_ref(), routing::STATUS, &event).await;
                    registry.remove(duel_id);
                }
            }
        });
    }
}
