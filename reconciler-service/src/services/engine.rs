//! Engine: serialized per-session event handling.
//!
//! Events for one session are processed to completion in arrival order
//! behind a fair per-session lock; unrelated sessions proceed in
//! parallel. A cancellation marks the session's token before queueing, so
//! events already waiting are discarded instead of racing an in-flight
//! confirmation.

use std::sync::Arc;

use bot_core::error::AppError;
use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};

use crate::models::draft::DraftKind;
use crate::models::event::{InboundEvent, OutboundEvent};
use crate::models::session::{Session, SessionState};
use crate::services::database::TaxonomySource;
use crate::services::gateway::LedgerGateway;
use crate::services::metrics::EVENTS_TOTAL;
use crate::services::reconciler::{ReconcileEvent, Reconciler};
use crate::services::session_store::SessionStore;
use crate::services::state_machine;

#[derive(Clone)]
struct SessionGate {
    lock: Arc<tokio::sync::Mutex<()>>,
    cancelled: CancellationToken,
}

impl SessionGate {
    fn new() -> Self {
        Self {
            lock: Arc::new(tokio::sync::Mutex::new(())),
            cancelled: CancellationToken::new(),
        }
    }
}

pub struct Engine {
    store: Arc<dyn SessionStore>,
    reconciler: Reconciler,
    gateway: LedgerGateway,
    taxonomy_source: Arc<dyn TaxonomySource>,
    gates: DashMap<String, SessionGate>,
    ttl: Duration,
}

impl Engine {
    pub fn new(
        store: Arc<dyn SessionStore>,
        reconciler: Reconciler,
        gateway: LedgerGateway,
        taxonomy_source: Arc<dyn TaxonomySource>,
        ttl: Duration,
    ) -> Self {
        Self {
            store,
            reconciler,
            gateway,
            taxonomy_source,
            gates: DashMap::new(),
            ttl,
        }
    }

    /// Handle one inbound event for a conversation thread and return the
    /// outbound events to present. `kind` only matters when the event
    /// starts a fresh session.
    #[instrument(skip(self, event), fields(session_id = %session_id))]
    pub async fn handle_event(
        &self,
        session_id: &str,
        user_id: &str,
        kind: DraftKind,
        event: InboundEvent,
    ) -> Result<Vec<OutboundEvent>, AppError> {
        let is_cancel = matches!(event, InboundEvent::CancelRequested);

        loop {
            let gate = self
                .gates
                .entry(session_id.to_string())
                .or_insert_with(SessionGate::new)
                .clone();

            if is_cancel {
                // Mark before taking the lock so queued events observe it
                // and short-circuit instead of landing after the cancel.
                gate.cancelled.cancel();
            }

            let _permit = gate.lock.lock().await;

            if gate.cancelled.is_cancelled() {
                let effects = if is_cancel {
                    self.cancel_session(session_id).await?
                } else {
                    vec![OutboundEvent::SessionClosed]
                };
                EVENTS_TOTAL.with_label_values(&["closed"]).inc();
                return Ok(effects);
            }

            // The sweeper may have dropped this gate while we waited;
            // serialization holds only for the gate currently in the map.
            let current = self
                .gates
                .get(session_id)
                .map(|g| Arc::ptr_eq(&g.lock, &gate.lock))
                .unwrap_or(false);
            if !current {
                continue;
            }

            let effects = self.process(session_id, user_id, kind, event).await?;
            EVENTS_TOTAL.with_label_values(&[event_label(&effects)]).inc();
            return Ok(effects);
        }
    }

    async fn cancel_session(&self, session_id: &str) -> Result<Vec<OutboundEvent>, AppError> {
        match self.store.get(session_id).await? {
            Some(mut session) => {
                if !session.state.is_terminal() {
                    session.state = SessionState::Cancelled;
                    session.touch();
                    self.store.save(&session).await?;
                }
                info!(session_id = %session_id, "session cancelled");
            }
            None => {
                self.gates.remove(session_id);
            }
        }
        Ok(vec![OutboundEvent::SessionClosed])
    }

    async fn process(
        &self,
        session_id: &str,
        user_id: &str,
        kind: DraftKind,
        event: InboundEvent,
    ) -> Result<Vec<OutboundEvent>, AppError> {
        let now = Utc::now();

        // Lazy expiry: a session idle past the TTL is gone even if the
        // sweeper has not reached it yet, and this event starts fresh.
        if let Some(session) = self.store.get(session_id).await? {
            if session.idle_longer_than(now, self.ttl) {
                self.expire_session(session).await?;
            }
        }

        let mut session = match self.store.get(session_id).await? {
            Some(session) => session,
            None => {
                let taxonomy = self.taxonomy_source.fetch().await?;
                self.store
                    .get_or_create(session_id, user_id, kind, taxonomy)
                    .await?
            }
        };

        if session.state.is_terminal() {
            return Ok(vec![OutboundEvent::SessionClosed]);
        }

        // Refresh the taxonomy snapshot on every reconciliation attempt; a
        // failed refresh keeps the previous snapshot.
        match self.taxonomy_source.fetch().await {
            Ok(taxonomy) => session.taxonomy = taxonomy,
            Err(e) => warn!(error = %e, "taxonomy refresh failed, keeping snapshot"),
        }

        let Some(reconcile_event) = map_event(&session, event) else {
            return Ok(vec![OutboundEvent::SessionClosed]);
        };

        let result = self.reconciler.interpret(&session, reconcile_event).await;
        let mut transition = state_machine::on_result(session.state, session.kind, result);

        if let Some(draft) = transition.new_draft.take() {
            session.draft = Some(draft);
        }
        session.state = transition.next_state;
        session.touch();

        let mut effects = transition.effects;

        if transition.commit {
            let outcome = self.gateway.commit(&session).await;
            let mut commit_transition = state_machine::on_commit_outcome(outcome);
            if let Some(draft) = commit_transition.new_draft.take() {
                session.draft = Some(draft);
            }
            session.state = commit_transition.next_state;
            effects.extend(commit_transition.effects);
        }

        // The transition only becomes observable once this write lands; a
        // crash before it is equivalent to the event never arriving.
        self.store.save(&session).await?;

        Ok(effects)
    }

    /// Mark and evict an idle session. Gates are left alone here; only the
    /// sweeper drops them, while holding the gate's own lock.
    async fn expire_session(&self, mut session: Session) -> Result<(), AppError> {
        if !session.state.is_terminal() {
            session.state = SessionState::Expired;
            self.store.save(&session).await?;
        }
        let session_id = session.session_id.clone();
        self.store.evict(&session_id).await?;
        info!(session_id = %session_id, "idle session expired");
        Ok(())
    }

    /// Evict every session idle past the TTL. Holds each session's gate
    /// while evicting so the sweep never runs concurrently with in-flight
    /// processing of the same session.
    #[instrument(skip(self))]
    pub async fn sweep_expired(&self, now: DateTime<Utc>) -> Result<Vec<String>, AppError> {
        let candidates = self.store.list_expired(now, self.ttl).await?;
        let mut evicted = Vec::new();

        for session_id in candidates {
            let gate = self
                .gates
                .entry(session_id.clone())
                .or_insert_with(SessionGate::new)
                .clone();
            let _permit = gate.lock.lock().await;

            let Some(session) = self.store.get(&session_id).await? else {
                self.gates.remove(&session_id);
                continue;
            };
            // The session may have been touched while we waited for the gate.
            if !session.idle_longer_than(now, self.ttl) {
                continue;
            }

            self.expire_session(session).await?;
            self.gates.remove(&session_id);
            evicted.push(session_id);
        }

        Ok(evicted)
    }

    /// Run the expiry sweep on a fixed interval until the task is aborted.
    pub fn spawn_sweeper(self: &Arc<Self>, every: std::time::Duration) -> tokio::task::JoinHandle<()> {
        let engine = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                if let Err(e) = engine.sweep_expired(Utc::now()).await {
                    warn!(error = %e, "session sweep failed");
                }
            }
        })
    }
}

/// Route an inbound event by session state: replies confirm or edit while
/// a draft is pending, answer the account question while one is owed, and
/// start extraction otherwise. `None` only for cancellation, which the
/// caller intercepts.
fn map_event(session: &Session, event: InboundEvent) -> Option<ReconcileEvent> {
    match event {
        InboundEvent::ImageReceived(bytes) => Some(ReconcileEvent::NewImage(bytes)),
        InboundEvent::TextReceived(text) | InboundEvent::ReplyReceived(text) => {
            Some(match session.state {
                SessionState::Created => ReconcileEvent::NewText(text),
                SessionState::AwaitingAccount => ReconcileEvent::AccountAnswer(text),
                _ => ReconcileEvent::Confirmation(text),
            })
        }
        InboundEvent::CancelRequested => None,
    }
}

fn event_label(effects: &[OutboundEvent]) -> &'static str {
    match effects.first() {
        Some(OutboundEvent::DraftPresented(_)) => "updated",
        Some(OutboundEvent::ValidationError(_)) => "refused",
        Some(OutboundEvent::AccountRequested) => "account_requested",
        Some(OutboundEvent::CommitSucceeded { .. }) => "committed",
        Some(OutboundEvent::CommitFailed { .. }) => "commit_failed",
        Some(OutboundEvent::SessionClosed) | None => "closed",
    }
}
