//! Session model: durable state of one conversation thread.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::models::draft::{Draft, DraftKind};
use crate::models::taxonomy::Taxonomy;

/// Position of a conversation in the confirmation state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Created,
    AwaitingConfirmation,
    AwaitingAccount,
    Committed,
    Expired,
    Cancelled,
}

impl SessionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::AwaitingConfirmation => "awaiting_confirmation",
            Self::AwaitingAccount => "awaiting_account",
            Self::Committed => "committed",
            Self::Expired => "expired",
            Self::Cancelled => "cancelled",
        }
    }

    pub fn from_str(s: &str) -> Self {
        match s {
            "awaiting_confirmation" => Self::AwaitingConfirmation,
            "awaiting_account" => Self::AwaitingAccount,
            "committed" => Self::Committed,
            "expired" => Self::Expired,
            "cancelled" => Self::Cancelled,
            _ => Self::Created,
        }
    }

    /// Terminal states answer every further event with a closed-session
    /// notice and never commit again.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Committed | Self::Expired | Self::Cancelled)
    }
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One conversation thread working a single draft towards commit.
///
/// The store owns the lifetime; the reconciler and state machine see a
/// session only for the duration of one event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    /// Thread identifier assigned by the transport.
    pub session_id: String,
    pub user_id: String,
    pub kind: DraftKind,
    pub state: SessionState,
    /// Current draft; `None` only while the session is still `Created`.
    pub draft: Option<Draft>,
    /// Taxonomy snapshot, refreshed on each reconciliation attempt.
    pub taxonomy: Taxonomy,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub created_at: DateTime<Utc>,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub last_activity_at: DateTime<Utc>,
}

impl Session {
    pub fn new(session_id: &str, user_id: &str, kind: DraftKind, taxonomy: Taxonomy) -> Self {
        let now = Utc::now();
        Self {
            session_id: session_id.to_string(),
            user_id: user_id.to_string(),
            kind,
            state: SessionState::Created,
            draft: None,
            taxonomy,
            created_at: now,
            last_activity_at: now,
        }
    }

    pub fn touch(&mut self) {
        self.last_activity_at = Utc::now();
    }

    pub fn idle_longer_than(&self, now: DateTime<Utc>, ttl: Duration) -> bool {
        now - self.last_activity_at > ttl
    }
}
