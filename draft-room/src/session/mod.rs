// Sessions: one actor task per session owns its membership, draft, turn
// timer and ranking request. Everything else talks to it through a
// `SessionHandle`.

pub mod actor;
pub mod members;
pub mod registry;

use std::collections::BTreeMap;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};

use crate::config::Config;
use crate::draft::state::{DraftPhase, TimelineEntry};
use crate::error::DraftError;
use crate::protocol::{ConnId, Outbox};
use crate::ranking::Ranking;

pub use actor::SessionActor;
pub use registry::SessionRegistry;

/// Timing and sizing knobs shared by every session.
#[derive(Debug, Clone)]
pub struct SessionSettings {
    pub rounds: u32,
    pub turn_ticks: u32,
    pub tick: Duration,
    pub ranking_deadline: Duration,
    pub idle_timeout: Duration,
    pub id_attempts: usize,
    pub command_buffer: usize,
}

impl From<&Config> for SessionSettings {
    fn from(config: &Config) -> Self {
        SessionSettings {
            rounds: config.draft.rounds,
            turn_ticks: config.draft.turn_ticks,
            tick: config.draft.tick(),
            ranking_deadline: config.ranking.deadline(),
            idle_timeout: config.sessions.idle_timeout(),
            id_attempts: config.sessions.id_attempts,
            command_buffer: config.sessions.command_buffer,
        }
    }
}

impl Default for SessionSettings {
    fn default() -> Self {
        SessionSettings::from(&Config::default())
    }
}

/// Inbound work for a session actor.
#[derive(Debug)]
pub enum SessionCommand {
    /// Subscribe a connection to the room without touching membership,
    /// optionally seating it as `participant`.
    Attach {
        conn: Outbox,
        participant: Option<String>,
    },
    /// Add a participant and subscribe their connection. `page` marks the
    /// lobby-page variant, which answers the host with `youAreHost`.
    Join {
        participant: String,
        conn: Outbox,
        page: bool,
    },
    /// Seat a connection from the lineup page and re-announce the members.
    JoinLesPage { participant: String, conn: Outbox },
    Detach { conn_id: ConnId },
    StartGame,
    BeginDraft { conn: Outbox },
    MakePick {
        participant: String,
        item_name: String,
        conn: Outbox,
    },
    GetDraftState { conn: Outbox },
    CalculateWinner,
    SendRanking {
        participant: String,
        ranking: Ranking,
    },
    PlayerMoved {
        owner: String,
        swaps: serde_json::Value,
        conn: Outbox,
    },
    Members {
        reply: oneshot::Sender<Vec<String>>,
    },
    Timeline {
        reply: oneshot::Sender<Result<Vec<TimelineEntry>, DraftError>>,
    },
    Snapshot {
        reply: oneshot::Sender<SessionSnapshot>,
    },
}

/// Point-in-time view of a session, for inspection and tests.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionSnapshot {
    pub members: Vec<String>,
    pub phase: Option<DraftPhase>,
    pub round: Option<u32>,
    pub current_turn: Option<usize>,
    pub expected_participant: Option<String>,
    pub picks: BTreeMap<String, Vec<String>>,
    pub timeline: Vec<TimelineEntry>,
    pub timer_remaining: Option<u32>,
    pub ranking_pending: Option<Vec<String>>,
    pub latest_rankings: BTreeMap<String, Ranking>,
    pub attached: usize,
}

/// Cloneable address of a running session actor.
#[derive(Debug, Clone)]
pub struct SessionHandle {
    id: String,
    tx: mpsc::Sender<SessionCommand>,
}

impl SessionHandle {
    pub(crate) fn new(id: String, tx: mpsc::Sender<SessionCommand>) -> Self {
        SessionHandle { id, tx }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Whether the actor has stopped (idle expiry).
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    pub async fn send(&self, cmd: SessionCommand) -> Result<(), DraftError> {
        self.tx
            .send(cmd)
            .await
            .map_err(|_| DraftError::SessionNotFound(self.id.clone()))
    }

    async fn request<T>(
        &self,
        make: impl FnOnce(oneshot::Sender<T>) -> SessionCommand,
    ) -> Result<T, DraftError> {
        let (reply, rx) = oneshot::channel();
        self.send(make(reply)).await?;
        rx.await
            .map_err(|_| DraftError::SessionNotFound(self.id.clone()))
    }

    pub async fn members(&self) -> Result<Vec<String>, DraftError> {
        self.request(|reply| SessionCommand::Members { reply }).await
    }

    pub async fn timeline(&self) -> Result<Vec<TimelineEntry>, DraftError> {
        self.request(|reply| SessionCommand::Timeline { reply })
            .await?
    }

    pub async fn snapshot(&self) -> Result<SessionSnapshot, DraftError> {
        self.request(|reply| SessionCommand::Snapshot { reply }).await
    }
}
