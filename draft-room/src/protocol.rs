// Wire protocol between browser clients and the draft room server.
//
// Every frame is a JSON object tagged by `"type"`. Event names and field
// names are camelCase.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::catalog::CatalogEntry;
use crate::draft::state::TimelineEntry;
use crate::error::{DraftError, ErrorCode};
use crate::ranking::{Ranking, Standings};

/// Identifies one client connection for the lifetime of the process.
pub type ConnId = u64;

// ---------------------------------------------------------------------------
// Inbound
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum ClientMessage {
    CreateSession {
        host_id: String,
    },
    JoinSession {
        session_id: String,
        participant_id: String,
    },
    /// Sent by the lobby page on load; also tells the host who they are.
    JoinSessionPage {
        session_id: String,
        participant_id: String,
    },
    /// Sent by the lineup page on load. Seats the connection without touching
    /// membership.
    JoinLesPage {
        session_id: String,
        participant_id: String,
    },
    StartGame {
        session_id: String,
    },
    BeginDraft {
        session_id: String,
    },
    MakePick {
        session_id: String,
        participant_id: String,
        item_name: String,
    },
    GetDraftState {
        session_id: String,
    },
    CalculateWinner {
        session_id: String,
    },
    SendRanking {
        session_id: String,
        participant_id: String,
        ranking: Ranking,
    },
    /// Opaque roster rearrangement, relayed to the other members untouched.
    PlayerMoved {
        session_id: String,
        owner: String,
        swaps: serde_json::Value,
    },
    GetTimeline {
        session_id: String,
    },
    GetCatalog,
}

impl ClientMessage {
    pub fn session_id(&self) -> Option<&str> {
        match self {
            ClientMessage::CreateSession { .. } | ClientMessage::GetCatalog => None,
            ClientMessage::JoinSession { session_id, .. }
            | ClientMessage::JoinSessionPage { session_id, .. }
            | ClientMessage::JoinLesPage { session_id, .. }
            | ClientMessage::StartGame { session_id }
            | ClientMessage::BeginDraft { session_id }
            | ClientMessage::MakePick { session_id, .. }
            | ClientMessage::GetDraftState { session_id }
            | ClientMessage::CalculateWinner { session_id }
            | ClientMessage::SendRanking { session_id, .. }
            | ClientMessage::PlayerMoved { session_id, .. }
            | ClientMessage::GetTimeline { session_id } => Some(session_id),
        }
    }
}

// ---------------------------------------------------------------------------
// Outbound
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum ServerEvent {
    SessionCreated {
        session_id: String,
    },
    SessionJoined {
        session_id: String,
    },
    YouAreHost {
        session_id: String,
    },
    UpdateMemberList {
        session_id: String,
        members: Vec<String>,
    },
    LobbyUsers {
        session_id: String,
        members: Vec<String>,
    },
    GameStarted {
        session_id: String,
    },
    DraftStarted {
        session_id: String,
        round: u32,
        current_participant: String,
        order: Vec<String>,
    },
    NextTurn {
        session_id: String,
        round: u32,
        current_participant: String,
    },
    UpdateTimer {
        session_id: String,
        remaining: u32,
    },
    AutoPickNotice {
        session_id: String,
        participant: String,
        item_name: String,
    },
    AutoPickCommit {
        session_id: String,
        participant: String,
        item_name: String,
    },
    PickConfirmed {
        session_id: String,
        round: u32,
        participant: String,
        item_name: String,
    },
    ItemRemoved {
        session_id: String,
        item_name: String,
    },
    DraftTimelineUpdate {
        session_id: String,
        timeline: Vec<TimelineEntry>,
    },
    DraftFinished {
        session_id: String,
        picks: BTreeMap<String, Vec<String>>,
    },
    NavigateToResults {
        session_id: String,
        picks: BTreeMap<String, Vec<String>>,
    },
    RequestRankings {
        session_id: String,
    },
    WinnerResult {
        session_id: String,
        #[serde(flatten)]
        outcome: WinnerOutcome,
    },
    PlayerMoved {
        session_id: String,
        owner: String,
        swaps: serde_json::Value,
    },
    Timeline {
        session_id: String,
        entries: Vec<TimelineEntry>,
    },
    Catalog {
        primary_column: String,
        entries: Vec<CatalogEntry>,
    },
    Error {
        code: ErrorCode,
        message: String,
    },
}

/// Either a scored podium or the reason none could be computed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged, rename_all_fields = "camelCase")]
pub enum WinnerOutcome {
    Podium {
        podium: Vec<Vec<String>>,
        total_scores: BTreeMap<String, i64>,
    },
    Failed {
        error: String,
    },
}

impl From<Result<Standings, DraftError>> for WinnerOutcome {
    fn from(result: Result<Standings, DraftError>) -> Self {
        match result {
            Ok(standings) => WinnerOutcome::Podium {
                podium: standings.podium,
                total_scores: standings.total_scores,
            },
            Err(e) => WinnerOutcome::Failed {
                error: e.to_string(),
            },
        }
    }
}

impl From<&DraftError> for ServerEvent {
    fn from(err: &DraftError) -> Self {
        ServerEvent::Error {
            code: err.code(),
            message: err.to_string(),
        }
    }
}

// ---------------------------------------------------------------------------
// Outbox
// ---------------------------------------------------------------------------

/// Sending half of one client's outbound queue. Cheap to clone; sessions keep
/// one per attached connection.
#[derive(Debug, Clone)]
pub struct Outbox {
    id: ConnId,
    tx: mpsc::UnboundedSender<ServerEvent>,
}

impl Outbox {
    pub fn new(id: ConnId) -> (Self, mpsc::UnboundedReceiver<ServerEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Outbox { id, tx }, rx)
    }

    pub fn id(&self) -> ConnId {
        self.id
    }

    /// Queue an event. A closed connection silently drops it.
    pub fn send(&self, event: ServerEvent) {
        let _ = self.tx.send(event);
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}
