// Session-local error taxonomy.
//
// None of these are fatal to the process. Lookup and draft-rule failures are
// replied to the triggering connection only; aggregation failures are
// broadcast to the whole session as a `winnerResult` error.

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DraftError {
    #[error("session {0} does not exist")]
    SessionNotFound(String),

    #[error("no draft is in progress for this session")]
    NoActiveDraft,

    #[error("it is {expected}'s turn to pick")]
    WrongTurn { expected: String },

    #[error("{0} has already been picked, choose another")]
    DuplicatePick(String),

    #[error("no rankings received")]
    EmptyRankingSet,

    #[error("no valid scores to determine a winner")]
    NoValidScores,

    #[error("could not allocate a free session id after {attempts} attempts")]
    SessionIdsExhausted { attempts: usize },
}

/// Stable machine-readable code sent alongside the message in `error` events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ErrorCode {
    SessionNotFound,
    NoActiveDraft,
    WrongTurn,
    DuplicatePick,
    EmptyRankingSet,
    NoValidScores,
    SessionIdsExhausted,
    InvalidMessage,
}

impl DraftError {
    pub fn code(&self) -> ErrorCode {
        match self {
            DraftError::SessionNotFound(_) => ErrorCode::SessionNotFound,
            DraftError::NoActiveDraft => ErrorCode::NoActiveDraft,
            DraftError::WrongTurn { .. } => ErrorCode::WrongTurn,
            DraftError::DuplicatePick(_) => ErrorCode::DuplicatePick,
            DraftError::EmptyRankingSet => ErrorCode::EmptyRankingSet,
            DraftError::NoValidScores => ErrorCode::NoValidScores,
            DraftError::SessionIdsExhausted { .. } => ErrorCode::SessionIdsExhausted,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_serialize_camel_case() {
        let json = serde_json::to_string(&DraftError::DuplicatePick("X".into()).code()).unwrap();
        assert_eq!(json, "\"duplicatePick\"");
    }

    #[test]
    fn wrong_turn_message_names_expected_participant() {
        let err = DraftError::WrongTurn {
            expected: "bob".into(),
        };
        assert_eq!(err.to_string(), "it is bob's turn to pick");
    }
}
