// Snake-draft state machine: turn order, pick validation, round advance.

use std::collections::{BTreeMap, HashSet};

use chrono::{DateTime, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::catalog::Catalog;
use crate::error::DraftError;

/// Default number of rounds in a draft.
pub const DEFAULT_ROUNDS: u32 = 12;

/// Lifecycle of a started draft. A session without a `DraftState` has not
/// started one yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum DraftPhase {
    InProgress,
    Finished,
}

/// One committed pick in the append-only draft log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimelineEntry {
    pub round: u32,
    pub participant: String,
    pub item_name: String,
    pub picked_at: DateTime<Utc>,
}

/// What happens after a pick has been committed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Advance {
    NextTurn { round: u32, participant: String },
    Finished,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PickCommitted {
    pub entry: TimelineEntry,
    pub advance: Advance,
}

/// The complete state of one session's draft.
#[derive(Debug, Clone)]
pub struct DraftState {
    /// 1-based; exceeds `total_rounds` only once the draft has finished.
    round: u32,
    /// Members snapshot taken at draft start.
    order: Vec<String>,
    /// Index into the effective (possibly reversed) order for `round`.
    current_turn: usize,
    picks: BTreeMap<String, Vec<String>>,
    /// Every item in `picks`, for constant-time duplicate checks.
    picked: HashSet<String>,
    timeline: Vec<TimelineEntry>,
    total_rounds: u32,
    phase: DraftPhase,
}

/// Position in `order` of the participant at `turn` during `round`.
///
/// Odd rounds walk `order` forwards, even rounds walk it backwards.
pub fn order_index(order_len: usize, round: u32, turn: usize) -> usize {
    if round % 2 == 0 {
        order_len - 1 - turn
    } else {
        turn
    }
}

/// The effective turn order for `round`.
pub fn effective_order(order: &[String], round: u32) -> Vec<&str> {
    let mut effective: Vec<&str> = order.iter().map(String::as_str).collect();
    if round % 2 == 0 {
        effective.reverse();
    }
    effective
}

impl DraftState {
    /// Start a draft over `order`. Callers guarantee `order` is non-empty
    /// (a session always contains its host).
    pub fn begin(order: Vec<String>, total_rounds: u32) -> Self {
        let picks = order.iter().map(|p| (p.clone(), Vec::new())).collect();
        DraftState {
            round: 1,
            order,
            current_turn: 0,
            picks,
            picked: HashSet::new(),
            timeline: Vec::new(),
            total_rounds,
            phase: DraftPhase::InProgress,
        }
    }

    pub fn round(&self) -> u32 {
        self.round
    }

    pub fn total_rounds(&self) -> u32 {
        self.total_rounds
    }

    pub fn order(&self) -> &[String] {
        &self.order
    }

    pub fn current_turn(&self) -> usize {
        self.current_turn
    }

    pub fn phase(&self) -> DraftPhase {
        self.phase
    }

    pub fn picks(&self) -> &BTreeMap<String, Vec<String>> {
        &self.picks
    }

    pub fn timeline(&self) -> &[TimelineEntry] {
        &self.timeline
    }

    pub fn is_picked(&self, item_name: &str) -> bool {
        self.picked.contains(item_name)
    }

    pub fn effective_order(&self) -> Vec<&str> {
        effective_order(&self.order, self.round)
    }

    /// Who must pick next, or `None` once the draft has finished.
    pub fn expected_participant(&self) -> Option<&str> {
        if self.phase != DraftPhase::InProgress || self.order.is_empty() {
            return None;
        }
        let idx = order_index(self.order.len(), self.round, self.current_turn);
        self.order.get(idx).map(String::as_str)
    }

    /// Validate and commit a pick, then advance the turn.
    ///
    /// Rejected picks leave the state untouched.
    pub fn make_pick(
        &mut self,
        participant: &str,
        item_name: &str,
    ) -> Result<PickCommitted, DraftError> {
        let expected = self
            .expected_participant()
            .ok_or(DraftError::NoActiveDraft)?;
        if participant != expected {
            return Err(DraftError::WrongTurn {
                expected: expected.to_string(),
            });
        }
        if self.picked.contains(item_name) {
            return Err(DraftError::DuplicatePick(item_name.to_string()));
        }

        let entry = TimelineEntry {
            round: self.round,
            participant: participant.to_string(),
            item_name: item_name.to_string(),
            picked_at: Utc::now(),
        };
        self.picks
            .entry(participant.to_string())
            .or_default()
            .push(item_name.to_string());
        self.picked.insert(item_name.to_string());
        self.timeline.push(entry.clone());

        self.current_turn += 1;
        if self.current_turn >= self.order.len() {
            self.current_turn = 0;
            self.round += 1;
        }

        let advance = if self.round > self.total_rounds {
            self.phase = DraftPhase::Finished;
            Advance::Finished
        } else {
            // In progress with a non-empty order, so there is always a next turn.
            let next = self.expected_participant().unwrap_or_default().to_string();
            Advance::NextTurn {
                round: self.round,
                participant: next,
            }
        };

        Ok(PickCommitted { entry, advance })
    }

    /// Catalog items nobody has picked yet, in catalog order.
    pub fn available_items(&self, catalog: &Catalog) -> Vec<String> {
        catalog
            .item_names()
            .filter(|name| !self.picked.contains(name))
            .collect()
    }

    /// Choose an item uniformly at random from the available pool.
    pub fn choose_auto_pick<R: Rng + ?Sized>(
        &self,
        catalog: &Catalog,
        rng: &mut R,
    ) -> Option<String> {
        let mut available = self.available_items(catalog);
        if available.is_empty() {
            return None;
        }
        let idx = rng.random_range(0..available.len());
        Some(available.swap_remove(idx))
    }
}
