// Quorum-or-timeout collection of member rankings and podium scoring.
//
// A request completes as soon as every expected member has submitted, or at
// its deadline with whatever arrived. Lower aggregate position is better;
// equal totals share a podium step.

use std::collections::{BTreeMap, HashMap, HashSet};

use tokio::time::Instant;
use tracing::{debug, warn};

use crate::error::DraftError;

/// One participant's ranking: candidate id -> position (1 = best).
pub type Ranking = BTreeMap<String, i64>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Standings {
    /// Tie groups in ascending score order; members of a group are sorted.
    pub podium: Vec<Vec<String>>,
    pub total_scores: BTreeMap<String, i64>,
}

/// A live aggregation round for one session.
#[derive(Debug, Clone)]
pub struct RankingRequest {
    pending: HashSet<String>,
    collected: HashMap<String, Ranking>,
    deadline: Instant,
}

impl RankingRequest {
    pub fn new<'a>(members: impl IntoIterator<Item = &'a String>, deadline: Instant) -> Self {
        RankingRequest {
            pending: members.into_iter().cloned().collect(),
            collected: HashMap::new(),
            deadline,
        }
    }

    pub fn deadline(&self) -> Instant {
        self.deadline
    }

    pub fn pending(&self) -> &HashSet<String> {
        &self.pending
    }

    pub fn collected_count(&self) -> usize {
        self.collected.len()
    }

    /// Store a submission. Returns `true` once nobody is pending any more.
    pub fn record(&mut self, participant: &str, ranking: Ranking) -> bool {
        self.collected.insert(participant.to_string(), ranking);
        self.pending.remove(participant);
        debug!(
            "Ranking from {participant}; {} still pending",
            self.pending.len()
        );
        self.pending.is_empty()
    }

    /// Score everything collected so far.
    pub fn standings(&self) -> Result<Standings, DraftError> {
        if self.collected.is_empty() {
            return Err(DraftError::EmptyRankingSet);
        }
        aggregate(self.collected.values())
    }
}

/// Sum each candidate's positions across all rankings and build the podium.
///
/// A candidate missing from some ranking simply gets no contribution from it.
/// A total that overflows `i64` rejects the whole aggregation with
/// `NoValidScores`; no voter is dropped.
pub fn aggregate<'a>(rankings: impl IntoIterator<Item = &'a Ranking>) -> Result<Standings, DraftError> {
    let mut total_scores: BTreeMap<String, i64> = BTreeMap::new();
    for ranking in rankings {
        for (candidate, position) in ranking {
            let total = total_scores.entry(candidate.clone()).or_insert(0);
            *total = total.checked_add(*position).ok_or_else(|| {
                warn!("Score for {candidate} overflowed");
                DraftError::NoValidScores
            })?;
        }
    }
    if total_scores.is_empty() {
        return Err(DraftError::NoValidScores);
    }
    Ok(Standings {
        podium: podium(&total_scores),
        total_scores,
    })
}

/// Group candidates by equal score, ascending. Ties are never broken.
pub fn podium(total_scores: &BTreeMap<String, i64>) -> Vec<Vec<String>> {
    let mut sorted: Vec<(&String, i64)> = total_scores.iter().map(|(c, s)| (c, *s)).collect();
    // BTreeMap iteration is already name-ordered; a stable sort keeps it so.
    sorted.sort_by_key(|&(_, score)| score);

    let mut groups: Vec<Vec<String>> = Vec::new();
    let mut last_score = None;
    for (candidate, score) in sorted {
        if last_score == Some(score) {
            if let Some(group) = groups.last_mut() {
                group.push(candidate.clone());
            }
        } else {
            groups.push(vec![candidate.clone()]);
            last_score = Some(score);
        }
    }
    groups
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn ranking(entries: &[(&str, i64)]) -> Ranking {
        entries.iter().map(|(c, p)| (c.to_string(), *p)).collect()
    }

    fn names(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn podium_groups_ties_in_ascending_order() {
        let scores = ranking(&[("A", 3), ("B", 5), ("C", 3), ("D", 7)]);
        assert_eq!(
            podium(&scores),
            vec![names(&["A", "C"]), names(&["B"]), names(&["D"])]
        );
    }

    #[test]
    fn aggregate_sums_positions_across_rankings() {
        let r1 = ranking(&[("alice", 1), ("bob", 2), ("carol", 3)]);
        let r2 = ranking(&[("alice", 2), ("bob", 1), ("carol", 3)]);
        let standings = aggregate([&r1, &r2]).unwrap();
        assert_eq!(standings.total_scores["alice"], 3);
        assert_eq!(standings.total_scores["bob"], 3);
        assert_eq!(standings.total_scores["carol"], 6);
        assert_eq!(
            standings.podium,
            vec![names(&["alice", "bob"]), names(&["carol"])]
        );
    }

    #[test]
    fn absent_candidates_do_not_contribute() {
        let r1 = ranking(&[("alice", 1), ("bob", 2)]);
        let r2 = ranking(&[("bob", 1)]);
        let standings = aggregate([&r1, &r2]).unwrap();
        assert_eq!(standings.total_scores["alice"], 1);
        assert_eq!(standings.total_scores["bob"], 3);
        assert_eq!(standings.podium, vec![names(&["alice"]), names(&["bob"])]);
    }

    #[test]
    fn rankings_without_candidates_have_no_valid_scores() {
        let empty = Ranking::new();
        assert_eq!(aggregate([&empty, &empty]), Err(DraftError::NoValidScores));
    }

    #[test]
    fn overflowing_totals_have_no_valid_scores() {
        let huge = ranking(&[("x", i64::MAX), ("y", 1)]);
        assert_eq!(aggregate([&huge, &huge]), Err(DraftError::NoValidScores));

        let low = ranking(&[("x", i64::MIN)]);
        let negative = ranking(&[("x", -1)]);
        assert_eq!(aggregate([&low, &negative]), Err(DraftError::NoValidScores));
    }

    #[tokio::test(start_paused = true)]
    async fn overflowing_request_reports_error_instead_of_panicking() {
        let members = names(&["alice", "bob"]);
        let mut request = RankingRequest::new(&members, Instant::now());
        request.record("alice", ranking(&[("x", i64::MAX)]));
        request.record("bob", ranking(&[("x", i64::MAX)]));
        assert_eq!(request.standings(), Err(DraftError::NoValidScores));
    }

    #[tokio::test(start_paused = true)]
    async fn quorum_reached_when_last_member_submits() {
        let members = names(&["alice", "bob"]);
        let mut request =
            RankingRequest::new(&members, Instant::now() + Duration::from_secs(10));
        assert!(!request.record("alice", ranking(&[("bob", 1)])));
        assert_eq!(request.pending().len(), 1);
        assert!(request.record("bob", ranking(&[("alice", 1)])));
        assert_eq!(request.collected_count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn resubmission_replaces_previous_ranking() {
        let members = names(&["alice", "bob"]);
        let mut request =
            RankingRequest::new(&members, Instant::now() + Duration::from_secs(10));
        request.record("alice", ranking(&[("x", 5)]));
        request.record("alice", ranking(&[("x", 1)]));
        let standings = request.standings().unwrap();
        assert_eq!(standings.total_scores["x"], 1);
        assert_eq!(request.collected_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn nothing_collected_is_empty_ranking_set() {
        let members = names(&["alice"]);
        let request = RankingRequest::new(&members, Instant::now());
        assert_eq!(request.standings(), Err(DraftError::EmptyRankingSet));
    }
}
