// Session actor: the single owner of one session's mutable state.
//
// Commands, turn ticks and the ranking deadline are all branches of one
// `tokio::select!` loop, so a manual pick and a timer-driven auto-pick can
// never interleave. Cancelling a timer clears its deadline; a cleared
// deadline is never polled again.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use rand::rngs::StdRng;
use tokio::sync::mpsc;
use tokio::time::{sleep_until, Instant};
use tracing::{debug, info, warn};

use super::members::Members;
use super::{SessionCommand, SessionSettings, SessionSnapshot};
use crate::catalog::Catalog;
use crate::draft::state::{Advance, DraftState};
use crate::draft::timer::TurnTimer;
use crate::error::DraftError;
use crate::protocol::{ConnId, Outbox, ServerEvent, WinnerOutcome};
use crate::ranking::{Ranking, RankingRequest};

/// Far enough ahead to stand in for "no deadline" in a disabled branch.
const NEVER: Duration = Duration::from_secs(60 * 60 * 24 * 365);

/// A connection subscribed to the session room.
#[derive(Debug)]
struct Seat {
    outbox: Outbox,
    participant: Option<String>,
}

/// Who receives the personal `pickConfirmed` for a commit.
enum Confirm<'a> {
    Caller(&'a Outbox),
    Participant,
}

pub struct SessionActor {
    id: String,
    members: Members,
    room: HashMap<ConnId, Seat>,
    draft: Option<DraftState>,
    timer: Option<TurnTimer>,
    ranking: Option<RankingRequest>,
    latest_rankings: BTreeMap<String, Ranking>,
    catalog: Arc<Catalog>,
    settings: SessionSettings,
    rng: StdRng,
    last_activity: Instant,
}

impl SessionActor {
    pub fn new(
        id: String,
        host: String,
        catalog: Arc<Catalog>,
        settings: SessionSettings,
        rng: StdRng,
    ) -> Self {
        SessionActor {
            id,
            members: Members::new(host),
            room: HashMap::new(),
            draft: None,
            timer: None,
            ranking: None,
            latest_rankings: BTreeMap::new(),
            catalog,
            settings,
            rng,
            last_activity: Instant::now(),
        }
    }

    /// Run until every handle is dropped or the session sits idle past
    /// `idle_timeout` with no timer or ranking request pending.
    pub async fn run(mut self, mut rx: mpsc::Receiver<SessionCommand>) {
        info!("Session {} started (host {})", self.id, self.members.host());

        loop {
            let turn_at = self.timer.as_ref().map(TurnTimer::next_tick);
            let ranking_at = self.ranking.as_ref().map(RankingRequest::deadline);
            let idle_at = (turn_at.is_none() && ranking_at.is_none())
                .then(|| self.last_activity + self.settings.idle_timeout);

            tokio::select! {
                biased;

                cmd = rx.recv() => {
                    match cmd {
                        Some(cmd) => {
                            self.last_activity = Instant::now();
                            self.handle(cmd);
                        }
                        None => {
                            debug!("Session {} command channel closed", self.id);
                            break;
                        }
                    }
                }

                _ = sleep_until(or_never(turn_at)), if turn_at.is_some() => {
                    self.on_turn_tick();
                }

                _ = sleep_until(or_never(ranking_at)), if ranking_at.is_some() => {
                    info!("Session {}: ranking deadline reached", self.id);
                    self.finish_ranking();
                }

                _ = sleep_until(or_never(idle_at)), if idle_at.is_some() => {
                    info!("Session {} expired after {:?} idle", self.id, self.settings.idle_timeout);
                    break;
                }
            }
        }

        info!("Session {} stopped", self.id);
    }

    fn handle(&mut self, cmd: SessionCommand) {
        match cmd {
            SessionCommand::Attach { conn, participant } => self.attach(conn, participant),
            SessionCommand::Join {
                participant,
                conn,
                page,
            } => self.join(participant, conn, page),
            SessionCommand::Detach { conn_id } => {
                self.room.remove(&conn_id);
            }
            SessionCommand::JoinLesPage { participant, conn } => {
                self.join_lineup_page(participant, conn)
            }
            SessionCommand::StartGame => {
                info!("Game started in session {}", self.id);
                self.broadcast(ServerEvent::GameStarted {
                    session_id: self.id.clone(),
                });
            }
            SessionCommand::BeginDraft { conn } => self.begin_draft(&conn),
            SessionCommand::MakePick {
                participant,
                item_name,
                conn,
            } => {
                if let Err(e) = self.commit_pick(&participant, &item_name, Confirm::Caller(&conn)) {
                    warn!(
                        "Session {}: pick of {item_name} by {participant} rejected: {e}",
                        self.id
                    );
                    conn.send(ServerEvent::from(&e));
                }
            }
            SessionCommand::GetDraftState { conn } => match &self.draft {
                Some(draft) => conn.send(ServerEvent::DraftTimelineUpdate {
                    session_id: self.id.clone(),
                    timeline: draft.timeline().to_vec(),
                }),
                None => conn.send(ServerEvent::from(&DraftError::NoActiveDraft)),
            },
            SessionCommand::CalculateWinner => self.start_ranking(),
            SessionCommand::SendRanking {
                participant,
                ranking,
            } => self.receive_ranking(participant, ranking),
            SessionCommand::PlayerMoved { owner, swaps, conn } => {
                let event = ServerEvent::PlayerMoved {
                    session_id: self.id.clone(),
                    owner,
                    swaps,
                };
                for (id, seat) in &self.room {
                    if *id != conn.id() {
                        seat.outbox.send(event.clone());
                    }
                }
            }
            SessionCommand::Members { reply } => {
                let _ = reply.send(self.members.to_vec());
            }
            SessionCommand::Timeline { reply } => {
                let result = self
                    .draft
                    .as_ref()
                    .map(|d| d.timeline().to_vec())
                    .ok_or(DraftError::NoActiveDraft);
                let _ = reply.send(result);
            }
            SessionCommand::Snapshot { reply } => {
                let _ = reply.send(self.snapshot());
            }
        }
    }

    // -----------------------------------------------------------------------
    // Membership
    // -----------------------------------------------------------------------

    fn attach(&mut self, conn: Outbox, participant: Option<String>) {
        let seat = self.room.entry(conn.id()).or_insert(Seat {
            outbox: conn,
            participant: None,
        });
        if participant.is_some() {
            seat.participant = participant;
        }
    }

    fn join(&mut self, participant: String, conn: Outbox, page: bool) {
        self.attach(conn.clone(), Some(participant.clone()));
        if self.members.join(&participant) {
            info!("{participant} joined session {}", self.id);
        }
        if page {
            if self.members.is_host(&participant) {
                conn.send(ServerEvent::YouAreHost {
                    session_id: self.id.clone(),
                });
            }
        } else {
            conn.send(ServerEvent::SessionJoined {
                session_id: self.id.clone(),
            });
        }
        self.broadcast(ServerEvent::UpdateMemberList {
            session_id: self.id.clone(),
            members: self.members.to_vec(),
        });
    }

    fn join_lineup_page(&mut self, participant: String, conn: Outbox) {
        self.attach(conn.clone(), Some(participant.clone()));
        self.broadcast(ServerEvent::LobbyUsers {
            session_id: self.id.clone(),
            members: self.members.to_vec(),
        });
        if self.members.is_host(&participant) {
            conn.send(ServerEvent::YouAreHost {
                session_id: self.id.clone(),
            });
        }
    }

    // -----------------------------------------------------------------------
    // Draft
    // -----------------------------------------------------------------------

    fn begin_draft(&mut self, conn: &Outbox) {
        if self.draft.is_some() {
            info!("Session {}: restarting draft", self.id);
        }
        let order = self.members.to_vec();
        let draft = DraftState::begin(order.clone(), self.settings.rounds);
        let Some(first) = draft.expected_participant().map(str::to_string) else {
            conn.send(ServerEvent::from(&DraftError::NoActiveDraft));
            return;
        };
        self.draft = Some(draft);
        info!(
            "Draft started in session {}, first pick: {first}, order: {order:?}",
            self.id
        );

        self.broadcast(ServerEvent::DraftStarted {
            session_id: self.id.clone(),
            round: 1,
            current_participant: first.clone(),
            order,
        });
        self.start_turn_timer(first);
    }

    /// Validate and commit a pick, then either start the next turn or finish
    /// the draft. Rejections leave all state, including the timer, untouched.
    fn commit_pick(
        &mut self,
        participant: &str,
        item_name: &str,
        confirm: Confirm<'_>,
    ) -> Result<(), DraftError> {
        let draft = self.draft.as_mut().ok_or(DraftError::NoActiveDraft)?;
        let committed = draft.make_pick(participant, item_name)?;
        self.timer = None;

        info!(
            "Session {}: round {} pick {item_name} by {participant}",
            self.id, committed.entry.round
        );

        let confirmation = ServerEvent::PickConfirmed {
            session_id: self.id.clone(),
            round: committed.entry.round,
            participant: participant.to_string(),
            item_name: item_name.to_string(),
        };
        match confirm {
            Confirm::Caller(conn) => conn.send(confirmation),
            Confirm::Participant => self.send_to_participant(participant, confirmation),
        }
        self.broadcast(ServerEvent::ItemRemoved {
            session_id: self.id.clone(),
            item_name: item_name.to_string(),
        });

        match committed.advance {
            Advance::Finished => self.finish_draft(),
            Advance::NextTurn { round, participant } => {
                self.broadcast(ServerEvent::NextTurn {
                    session_id: self.id.clone(),
                    round,
                    current_participant: participant.clone(),
                });
                self.start_turn_timer(participant);
                self.broadcast_timeline();
            }
        }
        Ok(())
    }

    fn finish_draft(&mut self) {
        let Some(draft) = &self.draft else {
            return;
        };
        let picks = draft.picks().clone();
        info!(
            "Draft finished in session {} after {} picks",
            self.id,
            draft.timeline().len()
        );
        self.broadcast_timeline();
        self.broadcast(ServerEvent::DraftFinished {
            session_id: self.id.clone(),
            picks: picks.clone(),
        });
        self.broadcast(ServerEvent::NavigateToResults {
            session_id: self.id.clone(),
            picks,
        });
    }

    fn broadcast_timeline(&self) {
        if let Some(draft) = &self.draft {
            self.broadcast(ServerEvent::DraftTimelineUpdate {
                session_id: self.id.clone(),
                timeline: draft.timeline().to_vec(),
            });
        }
    }

    // -----------------------------------------------------------------------
    // Turn timer and auto-pick
    // -----------------------------------------------------------------------

    /// Replace any running countdown with a fresh one for `participant`.
    fn start_turn_timer(&mut self, participant: String) {
        let timer = TurnTimer::start(
            participant,
            self.settings.turn_ticks,
            self.settings.tick,
            Instant::now(),
        );
        self.broadcast(ServerEvent::UpdateTimer {
            session_id: self.id.clone(),
            remaining: timer.remaining(),
        });
        self.timer = Some(timer);
    }

    fn on_turn_tick(&mut self) {
        let Some(timer) = self.timer.as_mut() else {
            return;
        };
        let remaining = timer.tick();
        self.broadcast(ServerEvent::UpdateTimer {
            session_id: self.id.clone(),
            remaining,
        });
        if remaining == 0 {
            if let Some(expired) = self.timer.take() {
                self.auto_pick(expired.participant());
            }
        }
    }

    /// Commit a random available item for the participant whose turn ran out.
    fn auto_pick(&mut self, participant: &str) {
        let Some(draft) = &self.draft else {
            return;
        };
        let Some(item_name) = draft.choose_auto_pick(&self.catalog, &mut self.rng) else {
            warn!(
                "Session {}: {participant}'s turn expired with no items left",
                self.id
            );
            return;
        };

        info!("Session {}: auto-picking {item_name} for {participant}", self.id);
        self.broadcast(ServerEvent::AutoPickNotice {
            session_id: self.id.clone(),
            participant: participant.to_string(),
            item_name: item_name.clone(),
        });
        self.broadcast(ServerEvent::AutoPickCommit {
            session_id: self.id.clone(),
            participant: participant.to_string(),
            item_name: item_name.clone(),
        });
        if let Err(e) = self.commit_pick(participant, &item_name, Confirm::Participant) {
            warn!("Session {}: auto-pick commit failed: {e}", self.id);
        }
    }

    // -----------------------------------------------------------------------
    // Ranking aggregation
    // -----------------------------------------------------------------------

    fn start_ranking(&mut self) {
        if self.ranking.is_some() {
            info!("Session {}: replacing pending ranking request", self.id);
        }
        let deadline = Instant::now() + self.settings.ranking_deadline;
        self.ranking = Some(RankingRequest::new(self.members.as_slice(), deadline));
        self.broadcast(ServerEvent::RequestRankings {
            session_id: self.id.clone(),
        });
    }

    fn receive_ranking(&mut self, participant: String, ranking: Ranking) {
        self.latest_rankings
            .insert(participant.clone(), ranking.clone());
        let quorum = match self.ranking.as_mut() {
            Some(request) => request.record(&participant, ranking),
            None => false,
        };
        if quorum {
            info!("Session {}: all rankings received", self.id);
            self.finish_ranking();
        }
    }

    /// Score and discard the live request. A no-op when none is live, which
    /// covers a deadline racing a completed quorum.
    fn finish_ranking(&mut self) {
        let Some(request) = self.ranking.take() else {
            return;
        };
        let result = request.standings();
        match &result {
            Ok(standings) => info!("Winner computed for session {}: {:?}", self.id, standings.podium),
            Err(e) => warn!("Session {}: no winner: {e}", self.id),
        }
        self.broadcast(ServerEvent::WinnerResult {
            session_id: self.id.clone(),
            outcome: WinnerOutcome::from(result),
        });
    }

    // -----------------------------------------------------------------------
    // Delivery
    // -----------------------------------------------------------------------

    fn broadcast(&self, event: ServerEvent) {
        for seat in self.room.values() {
            seat.outbox.send(event.clone());
        }
    }

    fn send_to_participant(&self, participant: &str, event: ServerEvent) {
        for seat in self.room.values() {
            if seat.participant.as_deref() == Some(participant) {
                seat.outbox.send(event.clone());
            }
        }
    }

    fn snapshot(&self) -> SessionSnapshot {
        let draft = self.draft.as_ref();
        SessionSnapshot {
            members: self.members.to_vec(),
            phase: draft.map(DraftState::phase),
            round: draft.map(DraftState::round),
            current_turn: draft.map(DraftState::current_turn),
            expected_participant: draft
                .and_then(DraftState::expected_participant)
                .map(str::to_string),
            picks: draft.map(|d| d.picks().clone()).unwrap_or_default(),
            timeline: draft.map(|d| d.timeline().to_vec()).unwrap_or_default(),
            timer_remaining: self.timer.as_ref().map(TurnTimer::remaining),
            ranking_pending: self.ranking.as_ref().map(|r| {
                let mut pending: Vec<String> = r.pending().iter().cloned().collect();
                pending.sort();
                pending
            }),
            latest_rankings: self.latest_rankings.clone(),
            attached: self.room.len(),
        }
    }
}

fn or_never(deadline: Option<Instant>) -> Instant {
    deadline.unwrap_or_else(|| Instant::now() + NEVER)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::Candidate;
    use crate::session::SessionHandle;
    use rand::SeedableRng;
    use tokio::sync::mpsc::UnboundedReceiver;

    fn catalog() -> Arc<Catalog> {
        let candidates = ["A", "B", "C", "D"]
            .iter()
            .map(|n| Candidate {
                display_name: n.to_string(),
                secondary_name: String::new(),
                image_ref: String::new(),
                role_tag: "GK".into(),
            })
            .collect();
        Arc::new(Catalog::new("voorname", candidates))
    }

    fn settings() -> SessionSettings {
        SessionSettings {
            turn_ticks: 3,
            tick: Duration::from_secs(1),
            ..SessionSettings::default()
        }
    }

    /// Spawn an actor hosted by alice with bob joined on a second connection.
    async fn spawn_pair() -> (SessionHandle, Outbox, UnboundedReceiver<ServerEvent>, Outbox) {
        let (tx, rx) = mpsc::channel(16);
        let actor = SessionActor::new(
            "100001".into(),
            "alice".into(),
            catalog(),
            settings(),
            StdRng::seed_from_u64(7),
        );
        tokio::spawn(actor.run(rx));
        let handle = SessionHandle::new("100001".into(), tx);

        let (alice, alice_rx) = Outbox::new(1);
        let (bob, _bob_rx) = Outbox::new(2);
        handle
            .send(SessionCommand::Join {
                participant: "alice".into(),
                conn: alice.clone(),
                page: false,
            })
            .await
            .unwrap();
        handle
            .send(SessionCommand::Join {
                participant: "bob".into(),
                conn: bob.clone(),
                page: false,
            })
            .await
            .unwrap();
        (handle, alice, alice_rx, bob)
    }

    fn drain(rx: &mut UnboundedReceiver<ServerEvent>) -> Vec<ServerEvent> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    #[tokio::test(start_paused = true)]
    async fn manual_pick_cancels_running_countdown() {
        let (handle, alice, mut alice_rx, _bob) = spawn_pair().await;
        handle
            .send(SessionCommand::BeginDraft { conn: alice.clone() })
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_millis(2500)).await;
        handle
            .send(SessionCommand::MakePick {
                participant: "alice".into(),
                item_name: "A".into(),
                conn: alice.clone(),
            })
            .await
            .unwrap();

        // Past alice's first deadline, before bob's.
        tokio::time::sleep(Duration::from_millis(1500)).await;
        let snapshot = handle.snapshot().await.unwrap();
        assert_eq!(snapshot.timeline.len(), 1);
        assert_eq!(snapshot.expected_participant.as_deref(), Some("bob"));
        assert_eq!(snapshot.timer_remaining, Some(2));
        assert!(!drain(&mut alice_rx)
            .iter()
            .any(|e| matches!(e, ServerEvent::AutoPickNotice { .. })));
    }

    #[tokio::test(start_paused = true)]
    async fn countdown_broadcasts_every_tick() {
        let (handle, alice, mut alice_rx, _bob) = spawn_pair().await;
        handle
            .send(SessionCommand::BeginDraft { conn: alice.clone() })
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(2500)).await;
        handle.snapshot().await.unwrap();

        let remaining: Vec<u32> = drain(&mut alice_rx)
            .into_iter()
            .filter_map(|e| match e {
                ServerEvent::UpdateTimer { remaining, .. } => Some(remaining),
                _ => None,
            })
            .collect();
        assert_eq!(remaining, vec![3, 2, 1]);
    }

    #[tokio::test(start_paused = true)]
    async fn begin_draft_again_restarts_from_round_one() {
        let (handle, alice, _alice_rx, bob) = spawn_pair().await;
        handle
            .send(SessionCommand::BeginDraft { conn: alice.clone() })
            .await
            .unwrap();
        for (participant, item, conn) in [("alice", "A", &alice), ("bob", "B", &bob)] {
            handle
                .send(SessionCommand::MakePick {
                    participant: participant.into(),
                    item_name: item.into(),
                    conn: conn.clone(),
                })
                .await
                .unwrap();
        }
        assert_eq!(handle.snapshot().await.unwrap().round, Some(2));

        handle
            .send(SessionCommand::BeginDraft { conn: alice.clone() })
            .await
            .unwrap();
        let snapshot = handle.snapshot().await.unwrap();
        assert_eq!(snapshot.round, Some(1));
        assert!(snapshot.timeline.is_empty());
        assert_eq!(snapshot.expected_participant.as_deref(), Some("alice"));
        assert_eq!(snapshot.timer_remaining, Some(3));
    }

    #[tokio::test(start_paused = true)]
    async fn rankings_are_kept_without_a_request() {
        let (handle, _alice, _alice_rx, _bob) = spawn_pair().await;
        let ranking = Ranking::from([("alice".to_string(), 1)]);
        handle
            .send(SessionCommand::SendRanking {
                participant: "bob".into(),
                ranking: ranking.clone(),
            })
            .await
            .unwrap();

        let snapshot = handle.snapshot().await.unwrap();
        assert_eq!(snapshot.ranking_pending, None);
        assert_eq!(snapshot.latest_rankings.get("bob"), Some(&ranking));
    }

    #[tokio::test]
    async fn detach_leaves_membership_alone() {
        let (handle, _alice, _alice_rx, bob) = spawn_pair().await;
        handle
            .send(SessionCommand::Detach { conn_id: bob.id() })
            .await
            .unwrap();
        let snapshot = handle.snapshot().await.unwrap();
        assert_eq!(snapshot.attached, 1);
        assert_eq!(snapshot.members, vec!["alice".to_string(), "bob".to_string()]);
    }
}
