// Turn countdown for the participant currently on the clock.
//
// The timer is plain data: the session actor sleeps until `next_tick()` and
// calls `tick()`. Dropping the value is cancellation, since nothing else
// holds the deadline.

use std::time::Duration;

use tokio::time::Instant;

/// Default countdown length, in ticks.
pub const DEFAULT_TURN_TICKS: u32 = 30;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TurnTimer {
    participant: String,
    remaining: u32,
    tick: Duration,
    next_tick: Instant,
}

impl TurnTimer {
    pub fn start(participant: impl Into<String>, ticks: u32, tick: Duration, now: Instant) -> Self {
        TurnTimer {
            participant: participant.into(),
            remaining: ticks,
            tick,
            next_tick: now + tick,
        }
    }

    pub fn participant(&self) -> &str {
        &self.participant
    }

    pub fn remaining(&self) -> u32 {
        self.remaining
    }

    pub fn next_tick(&self) -> Instant {
        self.next_tick
    }

    pub fn is_expired(&self) -> bool {
        self.remaining == 0
    }

    /// Count down one tick and schedule the next. Returns the new remaining
    /// value; zero means the turn has expired.
    pub fn tick(&mut self) -> u32 {
        self.remaining = self.remaining.saturating_sub(1);
        self.next_tick += self.tick;
        self.remaining
    }
}
