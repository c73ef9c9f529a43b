//! Round Timer - phase and deadline derivation
//!
//! Everything here is a pure function of a freshly read `RoundState` and the
//! wall clock. No countdown is carried between polls, so every observer
//! derives the same phase from the same snapshot.

use ledger_types::RoundState;
use serde::{Deserialize, Serialize};

/// Derived lifecycle position of the current round
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    /// No entry has started the round yet
    NotStarted,
    /// Accepting entries until the deadline
    Active,
    /// Deadline passed, waiting for someone to trigger the draw
    Expired,
    /// The ledger reports a transition in flight
    Drawing,
}

/// Phase plus timing for one snapshot
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoundTiming {
    pub phase: Phase,
    /// Seconds until the deadline, `None` when the round has not started
    pub remaining: Option<u64>,
    /// Deadline in unix seconds, `None` when the round has not started
    pub deadline: Option<u64>,
}

/// Derive phase and remaining time from `state` at unix time `now`
pub fn derive(state: &RoundState, now: u64) -> RoundTiming {
    let (phase, remaining, deadline) = match state.deadline() {
        None => (Phase::NotStarted, None, None),
        Some(deadline) if now < deadline => (Phase::Active, Some(deadline - now), Some(deadline)),
        Some(deadline) => (Phase::Expired, Some(0), Some(deadline)),
    };

    let phase = if state.drawing_in_progress {
        Phase::Drawing
    } else {
        phase
    };

    RoundTiming {
        phase,
        remaining,
        deadline,
    }
}

/// Current unix time in seconds
pub fn now_unix() -> u64 {
    chrono::Utc::now().timestamp().max(0) as u64
}

/// Render remaining seconds as `"{m}m {s}s"`
pub fn format_remaining(secs: u64) -> String {
    format!("{}m {}s", secs / 60, secs % 60)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state(start_time: u64, duration: u64, drawing: bool) -> RoundState {
        RoundState {
            round_id: 1,
            start_time,
            duration,
            drawing_in_progress: drawing,
            ..Default::default()
        }
    }

    #[test]
    fn test_not_started_ignores_clock() {
        for now in [0, 1, 1_000, 1_700, u64::MAX] {
            let timing = derive(&state(0, 600, false), now);
            assert_eq!(timing.phase, Phase::NotStarted);
            assert_eq!(timing.remaining, None);
            assert_eq!(timing.deadline, None);
        }
    }

    #[test]
    fn test_active_window() {
        // start 1000, duration 600, now 1500
        let timing = derive(&state(1000, 600, false), 1500);
        assert_eq!(timing.phase, Phase::Active);
        assert_eq!(timing.remaining, Some(100));
        assert_eq!(timing.deadline, Some(1600));

        for now in [0, 999, 1000, 1599] {
            let timing = derive(&state(1000, 600, false), now);
            assert_eq!(timing.phase, Phase::Active);
            assert_eq!(timing.remaining, Some(1600 - now));
        }
    }

    #[test]
    fn test_expired_at_and_after_deadline() {
        for now in [1600, 1700, 1_000_000] {
            let timing = derive(&state(1000, 600, false), now);
            assert_eq!(timing.phase, Phase::Expired);
            assert_eq!(timing.remaining, Some(0));
        }
    }

    #[test]
    fn test_drawing_overrides_timing() {
        for (start, now) in [(0, 5), (1000, 1500), (1000, 1700)] {
            let timing = derive(&state(start, 600, true), now);
            assert_eq!(timing.phase, Phase::Drawing);
        }
    }

    #[test]
    fn test_deadline_saturates() {
        let timing = derive(&state(u64::MAX - 1, 600, false), 5);
        assert_eq!(timing.deadline, Some(u64::MAX));
        assert_eq!(timing.phase, Phase::Active);
    }

    #[test]
    fn test_format_remaining() {
        assert_eq!(format_remaining(250), "4m 10s");
        assert_eq!(format_remaining(59), "0m 59s");
        assert_eq!(format_remaining(0), "0m 0s");
    }
}
