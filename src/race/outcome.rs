//! Race Outcome Arbitration
//!
//! The single authority allowed to move the race from unresolved to
//! resolved. Victory claims, the countdown expiring, and forfeits after a
//! disconnect all race each other here; the check-and-set under one mutex
//! guarantees that exactly one of them wins and every other attempt is a
//! silent no-op.

use std::sync::{Mutex, PoisonError};

use crate::race::state::PlayerId;

/// Terminal result of a race.
///
/// Transitions out of `Unresolved` happen at most once for the life of a
/// server process.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum RaceOutcome {
    /// Race still in progress (or not yet started).
    #[default]
    Unresolved,
    /// A player reached the goal first.
    Victory(PlayerId),
    /// The race clock expired with no winner.
    Timeout,
    /// The opponent disconnected; the remaining player is awarded the win.
    Forfeit(PlayerId),
}

impl RaceOutcome {
    /// The winning player, for the outcomes that have one.
    pub fn winner(&self) -> Option<PlayerId> {
        match self {
            RaceOutcome::Victory(player) | RaceOutcome::Forfeit(player) => Some(*player),
            RaceOutcome::Unresolved | RaceOutcome::Timeout => None,
        }
    }
}

/// Result of an [`OutcomeArbiter::try_resolve`] attempt.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Resolution {
    /// This caller performed the transition and owns the announcement.
    ResolvedByMe,
    /// Someone else resolved the race first; the attempt had no effect.
    AlreadyResolved,
}

/// At-most-once check-and-set over the race outcome.
#[derive(Debug, Default)]
pub struct OutcomeArbiter {
    outcome: Mutex<RaceOutcome>,
}

impl OutcomeArbiter {
    /// Create an arbiter with the race unresolved.
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, RaceOutcome> {
        self.outcome.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Attempt to resolve the race.
    ///
    /// Indivisible with respect to concurrent callers: the first attempt
    /// transitions the outcome and gets `ResolvedByMe`; every later attempt
    /// gets `AlreadyResolved` and has no effect. Requesting `Unresolved` is
    /// never honored.
    pub fn try_resolve(&self, outcome: RaceOutcome) -> Resolution {
        if outcome == RaceOutcome::Unresolved {
            return Resolution::AlreadyResolved;
        }

        let mut current = self.lock();
        if *current == RaceOutcome::Unresolved {
            *current = outcome;
            Resolution::ResolvedByMe
        } else {
            Resolution::AlreadyResolved
        }
    }

    /// The outcome as of this call.
    pub fn current(&self) -> RaceOutcome {
        self.lock().clone()
    }

    /// Whether the race has been resolved.
    pub fn is_resolved(&self) -> bool {
        *self.lock() != RaceOutcome::Unresolved
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_first_attempt_wins() {
        let arbiter = OutcomeArbiter::new();
        assert!(!arbiter.is_resolved());

        let result = arbiter.try_resolve(RaceOutcome::Victory(PlayerId::new(1)));
        assert_eq!(result, Resolution::ResolvedByMe);
        assert_eq!(arbiter.current(), RaceOutcome::Victory(PlayerId::new(1)));
    }

    #[test]
    fn test_later_attempts_are_noops() {
        let arbiter = OutcomeArbiter::new();

        arbiter.try_resolve(RaceOutcome::Victory(PlayerId::new(2)));

        assert_eq!(
            arbiter.try_resolve(RaceOutcome::Timeout),
            Resolution::AlreadyResolved
        );
        assert_eq!(
            arbiter.try_resolve(RaceOutcome::Victory(PlayerId::new(1))),
            Resolution::AlreadyResolved
        );
        assert_eq!(
            arbiter.try_resolve(RaceOutcome::Forfeit(PlayerId::new(1))),
            Resolution::AlreadyResolved
        );

        assert_eq!(arbiter.current(), RaceOutcome::Victory(PlayerId::new(2)));
    }

    #[test]
    fn test_timeout_blocks_victory() {
        let arbiter = OutcomeArbiter::new();

        assert_eq!(
            arbiter.try_resolve(RaceOutcome::Timeout),
            Resolution::ResolvedByMe
        );
        assert_eq!(
            arbiter.try_resolve(RaceOutcome::Victory(PlayerId::new(1))),
            Resolution::AlreadyResolved
        );
        assert_eq!(arbiter.current(), RaceOutcome::Timeout);
    }

    #[test]
    fn test_unresolved_is_never_honored() {
        let arbiter = OutcomeArbiter::new();
        assert_eq!(
            arbiter.try_resolve(RaceOutcome::Unresolved),
            Resolution::AlreadyResolved
        );
        assert!(!arbiter.is_resolved());
    }

    #[test]
    fn test_winner_accessor() {
        assert_eq!(
            RaceOutcome::Victory(PlayerId::new(1)).winner(),
            Some(PlayerId::new(1))
        );
        assert_eq!(
            RaceOutcome::Forfeit(PlayerId::new(2)).winner(),
            Some(PlayerId::new(2))
        );
        assert_eq!(RaceOutcome::Timeout.winner(), None);
        assert_eq!(RaceOutcome::Unresolved.winner(), None);
    }

    #[test]
    fn test_concurrent_claims_resolve_exactly_once() {
        let arbiter = Arc::new(OutcomeArbiter::new());

        // Simultaneous claims from both players plus the clock, many times
        // over: exactly one caller may ever see ResolvedByMe.
        let handles: Vec<_> = (0..32)
            .map(|i| {
                let arbiter = arbiter.clone();
                std::thread::spawn(move || {
                    let attempt = match i % 3 {
                        0 => RaceOutcome::Victory(PlayerId::new(1)),
                        1 => RaceOutcome::Victory(PlayerId::new(2)),
                        _ => RaceOutcome::Timeout,
                    };
                    let result = arbiter.try_resolve(attempt.clone());
                    (attempt, result)
                })
            })
            .collect();

        let results: Vec<_> = handles
            .into_iter()
            .map(|h| h.join().expect("claimant panicked"))
            .collect();

        let winners: Vec<_> = results
            .iter()
            .filter(|(_, r)| *r == Resolution::ResolvedByMe)
            .collect();
        assert_eq!(winners.len(), 1);
        assert_eq!(arbiter.current(), winners[0].0);
    }
}
