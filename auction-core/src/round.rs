// (c) Cartesi and individual authors (see AUTHORS)
// SPDX-License-Identifier: Apache-2.0 (see LICENSE)

use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Round timing parameters fixed at deployment.
///
/// Rounds are half-open intervals `[T0 + r*D, T0 + (r+1)*D)` over notarized
/// unix timestamps. All derivations here are pure; the contract and the
/// off-chain services share one copy so they agree on round boundaries.
#[derive(Debug, Clone, Copy)]
pub struct RoundTimingInfo {
    /// Unix timestamp of the start of round 0. Expected to be a multiple of
    /// the round duration.
    pub initial_timestamp: u64,
    pub round_duration: Duration,
    /// Bid intake for the upcoming round stops this long before it starts.
    pub auction_closing: Duration,
    /// Minimum stretch of stable reserve price bidders get before close.
    pub reserve_submission: Duration,
}

impl RoundTimingInfo {
    pub fn round_of(&self, now: u64) -> u64 {
        now.saturating_sub(self.initial_timestamp) / self.round_duration_secs()
    }

    pub fn round_start(&self, round: u64) -> u64 {
        self.initial_timestamp + round * self.round_duration_secs()
    }

    /// The round currently being auctioned: one past the active round.
    pub fn upcoming_round(&self, now: u64) -> u64 {
        self.round_of(now) + 1
    }

    /// Instant at which bid intake for `round` stops.
    pub fn auction_close_time(&self, round: u64) -> u64 {
        self.round_start(round)
            .saturating_sub(self.auction_closing.as_secs())
    }

    /// True once intake for the upcoming round has closed.
    pub fn is_auction_closed(&self, now: u64) -> bool {
        now >= self.auction_close_time(self.upcoming_round(now))
    }

    /// True inside the reserve blackout window
    /// `[next_start - auction_closing - reserve_submission, next_start)`.
    pub fn is_reserve_blackout(&self, now: u64) -> bool {
        let next_start = self.round_start(self.upcoming_round(now));
        let blackout_start = next_start
            .saturating_sub(self.auction_closing.as_secs())
            .saturating_sub(self.reserve_submission.as_secs());
        now >= blackout_start
    }

    pub fn round_duration_secs(&self) -> u64 {
        self.round_duration.as_secs().max(1)
    }

    /// Startup sanity check: the local clock and the ledger clock must agree
    /// to well within the auction closing window, or close-time decisions on
    /// the two sides diverge.
    pub fn validate_against_system_clock(&self, ledger_now: u64) -> Result<(), Duration> {
        let local = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs();
        let skew = Duration::from_secs(local.abs_diff(ledger_now));
        if skew * 4 >= self.auction_closing {
            return Err(skew);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::RoundTimingInfo;
    use std::time::Duration;

    fn timing() -> RoundTimingInfo {
        RoundTimingInfo {
            initial_timestamp: 600,
            round_duration: Duration::from_secs(60),
            auction_closing: Duration::from_secs(15),
            reserve_submission: Duration::from_secs(15),
        }
    }

    #[test]
    fn round_of_respects_half_open_boundaries() {
        let timing = timing();
        assert_eq!(timing.round_of(600), 0);
        assert_eq!(timing.round_of(659), 0);
        assert_eq!(timing.round_of(660), 1);
        assert_eq!(timing.round_of(720), 2);
    }

    #[test]
    fn timestamps_before_genesis_map_to_round_zero() {
        let timing = timing();
        assert_eq!(timing.round_of(0), 0);
        assert_eq!(timing.round_of(599), 0);
    }

    #[test]
    fn auction_closes_fifteen_seconds_before_round_start() {
        let timing = timing();
        // Upcoming round 1 starts at 660; close at 645.
        assert!(!timing.is_auction_closed(644));
        assert!(timing.is_auction_closed(645));
        assert!(timing.is_auction_closed(659));
        // At 660 round 1 is active and the auction for round 2 is open again.
        assert!(!timing.is_auction_closed(660));
    }

    #[test]
    fn blackout_covers_closing_plus_reserve_submission() {
        let timing = timing();
        // Round 1 starts at 660; blackout covers [630, 660).
        assert!(!timing.is_reserve_blackout(629));
        assert!(timing.is_reserve_blackout(630));
        assert!(timing.is_reserve_blackout(640));
        assert!(timing.is_reserve_blackout(659));
        assert!(!timing.is_reserve_blackout(660));
    }

    #[test]
    fn upcoming_round_is_one_past_active() {
        let timing = timing();
        assert_eq!(timing.upcoming_round(600), 1);
        assert_eq!(timing.upcoming_round(659), 1);
        assert_eq!(timing.upcoming_round(660), 2);
    }
}
