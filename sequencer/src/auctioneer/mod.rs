// (c) Cartesi and individual authors (see AUTHORS)
// SPDX-License-Identifier: Apache-2.0 (see LICENSE)

mod error;
mod pool;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime};

use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use auction_core::bid::{Bid, BidValidator};
use auction_core::round::RoundTimingInfo;

use crate::chain::{ChainError, SettlementChain};
use crate::storage::{SettlementOutcome, Storage};

pub use error::BidSubmissionError;
pub use pool::{BidPool, ValidatedBid};

#[derive(Debug, Clone, Copy)]
pub struct AuctioneerConfig {
    pub timing: RoundTimingInfo,
    /// Cadence of the close loop's clock checks.
    pub poll_interval: Duration,
}

#[derive(Debug, Clone, Default)]
pub struct AuctioneerStop {
    shutdown: Arc<AtomicBool>,
}

impl AuctioneerStop {
    pub fn request_shutdown(&self) {
        self.shutdown.store(true, Ordering::Relaxed);
    }

    fn is_shutdown_requested(&self) -> bool {
        self.shutdown.load(Ordering::Relaxed)
    }
}

/// The trusted bid collector. Accepts signed bids for the upcoming round
/// within the intake window, and submits at most one settlement call per
/// round when the window closes.
pub struct Auctioneer {
    chain: Arc<dyn SettlementChain>,
    validator: BidValidator,
    config: AuctioneerConfig,
    pool: Mutex<BidPool>,
    storage: Mutex<Storage>,
}

impl Auctioneer {
    pub fn new(
        chain: Arc<dyn SettlementChain>,
        validator: BidValidator,
        config: AuctioneerConfig,
        storage: Storage,
    ) -> Self {
        Self {
            chain,
            validator,
            config,
            pool: Mutex::new(BidPool::default()),
            storage: Mutex::new(storage),
        }
    }

    /// Intake path. Validation order is fixed; the first failing check names
    /// the rejection. A bid that passes replaces any earlier bid from the
    /// same signer, so replaying a request never grows the pool.
    pub fn submit_bid(&self, bid: Bid) -> Result<(), BidSubmissionError> {
        if bid.chain_id != self.validator.chain_id {
            return Err(BidSubmissionError::WrongChainId);
        }
        if bid.auction_contract != self.validator.auction_contract {
            return Err(BidSubmissionError::malformed(
                "bid addressed to a different auction contract",
            ));
        }

        let now = self.chain.now();
        let upcoming = self.config.timing.upcoming_round(now);
        if bid.round != upcoming {
            return Err(BidSubmissionError::bad_round(format!(
                "bids are accepted for round {upcoming}, got {got}",
                got = bid.round
            )));
        }
        if self.config.timing.is_auction_closed(now) {
            return Err(BidSubmissionError::bad_round(format!(
                "the auction for round {upcoming} has closed"
            )));
        }

        let signer = bid
            .recover_signer(&self.validator.domain)
            .map_err(|_| BidSubmissionError::WrongSignature)?;

        let balance = self
            .chain
            .balance_of(signer)
            .map_err(|err| BidSubmissionError::Unavailable(err.to_string()))?;
        if balance.is_zero() {
            return Err(BidSubmissionError::NotDepositor);
        }
        let reserve = self
            .chain
            .current_reserve()
            .map_err(|err| BidSubmissionError::Unavailable(err.to_string()))?;
        if bid.amount < reserve {
            return Err(BidSubmissionError::ReservePriceNotMet);
        }
        if bid.amount > balance {
            return Err(BidSubmissionError::InsufficientBalance);
        }

        // The audit log is best-effort; a full disk must not break intake.
        if let Err(err) = self
            .storage
            .lock()
            .expect("audit storage mutex poisoned")
            .record_received_bid(&signer, &bid, SystemTime::now())
        {
            warn!(error = %err, round = bid.round, "failed to append bid to audit log");
        }

        info!(
            round = bid.round,
            signer = %signer,
            amount = %bid.amount,
            "accepted bid"
        );
        self.pool
            .lock()
            .expect("bid pool mutex poisoned")
            .insert(ValidatedBid { signer, bid });
        Ok(())
    }

    pub fn spawn(self: Arc<Self>) -> (JoinHandle<()>, AuctioneerStop) {
        let stop = AuctioneerStop::default();
        let loop_stop = stop.clone();
        let handle = tokio::spawn(async move {
            self.run_close_loop(loop_stop).await;
        });
        (handle, stop)
    }

    async fn run_close_loop(&self, stop: AuctioneerStop) {
        let mut last_handled: Option<u64> = None;
        while !stop.is_shutdown_requested() {
            let now = self.chain.now();
            let upcoming = self.config.timing.upcoming_round(now);
            if self.config.timing.is_auction_closed(now) && last_handled != Some(upcoming) {
                self.resolve_round(upcoming);
                last_handled = Some(upcoming);
            }
            tokio::time::sleep(self.config.poll_interval).await;
        }
    }

    /// Close-and-resolve for one round. Intake for this round is already
    /// refused by the time check, so draining the pool here is race-free.
    pub fn resolve_round(&self, round: u64) {
        let entries = self
            .pool
            .lock()
            .expect("bid pool mutex poisoned")
            .take_round(round);

        // Claim the journal slot before anything goes out. If the slot is
        // taken the settlement may already be in flight from a previous run.
        let claimed = match self
            .storage
            .lock()
            .expect("audit storage mutex poisoned")
            .begin_settlement(round)
        {
            Ok(value) => value,
            Err(err) => {
                warn!(error = %err, round, "cannot journal settlement attempt; abandoning round");
                return;
            }
        };
        if !claimed {
            warn!(round, "settlement already attempted for round; not submitting again");
            return;
        }

        let outcome = self.try_resolve(round, entries);
        if let Err(err) = self
            .storage
            .lock()
            .expect("audit storage mutex poisoned")
            .finish_settlement(round, outcome)
        {
            warn!(error = %err, round, "failed to journal settlement outcome");
        }
    }

    fn try_resolve(&self, round: u64, entries: Vec<ValidatedBid>) -> SettlementOutcome {
        let received = entries.len();

        // Balances and the reserve may have moved since intake; re-verify
        // against live state and drop entries that no longer qualify.
        let reserve = match self.chain.current_reserve() {
            Ok(value) => value,
            Err(err) => {
                warn!(error = %err, round, "cannot read reserve at close; abandoning round");
                return SettlementOutcome::Abandoned;
            }
        };
        let mut qualified = Vec::with_capacity(entries.len());
        for entry in entries {
            let balance = match self.chain.balance_of(entry.signer) {
                Ok(value) => value,
                Err(err) => {
                    warn!(error = %err, round, "cannot read balance at close; abandoning round");
                    return SettlementOutcome::Abandoned;
                }
            };
            if entry.bid.amount >= reserve && entry.bid.amount <= balance {
                qualified.push(entry);
            } else {
                debug!(
                    round,
                    signer = %entry.signer,
                    amount = %entry.bid.amount,
                    "dropping bid that no longer qualifies at close"
                );
            }
        }

        qualified.sort_by(|a, b| b.sort_key().cmp(&a.sort_key()));

        let submitted = match qualified.as_slice() {
            [] => {
                info!(round, received, "no qualifying bids; round will have no controller");
                return SettlementOutcome::NoValidBids;
            }
            [only] => self
                .chain
                .resolve_single_bid(only.bid.clone()),
            [high, low, ..] => self
                .chain
                .resolve_multi_bid(high.bid.clone(), low.bid.clone()),
        };

        match submitted {
            Ok(()) => {
                info!(round, candidates = qualified.len(), "settlement submitted");
                SettlementOutcome::Submitted
            }
            Err(ChainError::Rejected(err)) => {
                warn!(error = %err, round, "settlement rejected by contract; round abandoned");
                SettlementOutcome::Abandoned
            }
            Err(err @ ChainError::Unavailable(_)) => {
                // Outcome unknown. Abandoning beats any risk of a double
                // settlement on retry.
                warn!(error = %err, round, "settlement outcome unknown; round abandoned");
                SettlementOutcome::Abandoned
            }
        }
    }
}
