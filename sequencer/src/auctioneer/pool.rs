// (c) Cartesi and individual authors (see AUTHORS)
// SPDX-License-Identifier: Apache-2.0 (see LICENSE)

use std::collections::HashMap;

use alloy_primitives::{Address, B256, U256};

use auction_core::bid::{Bid, tiebreak_hash};

/// A bid that passed intake, keyed by its recovered signer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatedBid {
    pub signer: Address,
    pub bid: Bid,
}

impl ValidatedBid {
    /// Selection order: amount first, tie broken by the same hash the
    /// contract uses, so the auctioneer's pick and the contract's recomputed
    /// winner never disagree.
    pub fn sort_key(&self) -> (U256, B256) {
        (self.bid.amount, tiebreak_hash(self.signer, self.bid.amount))
    }
}

/// Per-round bid pool. One slot per signer; a later bid replaces an earlier
/// one. Bids for a newer round evict the whole pool, since the old round can
/// no longer be settled.
#[derive(Debug, Default)]
pub struct BidPool {
    round: u64,
    bids: HashMap<Address, ValidatedBid>,
}

impl BidPool {
    pub fn insert(&mut self, entry: ValidatedBid) {
        if entry.bid.round != self.round {
            self.bids.clear();
            self.round = entry.bid.round;
        }
        self.bids.insert(entry.signer, entry);
    }

    /// Removes and returns all bids for `round`; leaves bids for any other
    /// round untouched.
    pub fn take_round(&mut self, round: u64) -> Vec<ValidatedBid> {
        if self.round != round {
            return Vec::new();
        }
        self.bids.drain().map(|(_, bid)| bid).collect()
    }

    pub fn len(&self) -> usize {
        self.bids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bids.is_empty()
    }
}
