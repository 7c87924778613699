// (c) Cartesi and individual authors (see AUTHORS)
// SPDX-License-Identifier: Apache-2.0 (see LICENSE)

use alloy_primitives::{Address, U256};
use serde::{Deserialize, Serialize};

/// Records emitted by the auction contract and consumed by off-chain
/// observers, most importantly the sequencer's admission lane. Delivery is
/// at-least-once; consumers de-duplicate on the feed offset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AuctionEvent {
    DepositSubmitted {
        bidder: Address,
        amount: U256,
    },
    WithdrawalInitiated {
        bidder: Address,
        amount: U256,
        round: u64,
    },
    WithdrawalFinalized {
        bidder: Address,
        amount: U256,
    },
    AuctionResolved {
        round: u64,
        winner: Address,
        /// Controller named by the winning bid; not necessarily the winner.
        controller: Address,
        winning_amount: U256,
        /// Second-highest bid, or the reserve for a single-bid round.
        price_paid: U256,
    },
    ExpressLaneControlDelegated {
        from: Address,
        to: Address,
        round: u64,
    },
    ReservePriceSet {
        new_value: U256,
    },
}

impl AuctionEvent {
    /// Round whose controller assignment this event affects, if any.
    pub fn controller_update(&self) -> Option<(u64, Address)> {
        match self {
            Self::AuctionResolved {
                round, controller, ..
            } => Some((*round, *controller)),
            Self::ExpressLaneControlDelegated { round, to, .. } => Some((*round, *to)),
            _ => None,
        }
    }
}
