// (c) Cartesi and individual authors (see AUTHORS)
// SPDX-License-Identifier: Apache-2.0 (see LICENSE)

use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};

use alloy_primitives::{Address, U256};
use thiserror::Error;

use auction_core::auction::ExpressLaneAuction;
use auction_core::bid::Bid;
use auction_core::error::AuctionError;
use auction_core::ledger::TokenLedger;

use crate::event_feed::AuctionEventFeed;

#[derive(Debug, Error)]
pub enum ChainError {
    /// The call executed and the contract rejected it. Definitive.
    #[error("call rejected: {0}")]
    Rejected(#[from] AuctionError),
    /// The outcome of the call is unknown. The auctioneer treats this as
    /// round abandonment rather than risking a double settlement.
    #[error("chain unavailable: {0}")]
    Unavailable(String),
}

/// Surface of the ledger the auctioneer consumes: the chain clock, the
/// balance/reserve views backing bid filtering, and the settlement calls.
pub trait SettlementChain: Send + Sync {
    fn now(&self) -> u64;
    fn balance_of(&self, account: Address) -> Result<U256, ChainError>;
    fn current_reserve(&self) -> Result<U256, ChainError>;
    fn resolve_multi_bid(&self, bid_high: Bid, bid_low: Bid) -> Result<(), ChainError>;
    fn resolve_single_bid(&self, bid: Bid) -> Result<(), ChainError>;
}

/// In-process ledger harness. Calls execute one at a time under a mutex (the
/// ledger's total order), are stamped with the wall clock, and publish their
/// emitted events to the feed before the next call can run.
pub struct LocalChain<T: TokenLedger> {
    auctioneer_address: Address,
    auction: Mutex<ExpressLaneAuction<T>>,
    feed: AuctionEventFeed,
}

impl<T: TokenLedger> LocalChain<T> {
    pub fn new(auction: ExpressLaneAuction<T>, feed: AuctionEventFeed) -> Self {
        let auctioneer_address = auction.config().auctioneer;
        Self {
            auctioneer_address,
            auction: Mutex::new(auction),
            feed,
        }
    }

    pub fn feed(&self) -> &AuctionEventFeed {
        &self.feed
    }

    /// Executes one contract call atomically and publishes its events.
    pub fn execute<R>(
        &self,
        call: impl FnOnce(&mut ExpressLaneAuction<T>, u64) -> Result<R, AuctionError>,
    ) -> Result<R, ChainError> {
        let mut auction = self
            .auction
            .lock()
            .map_err(|_| ChainError::Unavailable("auction state poisoned".to_string()))?;
        let now = unix_now();
        let result = call(&mut auction, now)?;
        // Publish while still holding the call lock so feed order matches
        // ledger order.
        self.feed.publish_all(auction.take_events());
        Ok(result)
    }

    pub fn view<R>(
        &self,
        read: impl FnOnce(&ExpressLaneAuction<T>, u64) -> R,
    ) -> Result<R, ChainError> {
        let auction = self
            .auction
            .lock()
            .map_err(|_| ChainError::Unavailable("auction state poisoned".to_string()))?;
        Ok(read(&auction, unix_now()))
    }
}

impl<T: TokenLedger> SettlementChain for LocalChain<T> {
    fn now(&self) -> u64 {
        unix_now()
    }

    fn balance_of(&self, account: Address) -> Result<U256, ChainError> {
        self.view(|auction, _| auction.balance_of(account))
    }

    fn current_reserve(&self) -> Result<U256, ChainError> {
        self.view(|auction, _| auction.current_reserve())
    }

    fn resolve_multi_bid(&self, bid_high: Bid, bid_low: Bid) -> Result<(), ChainError> {
        let auctioneer = self.auctioneer_address;
        self.execute(move |auction, now| auction.resolve_multi_bid(auctioneer, bid_high, bid_low, now))
    }

    fn resolve_single_bid(&self, bid: Bid) -> Result<(), ChainError> {
        let auctioneer = self.auctioneer_address;
        self.execute(move |auction, now| auction.resolve_single_bid(auctioneer, bid, now))
    }
}

pub fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}
