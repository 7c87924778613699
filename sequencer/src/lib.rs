// (c) Cartesi and individual authors (see AUTHORS)
// SPDX-License-Identifier: Apache-2.0 (see LICENSE)

//! Off-chain half of the express lane auction.
//!
//! Flow: bidders -> API -> auctioneer pool -> settlement on the chain
//! harness -> event feed -> express lane admission -> downstream pipeline.
//! The auctioneer and the admission lane never share state directly; the
//! admission lane learns controller assignments only from emitted events.
pub mod api;
pub mod auctioneer;
pub mod chain;
pub mod event_feed;
pub mod express_lane;
pub mod storage;
