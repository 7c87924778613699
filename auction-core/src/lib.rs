// (c) Cartesi and individual authors (see AUTHORS)
// SPDX-License-Identifier: Apache-2.0 (see LICENSE)

//! Express lane auction state machine.
//!
//! Flow: deposits -> sealed bids -> second-price settlement -> controller for
//! the upcoming round. This crate is the "on-chain" half: it executes under
//! the host ledger's total order, one call at a time, against notarized
//! timestamps. The deposit token is an external collaborator behind the
//! [`ledger::TokenLedger`] seam.
pub mod auction;
pub mod bid;
pub mod error;
pub mod events;
pub mod ledger;
pub mod round;
