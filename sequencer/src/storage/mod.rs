// (c) Cartesi and individual authors (see AUTHORS)
// SPDX-License-Identifier: Apache-2.0 (see LICENSE)

mod db;
mod sql;

use alloy_primitives::{Address, U256};
use thiserror::Error;

pub use db::Storage;

#[derive(Debug, Error)]
pub enum StorageOpenError {
    #[error(transparent)]
    Sqlite(#[from] rusqlite::Error),
    #[error(transparent)]
    Migration(#[from] rusqlite_migration::Error),
}

/// A bid as recorded in the audit log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredBid {
    pub round: u64,
    pub signer: Address,
    pub controller: Address,
    pub amount: U256,
    pub received_at_ms: i64,
}

/// Decision the close loop journaled for a round.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SettlementOutcome {
    /// Journaled before the settlement call went out; a crash between the
    /// journal write and the outcome update leaves this value behind, and the
    /// round stays abandoned.
    Pending,
    Submitted,
    NoValidBids,
    Abandoned,
}

impl SettlementOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Submitted => "submitted",
            Self::NoValidBids => "no_valid_bids",
            Self::Abandoned => "abandoned",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "pending" => Some(Self::Pending),
            "submitted" => Some(Self::Submitted),
            "no_valid_bids" => Some(Self::NoValidBids),
            "abandoned" => Some(Self::Abandoned),
            _ => None,
        }
    }
}
