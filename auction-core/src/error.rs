// (c) Cartesi and individual authors (see AUTHORS)
// SPDX-License-Identifier: Apache-2.0 (see LICENSE)

use alloy_primitives::U256;
use thiserror::Error;

/// Typed abort reason for a contract call. Every failing entry point leaves
/// state untouched and surfaces exactly one of these.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AuctionError {
    #[error("amount must be nonzero")]
    ZeroAmount,
    #[error("insufficient balance: required {required}, available {available}")]
    InsufficientBalance { required: U256, available: U256 },
    #[error("token transfer failed")]
    TokenTransferFailed,
    #[error("a withdrawal is already pending")]
    WithdrawalAlreadyPending,
    #[error("no pending withdrawal")]
    NoPendingWithdrawal,
    #[error("withdrawal initiated in round {initiated_round} is not finalizable in round {current_round}")]
    WithdrawalNotMature {
        initiated_round: u64,
        current_round: u64,
    },
    #[error("caller is not the auctioneer")]
    NotAuctioneer,
    #[error("caller is not governance")]
    NotGovernance,
    #[error("caller is not the reserve pricer")]
    NotReservePricer,
    #[error("reserve price is frozen until the next round starts")]
    Blackout,
    #[error("bid amount below the current reserve price")]
    ReserveNotMet,
    #[error("bad round: expected {expected}, got {got}")]
    BadRound { expected: u64, got: u64 },
    #[error("bid signature does not recover a signer")]
    BadSignature,
    #[error("bid signed for a different chain id")]
    WrongChainId,
    #[error("bid addressed to a different auction contract")]
    WrongContract,
    #[error("both bids recover the same signer")]
    SameSigner,
    #[error("round {0} already has a settlement decision")]
    RoundAlreadyResolved(u64),
    #[error("caller does not control the round")]
    NotController,
    #[error("transferrer is locked until round {unlock_round}")]
    TransferrerLocked { unlock_round: u64 },
}
