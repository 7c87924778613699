// (c) Cartesi and individual authors (see AUTHORS)
// SPDX-License-Identifier: Apache-2.0 (see LICENSE)

use thiserror::Error;

/// Rejection reasons for `submit_bid`, in the order intake applies them.
/// `code()` is the wire error code bidder clients match on.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BidSubmissionError {
    #[error("{0}")]
    MalformedData(String),
    #[error("bid signed for a different chain id")]
    WrongChainId,
    #[error("{0}")]
    BadRoundNumber(String),
    #[error("bid signature does not recover a signer")]
    WrongSignature,
    #[error("bidder has no deposit on chain")]
    NotDepositor,
    #[error("bid amount below the current reserve price")]
    ReservePriceNotMet,
    #[error("bid amount exceeds the bidder's on-chain balance")]
    InsufficientBalance,
    #[error("auctioneer unavailable: {0}")]
    Unavailable(String),
}

impl BidSubmissionError {
    pub fn malformed(message: impl Into<String>) -> Self {
        Self::MalformedData(message.into())
    }

    pub fn bad_round(message: impl Into<String>) -> Self {
        Self::BadRoundNumber(message.into())
    }

    pub fn code(&self) -> &'static str {
        match self {
            Self::MalformedData(_) => "MALFORMED_DATA",
            Self::WrongChainId => "WRONG_CHAIN_ID",
            Self::BadRoundNumber(_) => "BAD_ROUND_NUMBER",
            Self::WrongSignature => "WRONG_SIGNATURE",
            Self::NotDepositor => "NOT_DEPOSITOR",
            Self::ReservePriceNotMet => "RESERVE_PRICE_NOT_MET",
            Self::InsufficientBalance => "INSUFFICIENT_BALANCE",
            Self::Unavailable(_) => "INTERNAL_ERROR",
        }
    }
}
