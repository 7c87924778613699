// (c) Cartesi and individual authors (see AUTHORS)
// SPDX-License-Identifier: Apache-2.0 (see LICENSE)

use alloy_primitives::{Address, B256, Signature, U256, keccak256};
use thiserror::Error;

/// Tag for the signed bid preimage.
pub const BID_DOMAIN_TAG: &[u8] = b"TIMEBOOST_BID";
/// Tag for signed express-lane submissions on the sequencer's direct path.
pub const EXPRESS_LANE_TX_DOMAIN_TAG: &[u8] = b"TIMEBOOST_EXPRESS_LANE_TX";

/// Domain separator binding a tag and the deployment's 16-bit domain value.
/// Signatures made under one domain value never verify under another, which
/// is what lets two preimage variants coexist during a migration.
pub fn domain_separator(tag: &[u8], domain_value: u16) -> B256 {
    let mut preimage = Vec::with_capacity(tag.len() + 2);
    preimage.extend_from_slice(tag);
    preimage.extend_from_slice(&domain_value.to_be_bytes());
    keccak256(preimage)
}

/// Precomputed bid signing domain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BidDomain {
    domain_value: u16,
    separator: B256,
}

impl BidDomain {
    pub fn new(domain_value: u16) -> Self {
        Self {
            domain_value,
            separator: domain_separator(BID_DOMAIN_TAG, domain_value),
        }
    }

    pub fn domain_value(&self) -> u16 {
        self.domain_value
    }

    pub fn separator(&self) -> B256 {
        self.separator
    }
}

/// A sealed bid for control of one round's express lane.
///
/// The signature covers the keccak digest of
/// `separator || pad32(chain_id) || auction_contract || u64_be(round)
///  || pad32(amount) || controller`, signed raw (no personal-message prefix).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Bid {
    pub chain_id: u64,
    pub auction_contract: Address,
    pub round: u64,
    pub amount: U256,
    /// Address that will control the express lane if this bid wins. Distinct
    /// from the signer so bidders can buy control for another party.
    pub controller: Address,
    pub signature: Signature,
}

impl Bid {
    pub fn sig_hash(&self, domain: &BidDomain) -> B256 {
        let mut preimage = Vec::with_capacity(32 + 32 + 20 + 8 + 32 + 20);
        preimage.extend_from_slice(domain.separator().as_slice());
        preimage.extend_from_slice(&U256::from(self.chain_id).to_be_bytes::<32>());
        preimage.extend_from_slice(self.auction_contract.as_slice());
        preimage.extend_from_slice(&self.round.to_be_bytes());
        preimage.extend_from_slice(&self.amount.to_be_bytes::<32>());
        preimage.extend_from_slice(self.controller.as_slice());
        keccak256(preimage)
    }

    pub fn recover_signer(&self, domain: &BidDomain) -> Result<Address, BidValidationError> {
        self.signature
            .recover_address_from_prehash(&self.sig_hash(domain))
            .map_err(|_| BidValidationError::BadSignature)
    }
}

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum BidValidationError {
    #[error("bid signed for a different chain id")]
    WrongChainId,
    #[error("bid addressed to a different auction contract")]
    WrongContract,
    #[error("bad round: expected {expected}, got {got}")]
    BadRound { expected: u64, got: u64 },
    #[error("bid signature does not recover a signer")]
    BadSignature,
}

/// Checks a bid against the deployment constants and recovers its signer.
/// Shared by the contract's settlement path and the auctioneer's intake so
/// both sides reject the same bids for the same reasons.
#[derive(Debug, Clone, Copy)]
pub struct BidValidator {
    pub chain_id: u64,
    pub auction_contract: Address,
    pub domain: BidDomain,
}

impl BidValidator {
    pub fn validate(&self, bid: &Bid, expected_round: u64) -> Result<Address, BidValidationError> {
        if bid.chain_id != self.chain_id {
            return Err(BidValidationError::WrongChainId);
        }
        if bid.auction_contract != self.auction_contract {
            return Err(BidValidationError::WrongContract);
        }
        if bid.round != expected_round {
            return Err(BidValidationError::BadRound {
                expected: expected_round,
                got: bid.round,
            });
        }
        bid.recover_signer(&self.domain)
    }
}

/// Deterministic tie-break: on equal amounts the winner is the bid whose hash
/// is lexicographically larger.
pub fn tiebreak_hash(signer: Address, amount: U256) -> B256 {
    let mut preimage = Vec::with_capacity(20 + 32);
    preimage.extend_from_slice(signer.as_slice());
    preimage.extend_from_slice(&amount.to_be_bytes::<32>());
    keccak256(preimage)
}
