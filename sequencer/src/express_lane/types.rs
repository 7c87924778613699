// (c) Cartesi and individual authors (see AUTHORS)
// SPDX-License-Identifier: Apache-2.0 (see LICENSE)

use std::time::SystemTime;

use alloy_primitives::{Address, B256, Bytes, Signature, U256, keccak256};
use serde::Serialize;
use thiserror::Error;
use tokio::sync::oneshot;

use auction_core::bid::{EXPRESS_LANE_TX_DOMAIN_TAG, domain_separator};

/// A transaction as it reaches the admission stage. The transport has already
/// recovered the signer; classification happens here. A transaction addressed
/// to the reserved address is an express-lane wrapper: its priority fee names
/// the round and its nonce is the per-round sequence number.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundTx {
    pub signer: Address,
    pub to: Address,
    pub max_priority_fee_per_gas: u64,
    pub nonce: u64,
    pub payload: Bytes,
}

#[derive(Debug)]
pub struct PendingTx {
    pub tx: InboundTx,
    pub respond_to: oneshot::Sender<Result<(), AdmissionError>>,
    pub received_at: SystemTime,
}

#[derive(Debug)]
pub enum AdmissionInput {
    Tx(PendingTx),
}

/// What the admission stage hands to the downstream sequencing pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "lane", rename_all = "snake_case")]
pub enum SequencedTx {
    Express {
        round: u64,
        sequence: u64,
        controller: Address,
        payload: Bytes,
    },
    Ordinary {
        signer: Address,
        to: Address,
        payload: Bytes,
    },
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AdmissionError {
    #[error("wrapper names round {got} but round {active} is active")]
    BadRoundNumber { active: u64, got: u64 },
    #[error("no express lane controller is recorded for the active round")]
    NoOnchainController,
    #[error("sender is not the express lane controller for the active round")]
    NotExpressLaneController,
    #[error("sequence number {got} is below the next expected {expected}")]
    SequenceTooLow { expected: u64, got: u64 },
}

impl AdmissionError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::BadRoundNumber { .. } => "BAD_ROUND_NUMBER",
            Self::NoOnchainController => "NO_ONCHAIN_CONTROLLER",
            Self::NotExpressLaneController => "NOT_EXPRESS_LANE_CONTROLLER",
            Self::SequenceTooLow { .. } => "BAD_SEQUENCE_NUMBER",
        }
    }
}

/// Express-lane submission on the sequencer's direct RPC path. Equivalent to
/// the wrapper-transaction form; the signature covers the keccak digest of
/// `separator || pad32(chain_id) || auction_contract || u64_be(round)
///  || u64_be(sequence_number) || keccak256(transaction)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExpressLaneSubmission {
    pub chain_id: u64,
    pub auction_contract: Address,
    pub round: u64,
    pub sequence_number: u64,
    pub transaction: Bytes,
    pub signature: Signature,
}

impl ExpressLaneSubmission {
    pub fn sig_hash(&self, domain_value: u16) -> B256 {
        let separator = domain_separator(EXPRESS_LANE_TX_DOMAIN_TAG, domain_value);
        let mut preimage = Vec::with_capacity(32 + 32 + 20 + 8 + 8 + 32);
        preimage.extend_from_slice(separator.as_slice());
        preimage.extend_from_slice(&U256::from(self.chain_id).to_be_bytes::<32>());
        preimage.extend_from_slice(self.auction_contract.as_slice());
        preimage.extend_from_slice(&self.round.to_be_bytes());
        preimage.extend_from_slice(&self.sequence_number.to_be_bytes());
        preimage.extend_from_slice(keccak256(&self.transaction).as_slice());
        keccak256(preimage)
    }

    pub fn recover_signer(&self, domain_value: u16) -> Option<Address> {
        self.signature
            .recover_address_from_prehash(&self.sig_hash(domain_value))
            .ok()
    }

    /// Maps the submission onto the wrapper-transaction form admitted by the
    /// lane.
    pub fn into_inbound(self, signer: Address, reserved_address: Address) -> InboundTx {
        InboundTx {
            signer,
            to: reserved_address,
            max_priority_fee_per_gas: self.round,
            nonce: self.sequence_number,
            payload: self.transaction,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::ExpressLaneSubmission;
    use alloy_primitives::{Address, Signature, U256};
    use k256::ecdsa::SigningKey;
    use k256::ecdsa::signature::hazmat::PrehashSigner;

    #[test]
    fn submission_signature_roundtrips_and_maps_to_wrapper_form() {
        let key = SigningKey::from_bytes((&[0x42; 32]).into()).expect("create signing key");
        let verifying = key.verifying_key().to_encoded_point(false);
        let signer = Address::from_raw_public_key(&verifying.as_bytes()[1..]);

        let mut submission = ExpressLaneSubmission {
            chain_id: 1,
            auction_contract: Address::from_slice(&[0xac; 20]),
            round: 9,
            sequence_number: 3,
            transaction: vec![0xde, 0xad].into(),
            signature: Signature::new(U256::from(1), U256::from(1), false),
        };
        let hash = submission.sig_hash(7);
        let k256_sig = key.sign_prehash(hash.as_slice()).expect("sign digest");
        submission.signature = [false, true]
            .into_iter()
            .map(|parity| Signature::from_signature_and_parity(k256_sig, parity))
            .find(|candidate| {
                candidate
                    .recover_address_from_prehash(&hash)
                    .ok()
                    .map(|recovered| recovered == signer)
                    .unwrap_or(false)
            })
            .expect("recoverable parity for signature");

        assert_eq!(submission.recover_signer(7), Some(signer));
        assert_ne!(submission.recover_signer(8), Some(signer));

        let reserved = Address::from_slice(&[0x24; 20]);
        let inbound = submission.into_inbound(signer, reserved);
        assert_eq!(inbound.to, reserved);
        assert_eq!(inbound.max_priority_fee_per_gas, 9);
        assert_eq!(inbound.nonce, 3);
        assert_eq!(inbound.signer, signer);
    }
}
