// (c) Cartesi and individual authors (see AUTHORS)
// SPDX-License-Identifier: Apache-2.0 (see LICENSE)

use std::collections::HashMap;
use std::time::Duration;

use alloy_primitives::{Address, U256};

use crate::bid::{Bid, BidDomain, BidValidationError, BidValidator, tiebreak_hash};
use crate::error::AuctionError;
use crate::events::AuctionEvent;
use crate::ledger::{DepositLedger, PendingWithdrawal, TokenLedger};
use crate::round::RoundTimingInfo;

/// Destination of settlement proceeds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Beneficiary {
    Account(Address),
    /// Proceeds are sent to the zero address, removing them from circulation.
    Burn,
}

impl Beneficiary {
    fn payout_address(&self) -> Address {
        match self {
            Self::Account(address) => *address,
            Self::Burn => Address::ZERO,
        }
    }
}

/// Deployment constants for the auction contract.
#[derive(Debug, Clone, Copy)]
pub struct AuctionConfig {
    pub chain_id: u64,
    pub contract_address: Address,
    pub auctioneer: Address,
    pub governance: Address,
    pub reserve_pricer: Address,
    pub beneficiary: Beneficiary,
    pub domain_value: u16,
    pub timing: RoundTimingInfo,
    pub min_reserve: U256,
    pub initial_reserve: U256,
}

#[derive(Debug, Clone, Copy, Default)]
struct RoundRecord {
    controller: Option<Address>,
    /// Set once the auction for this round has a settlement decision
    /// (resolution or cancellation). A second decision is rejected.
    resolved: bool,
}

#[derive(Debug, Clone, Copy)]
struct TransferrerRecord {
    delegate: Address,
    unlock_round: Option<u64>,
}

/// The express lane auction state machine.
///
/// Every entry point executes atomically in the host ledger's total order and
/// receives the caller identity and the notarized timestamp from it. Emitted
/// events accumulate until the host drains them with [`take_events`].
///
/// [`take_events`]: ExpressLaneAuction::take_events
pub struct ExpressLaneAuction<T: TokenLedger> {
    config: AuctionConfig,
    validator: BidValidator,
    token: T,
    ledger: DepositLedger,
    min_reserve: U256,
    current_reserve: U256,
    rounds: HashMap<u64, RoundRecord>,
    transferrers: HashMap<Address, TransferrerRecord>,
    events: Vec<AuctionEvent>,
}

impl From<BidValidationError> for AuctionError {
    fn from(value: BidValidationError) -> Self {
        match value {
            BidValidationError::WrongChainId => Self::WrongChainId,
            BidValidationError::WrongContract => Self::WrongContract,
            BidValidationError::BadRound { expected, got } => Self::BadRound { expected, got },
            BidValidationError::BadSignature => Self::BadSignature,
        }
    }
}

impl<T: TokenLedger> ExpressLaneAuction<T> {
    pub fn new(config: AuctionConfig, token: T) -> Self {
        let validator = BidValidator {
            chain_id: config.chain_id,
            auction_contract: config.contract_address,
            domain: BidDomain::new(config.domain_value),
        };
        let current_reserve = config.initial_reserve.max(config.min_reserve);
        Self {
            config,
            validator,
            token,
            ledger: DepositLedger::default(),
            min_reserve: config.min_reserve,
            current_reserve,
            rounds: HashMap::new(),
            transferrers: HashMap::new(),
            events: Vec::new(),
        }
    }

    // ----- deposits and withdrawals ----------------------------------------

    pub fn submit_deposit(&mut self, caller: Address, amount: U256) -> Result<(), AuctionError> {
        if amount.is_zero() {
            return Err(AuctionError::ZeroAmount);
        }
        if !self
            .token
            .transfer_from(caller, self.config.contract_address, amount)
        {
            return Err(AuctionError::TokenTransferFailed);
        }
        self.ledger.credit(caller, amount)?;
        self.events.push(AuctionEvent::DepositSubmitted {
            bidder: caller,
            amount,
        });
        Ok(())
    }

    pub fn initiate_withdrawal(
        &mut self,
        caller: Address,
        amount: U256,
        now: u64,
    ) -> Result<(), AuctionError> {
        let round = self.config.timing.round_of(now);
        self.ledger.initiate_withdrawal(caller, amount, round)?;
        self.events.push(AuctionEvent::WithdrawalInitiated {
            bidder: caller,
            amount,
            round,
        });
        Ok(())
    }

    pub fn finalize_withdrawal(&mut self, caller: Address, now: u64) -> Result<(), AuctionError> {
        let round = self.config.timing.round_of(now);
        let amount = self.ledger.take_mature_withdrawal(caller, round)?;
        if !self.token.transfer(caller, amount) {
            self.ledger.restore_pending(
                caller,
                PendingWithdrawal {
                    amount,
                    initiated_round: round - 2,
                },
            );
            return Err(AuctionError::TokenTransferFailed);
        }
        self.events.push(AuctionEvent::WithdrawalFinalized {
            bidder: caller,
            amount,
        });
        Ok(())
    }

    // ----- settlement ------------------------------------------------------

    pub fn resolve_multi_bid(
        &mut self,
        caller: Address,
        bid_high: Bid,
        bid_low: Bid,
        now: u64,
    ) -> Result<(), AuctionError> {
        self.require_auctioneer(caller)?;
        let round = self.config.timing.upcoming_round(now);
        self.require_unresolved(round)?;

        let high_signer = self.validator.validate(&bid_high, round)?;
        let low_signer = self.validator.validate(&bid_low, round)?;
        if high_signer == low_signer {
            return Err(AuctionError::SameSigner);
        }
        if bid_high.amount < self.current_reserve || bid_low.amount < self.current_reserve {
            return Err(AuctionError::ReserveNotMet);
        }
        self.require_balance_covers(high_signer, bid_high.amount)?;
        self.require_balance_covers(low_signer, bid_low.amount)?;

        // The auctioneer is trusted to order the pair but a misordered call
        // must still settle correctly.
        let (winner, second) = order_bids((bid_high, high_signer), (bid_low, low_signer));
        let price = second.0.amount;
        self.settle(round, winner, price, now)
    }

    pub fn resolve_single_bid(
        &mut self,
        caller: Address,
        bid: Bid,
        now: u64,
    ) -> Result<(), AuctionError> {
        self.require_auctioneer(caller)?;
        let round = self.config.timing.upcoming_round(now);
        self.require_unresolved(round)?;

        let signer = self.validator.validate(&bid, round)?;
        if bid.amount < self.current_reserve {
            return Err(AuctionError::ReserveNotMet);
        }
        self.require_balance_covers(signer, bid.amount)?;

        // A lone bid pays the reserve, not its own amount.
        let price = self.current_reserve;
        self.settle(round, (bid, signer), price, now)
    }

    pub fn cancel_upcoming_round(&mut self, caller: Address, now: u64) -> Result<(), AuctionError> {
        self.require_auctioneer(caller)?;
        let round = self.config.timing.upcoming_round(now);
        self.require_unresolved(round)?;
        self.rounds.insert(
            round,
            RoundRecord {
                controller: None,
                resolved: true,
            },
        );
        self.prune_rounds(now);
        Ok(())
    }

    fn settle(
        &mut self,
        round: u64,
        winner: (Bid, Address),
        price: U256,
        now: u64,
    ) -> Result<(), AuctionError> {
        let (winning_bid, winning_signer) = winner;
        if !self
            .token
            .transfer(self.config.beneficiary.payout_address(), price)
        {
            return Err(AuctionError::TokenTransferFailed);
        }
        self.ledger.debit_for_settlement(winning_signer, price)?;
        self.rounds.insert(
            round,
            RoundRecord {
                controller: Some(winning_bid.controller),
                resolved: true,
            },
        );
        self.prune_rounds(now);
        self.events.push(AuctionEvent::AuctionResolved {
            round,
            winner: winning_signer,
            controller: winning_bid.controller,
            winning_amount: winning_bid.amount,
            price_paid: price,
        });
        Ok(())
    }

    // ----- controller transfer and delegation ------------------------------

    pub fn transfer_controller(
        &mut self,
        caller: Address,
        new_controller: Address,
        now: u64,
    ) -> Result<(), AuctionError> {
        let round = self.config.timing.round_of(now);
        let controller = self
            .rounds
            .get(&round)
            .and_then(|record| record.controller)
            .ok_or(AuctionError::NotController)?;

        let is_transferrer = self
            .transferrers
            .get(&controller)
            .map(|record| record.delegate == caller)
            .unwrap_or(false);
        if caller != controller && !is_transferrer {
            return Err(AuctionError::NotController);
        }

        self.set_round_controller(round, new_controller);
        self.events.push(AuctionEvent::ExpressLaneControlDelegated {
            from: controller,
            to: new_controller,
            round,
        });
        Ok(())
    }

    pub fn set_transferrer(
        &mut self,
        caller: Address,
        delegate: Address,
        unlock_round: Option<u64>,
        now: u64,
    ) -> Result<(), AuctionError> {
        let round = self.config.timing.round_of(now);
        if let Some(existing) = self.transferrers.get(&caller)
            && let Some(locked_until) = existing.unlock_round
            && round < locked_until
        {
            return Err(AuctionError::TransferrerLocked {
                unlock_round: locked_until,
            });
        }
        self.transferrers.insert(
            caller,
            TransferrerRecord {
                delegate,
                unlock_round,
            },
        );
        Ok(())
    }

    /// The just-crowned winner may rebind the upcoming round's controller any
    /// time before that round starts.
    pub fn delegate_express_lane(
        &mut self,
        caller: Address,
        delegate: Address,
        now: u64,
    ) -> Result<(), AuctionError> {
        let round = self.config.timing.upcoming_round(now);
        let controller = self
            .rounds
            .get(&round)
            .and_then(|record| record.controller)
            .ok_or(AuctionError::NotController)?;
        if caller != controller {
            return Err(AuctionError::NotController);
        }

        self.set_round_controller(round, delegate);
        self.events.push(AuctionEvent::ExpressLaneControlDelegated {
            from: controller,
            to: delegate,
            round,
        });
        Ok(())
    }

    // ----- reserve price ---------------------------------------------------

    pub fn set_min_reserve(&mut self, caller: Address, value: U256) -> Result<(), AuctionError> {
        if caller != self.config.governance {
            return Err(AuctionError::NotGovernance);
        }
        self.min_reserve = value;
        if self.current_reserve < value {
            self.current_reserve = value;
            self.events
                .push(AuctionEvent::ReservePriceSet { new_value: value });
        }
        Ok(())
    }

    pub fn set_current_reserve(
        &mut self,
        caller: Address,
        value: U256,
        now: u64,
    ) -> Result<(), AuctionError> {
        if caller != self.config.reserve_pricer {
            return Err(AuctionError::NotReservePricer);
        }
        if value < self.min_reserve {
            return Err(AuctionError::ReserveNotMet);
        }
        if self.config.timing.is_reserve_blackout(now) {
            return Err(AuctionError::Blackout);
        }
        self.current_reserve = value;
        self.events
            .push(AuctionEvent::ReservePriceSet { new_value: value });
        Ok(())
    }

    // ----- views -----------------------------------------------------------

    pub fn current_controller(&self, now: u64) -> Option<Address> {
        self.controller_for(self.config.timing.round_of(now))
    }

    pub fn controller_for(&self, round: u64) -> Option<Address> {
        self.rounds.get(&round).and_then(|record| record.controller)
    }

    pub fn balance_of(&self, account: Address) -> U256 {
        self.ledger.balance_of(account)
    }

    pub fn pending_withdrawal_of(&self, account: Address) -> Option<PendingWithdrawal> {
        self.ledger.pending_of(account)
    }

    pub fn round_duration(&self) -> Duration {
        self.config.timing.round_duration
    }

    pub fn initial_timestamp(&self) -> u64 {
        self.config.timing.initial_timestamp
    }

    pub fn domain_value(&self) -> u16 {
        self.config.domain_value
    }

    pub fn current_reserve(&self) -> U256 {
        self.current_reserve
    }

    pub fn min_reserve(&self) -> U256 {
        self.min_reserve
    }

    pub fn timing(&self) -> &RoundTimingInfo {
        &self.config.timing
    }

    pub fn config(&self) -> &AuctionConfig {
        &self.config
    }

    pub fn token_mut(&mut self) -> &mut T {
        &mut self.token
    }

    /// Drains events emitted since the previous drain, in emission order.
    pub fn take_events(&mut self) -> Vec<AuctionEvent> {
        std::mem::take(&mut self.events)
    }

    // ----- internals -------------------------------------------------------

    fn require_auctioneer(&self, caller: Address) -> Result<(), AuctionError> {
        if caller != self.config.auctioneer {
            return Err(AuctionError::NotAuctioneer);
        }
        Ok(())
    }

    fn require_unresolved(&self, round: u64) -> Result<(), AuctionError> {
        if self.rounds.get(&round).map(|r| r.resolved).unwrap_or(false) {
            return Err(AuctionError::RoundAlreadyResolved(round));
        }
        Ok(())
    }

    fn require_balance_covers(&self, signer: Address, amount: U256) -> Result<(), AuctionError> {
        let available = self.ledger.balance_of(signer);
        if available < amount {
            return Err(AuctionError::InsufficientBalance {
                required: amount,
                available,
            });
        }
        Ok(())
    }

    fn set_round_controller(&mut self, round: u64, controller: Address) {
        let record = self.rounds.entry(round).or_default();
        record.controller = Some(controller);
    }

    // Records for finished rounds accept no further mutations and are dropped.
    fn prune_rounds(&mut self, now: u64) {
        let current = self.config.timing.round_of(now);
        self.rounds.retain(|round, _| *round >= current);
    }
}

/// Orders a settlement pair into (winner, second), applying the tie-break on
/// equal amounts.
fn order_bids(a: (Bid, Address), b: (Bid, Address)) -> ((Bid, Address), (Bid, Address)) {
    if a.0.amount > b.0.amount {
        return (a, b);
    }
    if b.0.amount > a.0.amount {
        return (b, a);
    }
    if tiebreak_hash(a.1, a.0.amount) > tiebreak_hash(b.1, b.0.amount) {
        (a, b)
    } else {
        (b, a)
    }
}

#[cfg(test)]
mod tests {
    use super::{AuctionConfig, Beneficiary, ExpressLaneAuction};
    use crate::bid::{Bid, BidDomain, tiebreak_hash};
    use crate::error::AuctionError;
    use crate::events::AuctionEvent;
    use crate::ledger::InMemoryToken;
    use crate::round::RoundTimingInfo;
    use alloy_primitives::{Address, B256, Signature, U256};
    use k256::ecdsa::SigningKey;
    use k256::ecdsa::signature::hazmat::PrehashSigner;
    use std::time::Duration;

    const CONTRACT: [u8; 20] = [0xac; 20];
    const AUCTIONEER: [u8; 20] = [0xa1; 20];
    const GOVERNANCE: [u8; 20] = [0xb1; 20];
    const PRICER: [u8; 20] = [0xc1; 20];
    const BENEFICIARY: [u8; 20] = [0xd1; 20];

    fn addr(bytes: [u8; 20]) -> Address {
        Address::from_slice(&bytes)
    }

    fn timing() -> RoundTimingInfo {
        RoundTimingInfo {
            initial_timestamp: 0,
            round_duration: Duration::from_secs(60),
            auction_closing: Duration::from_secs(15),
            reserve_submission: Duration::from_secs(15),
        }
    }

    fn config(min_reserve: u64, initial_reserve: u64) -> AuctionConfig {
        AuctionConfig {
            chain_id: 1,
            contract_address: addr(CONTRACT),
            auctioneer: addr(AUCTIONEER),
            governance: addr(GOVERNANCE),
            reserve_pricer: addr(PRICER),
            beneficiary: Beneficiary::Account(addr(BENEFICIARY)),
            domain_value: 7,
            timing: timing(),
            min_reserve: U256::from(min_reserve),
            initial_reserve: U256::from(initial_reserve),
        }
    }

    fn auction(min_reserve: u64, initial_reserve: u64) -> ExpressLaneAuction<InMemoryToken> {
        let config = config(min_reserve, initial_reserve);
        let token = InMemoryToken::new(config.contract_address);
        ExpressLaneAuction::new(config, token)
    }

    struct Bidder {
        key: SigningKey,
        address: Address,
    }

    fn bidder(seed: u8) -> Bidder {
        let key = SigningKey::from_bytes((&[seed; 32]).into()).expect("create signing key");
        let verifying = key.verifying_key().to_encoded_point(false);
        let address = Address::from_raw_public_key(&verifying.as_bytes()[1..]);
        Bidder { key, address }
    }

    fn sign_prehash_recoverable(key: &SigningKey, hash: B256, signer: Address) -> Signature {
        let k256_sig = key.sign_prehash(hash.as_slice()).expect("sign digest");
        [false, true]
            .into_iter()
            .map(|parity| Signature::from_signature_and_parity(k256_sig, parity))
            .find(|candidate| {
                candidate
                    .recover_address_from_prehash(&hash)
                    .ok()
                    .map(|recovered| recovered == signer)
                    .unwrap_or(false)
            })
            .expect("recoverable parity for signature")
    }

    fn signed_bid(by: &Bidder, round: u64, amount: u64, controller: Address) -> Bid {
        let mut bid = Bid {
            chain_id: 1,
            auction_contract: addr(CONTRACT),
            round,
            amount: U256::from(amount),
            controller,
            signature: Signature::new(U256::from(1), U256::from(1), false),
        };
        let hash = bid.sig_hash(&BidDomain::new(7));
        bid.signature = sign_prehash_recoverable(&by.key, hash, by.address);
        bid
    }

    fn deposit(auction: &mut ExpressLaneAuction<InMemoryToken>, who: Address, amount: u64) {
        auction.token_mut().mint(who, U256::from(amount));
        auction
            .submit_deposit(who, U256::from(amount))
            .expect("deposit");
    }

    #[test]
    fn two_bidder_settlement_charges_second_price() {
        let mut auction = auction(1, 1);
        let alice = bidder(0x11);
        let bob = bidder(0x22);
        deposit(&mut auction, alice.address, 200);
        deposit(&mut auction, bob.address, 300);

        // Round 0 is active at t=10; the auction settles round 1.
        let alice_bid = signed_bid(&alice, 1, 150, alice.address);
        let bob_bid = signed_bid(&bob, 1, 100, bob.address);
        auction
            .resolve_multi_bid(addr(AUCTIONEER), alice_bid, bob_bid, 10)
            .expect("settle");

        assert_eq!(auction.balance_of(alice.address), U256::from(100_u64));
        assert_eq!(auction.balance_of(bob.address), U256::from(300_u64));
        assert_eq!(auction.controller_for(1), Some(alice.address));

        let events = auction.take_events();
        assert!(events.contains(&AuctionEvent::AuctionResolved {
            round: 1,
            winner: alice.address,
            controller: alice.address,
            winning_amount: U256::from(150_u64),
            price_paid: U256::from(100_u64),
        }));
    }

    #[test]
    fn misordered_pair_settles_identically() {
        let mut auction = auction(1, 1);
        let alice = bidder(0x11);
        let bob = bidder(0x22);
        deposit(&mut auction, alice.address, 200);
        deposit(&mut auction, bob.address, 300);

        let alice_bid = signed_bid(&alice, 1, 150, alice.address);
        let bob_bid = signed_bid(&bob, 1, 100, bob.address);
        // Low bid passed in the high slot.
        auction
            .resolve_multi_bid(addr(AUCTIONEER), bob_bid, alice_bid, 10)
            .expect("settle");

        assert_eq!(auction.balance_of(alice.address), U256::from(100_u64));
        assert_eq!(auction.controller_for(1), Some(alice.address));
    }

    #[test]
    fn equal_bids_resolve_by_tiebreak_hash() {
        let mut auction = auction(1, 1);
        let alice = bidder(0x11);
        let bob = bidder(0x22);
        deposit(&mut auction, alice.address, 100);
        deposit(&mut auction, bob.address, 100);

        let amount = U256::from(50_u64);
        let expected_winner =
            if tiebreak_hash(alice.address, amount) > tiebreak_hash(bob.address, amount) {
                alice.address
            } else {
                bob.address
            };

        let alice_bid = signed_bid(&alice, 1, 50, alice.address);
        let bob_bid = signed_bid(&bob, 1, 50, bob.address);
        auction
            .resolve_multi_bid(addr(AUCTIONEER), alice_bid, bob_bid, 10)
            .expect("settle");

        assert_eq!(auction.controller_for(1), Some(expected_winner));
        // Winner pays the tied amount, loser pays nothing.
        assert_eq!(auction.balance_of(expected_winner), U256::from(50_u64));
        let loser = if expected_winner == alice.address {
            bob.address
        } else {
            alice.address
        };
        assert_eq!(auction.balance_of(loser), U256::from(100_u64));
    }

    #[test]
    fn single_bid_pays_the_reserve() {
        let mut auction = auction(10, 10);
        let alice = bidder(0x11);
        deposit(&mut auction, alice.address, 100);

        let bid = signed_bid(&alice, 1, 40, alice.address);
        auction
            .resolve_single_bid(addr(AUCTIONEER), bid, 10)
            .expect("settle");

        assert_eq!(auction.balance_of(alice.address), U256::from(90_u64));
        assert_eq!(auction.controller_for(1), Some(alice.address));
    }

    #[test]
    fn settlement_pays_the_beneficiary() {
        let mut auction = auction(10, 10);
        let alice = bidder(0x11);
        deposit(&mut auction, alice.address, 100);

        let bid = signed_bid(&alice, 1, 40, alice.address);
        auction
            .resolve_single_bid(addr(AUCTIONEER), bid, 10)
            .expect("settle");

        assert_eq!(
            auction.token_mut().balance_of(addr(BENEFICIARY)),
            U256::from(10_u64)
        );
    }

    #[test]
    fn second_settlement_for_a_round_is_rejected() {
        let mut auction = auction(1, 1);
        let alice = bidder(0x11);
        let bob = bidder(0x22);
        deposit(&mut auction, alice.address, 200);
        deposit(&mut auction, bob.address, 300);

        let alice_bid = signed_bid(&alice, 1, 150, alice.address);
        let bob_bid = signed_bid(&bob, 1, 100, bob.address);
        auction
            .resolve_multi_bid(addr(AUCTIONEER), alice_bid, bob_bid.clone(), 10)
            .expect("settle");

        assert_eq!(
            auction
                .resolve_single_bid(addr(AUCTIONEER), bob_bid, 11)
                .unwrap_err(),
            AuctionError::RoundAlreadyResolved(1)
        );
    }

    #[test]
    fn settlement_requires_the_auctioneer() {
        let mut auction = auction(1, 1);
        let alice = bidder(0x11);
        deposit(&mut auction, alice.address, 100);
        let bid = signed_bid(&alice, 1, 40, alice.address);
        assert_eq!(
            auction
                .resolve_single_bid(alice.address, bid, 10)
                .unwrap_err(),
            AuctionError::NotAuctioneer
        );
    }

    #[test]
    fn settlement_rejects_identical_signers() {
        let mut auction = auction(1, 1);
        let alice = bidder(0x11);
        deposit(&mut auction, alice.address, 200);

        let first = signed_bid(&alice, 1, 150, alice.address);
        let second = signed_bid(&alice, 1, 100, alice.address);
        assert_eq!(
            auction
                .resolve_multi_bid(addr(AUCTIONEER), first, second, 10)
                .unwrap_err(),
            AuctionError::SameSigner
        );
    }

    #[test]
    fn settlement_rejects_underfunded_bids() {
        let mut auction = auction(1, 1);
        let alice = bidder(0x11);
        let bob = bidder(0x22);
        deposit(&mut auction, alice.address, 100);
        deposit(&mut auction, bob.address, 300);

        let alice_bid = signed_bid(&alice, 1, 150, alice.address);
        let bob_bid = signed_bid(&bob, 1, 100, bob.address);
        assert_eq!(
            auction
                .resolve_multi_bid(addr(AUCTIONEER), alice_bid, bob_bid, 10)
                .unwrap_err(),
            AuctionError::InsufficientBalance {
                required: U256::from(150_u64),
                available: U256::from(100_u64),
            }
        );
    }

    #[test]
    fn settlement_rejects_bids_below_reserve() {
        let mut auction = auction(50, 50);
        let alice = bidder(0x11);
        deposit(&mut auction, alice.address, 100);
        let bid = signed_bid(&alice, 1, 40, alice.address);
        assert_eq!(
            auction
                .resolve_single_bid(addr(AUCTIONEER), bid, 10)
                .unwrap_err(),
            AuctionError::ReserveNotMet
        );
    }

    #[test]
    fn settlement_rejects_wrong_round_bids() {
        let mut auction = auction(1, 1);
        let alice = bidder(0x11);
        deposit(&mut auction, alice.address, 100);
        let bid = signed_bid(&alice, 2, 40, alice.address);
        assert_eq!(
            auction
                .resolve_single_bid(addr(AUCTIONEER), bid, 10)
                .unwrap_err(),
            AuctionError::BadRound { expected: 1, got: 2 }
        );
    }

    #[test]
    fn cancel_marks_the_round_decided() {
        let mut auction = auction(1, 1);
        let alice = bidder(0x11);
        deposit(&mut auction, alice.address, 100);

        auction
            .cancel_upcoming_round(addr(AUCTIONEER), 10)
            .expect("cancel");
        assert_eq!(auction.controller_for(1), None);

        let bid = signed_bid(&alice, 1, 40, alice.address);
        assert_eq!(
            auction
                .resolve_single_bid(addr(AUCTIONEER), bid, 11)
                .unwrap_err(),
            AuctionError::RoundAlreadyResolved(1)
        );
    }

    #[test]
    fn winner_may_delegate_before_round_start() {
        let mut auction = auction(1, 1);
        let alice = bidder(0x11);
        deposit(&mut auction, alice.address, 100);
        let delegate = addr([0x99; 20]);

        let bid = signed_bid(&alice, 1, 40, alice.address);
        auction
            .resolve_single_bid(addr(AUCTIONEER), bid, 10)
            .expect("settle");
        auction
            .delegate_express_lane(alice.address, delegate, 20)
            .expect("delegate");

        assert_eq!(auction.controller_for(1), Some(delegate));
        let events = auction.take_events();
        assert!(events.contains(&AuctionEvent::ExpressLaneControlDelegated {
            from: alice.address,
            to: delegate,
            round: 1,
        }));
    }

    #[test]
    fn delegation_requires_the_upcoming_controller() {
        let mut auction = auction(1, 1);
        let alice = bidder(0x11);
        deposit(&mut auction, alice.address, 100);
        let bid = signed_bid(&alice, 1, 40, alice.address);
        auction
            .resolve_single_bid(addr(AUCTIONEER), bid, 10)
            .expect("settle");

        assert_eq!(
            auction
                .delegate_express_lane(addr([0x88; 20]), addr([0x99; 20]), 20)
                .unwrap_err(),
            AuctionError::NotController
        );
    }

    #[test]
    fn transferrer_can_move_control_during_the_round() {
        let mut auction = auction(1, 1);
        let alice = bidder(0x11);
        deposit(&mut auction, alice.address, 100);
        let transferrer = addr([0x77; 20]);
        let new_controller = addr([0x99; 20]);

        let bid = signed_bid(&alice, 1, 40, alice.address);
        auction
            .resolve_single_bid(addr(AUCTIONEER), bid, 10)
            .expect("settle");
        // Round 1 active from t=60. Alice registers a transferrer with a lock
        // until round 6; the transferrer hands control to a new party.
        auction
            .set_transferrer(alice.address, transferrer, Some(6), 70)
            .expect("set transferrer");
        auction
            .transfer_controller(transferrer, new_controller, 80)
            .expect("transfer");

        assert_eq!(auction.controller_for(1), Some(new_controller));

        // The old transferrer has no authority over the new controller.
        assert_eq!(
            auction
                .transfer_controller(transferrer, addr([0x55; 20]), 90)
                .unwrap_err(),
            AuctionError::NotController
        );

        // Alice's transferrer registration stays locked until round 6.
        assert_eq!(
            auction
                .set_transferrer(alice.address, addr([0x44; 20]), None, 130)
                .unwrap_err(),
            AuctionError::TransferrerLocked { unlock_round: 6 }
        );
        auction
            .set_transferrer(alice.address, addr([0x44; 20]), None, 6 * 60)
            .expect("lock expired");
    }

    #[test]
    fn transfer_requires_controller_or_transferrer() {
        let mut auction = auction(1, 1);
        let alice = bidder(0x11);
        deposit(&mut auction, alice.address, 100);
        let bid = signed_bid(&alice, 1, 40, alice.address);
        auction
            .resolve_single_bid(addr(AUCTIONEER), bid, 10)
            .expect("settle");

        assert_eq!(
            auction
                .transfer_controller(addr([0x66; 20]), addr([0x99; 20]), 70)
                .unwrap_err(),
            AuctionError::NotController
        );
    }

    #[test]
    fn reserve_updates_respect_floor_and_blackout() {
        let mut auction = auction(10, 20);

        assert_eq!(
            auction
                .set_current_reserve(addr(PRICER), U256::from(5_u64), 10)
                .unwrap_err(),
            AuctionError::ReserveNotMet
        );
        assert_eq!(
            auction
                .set_current_reserve(addr([0x12; 20]), U256::from(30_u64), 10)
                .unwrap_err(),
            AuctionError::NotReservePricer
        );

        // Round 1 starts at 60; blackout covers [30, 60).
        assert_eq!(
            auction
                .set_current_reserve(addr(PRICER), U256::from(30_u64), 40)
                .unwrap_err(),
            AuctionError::Blackout
        );
        auction
            .set_current_reserve(addr(PRICER), U256::from(30_u64), 29)
            .expect("update outside blackout");
        assert_eq!(auction.current_reserve(), U256::from(30_u64));
    }

    #[test]
    fn raising_min_reserve_lifts_current_reserve() {
        let mut auction = auction(10, 20);
        assert_eq!(
            auction
                .set_min_reserve(addr([0x12; 20]), U256::from(50_u64))
                .unwrap_err(),
            AuctionError::NotGovernance
        );
        auction
            .set_min_reserve(addr(GOVERNANCE), U256::from(50_u64))
            .expect("set min reserve");
        assert_eq!(auction.min_reserve(), U256::from(50_u64));
        assert_eq!(auction.current_reserve(), U256::from(50_u64));
    }

    #[test]
    fn deposit_withdraw_roundtrip_returns_exact_amount() {
        let mut auction = auction(1, 1);
        let alice = bidder(0x11);
        auction.token_mut().mint(alice.address, U256::from(70_u64));
        auction
            .submit_deposit(alice.address, U256::from(70_u64))
            .expect("deposit");
        assert_eq!(auction.token_mut().balance_of(alice.address), U256::ZERO);

        // Initiate in round 7, finalize two rounds later.
        auction
            .initiate_withdrawal(alice.address, U256::from(70_u64), 7 * 60)
            .expect("initiate");
        assert_eq!(
            auction.finalize_withdrawal(alice.address, 8 * 60).unwrap_err(),
            AuctionError::WithdrawalNotMature {
                initiated_round: 7,
                current_round: 8
            }
        );
        auction
            .finalize_withdrawal(alice.address, 9 * 60)
            .expect("finalize");
        assert_eq!(
            auction.token_mut().balance_of(alice.address),
            U256::from(70_u64)
        );
    }

    #[test]
    fn deposit_of_unapproved_funds_fails() {
        let mut auction = auction(1, 1);
        let alice = bidder(0x11);
        assert_eq!(
            auction
                .submit_deposit(alice.address, U256::from(5_u64))
                .unwrap_err(),
            AuctionError::TokenTransferFailed
        );
        assert_eq!(
            auction.submit_deposit(alice.address, U256::ZERO).unwrap_err(),
            AuctionError::ZeroAmount
        );
    }

    #[test]
    fn escrow_matches_token_custody_across_the_lifecycle() {
        let mut auction = auction(1, 1);
        let alice = bidder(0x11);
        let bob = bidder(0x22);
        deposit(&mut auction, alice.address, 200);
        deposit(&mut auction, bob.address, 300);
        assert_eq!(
            auction.token_mut().balance_of(addr(CONTRACT)),
            U256::from(500_u64)
        );

        let alice_bid = signed_bid(&alice, 1, 150, alice.address);
        let bob_bid = signed_bid(&bob, 1, 100, bob.address);
        auction
            .resolve_multi_bid(addr(AUCTIONEER), alice_bid, bob_bid, 10)
            .expect("settle");
        // 100 left custody toward the beneficiary.
        assert_eq!(
            auction.token_mut().balance_of(addr(CONTRACT)),
            U256::from(400_u64)
        );

        auction
            .initiate_withdrawal(bob.address, U256::from(300_u64), 60)
            .expect("initiate");
        // Pending funds stay in custody until finalization.
        assert_eq!(
            auction.token_mut().balance_of(addr(CONTRACT)),
            U256::from(400_u64)
        );
        auction
            .finalize_withdrawal(bob.address, 3 * 60)
            .expect("finalize");
        assert_eq!(
            auction.token_mut().balance_of(addr(CONTRACT)),
            U256::from(100_u64)
        );
        assert_eq!(auction.balance_of(alice.address), U256::from(100_u64));
    }

    #[test]
    fn past_round_records_are_pruned() {
        let mut auction = auction(1, 1);
        let alice = bidder(0x11);
        deposit(&mut auction, alice.address, 100);
        let bid = signed_bid(&alice, 1, 40, alice.address);
        auction
            .resolve_single_bid(addr(AUCTIONEER), bid, 10)
            .expect("settle");
        assert_eq!(auction.controller_for(1), Some(alice.address));

        // A settlement in round 5 prunes the round-1 record.
        auction
            .cancel_upcoming_round(addr(AUCTIONEER), 5 * 60 + 10)
            .expect("cancel");
        assert_eq!(auction.controller_for(1), None);
    }
}
