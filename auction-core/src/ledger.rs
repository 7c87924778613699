// (c) Cartesi and individual authors (see AUTHORS)
// SPDX-License-Identifier: Apache-2.0 (see LICENSE)

use std::collections::HashMap;

use alloy_primitives::{Address, U256};

use crate::error::AuctionError;

/// External deposit-token seam. The real token is an ERC-20-style contract;
/// the auction only relies on transfer success/failure.
pub trait TokenLedger: Send {
    fn transfer_from(&mut self, owner: Address, to: Address, amount: U256) -> bool;
    fn transfer(&mut self, to: Address, amount: U256) -> bool;
}

/// In-memory token ledger used by the local chain harness and tests.
/// Spending approval is assumed to have been granted out of band. `transfer`
/// spends from the escrow account, mirroring an ERC-20 call made by the
/// auction contract itself.
#[derive(Debug)]
pub struct InMemoryToken {
    escrow: Address,
    balances: HashMap<Address, U256>,
}

impl InMemoryToken {
    pub fn new(escrow: Address) -> Self {
        Self {
            escrow,
            balances: HashMap::new(),
        }
    }

    pub fn mint(&mut self, account: Address, amount: U256) {
        let entry = self.balances.entry(account).or_insert(U256::ZERO);
        *entry += amount;
    }

    pub fn balance_of(&self, account: Address) -> U256 {
        self.balances.get(&account).copied().unwrap_or(U256::ZERO)
    }

    fn move_tokens(&mut self, from: Address, to: Address, amount: U256) -> bool {
        let from_balance = self.balance_of(from);
        if from_balance < amount {
            return false;
        }
        self.balances.insert(from, from_balance - amount);
        let to_balance = self.balance_of(to);
        self.balances.insert(to, to_balance + amount);
        true
    }
}

impl TokenLedger for InMemoryToken {
    fn transfer_from(&mut self, owner: Address, to: Address, amount: U256) -> bool {
        self.move_tokens(owner, to, amount)
    }

    fn transfer(&mut self, to: Address, amount: U256) -> bool {
        let escrow = self.escrow;
        self.move_tokens(escrow, to, amount)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PendingWithdrawal {
    pub amount: U256,
    pub initiated_round: u64,
}

/// Escrowed balances with delayed withdrawal, per account.
///
/// `pending.amount` is subtracted from `balance` at initiation, so `balance`
/// is always the amount available for bidding and settlement debits.
#[derive(Debug, Default)]
pub struct DepositLedger {
    balances: HashMap<Address, U256>,
    pending: HashMap<Address, PendingWithdrawal>,
}

impl DepositLedger {
    pub fn balance_of(&self, account: Address) -> U256 {
        self.balances.get(&account).copied().unwrap_or(U256::ZERO)
    }

    pub fn pending_of(&self, account: Address) -> Option<PendingWithdrawal> {
        self.pending.get(&account).copied()
    }

    pub fn credit(&mut self, account: Address, amount: U256) -> Result<(), AuctionError> {
        if amount.is_zero() {
            return Err(AuctionError::ZeroAmount);
        }
        let balance = self.balance_of(account);
        self.balances.insert(account, balance + amount);
        Ok(())
    }

    pub fn initiate_withdrawal(
        &mut self,
        account: Address,
        amount: U256,
        current_round: u64,
    ) -> Result<(), AuctionError> {
        if amount.is_zero() {
            return Err(AuctionError::ZeroAmount);
        }
        if self.pending.contains_key(&account) {
            return Err(AuctionError::WithdrawalAlreadyPending);
        }
        let balance = self.balance_of(account);
        if balance < amount {
            return Err(AuctionError::InsufficientBalance {
                required: amount,
                available: balance,
            });
        }
        self.balances.insert(account, balance - amount);
        self.pending.insert(
            account,
            PendingWithdrawal {
                amount,
                initiated_round: current_round,
            },
        );
        Ok(())
    }

    /// Checks maturity and removes the pending entry, returning the amount to
    /// pay out. The caller performs the token transfer and must restore the
    /// entry if that transfer fails, keeping the call atomic.
    pub fn take_mature_withdrawal(
        &mut self,
        account: Address,
        current_round: u64,
    ) -> Result<U256, AuctionError> {
        let pending = self
            .pending
            .get(&account)
            .copied()
            .ok_or(AuctionError::NoPendingWithdrawal)?;
        if current_round != pending.initiated_round + 2 {
            return Err(AuctionError::WithdrawalNotMature {
                initiated_round: pending.initiated_round,
                current_round,
            });
        }
        self.pending.remove(&account);
        Ok(pending.amount)
    }

    pub fn restore_pending(&mut self, account: Address, pending: PendingWithdrawal) {
        self.pending.insert(account, pending);
    }

    pub fn debit_for_settlement(
        &mut self,
        account: Address,
        amount: U256,
    ) -> Result<(), AuctionError> {
        let balance = self.balance_of(account);
        if balance < amount {
            return Err(AuctionError::InsufficientBalance {
                required: amount,
                available: balance,
            });
        }
        self.balances.insert(account, balance - amount);
        Ok(())
    }

    /// Total escrow the ledger believes it holds: free balances plus pending
    /// withdrawals that have not left the contract yet.
    pub fn escrowed_total(&self) -> U256 {
        let free = self
            .balances
            .values()
            .fold(U256::ZERO, |acc, balance| acc + *balance);
        self.pending
            .values()
            .fold(free, |acc, pending| acc + pending.amount)
    }
}
