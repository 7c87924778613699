// (c) Cartesi and individual authors (see AUTHORS)
// SPDX-License-Identifier: Apache-2.0 (see LICENSE)

use std::time::{SystemTime, UNIX_EPOCH};

use rusqlite::{Connection, Result};
use rusqlite_migration::{M, Migrations};

use auction_core::bid::Bid;

use super::sql::{
    sql_count_bids_for_round, sql_insert_received_bid, sql_insert_settlement_attempt,
    sql_select_bids_for_round, sql_select_settlement_outcome, sql_update_settlement_outcome,
};
use super::{SettlementOutcome, StorageOpenError, StoredBid};

const MIGRATION_0001_SCHEMA: &str = include_str!("migrations/0001_schema.sql");

/// Auctioneer-local audit log of received bids and settlement decisions.
pub struct Storage {
    conn: Connection,
}

impl Storage {
    pub fn open(path: &str, synchronous: &str) -> std::result::Result<Self, StorageOpenError> {
        let mut conn = Connection::open(path)?;
        conn.pragma_update(None, "foreign_keys", "ON")?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "synchronous", synchronous)?;
        conn.pragma_update(None, "busy_timeout", 5000)?;
        Self::run_migrations(&mut conn)?;
        Ok(Self { conn })
    }

    pub fn run_migrations(conn: &mut Connection) -> std::result::Result<(), StorageOpenError> {
        Migrations::new(vec![M::up(MIGRATION_0001_SCHEMA)]).to_latest(conn)?;
        Ok(())
    }

    pub fn record_received_bid(
        &mut self,
        signer: &alloy_primitives::Address,
        bid: &Bid,
        received_at: SystemTime,
    ) -> Result<()> {
        sql_insert_received_bid(
            &self.conn,
            u64_to_i64(bid.round),
            signer,
            &bid.controller,
            &bid.amount,
            &bid.signature.as_bytes()[..],
            to_unix_ms(received_at),
        )
    }

    pub fn bids_for_round(&mut self, round: u64) -> Result<Vec<StoredBid>> {
        sql_select_bids_for_round(&self.conn, u64_to_i64(round))
    }

    pub fn received_bid_count(&mut self, round: u64) -> Result<i64> {
        sql_count_bids_for_round(&self.conn, u64_to_i64(round))
    }

    /// Claims the settlement slot for a round. Returns false when an attempt
    /// for this round was already journaled, in which case the caller must
    /// not submit anything.
    pub fn begin_settlement(&mut self, round: u64) -> Result<bool> {
        let inserted = sql_insert_settlement_attempt(
            &self.conn,
            u64_to_i64(round),
            SettlementOutcome::Pending.as_str(),
            to_unix_ms(SystemTime::now()),
        )?;
        Ok(inserted > 0)
    }

    pub fn finish_settlement(&mut self, round: u64, outcome: SettlementOutcome) -> Result<()> {
        sql_update_settlement_outcome(&self.conn, u64_to_i64(round), outcome.as_str())?;
        Ok(())
    }

    pub fn settlement_outcome(&mut self, round: u64) -> Result<Option<SettlementOutcome>> {
        let raw = sql_select_settlement_outcome(&self.conn, u64_to_i64(round))?;
        Ok(raw.as_deref().and_then(SettlementOutcome::parse))
    }
}

fn u64_to_i64(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

fn to_unix_ms(value: SystemTime) -> i64 {
    value
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as i64
}

#[cfg(test)]
mod tests {
    use super::Storage;
    use crate::storage::SettlementOutcome;
    use alloy_primitives::{Address, Signature, U256};
    use auction_core::bid::Bid;
    use std::time::SystemTime;
    use tempfile::NamedTempFile;

    fn open_temp() -> (Storage, NamedTempFile) {
        let file = NamedTempFile::new().expect("temp db file");
        let storage = Storage::open(file.path().to_string_lossy().as_ref(), "NORMAL")
            .expect("open storage");
        (storage, file)
    }

    fn test_bid(round: u64, amount: u64) -> Bid {
        Bid {
            chain_id: 1,
            auction_contract: Address::from_slice(&[0xac; 20]),
            round,
            amount: U256::from(amount),
            controller: Address::from_slice(&[0xcc; 20]),
            signature: Signature::new(U256::from(1), U256::from(1), false),
        }
    }

    #[test]
    fn received_bids_roundtrip_through_the_log() {
        let (mut storage, _file) = open_temp();
        let signer = Address::from_slice(&[0x11; 20]);
        storage
            .record_received_bid(&signer, &test_bid(5, 100), SystemTime::now())
            .expect("record bid");
        storage
            .record_received_bid(&signer, &test_bid(5, 120), SystemTime::now())
            .expect("record replacement bid");

        let bids = storage.bids_for_round(5).expect("load bids");
        assert_eq!(bids.len(), 2);
        assert_eq!(bids[0].amount, U256::from(100_u64));
        assert_eq!(bids[1].amount, U256::from(120_u64));
        assert_eq!(bids[0].signer, signer);
        assert_eq!(storage.received_bid_count(4).expect("count"), 0);
    }

    #[test]
    fn settlement_slot_is_claimed_at_most_once() {
        let (mut storage, _file) = open_temp();
        assert!(storage.begin_settlement(7).expect("first claim"));
        assert!(!storage.begin_settlement(7).expect("second claim"));
        assert_eq!(
            storage.settlement_outcome(7).expect("outcome"),
            Some(SettlementOutcome::Pending)
        );

        storage
            .finish_settlement(7, SettlementOutcome::Submitted)
            .expect("finish");
        assert_eq!(
            storage.settlement_outcome(7).expect("outcome"),
            Some(SettlementOutcome::Submitted)
        );
    }

    #[test]
    fn settlement_guard_survives_reopen() {
        let file = NamedTempFile::new().expect("temp db file");
        let path = file.path().to_string_lossy().into_owned();
        {
            let mut storage = Storage::open(&path, "NORMAL").expect("open storage");
            assert!(storage.begin_settlement(9).expect("claim"));
        }
        let mut reopened = Storage::open(&path, "NORMAL").expect("reopen storage");
        assert!(!reopened.begin_settlement(9).expect("claim after reopen"));
    }
}
