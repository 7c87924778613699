// (c) Cartesi and individual authors (see AUTHORS)
// SPDX-License-Identifier: Apache-2.0 (see LICENSE)

use std::str::FromStr;

use alloy_primitives::{Address, U256};
use rusqlite::{Connection, Result, Row, params};

use super::StoredBid;

const SQL_INSERT_RECEIVED_BID: &str = "INSERT INTO received_bids \
     (round, signer, controller, amount, signature, received_at_ms) \
     VALUES (?1, ?2, ?3, ?4, ?5, ?6)";
const SQL_SELECT_BIDS_FOR_ROUND: &str = "SELECT round, signer, controller, amount, received_at_ms \
     FROM received_bids WHERE round = ?1 ORDER BY id";
const SQL_COUNT_BIDS_FOR_ROUND: &str = "SELECT COUNT(*) FROM received_bids WHERE round = ?1";
const SQL_INSERT_SETTLEMENT_ATTEMPT: &str = "INSERT OR IGNORE INTO settlement_attempts \
     (round, outcome, attempted_at_ms) VALUES (?1, ?2, ?3)";
const SQL_UPDATE_SETTLEMENT_OUTCOME: &str =
    "UPDATE settlement_attempts SET outcome = ?2 WHERE round = ?1";
const SQL_SELECT_SETTLEMENT_OUTCOME: &str =
    "SELECT outcome FROM settlement_attempts WHERE round = ?1";

pub(super) fn sql_insert_received_bid(
    conn: &Connection,
    round: i64,
    signer: &Address,
    controller: &Address,
    amount: &U256,
    signature: &[u8],
    received_at_ms: i64,
) -> Result<()> {
    let mut stmt = conn.prepare_cached(SQL_INSERT_RECEIVED_BID)?;
    stmt.execute(params![
        round,
        signer.as_slice(),
        controller.as_slice(),
        amount.to_string(),
        signature,
        received_at_ms,
    ])?;
    Ok(())
}

pub(super) fn sql_select_bids_for_round(conn: &Connection, round: i64) -> Result<Vec<StoredBid>> {
    let mut stmt = conn.prepare_cached(SQL_SELECT_BIDS_FOR_ROUND)?;
    let mapped = stmt.query_map(params![round], convert_row_to_stored_bid)?;
    mapped.collect()
}

pub(super) fn sql_count_bids_for_round(conn: &Connection, round: i64) -> Result<i64> {
    conn.query_row(SQL_COUNT_BIDS_FOR_ROUND, params![round], |row| row.get(0))
}

pub(super) fn sql_insert_settlement_attempt(
    conn: &Connection,
    round: i64,
    outcome: &str,
    attempted_at_ms: i64,
) -> Result<usize> {
    conn.execute(
        SQL_INSERT_SETTLEMENT_ATTEMPT,
        params![round, outcome, attempted_at_ms],
    )
}

pub(super) fn sql_update_settlement_outcome(
    conn: &Connection,
    round: i64,
    outcome: &str,
) -> Result<usize> {
    conn.execute(SQL_UPDATE_SETTLEMENT_OUTCOME, params![round, outcome])
}

pub(super) fn sql_select_settlement_outcome(
    conn: &Connection,
    round: i64,
) -> Result<Option<String>> {
    let mut stmt = conn.prepare_cached(SQL_SELECT_SETTLEMENT_OUTCOME)?;
    let mut rows = stmt.query_map(params![round], |row| row.get::<_, String>(0))?;
    rows.next().transpose()
}

fn convert_row_to_stored_bid(row: &Row<'_>) -> Result<StoredBid> {
    let round: i64 = row.get(0)?;
    let signer: Vec<u8> = row.get(1)?;
    let controller: Vec<u8> = row.get(2)?;
    let amount: String = row.get(3)?;
    let received_at_ms: i64 = row.get(4)?;
    Ok(StoredBid {
        round: round as u64,
        signer: Address::from_slice(signer.as_slice()),
        controller: Address::from_slice(controller.as_slice()),
        amount: U256::from_str(amount.as_str()).unwrap_or(U256::ZERO),
        received_at_ms,
    })
}
