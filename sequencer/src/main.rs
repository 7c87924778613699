// (c) Cartesi and individual authors (see AUTHORS)
// SPDX-License-Identifier: Apache-2.0 (see LICENSE)

use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use alloy_primitives::{Address, U256};
use tracing_subscriber::EnvFilter;

use auction_core::auction::{AuctionConfig, Beneficiary, ExpressLaneAuction};
use auction_core::bid::{BidDomain, BidValidator};
use auction_core::ledger::InMemoryToken;
use auction_core::round::RoundTimingInfo;

use sequencer::api::{self, AppState};
use sequencer::auctioneer::{Auctioneer, AuctioneerConfig};
use sequencer::chain::{LocalChain, SettlementChain, unix_now};
use sequencer::event_feed::AuctionEventFeed;
use sequencer::express_lane::{
    AdmissionInput, ExpressLane, ExpressLaneConfig, ExpressLaneError, SequencedTx,
};
use sequencer::storage::Storage;

const DEFAULT_HTTP_ADDR: &str = "127.0.0.1:3000";
const DEFAULT_DB_PATH: &str = "auctioneer.db";
const DEFAULT_CHAIN_ID: u64 = 1;
const DEFAULT_AUCTION_CONTRACT: &str = "0xacacacacacacacacacacacacacacacacacacacac";
const DEFAULT_AUCTIONEER_ADDR: &str = "0xa1a1a1a1a1a1a1a1a1a1a1a1a1a1a1a1a1a1a1a1";
const DEFAULT_GOVERNANCE_ADDR: &str = "0xb1b1b1b1b1b1b1b1b1b1b1b1b1b1b1b1b1b1b1b1";
const DEFAULT_RESERVE_PRICER_ADDR: &str = "0xc1c1c1c1c1c1c1c1c1c1c1c1c1c1c1c1c1c1c1c1";
const DEFAULT_BENEFICIARY_ADDR: &str = "0x3424242424242424242424242424242424242424";
const DEFAULT_RESERVED_ADDR: &str = "0x2424242424242424242424242424242424242424";
const DEFAULT_DOMAIN_VALUE: u16 = 1;
const DEFAULT_ROUND_DURATION_SECS: u64 = 60;
const DEFAULT_AUCTION_CLOSING_SECS: u64 = 15;
const DEFAULT_RESERVE_SUBMISSION_SECS: u64 = 15;
const DEFAULT_NON_EXPRESS_DELAY_MS: u64 = 200;
const DEFAULT_MIN_RESERVE: &str = "1";
const DEFAULT_QUEUE_CAP: usize = 1024;
const DEFAULT_QUEUE_TIMEOUT_MS: u64 = 100;
const DEFAULT_MAX_BODY_BYTES: usize = 128 * 1024;
const DEFAULT_MAX_SEQUENCE_BUFFER: usize = 1024;
const DEFAULT_MAX_TXS_PER_CHUNK: usize = 64;
const DEFAULT_IDLE_POLL_INTERVAL_MS: u64 = 2;
const DEFAULT_CLOSE_POLL_INTERVAL_MS: u64 = 250;
const DEFAULT_FEED_BUFFER_CAPACITY: usize = 1024;
const DEFAULT_SQLITE_SYNCHRONOUS: &str = "NORMAL";

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = Config::from_env()?;
    let timing = config.timing();

    let auction_config = AuctionConfig {
        chain_id: config.chain_id,
        contract_address: config.auction_contract,
        auctioneer: config.auctioneer_addr,
        governance: config.governance_addr,
        reserve_pricer: config.reserve_pricer_addr,
        beneficiary: config.beneficiary,
        domain_value: config.domain_value,
        timing,
        min_reserve: config.min_reserve,
        initial_reserve: config.min_reserve,
    };

    let mut auction = ExpressLaneAuction::new(
        auction_config,
        InMemoryToken::new(config.auction_contract),
    );
    for (account, amount) in &config.dev_accounts {
        auction.token_mut().mint(*account, *amount);
    }

    let feed = AuctionEventFeed::new(config.feed_buffer_capacity);
    let chain = Arc::new(LocalChain::new(auction, feed.clone()));
    for (account, amount) in &config.dev_accounts {
        chain
            .execute(|auction, _now| auction.submit_deposit(*account, *amount))
            .map_err(|err| format!("failed to seed deposit for {account}: {err}"))?;
        tracing::info!(account = %account, amount = %amount, "seeded dev deposit");
    }

    timing
        .validate_against_system_clock(chain.now())
        .map_err(|skew| format!("ledger clock skew {skew:?} too close to the closing window"))?;

    let storage = Storage::open(&config.db_path, &config.sqlite_synchronous)?;
    let validator = BidValidator {
        chain_id: config.chain_id,
        auction_contract: config.auction_contract,
        domain: BidDomain::new(config.domain_value),
    };
    let auctioneer = Arc::new(Auctioneer::new(
        chain.clone() as Arc<dyn SettlementChain>,
        validator,
        AuctioneerConfig {
            timing,
            poll_interval: config.close_poll_interval,
        },
        storage,
    ));
    let (mut auctioneer_handle, auctioneer_stop) = Arc::clone(&auctioneer).spawn();

    let (admission_tx, admission_rx) =
        tokio::sync::mpsc::channel::<AdmissionInput>(config.queue_capacity);
    let (downstream_tx, mut downstream_rx) =
        tokio::sync::mpsc::channel::<SequencedTx>(config.queue_capacity);
    let lane = ExpressLane::new(
        admission_rx,
        feed.subscribe(),
        downstream_tx,
        ExpressLaneConfig {
            timing,
            reserved_address: config.reserved_address,
            non_express_delay: config.non_express_delay,
            max_sequence_buffer: config.max_sequence_buffer,
            max_txs_per_chunk: config.max_txs_per_chunk,
            idle_poll_interval: config.idle_poll_interval,
        },
    );
    let (mut lane_handle, lane_stop) = lane.spawn();

    // Stand-in for the downstream sequencing pipeline: consume and trace.
    tokio::spawn(async move {
        while let Some(tx) = downstream_rx.recv().await {
            match tx {
                SequencedTx::Express {
                    round, sequence, ..
                } => tracing::info!(round, sequence, "sequenced express lane tx"),
                SequencedTx::Ordinary { signer, .. } => {
                    tracing::info!(signer = %signer, "sequenced ordinary tx")
                }
            }
        }
    });

    let state = Arc::new(AppState {
        auctioneer,
        admission: admission_tx,
        feed,
        chain_id: config.chain_id,
        auction_contract: config.auction_contract,
        reserved_address: config.reserved_address,
        domain_value: config.domain_value,
        queue_timeout: Duration::from_millis(config.queue_timeout_ms),
    });

    let app = api::router(state, config.max_body_bytes);
    let listener = tokio::net::TcpListener::bind(&config.http_addr).await?;

    tracing::info!(
        address = %config.http_addr,
        round_duration_secs = timing.round_duration_secs(),
        "listening"
    );
    tokio::select! {
        server_result = axum::serve(listener, app) => {
            auctioneer_stop.request_shutdown();
            lane_stop.request_shutdown();
            let lane_result = lane_handle.await;
            match lane_result {
                Ok(ExpressLaneError::ShutdownRequested) => {}
                Ok(err) => return Err(format!("admission lane exited during shutdown: {err}").into()),
                Err(join_err) => {
                    return Err(format!("admission lane join error during shutdown: {join_err}").into())
                }
            }
            server_result?;
        }
        lane_result = &mut lane_handle => {
            auctioneer_stop.request_shutdown();
            match lane_result {
                Ok(err) => return Err(format!("admission lane exited: {err}").into()),
                Err(join_err) => {
                    return Err(format!("admission lane join error: {join_err}").into())
                }
            }
        }
        auctioneer_result = &mut auctioneer_handle => {
            lane_stop.request_shutdown();
            auctioneer_result.map_err(|join_err| format!("auctioneer join error: {join_err}"))?;
        }
    }

    Ok(())
}

struct Config {
    http_addr: String,
    db_path: String,
    chain_id: u64,
    auction_contract: Address,
    auctioneer_addr: Address,
    governance_addr: Address,
    reserve_pricer_addr: Address,
    beneficiary: Beneficiary,
    reserved_address: Address,
    domain_value: u16,
    initial_timestamp: u64,
    round_duration: Duration,
    auction_closing: Duration,
    reserve_submission: Duration,
    non_express_delay: Duration,
    min_reserve: U256,
    dev_accounts: Vec<(Address, U256)>,
    queue_capacity: usize,
    queue_timeout_ms: u64,
    max_body_bytes: usize,
    max_sequence_buffer: usize,
    max_txs_per_chunk: usize,
    idle_poll_interval: Duration,
    close_poll_interval: Duration,
    feed_buffer_capacity: usize,
    sqlite_synchronous: String,
}

impl Config {
    fn from_env() -> Result<Self, String> {
        let round_duration_secs =
            env_u64("LANE_ROUND_DURATION_SECS", DEFAULT_ROUND_DURATION_SECS).max(1);
        let initial_timestamp = match std::env::var("LANE_INITIAL_TIMESTAMP") {
            Ok(value) => value
                .parse()
                .map_err(|_| "invalid LANE_INITIAL_TIMESTAMP".to_string())?,
            // Align round 0 to a multiple of the round duration.
            Err(_) => {
                let now = unix_now();
                now - now % round_duration_secs
            }
        };
        let beneficiary = if env_bool("LANE_BURN_PROCEEDS") {
            Beneficiary::Burn
        } else {
            Beneficiary::Account(env_address("LANE_BENEFICIARY", DEFAULT_BENEFICIARY_ADDR)?)
        };

        Ok(Self {
            http_addr: env_string("LANE_HTTP_ADDR", DEFAULT_HTTP_ADDR),
            db_path: env_string("LANE_DB_PATH", DEFAULT_DB_PATH),
            chain_id: env_u64("LANE_CHAIN_ID", DEFAULT_CHAIN_ID),
            auction_contract: env_address("LANE_AUCTION_CONTRACT", DEFAULT_AUCTION_CONTRACT)?,
            auctioneer_addr: env_address("LANE_AUCTIONEER_ADDR", DEFAULT_AUCTIONEER_ADDR)?,
            governance_addr: env_address("LANE_GOVERNANCE_ADDR", DEFAULT_GOVERNANCE_ADDR)?,
            reserve_pricer_addr: env_address(
                "LANE_RESERVE_PRICER_ADDR",
                DEFAULT_RESERVE_PRICER_ADDR,
            )?,
            beneficiary,
            reserved_address: env_address("LANE_RESERVED_ADDR", DEFAULT_RESERVED_ADDR)?,
            domain_value: env_u64("LANE_DOMAIN_VALUE", u64::from(DEFAULT_DOMAIN_VALUE)) as u16,
            initial_timestamp,
            round_duration: Duration::from_secs(round_duration_secs),
            auction_closing: Duration::from_secs(
                env_u64("LANE_AUCTION_CLOSING_SECS", DEFAULT_AUCTION_CLOSING_SECS).max(1),
            ),
            reserve_submission: Duration::from_secs(env_u64(
                "LANE_RESERVE_SUBMISSION_SECS",
                DEFAULT_RESERVE_SUBMISSION_SECS,
            )),
            non_express_delay: Duration::from_millis(env_u64(
                "LANE_NON_EXPRESS_DELAY_MS",
                DEFAULT_NON_EXPRESS_DELAY_MS,
            )),
            min_reserve: env_u256("LANE_MIN_RESERVE", DEFAULT_MIN_RESERVE)?,
            dev_accounts: env_dev_accounts("LANE_DEV_ACCOUNTS")?,
            queue_capacity: env_usize("LANE_QUEUE_CAP", DEFAULT_QUEUE_CAP).max(1),
            queue_timeout_ms: env_u64("LANE_QUEUE_TIMEOUT_MS", DEFAULT_QUEUE_TIMEOUT_MS),
            max_body_bytes: env_usize("LANE_MAX_BODY_BYTES", DEFAULT_MAX_BODY_BYTES),
            max_sequence_buffer: env_usize("LANE_MAX_SEQUENCE_BUFFER", DEFAULT_MAX_SEQUENCE_BUFFER)
                .max(1),
            max_txs_per_chunk: env_usize("LANE_MAX_TXS_PER_CHUNK", DEFAULT_MAX_TXS_PER_CHUNK)
                .max(1),
            idle_poll_interval: Duration::from_millis(
                env_u64("LANE_IDLE_POLL_INTERVAL_MS", DEFAULT_IDLE_POLL_INTERVAL_MS).max(1),
            ),
            close_poll_interval: Duration::from_millis(
                env_u64(
                    "LANE_CLOSE_POLL_INTERVAL_MS",
                    DEFAULT_CLOSE_POLL_INTERVAL_MS,
                )
                .max(1),
            ),
            feed_buffer_capacity: env_usize("LANE_FEED_BUFFER", DEFAULT_FEED_BUFFER_CAPACITY)
                .max(1),
            sqlite_synchronous: env_string("LANE_SQLITE_SYNCHRONOUS", DEFAULT_SQLITE_SYNCHRONOUS),
        })
    }

    fn timing(&self) -> RoundTimingInfo {
        RoundTimingInfo {
            initial_timestamp: self.initial_timestamp,
            round_duration: self.round_duration,
            auction_closing: self.auction_closing,
            reserve_submission: self.reserve_submission,
        }
    }
}

fn env_string(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_u64(key: &str, default: u64) -> u64 {
    std::env::var(key)
        .ok()
        .and_then(|value| value.parse().ok())
        .unwrap_or(default)
}

fn env_usize(key: &str, default: usize) -> usize {
    std::env::var(key)
        .ok()
        .and_then(|value| value.parse().ok())
        .unwrap_or(default)
}

fn env_bool(key: &str) -> bool {
    std::env::var(key)
        .map(|value| matches!(value.as_str(), "1" | "true" | "yes"))
        .unwrap_or(false)
}

fn env_address(key: &str, default: &str) -> Result<Address, String> {
    let value = env_string(key, default);
    parse_address(&value).map_err(|err| format!("{key}: {err}"))
}

fn env_u256(key: &str, default: &str) -> Result<U256, String> {
    let value = env_string(key, default);
    U256::from_str(&value).map_err(|err| format!("{key}: invalid amount: {err}"))
}

/// Comma-separated `0xaddress=amount` pairs minted and deposited at startup.
fn env_dev_accounts(key: &str) -> Result<Vec<(Address, U256)>, String> {
    let Ok(raw) = std::env::var(key) else {
        return Ok(Vec::new());
    };
    let mut accounts = Vec::new();
    for pair in raw.split(',').filter(|pair| !pair.is_empty()) {
        let (address, amount) = pair
            .split_once('=')
            .ok_or_else(|| format!("{key}: expected 0xaddress=amount, got {pair}"))?;
        let address = parse_address(address.trim()).map_err(|err| format!("{key}: {err}"))?;
        let amount = U256::from_str(amount.trim())
            .map_err(|err| format!("{key}: invalid amount: {err}"))?;
        accounts.push((address, amount));
    }
    Ok(accounts)
}

fn parse_address(value: &str) -> Result<Address, String> {
    if !value.starts_with("0x") {
        return Err("address must be 0x-prefixed".to_string());
    }
    let bytes = alloy_primitives::hex::decode(value)
        .map_err(|err| format!("invalid address hex: {err}"))?;
    if bytes.len() != 20 {
        return Err("address must be 20 bytes".to_string());
    }
    Ok(Address::from_slice(&bytes))
}
