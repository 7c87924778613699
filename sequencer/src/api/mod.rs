// (c) Cartesi and individual authors (see AUTHORS)
// SPDX-License-Identifier: Apache-2.0 (see LICENSE)

mod error;

use std::str::FromStr;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use axum::Router;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{DefaultBodyLimit, Json, State};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::SendTimeoutError;
use tokio::sync::oneshot;
use tower_http::trace::TraceLayer;
use tracing::warn;

use alloy_primitives::{Address, Signature, U256};
use auction_core::bid::Bid;

use crate::auctioneer::Auctioneer;
use crate::event_feed::AuctionEventFeed;
use crate::express_lane::{AdmissionInput, ExpressLaneSubmission, PendingTx};

pub use error::ApiError;

#[derive(Clone)]
pub struct AppState {
    pub auctioneer: Arc<Auctioneer>,
    pub admission: mpsc::Sender<AdmissionInput>,
    pub feed: AuctionEventFeed,
    pub chain_id: u64,
    pub auction_contract: Address,
    pub reserved_address: Address,
    pub domain_value: u16,
    pub queue_timeout: Duration,
}

#[derive(Debug, Deserialize)]
struct BidRequest {
    chain_id: u64,
    auction_contract: String,
    round: u64,
    amount: String,
    controller: String,
    signature: String,
}

#[derive(Debug, Deserialize)]
struct ExpressLaneTxRequest {
    chain_id: u64,
    auction_contract: String,
    round: u64,
    sequence_number: u64,
    transaction: String,
    /// Reserved for future per-submission options; currently ignored.
    #[allow(dead_code)]
    options: Option<serde_json::Value>,
    signature: String,
}

#[derive(Debug, Serialize)]
struct OkResponse {
    status: &'static str,
}

pub fn router(state: Arc<AppState>, max_body_bytes: usize) -> Router {
    Router::new()
        .route("/auction/bid", post(submit_bid))
        .route("/express-lane/tx", post(submit_express_lane_tx))
        .route("/ws/events", get(subscribe_events))
        .with_state(state)
        .layer(DefaultBodyLimit::max(max_body_bytes))
        .layer(TraceLayer::new_for_http())
}

async fn submit_bid(
    State(state): State<Arc<AppState>>,
    req: Result<Json<BidRequest>, axum::extract::rejection::JsonRejection>,
) -> Result<Json<OkResponse>, ApiError> {
    let Json(req) = req.map_err(|err| ApiError::malformed(format!("invalid JSON: {err}")))?;

    let bid = Bid {
        chain_id: req.chain_id,
        auction_contract: parse_address(&req.auction_contract)?,
        round: req.round,
        amount: parse_amount(&req.amount)?,
        controller: parse_address(&req.controller)?,
        signature: parse_signature(&req.signature)?,
    };

    state.auctioneer.submit_bid(bid)?;
    Ok(Json(OkResponse { status: "OK" }))
}

async fn submit_express_lane_tx(
    State(state): State<Arc<AppState>>,
    req: Result<Json<ExpressLaneTxRequest>, axum::extract::rejection::JsonRejection>,
) -> Result<Json<OkResponse>, ApiError> {
    let Json(req) = req.map_err(|err| ApiError::malformed(format!("invalid JSON: {err}")))?;

    if req.chain_id != state.chain_id {
        return Err(ApiError {
            code: "WRONG_CHAIN_ID",
            message: "submission signed for a different chain id".to_string(),
            status: axum::http::StatusCode::BAD_REQUEST,
        });
    }
    let auction_contract = parse_address(&req.auction_contract)?;
    if auction_contract != state.auction_contract {
        return Err(ApiError::malformed(
            "submission addressed to a different auction contract",
        ));
    }

    let submission = ExpressLaneSubmission {
        chain_id: req.chain_id,
        auction_contract,
        round: req.round,
        sequence_number: req.sequence_number,
        transaction: decode_hex_0x(&req.transaction)?.into(),
        signature: parse_signature(&req.signature)?,
    };
    let signer = submission.recover_signer(state.domain_value).ok_or(ApiError {
        code: "WRONG_SIGNATURE",
        message: "submission signature does not recover a signer".to_string(),
        status: axum::http::StatusCode::BAD_REQUEST,
    })?;

    let (respond_to, recv) = oneshot::channel();
    let pending = PendingTx {
        tx: submission.into_inbound(signer, state.reserved_address),
        respond_to,
        received_at: SystemTime::now(),
    };
    enqueue_tx(&state, pending).await?;

    let admission_result = recv
        .await
        .map_err(|_| ApiError::internal("admission lane dropped response"))?;
    admission_result.map_err(ApiError::from)?;

    Ok(Json(OkResponse { status: "OK" }))
}

async fn enqueue_tx(state: &AppState, tx: PendingTx) -> Result<(), ApiError> {
    match state
        .admission
        .send_timeout(AdmissionInput::Tx(tx), state.queue_timeout)
        .await
    {
        Ok(()) => Ok(()),
        Err(SendTimeoutError::Timeout(_)) => Err(ApiError::overloaded("admission queue full")),
        Err(SendTimeoutError::Closed(_)) => Err(ApiError::internal("admission lane unavailable")),
    }
}

fn decode_hex_0x(value: &str) -> Result<Vec<u8>, ApiError> {
    if !value.starts_with("0x") {
        return Err(ApiError::malformed("hex string must start with 0x"));
    }
    alloy_primitives::hex::decode(value)
        .map_err(|err| ApiError::malformed(format!("invalid hex: {err}")))
}

fn parse_address(value: &str) -> Result<Address, ApiError> {
    let bytes = decode_hex_0x(value)?;
    if bytes.len() != 20 {
        return Err(ApiError::malformed("address must be 20 bytes"));
    }
    Ok(Address::from_slice(&bytes))
}

fn parse_amount(value: &str) -> Result<U256, ApiError> {
    U256::from_str(value).map_err(|err| ApiError::malformed(format!("invalid amount: {err}")))
}

fn parse_signature(value: &str) -> Result<Signature, ApiError> {
    let bytes = decode_hex_0x(value)?;
    if bytes.len() != 65 {
        return Err(ApiError::malformed("signature must be 65 bytes"));
    }
    Signature::from_raw(&bytes).map_err(|err| match err {
        alloy_primitives::SignatureError::InvalidParity(_) => ApiError {
            code: "WRONG_SIGNATURE",
            message: "invalid signature parity".to_string(),
            status: axum::http::StatusCode::BAD_REQUEST,
        },
        _ => ApiError::malformed("invalid signature encoding"),
    })
}

async fn subscribe_events(
    State(state): State<Arc<AppState>>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    let feed = state.feed.clone();
    ws.on_upgrade(move |socket| run_event_session(feed, socket))
}

/// Re-serves the live auction event feed to one WebSocket observer.
async fn run_event_session(feed: AuctionEventFeed, mut socket: WebSocket) {
    let mut subscription = feed.subscribe();

    loop {
        tokio::select! {
            maybe_event = subscription.receiver.recv() => {
                let Some(event) = maybe_event else {
                    break;
                };
                let payload = match serde_json::to_string(&event) {
                    Ok(value) => value,
                    Err(err) => {
                        warn!(error = %err, "failed to serialize feed event");
                        break;
                    }
                };
                if socket.send(Message::Text(payload.into())).await.is_err() {
                    break;
                }
            }
            inbound = socket.recv() => {
                match inbound {
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(Message::Ping(payload))) => {
                        if socket.send(Message::Pong(payload)).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(_)) => {}
                    Some(Err(_)) => break,
                }
            }
        }
    }
}
