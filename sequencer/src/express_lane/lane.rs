// (c) Cartesi and individual authors (see AUTHORS)
// SPDX-License-Identifier: Apache-2.0 (see LICENSE)

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use alloy_primitives::Address;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use auction_core::round::RoundTimingInfo;

use super::error::ExpressLaneError;
use super::types::{AdmissionError, AdmissionInput, InboundTx, PendingTx, SequencedTx};
use crate::chain::unix_now;
use crate::event_feed::FeedSubscription;

#[derive(Debug, Clone, Copy)]
pub struct ExpressLaneConfig {
    pub timing: RoundTimingInfo,
    /// Sentinel recipient marking a transaction as an express-lane wrapper.
    pub reserved_address: Address,
    /// Hold-back applied to every non-express transaction.
    pub non_express_delay: Duration,
    /// Bound on parked out-of-order express submissions per round; entries
    /// beyond it are dropped.
    pub max_sequence_buffer: usize,
    pub max_txs_per_chunk: usize,
    pub idle_poll_interval: Duration,
}

#[derive(Debug, Clone, Default)]
pub struct ExpressLaneStop {
    shutdown: Arc<AtomicBool>,
}

impl ExpressLaneStop {
    pub fn request_shutdown(&self) {
        self.shutdown.store(true, Ordering::Relaxed);
    }

    fn is_shutdown_requested(&self) -> bool {
        self.shutdown.load(Ordering::Relaxed)
    }
}

/// The admission stage. Single consumer of the inbound queue; classifies
/// every transaction as express or ordinary, enforces per-round sequence
/// numbering on the express path, and applies the differential delay to
/// everything else. Controller identity comes exclusively from the auction
/// event feed.
pub struct ExpressLane {
    rx: mpsc::Receiver<AdmissionInput>,
    feed: FeedSubscription,
    downstream: mpsc::Sender<SequencedTx>,
    config: ExpressLaneConfig,
    stop: ExpressLaneStop,
}

struct DelayedTx {
    ready_at: Instant,
    tx: InboundTx,
}

struct LaneState {
    round: u64,
    controller: Option<Address>,
    expected_seq: u64,
    buffer: BTreeMap<u64, InboundTx>,
    /// Controller assignments learned from the feed, by round.
    controllers: HashMap<u64, Address>,
    next_feed_offset: u64,
    feed_down: bool,
    delayed: VecDeque<DelayedTx>,
}

impl LaneState {
    fn new(round: u64, next_feed_offset: u64) -> Self {
        Self {
            round,
            controller: None,
            expected_seq: 0,
            buffer: BTreeMap::new(),
            controllers: HashMap::new(),
            next_feed_offset,
            feed_down: false,
            delayed: VecDeque::new(),
        }
    }

    /// Safe default after a gap or a dead feed: no controller, everything
    /// takes the delay path until fresh events arrive.
    fn desynchronize(&mut self) {
        self.controllers.clear();
        self.controller = None;
    }
}

impl ExpressLane {
    pub fn new(
        rx: mpsc::Receiver<AdmissionInput>,
        feed: FeedSubscription,
        downstream: mpsc::Sender<SequencedTx>,
        config: ExpressLaneConfig,
    ) -> Self {
        Self {
            rx,
            feed,
            downstream,
            config,
            stop: ExpressLaneStop::default(),
        }
    }

    pub fn spawn(self) -> (JoinHandle<ExpressLaneError>, ExpressLaneStop) {
        let stop = self.stop.clone();
        let handle = tokio::task::spawn_blocking(move || {
            let mut lane = self;
            match lane.run_forever() {
                Err(err) => err,
                Ok(()) => unreachable!("admission lane run loop is expected to be non-terminating"),
            }
        });
        (handle, stop)
    }

    fn run_forever(&mut self) -> Result<(), ExpressLaneError> {
        let mut state = LaneState::new(
            self.config.timing.round_of(unix_now()),
            self.feed.live_start_offset,
        );
        // The lane starts with no controller knowledge; until the feed says
        // otherwise, every transaction takes the delay path.

        while !self.stop.is_shutdown_requested() {
            self.drain_feed(&mut state);
            // Rollover happens here, strictly between transactions.
            self.roll_round(&mut state, unix_now());

            let processed = self.process_chunk(&mut state)?;
            let released = self.release_delayed(&mut state)?;

            if processed == 0 && released == 0 {
                thread::sleep(self.config.idle_poll_interval);
            }
        }

        Err(ExpressLaneError::ShutdownRequested)
    }

    fn drain_feed(&mut self, state: &mut LaneState) {
        if state.feed_down {
            return;
        }
        loop {
            match self.feed.receiver.try_recv() {
                Ok(feed_event) => {
                    if feed_event.offset < state.next_feed_offset {
                        // At-least-once delivery; duplicate.
                        continue;
                    }
                    if feed_event.offset > state.next_feed_offset {
                        warn!(
                            expected_offset = state.next_feed_offset,
                            received_offset = feed_event.offset,
                            "gap in auction event feed; dropping controller knowledge"
                        );
                        state.desynchronize();
                    }
                    state.next_feed_offset = feed_event.offset.saturating_add(1);

                    if let Some((round, controller)) = feed_event.event.controller_update() {
                        state.controllers.insert(round, controller);
                        if round == state.round {
                            state.controller = Some(controller);
                        }
                    }
                }
                Err(mpsc::error::TryRecvError::Empty) => return,
                Err(mpsc::error::TryRecvError::Disconnected) => {
                    warn!("auction event feed closed; refusing express admission");
                    state.feed_down = true;
                    state.desynchronize();
                    return;
                }
            }
        }
    }

    fn roll_round(&mut self, state: &mut LaneState, now: u64) {
        let round = self.config.timing.round_of(now);
        if round == state.round {
            return;
        }

        if !state.buffer.is_empty() {
            info!(
                round = state.round,
                discarded = state.buffer.len(),
                "discarding buffered express submissions at round end"
            );
        }
        state.buffer.clear();
        state.expected_seq = 0;
        state.round = round;
        state.controller = state.controllers.get(&round).copied();
        state.controllers.retain(|record_round, _| *record_round >= round);

        debug!(round, controller = ?state.controller, "admission lane rolled over");
    }

    fn process_chunk(&mut self, state: &mut LaneState) -> Result<usize, ExpressLaneError> {
        let mut processed = 0_usize;
        while processed < self.config.max_txs_per_chunk.max(1) {
            match self.rx.try_recv() {
                Ok(AdmissionInput::Tx(pending)) => {
                    self.admit(state, pending)?;
                    processed = processed.saturating_add(1);
                }
                Err(mpsc::error::TryRecvError::Empty) => break,
                Err(mpsc::error::TryRecvError::Disconnected) => {
                    if processed == 0 {
                        return Err(ExpressLaneError::ChannelClosed);
                    }
                    break;
                }
            }
        }
        Ok(processed)
    }

    fn admit(&mut self, state: &mut LaneState, pending: PendingTx) -> Result<(), ExpressLaneError> {
        if pending.tx.to == self.config.reserved_address {
            return self.admit_express(state, pending);
        }

        // Ordinary path: accept now, enter the pipeline after the hold-back.
        // FIFO among ordinary transactions holds because the delay is a
        // constant and this queue preserves arrival order.
        let ready_at = Instant::now() + self.config.non_express_delay;
        state.delayed.push_back(DelayedTx {
            ready_at,
            tx: pending.tx,
        });
        let _ = pending.respond_to.send(Ok(()));
        Ok(())
    }

    fn admit_express(
        &mut self,
        state: &mut LaneState,
        pending: PendingTx,
    ) -> Result<(), ExpressLaneError> {
        let tx = pending.tx;

        if tx.max_priority_fee_per_gas != state.round {
            let _ = pending.respond_to.send(Err(AdmissionError::BadRoundNumber {
                active: state.round,
                got: tx.max_priority_fee_per_gas,
            }));
            return Ok(());
        }
        let Some(controller) = state.controller else {
            let _ = pending
                .respond_to
                .send(Err(AdmissionError::NoOnchainController));
            return Ok(());
        };
        if tx.signer != controller {
            let _ = pending
                .respond_to
                .send(Err(AdmissionError::NotExpressLaneController));
            return Ok(());
        }

        let sequence = tx.nonce;
        if sequence < state.expected_seq {
            let _ = pending.respond_to.send(Err(AdmissionError::SequenceTooLow {
                expected: state.expected_seq,
                got: sequence,
            }));
            return Ok(());
        }

        if sequence > state.expected_seq {
            if state.buffer.len() >= self.config.max_sequence_buffer.max(1) {
                // The bound protects the lane; a controller flooding itself
                // out of its own buffer is its own concern.
                warn!(
                    round = state.round,
                    sequence, "sequence buffer full; dropping express submission"
                );
            } else {
                state.buffer.insert(sequence, tx);
            }
            let _ = pending.respond_to.send(Ok(()));
            return Ok(());
        }

        self.forward_express(state, controller, tx)?;
        while let Some(next) = state.buffer.remove(&state.expected_seq) {
            self.forward_express(state, controller, next)?;
        }
        let _ = pending.respond_to.send(Ok(()));
        Ok(())
    }

    fn forward_express(
        &mut self,
        state: &mut LaneState,
        controller: Address,
        tx: InboundTx,
    ) -> Result<(), ExpressLaneError> {
        let sequenced = SequencedTx::Express {
            round: state.round,
            sequence: tx.nonce,
            controller,
            payload: tx.payload,
        };
        self.downstream
            .blocking_send(sequenced)
            .map_err(|_| ExpressLaneError::DownstreamClosed)?;
        state.expected_seq = state.expected_seq.saturating_add(1);
        Ok(())
    }

    fn release_delayed(&mut self, state: &mut LaneState) -> Result<usize, ExpressLaneError> {
        let now = Instant::now();
        let mut released = 0_usize;
        while state
            .delayed
            .front()
            .map(|entry| entry.ready_at <= now)
            .unwrap_or(false)
        {
            let entry = state.delayed.pop_front().expect("peeked entry exists");
            let sequenced = SequencedTx::Ordinary {
                signer: entry.tx.signer,
                to: entry.tx.to,
                payload: entry.tx.payload,
            };
            self.downstream
                .blocking_send(sequenced)
                .map_err(|_| ExpressLaneError::DownstreamClosed)?;
            released = released.saturating_add(1);
        }
        Ok(released)
    }
}
