// (c) Cartesi and individual authors (see AUTHORS)
// SPDX-License-Identifier: Apache-2.0 (see LICENSE)

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::warn;

use auction_core::events::AuctionEvent;

/// One auction event with its position in the append-only stream. Delivery
/// to a subscriber is at-least-once; offsets let consumers de-duplicate and
/// detect gaps.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeedEvent {
    pub offset: u64,
    #[serde(flatten)]
    pub event: AuctionEvent,
}

pub struct FeedSubscription {
    pub receiver: mpsc::Receiver<FeedEvent>,
    /// Offset the live stream starts at for this subscriber. Events before it
    /// were published before the subscription existed.
    pub live_start_offset: u64,
}

/// Fan-out of auction contract events to in-process subscribers and the
/// `/ws/events` surface. Slow subscribers are dropped rather than allowed to
/// stall the feed.
#[derive(Clone)]
pub struct AuctionEventFeed {
    inner: Arc<FeedInner>,
}

struct FeedInner {
    subscriber_buffer_capacity: usize,
    next_subscriber_id: AtomicU64,
    state: Mutex<FeedState>,
}

struct FeedState {
    next_offset: u64,
    subscribers: HashMap<u64, mpsc::Sender<FeedEvent>>,
}

impl AuctionEventFeed {
    pub fn new(subscriber_buffer_capacity: usize) -> Self {
        Self {
            inner: Arc::new(FeedInner {
                subscriber_buffer_capacity: subscriber_buffer_capacity.max(1),
                next_subscriber_id: AtomicU64::new(0),
                state: Mutex::new(FeedState {
                    next_offset: 0,
                    subscribers: HashMap::new(),
                }),
            }),
        }
    }

    pub fn subscribe(&self) -> FeedSubscription {
        let (tx, rx) = mpsc::channel(self.inner.subscriber_buffer_capacity);
        let subscriber_id = self
            .inner
            .next_subscriber_id
            .fetch_add(1, Ordering::Relaxed);

        let mut state = self
            .inner
            .state
            .lock()
            .expect("event feed state mutex poisoned");
        state.subscribers.insert(subscriber_id, tx);
        FeedSubscription {
            live_start_offset: state.next_offset,
            receiver: rx,
        }
    }

    pub fn publish(&self, event: AuctionEvent) -> u64 {
        let mut state = self
            .inner
            .state
            .lock()
            .expect("event feed state mutex poisoned");
        let offset = state.next_offset;
        state.next_offset = offset.saturating_add(1);

        let feed_event = FeedEvent { offset, event };
        let mut to_remove = Vec::new();
        for (subscriber_id, sender) in state.subscribers.iter() {
            match sender.try_send(feed_event.clone()) {
                Ok(()) => {}
                Err(TrySendError::Closed(_)) => {
                    to_remove.push(*subscriber_id);
                }
                Err(TrySendError::Full(_)) => {
                    to_remove.push(*subscriber_id);
                    warn!(
                        subscriber_id,
                        offset, "event feed dropped slow subscriber due to full channel"
                    );
                }
            }
        }
        for subscriber_id in to_remove {
            state.subscribers.remove(&subscriber_id);
        }
        offset
    }

    pub fn publish_all(&self, events: Vec<AuctionEvent>) {
        for event in events {
            self.publish(event);
        }
    }
}
