// (c) Cartesi and individual authors (see AUTHORS)
// SPDX-License-Identifier: Apache-2.0 (see LICENSE)

use thiserror::Error;

/// Fatal conditions for the admission loop. Per-transaction rejections are
/// [`AdmissionError`](super::AdmissionError) and go back to the submitter.
#[derive(Debug, Error)]
pub enum ExpressLaneError {
    #[error("admission input channel closed")]
    ChannelClosed,
    #[error("downstream sequencing pipeline closed")]
    DownstreamClosed,
    #[error("admission lane shutdown requested")]
    ShutdownRequested,
}
