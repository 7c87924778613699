// (c) Cartesi and individual authors (see AUTHORS)
// SPDX-License-Identifier: Apache-2.0 (see LICENSE)

mod error;
mod lane;
mod types;

pub use error::ExpressLaneError;
pub use lane::{ExpressLane, ExpressLaneConfig, ExpressLaneStop};
pub use types::{
    AdmissionError, AdmissionInput, ExpressLaneSubmission, InboundTx, PendingTx, SequencedTx,
};
