// (c) Cartesi and individual authors (see AUTHORS)
// SPDX-License-Identifier: Apache-2.0 (see LICENSE)

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use thiserror::Error;

use crate::auctioneer::BidSubmissionError;
use crate::express_lane::AdmissionError;

/// RPC failure carrying the structured error code bidder and controller
/// clients match on.
#[derive(Debug, Error, Clone)]
#[error("{message}")]
pub struct ApiError {
    pub code: &'static str,
    pub message: String,
    pub status: StatusCode,
}

#[derive(Debug, Serialize)]
struct ErrorResponse {
    status: &'static str,
    error: &'static str,
    message: String,
}

impl ApiError {
    pub fn malformed(message: impl Into<String>) -> Self {
        Self {
            code: "MALFORMED_DATA",
            message: message.into(),
            status: StatusCode::BAD_REQUEST,
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self {
            code: "INTERNAL_ERROR",
            message: message.into(),
            status: StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn overloaded(message: impl Into<String>) -> Self {
        Self {
            code: "OVERLOADED",
            message: message.into(),
            status: StatusCode::TOO_MANY_REQUESTS,
        }
    }
}

impl From<BidSubmissionError> for ApiError {
    fn from(value: BidSubmissionError) -> Self {
        let status = match value {
            BidSubmissionError::Unavailable(_) => StatusCode::INTERNAL_SERVER_ERROR,
            _ => StatusCode::BAD_REQUEST,
        };
        Self {
            code: value.code(),
            message: value.to_string(),
            status,
        }
    }
}

impl From<AdmissionError> for ApiError {
    fn from(value: AdmissionError) -> Self {
        Self {
            code: value.code(),
            message: value.to_string(),
            status: StatusCode::BAD_REQUEST,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = ErrorResponse {
            status: "ERROR",
            error: self.code,
            message: self.message,
        };
        (self.status, Json(body)).into_response()
    }
}
