// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 the taskforge contributors

//! Translates [`CoreError`] to HTTP status + JSON body at the API edge
//! (spec §7 "only the API edge knows how to turn a kind into an HTTP
//! status").

use axum::{http::StatusCode, response::IntoResponse, Json};
use serde_json::json;
use taskforge_core::CoreError;

pub struct ApiError(pub CoreError);

impl From<CoreError> for ApiError {
    fn from(e: CoreError) -> Self {
        Self(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        let (status, code) = match &self.0 {
            CoreError::InvalidArgument(_) => (StatusCode::BAD_REQUEST, "invalid_argument"),
            CoreError::NotFound(_) => (StatusCode::NOT_FOUND, "not_found"),
            CoreError::AlreadyClaimed
            | CoreError::NotPending
            | CoreError::StaleClaim
            | CoreError::InvalidTransition { .. }
            | CoreError::AlreadyTerminal
            | CoreError::Duplicate(_) => (StatusCode::CONFLICT, "conflict"),
            CoreError::Unauthenticated => (StatusCode::UNAUTHORIZED, "unauthenticated"),
            CoreError::Forbidden => (StatusCode::FORBIDDEN, "forbidden"),
            CoreError::Unavailable(_) => (StatusCode::SERVICE_UNAVAILABLE, "unavailable"),
            CoreError::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, "internal"),
        };

        if status == StatusCode::INTERNAL_SERVER_ERROR {
            tracing::error!(error = %self.0, "internal error");
        }

        (status, Json(json!({ "error": code, "message": self.0.to_string() }))).into_response()
    }
}

/// A claim conflict is surfaced as a bare `409` with no body — the worker
/// silently moves on (spec §7 "it is an expected race, not an error shown
/// to the worker").
pub fn claim_conflict_response() -> axum::response::Response {
    StatusCode::CONFLICT.into_response()
}
