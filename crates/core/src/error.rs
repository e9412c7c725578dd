// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 the taskforge contributors

//! The error taxonomy shared by Store, Lifecycle, Scheduler and the API
//! layer (spec §7). Components below the API return one of these kinds;
//! only the API edge knows how to turn a kind into an HTTP status.

use thiserror::Error;

/// Error kinds raised by the core. Names match the taxonomy in spec §7,
/// not Rust type names — `conflict` covers several Store-level conflicts.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CoreError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("already claimed")]
    AlreadyClaimed,

    #[error("task is not pending")]
    NotPending,

    #[error("stale claim")]
    StaleClaim,

    #[error("invalid transition: {from} -> {to}")]
    InvalidTransition { from: String, to: String },

    #[error("already terminal")]
    AlreadyTerminal,

    #[error("duplicate idempotency key, existing task {0}")]
    Duplicate(String),

    #[error("unauthenticated")]
    Unauthenticated,

    #[error("forbidden")]
    Forbidden,

    #[error("unavailable: {0}")]
    Unavailable(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl CoreError {
    /// Whether this kind is an expected claim race rather than a surfaced
    /// error (spec §7: "The Scheduler recovers from `conflict` on claim").
    pub fn is_claim_conflict(&self) -> bool {
        matches!(self, CoreError::AlreadyClaimed | CoreError::NotPending)
    }

    /// Machine-readable tag for `metadata.failure_cause` (spec §7).
    pub fn failure_cause(&self) -> &'static str {
        match self {
            CoreError::InvalidArgument(_) => "admission_rejected",
            _ => "internal",
        }
    }
}
