//! Error taxonomy for the dispatch subsystem.
//!
//! Auth and NotFound are surfaced to callers; IllegalTransition is logged
//! and dropped at the relay boundary to stay idempotent under retransmitted
//! updates; CredentialUnavailable degrades to "no credential" instead of
//! aborting dispatch.

use crate::models::TaskStatus;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoreError {
    /// Missing/invalid/expired token or token-path identity mismatch.
    /// Deliberately carries no cause so callers cannot distinguish why.
    #[error("Authentication failed")]
    Auth,

    #[error("{0} not found")]
    NotFound(&'static str),

    #[error("Illegal task transition: {from:?} -> {to:?}")]
    IllegalTransition { from: TaskStatus, to: TaskStatus },

    #[error("Credential unavailable")]
    CredentialUnavailable,

    #[error("Invalid request: {0}")]
    Invalid(String),

    #[error(transparent)]
    Storage(#[from] anyhow::Error),
}

impl From<fleetflow_storage::VaultError> for CoreError {
    fn from(_: fleetflow_storage::VaultError) -> Self {
        CoreError::CredentialUnavailable
    }
}
