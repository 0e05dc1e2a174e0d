//! Error types and handling for the hub.
//!
//! This module defines the errors that can occur while decoding, routing and
//! serving bus messages. Only [`HubError::Configuration`] and
//! [`HubError::SupervisorExhausted`] are ever fatal; everything else is logged
//! or turned into a reply envelope for the requesting client.

use crate::persistence::PersistenceError;

/// Enumeration of possible hub errors.
///
/// Categorizes failures the way the dispatcher and services react to them:
/// decode and routing problems drop the message, store problems become an
/// `error` reply, and configuration problems abort startup.
#[derive(Debug, thiserror::Error)]
pub enum HubError {
    /// The inbound bytes were not a usable envelope
    #[error("Decode error: {0}")]
    Decode(String),

    /// The envelope decoded but its type is unknown or its data is missing fields
    #[error("Routing error: {0}")]
    Routing(String),

    /// Document store read or write failure
    #[error("Store error: {0}")]
    Store(#[from] PersistenceError),

    /// Message bus transport failure
    #[error("Bus error: {0}")]
    Bus(String),

    /// Missing or invalid startup configuration
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// A supervised service kept crashing and will not be restarted again
    #[error("Service '{0}' exhausted its restart budget")]
    SupervisorExhausted(String),

    /// A service channel was closed while the hub was still running
    #[error("Internal error: {0}")]
    Internal(String),
}

impl HubError {
    /// Whether this error should stop the whole process.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            HubError::Configuration(_) | HubError::SupervisorExhausted(_)
        )
    }
}
