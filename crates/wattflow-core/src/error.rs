//! Error types for wattflow
//!
//! TigerStyle: Explicit error types with context, using thiserror.

use thiserror::Error;

/// Result type alias for wattflow operations
pub type Result<T> = std::result::Result<T, Error>;

/// Reason reported when an actor never answered its start handshake
pub const INIT_NO_REPLY_REASON: &str = "actor crashed or timed out during initialization";

/// wattflow error types
#[derive(Error, Debug)]
pub enum Error {
    // =========================================================================
    // Actor Lifecycle Errors
    // =========================================================================
    #[error("Actor initialization failed: {actor}, reason: {reason}")]
    InitializationFailed { actor: String, reason: String },

    #[error("Actor already supervised: {actor}")]
    ActorAlreadySupervised { actor: String },

    #[error("Invalid actor name: {name}, reason: {reason}")]
    InvalidActorName { name: String, reason: String },

    #[error("use {expected} instead of {got}")]
    WrongStartMessage { expected: String, got: String },

    #[error("Unknown message type: {kind} received by {actor}")]
    UnknownMessageType { actor: String, kind: String },

    #[error("Actor join timeout: {actor} after {timeout_ms}ms")]
    JoinTimeout { actor: String, timeout_ms: u64 },

    // =========================================================================
    // Communication Errors
    // =========================================================================
    #[error("Channel closed: {actor}, channel: {channel}")]
    ChannelClosed { actor: String, channel: String },

    // =========================================================================
    // Routing Errors
    // =========================================================================
    #[error("A primary dispatch rule is already registered")]
    PrimaryRuleAlreadyDefined,

    #[error("No primary dispatch rule registered")]
    NoPrimaryRule,

    #[error("Report filter has no registered rule")]
    EmptyReportFilter,

    // =========================================================================
    // Database Errors
    // =========================================================================
    #[error("Database connection failed: {reason}")]
    DatabaseConnectFailed { reason: String },

    #[error("Database read failed: {reason}")]
    DatabaseReadFailed { reason: String },

    #[error("Database write failed: {reason}")]
    DatabaseWriteFailed { reason: String },

    #[error("Bad input data: {reason}")]
    BadInputData { reason: String },

    // =========================================================================
    // Formula Errors
    // =========================================================================
    #[error("Formula failed: {formula}, reason: {reason}")]
    FormulaFailed { formula: String, reason: String },

    // =========================================================================
    // Configuration Errors
    // =========================================================================
    #[error("Invalid configuration: {field}, reason: {reason}")]
    InvalidConfiguration { field: String, reason: String },

    // =========================================================================
    // Internal Errors
    // =========================================================================
    #[error("Internal error: {reason}")]
    Internal { reason: String },

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl Error {
    /// Create an initialization failed error
    pub fn initialization_failed(actor: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InitializationFailed {
            actor: actor.into(),
            reason: reason.into(),
        }
    }

    /// Create a channel closed error
    pub fn channel_closed(actor: impl Into<String>, channel: impl Into<String>) -> Self {
        Self::ChannelClosed {
            actor: actor.into(),
            channel: channel.into(),
        }
    }

    /// Create a bad input data error
    pub fn bad_input(reason: impl Into<String>) -> Self {
        Self::BadInputData {
            reason: reason.into(),
        }
    }

    /// Create a formula failed error
    pub fn formula_failed(formula: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::FormulaFailed {
            formula: formula.into(),
            reason: reason.into(),
        }
    }

    /// Create an invalid configuration error
    pub fn invalid_configuration(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidConfiguration {
            field: field.into(),
            reason: reason.into(),
        }
    }

    /// Create an internal error
    pub fn internal(reason: impl Into<String>) -> Self {
        Self::Internal {
            reason: reason.into(),
        }
    }

    /// Check if this error must abort startup when raised during initialization
    pub fn is_fatal_at_init(&self) -> bool {
        matches!(
            self,
            Self::InitializationFailed { .. }
                | Self::DatabaseConnectFailed { .. }
                | Self::NoPrimaryRule
                | Self::EmptyReportFilter
                | Self::InvalidConfiguration { .. }
                | Self::ChannelClosed { .. }
        )
    }

    /// Check if this error only concerns a single record and can be skipped
    pub fn is_skippable(&self) -> bool {
        matches!(self, Self::BadInputData { .. })
    }
}
