//! Unified error handling for relaychat.
//!
//! Errors are grouped by the component that raises them: admission/auth,
//! registry operations, per-recipient delivery, and the session task
//! umbrella. Each enum carries an `error_code()` accessor producing a static
//! label for structured logs.

use thiserror::Error;

// ============================================================================
// Admission errors (token verification, identity resolution)
// ============================================================================

/// Why a connection could not be admitted.
///
/// Fatal to the connection being authenticated: the transport is closed with
/// a distinguishing code and nothing is broadcast.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AuthError {
    #[error("no token provided")]
    Missing,

    #[error("invalid token")]
    Invalid,

    #[error("token expired")]
    Expired,

    #[error("user not found")]
    UnknownUser,
}

impl AuthError {
    /// WebSocket close code surfaced to the failing client.
    ///
    /// 4001 = no token, 4002 = invalid or expired token, 4004 = the token
    /// verified but names no stored user.
    pub fn close_code(&self) -> u16 {
        match self {
            Self::Missing => 4001,
            Self::Invalid | Self::Expired => 4002,
            Self::UnknownUser => 4004,
        }
    }

    /// Static label for log fields.
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::Missing => "token_missing",
            Self::Invalid => "token_invalid",
            Self::Expired => "token_expired",
            Self::UnknownUser => "unknown_user",
        }
    }
}

/// Close code for a join against a scope that does not exist.
pub const CLOSE_UNKNOWN_SCOPE: u16 = 4044;

// ============================================================================
// Registry errors (membership operations)
// ============================================================================

/// Scope registry operation failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    /// The connection is already registered in a scope; callers must leave
    /// before joining elsewhere.
    #[error("connection already joined to scope {0}")]
    AlreadyJoined(String),

    /// Display-name uniqueness is enforced per scope.
    #[error("name already in use: {0}")]
    NameInUse(String),

    #[error("no such scope: {0}")]
    UnknownScope(String),
}

impl RegistryError {
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::AlreadyJoined(_) => "already_joined",
            Self::NameInUse(_) => "name_in_use",
            Self::UnknownScope(_) => "unknown_scope",
        }
    }
}

// ============================================================================
// Delivery errors (single-recipient send failures)
// ============================================================================

/// Why a frame could not be handed to one recipient.
///
/// Local to that recipient: a broadcast never aborts on these, it prunes the
/// failed connection and carries on.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DeliveryError {
    /// The recipient's outbound queue is gone (session task exited).
    #[error("connection closed")]
    Closed,

    /// The recipient's outbound queue stayed full past the send timeout.
    #[error("send timed out")]
    Timeout,
}

impl DeliveryError {
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::Closed => "closed",
            Self::Timeout => "timeout",
        }
    }
}

// ============================================================================
// Session errors (per-connection task umbrella)
// ============================================================================

/// Errors terminating or interrupting a session task.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("authentication failed: {0}")]
    Auth(#[from] AuthError),

    #[error("registry: {0}")]
    Registry(#[from] RegistryError),

    #[error("database: {0}")]
    Db(#[from] crate::db::DbError),

    #[error("history: {0}")]
    History(#[from] crate::history::HistoryError),

    #[error("transport: {0}")]
    Transport(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("frame encoding: {0}")]
    Encode(#[from] serde_json::Error),
}

impl SessionError {
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::Auth(e) => e.error_code(),
            Self::Registry(e) => e.error_code(),
            Self::Db(_) => "db_error",
            Self::History(_) => "history_error",
            Self::Transport(_) => "transport_error",
            Self::Encode(_) => "encode_error",
        }
    }
}

/// Result type for session lifecycle steps.
pub type SessionResult<T> = Result<T, SessionError>;
