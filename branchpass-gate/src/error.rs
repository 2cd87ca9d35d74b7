use branchpass_token::TokenError;
use thiserror::Error;

use crate::directory::DirectoryError;
use crate::ledger::NonceError;

/// Errors surfaced by login, switch and handoff operations.
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("authentication required: {0}")]
    Unauthenticated(String),

    /// Role or locality does not permit the operation.
    #[error("forbidden: {0}")]
    Forbidden(String),

    /// Unknown branch, or a branch without the required endpoint.
    #[error("not found: {0}")]
    NotFound(String),

    #[error("handoff token has already been used")]
    TokenReplayed,

    #[error("token expired at {expired_at}")]
    TokenExpired { expired_at: i64 },

    #[error("{0}")]
    TokenWrongType(String),

    #[error("invalid token: {0}")]
    TokenInvalid(String),

    /// A directory lookup failed. Infrastructure, not protocol.
    #[error("directory unavailable: {0}")]
    UpstreamUnavailable(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl AuthError {
    pub fn unauthenticated(msg: impl Into<String>) -> Self {
        AuthError::Unauthenticated(msg.into())
    }

    pub fn forbidden(msg: impl Into<String>) -> Self {
        AuthError::Forbidden(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        AuthError::NotFound(msg.into())
    }

    /// Short machine-readable code for JSON error bodies.
    pub fn code(&self) -> &'static str {
        match self {
            AuthError::Unauthenticated(_) => "unauthenticated",
            AuthError::Forbidden(_) => "forbidden",
            AuthError::NotFound(_) => "not_found",
            AuthError::TokenReplayed => "token_replayed",
            AuthError::TokenExpired { .. } => "token_expired",
            AuthError::TokenWrongType(_) => "token_wrong_type",
            AuthError::TokenInvalid(_) => "token_invalid",
            AuthError::UpstreamUnavailable(_) => "upstream_unavailable",
            AuthError::Internal(_) => "internal",
        }
    }
}

impl From<TokenError> for AuthError {
    fn from(err: TokenError) -> Self {
        match err {
            TokenError::Expired { expired_at } => AuthError::TokenExpired { expired_at },
            TokenError::WrongType { .. } => AuthError::TokenWrongType(err.to_string()),
            TokenError::Invalid(msg) => AuthError::TokenInvalid(msg),
            TokenError::InvalidKeyFormat(_) | TokenError::Mint(_) => {
                AuthError::Internal(err.to_string())
            }
        }
    }
}

impl From<DirectoryError> for AuthError {
    fn from(err: DirectoryError) -> Self {
        AuthError::UpstreamUnavailable(err.to_string())
    }
}

impl From<NonceError> for AuthError {
    fn from(err: NonceError) -> Self {
        match err {
            NonceError::Replayed => AuthError::TokenReplayed,
            NonceError::Saturated => AuthError::Internal(err.to_string()),
        }
    }
}
