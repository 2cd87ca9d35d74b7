use thiserror::Error;

use crate::claims::TokenKind;

/// Errors produced while minting or opening branchpass tokens.
///
/// Callers that only care about "authenticated or not" can treat every
/// variant as a failure; the variants exist so that the handoff endpoint can
/// tell an expired token apart from a forged one.
#[derive(Debug, Error)]
pub enum TokenError {
    /// The token could not be parsed, its signature did not verify, or a
    /// required claim was missing.
    #[error("invalid token: {0}")]
    Invalid(String),

    /// The token verified but its validity window has closed.
    #[error("token expired at {expired_at}")]
    Expired { expired_at: i64 },

    /// The token verified but carries a different type discriminator.
    #[error("expected a {expected} token, found {found}")]
    WrongType { expected: TokenKind, found: String },

    #[error("invalid key format: {0}")]
    InvalidKeyFormat(String),

    /// Building or signing a token failed.
    #[error("failed to mint token: {0}")]
    Mint(String),
}

impl TokenError {
    pub fn invalid(msg: impl Into<String>) -> Self {
        TokenError::Invalid(msg.into())
    }

    pub fn invalid_key_format(msg: impl Into<String>) -> Self {
        TokenError::InvalidKeyFormat(msg.into())
    }

    pub fn mint(msg: impl Into<String>) -> Self {
        TokenError::Mint(msg.into())
    }

    pub fn biscuit_error(err: biscuit_auth::error::Token) -> Self {
        TokenError::Invalid(err.to_string())
    }

    pub fn is_expired(&self) -> bool {
        matches!(self, TokenError::Expired { .. })
    }
}

impl From<biscuit_auth::error::Token> for TokenError {
    fn from(err: biscuit_auth::error::Token) -> Self {
        TokenError::biscuit_error(err)
    }
}
