//! Branch-switch handoff tokens.
//!
//! A handoff token carries a session from one branch instance to another. It
//! lives for seconds, names exactly one target branch, and carries a random
//! nonce so the redeeming instance can refuse a second use. Single-use
//! enforcement itself lives with the redeemer; this module only mints and
//! opens the token.

extern crate biscuit_auth as biscuit;

use biscuit::macros::biscuit;
use biscuit::{Biscuit, PublicKey};
use chrono::Utc;
use tracing::info;

use crate::claims::{HandoffClaims, HandoffToken, TokenKind, TokenTimeConfig};
use crate::error::TokenError;
use crate::utils::SigningKeys;
use crate::verify::open_token;

/// Default handoff lifetime in seconds.
pub const DEFAULT_HANDOFF_TTL: i64 = 30;

#[derive(Debug, Clone)]
pub struct HandoffCodec {
    keys: SigningKeys,
    ttl: i64,
}

impl HandoffCodec {
    pub fn new(keys: SigningKeys, ttl: i64) -> Self {
        Self { keys, ttl }
    }

    pub fn ttl(&self) -> i64 {
        self.ttl
    }

    /// Mints a `branch_switch` token for `subject` addressed to `target_branch_id`.
    ///
    /// # Arguments
    ///
    /// * `subject` - User id being handed off
    /// * `target_branch_id` - The only branch allowed to redeem the token
    /// * `original_credential` - Audit reference to the requesting credential
    /// * `nonce` - Fresh random value; the redeemer accepts it once
    pub fn mint(
        &self,
        subject: &str,
        target_branch_id: i64,
        original_credential: &str,
        nonce: &str,
    ) -> Result<HandoffToken, TokenError> {
        self.mint_with_time(
            subject,
            target_branch_id,
            original_credential,
            nonce,
            TokenTimeConfig::with_duration(self.ttl),
        )
    }

    pub fn mint_with_time(
        &self,
        subject: &str,
        target_branch_id: i64,
        original_credential: &str,
        nonce: &str,
        time_config: TokenTimeConfig,
    ) -> Result<HandoffToken, TokenError> {
        let issued_at = time_config
            .start_time
            .unwrap_or_else(|| Utc::now().timestamp());
        let expiration = issued_at
            .checked_add(time_config.duration)
            .ok_or_else(|| TokenError::mint("token lifetime overflows the expiry timestamp"))?;

        let kind = TokenKind::BranchSwitch.as_str();
        let subject_term = subject.to_string();
        let original = original_credential.to_string();
        let nonce_term = nonce.to_string();

        let biscuit = biscuit!(
            r#"
                token_type({kind});
                subject({subject_term});
                target_branch({target_branch_id});
                original_credential({original});
                nonce({nonce_term});
                issued_at({issued_at});
                expires_at({expiration});
                check if time($time), $time < {expiration};
            "#
        )
        .build(self.keys.keypair())
        .map_err(|e| TokenError::mint(e.to_string()))?;

        let token = biscuit
            .to_base64()
            .map_err(|e| TokenError::mint(e.to_string()))?;

        info!(
            subject,
            target_branch = target_branch_id,
            expires_at = expiration,
            "minted branch_switch token"
        );

        Ok(HandoffToken {
            token,
            claims: HandoffClaims {
                subject: subject.to_string(),
                target_branch_id,
                original_credential: original_credential.to_string(),
                nonce: nonce.to_string(),
                issued_at,
                expires_at: expiration,
            },
        })
    }

    /// Verifies a handoff token and reads its claims. Does not touch any nonce state.
    pub fn open(&self, token: &str) -> Result<HandoffClaims, TokenError> {
        let mut verified = open_token(token, self.keys.public_key(), TokenKind::BranchSwitch)?;

        Ok(HandoffClaims {
            subject: verified.string("subject")?,
            target_branch_id: verified.int("target_branch")?,
            original_credential: verified.string("original_credential")?,
            nonce: verified.string("nonce")?,
            issued_at: verified.int("issued_at")?,
            expires_at: verified.expires_at,
        })
    }
}

/// Opaque, stable reference to a credential: the hex revocation id of its
/// authority block. Used to record which credential a handoff came from
/// without embedding the credential itself.
pub fn credential_reference(token: &str, public_key: PublicKey) -> Result<String, TokenError> {
    let biscuit = Biscuit::from_base64(token.trim(), public_key)?;
    biscuit
        .revocation_identifiers()
        .first()
        .map(hex::encode)
        .ok_or_else(|| TokenError::invalid("Failed to extract revocation ID from credential"))
}
