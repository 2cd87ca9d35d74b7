//! Issuing and redeeming `branch_switch` handoff tokens.

use std::sync::Arc;

use branchpass_token::{credential_reference, HandoffCodec, HandoffToken, PublicKey, SigningKeys};
use chrono::Utc;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::error::AuthError;
use crate::ledger::{NonceError, NonceStore};

/// What a successful redemption yields.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Redemption {
    pub user_id: String,
    pub target_branch_id: i64,
    /// Audit reference to the credential the switch was requested with.
    pub original_credential: String,
}

/// Handoff token issuer and redeemer.
///
/// Redemption consumes the token's nonce in the ledger, so each token is
/// accepted at most once on the instance that holds the ledger.
#[derive(Clone)]
pub struct HandoffService {
    codec: HandoffCodec,
    public_key: PublicKey,
    ledger: Arc<dyn NonceStore>,
}

impl HandoffService {
    pub fn new(keys: SigningKeys, ttl: i64, ledger: Arc<dyn NonceStore>) -> Self {
        let public_key = keys.public_key();
        Self {
            codec: HandoffCodec::new(keys, ttl),
            public_key,
            ledger,
        }
    }

    pub fn ttl(&self) -> i64 {
        self.codec.ttl()
    }

    pub fn ledger(&self) -> Arc<dyn NonceStore> {
        self.ledger.clone()
    }

    /// Mints a handoff token for `user_id` addressed to `target_branch_id`.
    ///
    /// The caller must already have verified `original_credential`; only an
    /// audit reference to it goes into the token.
    #[instrument(skip(self, original_credential))]
    pub fn issue(
        &self,
        original_credential: &str,
        user_id: &str,
        target_branch_id: i64,
    ) -> Result<HandoffToken, AuthError> {
        let reference = credential_reference(original_credential, self.public_key)?;
        let nonce = Uuid::new_v4().simple().to_string();
        Ok(self
            .codec
            .mint(user_id, target_branch_id, &reference, &nonce)?)
    }

    /// Verifies a handoff token and consumes its nonce.
    ///
    /// # Errors
    ///
    /// `TokenExpired`, `TokenWrongType` or `TokenInvalid` from verification,
    /// which runs first; `TokenReplayed` if the nonce was already consumed.
    #[instrument(skip_all)]
    pub fn redeem(&self, token: &str) -> Result<Redemption, AuthError> {
        let claims = self.codec.open(token)?;

        match self
            .ledger
            .consume(&claims.nonce, claims.expires_at, Utc::now().timestamp())
        {
            Ok(()) => {}
            Err(NonceError::Replayed) => {
                warn!(subject = %claims.subject, target_branch = claims.target_branch_id, "handoff token replayed");
                return Err(AuthError::TokenReplayed);
            }
            Err(e) => return Err(e.into()),
        }

        info!(subject = %claims.subject, target_branch = claims.target_branch_id, "redeemed handoff token");
        Ok(Redemption {
            user_id: claims.subject,
            target_branch_id: claims.target_branch_id,
            original_credential: claims.original_credential,
        })
    }
}
