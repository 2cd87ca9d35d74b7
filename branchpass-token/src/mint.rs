extern crate biscuit_auth as biscuit;

use biscuit::macros::{biscuit, fact};
use biscuit::PublicKey;
use chrono::Utc;
use tracing::info;

use crate::claims::{
    BranchRef, Credential, CredentialClaims, MemberAttributes, TokenKind, TokenTimeConfig,
};
use crate::error::TokenError;
use crate::utils::SigningKeys;
use crate::verify::open_token;

/// Issues and decodes the primary bearer credential.
///
/// This is the only place credentials are minted. Login and handoff
/// redemption both go through [`CredentialCodec::issue`].
#[derive(Debug, Clone)]
pub struct CredentialCodec {
    keys: SigningKeys,
    ttl: i64,
}

impl CredentialCodec {
    /// # Arguments
    ///
    /// * `keys` - The deployment-wide signing keys
    /// * `ttl` - Credential lifetime in seconds
    pub fn new(keys: SigningKeys, ttl: i64) -> Self {
        Self { keys, ttl }
    }

    pub fn ttl(&self) -> i64 {
        self.ttl
    }

    pub fn public_key(&self) -> PublicKey {
        self.keys.public_key()
    }

    /// Mints a credential for `attributes`, scoped to `active_branch`.
    ///
    /// The home branch comes from the attribute snapshot; the active branch is
    /// the branch whose instance is minting. Expiry is `issued_at + ttl`.
    pub fn issue(
        &self,
        attributes: &MemberAttributes,
        active_branch: &BranchRef,
    ) -> Result<Credential, TokenError> {
        self.issue_with_time(
            attributes,
            active_branch,
            TokenTimeConfig::with_duration(self.ttl),
        )
    }

    /// Same as [`issue`](Self::issue) with an explicit start time and duration.
    pub fn issue_with_time(
        &self,
        attributes: &MemberAttributes,
        active_branch: &BranchRef,
        time_config: TokenTimeConfig,
    ) -> Result<Credential, TokenError> {
        let issued_at = time_config
            .start_time
            .unwrap_or_else(|| Utc::now().timestamp());
        let expiration = issued_at
            .checked_add(time_config.duration)
            .ok_or_else(|| TokenError::mint("token lifetime overflows the expiry timestamp"))?;

        let kind = TokenKind::Credential.as_str();
        let subject = attributes.user_id.clone();
        let member_id = attributes.member_id;
        let home_id = attributes.home_branch.id;
        let home_name = attributes.home_branch.name.clone();
        let active_id = active_branch.id;
        let active_name = active_branch.name.clone();
        let role_level = attributes.role_level;
        let role_seq = attributes.role_seq;
        let masking = attributes.masking;
        let must_change_password = attributes.must_change_password;

        let mut builder = biscuit!(
            r#"
                token_type({kind});
                subject({subject});
                member_id({member_id});
                home_branch({home_id}, {home_name});
                active_branch({active_id}, {active_name});
                role({role_level}, {role_seq});
                masking({masking});
                must_change_password({must_change_password});
                issued_at({issued_at});
                expires_at({expiration});
                check if time($time), $time < {expiration};
            "#
        );

        if let Some(extension) = attributes.extension.clone() {
            builder = builder
                .fact(fact!(r#"extension({extension})"#))
                .map_err(|e| TokenError::mint(e.to_string()))?;
        }
        if let Some(employment_id) = attributes.employment_id.clone() {
            builder = builder
                .fact(fact!(r#"employment_id({employment_id})"#))
                .map_err(|e| TokenError::mint(e.to_string()))?;
        }

        let biscuit = builder
            .build(self.keys.keypair())
            .map_err(|e| TokenError::mint(e.to_string()))?;
        let token = biscuit
            .to_base64()
            .map_err(|e| TokenError::mint(e.to_string()))?;

        info!(
            subject = %attributes.user_id,
            home_branch = home_id,
            active_branch = active_id,
            expires_at = expiration,
            "minted credential"
        );

        Ok(Credential {
            token,
            claims: CredentialClaims {
                subject: attributes.user_id.clone(),
                member_id,
                home_branch: attributes.home_branch.clone(),
                active_branch: active_branch.clone(),
                role_level,
                role_seq,
                extension: attributes.extension.clone(),
                employment_id: attributes.employment_id.clone(),
                masking,
                must_change_password,
                issued_at,
                expires_at: expiration,
            },
        })
    }

    /// Verifies signature, expiry and type, then reads every claim back.
    ///
    /// Never panics on malformed input; any failure means "not authenticated".
    pub fn decode(&self, token: &str) -> Result<CredentialClaims, TokenError> {
        let mut verified = open_token(token, self.keys.public_key(), TokenKind::Credential)?;

        let (role_level, role_seq) = verified.int_pair("role")?;
        Ok(CredentialClaims {
            subject: verified.string("subject")?,
            member_id: verified.int("member_id")?,
            home_branch: verified.branch("home_branch")?,
            active_branch: verified.branch("active_branch")?,
            role_level,
            role_seq,
            extension: verified.optional_string("extension")?,
            employment_id: verified.optional_string("employment_id")?,
            masking: verified.flag("masking")?,
            must_change_password: verified.flag("must_change_password")?,
            issued_at: verified.int("issued_at")?,
            expires_at: verified.expires_at,
        })
    }
}
