extern crate biscuit_auth as biscuit;

use biscuit::macros::authorizer;
use biscuit::{Authorizer, Biscuit, PublicKey};
use chrono::Utc;

use crate::claims::{BranchRef, TokenKind};
use crate::error::TokenError;

/// A token whose signature, expiry and type discriminator have been checked.
///
/// Claim accessors query the authority block through the authorizer, so facts
/// appended by a holder in attenuation blocks are never visible here.
pub(crate) struct VerifiedToken {
    authorizer: Authorizer,
    pub(crate) expires_at: i64,
}

/// Opens a base64 token against the shared public key.
///
/// Checks run in a fixed order: signature, expiry, type discriminator, then
/// the datalog checks embedded in the token. The first failing step decides
/// the error variant.
pub(crate) fn open_token(
    token: &str,
    public_key: PublicKey,
    expected: TokenKind,
) -> Result<VerifiedToken, TokenError> {
    open_token_at(token, public_key, expected, Utc::now().timestamp())
}

pub(crate) fn open_token_at(
    token: &str,
    public_key: PublicKey,
    expected: TokenKind,
    now: i64,
) -> Result<VerifiedToken, TokenError> {
    let biscuit = Biscuit::from_base64(token.trim(), public_key)?;

    let authz = authorizer!(
        r#"
            time({now});
            allow if true;
        "#
    );
    let authorizer = authz
        .build(&biscuit)
        .map_err(|e| TokenError::invalid(format!("Failed to build authorizer: {e}")))?;

    let mut verified = VerifiedToken {
        authorizer,
        expires_at: 0,
    };

    // Several expiry facts can only come from a tampered issuer; honour the earliest.
    let expires_at = verified
        .ints("expires_at")?
        .into_iter()
        .min()
        .ok_or_else(|| TokenError::invalid("token has no expires_at claim"))?;
    if now >= expires_at {
        return Err(TokenError::Expired {
            expired_at: expires_at,
        });
    }
    verified.expires_at = expires_at;

    let found = verified.string("token_type")?;
    if found != expected.as_str() {
        return Err(TokenError::WrongType { expected, found });
    }

    verified
        .authorizer
        .authorize()
        .map_err(|e| TokenError::invalid(format!("token checks failed: {e}")))?;

    Ok(verified)
}

impl VerifiedToken {
    fn ints(&mut self, claim: &str) -> Result<Vec<i64>, TokenError> {
        let rule = format!("data($v) <- {claim}($v)");
        let rows: Vec<(i64,)> = self
            .authorizer
            .query(rule.as_str())
            .map_err(|e| TokenError::invalid(format!("Failed to query {claim}: {e}")))?;
        Ok(rows.into_iter().map(|(v,)| v).collect())
    }

    fn strings(&mut self, claim: &str) -> Result<Vec<String>, TokenError> {
        let rule = format!("data($v) <- {claim}($v)");
        let rows: Vec<(String,)> = self
            .authorizer
            .query(rule.as_str())
            .map_err(|e| TokenError::invalid(format!("Failed to query {claim}: {e}")))?;
        Ok(rows.into_iter().map(|(v,)| v).collect())
    }

    pub(crate) fn int(&mut self, claim: &str) -> Result<i64, TokenError> {
        self.ints(claim)?
            .into_iter()
            .next()
            .ok_or_else(|| TokenError::invalid(format!("token has no {claim} claim")))
    }

    pub(crate) fn string(&mut self, claim: &str) -> Result<String, TokenError> {
        self.optional_string(claim)?
            .ok_or_else(|| TokenError::invalid(format!("token has no {claim} claim")))
    }

    pub(crate) fn optional_string(&mut self, claim: &str) -> Result<Option<String>, TokenError> {
        Ok(self.strings(claim)?.into_iter().next())
    }

    pub(crate) fn flag(&mut self, claim: &str) -> Result<bool, TokenError> {
        let rule = format!("data($v) <- {claim}($v)");
        let rows: Vec<(bool,)> = self
            .authorizer
            .query(rule.as_str())
            .map_err(|e| TokenError::invalid(format!("Failed to query {claim}: {e}")))?;
        rows.into_iter()
            .next()
            .map(|(v,)| v)
            .ok_or_else(|| TokenError::invalid(format!("token has no {claim} claim")))
    }

    pub(crate) fn int_pair(&mut self, claim: &str) -> Result<(i64, i64), TokenError> {
        let rule = format!("data($a, $b) <- {claim}($a, $b)");
        let rows: Vec<(i64, i64)> = self
            .authorizer
            .query(rule.as_str())
            .map_err(|e| TokenError::invalid(format!("Failed to query {claim}: {e}")))?;
        rows.into_iter()
            .next()
            .ok_or_else(|| TokenError::invalid(format!("token has no {claim} claim")))
    }

    pub(crate) fn branch(&mut self, claim: &str) -> Result<BranchRef, TokenError> {
        let rule = format!("data($id, $name) <- {claim}($id, $name)");
        let rows: Vec<(i64, String)> = self
            .authorizer
            .query(rule.as_str())
            .map_err(|e| TokenError::invalid(format!("Failed to query {claim}: {e}")))?;
        rows.into_iter()
            .next()
            .map(|(id, name)| BranchRef { id, name })
            .ok_or_else(|| TokenError::invalid(format!("token has no {claim} claim")))
    }
}
