use serde::{Deserialize, Serialize};
use std::fmt;

/// Type discriminator embedded in every token as `token_type(...)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TokenKind {
    /// The primary bearer credential.
    Credential,
    /// Single-use token that moves a session to another branch instance.
    BranchSwitch,
}

impl TokenKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TokenKind::Credential => "credential",
            TokenKind::BranchSwitch => "branch_switch",
        }
    }
}

impl fmt::Display for TokenKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// TokenTimeConfig allows control over token creation times and durations
#[derive(Debug, Clone, Copy)]
pub struct TokenTimeConfig {
    /// Optional custom start time (now time override)
    pub start_time: Option<i64>,
    /// Duration in seconds
    pub duration: i64,
}

impl TokenTimeConfig {
    pub fn with_duration(duration: i64) -> Self {
        Self {
            start_time: None,
            duration,
        }
    }
}

impl Default for TokenTimeConfig {
    fn default() -> Self {
        Self {
            start_time: None,
            duration: 8 * 60 * 60,
        }
    }
}

/// A branch as seen from inside a token: its id and display name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BranchRef {
    pub id: i64,
    pub name: String,
}

impl BranchRef {
    pub fn new(id: i64, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
        }
    }
}

/// Directory snapshot of a member, copied into a credential at mint time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemberAttributes {
    /// Stable user id; becomes the credential subject.
    pub user_id: String,
    pub member_id: i64,
    pub home_branch: BranchRef,
    pub role_level: i64,
    pub role_seq: i64,
    #[serde(default)]
    pub extension: Option<String>,
    #[serde(default)]
    pub employment_id: Option<String>,
    #[serde(default)]
    pub masking: bool,
    #[serde(default)]
    pub must_change_password: bool,
}

/// Claims decoded from a verified credential.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CredentialClaims {
    pub subject: String,
    pub member_id: i64,
    pub home_branch: BranchRef,
    /// Branch whose instance minted this credential. Differs from
    /// `home_branch` for headquarters users working on a branch server.
    pub active_branch: BranchRef,
    pub role_level: i64,
    pub role_seq: i64,
    pub extension: Option<String>,
    pub employment_id: Option<String>,
    pub masking: bool,
    pub must_change_password: bool,
    pub issued_at: i64,
    pub expires_at: i64,
}

impl CredentialClaims {
    /// Recovers the attribute snapshot the credential was minted from.
    pub fn attributes(&self) -> MemberAttributes {
        MemberAttributes {
            user_id: self.subject.clone(),
            member_id: self.member_id,
            home_branch: self.home_branch.clone(),
            role_level: self.role_level,
            role_seq: self.role_seq,
            extension: self.extension.clone(),
            employment_id: self.employment_id.clone(),
            masking: self.masking,
            must_change_password: self.must_change_password,
        }
    }
}

/// A freshly minted credential: the encoded token plus the claims it carries.
#[derive(Debug, Clone)]
pub struct Credential {
    pub token: String,
    pub claims: CredentialClaims,
}

/// Claims decoded from a verified `branch_switch` token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandoffClaims {
    pub subject: String,
    pub target_branch_id: i64,
    /// Opaque reference to the credential the handoff was requested with.
    /// Kept for audit only; never re-validated.
    pub original_credential: String,
    pub nonce: String,
    pub issued_at: i64,
    pub expires_at: i64,
}

/// A freshly minted handoff token and the claims it carries.
#[derive(Debug, Clone)]
pub struct HandoffToken {
    pub token: String,
    pub claims: HandoffClaims,
}
