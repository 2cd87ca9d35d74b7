//! # Branchpass Token
//!
//! Credential and handoff tokens for branch-scoped sessions.
//!
//! Both token types are biscuit tokens signed with one deployment-wide key, so
//! a token minted on any branch instance verifies on every other. Every claim
//! is a separate authority-block fact (`subject`, `home_branch`,
//! `active_branch`, ...) so a consumer can read one claim without touching the
//! rest.
//!
//! ## Token Types
//!
//! ### Credentials
//!
//! The bearer token presented on every authenticated request. Minted at login
//! or after a branch switch, valid for hours, never mutated.
//!
//! ### Handoff tokens
//!
//! `branch_switch` tokens valid for seconds. They name one target branch and
//! carry a nonce so the target can refuse replays.
//!
//! ## Usage
//!
//! ```no_run
//! use branchpass_token::{BranchRef, CredentialCodec, MemberAttributes, SigningKeys};
//!
//! fn main() -> Result<(), branchpass_token::TokenError> {
//!     let keys = SigningKeys::from_pem_file("/etc/branchpass/signing.pem")?;
//!     let codec = CredentialCodec::new(keys, 8 * 60 * 60);
//!
//!     let attributes = MemberAttributes {
//!         user_id: "alice".to_string(),
//!         member_id: 42,
//!         home_branch: BranchRef::new(5, "Busan"),
//!         role_level: 3,
//!         role_seq: 1,
//!         extension: None,
//!         employment_id: None,
//!         masking: false,
//!         must_change_password: false,
//!     };
//!     let credential = codec.issue(&attributes, &BranchRef::new(5, "Busan"))?;
//!     let claims = codec.decode(&credential.token)?;
//!     assert_eq!(claims.subject, "alice");
//!     Ok(())
//! }
//! ```

mod claims;
mod error;
mod handoff;
mod mint;
mod utils;
mod verify;

pub use claims::{
    BranchRef, Credential, CredentialClaims, HandoffClaims, HandoffToken, MemberAttributes,
    TokenKind, TokenTimeConfig,
};
pub use error::TokenError;
pub use handoff::{credential_reference, HandoffCodec, DEFAULT_HANDOFF_TTL};
pub use mint::CredentialCodec;
pub use utils::SigningKeys;

// Re-export biscuit types that are needed for public API
pub use biscuit_auth::{KeyPair, PublicKey};
