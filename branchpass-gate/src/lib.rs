//! # Branchpass Gate
//!
//! Branch locality and cross-instance session handoff for deployments where
//! every branch office runs its own server and headquarters runs one more.
//!
//! The pieces, leaf first:
//!
//! - [`directory`]: read-only branch and member lookups
//! - [`resolver`]: which branch is serving this request
//! - [`guard`]: is this credential allowed on this instance
//! - [`ledger`]: which handoff nonces have been spent
//! - [`handoff`]: issue and redeem `branch_switch` tokens
//! - [`service`]: login, switch request and switch consumption
//!
//! Nothing here keeps an ambient "current branch". Callers build a
//! [`ServingRequest`] per request and pass it down.

pub mod directory;
mod error;
pub mod guard;
pub mod handoff;
pub mod ledger;
pub mod resolver;
pub mod service;

pub use directory::{
    Branch, BranchDirectory, DirectoryError, Endpoint, EndpointKind, MemberDirectory,
    StaticBranchDirectory, StaticMemberDirectory,
};
pub use error::AuthError;
pub use guard::{GuardDecision, LocalityGuard};
pub use handoff::{HandoffService, Redemption};
pub use ledger::{spawn_sweeper, InMemoryNonceLedger, NonceError, NonceStore};
pub use resolver::{
    FixedInterfaces, InterfaceSource, NetworkIdentityResolver, ServingEndpoint, ServingRequest,
    SystemInterfaces,
};
pub use service::{
    AuthSettings, BranchAuthService, LoginOutcome, SwitchErrorCode, SwitchLanding, SwitchRedirect,
    SWITCH_LOGIN_PATH,
};
