use std::sync::Arc;

use branchpass_token::{CredentialClaims, CredentialCodec};
use tracing::{debug, warn};

use crate::directory::BranchDirectory;
use crate::resolver::{NetworkIdentityResolver, ServingRequest};

/// Outcome of the locality check for one request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GuardDecision {
    /// No usable credential. Authentication is left to the route.
    Unauthenticated,
    Pass(CredentialClaims),
    /// Credential is valid but may not be used on this instance.
    Rejected(String),
}

/// Ensures a credential is only used on its home branch's instance, unless
/// the home branch is headquarters.
///
/// Fails closed: a directory error or an endpoint no branch publishes rejects.
#[derive(Clone)]
pub struct LocalityGuard {
    codec: CredentialCodec,
    directory: Arc<dyn BranchDirectory>,
    resolver: NetworkIdentityResolver,
}

impl LocalityGuard {
    pub fn new(
        codec: CredentialCodec,
        directory: Arc<dyn BranchDirectory>,
        resolver: NetworkIdentityResolver,
    ) -> Self {
        Self {
            codec,
            directory,
            resolver,
        }
    }

    pub fn check(&self, bearer: Option<&str>, request: &ServingRequest) -> GuardDecision {
        let Some(token) = bearer else {
            return GuardDecision::Unauthenticated;
        };
        let claims = match self.codec.decode(token) {
            Ok(claims) => claims,
            Err(e) => {
                debug!(error = %e, "credential did not decode, deferring to route");
                return GuardDecision::Unauthenticated;
            }
        };

        let home = claims.home_branch.id;
        match self.directory.is_headquarters(home) {
            Ok(true) => return GuardDecision::Pass(claims),
            Ok(false) => {}
            Err(e) => return reject(&claims, format!("branch lookup failed: {e}")),
        }

        let serving = match self.resolver.resolve(request) {
            Ok(serving) => serving,
            Err(e) => return reject(&claims, format!("serving branch lookup failed: {e}")),
        };

        match serving.branch_id() {
            Some(id) if id == home => GuardDecision::Pass(claims),
            Some(id) => reject(
                &claims,
                format!("credential for branch {home} presented on branch {id}"),
            ),
            None => reject(
                &claims,
                format!(
                    "credential for branch {home} presented on unaffiliated endpoint {}:{}",
                    serving.ip, serving.port
                ),
            ),
        }
    }
}

fn reject(claims: &CredentialClaims, reason: String) -> GuardDecision {
    warn!(subject = %claims.subject, home_branch = claims.home_branch.id, %reason, "locality check rejected request");
    GuardDecision::Rejected(reason)
}
