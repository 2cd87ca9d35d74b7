//! Login and branch-switch orchestration.

use std::net::SocketAddr;
use std::sync::Arc;

use branchpass_config::{ConfigError, GatewayConfig};
use branchpass_token::{Credential, CredentialClaims, CredentialCodec, HandoffToken, SigningKeys};
use tracing::{info, instrument, warn};
use url::Url;

use crate::directory::{
    Branch, BranchDirectory, EndpointKind, MemberDirectory, StaticBranchDirectory,
    StaticMemberDirectory,
};
use crate::error::AuthError;
use crate::guard::LocalityGuard;
use crate::handoff::HandoffService;
use crate::ledger::{InMemoryNonceLedger, NonceStore};
use crate::resolver::{InterfaceSource, NetworkIdentityResolver, ServingEndpoint, ServingRequest};

/// Path of the consume endpoint on every instance.
pub const SWITCH_LOGIN_PATH: &str = "auth/switchLogin";

/// Policy knobs for [`BranchAuthService`].
#[derive(Debug, Clone)]
pub struct AuthSettings {
    pub credential_ttl: i64,
    pub handoff_ttl: i64,
    pub nonce_capacity: usize,
    /// Redirect to branches' public (NAT) endpoints instead of internal ones.
    pub use_public_endpoints: bool,
    pub redirect_scheme: String,
    /// Landing address when no branch endpoint is known.
    pub default_redirect_url: Url,
    pub superuser_role_level: i64,
}

impl AuthSettings {
    pub fn from_config(config: &GatewayConfig) -> Result<Self, ConfigError> {
        let default_redirect_url = Url::parse(&config.default_redirect_url).map_err(|e| {
            ConfigError::InvalidUrl(format!("{}: {}", config.default_redirect_url, e))
        })?;
        Ok(Self {
            credential_ttl: config.credential_ttl,
            handoff_ttl: config.handoff_ttl,
            nonce_capacity: config.nonce_capacity,
            use_public_endpoints: config.use_public_endpoints,
            redirect_scheme: config.redirect_scheme.clone(),
            default_redirect_url,
            superuser_role_level: config.superuser_role_level,
        })
    }

    fn endpoint_kind(&self) -> EndpointKind {
        EndpointKind::select(self.use_public_endpoints)
    }
}

/// A successful login.
#[derive(Debug, Clone)]
pub struct LoginOutcome {
    pub credential: Credential,
    pub redirect_url: String,
}

/// Where to send the browser after a switch request.
#[derive(Debug, Clone)]
pub struct SwitchRedirect {
    pub location: String,
    pub handoff: HandoffToken,
}

/// Failure codes appended to the consume endpoint's redirect.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SwitchErrorCode {
    Expired,
    Invalid,
    Forbidden,
}

impl SwitchErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            SwitchErrorCode::Expired => "expired",
            SwitchErrorCode::Invalid => "invalid",
            SwitchErrorCode::Forbidden => "forbidden",
        }
    }

    fn from_redeem_error(err: &AuthError) -> Self {
        match err {
            AuthError::TokenExpired { .. } => SwitchErrorCode::Expired,
            AuthError::Forbidden(_) => SwitchErrorCode::Forbidden,
            _ => SwitchErrorCode::Invalid,
        }
    }
}

/// Result of consuming a handoff token. Always a redirect.
#[derive(Debug, Clone)]
pub enum SwitchLanding {
    Success {
        location: String,
        credential: Credential,
    },
    Failure {
        location: String,
        code: SwitchErrorCode,
    },
}

impl SwitchLanding {
    pub fn location(&self) -> &str {
        match self {
            SwitchLanding::Success { location, .. } | SwitchLanding::Failure { location, .. } => {
                location
            }
        }
    }
}

/// Ties the codecs, directories, resolver, guard and handoff service together
/// for one instance.
#[derive(Clone)]
pub struct BranchAuthService {
    credentials: CredentialCodec,
    handoffs: HandoffService,
    branches: Arc<dyn BranchDirectory>,
    members: Arc<dyn MemberDirectory>,
    resolver: NetworkIdentityResolver,
    guard: LocalityGuard,
    settings: AuthSettings,
}

impl BranchAuthService {
    pub fn new(
        keys: SigningKeys,
        branches: Arc<dyn BranchDirectory>,
        members: Arc<dyn MemberDirectory>,
        interfaces: Arc<dyn InterfaceSource>,
        ledger: Arc<dyn NonceStore>,
        settings: AuthSettings,
    ) -> Self {
        let credentials = CredentialCodec::new(keys.clone(), settings.credential_ttl);
        let handoffs = HandoffService::new(keys, settings.handoff_ttl, ledger);
        let resolver = NetworkIdentityResolver::new(branches.clone(), interfaces);
        let guard = LocalityGuard::new(credentials.clone(), branches.clone(), resolver.clone());
        Self {
            credentials,
            handoffs,
            branches,
            members,
            resolver,
            guard,
            settings,
        }
    }

    /// Builds a service from configuration with in-memory directories and ledger.
    pub fn from_config(
        config: &GatewayConfig,
        interfaces: Arc<dyn InterfaceSource>,
    ) -> Result<Self, AuthError> {
        let settings =
            AuthSettings::from_config(config).map_err(|e| AuthError::Internal(e.to_string()))?;
        let pem = config
            .signing_key_pem()
            .map_err(|e| AuthError::Internal(e.to_string()))?;
        let keys = SigningKeys::from_pem(&pem)?;

        let branches = StaticBranchDirectory::from_config(&config.branches);
        let members = StaticMemberDirectory::from_config(&config.members, &branches);
        // Remember nonces for at least as long as a handoff token can verify.
        let ledger = InMemoryNonceLedger::new(settings.nonce_capacity, settings.handoff_ttl);

        Ok(Self::new(
            keys,
            Arc::new(branches),
            Arc::new(members),
            interfaces,
            Arc::new(ledger),
            settings,
        ))
    }

    pub fn guard(&self) -> &LocalityGuard {
        &self.guard
    }

    pub fn ledger(&self) -> Arc<dyn NonceStore> {
        self.handoffs.ledger()
    }

    pub fn settings(&self) -> &AuthSettings {
        &self.settings
    }

    /// Authenticates `user_id` on the instance serving `request`.
    ///
    /// Users whose home branch is not headquarters may only log in on their
    /// home branch's instance. The credential's active branch is the serving
    /// branch, or headquarters when the endpoint is unaffiliated.
    #[instrument(skip(self, secret, request))]
    pub fn login(
        &self,
        user_id: &str,
        secret: &str,
        request: &ServingRequest,
    ) -> Result<LoginOutcome, AuthError> {
        let attributes = self
            .members
            .authenticate(user_id, secret)?
            .ok_or_else(|| AuthError::unauthenticated("invalid user id or secret"))?;

        let home = &attributes.home_branch;
        let headquarters_user = self.branches.is_headquarters(home.id)?;
        let serving = self.resolver.resolve(request)?;

        if !headquarters_user && serving.branch_id() != Some(home.id) {
            warn!(
                user_id,
                home_branch = home.id,
                serving_branch = ?serving.branch_id(),
                "login refused on foreign branch"
            );
            return Err(AuthError::forbidden(format!(
                "user {user_id} may only log in on branch {}",
                home.id
            )));
        }

        let active = match serving.branch {
            Some(branch) => Some(branch),
            None => match self.branches.headquarters()? {
                Some(hq) => Some(hq),
                None => self.branches.branch(home.id)?,
            },
        };
        let active_ref = active
            .as_ref()
            .map(Branch::branch_ref)
            .unwrap_or_else(|| home.clone());

        let credential = self.credentials.issue(&attributes, &active_ref)?;
        let redirect_url = active
            .as_ref()
            .and_then(|branch| self.branch_root(branch))
            .unwrap_or_else(|| self.settings.default_redirect_url.clone())
            .to_string();

        info!(user_id, active_branch = active_ref.id, "login succeeded");
        Ok(LoginOutcome {
            credential,
            redirect_url,
        })
    }

    /// Issues a handoff token to `target_branch_id` and builds the redirect to
    /// that branch's consume endpoint.
    ///
    /// # Errors
    ///
    /// * `Unauthenticated` - missing or undecodable credential
    /// * `Forbidden` - caller is neither headquarters-level nor superuser
    /// * `NotFound` - unknown branch, or no endpoint of the configured kind
    #[instrument(skip(self, bearer))]
    pub fn request_switch(
        &self,
        bearer: Option<&str>,
        target_branch_id: i64,
    ) -> Result<SwitchRedirect, AuthError> {
        let token = bearer.ok_or_else(|| AuthError::unauthenticated("missing credential"))?;
        let claims = self
            .credentials
            .decode(token)
            .map_err(|e| AuthError::unauthenticated(e.to_string()))?;

        let headquarters_user = self.branches.is_headquarters(claims.home_branch.id)?;
        let superuser = claims.role_level == self.settings.superuser_role_level;
        if !headquarters_user && !superuser {
            warn!(subject = %claims.subject, target_branch_id, "branch switch refused");
            return Err(AuthError::forbidden(
                "branch switching requires headquarters or superuser role",
            ));
        }

        let target = self
            .branches
            .branch(target_branch_id)?
            .ok_or_else(|| AuthError::not_found(format!("branch {target_branch_id}")))?;
        let Some(root) = self.branch_root(&target) else {
            return Err(AuthError::not_found(format!(
                "branch {target_branch_id} has no published endpoint"
            )));
        };

        let handoff = self.handoffs.issue(token, &claims.subject, target.id)?;

        let mut location = root
            .join(SWITCH_LOGIN_PATH)
            .map_err(|e| AuthError::Internal(e.to_string()))?;
        location
            .query_pairs_mut()
            .append_pair("switch_token", &handoff.token);

        Ok(SwitchRedirect {
            location: location.to_string(),
            handoff,
        })
    }

    /// Redeems a handoff token on this instance and lands the browser back
    /// in the app, with a new credential on success or an error code.
    pub fn consume_switch(&self, token: Option<&str>, request: &ServingRequest) -> SwitchLanding {
        let serving = match self.resolver.resolve(request) {
            Ok(serving) => serving,
            Err(e) => {
                warn!(error = %e, "could not resolve serving branch for switch");
                return self.fail(
                    self.settings.default_redirect_url.clone(),
                    SwitchErrorCode::Invalid,
                );
            }
        };
        let root = self.serving_root(&serving);

        let token = match token.map(str::trim).filter(|t| !t.is_empty()) {
            Some(token) => token,
            None => return self.fail(root, SwitchErrorCode::Invalid),
        };

        match self.complete_switch(token, &serving) {
            Ok(credential) => {
                let mut location = root;
                location
                    .query_pairs_mut()
                    .append_pair("token", &credential.token);
                SwitchLanding::Success {
                    location: location.to_string(),
                    credential,
                }
            }
            Err(e) => {
                warn!(error = %e, "branch switch failed");
                self.fail(root, SwitchErrorCode::from_redeem_error(&e))
            }
        }
    }

    fn complete_switch(
        &self,
        token: &str,
        serving: &ServingEndpoint,
    ) -> Result<Credential, AuthError> {
        let redemption = self.handoffs.redeem(token)?;

        let branch = match &serving.branch {
            Some(branch) if branch.id == redemption.target_branch_id => branch,
            _ => {
                return Err(AuthError::forbidden(format!(
                    "handoff for branch {} arrived at {:?}",
                    redemption.target_branch_id,
                    serving.branch_id()
                )))
            }
        };

        let attributes = self
            .members
            .attributes(&redemption.user_id)?
            .ok_or_else(|| {
                AuthError::forbidden(format!("user {} no longer exists", redemption.user_id))
            })?;

        let credential = self.credentials.issue(&attributes, &branch.branch_ref())?;
        info!(
            subject = %redemption.user_id,
            active_branch = branch.id,
            original_credential = %redemption.original_credential,
            "branch switch completed"
        );
        Ok(credential)
    }

    /// Claims of a valid credential.
    pub fn session(&self, bearer: Option<&str>) -> Result<CredentialClaims, AuthError> {
        let token = bearer.ok_or_else(|| AuthError::unauthenticated("missing credential"))?;
        self.credentials
            .decode(token)
            .map_err(|e| AuthError::unauthenticated(e.to_string()))
    }

    fn fail(&self, mut root: Url, code: SwitchErrorCode) -> SwitchLanding {
        root.query_pairs_mut()
            .append_pair("switchError", code.as_str());
        SwitchLanding::Failure {
            location: root.to_string(),
            code,
        }
    }

    /// Root URL of `branch` at its configured endpoint kind.
    fn branch_root(&self, branch: &Branch) -> Option<Url> {
        let endpoint = branch.endpoint(self.settings.endpoint_kind())?;
        endpoint_url(&self.settings.redirect_scheme, endpoint.socket_addr())
    }

    fn serving_root(&self, serving: &ServingEndpoint) -> Url {
        serving
            .branch
            .as_ref()
            .and_then(|branch| self.branch_root(branch))
            .unwrap_or_else(|| self.settings.default_redirect_url.clone())
    }
}

fn endpoint_url(scheme: &str, addr: SocketAddr) -> Option<Url> {
    Url::parse(&format!("{scheme}://{addr}/")).ok()
}
