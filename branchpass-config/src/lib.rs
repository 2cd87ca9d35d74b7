//! # Branchpass Config
//!
//! Configuration for a single branchpass instance: where it listens, the
//! signing key shared by every instance, token lifetimes, and the branch and
//! member directory data the instance serves from.
//!
//! Configuration can be loaded from JSON, TOML, or environment variables:
//!
//! ```no_run
//! use branchpass_config::GatewayConfig;
//!
//! let config = GatewayConfig::from_toml("/etc/branchpass/config.toml")
//!     .expect("Failed to load configuration");
//! ```

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::env;
use std::error::Error;
use std::fmt;
use std::fs;
use std::net::{IpAddr, SocketAddr};
use std::path::{Path, PathBuf};

/// Longest credential lifetime `validate` accepts: 30 days.
pub const MAX_CREDENTIAL_TTL: i64 = 30 * 24 * 60 * 60;
/// Longest handoff token lifetime `validate` accepts: one hour.
pub const MAX_HANDOFF_TTL: i64 = 60 * 60;

/// Configuration for one branchpass instance.
///
/// Every instance of a deployment carries the same signing key and the same
/// branch table; only `listen_addr` and the redirect defaults normally differ.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,
    /// PEM-encoded private key shared by every instance.
    #[serde(default)]
    pub signing_key: Option<String>,
    /// Path to the PEM-encoded private key. Takes precedence over `signing_key`.
    #[serde(default)]
    pub signing_key_file: Option<PathBuf>,
    /// Credential lifetime in seconds.
    #[serde(default = "default_credential_ttl")]
    pub credential_ttl: i64,
    /// Handoff token lifetime in seconds.
    #[serde(default = "default_handoff_ttl")]
    pub handoff_ttl: i64,
    /// Upper bound on remembered handoff nonces.
    #[serde(default = "default_nonce_capacity")]
    pub nonce_capacity: usize,
    /// Seconds between nonce ledger sweeps.
    #[serde(default = "default_nonce_sweep_interval")]
    pub nonce_sweep_interval: u64,
    /// Build outbound redirects from the public (NAT) endpoint instead of the
    /// internal one.
    #[serde(default)]
    pub use_public_endpoints: bool,
    #[serde(default = "default_redirect_scheme")]
    pub redirect_scheme: String,
    /// Landing address used when the serving branch cannot be resolved.
    #[serde(default = "default_redirect_url")]
    pub default_redirect_url: String,
    /// Role level treated as superuser for branch switching.
    #[serde(default = "default_superuser_role_level")]
    pub superuser_role_level: i64,
    #[serde(default)]
    pub branches: Vec<BranchEntry>,
    #[serde(default)]
    pub members: Vec<MemberEntry>,
}

/// A published `(ip, port)` pair.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EndpointEntry {
    pub ip: IpAddr,
    pub port: u16,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BranchEntry {
    pub id: i64,
    pub name: String,
    #[serde(default)]
    pub headquarters: bool,
    #[serde(default)]
    pub internal: Option<EndpointEntry>,
    /// NAT / public endpoint.
    #[serde(default)]
    pub public: Option<EndpointEntry>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MemberEntry {
    pub user_id: String,
    pub secret: String,
    pub member_id: i64,
    pub home_branch_id: i64,
    pub role_level: i64,
    #[serde(default)]
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

fn default_listen_addr() -> String {
    "0.0.0.0:8080".to_string()
}

fn default_credential_ttl() -> i64 {
    8 * 60 * 60
}

fn default_handoff_ttl() -> i64 {
    30
}

fn default_nonce_capacity() -> usize {
    100_000
}

fn default_nonce_sweep_interval() -> u64 {
    60
}

fn default_redirect_scheme() -> String {
    "http".to_string()
}

fn default_redirect_url() -> String {
    "http://127.0.0.1:8080".to_string()
}

fn default_superuser_role_level() -> i64 {
    1
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
            signing_key: None,
            signing_key_file: None,
            credential_ttl: default_credential_ttl(),
            handoff_ttl: default_handoff_ttl(),
            nonce_capacity: default_nonce_capacity(),
            nonce_sweep_interval: default_nonce_sweep_interval(),
            use_public_endpoints: false,
            redirect_scheme: default_redirect_scheme(),
            default_redirect_url: default_redirect_url(),
            superuser_role_level: default_superuser_role_level(),
            branches: Vec::new(),
            members: Vec::new(),
        }
    }
}

/// Errors that can occur when working with branchpass configuration
#[derive(Debug)]
pub enum ConfigError {
    InvalidListenAddr(String),
    MissingSigningKey,
    InvalidTtl(String),
    InvalidUrl(String),
    InvalidBranch(String),
    InvalidMember(String),
    IOError(String),
    ParseError(String),
    EnvVarError(String),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::InvalidListenAddr(addr) => {
                write!(
                    f,
                    "Invalid listen address '{}'. Expected an ip:port pair such as 0.0.0.0:8080.",
                    addr
                )
            }
            ConfigError::MissingSigningKey => {
                write!(f, "A signing key is required but was not provided. Set signing_key or signing_key_file to the PEM key shared by every instance.")
            }
            ConfigError::InvalidTtl(e) => {
                write!(f, "Invalid token lifetime: {}.", e)
            }
            ConfigError::InvalidUrl(e) => {
                write!(f, "Invalid redirect URL: {}.", e)
            }
            ConfigError::InvalidBranch(e) => {
                write!(f, "Invalid branch entry: {}.", e)
            }
            ConfigError::InvalidMember(e) => {
                write!(f, "Invalid member entry: {}.", e)
            }
            ConfigError::IOError(e) => {
                write!(f, "I/O error occurred while reading configuration: {}. Please check file permissions and paths.", e)
            }
            ConfigError::ParseError(e) => {
                write!(f, "Failed to parse configuration data: {}. Please ensure the configuration format is correct.", e)
            }
            ConfigError::EnvVarError(e) => {
                write!(f, "Environment variable error: {}. Please ensure all required environment variables are set correctly.", e)
            }
        }
    }
}

impl Error for ConfigError {}

impl From<std::io::Error> for ConfigError {
    fn from(error: std::io::Error) -> Self {
        ConfigError::IOError(error.to_string())
    }
}

impl From<serde_json::Error> for ConfigError {
    fn from(error: serde_json::Error) -> Self {
        ConfigError::ParseError(error.to_string())
    }
}

#[cfg(feature = "toml")]
impl From<toml::de::Error> for ConfigError {
    fn from(error: toml::de::Error) -> Self {
        ConfigError::ParseError(error.to_string())
    }
}

impl From<std::env::VarError> for ConfigError {
    fn from(error: std::env::VarError) -> Self {
        ConfigError::EnvVarError(error.to_string())
    }
}

impl GatewayConfig {
    /// Create a configuration from a JSON file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let file_content = fs::read_to_string(path)?;
        let config: GatewayConfig = serde_json::from_str(&file_content)?;
        config.validate()?;
        Ok(config)
    }

    /// Create a configuration from a TOML file
    #[cfg(feature = "toml")]
    pub fn from_toml(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let file_content = fs::read_to_string(path)?;
        let config: GatewayConfig = toml::from_str(&file_content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load a JSON or TOML file, chosen by extension (`.toml` means TOML).
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        match path.extension().and_then(|ext| ext.to_str()) {
            #[cfg(feature = "toml")]
            Some("toml") => Self::from_toml(path),
            _ => Self::from_file(path),
        }
    }

    /// Create a configuration from environment variables
    ///
    /// If `{PREFIX}_CONFIG_FILE` is set, that file is loaded first and the
    /// remaining variables override individual fields:
    /// - LISTEN_ADDR
    /// - SIGNING_KEY or SIGNING_KEY_FILE
    /// - CREDENTIAL_TTL
    /// - HANDOFF_TTL
    /// - DEFAULT_REDIRECT_URL
    /// - USE_PUBLIC_ENDPOINTS ("true" / "false")
    ///
    /// Branch and member tables can only come from the file.
    ///
    /// # Errors
    ///
    /// Returns a `ConfigError` if a variable is malformed or the resulting
    /// configuration does not validate.
    pub fn from_env(prefix: &str) -> Result<Self, ConfigError> {
        let mut config: GatewayConfig = match env::var(format!("{}_CONFIG_FILE", prefix)) {
            Ok(path) => {
                let path = PathBuf::from(path);
                let content = fs::read_to_string(&path)?;
                match path.extension().and_then(|ext| ext.to_str()) {
                    #[cfg(feature = "toml")]
                    Some("toml") => toml::from_str(&content)?,
                    _ => serde_json::from_str(&content)?,
                }
            }
            Err(std::env::VarError::NotPresent) => GatewayConfig::default(),
            Err(e) => return Err(e.into()),
        };

        if let Some(addr) = optional_var(prefix, "LISTEN_ADDR")? {
            config.listen_addr = addr;
        }

        match env::var(format!("{}_SIGNING_KEY_FILE", prefix)) {
            Ok(path) => config.signing_key_file = Some(PathBuf::from(path)),
            Err(std::env::VarError::NotPresent) => {
                if let Some(key) = optional_var(prefix, "SIGNING_KEY")? {
                    config.signing_key = Some(key);
                }
            }
            Err(e) => return Err(e.into()),
        }

        if let Some(ttl) = optional_var(prefix, "CREDENTIAL_TTL")? {
            config.credential_ttl = ttl.parse::<i64>().map_err(|_| {
                ConfigError::InvalidTtl(format!("CREDENTIAL_TTL '{}' is not a number", ttl))
            })?;
        }

        if let Some(ttl) = optional_var(prefix, "HANDOFF_TTL")? {
            config.handoff_ttl = ttl.parse::<i64>().map_err(|_| {
                ConfigError::InvalidTtl(format!("HANDOFF_TTL '{}' is not a number", ttl))
            })?;
        }

        if let Some(url) = optional_var(prefix, "DEFAULT_REDIRECT_URL")? {
            config.default_redirect_url = url;
        }

        if let Some(flag) = optional_var(prefix, "USE_PUBLIC_ENDPOINTS")? {
            config.use_public_endpoints = match flag.to_lowercase().as_str() {
                "true" | "1" | "yes" => true,
                "false" | "0" | "no" => false,
                _ => {
                    return Err(ConfigError::ParseError(format!(
                        "Invalid USE_PUBLIC_ENDPOINTS value: {}",
                        flag
                    )))
                }
            };
        }

        config.validate()?;
        Ok(config)
    }

    /// Returns the PEM text of the shared signing key, reading the key file if configured.
    pub fn signing_key_pem(&self) -> Result<String, ConfigError> {
        if let Some(path) = &self.signing_key_file {
            return fs::read_to_string(path).map_err(|e| {
                ConfigError::IOError(format!("Failed to read signing key file: {}", e))
            });
        }
        self.signing_key
            .clone()
            .ok_or(ConfigError::MissingSigningKey)
    }

    pub fn socket_addr(&self) -> Result<SocketAddr, ConfigError> {
        self.listen_addr
            .parse::<SocketAddr>()
            .map_err(|_| ConfigError::InvalidListenAddr(self.listen_addr.clone()))
    }

    /// Validate the configuration
    ///
    /// Checks that the listen address parses, a signing key is configured,
    /// lifetimes are positive with the handoff lifetime no longer than the
    /// credential lifetime, redirect settings are usable, and the branch and
    /// member tables are consistent.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.socket_addr()?;

        let has_inline_key = self
            .signing_key
            .as_deref()
            .is_some_and(|key| !key.trim().is_empty());
        if !has_inline_key && self.signing_key_file.is_none() {
            return Err(ConfigError::MissingSigningKey);
        }

        if self.credential_ttl <= 0 {
            return Err(ConfigError::InvalidTtl(
                "credential_ttl must be positive".to_string(),
            ));
        }
        if self.handoff_ttl <= 0 {
            return Err(ConfigError::InvalidTtl(
                "handoff_ttl must be positive".to_string(),
            ));
        }
        if self.credential_ttl > MAX_CREDENTIAL_TTL {
            return Err(ConfigError::InvalidTtl(format!(
                "credential_ttl ({}) must not exceed {} seconds",
                self.credential_ttl, MAX_CREDENTIAL_TTL
            )));
        }
        if self.handoff_ttl > MAX_HANDOFF_TTL {
            return Err(ConfigError::InvalidTtl(format!(
                "handoff_ttl ({}) must not exceed {} seconds",
                self.handoff_ttl, MAX_HANDOFF_TTL
            )));
        }
        if self.handoff_ttl > self.credential_ttl {
            return Err(ConfigError::InvalidTtl(format!(
                "handoff_ttl ({}) must not exceed credential_ttl ({})",
                self.handoff_ttl, self.credential_ttl
            )));
        }
        if self.nonce_capacity == 0 {
            return Err(ConfigError::ParseError(
                "nonce_capacity must be at least 1".to_string(),
            ));
        }

        if self.redirect_scheme != "http" && self.redirect_scheme != "https" {
            return Err(ConfigError::InvalidUrl(format!(
                "redirect_scheme must be http or https, got '{}'",
                self.redirect_scheme
            )));
        }
        url::Url::parse(&self.default_redirect_url).map_err(|e| {
            ConfigError::InvalidUrl(format!("{}: {}", self.default_redirect_url, e))
        })?;

        let mut branch_ids = HashSet::new();
        for branch in &self.branches {
            if !branch_ids.insert(branch.id) {
                return Err(ConfigError::InvalidBranch(format!(
                    "duplicate branch id {}",
                    branch.id
                )));
            }
            if branch.name.trim().is_empty() {
                return Err(ConfigError::InvalidBranch(format!(
                    "branch {} has an empty name",
                    branch.id
                )));
            }
        }

        let mut user_ids = HashSet::new();
        for member in &self.members {
            if !user_ids.insert(member.user_id.as_str()) {
                return Err(ConfigError::InvalidMember(format!(
                    "duplicate user id '{}'",
                    member.user_id
                )));
            }
            if !branch_ids.contains(&member.home_branch_id) {
                return Err(ConfigError::InvalidMember(format!(
                    "user '{}' has unknown home branch {}",
                    member.user_id, member.home_branch_id
                )));
            }
        }

        Ok(())
    }
}

fn optional_var(prefix: &str, name: &str) -> Result<Option<String>, ConfigError> {
    match env::var(format!("{}_{}", prefix, name)) {
        Ok(value) => Ok(Some(value)),
        Err(std::env::VarError::NotPresent) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// Try to load a configuration from standard locations
///
/// This function attempts to load a configuration from:
/// 1. Environment variables with the prefix "BRANCHPASS"
/// 2. ./branchpass.json or ./branchpass.toml
/// 3. ~/.branchpass/config.json or ~/.branchpass/config.toml
/// 4. /etc/branchpass/config.json or /etc/branchpass/config.toml
///
/// Returns None if no configuration could be found.
pub fn try_load_default_config() -> Option<GatewayConfig> {
    if let Ok(config) = GatewayConfig::from_env("BRANCHPASS") {
        return Some(config);
    }

    let paths = [
        "./branchpass.json",
        "./branchpass.toml",
        "~/.branchpass/config.json",
        "~/.branchpass/config.toml",
        "/etc/branchpass/config.json",
        "/etc/branchpass/config.toml",
    ];

    for path in paths.iter() {
        let expanded_path = if let Some(stripped) = path.strip_prefix("~/") {
            if let Some(home) = dirs::home_dir() {
                home.join(stripped)
            } else {
                continue;
            }
        } else {
            Path::new(path).to_path_buf()
        };

        if expanded_path.exists() {
            if let Ok(config) = GatewayConfig::from_path(&expanded_path) {
                return Some(config);
            }
        }
    }

    None
}
