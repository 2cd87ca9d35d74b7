use std::fmt;
use std::fs::read_to_string;
use std::path::Path;
use std::sync::Arc;

use biscuit_auth::{KeyPair, PublicKey};

use crate::error::TokenError;

/// The signing material shared by every instance of the deployment.
///
/// Credentials minted on one branch server must open on every other, so each
/// instance is configured with the same private key. Cloning is cheap; the
/// keypair sits behind an `Arc`.
#[derive(Clone)]
pub struct SigningKeys {
    keypair: Arc<KeyPair>,
    public_key: PublicKey,
}

impl SigningKeys {
    pub fn new(keypair: KeyPair) -> Self {
        let public_key = keypair.public();
        Self {
            keypair: Arc::new(keypair),
            public_key,
        }
    }

    /// Generates a throwaway keypair. Only useful for tests and single-node setups.
    pub fn generate() -> Self {
        Self::new(KeyPair::new())
    }

    /// Loads the shared private key from PEM text.
    pub fn from_pem(pem: &str) -> Result<Self, TokenError> {
        let keypair = KeyPair::from_private_key_pem(pem)
            .map_err(|e| TokenError::invalid_key_format(format!("Failed to parse PEM: {e}")))?;
        Ok(Self::new(keypair))
    }

    /// Loads the shared private key from a PEM file.
    pub fn from_pem_file(path: impl AsRef<Path>) -> Result<Self, TokenError> {
        let pem = read_to_string(path.as_ref()).map_err(|e| {
            TokenError::invalid_key_format(format!(
                "Failed to read {}: {e}",
                path.as_ref().display()
            ))
        })?;
        Self::from_pem(&pem)
    }

    pub fn keypair(&self) -> &KeyPair {
        &self.keypair
    }

    pub fn public_key(&self) -> PublicKey {
        self.public_key
    }
}

impl fmt::Debug for SigningKeys {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SigningKeys")
            .field("public_key", &hex::encode(self.public_key.to_bytes()))
            .finish_non_exhaustive()
    }
}
