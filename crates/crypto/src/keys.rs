//! Source key management
//!
//! Tracks the Ed25519 verifying keys of registered reading sources (sensor
//! gateways and oracle operators). A source must be registered here before any
//! of its readings can pass proof verification.

use ed25519_dalek::VerifyingKey;
use std::collections::HashMap;
use thiserror::Error;

/// Errors that can occur during key management operations
#[derive(Debug, Error)]
pub enum KeyError {
    #[error("Invalid public key for source '{source_id}': {reason}")]
    InvalidKey { source_id: String, reason: String },

    #[error("Source already registered: {source_id}")]
    SourceAlreadyRegistered { source_id: String },

    #[error("Unknown source: {source_id}")]
    UnknownSource { source_id: String },
}

pub type Result<T> = std::result::Result<T, KeyError>;

/// Registry of verifying keys keyed by source identifier
#[derive(Debug, Clone, Default)]
pub struct SourceKeyring {
    keys: HashMap<String, VerifyingKey>,
}

impl SourceKeyring {
    /// Create an empty keyring
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a source's Ed25519 public key
    ///
    /// # Arguments
    /// * `source_id` - Unique identifier of the reading source
    /// * `public_key` - 32-byte Ed25519 public key
    ///
    /// # Returns
    /// * `Err(KeyError::SourceAlreadyRegistered)` - Source id is taken
    /// * `Err(KeyError::InvalidKey)` - Bytes are not a valid curve point
    pub fn register_source(&mut self, source_id: impl Into<String>, public_key: &[u8; 32]) -> Result<()> {
        let source_id = source_id.into();

        if self.keys.contains_key(&source_id) {
            return Err(KeyError::SourceAlreadyRegistered { source_id });
        }

        let key = VerifyingKey::from_bytes(public_key).map_err(|e| KeyError::InvalidKey {
            source_id: source_id.clone(),
            reason: e.to_string(),
        })?;

        tracing::info!(source_id = %source_id, "Reading source registered");
        self.keys.insert(source_id, key);
        Ok(())
    }

    /// Look up the verifying key for a source
    pub fn verifying_key(&self, source_id: &str) -> Result<&VerifyingKey> {
        self.keys.get(source_id).ok_or_else(|| KeyError::UnknownSource {
            source_id: source_id.to_string(),
        })
    }

    /// Check whether a source is registered
    pub fn is_registered(&self, source_id: &str) -> bool {
        self.keys.contains_key(source_id)
    }

    /// Revoke a source's key, e.g. after misbehavior
    pub fn revoke_source(&mut self, source_id: &str) -> Result<()> {
        self.keys
            .remove(source_id)
            .map(|_| tracing::warn!(source_id = %source_id, "Reading source revoked"))
            .ok_or_else(|| KeyError::UnknownSource {
                source_id: source_id.to_string(),
            })
    }

    /// Number of registered sources
    pub fn source_count(&self) -> usize {
        self.keys.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ed25519_dalek::SigningKey;
    use rand::Rng;

    fn test_key() -> [u8; 32] {
        let secret: [u8; 32] = rand::thread_rng().gen();
        SigningKey::from_bytes(&secret).verifying_key().to_bytes()
    }

    #[test]
    fn test_register_and_lookup() {
        let mut keyring = SourceKeyring::new();
        let key = test_key();

        keyring.register_source("oracle-1", &key).unwrap();

        assert!(keyring.is_registered("oracle-1"));
        assert_eq!(keyring.source_count(), 1);
        assert!(keyring.verifying_key("oracle-1").is_ok());
    }

    #[test]
    fn test_duplicate_registration_rejected() {
        let mut keyring = SourceKeyring::new();
        let key = test_key();

        keyring.register_source("oracle-1", &key).unwrap();
        let result = keyring.register_source("oracle-1", &key);

        assert!(matches!(
            result,
            Err(KeyError::SourceAlreadyRegistered { .. })
        ));
    }

    #[test]
    fn test_unknown_source() {
        let keyring = SourceKeyring::new();
        assert!(matches!(
            keyring.verifying_key("nobody"),
            Err(KeyError::UnknownSource { .. })
        ));
    }

    #[test]
    fn test_revoke_source() {
        let mut keyring = SourceKeyring::new();
        keyring.register_source("oracle-1", &test_key()).unwrap();

        keyring.revoke_source("oracle-1").unwrap();
        assert!(!keyring.is_registered("oracle-1"));

        assert!(matches!(
            keyring.revoke_source("oracle-1"),
            Err(KeyError::UnknownSource { .. })
        ));
    }
}
