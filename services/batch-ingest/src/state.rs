use elxr_core::{
    AttestationStore, CoreConfig, LoggingIssuanceSink, ProcessingService,
};
use elxr_crypto::{Ed25519ProofVerifier, ProofVerifier, SourceKeyring};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::info;

use crate::config::Config;

pub struct AppState {
    pub config: Config,
    pub service: ProcessingService,
}

impl AppState {
    pub fn new(config: Config) -> Result<Self, Box<dyn std::error::Error>> {
        let core_config = match &config.core_config_path {
            Some(path) => CoreConfig::from_file(path)?,
            None => CoreConfig::default(),
        };

        let keyring = load_keyring(&config.source_keys_path)?;
        info!(sources = keyring.source_count(), "Source keyring loaded");
        let verifier: Arc<dyn ProofVerifier> = Arc::new(Ed25519ProofVerifier::new(keyring));

        let db_path = config
            .db_path
            .clone()
            .unwrap_or_else(|| core_config.storage.db_path.clone());
        let store = AttestationStore::open(&db_path)?;
        let service = ProcessingService::new(
            &core_config,
            verifier,
            store,
            Box::new(LoggingIssuanceSink),
        )?;

        Ok(AppState { config, service })
    }
}

/// Load `{"source-id": "<64 hex chars>"}` into a keyring
fn load_keyring(path: &str) -> Result<SourceKeyring, Box<dyn std::error::Error>> {
    let contents = std::fs::read_to_string(path)?;
    let entries: HashMap<String, String> = serde_json::from_str(&contents)?;

    let mut keyring = SourceKeyring::new();
    for (source_id, hex_key) in entries {
        let bytes = hex::decode(&hex_key)?;
        let key: [u8; 32] = bytes
            .as_slice()
            .try_into()
            .map_err(|_| format!("public key for '{}' is not 32 bytes", source_id))?;
        keyring.register_source(source_id, &key)?;
    }
    Ok(keyring)
}
