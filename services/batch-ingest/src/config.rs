use std::env;

#[derive(Clone)]
pub struct Config {
    pub port: u16,
    /// TOML file with the core configuration; optional, defaults apply
    pub core_config_path: Option<String>,
    /// JSON file mapping source ids to hex-encoded Ed25519 public keys
    pub source_keys_path: String,
    /// Database path override; the core configuration's storage path is
    /// used when unset
    pub db_path: Option<String>,
}

impl Config {
    pub fn from_env() -> Result<Self, Box<dyn std::error::Error>> {
        Ok(Config {
            port: env::var("PORT")
                .ok()
                .and_then(|p| p.parse().ok())
                .unwrap_or(8080),
            core_config_path: env::var("CORE_CONFIG_PATH").ok(),
            source_keys_path: env::var("SOURCE_KEYS_PATH")?,
            db_path: env::var("DB_PATH").ok(),
        })
    }
}
