//! Environment-driven configuration.

use anyhow::{bail, Context, Result};
use fleetflow_storage::KEY_SIZE;

pub const ENV_DB_PATH: &str = "FLEETFLOW_DB_PATH";
pub const ENV_TOKEN_SECRET: &str = "FLEETFLOW_TOKEN_SECRET";
pub const ENV_VAULT_KEYS: &str = "FLEETFLOW_VAULT_KEYS";
pub const ENV_ACCOUNT_KEY: &str = "FLEETFLOW_ACCOUNT_KEY";

const DEFAULT_DB_PATH: &str = "fleetflow.db";

#[derive(Debug, Clone)]
pub struct CoreConfig {
    pub db_path: String,
    pub token_secret: String,
    /// Decryption candidates in order; the first key seals new values.
    pub vault_keys: Vec<[u8; KEY_SIZE]>,
    /// Shared key authenticating owner/dashboard requests. When unset,
    /// owner endpoints are open (single-user deployments).
    pub account_key: Option<String>,
}

impl CoreConfig {
    pub fn from_env() -> Result<Self> {
        let db_path = std::env::var(ENV_DB_PATH).unwrap_or_else(|_| DEFAULT_DB_PATH.to_string());
        let token_secret =
            std::env::var(ENV_TOKEN_SECRET).with_context(|| format!("{ENV_TOKEN_SECRET} is required"))?;
        let raw_keys =
            std::env::var(ENV_VAULT_KEYS).with_context(|| format!("{ENV_VAULT_KEYS} is required"))?;
        let vault_keys = parse_vault_keys(&raw_keys)?;
        let account_key = std::env::var(ENV_ACCOUNT_KEY).ok();

        Ok(Self {
            db_path,
            token_secret,
            vault_keys,
            account_key,
        })
    }
}

/// Parse a comma-separated list of hex-encoded 32-byte keys.
fn parse_vault_keys(raw: &str) -> Result<Vec<[u8; KEY_SIZE]>> {
    let mut keys = Vec::new();
    for (i, part) in raw.split(',').map(str::trim).enumerate() {
        if part.is_empty() {
            continue;
        }
        let bytes = hex::decode(part).with_context(|| format!("vault key {i} is not valid hex"))?;
        let key: [u8; KEY_SIZE] = bytes
            .try_into()
            .map_err(|b: Vec<u8>| anyhow::anyhow!("vault key {i} is {} bytes, expected {KEY_SIZE}", b.len()))?;
        keys.push(key);
    }
    if keys.is_empty() {
        bail!("at least one vault key is required");
    }
    Ok(keys)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_single_key() {
        let raw = "11".repeat(KEY_SIZE);
        let keys = parse_vault_keys(&raw).unwrap();
        assert_eq!(keys.len(), 1);
        assert_eq!(keys[0], [0x11; KEY_SIZE]);
    }

    #[test]
    fn test_parse_rotation_set_preserves_order() {
        let raw = format!("{},{}", "22".repeat(KEY_SIZE), "11".repeat(KEY_SIZE));
        let keys = parse_vault_keys(&raw).unwrap();
        assert_eq!(keys.len(), 2);
        assert_eq!(keys[0], [0x22; KEY_SIZE]);
        assert_eq!(keys[1], [0x11; KEY_SIZE]);
    }

    #[test]
    fn test_rejects_wrong_length() {
        assert!(parse_vault_keys("deadbeef").is_err());
    }

    #[test]
    fn test_rejects_empty() {
        assert!(parse_vault_keys("").is_err());
        assert!(parse_vault_keys(" , ").is_err());
    }
}
