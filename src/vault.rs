//! Read-once Vault lookup for startup configuration.
//!
//! The service resolves configuration through a secret store before falling
//! back to the environment. Only a single KV v2 read happens, at startup;
//! nothing here is refreshed at runtime.

use std::collections::HashMap;
use std::time::Duration;

use reqwest::Client;
use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, instrument, warn};

#[derive(Error, Debug)]
pub enum VaultError {
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
}

/// KV v2 read response: the secret map lives under `data.data`.
#[derive(Debug, Deserialize)]
struct SecretEnvelope {
    data: SecretData,
}

#[derive(Debug, Deserialize)]
struct SecretData {
    data: HashMap<String, serde_json::Value>,
}

pub struct VaultClient {
    http: Client,
    addr: String,
    token: String,
    secret_path: String,
}

impl VaultClient {
    /// Build a client from `VAULT_ADDR`, `VAULT_TOKEN` and
    /// `VAULT_SECRET_PATH` (a full KV v2 read path such as
    /// `secret/data/arb-engine`). Returns `None` when any of the three is
    /// unset, meaning the process runs on environment config alone.
    pub fn from_env() -> Option<Self> {
        let addr = env_nonempty("VAULT_ADDR")?;
        let token = env_nonempty("VAULT_TOKEN")?;
        let secret_path = env_nonempty("VAULT_SECRET_PATH")?;

        match Self::new(addr, token, secret_path) {
            Ok(client) => Some(client),
            Err(err) => {
                warn!(error = %err, "vault client construction failed; using environment configuration only");
                None
            }
        }
    }

    pub fn new(addr: String, token: String, secret_path: String) -> Result<Self, VaultError> {
        let http = Client::builder().timeout(Duration::from_secs(5)).build()?;

        Ok(Self {
            http,
            addr,
            token,
            secret_path,
        })
    }

    #[instrument(skip(self), fields(path = %self.secret_path))]
    pub async fn fetch_secrets(&self) -> Result<HashMap<String, String>, VaultError> {
        let url = format!("{}/v1/{}", self.addr.trim_end_matches('/'), self.secret_path);

        let resp = self
            .http
            .get(&url)
            .header("X-Vault-Token", &self.token)
            .send()
            .await?
            .error_for_status()?;

        let envelope: SecretEnvelope = resp.json().await?;
        let secrets = flatten(envelope);

        debug!(keys = secrets.len(), "vault secrets fetched");

        Ok(secrets)
    }
}

fn env_nonempty(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.is_empty())
}

/// Coerce the JSON secret values into plain strings: strings lose their
/// quotes, everything else keeps its JSON rendering so numeric values like
/// ports or thresholds round-trip through `parse`.
fn flatten(envelope: SecretEnvelope) -> HashMap<String, String> {
    envelope
        .data
        .data
        .into_iter()
        .map(|(key, value)| {
            let value = match value {
                serde_json::Value::String(s) => s,
                other => other.to_string(),
            };
            (key, value)
        })
        .collect()
}
