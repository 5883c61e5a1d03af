use super::types::{Jwk, Jwks};
use crate::errors::{AppError, AppResult};
use base64::Engine as _;
use reqwest::Client;
use rsa::pkcs1::DecodeRsaPublicKey;
use rsa::pkcs1v15::VerifyingKey;
use rsa::pkcs8::DecodePublicKey;
use rsa::{BigUint, RsaPublicKey};
use sha2::Sha256;
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, RwLock};

pub type RsVerifyingKey = VerifyingKey<Sha256>;

/// Token signing keys by `kid`, plus an optional pinned key that verifies
/// tokens regardless of `kid`. Swapped wholesale on refresh.
pub struct KeyStore {
    by_kid: RwLock<HashMap<String, RsVerifyingKey>>,
    pinned: Option<RsVerifyingKey>,
}

impl KeyStore {
    pub fn empty() -> Self {
        Self {
            by_kid: RwLock::new(HashMap::new()),
            pinned: None,
        }
    }

    pub fn pinned(key: RsaPublicKey) -> Self {
        Self {
            by_kid: RwLock::new(HashMap::new()),
            pinned: Some(VerifyingKey::<Sha256>::new(key)),
        }
    }

    /// Load a single PEM public key (SPKI or PKCS#1) from disk.
    pub fn from_pem_file(path: &Path) -> AppResult<Self> {
        tracing::info!(path = %path.display(), "loading identity public key from file");
        let pem = std::fs::read_to_string(path)
            .map_err(|e| AppError::Config(format!("read key {}: {e}", path.display())))?;
        Ok(Self::pinned(parse_public_pem(&pem)?))
    }

    pub fn get(&self, kid: Option<&str>) -> AppResult<Option<RsVerifyingKey>> {
        if let Some(key) = &self.pinned {
            return Ok(Some(key.clone()));
        }
        let Some(kid) = kid else {
            return Ok(None);
        };
        let keys = self
            .by_kid
            .read()
            .map_err(|e| AppError::Unknown(format!("key store lock poisoned: {e}")))?;
        Ok(keys.get(kid).cloned())
    }

    pub fn replace(&self, keys: HashMap<String, RsVerifyingKey>) -> AppResult<()> {
        let mut slot = self
            .by_kid
            .write()
            .map_err(|e| AppError::Unknown(format!("key store lock poisoned: {e}")))?;
        *slot = keys;
        Ok(())
    }

    pub fn key_count(&self) -> usize {
        let kid_count = self.by_kid.read().map(|k| k.len()).unwrap_or(0);
        kid_count + usize::from(self.pinned.is_some())
    }
}

pub fn parse_public_pem(pem: &str) -> AppResult<RsaPublicKey> {
    RsaPublicKey::from_public_key_pem(pem)
        .or_else(|_| RsaPublicKey::from_pkcs1_pem(pem))
        .map_err(|e| AppError::Config(format!("parse RSA public key PEM: {e}")))
}

fn decode_b64url(field: &str, value: &str) -> AppResult<Vec<u8>> {
    base64::engine::general_purpose::URL_SAFE_NO_PAD
        .decode(value.trim_end_matches('='))
        .map_err(|e| AppError::Parse(format!("jwk {field}: {e}")))
}

pub fn key_from_jwk(jwk: &Jwk) -> AppResult<RsVerifyingKey> {
    if jwk.kty != "RSA" {
        return Err(AppError::Parse(format!("jwk {}: unsupported kty {}", jwk.kid, jwk.kty)));
    }
    if let Some(alg) = jwk.alg.as_deref() {
        if alg != "RS256" {
            return Err(AppError::Parse(format!("jwk {}: unsupported alg {alg}", jwk.kid)));
        }
    }
    let n = BigUint::from_bytes_be(&decode_b64url("n", &jwk.n)?);
    let e = BigUint::from_bytes_be(&decode_b64url("e", &jwk.e)?);
    let key = RsaPublicKey::new(n, e).map_err(|e| AppError::Parse(format!("jwk {}: {e}", jwk.kid)))?;
    Ok(VerifyingKey::<Sha256>::new(key))
}

/// Build the kid map, skipping keys we cannot use.
pub fn keys_from_jwks(jwks: &Jwks) -> HashMap<String, RsVerifyingKey> {
    jwks.keys
        .iter()
        .filter_map(|jwk| match key_from_jwk(jwk) {
            Ok(key) => Some((jwk.kid.clone(), key)),
            Err(e) => {
                tracing::warn!(error = %e, "skipping provider key");
                None
            }
        })
        .collect()
}

pub async fn fetch_jwks(client: &Client, url: &str) -> AppResult<HashMap<String, RsVerifyingKey>> {
    let resp = client.get(url).send().await?;

    let status = resp.status();
    if !status.is_success() {
        let body = resp.text().await.unwrap_or_default();
        return Err(AppError::Network(format!("key set HTTP {status}: {body}")));
    }

    let jwks: Jwks = resp
        .json()
        .await
        .map_err(|e| AppError::Parse(format!("key set: {e}")))?;

    let keys = keys_from_jwks(&jwks);
    if keys.is_empty() {
        return Err(AppError::Parse("key set contains no usable RSA keys".into()));
    }
    Ok(keys)
}

/// One refresh attempt. The store is only touched when the fetch yields
/// usable keys.
pub async fn refresh_keys(client: &Client, keys: &KeyStore, url: &str) -> AppResult<usize> {
    let fresh = fetch_jwks(client, url).await?;
    let count = fresh.len();
    keys.replace(fresh)?;
    Ok(count)
}

/// Keeps the provider key set fresh. On failure the previous keys stay in
/// place and the next attempt backs off.
pub async fn run_key_refresh(keys: Arc<KeyStore>, url: String, refresh_secs: u64) {
    tracing::info!(url = %url, "identity key refresh started");

    let client = Client::builder()
        .timeout(std::time::Duration::from_secs(10))
        .build()
        .unwrap_or_default();

    let mut consecutive_errors: u32 = 0;

    loop {
        match refresh_keys(&client, &keys, &url).await {
            Ok(count) => {
                consecutive_errors = 0;
                tracing::info!(keys = count, "identity keys refreshed");
                tokio::time::sleep(tokio::time::Duration::from_secs(refresh_secs)).await;
            }
            Err(e) => {
                consecutive_errors += 1;
                tracing::warn!(
                    error = %e,
                    consecutive = consecutive_errors,
                    "identity key refresh failed"
                );
                let backoff = std::cmp::min(consecutive_errors * 2, 60);
                tokio::time::sleep(tokio::time::Duration::from_secs(backoff as u64)).await;
            }
        }
    }
}
