use super::keys::KeyStore;
use super::types::{IdTokenClaims, JwtHeader};
use super::{IdentityVerifier, VerifiedIdentity};
use crate::errors::{AppError, AppResult};
use base64::Engine as _;
use rsa::pkcs1v15::Signature;
use rsa::signature::Verifier;
use std::sync::Arc;

/// Clock skew tolerated on `exp` and `iat`.
const LEEWAY_SECS: i64 = 60;
const MAX_SUBJECT_LEN: usize = 128;

/// Verifies RS256 ID tokens issued for one project.
pub struct TokenVerifier {
    keys: Arc<KeyStore>,
    audience: String,
    issuer: String,
}

impl TokenVerifier {
    pub fn new(keys: Arc<KeyStore>, audience: &str, issuer: &str) -> Self {
        Self {
            keys,
            audience: audience.to_string(),
            issuer: issuer.to_string(),
        }
    }

    pub fn verify_at(&self, token: &str, now: i64) -> AppResult<VerifiedIdentity> {
        let mut parts = token.split('.');
        let (Some(header_b64), Some(claims_b64), Some(sig_b64), None) =
            (parts.next(), parts.next(), parts.next(), parts.next())
        else {
            return Err(rejected("malformed token"));
        };

        let header: JwtHeader = serde_json::from_slice(&decode_segment(header_b64)?)
            .map_err(|e| rejected(&format!("header: {e}")))?;
        if header.alg != "RS256" {
            return Err(rejected(&format!("unsupported alg {}", header.alg)));
        }

        let key = self
            .keys
            .get(header.kid.as_deref())?
            .ok_or_else(|| rejected("unknown signing key"))?;

        let sig_bytes = decode_segment(sig_b64)?;
        let signature = Signature::try_from(sig_bytes.as_slice()).map_err(|_| rejected("bad signature"))?;
        let signed = &token[..header_b64.len() + 1 + claims_b64.len()];
        key.verify(signed.as_bytes(), &signature)
            .map_err(|_| rejected("bad signature"))?;

        let claims: IdTokenClaims = serde_json::from_slice(&decode_segment(claims_b64)?)
            .map_err(|e| rejected(&format!("claims: {e}")))?;
        self.check_claims(&claims, now)?;

        Ok(VerifiedIdentity {
            uid: claims.sub,
            email: claims.email,
        })
    }

    fn check_claims(&self, claims: &IdTokenClaims, now: i64) -> AppResult<()> {
        if claims.aud != self.audience {
            return Err(rejected("audience mismatch"));
        }
        if claims.iss != self.issuer {
            return Err(rejected("issuer mismatch"));
        }
        if claims.exp + LEEWAY_SECS <= now {
            return Err(rejected("token expired"));
        }
        if claims.iat - LEEWAY_SECS > now {
            return Err(rejected("token issued in the future"));
        }
        if claims.sub.is_empty() || claims.sub.len() > MAX_SUBJECT_LEN {
            return Err(rejected("invalid subject"));
        }
        Ok(())
    }
}

impl IdentityVerifier for TokenVerifier {
    fn verify(&self, token: &str) -> AppResult<VerifiedIdentity> {
        self.verify_at(token, chrono::Utc::now().timestamp())
    }
}

fn decode_segment(segment: &str) -> AppResult<Vec<u8>> {
    base64::engine::general_purpose::URL_SAFE_NO_PAD
        .decode(segment)
        .map_err(|_| rejected("bad base64 segment"))
}

fn rejected(reason: &str) -> AppError {
    AppError::Unauthorized(format!("invalid ID token: {reason}"))
}
