pub mod keys;
pub mod token;
pub mod types;

use crate::errors::{AppError, AppResult};

/// A caller whose ID token checked out.
#[derive(Debug, Clone, PartialEq)]
pub struct VerifiedIdentity {
    pub uid: String,
    pub email: Option<String>,
}

/// Seam between the HTTP handlers and the identity provider.
/// Any failure must be `AppError::Unauthorized`.
pub trait IdentityVerifier: Send + Sync {
    fn verify(&self, token: &str) -> AppResult<VerifiedIdentity>;
}

/// Extract the credential from an `Authorization: Bearer <token>` value.
pub fn bearer_token(header: Option<&str>) -> AppResult<&str> {
    header
        .and_then(|h| h.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .ok_or_else(|| AppError::Unauthorized("Unauthorized".into()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bearer_token_extraction() {
        assert_eq!(bearer_token(Some("Bearer abc.def.ghi")).unwrap(), "abc.def.ghi");
        for bad in [None, Some(""), Some("Bearer "), Some("Basic abc"), Some("bearer abc"), Some("abc")] {
            assert!(matches!(bearer_token(bad), Err(AppError::Unauthorized(_))), "{bad:?}");
        }
    }
}
