//! Bearer-token verification for the API routes (HS256 with the shared secret).

use std::fmt;

use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde::{Deserialize, Serialize};
use storefront_core::Principal;

/// Token claims accepted by the server.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    #[serde(default)]
    pub roles: Vec<String>,
    pub exp: u64,
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum AuthError {
    #[error("missing bearer token")]
    MissingToken,
    #[error("invalid bearer token: {0}")]
    InvalidToken(String),
}

/// Verifies bearer tokens signed with the shared secret.
pub struct JwtVerifier {
    key: DecodingKey,
    validation: Validation,
}

impl fmt::Debug for JwtVerifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JwtVerifier").finish_non_exhaustive()
    }
}

impl JwtVerifier {
    #[must_use]
    pub fn from_secret(secret: &[u8]) -> Self {
        Self {
            key: DecodingKey::from_secret(secret),
            validation: Validation::new(Algorithm::HS256),
        }
    }

    /// Verifies an `Authorization` header value (`Bearer <token>`).
    ///
    /// # Errors
    ///
    /// [`AuthError::MissingToken`] if the header is absent or not a bearer
    /// credential; [`AuthError::InvalidToken`] if verification fails.
    pub fn verify_header(&self, header: Option<&str>) -> Result<Principal, AuthError> {
        let token = header
            .and_then(|value| value.strip_prefix("Bearer "))
            .map(str::trim)
            .filter(|token| !token.is_empty())
            .ok_or(AuthError::MissingToken)?;
        self.verify(token)
    }

    /// # Errors
    ///
    /// Returns [`AuthError::InvalidToken`] for a bad signature, an expired
    /// token, or malformed claims.
    pub fn verify(&self, token: &str) -> Result<Principal, AuthError> {
        let data = decode::<Claims>(token, &self.key, &self.validation)
            .map_err(|err| AuthError::InvalidToken(err.to_string()))?;
        Ok(Principal {
            id: data.claims.sub,
            roles: data.claims.roles,
        })
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use jsonwebtoken::{encode, EncodingKey, Header};

    use super::*;

    /// Signs a token for `sub` valid for one hour.
    pub(crate) fn token(secret: &str, sub: &str) -> String {
        let exp = jsonwebtoken::get_current_timestamp() + 3_600;
        sign(secret, sub, exp)
    }

    fn sign(secret: &str, sub: &str, exp: u64) -> String {
        let claims = Claims {
            sub: sub.to_string(),
            roles: vec!["admin".to_string()],
            exp,
        };
        encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(secret.as_bytes()),
        )
        .unwrap()
    }

    #[test]
    fn accepts_valid_token() {
        let verifier = JwtVerifier::from_secret(b"secret");
        let header = format!("Bearer {}", token("secret", "user-1"));

        let principal = verifier.verify_header(Some(&header)).unwrap();
        assert_eq!(principal.id, "user-1");
        assert_eq!(principal.roles, vec!["admin"]);
    }

    #[test]
    fn rejects_missing_and_malformed_headers() {
        let verifier = JwtVerifier::from_secret(b"secret");
        assert_eq!(verifier.verify_header(None), Err(AuthError::MissingToken));
        assert_eq!(
            verifier.verify_header(Some("Basic dXNlcjpwYXNz")),
            Err(AuthError::MissingToken)
        );
        assert!(matches!(
            verifier.verify_header(Some("Bearer not-a-jwt")),
            Err(AuthError::InvalidToken(_))
        ));
    }

    #[test]
    fn rejects_wrong_secret_and_expired_tokens() {
        let verifier = JwtVerifier::from_secret(b"secret");
        assert!(verifier.verify(&token("other", "user-1")).is_err());

        let expired = sign("secret", "user-1", jsonwebtoken::get_current_timestamp() - 3_600);
        assert!(verifier.verify(&expired).is_err());
    }
}
