//! JWT token validation
//!
//! Bursar does not authenticate users itself. The platform's identity
//! provider issues HS256 bearer tokens; this module verifies them and
//! extracts the stable account id. Token generation is exposed for dev
//! tooling and tests.

use chrono::Utc;
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};

use crate::types::BursarError;

/// Secret used when running with --dev-mode and no JWT_SECRET
const DEV_SECRET: &str = "dev-only-insecure-secret";

/// Claims carried by a verified bearer token
///
/// The account's role is deliberately NOT in the token. Roles live in the
/// ledger and are read fresh on every request; a token only identifies.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// Stable account id from the identity provider
    pub sub: String,
    /// User identifier (email or username), informational
    #[serde(default)]
    pub identifier: String,
    /// Display name hint used when an account is first created
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    /// Issued-at (unix seconds)
    pub iat: u64,
    /// Expiry (unix seconds)
    pub exp: u64,
}

/// Input for token generation
#[derive(Debug, Clone)]
pub struct TokenInput {
    pub user_id: String,
    pub identifier: String,
    pub display_name: Option<String>,
}

/// Result of token verification
#[derive(Debug)]
pub struct TokenValidationResult {
    pub valid: bool,
    pub claims: Option<Claims>,
    pub error: Option<String>,
}

/// HS256 token validator
#[derive(Clone)]
pub struct JwtValidator {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    expiry_seconds: u64,
}

impl JwtValidator {
    /// Create a validator with the given secret
    pub fn new(secret: String, expiry_seconds: u64) -> Result<Self, BursarError> {
        if secret.is_empty() {
            return Err(BursarError::Auth("JWT secret must not be empty".into()));
        }

        Ok(Self {
            encoding_key: EncodingKey::from_secret(secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(secret.as_bytes()),
            expiry_seconds,
        })
    }

    /// Create a validator with the fixed dev-mode secret
    pub fn new_dev() -> Self {
        Self {
            encoding_key: EncodingKey::from_secret(DEV_SECRET.as_bytes()),
            decoding_key: DecodingKey::from_secret(DEV_SECRET.as_bytes()),
            expiry_seconds: 3600,
        }
    }

    /// Generate a signed token for the given identity
    pub fn generate_token(&self, input: TokenInput) -> Result<String, BursarError> {
        let now = Utc::now().timestamp() as u64;
        let claims = Claims {
            sub: input.user_id,
            identifier: input.identifier,
            display_name: input.display_name,
            iat: now,
            exp: now + self.expiry_seconds,
        };

        encode(&Header::default(), &claims, &self.encoding_key)
            .map_err(|e| BursarError::Auth(format!("Failed to sign token: {}", e)))
    }

    /// Verify a token and extract its claims
    pub fn verify_token(&self, token: &str) -> TokenValidationResult {
        let validation = Validation::default();

        match decode::<Claims>(token, &self.decoding_key, &validation) {
            Ok(data) => TokenValidationResult {
                valid: true,
                claims: Some(data.claims),
                error: None,
            },
            Err(e) => TokenValidationResult {
                valid: false,
                claims: None,
                error: Some(e.to_string()),
            },
        }
    }
}

/// Extract a bearer token from an Authorization header value
pub fn extract_token_from_header(header: Option<&str>) -> Option<&str> {
    let header = header?;
    header
        .strip_prefix("Bearer ")
        .or_else(|| header.strip_prefix("bearer "))
        .map(str::trim)
        .filter(|t| !t.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dev_token(user_id: &str) -> String {
        JwtValidator::new_dev()
            .generate_token(TokenInput {
                user_id: user_id.to_string(),
                identifier: format!("{}@example.com", user_id),
                display_name: None,
            })
            .unwrap()
    }

    #[test]
    fn test_round_trip() {
        let jwt = JwtValidator::new_dev();
        let token = dev_token("user-1");

        let result = jwt.verify_token(&token);
        assert!(result.valid);
        let claims = result.claims.unwrap();
        assert_eq!(claims.sub, "user-1");
        assert_eq!(claims.identifier, "user-1@example.com");
        assert!(claims.exp > claims.iat);
    }

    #[test]
    fn test_wrong_secret_rejected() {
        let jwt = JwtValidator::new("some-other-secret".to_string(), 3600).unwrap();
        let token = dev_token("user-1");

        let result = jwt.verify_token(&token);
        assert!(!result.valid);
        assert!(result.claims.is_none());
        assert!(result.error.is_some());
    }

    #[test]
    fn test_garbage_token_rejected() {
        let jwt = JwtValidator::new_dev();
        let result = jwt.verify_token("not-a-token");
        assert!(!result.valid);
    }

    #[test]
    fn test_empty_secret_rejected() {
        assert!(JwtValidator::new(String::new(), 3600).is_err());
    }

    #[test]
    fn test_extract_token() {
        assert_eq!(
            extract_token_from_header(Some("Bearer abc.def.ghi")),
            Some("abc.def.ghi")
        );
        assert_eq!(extract_token_from_header(Some("Basic abc")), None);
        assert_eq!(extract_token_from_header(Some("Bearer ")), None);
        assert_eq!(extract_token_from_header(None), None);
    }
}
