//! Bearer tokens for endpoint-facing calls.
//!
//! Tokens are HS256 JWTs carrying the endpoint identity and an expiry.
//! Every mutating endpoint-facing call must present a token whose
//! subject matches the endpoint it claims to act on; cross-endpoint
//! token use is rejected.

use std::time::Duration;

use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::models::EndpointId;

/// Clock skew tolerated when validating expiry
const LEEWAY_SECONDS: u64 = 60;

#[derive(Debug, Serialize, Deserialize)]
struct Claims {
    /// Endpoint id the token was issued to
    sub: String,
    iat: i64,
    exp: i64,
}

/// Issues and verifies endpoint bearer tokens
#[derive(Clone)]
pub struct TokenIssuer {
    encoding: EncodingKey,
    decoding: DecodingKey,
    ttl: Duration,
}

impl std::fmt::Debug for TokenIssuer {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("TokenIssuer")
            .field("secret", &"[REDACTED]")
            .field("ttl", &self.ttl)
            .finish()
    }
}

impl TokenIssuer {
    /// Create an issuer from a shared secret and token lifetime
    #[must_use]
    pub fn new(secret: &str, ttl: Duration) -> Self {
        Self {
            encoding: EncodingKey::from_secret(secret.as_bytes()),
            decoding: DecodingKey::from_secret(secret.as_bytes()),
            ttl,
        }
    }

    /// Issue a token for an endpoint
    pub fn issue(&self, endpoint_id: &EndpointId) -> Result<String> {
        let now = chrono::Utc::now().timestamp();
        let exp = now.saturating_add(i64::try_from(self.ttl.as_secs()).unwrap_or(i64::MAX));
        let claims = Claims {
            sub: endpoint_id.as_str(),
            iat: now,
            exp,
        };
        encode(&Header::new(Algorithm::HS256), &claims, &self.encoding)
            .map_err(|error| Error::Auth(format!("token signing failed: {error}")))
    }

    /// Verify a token and check it was issued to `endpoint_id`
    pub fn verify(&self, token: &str, endpoint_id: &EndpointId) -> Result<()> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = LEEWAY_SECONDS;
        validation.validate_aud = false;

        let decoded = decode::<Claims>(token.trim(), &self.decoding, &validation)
            .map_err(|error| Error::Auth(format!("token validation failed: {error}")))?;

        if decoded.claims.sub != endpoint_id.as_str() {
            return Err(Error::Auth(
                "token was issued to a different endpoint".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn issuer(ttl: Duration) -> TokenIssuer {
        TokenIssuer::new("test-secret", ttl)
    }

    #[test]
    fn issued_token_verifies_for_its_endpoint() {
        let issuer = issuer(Duration::from_secs(3600));
        let endpoint_id = EndpointId::new();

        let token = issuer.issue(&endpoint_id).unwrap();
        issuer.verify(&token, &endpoint_id).unwrap();
    }

    #[test]
    fn cross_endpoint_use_is_rejected() {
        let issuer = issuer(Duration::from_secs(3600));
        let token = issuer.issue(&EndpointId::new()).unwrap();

        let err = issuer.verify(&token, &EndpointId::new()).unwrap_err();
        assert!(matches!(err, Error::Auth(_)));
    }

    #[test]
    fn expired_token_is_rejected() {
        // TTL shorter than the validation leeway, backdated past both
        let issuer = issuer(Duration::from_secs(0));
        let endpoint_id = EndpointId::new();

        let now = chrono::Utc::now().timestamp();
        let claims = Claims {
            sub: endpoint_id.as_str(),
            iat: now - 7200,
            exp: now - 3600,
        };
        let token = encode(
            &Header::new(Algorithm::HS256),
            &claims,
            &EncodingKey::from_secret(b"test-secret"),
        )
        .unwrap();

        let err = issuer.verify(&token, &endpoint_id).unwrap_err();
        assert!(matches!(err, Error::Auth(_)));
    }

    #[test]
    fn garbage_token_is_rejected() {
        let issuer = issuer(Duration::from_secs(3600));
        let err = issuer.verify("not.a.token", &EndpointId::new()).unwrap_err();
        assert!(matches!(err, Error::Auth(_)));
    }

    #[test]
    fn wrong_secret_is_rejected() {
        let endpoint_id = EndpointId::new();
        let token = TokenIssuer::new("other-secret", Duration::from_secs(3600))
            .issue(&endpoint_id)
            .unwrap();

        let err = issuer(Duration::from_secs(3600))
            .verify(&token, &endpoint_id)
            .unwrap_err();
        assert!(matches!(err, Error::Auth(_)));
    }

    #[test]
    fn debug_redacts_secret() {
        let debug = format!("{:?}", issuer(Duration::from_secs(60)));
        assert!(!debug.contains("test-secret"));
        assert!(debug.contains("[REDACTED]"));
    }
}
