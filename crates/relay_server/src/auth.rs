//! Bearer token verification.
//!
//! Tokens are minted by the CRUD backend with a shared HS256 secret. The relay never
//! looks users up: the `userId` and `username` claims are taken as-is for the whole
//! lifetime of the connection.

use crate::error::AuthError;
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde::{Deserialize, Serialize};
use std::fmt;

/// The authenticated identity attached to a connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    #[serde(rename = "userId")]
    pub user_id: String,
    #[serde(rename = "username")]
    pub display_name: String,
}

/// Backends have shipped both numeric and string user ids.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum UserIdClaim {
    Text(String),
    Number(i64),
}

#[derive(Debug, Deserialize)]
struct Claims {
    #[serde(rename = "userId")]
    user_id: Option<UserIdClaim>,
    username: Option<String>,
}

/// Validates bearer tokens against the process-wide shared secret.
#[derive(Clone)]
pub struct TokenVerifier {
    key: DecodingKey,
    validation: Validation,
}

impl fmt::Debug for TokenVerifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenVerifier")
            .field("algorithms", &self.validation.algorithms)
            .finish_non_exhaustive()
    }
}

impl TokenVerifier {
    /// Creates a verifier for HS256 tokens signed with `secret`.
    ///
    /// Signature and `exp` are always checked, with no clock leeway.
    pub fn new(secret: &[u8]) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_exp = true;
        validation.leeway = 0;
        Self {
            key: DecodingKey::from_secret(secret),
            validation,
        }
    }

    /// Verifies `token` and extracts the identity claims.
    pub fn verify(&self, token: &str) -> Result<Identity, AuthError> {
        let token = token.trim();
        if token.is_empty() {
            return Err(AuthError::MissingToken);
        }

        let data = decode::<Claims>(token, &self.key, &self.validation)
            .map_err(|e| AuthError::InvalidToken(e.to_string()))?;

        let user_id = match data.claims.user_id {
            Some(UserIdClaim::Text(id)) if !id.is_empty() => id,
            Some(UserIdClaim::Number(id)) => id.to_string(),
            _ => return Err(AuthError::MissingClaim("userId")),
        };
        let display_name = match data.claims.username {
            Some(name) if !name.is_empty() => name,
            _ => return Err(AuthError::MissingClaim("username")),
        };

        Ok(Identity {
            user_id,
            display_name,
        })
    }
}

/// Pulls the bearer token out of a handshake.
///
/// The `token` query parameter wins over the `Authorization` header; a `Bearer `
/// scheme on the header is optional and matched case-insensitively.
pub fn extract_token(query: Option<&str>, authorization: Option<&str>) -> Option<String> {
    let from_query = query.and_then(|q| {
        q.split('&')
            .filter_map(|pair| pair.split_once('='))
            .find(|(name, _)| *name == "token")
            .map(|(_, value)| value.to_string())
    });

    from_query
        .filter(|t| !t.is_empty())
        .or_else(|| {
            authorization.map(|header| {
                let header = header.trim();
                let token = match header.split_once(char::is_whitespace) {
                    Some((scheme, rest)) if scheme.eq_ignore_ascii_case("bearer") => rest,
                    None if header.eq_ignore_ascii_case("bearer") => "",
                    _ => header,
                };
                token.trim().to_string()
            })
        })
        .filter(|t| !t.is_empty())
}

#[cfg(test)]
pub(crate) mod test_tokens {
    use jsonwebtoken::{encode, EncodingKey, Header};
    use serde_json::json;

    pub const SECRET: &[u8] = b"test-secret";

    pub fn now() -> i64 {
        chrono::Utc::now().timestamp()
    }

    pub fn token_for(user_id: &str, username: &str) -> String {
        sign(json!({ "userId": user_id, "username": username, "exp": now() + 3600 }))
    }

    pub fn sign(claims: serde_json::Value) -> String {
        encode(&Header::default(), &claims, &EncodingKey::from_secret(SECRET)).unwrap()
    }
}
