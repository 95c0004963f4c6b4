use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use serde::{Deserialize, Serialize};

pub const TOKEN_LIFETIME_MINUTES: i64 = 30;
pub const NOT_BEFORE_SKEW_SECONDS: i64 = 5;

/// Claims of the bearer token the video provider expects on every request
#[derive(Debug, Serialize, Deserialize)]
pub struct ProviderClaims {
    pub iss: String, // access key
    pub exp: i64,    // expiration timestamp
    pub nbf: i64,    // not valid before, backdated for clock skew
}

impl ProviderClaims {
    pub fn new(access_key: &str, now: DateTime<Utc>) -> Self {
        Self {
            iss: access_key.to_string(),
            exp: (now + Duration::minutes(TOKEN_LIFETIME_MINUTES)).timestamp(),
            nbf: (now - Duration::seconds(NOT_BEFORE_SKEW_SECONDS)).timestamp(),
        }
    }
}

/// Sign a fresh HS256 token for the video provider
pub fn create_provider_token(
    access_key: &str,
    secret_key: &str,
    now: DateTime<Utc>,
) -> Result<String, jsonwebtoken::errors::Error> {
    let claims = ProviderClaims::new(access_key, now);
    encode(
        &Header::new(Algorithm::HS256),
        &claims,
        &EncodingKey::from_secret(secret_key.as_bytes()),
    )
}
