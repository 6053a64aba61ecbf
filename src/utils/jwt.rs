use jsonwebtoken::{encode, decode, Header, Validation, EncodingKey, DecodingKey};
use serde::{Serialize, Deserialize};
use uuid::Uuid;
use chrono::{Utc, Duration};

use crate::error::StorageError;

pub const ADMIN_ROLE: &str = "admin";

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct Claims {
    pub sub: Uuid,
    pub exp: usize,
    pub role: String,
}

impl Claims {
    pub fn is_admin(&self) -> bool {
        self.role == ADMIN_ROLE
    }
}

pub fn generate_jwt(user_id: Uuid, role: &str, secret: &str, valid_for: Duration) -> Result<String, jsonwebtoken::errors::Error> {
    let exp = Utc::now() + valid_for;
    let claims = Claims {
        sub: user_id,
        exp: exp.timestamp() as usize,
        role: role.to_string(),
    };
    encode(&Header::default(), &claims, &EncodingKey::from_secret(secret.as_ref()))
}

pub fn decode_jwt(token: &str, secret: &str) -> Result<Claims, jsonwebtoken::errors::Error> {
    let data = decode::<Claims>(token, &DecodingKey::from_secret(secret.as_ref()), &Validation::default())?;
    Ok(data.claims)
}

/// Pulls the caller out of an `Authorization: Bearer <jwt>` header value.
pub fn claims_from_header(header: Option<&str>, secret: &str) -> Result<Claims, StorageError> {
    let header = header.ok_or_else(|| StorageError::Unauthenticated("missing authorization header".to_string()))?;
    let token = header
        .strip_prefix("Bearer ")
        .ok_or_else(|| StorageError::Unauthenticated("expected a bearer token".to_string()))?;
    decode_jwt(token.trim(), secret).map_err(|e| StorageError::Unauthenticated(format!("invalid token: {}", e)))
}
