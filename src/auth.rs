// src/auth.rs
// Authentication (§6): JWT issuance/validation plus AccessToken (infra_-
// prefixed) lookup. The full hardened identity system is out of scope
// (spec.md Non-goals); this is the minimal surface §6's endpoints need.

use crate::db::Db;
use crate::error::AppError;
use crate::models::{Id, OrgRole, User};
use argon2::password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use argon2::Argon2;
use axum::http::request::Parts;
use chrono::{Duration as ChronoDuration, Utc};
use rand::distributions::Alphanumeric;
use rand::Rng;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

pub const ACCESS_TOKEN_PREFIX: &str = "infra_";
const ACCESS_TOKEN_RANDOM_LEN: usize = 43;

#[derive(Clone)]
pub struct AuthConfig {
    pub jwt_secret: String,
    pub issuer: String,
    pub audience: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    pub sub: Id,
    pub email: String,
    pub org_id: Id,
    pub iss: String,
    pub aud: String,
    pub exp: i64,
    /// Present only on tokens minted for an access-token-authenticated
    /// request's derived session JWT; absent for password-login JWTs.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub auth_method: Option<String>,
}

pub fn hash_password(password: &str) -> Result<String, AppError> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| AppError::Internal(anyhow::anyhow!("password hashing failed: {e}")))
}

pub fn verify_password(password: &str, hash: &str) -> bool {
    let Ok(parsed) = PasswordHash::new(hash) else { return false };
    Argon2::default().verify_password(password.as_bytes(), &parsed).is_ok()
}

pub fn issue_jwt(config: &AuthConfig, user: &User) -> Result<String, AppError> {
    let claims = Claims {
        sub: user.id,
        email: user.email.clone(),
        org_id: user.organization_id,
        iss: config.issuer.clone(),
        aud: config.audience.clone(),
        exp: (Utc::now() + ChronoDuration::hours(24)).timestamp(),
        auth_method: None,
    };
    jsonwebtoken::encode(
        &jsonwebtoken::Header::default(),
        &claims,
        &jsonwebtoken::EncodingKey::from_secret(config.jwt_secret.as_bytes()),
    )
    .map_err(|e| AppError::Internal(anyhow::anyhow!("jwt encoding failed: {e}")))
}

pub fn validate_jwt(config: &AuthConfig, token: &str) -> Result<Claims, AppError> {
    let mut validation = jsonwebtoken::Validation::new(jsonwebtoken::Algorithm::HS256);
    validation.set_issuer(&[&config.issuer]);
    validation.set_audience(&[&config.audience]);
    jsonwebtoken::decode::<Claims>(token, &jsonwebtoken::DecodingKey::from_secret(config.jwt_secret.as_bytes()), &validation)
        .map(|data| data.claims)
        .map_err(|_| AppError::Unauthenticated)
}

/// Generates a new `infra_`-prefixed access token and its SHA-256 hash for
/// storage. Only the hash is persisted; the plaintext is returned once.
pub fn generate_access_token() -> (String, String) {
    let random: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(ACCESS_TOKEN_RANDOM_LEN)
        .map(char::from)
        .collect();
    let token = format!("{ACCESS_TOKEN_PREFIX}{random}");
    (token.clone(), hash_access_token(&token))
}

pub fn hash_access_token(token: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    hex::encode(hasher.finalize())
}

/// The authenticated identity attached to a request, regardless of whether
/// it arrived via JWT or AccessToken (§6).
#[derive(Debug, Clone)]
pub struct AuthenticatedUser {
    pub user_id: Id,
    pub organization_id: Id,
    pub email: String,
    pub role: OrgRole,
    pub auth_method: &'static str,
}

/// Resolves the request's identity from whichever credential is present:
/// AccessToken headers/query take priority (§6 lists them first), then a
/// bearer or `?access_token=` JWT. The `http` module wires this into a
/// `FromRequestParts` impl against its concrete `AppState`.
pub fn authenticate_request(db: &Db, auth_config: &AuthConfig, parts: &Parts) -> Result<AuthenticatedUser, AppError> {
    if let Some(token) = extract_access_token(parts) {
        return authenticate_access_token(db, &token);
    }

    let bearer = extract_bearer(parts).or_else(|| extract_query_param(parts, "access_token"));
    let Some(jwt) = bearer else { return Err(AppError::Unauthenticated) };

    let claims = validate_jwt(auth_config, &jwt)?;
    let user = db.get_user(claims.org_id, claims.sub).map_err(AppError::Internal)?.ok_or(AppError::Unauthenticated)?;

    Ok(AuthenticatedUser {
        user_id: user.id,
        organization_id: user.organization_id,
        email: user.email,
        role: user.role,
        auth_method: "jwt",
    })
}

fn authenticate_access_token(db: &Db, token: &str) -> Result<AuthenticatedUser, AppError> {
    let hash = hash_access_token(token);
    let access_token = db.get_access_token_by_hash(&hash).map_err(AppError::Internal)?.ok_or(AppError::Unauthenticated)?;

    if let Some(expires_at) = access_token.expires_at {
        if expires_at < Utc::now() {
            return Err(AppError::Unauthenticated);
        }
    }

    let user = db
        .get_user(access_token.organization_id, access_token.user_id)
        .map_err(AppError::Internal)?
        .ok_or(AppError::Unauthenticated)?;

    // lastUsedAt is updated asynchronously (§6): the request isn't held up
    // waiting on this write.
    let db = db.clone();
    let token_id = access_token.id;
    tokio::spawn(async move {
        let _ = db.touch_access_token_last_used(token_id);
    });

    Ok(AuthenticatedUser {
        user_id: user.id,
        organization_id: user.organization_id,
        email: user.email,
        role: user.role,
        auth_method: "access_token",
    })
}

fn extract_access_token(parts: &Parts) -> Option<String> {
    if let Some(value) = parts.headers.get("X-API-Key") {
        if let Ok(s) = value.to_str() {
            return Some(s.to_string());
        }
    }
    if let Some(bearer) = extract_bearer(parts) {
        if bearer.starts_with(ACCESS_TOKEN_PREFIX) {
            return Some(bearer);
        }
    }
    extract_query_param(parts, "api_key")
}

fn extract_bearer(parts: &Parts) -> Option<String> {
    let header = parts.headers.get(axum::http::header::AUTHORIZATION)?;
    let value = header.to_str().ok()?;
    value.strip_prefix("Bearer ").map(|s| s.to_string())
}

fn extract_query_param(parts: &Parts, key: &str) -> Option<String> {
    let query = parts.uri.query()?;
    query.split('&').find_map(|pair| {
        let (k, v) = pair.split_once('=')?;
        (k == key).then(|| v.to_string())
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> AuthConfig {
        AuthConfig {
            jwt_secret: "test-secret".to_string(),
            issuer: "infrallm".to_string(),
            audience: "infrallm-api".to_string(),
        }
    }

    fn user() -> User {
        User {
            id: uuid::Uuid::new_v4(),
            organization_id: uuid::Uuid::new_v4(),
            email: "ops@example.com".to_string(),
            display_name: "Ops".to_string(),
            role: OrgRole::Owner,
            password_hash: String::new(),
            created_at: Utc::now(),
        }
    }

    #[test]
    fn jwt_roundtrips_claims() {
        let config = config();
        let user = user();
        let token = issue_jwt(&config, &user).unwrap();
        let claims = validate_jwt(&config, &token).unwrap();
        assert_eq!(claims.sub, user.id);
        assert_eq!(claims.org_id, user.organization_id);
    }

    #[test]
    fn jwt_with_wrong_secret_is_rejected() {
        let user = user();
        let token = issue_jwt(&config(), &user).unwrap();
        let other = AuthConfig { jwt_secret: "different".to_string(), ..config() };
        assert!(validate_jwt(&other, &token).is_err());
    }

    #[test]
    fn password_roundtrips_through_argon2() {
        let hash = hash_password("correct horse battery staple").unwrap();
        assert!(verify_password("correct horse battery staple", &hash));
        assert!(!verify_password("wrong", &hash));
    }

    #[test]
    fn access_token_has_stable_prefix_and_hash() {
        let (token, hash) = generate_access_token();
        assert!(token.starts_with(ACCESS_TOKEN_PREFIX));
        assert_eq!(hash_access_token(&token), hash);
    }
}
