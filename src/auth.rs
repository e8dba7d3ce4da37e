//! Registration, credential checks and the access/refresh token lifecycle.
//!
//! Tokens carry no server-side state. The only revocation is the user lookup
//! performed on refresh: deleting a user invalidates its refresh tokens even
//! though they still verify cryptographically.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;

use crate::{
    allocator,
    config::JwtConfig,
    db,
    errors::{AuthError, StoreError, TokenError},
    structs::User,
    token::{Claims, TokenCodec, TokenKind},
    utils::verify_password,
};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenPair {
    pub token: String,
    pub refresh_token: String,
}

#[derive(Debug, Clone)]
pub struct AuthService {
    pool: SqlitePool,
    codec: TokenCodec,
    access_ttl: Duration,
    refresh_ttl: Duration,
}

impl AuthService {
    pub fn new(pool: SqlitePool, config: &JwtConfig) -> Self {
        Self {
            pool,
            codec: TokenCodec::new(&config.secret),
            access_ttl: config.access_token_ttl,
            refresh_ttl: config.refresh_token_ttl,
        }
    }

    pub fn codec(&self) -> &TokenCodec {
        &self.codec
    }

    /// Creates the user, its own organization and its item prefix.
    ///
    /// `email` is expected to be validated and normalized by the caller.
    pub async fn register(&self, email: &str, password: &str) -> Result<User, AuthError> {
        let prefix = allocator::prefix_from_email(email);
        db::create_user_with_organization(&self.pool, email, password, &prefix)
            .await
            .map_err(|e| match e {
                StoreError::Duplicate => AuthError::AlreadyExists,
                other => AuthError::Store(other),
            })
    }

    /// Unknown users and wrong passwords yield the same error.
    pub async fn validate_credentials(&self, email: &str, password: &str) -> Result<(), AuthError> {
        let user = db::find_user(&self.pool, email)
            .await
            .map_err(StoreError::from)?
            .ok_or(AuthError::InvalidCredentials)?;

        if !verify_password(password, &user.password) {
            return Err(AuthError::InvalidCredentials);
        }
        Ok(())
    }

    pub fn issue_token_pair(&self, email: &str) -> Result<TokenPair, AuthError> {
        let token = self.sign(&Claims::new(email, Some(TokenKind::Access), self.access_ttl))?;
        let refresh_token =
            self.sign(&Claims::new(email, Some(TokenKind::Refresh), self.refresh_ttl))?;
        log::debug!("Issued token pair for {}", email);
        Ok(TokenPair {
            token,
            refresh_token,
        })
    }

    pub fn validate_access_token(&self, token: &str) -> Result<String, AuthError> {
        self.validate(token, TokenKind::Access)
    }

    pub fn validate_refresh_token(&self, token: &str) -> Result<String, AuthError> {
        self.validate(token, TokenKind::Refresh)
    }

    /// Exchanges a refresh token for a brand-new pair, provided its subject
    /// still exists.
    pub async fn refresh(&self, refresh_token: &str) -> Result<TokenPair, AuthError> {
        let email = self.validate_refresh_token(refresh_token)?;

        let user = db::find_user(&self.pool, &email)
            .await
            .map_err(StoreError::from)?;
        if user.is_none() {
            log::info!("Refresh rejected, user {} no longer exists", email);
            return Err(AuthError::UserGone);
        }

        self.issue_token_pair(&email)
    }

    fn validate(&self, token: &str, kind: TokenKind) -> Result<String, AuthError> {
        let claims = self.codec.decode(token).map_err(|e| {
            log::debug!("Token rejected: {}", e);
            AuthError::InvalidToken
        })?;
        if !claims.allows(kind) {
            log::debug!("Token rejected: expected {:?}, got {:?}", kind, claims.kind);
            return Err(AuthError::InvalidToken);
        }
        Ok(claims.email)
    }

    fn sign(&self, claims: &Claims) -> Result<String, AuthError> {
        self.codec.encode(claims).map_err(|e| match e {
            TokenError::Signing(msg) => AuthError::Signing(msg),
            other => AuthError::Signing(other.to_string()),
        })
    }
}
