//! Player Identity
//!
//! A stable `PlayerId` plus display name, obtained before any room is
//! touched. The JWT provider validates tokens issued by an external auth
//! service; it never issues tokens itself.

use std::future::Future;
use std::time::{SystemTime, UNIX_EPOCH};

use jsonwebtoken::{decode, Algorithm, DecodingKey, TokenData, Validation};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;

use crate::game::state::PlayerId;

/// Domain prefix for subject-to-player-id hashing.
const PLAYER_ID_DOMAIN: &[u8] = b"blast-arena-player:";

/// Longest display name kept.
pub const MAX_NAME_LEN: usize = 24;

/// Who is playing.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    /// Stable id, identical across sessions for the same account
    pub player_id: PlayerId,
    /// Shown next to the player
    pub display_name: String,
}

impl Identity {
    /// Build an identity, trimming the name to [`MAX_NAME_LEN`] characters.
    pub fn new(player_id: PlayerId, display_name: impl Into<String>) -> Self {
        let name: String = display_name.into();
        let name = name.trim();
        let display_name = if name.is_empty() {
            format!("player-{}", player_id.short())
        } else {
            name.chars().take(MAX_NAME_LEN).collect()
        };
        Self {
            player_id,
            display_name,
        }
    }
}

/// Identity errors.
#[derive(Debug, Error)]
pub enum IdentityError {
    /// No authentication configured.
    #[error("authentication not configured")]
    NotConfigured,
    /// Token format is invalid.
    #[error("invalid token format")]
    InvalidFormat,
    /// Token signature verification failed.
    #[error("invalid signature")]
    InvalidSignature,
    /// Token has expired.
    #[error("token expired")]
    Expired,
    /// Issuer claim doesn't match expected value.
    #[error("invalid issuer")]
    InvalidIssuer,
    /// Audience claim doesn't match expected value.
    #[error("invalid audience")]
    InvalidAudience,
    /// Required claim is missing.
    #[error("missing required claim: {0}")]
    MissingClaim(String),
    /// JWT decoding error.
    #[error("decode error: {0}")]
    DecodeError(String),
    /// Provider could not be reached.
    #[error("identity unavailable: {0}")]
    Unavailable(String),
}

/// Source of the local player's identity.
pub trait IdentityProvider: Send + Sync + 'static {
    /// Resolve the identity for this client.
    fn identify(&self) -> impl Future<Output = Result<Identity, IdentityError>> + Send;
}

// =============================================================================
// JWT
// =============================================================================

/// Authentication configuration.
#[derive(Clone, Debug, Default)]
pub struct AuthConfig {
    /// Expected issuer claim ("iss"). If None, any issuer accepted.
    pub issuer: Option<String>,
    /// Expected audience claim ("aud"). If None, any audience accepted.
    pub audience: Option<String>,
    /// RS256 public key in PEM format.
    pub public_key_pem: Option<String>,
    /// HS256 secret.
    pub secret: Option<String>,
    /// Whether to skip expiry validation (for testing only).
    pub skip_expiry: bool,
}

impl AuthConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        Self {
            issuer: std::env::var("AUTH_ISSUER").ok(),
            audience: std::env::var("AUTH_AUDIENCE").ok(),
            public_key_pem: std::env::var("AUTH_PUBLIC_KEY_PEM").ok(),
            secret: std::env::var("AUTH_SECRET").ok(),
            skip_expiry: std::env::var("AUTH_SKIP_EXPIRY")
                .map(|v| v == "true" || v == "1")
                .unwrap_or(false),
        }
    }

    /// Check if authentication is configured.
    pub fn is_configured(&self) -> bool {
        self.public_key_pem.is_some() || self.secret.is_some()
    }
}

/// Claims expected from the auth provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenClaims {
    /// Subject, the account id at the auth provider.
    pub sub: String,
    /// Display name, if the provider includes one.
    #[serde(default)]
    pub name: Option<String>,
    /// Expiry timestamp (Unix seconds).
    #[serde(default)]
    pub exp: u64,
    /// Issued at timestamp.
    #[serde(default)]
    pub iat: u64,
    /// Issuer.
    #[serde(default)]
    pub iss: Option<String>,
    /// Audience.
    #[serde(default)]
    pub aud: Option<serde_json::Value>,
}

impl TokenClaims {
    /// Stable player id derived from the subject claim.
    pub fn player_id(&self) -> PlayerId {
        let mut hasher = Sha256::new();
        hasher.update(PLAYER_ID_DOMAIN);
        hasher.update(self.sub.as_bytes());
        let hash = hasher.finalize();

        let mut id = [0u8; 16];
        id.copy_from_slice(&hash[..16]);
        PlayerId::new(id)
    }

    /// Identity carried by these claims.
    pub fn identity(&self) -> Identity {
        Identity::new(self.player_id(), self.name.clone().unwrap_or_default())
    }
}

/// Validate a JWT and extract its claims.
pub fn validate_token(token: &str, config: &AuthConfig) -> Result<TokenClaims, IdentityError> {
    if !config.is_configured() {
        return Err(IdentityError::NotConfigured);
    }

    let algorithm = if config.public_key_pem.is_some() {
        Algorithm::RS256
    } else {
        Algorithm::HS256
    };

    let mut validation = Validation::new(algorithm);
    validation.required_spec_claims = std::collections::HashSet::new();

    if let Some(ref issuer) = config.issuer {
        validation.set_issuer(&[issuer]);
    }
    if let Some(ref audience) = config.audience {
        validation.set_audience(&[audience]);
    } else {
        validation.validate_aud = false;
    }
    if config.skip_expiry {
        validation.validate_exp = false;
    }

    let token_data: TokenData<TokenClaims> = if let Some(ref pem) = config.public_key_pem {
        let key = DecodingKey::from_rsa_pem(pem.as_bytes())
            .map_err(|e| IdentityError::DecodeError(format!("invalid public key: {}", e)))?;
        decode(token, &key, &validation).map_err(map_jwt_error)?
    } else if let Some(ref secret) = config.secret {
        let key = DecodingKey::from_secret(secret.as_bytes());
        decode(token, &key, &validation).map_err(map_jwt_error)?
    } else {
        return Err(IdentityError::NotConfigured);
    };

    let claims = token_data.claims;
    if claims.sub.is_empty() {
        return Err(IdentityError::MissingClaim("sub".into()));
    }

    // Expiry is enforced here too when the library check is relaxed
    if !config.skip_expiry && claims.exp > 0 {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);
        if now > claims.exp {
            return Err(IdentityError::Expired);
        }
    }

    Ok(claims)
}

fn map_jwt_error(err: jsonwebtoken::errors::Error) -> IdentityError {
    use jsonwebtoken::errors::ErrorKind;
    match err.kind() {
        ErrorKind::ExpiredSignature => IdentityError::Expired,
        ErrorKind::InvalidSignature => IdentityError::InvalidSignature,
        ErrorKind::InvalidIssuer => IdentityError::InvalidIssuer,
        ErrorKind::InvalidAudience => IdentityError::InvalidAudience,
        ErrorKind::InvalidToken | ErrorKind::Base64(_) => IdentityError::InvalidFormat,
        _ => IdentityError::DecodeError(err.to_string()),
    }
}

// =============================================================================
// PROVIDERS
// =============================================================================

/// Identity from a bearer token.
#[derive(Clone, Debug)]
pub struct TokenIdentityProvider {
    token: String,
    config: AuthConfig,
}

impl TokenIdentityProvider {
    /// Create a provider for one token.
    pub fn new(token: impl Into<String>, config: AuthConfig) -> Self {
        Self {
            token: token.into(),
            config,
        }
    }
}

impl IdentityProvider for TokenIdentityProvider {
    async fn identify(&self) -> Result<Identity, IdentityError> {
        validate_token(&self.token, &self.config).map(|claims| claims.identity())
    }
}

/// Fixed identity, for local play and tests.
#[derive(Clone, Debug)]
pub struct StaticIdentityProvider(pub Identity);

impl StaticIdentityProvider {
    /// Identity with a fresh random id.
    pub fn random(name: &str) -> Self {
        Self(Identity::new(PlayerId::random(), name))
    }
}

impl IdentityProvider for StaticIdentityProvider {
    async fn identify(&self) -> Result<Identity, IdentityError> {
        Ok(self.0.clone())
    }
}

// =============================================================================
// TESTS
// =============================================================================
