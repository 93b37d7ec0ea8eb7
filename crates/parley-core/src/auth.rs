//! Credential verification.
//!
//! A client presents a signed token (HS256 JWT) at handshake time. The
//! verifier checks the signature and expiry and extracts an [`Identity`];
//! the claims themselves are discarded afterwards — only the derived
//! identity persists on the connection, and it is never re-verified
//! mid-session.
//!
//! [`verify`] is a pure function: no I/O beyond the signature check, no
//! side effects, no clock other than expiry validation.

use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode};
use serde::{Deserialize, Serialize};

use crate::errors::AuthError;
use crate::ids::UserId;

/// Claims carried inside a Parley credential token.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Claims {
    /// User identifier (JWT subject).
    pub sub: String,
    /// Human-readable display name.
    pub name: String,
    /// Expiry as a Unix timestamp (seconds).
    pub exp: i64,
}

/// The identity extracted from a verified credential.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Identity {
    /// Verified user ID.
    pub user_id: UserId,
    /// Display name shown to other room members.
    pub display_name: String,
}

/// Verification key wrapper, built once from the configured secret.
#[derive(Clone)]
pub struct VerificationKey {
    decoding: DecodingKey,
    validation: Validation,
}

impl VerificationKey {
    /// Build a verification key from a shared HS256 secret.
    #[must_use]
    pub fn from_secret(secret: &[u8]) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        // Expiry is exact: a token that reads as expired is rejected now,
        // not after a grace window.
        validation.leeway = 0;
        Self {
            decoding: DecodingKey::from_secret(secret),
            validation,
        }
    }
}

/// Verify a signed token and extract the identity it asserts.
///
/// Fails with [`AuthError`] when the token is absent, malformed, carries
/// a bad signature, or is expired. An absent token is a verification
/// failure like any other, not a distinct handshake state.
pub fn verify(token: Option<&str>, key: &VerificationKey) -> Result<Identity, AuthError> {
    let token = token.filter(|t| !t.trim().is_empty()).ok_or(AuthError::MissingToken)?;

    let data = decode::<Claims>(token, &key.decoding, &key.validation).map_err(|e| match e.kind() {
        ErrorKind::ExpiredSignature => AuthError::Expired,
        ErrorKind::InvalidSignature => AuthError::InvalidSignature,
        _ => AuthError::Malformed,
    })?;

    Ok(Identity {
        user_id: UserId::from(data.claims.sub),
        display_name: data.claims.name,
    })
}

/// Sign a credential token for the given identity.
///
/// Used by the token-minting tooling and by tests; the server itself only
/// ever verifies.
pub fn sign(
    identity: &Identity,
    secret: &[u8],
    expires_in: chrono::Duration,
) -> Result<String, jsonwebtoken::errors::Error> {
    let claims = Claims {
        sub: identity.user_id.as_str().to_owned(),
        name: identity.display_name.clone(),
        exp: (chrono::Utc::now() + expires_in).timestamp(),
    };
    encode(&Header::default(), &claims, &EncodingKey::from_secret(secret))
}
