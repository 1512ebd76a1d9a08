/*
 * Copyright 2025 Security Union LLC
 *
 * Licensed under either of
 *
 * * Apache License, Version 2.0
 *   (http://www.apache.org/licenses/LICENSE-2.0)
 * * MIT license
 *   (http://opensource.org/licenses/MIT)
 *
 * at your option.
 */

//! Bearer-credential verification for the websocket handshake.
//!
//! The client presents the same HS256 access token it uses against the
//! HTTP API, carried in the first frame on the socket rather than in a
//! cookie. Verification is a local decode and signature check, so it can
//! never stall the accept loop; the handshake window still bounds the
//! whole exchange.

use jsonwebtoken::{DecodingKey, Validation};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::registry::UserId;

/// Claims carried by a chatapp access token.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccessTokenClaims {
    #[serde(rename = "userId")]
    pub user_id: String,
    pub exp: i64,
}

#[derive(Debug)]
pub enum AuthError {
    /// Token could not be decoded or its signature is invalid.
    Invalid(String),
    /// Token `exp` is in the past.
    Expired,
}

impl fmt::Display for AuthError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AuthError::Invalid(msg) => write!(f, "invalid token: {msg}"),
            AuthError::Expired => write!(f, "token has expired"),
        }
    }
}

impl std::error::Error for AuthError {}

/// Turns opaque bearer credentials into stable user identities.
#[derive(Clone)]
pub struct TokenVerifier {
    decoding_key: DecodingKey,
}

impl TokenVerifier {
    pub fn new(secret: &str) -> Self {
        Self {
            decoding_key: DecodingKey::from_secret(secret.as_bytes()),
        }
    }

    /// Checks signature and expiry, then yields the `userId` claim.
    pub fn verify(&self, token: &str) -> Result<UserId, AuthError> {
        let mut validation = Validation::default();
        validation.set_required_spec_claims(&["exp"]);
        validation.validate_exp = true;

        let data = jsonwebtoken::decode::<AccessTokenClaims>(token, &self.decoding_key, &validation)
            .map_err(|e| match e.kind() {
                jsonwebtoken::errors::ErrorKind::ExpiredSignature => AuthError::Expired,
                _ => AuthError::Invalid(e.to_string()),
            })?;

        Ok(data.claims.user_id)
    }
}

/// Optional authorization hook consulted before a room join.
///
/// Implementations must answer from local or cached state; a blocking
/// lookup here would stall the relay's dispatch loop. When no oracle is
/// installed, joins are open and the conversation service is trusted to
/// hand out conversation ids only to participants.
pub trait MembershipOracle: Send + Sync {
    fn is_participant(&self, user_id: &str, room_id: &str) -> bool;
}
