// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Bearer credential issuing and verification (HS256 JWT).

use chrono::{DateTime, Duration, TimeZone, Utc};
use jsonwebtoken::{decode, encode, errors::ErrorKind, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::Serialize;
use uuid::Uuid;

use super::claims::CredentialClaims;
use super::roles::Role;
use crate::error::{ServiceError, ServiceResult};

/// Clock skew tolerance (60 seconds).
const CLOCK_SKEW_LEEWAY: u64 = 60;

/// A signed bearer credential.
#[derive(Debug, Clone, Serialize)]
pub struct Credential {
    pub token: String,
    pub expires_at: DateTime<Utc>,
}

/// Claims recovered from a valid credential.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifiedCredential {
    pub subject: String,
    pub role: Role,
    pub expires_at: DateTime<Utc>,
}

/// Issues and verifies credentials with a process-wide secret.
pub struct CredentialIssuer {
    encoding: EncodingKey,
    decoding: DecodingKey,
    issuer: String,
    default_ttl: Duration,
}

impl CredentialIssuer {
    pub fn new(secret: &[u8], issuer: impl Into<String>, default_ttl: Duration) -> Self {
        Self {
            encoding: EncodingKey::from_secret(secret),
            decoding: DecodingKey::from_secret(secret),
            issuer: issuer.into(),
            default_ttl,
        }
    }

    pub fn default_ttl(&self) -> Duration {
        self.default_ttl
    }

    pub fn issue(
        &self,
        subject: &str,
        role: Role,
        expires_at: DateTime<Utc>,
    ) -> ServiceResult<Credential> {
        let claims = CredentialClaims {
            sub: subject.to_lowercase(),
            role,
            iat: Utc::now().timestamp(),
            exp: expires_at.timestamp(),
            iss: self.issuer.clone(),
            jti: Uuid::new_v4().to_string(),
        };

        let token = encode(&Header::new(Algorithm::HS256), &claims, &self.encoding)
            .map_err(|e| ServiceError::Internal(format!("failed to sign credential: {e}")))?;

        Ok(Credential { token, expires_at })
    }

    /// Issue a credential expiring after the default lifetime.
    pub fn issue_default(&self, subject: &str, role: Role) -> ServiceResult<Credential> {
        self.issue(subject, role, Utc::now() + self.default_ttl)
    }

    pub fn verify(&self, token: &str) -> ServiceResult<VerifiedCredential> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = CLOCK_SKEW_LEEWAY;
        validation.set_issuer(&[&self.issuer]);
        validation.set_required_spec_claims(&["exp", "iss", "sub"]);

        let data = decode::<CredentialClaims>(token, &self.decoding, &validation).map_err(|e| {
            match e.kind() {
                ErrorKind::ExpiredSignature => ServiceError::Expired,
                ErrorKind::InvalidSignature => {
                    ServiceError::Unauthenticated("credential signature is invalid".to_string())
                }
                ErrorKind::InvalidIssuer => {
                    ServiceError::Unauthenticated("credential issuer is invalid".to_string())
                }
                _ => ServiceError::Unauthenticated("credential is malformed".to_string()),
            }
        })?;

        let claims = data.claims;
        let expires_at = Utc
            .timestamp_opt(claims.exp, 0)
            .single()
            .ok_or_else(|| ServiceError::Unauthenticated("credential expiry is invalid".to_string()))?;

        Ok(VerifiedCredential {
            subject: claims.sub,
            role: claims.role,
            expires_at,
        })
    }
}
