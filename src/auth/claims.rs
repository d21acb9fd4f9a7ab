// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Credential claims and authenticated user representation.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use super::credentials::VerifiedCredential;
use super::roles::Role;

/// Claims carried by a bearer credential.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CredentialClaims {
    /// Subject: lowercase wallet address
    pub sub: String,
    pub role: Role,
    pub iat: i64,
    pub exp: i64,
    pub iss: String,
    /// Unique token id
    pub jti: String,
}

/// Authenticated identity making a request.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct AuthenticatedUser {
    /// Lowercase wallet address
    pub address: String,
    pub role: Role,
    #[serde(skip)]
    pub expires_at: Option<DateTime<Utc>>,
}

impl AuthenticatedUser {
    pub fn from_credential(credential: VerifiedCredential) -> Self {
        Self {
            address: credential.subject,
            role: credential.role,
            expires_at: Some(credential.expires_at),
        }
    }

    /// Check if the user has the required role.
    pub fn has_role(&self, required: Role) -> bool {
        self.role.has_privilege(required)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_credential_copies_subject_and_role() {
        let user = AuthenticatedUser::from_credential(VerifiedCredential {
            subject: "0xabc".to_string(),
            role: Role::Startup,
            expires_at: Utc::now(),
        });
        assert_eq!(user.address, "0xabc");
        assert!(user.has_role(Role::Startup));
        assert!(!user.has_role(Role::Investor));
    }

    #[test]
    fn claims_serialize_role_lowercase() {
        let claims = CredentialClaims {
            sub: "0xabc".to_string(),
            role: Role::Investor,
            iat: 1,
            exp: 2,
            iss: "test".to_string(),
            jti: "id".to_string(),
        };
        let json = serde_json::to_value(&claims).unwrap();
        assert_eq!(json["role"], "investor");
        assert_eq!(json["sub"], "0xabc");
    }
}
