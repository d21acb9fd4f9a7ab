// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Signed-nonce challenge/response authentication.
//!
//! ## Flow
//!
//! 1. Client requests a nonce for `(address, role)`
//! 2. Wallet signs the nonce string with `personal_sign`
//! 3. Client submits the signature; the recovered signer must equal the
//!    stored address
//! 4. The verified nonce is swapped for a fresh one, then a credential is
//!    issued
//!
//! ```text
//! NoNonce --issue--> NonceIssued --login ok--> Authenticated --rotate--> NonceIssued
//! ```
//!
//! A nonce authenticates at most one login: the rotation is a
//! compare-and-swap on the exact nonce that was verified, and logins for the
//! same key are serialized.

use std::sync::Arc;

use chrono::Utc;
use rand::RngCore;
use serde::Serialize;

use super::credentials::{Credential, CredentialIssuer};
use super::locks::KeyedLocks;
use super::roles::Role;
use super::signature::{recover_signer, signer_matches};
use crate::error::{ServiceError, ServiceResult};
use crate::storage::{Identity, IdentityStore, Profile};

/// Nonce entropy in bytes (256 bits).
const NONCE_BYTES: usize = 32;

#[derive(Debug, Clone, Serialize)]
pub struct NonceChallenge {
    pub nonce: String,
}

#[derive(Debug, Clone)]
pub struct LoginOutcome {
    pub credential: Credential,
    pub identity: Identity,
}

#[derive(Debug, Clone)]
pub struct Registration {
    pub identity: Identity,
    pub nonce: String,
}

/// Validate a `0x` + 40 hex address and return it lowercased.
pub fn normalize_address(raw: &str) -> ServiceResult<String> {
    let trimmed = raw.trim();
    let hex = trimmed
        .strip_prefix("0x")
        .or_else(|| trimmed.strip_prefix("0X"))
        .ok_or_else(|| ServiceError::Validation(format!("address must start with 0x: {raw}")))?;

    if hex.len() != 40 || !hex.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(ServiceError::Validation(format!(
            "address must be 40 hex characters: {raw}"
        )));
    }
    Ok(format!("0x{}", hex.to_ascii_lowercase()))
}

fn generate_nonce() -> String {
    let mut bytes = [0u8; NONCE_BYTES];
    rand::rngs::OsRng.fill_bytes(&mut bytes);
    alloy::hex::encode(bytes)
}

fn lock_key(address: &str, role: Role) -> String {
    format!("{role}|{address}")
}

pub struct NonceAuthenticator {
    identities: Arc<dyn IdentityStore>,
    credentials: Arc<CredentialIssuer>,
    locks: KeyedLocks,
}

impl NonceAuthenticator {
    pub fn new(identities: Arc<dyn IdentityStore>, credentials: Arc<CredentialIssuer>) -> Self {
        Self {
            identities,
            credentials,
            locks: KeyedLocks::new(),
        }
    }

    /// Issue a fresh nonce, replacing any outstanding one.
    ///
    /// For an unknown identity nothing is stored but a nonce is still
    /// returned, so the response never reveals whether an address is
    /// registered.
    pub fn issue_nonce(&self, address: &str, role: Role) -> ServiceResult<NonceChallenge> {
        let address = normalize_address(address)?;
        let nonce = generate_nonce();
        let stored = self
            .identities
            .set_nonce(&address, role, &nonce, Utc::now())?;

        tracing::debug!(address = %address, role = %role, stored, "Issued login nonce");
        Ok(NonceChallenge { nonce })
    }

    /// Verify a signature over the outstanding nonce and issue a credential.
    pub async fn login(
        &self,
        address: &str,
        role: Role,
        signature: &str,
    ) -> ServiceResult<LoginOutcome> {
        let address = normalize_address(address)?;
        let _guard = self.locks.lock(&lock_key(&address, role)).await;

        let mut identity = self
            .identities
            .find_identity(&address, role)?
            .ok_or_else(|| ServiceError::NotFound(format!("no {role} identity for {address}")))?;

        let nonce = identity
            .nonce
            .clone()
            .ok_or_else(|| ServiceError::Unauthenticated("no outstanding nonce".to_string()))?;

        let recovered = recover_signer(&nonce, signature).map_err(|e| {
            tracing::debug!(address = %address, error = %e, "Rejected malformed login signature");
            ServiceError::Unauthenticated("signature verification failed".to_string())
        })?;

        if !signer_matches(&recovered, &identity.address) {
            tracing::warn!(address = %address, role = %role, "Login signature from a different signer");
            return Err(ServiceError::Unauthenticated(
                "signature verification failed".to_string(),
            ));
        }

        let next = generate_nonce();
        let issued_at = Utc::now();
        if !self
            .identities
            .replace_nonce(&address, role, &nonce, &next, issued_at)?
        {
            return Err(ServiceError::Unauthenticated(
                "nonce was already used".to_string(),
            ));
        }
        identity.nonce = Some(next);
        identity.nonce_issued_at = Some(issued_at);

        let credential = self.credentials.issue_default(&address, role)?;
        tracing::info!(address = %address, role = %role, "Wallet login succeeded");

        Ok(LoginOutcome {
            credential,
            identity,
        })
    }

    /// Create an identity and hand out its first nonce.
    pub fn register(
        &self,
        address: &str,
        role: Role,
        profile: Profile,
    ) -> ServiceResult<Registration> {
        let address = normalize_address(address)?;
        if !profile.matches_role(role) {
            return Err(ServiceError::Validation(match role {
                Role::Investor => "investor registration requires investor profile data".to_string(),
                Role::Startup => "startup registration requires startup profile data".to_string(),
                Role::Unspecified => "unspecified role takes a basic profile".to_string(),
            }));
        }

        let mut identity = Identity::new(address.clone(), role, profile);
        if !self.identities.insert_identity(&identity)? {
            return Err(ServiceError::Conflict(format!(
                "{role} identity already exists for {address}"
            )));
        }

        let challenge = self.issue_nonce(&address, role)?;
        identity.nonce = Some(challenge.nonce.clone());
        tracing::info!(address = %address, role = %role, "Registered identity");

        Ok(Registration {
            identity,
            nonce: challenge.nonce,
        })
    }
}
