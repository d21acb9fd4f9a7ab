// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Wallet identities and their login nonces.
//!
//! An identity is keyed by `(address, role)`. Addresses are stored in
//! lowercase so lookups never depend on the caller's checksum casing.

use chrono::{DateTime, Utc};
use redb::{ReadableDatabase, ReadableTable};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use super::database::{Database, StoreResult, IDENTITIES};
use crate::auth::Role;

/// Role-specific profile payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Profile {
    Investor {
        name: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        nickname: Option<String>,
    },
    Startup {
        name: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        location: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        website: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        bio: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        mission: Option<String>,
    },
    Basic,
}

impl Profile {
    /// Whether this payload may be attached to an identity with `role`.
    pub fn matches_role(&self, role: Role) -> bool {
        matches!(
            (self, role),
            (Profile::Investor { .. }, Role::Investor)
                | (Profile::Startup { .. }, Role::Startup)
                | (Profile::Basic, Role::Unspecified)
        )
    }
}

/// Stored identity record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    /// Lowercase 0x-prefixed wallet address
    pub address: String,
    pub role: Role,
    /// Outstanding single-use login nonce
    #[serde(default)]
    pub nonce: Option<String>,
    #[serde(default)]
    pub nonce_issued_at: Option<DateTime<Utc>>,
    pub profile: Profile,
    pub created_at: DateTime<Utc>,
}

impl Identity {
    pub fn new(address: String, role: Role, profile: Profile) -> Self {
        Self {
            address: address.to_lowercase(),
            role,
            nonce: None,
            nonce_issued_at: None,
            profile,
            created_at: Utc::now(),
        }
    }
}

/// Persistence seam for identities.
///
/// Every method is a single targeted write so concurrent callers never
/// overwrite each other's fields.
pub trait IdentityStore: Send + Sync {
    fn find_identity(&self, address: &str, role: Role) -> StoreResult<Option<Identity>>;

    /// Insert if absent. Returns `false` when the key already exists.
    fn insert_identity(&self, identity: &Identity) -> StoreResult<bool>;

    /// Overwrite the outstanding nonce. Returns `false` when no identity exists.
    fn set_nonce(
        &self,
        address: &str,
        role: Role,
        nonce: &str,
        issued_at: DateTime<Utc>,
    ) -> StoreResult<bool>;

    /// Replace the nonce only if it still equals `expected`.
    fn replace_nonce(
        &self,
        address: &str,
        role: Role,
        expected: &str,
        replacement: &str,
        issued_at: DateTime<Utc>,
    ) -> StoreResult<bool>;
}

fn identity_key(address: &str, role: Role) -> String {
    format!("{role}|{}", address.to_lowercase())
}

impl Database {
    /// Apply `update` to the stored identity inside one write transaction.
    ///
    /// `update` returns `false` to leave the record untouched.
    fn update_identity<F>(&self, address: &str, role: Role, update: F) -> StoreResult<bool>
    where
        F: FnOnce(&mut Identity) -> bool,
    {
        let key = identity_key(address, role);
        let write_txn = self.db.begin_write()?;
        let applied = {
            let mut table = write_txn.open_table(IDENTITIES)?;
            let existing_bytes = {
                match table.get(key.as_str())? {
                    Some(value) => value.value().to_vec(),
                    None => return Ok(false),
                }
            };

            let mut identity: Identity = serde_json::from_slice(&existing_bytes)?;
            if update(&mut identity) {
                let json = serde_json::to_vec(&identity)?;
                table.insert(key.as_str(), json.as_slice())?;
                true
            } else {
                false
            }
        };
        if applied {
            write_txn.commit()?;
        } else {
            write_txn.abort()?;
        }
        Ok(applied)
    }
}

impl IdentityStore for Database {
    fn find_identity(&self, address: &str, role: Role) -> StoreResult<Option<Identity>> {
        let key = identity_key(address, role);
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(IDENTITIES)?;
        match table.get(key.as_str())? {
            Some(value) => Ok(Some(serde_json::from_slice(value.value())?)),
            None => Ok(None),
        }
    }

    fn insert_identity(&self, identity: &Identity) -> StoreResult<bool> {
        let key = identity_key(&identity.address, identity.role);
        let json = serde_json::to_vec(identity)?;

        let write_txn = self.db.begin_write()?;
        let inserted = {
            let mut table = write_txn.open_table(IDENTITIES)?;
            if table.get(key.as_str())?.is_some() {
                false
            } else {
                table.insert(key.as_str(), json.as_slice())?;
                true
            }
        };
        write_txn.commit()?;
        Ok(inserted)
    }

    fn set_nonce(
        &self,
        address: &str,
        role: Role,
        nonce: &str,
        issued_at: DateTime<Utc>,
    ) -> StoreResult<bool> {
        self.update_identity(address, role, |identity| {
            identity.nonce = Some(nonce.to_string());
            identity.nonce_issued_at = Some(issued_at);
            true
        })
    }

    fn replace_nonce(
        &self,
        address: &str,
        role: Role,
        expected: &str,
        replacement: &str,
        issued_at: DateTime<Utc>,
    ) -> StoreResult<bool> {
        self.update_identity(address, role, |identity| {
            if identity.nonce.as_deref() != Some(expected) {
                return false;
            }
            identity.nonce = Some(replacement.to_string());
            identity.nonce_issued_at = Some(issued_at);
            true
        })
    }
}
