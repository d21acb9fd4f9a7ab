// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Identity roles.

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Role an identity registered with.
///
/// The same wallet address may hold one identity per role, so
/// `(address, role)` is the identity key everywhere in the service.
///
/// - `Investor` - Funds campaigns
/// - `Startup` - Creates campaigns on the factory contract
/// - `Unspecified` - Basic identity without a role-specific profile
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Investor,
    Startup,
    Unspecified,
}

impl Role {
    /// Check if this role satisfies the required role.
    pub fn has_privilege(&self, required: Role) -> bool {
        match (self, required) {
            (_, Role::Unspecified) => true,
            (Role::Investor, Role::Investor) => true,
            (Role::Startup, Role::Startup) => true,
            _ => false,
        }
    }

    /// Parse role from string (case-insensitive).
    pub fn from_str(s: &str) -> Option<Role> {
        match s.to_lowercase().as_str() {
            "investor" => Some(Role::Investor),
            "startup" => Some(Role::Startup),
            "unspecified" => Some(Role::Unspecified),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Investor => "investor",
            Role::Startup => "startup",
            Role::Unspecified => "unspecified",
        }
    }
}

impl Default for Role {
    fn default() -> Self {
        Role::Unspecified
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
