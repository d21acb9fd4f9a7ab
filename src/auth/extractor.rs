// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Axum extractors for authenticated identities.
//!
//! Use the `Auth` extractor in handlers to require a bearer credential:
//!
//! ```rust,ignore
//! async fn my_handler(Auth(user): Auth) -> impl IntoResponse {
//!     // user is AuthenticatedUser
//! }
//! ```

use axum::{
    extract::FromRequestParts,
    http::{header::AUTHORIZATION, request::Parts},
};

use super::{AuthError, AuthenticatedUser, Role};
use crate::state::AppState;

/// Extractor for authenticated identities.
///
/// Verifies the `Authorization: Bearer <token>` credential and then checks
/// that the identity it names still exists. A credential for a removed
/// identity is rejected even if it has not expired yet.
pub struct Auth(pub AuthenticatedUser);

impl FromRequestParts<AppState> for Auth {
    type Rejection = AuthError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let auth_header = parts
            .headers
            .get(AUTHORIZATION)
            .ok_or(AuthError::MissingAuthHeader)?
            .to_str()
            .map_err(|_| AuthError::InvalidAuthHeader)?;

        let token = auth_header
            .strip_prefix("Bearer ")
            .ok_or(AuthError::InvalidAuthHeader)?;

        let verified = state.credentials.verify(token.trim())?;

        let exists = state
            .identities
            .find_identity(&verified.subject, verified.role)
            .map_err(|e| AuthError::InternalError(e.to_string()))?
            .is_some();
        if !exists {
            tracing::warn!(address = %verified.subject, role = %verified.role, "Credential for unknown identity");
            return Err(AuthError::UnknownIdentity);
        }

        Ok(Auth(AuthenticatedUser::from_credential(verified)))
    }
}

/// Extractor that requires the startup role.
pub struct StartupOnly(pub AuthenticatedUser);

impl FromRequestParts<AppState> for StartupOnly {
    type Rejection = AuthError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let Auth(user) = Auth::from_request_parts(parts, state).await?;

        if !user.has_role(Role::Startup) {
            return Err(AuthError::InsufficientPermissions);
        }

        Ok(StartupOnly(user))
    }
}
