// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Wallet signature authentication endpoints.

use axum::{
    extract::{Query, State},
    http::StatusCode,
    Json,
};

use crate::{
    auth::Auth,
    error::ApiError,
    models::{
        IdentityResponse, LoginRequest, LoginResponse, NonceQuery, NonceResponse, RegisterRequest,
        RegisterResponse,
    },
    state::AppState,
};

/// Issue a single-use login nonce.
///
/// A nonce is returned for any well-formed address, registered or not.
#[utoipa::path(
    get,
    path = "/v1/auth/nonce",
    tag = "Auth",
    params(NonceQuery),
    responses(
        (status = 200, description = "Nonce to sign", body = NonceResponse),
        (status = 400, description = "Malformed wallet address")
    )
)]
pub async fn get_nonce(
    State(state): State<AppState>,
    Query(query): Query<NonceQuery>,
) -> Result<Json<NonceResponse>, ApiError> {
    let challenge = state
        .authenticator
        .issue_nonce(&query.wallet_address, query.role)?;
    Ok(Json(NonceResponse {
        nonce: challenge.nonce,
    }))
}

#[utoipa::path(
    post,
    path = "/v1/auth/register",
    tag = "Auth",
    request_body = RegisterRequest,
    responses(
        (status = 201, description = "Identity created", body = RegisterResponse),
        (status = 400, description = "Profile does not match role"),
        (status = 409, description = "Identity already exists for this role")
    )
)]
pub async fn register(
    State(state): State<AppState>,
    Json(request): Json<RegisterRequest>,
) -> Result<(StatusCode, Json<RegisterResponse>), ApiError> {
    let registration =
        state
            .authenticator
            .register(&request.wallet_address, request.role, request.profile)?;

    Ok((
        StatusCode::CREATED,
        Json(RegisterResponse {
            identity: registration.identity.into(),
            nonce: registration.nonce,
        }),
    ))
}

/// Exchange a signed nonce for a bearer credential.
#[utoipa::path(
    post,
    path = "/v1/auth/login",
    tag = "Auth",
    request_body = LoginRequest,
    responses(
        (status = 200, description = "Credential issued", body = LoginResponse),
        (status = 401, description = "Signature or nonce rejected"),
        (status = 404, description = "No identity for this address and role")
    )
)]
pub async fn login(
    State(state): State<AppState>,
    Json(request): Json<LoginRequest>,
) -> Result<Json<LoginResponse>, ApiError> {
    let outcome = state
        .authenticator
        .login(&request.wallet_address, request.role, &request.signature)
        .await?;

    Ok(Json(LoginResponse {
        token: outcome.credential.token,
        expires_at: outcome.credential.expires_at,
        identity: outcome.identity.into(),
    }))
}

#[utoipa::path(
    get,
    path = "/v1/auth/me",
    tag = "Auth",
    responses(
        (status = 200, description = "Authenticated identity", body = IdentityResponse),
        (status = 401, description = "Missing or invalid credential")
    ),
    security(("bearer_auth" = []))
)]
pub async fn me(
    State(state): State<AppState>,
    Auth(user): Auth,
) -> Result<Json<IdentityResponse>, ApiError> {
    let identity = state
        .identities
        .find_identity(&user.address, user.role)?
        .ok_or_else(|| ApiError::not_found("Identity not found"))?;
    Ok(Json(identity.into()))
}
