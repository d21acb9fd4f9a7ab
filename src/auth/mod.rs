// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Authentication Module
//!
//! Wallet holders authenticate by signing a server-issued nonce.
//!
//! ## Auth Flow
//!
//! 1. `GET /v1/auth/nonce` returns a fresh single-use nonce
//! 2. The wallet signs it as an EIP-191 personal message
//! 3. `POST /v1/auth/login` recovers the signer, rotates the nonce and
//!    returns a bearer credential (HS256 JWT)
//! 4. Protected routes send `Authorization: Bearer <token>`
//!
//! ## Security
//!
//! - A nonce authenticates at most one login
//! - Logins for the same `(address, role)` are serialized
//! - Bearer extractors re-check that the identity still exists
//! - Clock skew tolerance is 60 seconds

pub mod claims;
pub mod credentials;
pub mod error;
pub mod extractor;
pub mod locks;
pub mod nonce;
pub mod roles;
pub mod signature;

pub use claims::AuthenticatedUser;
pub use credentials::{Credential, CredentialIssuer, VerifiedCredential};
pub use error::AuthError;
pub use extractor::{Auth, StartupOnly};
pub use nonce::{normalize_address, LoginOutcome, NonceAuthenticator, NonceChallenge, Registration};
pub use roles::Role;
pub use signature::recover_signer;
