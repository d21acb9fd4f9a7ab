// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Runtime Configuration
//!
//! Configuration is read from the environment at startup. A `.env` file in
//! the working directory is loaded first when present.
//!
//! ## Environment Variables
//!
//! | Variable | Description | Default |
//! |----------|-------------|---------|
//! | `HOST` | Server bind address | `0.0.0.0` |
//! | `PORT` | Server bind port | `8080` |
//! | `DATA_DIR` | Directory holding the ledger database | `./data` |
//! | `LOG_FORMAT` | Logging format (`json` or `pretty`) | `pretty` |
//! | `RUST_LOG` | Log level filter | `info,tower_http=debug` |
//! | `JWT_SECRET` | HMAC secret for bearer credentials (min 32 bytes) | Required |
//! | `JWT_ISSUER` | Issuer claim of bearer credentials | `crowdfund-ledger` |
//! | `JWT_TTL_SECS` | Credential lifetime | `86400` |
//! | `BLOCKCHAIN_NETWORK_NAME` | Display name of the network | `local` |
//! | `BLOCKCHAIN_RPC_URL` | JSON-RPC endpoint | `http://localhost:8545` |
//! | `BLOCKCHAIN_PRIVATE_KEY` | Service key: hex, inline PEM or PEM file path | Optional (read-only without) |
//! | `CAMPAIGN_FACTORY_ADDRESS` | Campaign factory contract | Optional (listener disabled without) |
//! | `EXPLORER_URL` | Block explorer base URL | `https://etherscan.io` |
//! | `CONFIRMATION_POLL_MS` | Initial receipt poll interval | `1000` |
//! | `CONFIRMATION_TIMEOUT_SECS` | Confirmation ceiling | `120` |
//! | `LISTENER_POLL_SECS` | Event listener poll interval | `5` |
//! | `LISTENER_START_BLOCK` | First block to scan without a checkpoint | head - 10000 |

use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use alloy::primitives::Address;

use crate::blockchain::{ConfirmationPolicy, NetworkSettings};

/// Environment variable name for the data directory path.
pub const DATA_DIR_ENV: &str = "DATA_DIR";

/// Minimum accepted length of `JWT_SECRET`.
const MIN_SECRET_LEN: usize = 32;

/// Upper bound on the receipt poll interval.
const MAX_CONFIRMATION_POLL: Duration = Duration::from_secs(8);

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{0} is required")]
    Missing(&'static str),

    #[error("{name} is invalid: {reason}")]
    Invalid { name: &'static str, reason: String },
}

/// Output format of the tracing subscriber.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Json,
    Pretty,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub bind_addr: SocketAddr,
    pub data_dir: PathBuf,
    pub log_format: LogFormat,
    pub jwt_secret: String,
    pub jwt_issuer: String,
    pub jwt_ttl: chrono::Duration,
    pub network: NetworkSettings,
    /// Raw `BLOCKCHAIN_PRIVATE_KEY` value, parsed by [`crate::blockchain::load_signer`]
    pub private_key: Option<String>,
    pub confirmation: ConfirmationPolicy,
    pub listener_poll: Duration,
    pub listener_start_block: Option<u64>,
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build the configuration from an arbitrary variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        let host = get("HOST").unwrap_or_else(|| "0.0.0.0".to_string());
        let port: u16 = parse_or(&get, "PORT", 8080)?;
        let bind_addr = format!("{host}:{port}")
            .parse()
            .map_err(|e: std::net::AddrParseError| ConfigError::Invalid {
                name: "HOST",
                reason: e.to_string(),
            })?;

        let log_format = match get("LOG_FORMAT").as_deref() {
            Some("json") => LogFormat::Json,
            Some("pretty") | None => LogFormat::Pretty,
            Some(other) => {
                return Err(ConfigError::Invalid {
                    name: "LOG_FORMAT",
                    reason: format!("expected json or pretty, got {other}"),
                })
            }
        };

        let jwt_secret = get("JWT_SECRET").ok_or(ConfigError::Missing("JWT_SECRET"))?;
        if jwt_secret.len() < MIN_SECRET_LEN {
            return Err(ConfigError::Invalid {
                name: "JWT_SECRET",
                reason: format!("must be at least {MIN_SECRET_LEN} bytes"),
            });
        }
        let jwt_ttl_secs: i64 = parse_or(&get, "JWT_TTL_SECS", 86_400)?;
        if jwt_ttl_secs <= 0 {
            return Err(ConfigError::Invalid {
                name: "JWT_TTL_SECS",
                reason: "must be positive".to_string(),
            });
        }

        let factory = get("CAMPAIGN_FACTORY_ADDRESS")
            .map(|raw| {
                Address::from_str(raw.trim()).map_err(|e| ConfigError::Invalid {
                    name: "CAMPAIGN_FACTORY_ADDRESS",
                    reason: e.to_string(),
                })
            })
            .transpose()?;

        let poll_ms: u64 = parse_or(&get, "CONFIRMATION_POLL_MS", 1000)?;
        let initial_interval = Duration::from_millis(poll_ms.max(1));
        let confirmation = ConfirmationPolicy {
            initial_interval,
            max_interval: MAX_CONFIRMATION_POLL.max(initial_interval),
            ceiling: Duration::from_secs(parse_or(&get, "CONFIRMATION_TIMEOUT_SECS", 120)?),
        };

        Ok(Self {
            bind_addr,
            data_dir: PathBuf::from(get(DATA_DIR_ENV).unwrap_or_else(|| "./data".to_string())),
            log_format,
            jwt_secret,
            jwt_issuer: get("JWT_ISSUER").unwrap_or_else(|| "crowdfund-ledger".to_string()),
            jwt_ttl: chrono::Duration::seconds(jwt_ttl_secs),
            network: NetworkSettings {
                name: get("BLOCKCHAIN_NETWORK_NAME").unwrap_or_else(|| "local".to_string()),
                rpc_url: get("BLOCKCHAIN_RPC_URL")
                    .unwrap_or_else(|| "http://localhost:8545".to_string()),
                explorer_url: get("EXPLORER_URL")
                    .unwrap_or_else(|| "https://etherscan.io".to_string()),
                factory,
            },
            private_key: get("BLOCKCHAIN_PRIVATE_KEY"),
            confirmation,
            listener_poll: Duration::from_secs(parse_or(&get, "LISTENER_POLL_SECS", 5)?.max(1)),
            listener_start_block: get("LISTENER_START_BLOCK")
                .map(|raw| parse_value("LISTENER_START_BLOCK", &raw))
                .transpose()?,
        })
    }
}

fn parse_or<T, G>(get: &G, name: &'static str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    G: Fn(&str) -> Option<String>,
{
    match get(name) {
        Some(raw) => parse_value(name, &raw),
        None => Ok(default),
    }
}

fn parse_value<T>(name: &'static str, raw: &str) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    raw.trim().parse().map_err(|e: T::Err| ConfigError::Invalid {
        name,
        reason: e.to_string(),
    })
}
