// Copyright (c) 2025, The Amqp Datasource Authors
// MIT License
// All rights reserved.

//! # Connection Configuration
//!
//! Deserializable connection settings with the datasource's historical
//! defaults, plus the static scheme map that resolves which transport a
//! connection uses. Construction of a [`crate::connection::Connection`] fails
//! when no transport resolves from the configured scheme.

use crate::errors::AmqpError;
use serde::Deserialize;

/// Environment variable consulted for the default `environment` publish header.
pub const ENVIRONMENT_VAR: &str = "APPLICATION_ENVIRONMENT";

/// Transport flavor resolved from the configured scheme.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportScheme {
    /// Plain TCP stream connection (`amqp`)
    Tcp,
    /// TLS connection (`amqps`)
    Tls,
}

impl TransportScheme {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransportScheme::Tcp => "amqp",
            TransportScheme::Tls => "amqps",
        }
    }
}

/// Static scheme -> transport map. Exactly one transport is resolved from a
/// config; an unknown scheme is a construction-time error.
const SCHEME_MAP: &[(&str, TransportScheme)] =
    &[("amqp", TransportScheme::Tcp), ("amqps", TransportScheme::Tls)];

/// Connection settings for an AMQP datasource.
///
/// All fields have defaults matching the historical datasource configuration;
/// `database` is accepted as an alias for `vhost` so configs written for
/// SQL-style datasources keep working.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ConnectionConfig {
    /// Name the connection is known by in logs
    pub name: String,
    /// URI scheme used to resolve the transport
    pub scheme: String,
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    #[serde(alias = "database")]
    pub vhost: String,
    pub insist: bool,
    pub login_method: String,
    pub locale: String,
    /// Connect timeout in seconds
    pub connection_timeout: f64,
    /// Socket read/write timeout in seconds
    pub read_write_timeout: f64,
    /// Heartbeat interval in seconds (0 disables)
    pub heartbeat: u16,
    pub keepalive: bool,
    /// Value for the `environment` header stamped on published messages.
    /// Defaults to the lowercased `APPLICATION_ENVIRONMENT` variable, or
    /// `dev` when unset.
    pub environment: Option<String>,
    /// Enables verbose channel lifecycle logging
    pub debug: bool,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        ConnectionConfig {
            name: "default".to_owned(),
            scheme: "amqp".to_owned(),
            host: "localhost".to_owned(),
            port: 5672,
            username: "guest".to_owned(),
            password: "guest".to_owned(),
            vhost: "/".to_owned(),
            insist: false,
            login_method: "AMQPLAIN".to_owned(),
            locale: "en_US".to_owned(),
            connection_timeout: 15.0,
            read_write_timeout: 15.0,
            heartbeat: 5,
            keepalive: false,
            environment: None,
            debug: false,
        }
    }
}

impl ConnectionConfig {
    /// Resolves the transport for this config from the static scheme map.
    pub fn resolve_scheme(&self) -> Result<TransportScheme, AmqpError> {
        SCHEME_MAP
            .iter()
            .find(|(scheme, _)| *scheme == self.scheme)
            .map(|(_, transport)| *transport)
            .ok_or_else(|| AmqpError::UnresolvedDriver(self.scheme.clone()))
    }

    /// Effective environment name for the `environment` publish header.
    pub fn environment(&self) -> String {
        match &self.environment {
            Some(environment) => environment.clone(),
            None => std::env::var(ENVIRONMENT_VAR)
                .map(|value| value.to_lowercase())
                .unwrap_or_else(|_| "dev".to_owned()),
        }
    }
}
