// Copyright (c) 2025, The Amqp Datasource Authors
// MIT License
// All rights reserved.

//! # Exchange Definitions
//!
//! Builder types for declaring, binding and deleting exchanges. Defaults
//! follow the datasource's documented behavior: non-durable, auto-deleted,
//! blocking declarations.

use serde_json::Value;

/// Represents the types of exchanges available in AMQP.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum ExchangeKind {
    /// Routes messages to queues based on an exact match of routing keys
    #[default]
    Direct,
    /// Broadcasts messages to all bound queues regardless of routing keys
    Fanout,
    /// Routes messages based on wildcard pattern matching of routing keys
    Topic,
    /// Routes based on message header values instead of routing keys
    Headers,
}

impl std::fmt::Display for ExchangeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExchangeKind::Direct => write!(f, "direct"),
            ExchangeKind::Fanout => write!(f, "fanout"),
            ExchangeKind::Topic => write!(f, "topic"),
            ExchangeKind::Headers => write!(f, "headers"),
        }
    }
}

/// Definition of an exchange with its declaration parameters.
#[derive(Debug, Clone)]
pub struct ExchangeDefinition<'ex> {
    pub(crate) name: &'ex str,
    pub(crate) kind: ExchangeKind,
    pub(crate) passive: bool,
    pub(crate) durable: bool,
    pub(crate) auto_delete: bool,
    pub(crate) internal: bool,
    pub(crate) no_wait: bool,
    pub(crate) arguments: Option<Value>,
}

impl<'ex> ExchangeDefinition<'ex> {
    /// Creates a new exchange definition with the given name.
    ///
    /// By default the exchange is a non-durable, auto-deleted direct
    /// exchange.
    pub fn new(name: &'ex str) -> ExchangeDefinition<'ex> {
        ExchangeDefinition {
            name,
            kind: ExchangeKind::Direct,
            passive: false,
            durable: false,
            auto_delete: true,
            internal: false,
            no_wait: false,
            arguments: None,
        }
    }

    /// Sets the exchange type.
    pub fn kind(mut self, kind: ExchangeKind) -> Self {
        self.kind = kind;
        self
    }

    /// Sets the exchange type to Fanout.
    pub fn fanout(mut self) -> Self {
        self.kind = ExchangeKind::Fanout;
        self
    }

    /// Sets the exchange type to Topic.
    pub fn topic(mut self) -> Self {
        self.kind = ExchangeKind::Topic;
        self
    }

    /// Makes the exchange durable, persisting across broker restarts.
    pub fn durable(mut self) -> Self {
        self.durable = true;
        self
    }

    /// Keeps the exchange when it is no longer used (disables auto-delete).
    pub fn keep(mut self) -> Self {
        self.auto_delete = false;
        self
    }

    /// Makes the declaration passive, checking for existence without creating.
    pub fn passive(mut self) -> Self {
        self.passive = true;
        self
    }

    /// Makes the exchange internal, preventing direct publishing.
    pub fn internal(mut self) -> Self {
        self.internal = true;
        self
    }

    /// Sets the no_wait flag, making the declaration non-blocking.
    pub fn no_wait(mut self) -> Self {
        self.no_wait = true;
        self
    }

    /// Attaches a declaration argument table. Must be a JSON object;
    /// validated when the definition is declared.
    pub fn arguments(mut self, arguments: Value) -> Self {
        self.arguments = Some(arguments);
        self
    }
}

/// Configuration for binding one exchange to another.
pub struct ExchangeBinding<'eb> {
    pub(crate) destination: &'eb str,
    pub(crate) source: &'eb str,
    pub(crate) routing_key: &'eb str,
    pub(crate) no_wait: bool,
    pub(crate) arguments: Option<Value>,
}

impl<'eb> ExchangeBinding<'eb> {
    /// Creates a binding routing messages from `source` into `destination`.
    pub fn new(destination: &'eb str, source: &'eb str) -> ExchangeBinding<'eb> {
        ExchangeBinding {
            destination,
            source,
            routing_key: "",
            no_wait: false,
            arguments: None,
        }
    }

    /// Sets the routing key for the binding.
    pub fn routing_key(mut self, key: &'eb str) -> Self {
        self.routing_key = key;
        self
    }

    /// Sets the no_wait flag, making the operation non-blocking.
    pub fn no_wait(mut self) -> Self {
        self.no_wait = true;
        self
    }

    /// Attaches a binding argument table. Must be a JSON object.
    pub fn arguments(mut self, arguments: Value) -> Self {
        self.arguments = Some(arguments);
        self
    }
}

/// Options for deleting an exchange.
#[derive(Debug, Clone, Copy, Default)]
pub struct DeleteExchangeOptions {
    /// Only delete when no queue is bound to the exchange
    pub if_unused: bool,
    pub nowait: bool,
}
