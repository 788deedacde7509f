// Copyright (c) 2025, The Amqp Datasource Authors
// MIT License
// All rights reserved.

//! # Queue Definitions
//!
//! Builder types for declaring, binding, deleting and purging queues.
//! Defaults follow the datasource's documented behavior: non-durable,
//! auto-deleted, non-exclusive, blocking declarations.

use serde_json::Value;

/// Definition of a queue with its declaration parameters.
#[derive(Debug, Clone, Default)]
pub struct QueueDefinition {
    pub(crate) name: String,
    pub(crate) passive: bool,
    pub(crate) durable: bool,
    pub(crate) exclusive: bool,
    pub(crate) auto_delete: bool,
    pub(crate) no_wait: bool,
    pub(crate) arguments: Option<Value>,
}

impl QueueDefinition {
    /// Creates a new queue definition with the given name.
    ///
    /// By default the queue is non-durable, non-exclusive and auto-deleted.
    pub fn new(name: &str) -> QueueDefinition {
        QueueDefinition {
            name: name.to_owned(),
            passive: false,
            durable: false,
            exclusive: false,
            auto_delete: true,
            no_wait: false,
            arguments: None,
        }
    }

    /// Makes the queue durable, persisting across broker restarts.
    pub fn durable(mut self) -> Self {
        self.durable = true;
        self
    }

    /// Makes the queue exclusive to the connection.
    pub fn exclusive(mut self) -> Self {
        self.exclusive = true;
        self
    }

    /// Keeps the queue when the last consumer disconnects (disables
    /// auto-delete).
    pub fn keep(mut self) -> Self {
        self.auto_delete = false;
        self
    }

    /// Makes the declaration passive, checking for existence without creating.
    pub fn passive(mut self) -> Self {
        self.passive = true;
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

/// Configuration for binding a queue to an exchange.
pub struct QueueBinding<'qb> {
    pub(crate) queue: &'qb str,
    pub(crate) exchange: &'qb str,
    pub(crate) routing_key: &'qb str,
    pub(crate) no_wait: bool,
    pub(crate) arguments: Option<Value>,
}

impl<'qb> QueueBinding<'qb> {
    /// Creates a new binding for the given queue and exchange.
    pub fn new(queue: &'qb str, exchange: &'qb str) -> QueueBinding<'qb> {
        QueueBinding {
            queue,
            exchange,
            routing_key: "",
            no_wait: false,
            arguments: None,
        }
    }

    /// Sets the routing key for the binding.
    pub fn routing_key(mut self, key: &'qb str) -> Self {
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

/// Options for deleting a queue.
#[derive(Debug, Clone, Copy, Default)]
pub struct DeleteQueueOptions {
    /// Only delete when the queue has no consumers
    pub if_unused: bool,
    /// Only delete when the queue is empty
    pub if_empty: bool,
    pub nowait: bool,
}

/// Options for purging a queue.
#[derive(Debug, Clone, Copy, Default)]
pub struct PurgeQueueOptions {
    pub nowait: bool,
}
