// Copyright (c) 2025, The Amqp Datasource Authors
// MIT License
// All rights reserved.

//! # Error Types for the AMQP Datasource
//!
//! This module provides the error type shared by connection, channel,
//! topology and consumer operations. Argument and configuration errors are
//! raised synchronously before any I/O is attempted; transport errors carry
//! the underlying driver failure text and propagate unmodified except during
//! teardown, where they are logged and swallowed so shutdown always
//! completes.

use thiserror::Error;

/// Represents errors that can occur during AMQP operations.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum AmqpError {
    /// No transport could be resolved from the configured scheme
    #[error("no driver registered for scheme `{0}`")]
    UnresolvedDriver(String),

    /// A connection is already registered for the virtual host
    #[error("a connection for vhost `{0}` is already registered")]
    VhostInUse(String),

    /// A caller-supplied option failed validation before any driver call
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// A delivery arrived without a consumer tag to route by
    #[error("delivery carries no consumer tag")]
    MissingConsumerTag,

    /// A delivery carried a consumer tag with no matching registration
    #[error("no consumer registered for tag `{0}`")]
    UnknownConsumer(String),

    /// A consumer registration collided with an existing tag
    #[error("consumer tag `{0}` is already registered")]
    ConsumerTagInUse(String),

    /// The polling consumer was asked to consume after `close()`
    #[error("consumer is closed and cannot receive any more messages")]
    ConsumerClosed,

    /// A registered message handler reported a failure
    #[error("handler failure: {0}")]
    Handler(String),

    /// A failure reported by the underlying AMQP driver
    #[error("transport failure: {0}")]
    Transport(String),
}
