// Copyright (c) 2025, The Amqp Datasource Authors
// MIT License
// All rights reserved.

//! # Message Types
//!
//! Outbound messages wrap a payload with AMQP properties and a header table;
//! deliveries wrap an inbound frame with its routing metadata. On delivery,
//! messages are enriched with the originating queue and any caller-supplied
//! static metadata before being handed to the registered handler.

use crate::types::FieldTable;
use std::collections::BTreeMap;

/// Messages survive a broker restart.
pub const DELIVERY_MODE_PERSISTENT: u8 = 2;
/// Messages are held in memory only.
pub const DELIVERY_MODE_TRANSIENT: u8 = 1;

/// Header stamped on every published message unless explicitly overridden.
pub const ENVIRONMENT_HEADER: &str = "environment";

/// Caller-supplied static metadata merged into deliveries.
pub type Metadata = BTreeMap<String, String>;

/// AMQP message properties.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MessageProperties {
    pub content_type: Option<String>,
    pub content_encoding: Option<String>,
    /// 1 = transient, 2 = persistent; publishing defaults to persistent
    pub delivery_mode: Option<u8>,
    pub priority: Option<u8>,
    pub correlation_id: Option<String>,
    pub reply_to: Option<String>,
    pub expiration: Option<String>,
    pub message_id: Option<String>,
    pub timestamp: Option<u64>,
    /// Application-level message type (the AMQP `type` property)
    pub kind: Option<String>,
    pub user_id: Option<String>,
    pub app_id: Option<String>,
}

/// A message to be published, with its properties and headers.
#[derive(Debug, Clone, Default)]
pub struct OutboundMessage {
    pub payload: Vec<u8>,
    pub properties: MessageProperties,
    pub headers: FieldTable,
}

impl OutboundMessage {
    pub fn new(payload: impl Into<Vec<u8>>) -> Self {
        OutboundMessage {
            payload: payload.into(),
            properties: MessageProperties::default(),
            headers: FieldTable::default(),
        }
    }

    pub fn properties(mut self, properties: MessageProperties) -> Self {
        self.properties = properties;
        self
    }

    pub fn header(mut self, name: &str, value: impl Into<crate::types::FieldValue>) -> Self {
        self.headers.insert(name.to_owned(), value.into());
        self
    }
}

impl From<&str> for OutboundMessage {
    fn from(payload: &str) -> Self {
        OutboundMessage::new(payload.as_bytes().to_vec())
    }
}

impl From<String> for OutboundMessage {
    fn from(payload: String) -> Self {
        OutboundMessage::new(payload.into_bytes())
    }
}

impl From<Vec<u8>> for OutboundMessage {
    fn from(payload: Vec<u8>) -> Self {
        OutboundMessage::new(payload)
    }
}

impl From<&[u8]> for OutboundMessage {
    fn from(payload: &[u8]) -> Self {
        OutboundMessage::new(payload.to_vec())
    }
}

/// An inbound message with its delivery metadata.
#[derive(Debug, Clone, Default)]
pub struct Delivery {
    pub delivery_tag: u64,
    /// Tag of the server-push subscription this frame arrived on; `None` for
    /// pull-based `basic_get` deliveries
    pub consumer_tag: Option<String>,
    pub exchange: String,
    pub routing_key: String,
    pub redelivered: bool,
    /// Remaining queue depth as reported by `basic_get`, when known
    pub message_count: Option<u32>,
    /// Originating queue, stamped by the dispatch path
    pub queue: Option<String>,
    pub payload: Vec<u8>,
    pub properties: MessageProperties,
    pub headers: FieldTable,
    /// Static fields merged in by the polling consumer (correlation ids etc.)
    pub metadata: Metadata,
}
