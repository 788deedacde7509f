// Copyright (c) 2025, The Amqp Datasource Authors
// MIT License
// All rights reserved.

//! # Consumer Registry
//!
//! Maps a consumer tag to the queue and handler it was registered for, so
//! inbound deliveries can be routed back to the correct application handler.
//! Each registry is private to its owning connection.

use crate::errors::AmqpError;
use crate::message::Delivery;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use uuid::Uuid;

/// Handler invoked for every delivery routed to its consumer tag.
#[async_trait]
pub trait ConsumerHandler: Send + Sync {
    async fn handle(&self, delivery: Delivery) -> Result<(), AmqpError>;
}

/// Behavior when a registration collides with an existing tag.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum TagCollision {
    /// Overwrite the existing registration (historical behavior)
    #[default]
    Replace,
    /// Fail with [`AmqpError::ConsumerTagInUse`]
    Reject,
}

/// A registered consumer: the queue it was bound to and its handler.
#[derive(Clone)]
pub struct ConsumerRegistration {
    pub queue: String,
    pub handler: Arc<dyn ConsumerHandler>,
}

/// Tag -> registration map with tag generation on demand.
#[derive(Clone, Default)]
pub struct ConsumerRegistry {
    inner: Arc<Mutex<HashMap<String, ConsumerRegistration>>>,
}

impl ConsumerRegistry {
    pub fn new() -> Self {
        ConsumerRegistry::default()
    }

    /// Stores a registration, generating a random tag when none is supplied.
    /// Returns the effective tag along with the registration it displaced,
    /// if any, so callers can reinstate it when the driver-side subscription
    /// fails.
    pub fn set_consumer(
        &self,
        tag: Option<String>,
        queue: &str,
        handler: Arc<dyn ConsumerHandler>,
        collision: TagCollision,
    ) -> Result<(String, Option<ConsumerRegistration>), AmqpError> {
        let tag = match tag {
            Some(tag) if !tag.is_empty() => tag,
            _ => Uuid::new_v4().to_string(),
        };

        let mut consumers = self.inner.lock().unwrap();

        if collision == TagCollision::Reject && consumers.contains_key(&tag) {
            return Err(AmqpError::ConsumerTagInUse(tag));
        }

        let displaced = consumers.insert(
            tag.clone(),
            ConsumerRegistration {
                queue: queue.to_owned(),
                handler,
            },
        );

        Ok((tag, displaced))
    }

    /// Removes a registration; absent tags are a no-op.
    pub fn unset_consumer(&self, tag: &str) {
        self.inner.lock().unwrap().remove(tag);
    }

    /// Looks up a registration. Not-found is a recoverable result, letting
    /// the dispatch path log and drop deliveries for orphaned tags.
    pub fn get_consumer(&self, tag: &str) -> Option<ConsumerRegistration> {
        self.inner.lock().unwrap().get(tag).cloned()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().unwrap().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct NoopHandler;

    #[async_trait]
    impl ConsumerHandler for NoopHandler {
        async fn handle(&self, _delivery: Delivery) -> Result<(), AmqpError> {
            Ok(())
        }
    }

    fn handler() -> Arc<dyn ConsumerHandler> {
        Arc::new(NoopHandler)
    }

    #[test]
    fn generates_unique_tags_when_absent() {
        let registry = ConsumerRegistry::new();

        let (first, _) = registry
            .set_consumer(None, "jobs", handler(), TagCollision::Replace)
            .unwrap();
        let (second, _) = registry
            .set_consumer(None, "jobs", handler(), TagCollision::Replace)
            .unwrap();

        assert!(!first.is_empty());
        assert!(!second.is_empty());
        assert_ne!(first, second);
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn keeps_explicit_tags() {
        let registry = ConsumerRegistry::new();

        let (tag, displaced) = registry
            .set_consumer(
                Some("worker-1".to_owned()),
                "jobs",
                handler(),
                TagCollision::Replace,
            )
            .unwrap();

        assert_eq!(tag, "worker-1");
        assert!(displaced.is_none());
        assert_eq!(registry.get_consumer("worker-1").unwrap().queue, "jobs");
    }

    #[test]
    fn unset_removes_only_the_given_tag() {
        let registry = ConsumerRegistry::new();
        registry
            .set_consumer(Some("a".to_owned()), "q1", handler(), TagCollision::Replace)
            .unwrap();
        registry
            .set_consumer(Some("b".to_owned()), "q2", handler(), TagCollision::Replace)
            .unwrap();

        registry.unset_consumer("a");

        assert!(registry.get_consumer("a").is_none());
        assert_eq!(registry.get_consumer("b").unwrap().queue, "q2");

        // absent tags are a no-op
        registry.unset_consumer("a");
    }

    #[test]
    fn replace_mode_overwrites_and_returns_the_displaced_registration() {
        let registry = ConsumerRegistry::new();
        registry
            .set_consumer(Some("t".to_owned()), "old", handler(), TagCollision::Replace)
            .unwrap();
        let (_, displaced) = registry
            .set_consumer(Some("t".to_owned()), "new", handler(), TagCollision::Replace)
            .unwrap();

        assert_eq!(registry.len(), 1);
        assert_eq!(registry.get_consumer("t").unwrap().queue, "new");
        assert_eq!(displaced.unwrap().queue, "old");
    }

    #[test]
    fn reject_mode_fails_on_collision() {
        let registry = ConsumerRegistry::new();
        registry
            .set_consumer(Some("t".to_owned()), "old", handler(), TagCollision::Reject)
            .unwrap();

        let err = registry
            .set_consumer(Some("t".to_owned()), "new", handler(), TagCollision::Reject)
            .err()
            .unwrap();

        assert_eq!(err, AmqpError::ConsumerTagInUse("t".to_owned()));
        assert_eq!(registry.get_consumer("t").unwrap().queue, "old");
    }
}
