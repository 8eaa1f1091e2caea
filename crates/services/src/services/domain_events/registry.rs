//! Topic to handler mapping, built once at startup.

use std::{collections::HashMap, sync::Arc};

use tokio::sync::Mutex;
use tracing::{debug, warn};

use super::EventHandler;

/// A handler as stored in the registry.
#[derive(Clone)]
pub struct RegisteredHandler {
    pub handler: Arc<dyn EventHandler>,
    /// Present for stateful handlers. Shared by every topic the same
    /// instance is registered under.
    pub(crate) serial: Option<Arc<Mutex<()>>>,
}

impl RegisteredHandler {
    pub fn name(&self) -> &'static str {
        self.handler.name()
    }
}

/// Read-only after `HandlerRegistryBuilder::build`.
#[derive(Default)]
pub struct HandlerRegistry {
    topics: HashMap<String, Vec<RegisteredHandler>>,
}

impl HandlerRegistry {
    pub fn builder() -> HandlerRegistryBuilder {
        HandlerRegistryBuilder::new()
    }

    /// Handlers for `topic` in registration order; empty for unknown topics.
    pub fn lookup(&self, topic: &str) -> &[RegisteredHandler] {
        self.topics.get(topic).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn topics(&self) -> impl Iterator<Item = &str> {
        self.topics.keys().map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.topics.is_empty()
    }
}

#[derive(Default)]
pub struct HandlerRegistryBuilder {
    entries: Vec<(String, Arc<dyn EventHandler>)>,
}

impl HandlerRegistryBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<H: EventHandler + 'static>(self, topic: &str, handler: H) -> Self {
        self.register_shared(topic, Arc::new(handler))
    }

    /// Registers an existing instance, so one handler can serve several topics.
    pub fn register_shared(mut self, topic: &str, handler: Arc<dyn EventHandler>) -> Self {
        let duplicate = self
            .entries
            .iter()
            .any(|(t, h)| t == topic && Arc::ptr_eq(h, &handler));
        if duplicate {
            warn!(
                handler = handler.name(),
                topic, "Handler already registered on topic, skipping"
            );
            return self;
        }
        self.entries.push((topic.to_string(), handler));
        self
    }

    pub fn build(self) -> HandlerRegistry {
        // One lock per stateful instance, however many topics it serves.
        let mut locks: Vec<(Arc<dyn EventHandler>, Arc<Mutex<()>>)> = Vec::new();
        let mut topics: HashMap<String, Vec<RegisteredHandler>> = HashMap::new();

        for (topic, handler) in self.entries {
            let serial = if handler.is_stateful() {
                let existing = locks
                    .iter()
                    .find(|(h, _)| Arc::ptr_eq(h, &handler))
                    .map(|(_, lock)| Arc::clone(lock));
                Some(existing.unwrap_or_else(|| {
                    let lock = Arc::new(Mutex::new(()));
                    locks.push((Arc::clone(&handler), Arc::clone(&lock)));
                    lock
                }))
            } else {
                None
            };

            debug!(handler = handler.name(), topic = %topic, "Registered handler");
            topics
                .entry(topic)
                .or_default()
                .push(RegisteredHandler { handler, serial });
        }

        HandlerRegistry { topics }
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;

    use super::*;
    use crate::services::domain_events::{DomainEvent, HandlerContext, HandlerError};

    struct Named {
        name: &'static str,
        stateful: bool,
    }

    #[async_trait]
    impl EventHandler for Named {
        fn name(&self) -> &'static str {
            self.name
        }

        fn is_stateful(&self) -> bool {
            self.stateful
        }

        async fn handle(
            &self,
            _event: &DomainEvent,
            _ctx: &HandlerContext,
        ) -> Result<(), HandlerError> {
            Ok(())
        }
    }

    fn named(name: &'static str, stateful: bool) -> Named {
        Named { name, stateful }
    }

    #[test]
    fn test_lookup_preserves_registration_order() {
        let registry = HandlerRegistry::builder()
            .register("A", named("first", false))
            .register("A", named("second", false))
            .register("B", named("other", false))
            .build();

        let names: Vec<_> = registry.lookup("A").iter().map(|h| h.name()).collect();
        assert_eq!(names, vec!["first", "second"]);
        assert_eq!(registry.lookup("B").len(), 1);
    }

    #[test]
    fn test_unknown_topic_is_empty() {
        let registry = HandlerRegistry::builder().build();
        assert!(registry.is_empty());
        assert!(registry.lookup("NOPE").is_empty());
    }

    #[test]
    fn test_shared_stateful_instance_gets_one_lock() {
        let shared: Arc<dyn EventHandler> = Arc::new(named("mailer", true));
        let registry = HandlerRegistry::builder()
            .register_shared("A", Arc::clone(&shared))
            .register_shared("B", Arc::clone(&shared))
            .register("A", named("plain", false))
            .build();

        let a = registry.lookup("A")[0].serial.clone().unwrap();
        let b = registry.lookup("B")[0].serial.clone().unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert!(registry.lookup("A")[1].serial.is_none());
    }

    #[test]
    fn test_duplicate_registration_on_same_topic_is_skipped() {
        let shared: Arc<dyn EventHandler> = Arc::new(named("mailer", false));
        let registry = HandlerRegistry::builder()
            .register_shared("A", Arc::clone(&shared))
            .register_shared("A", Arc::clone(&shared))
            .build();
        assert_eq!(registry.lookup("A").len(), 1);
    }
}
