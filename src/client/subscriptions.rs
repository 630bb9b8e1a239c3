//! Topic filters and message dispatch
//!
//! Only one wildcard form is understood: a `#` as the final character, which
//! matches any topic starting with the rest of the filter. `+` and a `#`
//! anywhere else are plain characters.

use crate::protocol::packet::QoS;
use std::fmt;

/// Receives `(topic, payload)` for every matching inbound PUBLISH
pub type MessageHandler = Box<dyn FnMut(&str, &[u8]) + Send>;

const MULTI_LEVEL_WILDCARD: char = '#';

/// A parsed subscription filter
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopicFilter {
    raw: String,
    prefix: String,
    wildcard: bool,
}

impl TopicFilter {
    pub fn parse(filter: &str) -> Self {
        match filter.strip_suffix(MULTI_LEVEL_WILDCARD) {
            Some(prefix) => Self {
                raw: filter.to_string(),
                prefix: prefix.to_string(),
                wildcard: true,
            },
            None => Self {
                raw: filter.to_string(),
                prefix: filter.to_string(),
                wildcard: false,
            },
        }
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    pub fn is_wildcard(&self) -> bool {
        self.wildcard
    }

    /// Exact equality, or a literal prefix match for a trailing `#`
    pub fn matches(&self, topic: &str) -> bool {
        self.raw == topic || (self.wildcard && topic.starts_with(&self.prefix))
    }
}

impl fmt::Display for TopicFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

/// One registered filter and its handler
pub struct Subscription {
    pub filter: TopicFilter,
    pub qos: QoS,
    handler: MessageHandler,
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("filter", &self.filter)
            .field("qos", &self.qos)
            .finish_non_exhaustive()
    }
}

/// Registered subscriptions in registration order
#[derive(Debug, Default)]
pub struct SubscriptionRegistry {
    entries: Vec<Subscription>,
}

impl SubscriptionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a filter. Subscribing to a filter already present swaps its
    /// handler and QoS but keeps its position.
    pub fn subscribe(&mut self, filter: &str, qos: QoS, handler: MessageHandler) {
        if let Some(existing) = self.entries.iter_mut().find(|s| s.filter.as_str() == filter) {
            existing.qos = qos;
            existing.handler = handler;
            return;
        }
        self.entries.push(Subscription {
            filter: TopicFilter::parse(filter),
            qos,
            handler,
        });
    }

    /// Deliver to every matching handler in registration order; returns how
    /// many were called.
    pub fn dispatch(&mut self, topic: &str, payload: &[u8]) -> usize {
        let mut delivered = 0;
        for subscription in &mut self.entries {
            if subscription.filter.matches(topic) {
                (subscription.handler)(topic, payload);
                delivered += 1;
            }
        }
        delivered
    }

    pub fn contains(&self, filter: &str) -> bool {
        self.entries.iter().any(|s| s.filter.as_str() == filter)
    }

    pub fn filters(&self) -> impl Iterator<Item = &TopicFilter> {
        self.entries.iter().map(|s| &s.filter)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}
