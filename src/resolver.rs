//! Topic-name resolution
//!
//! Producers and consumers compute the topic for an event type independently,
//! so the mapping must be pure and identical on both sides.

use crate::event::IntegrationEvent;

/// Maps an event type name to the topic it is published on
pub trait NameResolver: Send + Sync {
    /// Resolve the topic for a raw type name
    fn resolve(&self, type_name: &str) -> String;

    /// Resolve the topic for a concrete event type
    fn resolve_for<E: IntegrationEvent>(&self) -> String
    where
        Self: Sized,
    {
        self.resolve(E::EVENT_TYPE)
    }
}

/// Default resolver: `SiteCreatedEvent` → `site-created`
///
/// Drops any module path, strips one trailing `Event`, inserts `-` where a
/// lowercase letter is followed by an uppercase one, then lowercases.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultNameResolver;

impl NameResolver for DefaultNameResolver {
    fn resolve(&self, type_name: &str) -> String {
        resolve_topic(type_name)
    }
}

/// Resolve a topic name using the default rule
pub fn resolve_topic(type_name: &str) -> String {
    let name = type_name.rsplit("::").next().unwrap_or(type_name);
    let name = name.strip_suffix("Event").unwrap_or(name);

    let mut topic = String::with_capacity(name.len() + 4);
    let mut prev_lower = false;
    for ch in name.chars() {
        if prev_lower && ch.is_ascii_uppercase() {
            topic.push('-');
        }
        prev_lower = ch.is_ascii_lowercase();
        topic.extend(ch.to_lowercase());
    }
    topic
}
