//! NATS JetStream connection and stream settings

use crate::config::MessagingConfig;
use serde::{Deserialize, Serialize};

/// JetStream storage backend
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum StorageType {
    /// Persisted to disk
    #[default]
    File,
    /// Held in server memory
    Memory,
}

/// Configuration for the NATS provider
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct NatsConfig {
    /// Server URL
    pub url: String,

    /// Connection name reported to the server
    pub client_name: String,

    /// JetStream stream holding every PMS integration event
    pub stream_name: String,

    /// Subject prefix; a topic `t` is published on `<prefix>.t`
    pub subject_prefix: String,

    pub storage: StorageType,

    /// Stream replicas; a publish is acked once all of them have it
    pub replicas: usize,

    /// Maximum retained messages (-1 = unlimited)
    pub max_events: i64,

    /// Maximum message age in seconds (0 = unlimited)
    pub max_age_secs: u64,

    /// Maximum stream size in bytes (-1 = unlimited)
    pub max_bytes: i64,

    pub connect_timeout_secs: u64,

    pub request_timeout_secs: u64,

    /// Auth token
    pub token: Option<String>,

    /// How long the server waits for an ack before redelivering
    pub ack_wait_secs: u64,
}

impl Default for NatsConfig {
    fn default() -> Self {
        Self {
            url: "nats://127.0.0.1:4222".to_string(),
            client_name: "pms-event".to_string(),
            stream_name: "PMS_EVENTS".to_string(),
            subject_prefix: "pms.events".to_string(),
            storage: StorageType::File,
            replicas: 1,
            max_events: 1_000_000,
            max_age_secs: 7 * 24 * 3600,
            max_bytes: -1,
            connect_timeout_secs: 5,
            request_timeout_secs: 10,
            token: None,
            ack_wait_secs: 60,
        }
    }
}

impl NatsConfig {
    /// Take the connection name from the service's messaging settings
    pub fn with_messaging(mut self, messaging: &MessagingConfig) -> Self {
        self.client_name = messaging.client_id.clone();
        self
    }

    /// Subject a topic is published on
    pub fn subject(&self, topic: &str) -> String {
        format!("{}.{}", self.subject_prefix, topic)
    }

    /// Topic part of a subject under this prefix
    pub fn topic_of<'a>(&self, subject: &'a str) -> &'a str {
        subject
            .strip_prefix(self.subject_prefix.as_str())
            .and_then(|rest| rest.strip_prefix('.'))
            .unwrap_or(subject)
    }

    /// Subjects captured by the stream
    pub fn stream_subjects(&self) -> Vec<String> {
        vec![format!("{}.>", self.subject_prefix)]
    }

    /// Durable consumer name for a group reading one topic
    ///
    /// Characters NATS rejects in consumer names are replaced with `_`.
    pub fn consumer_name(group: &str, topic: &str) -> String {
        format!("{}-{}", group, topic)
            .chars()
            .map(|c| match c {
                '.' | '*' | '>' | '/' | '\\' => '_',
                c if c.is_whitespace() => '_',
                c => c,
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_subject_mapping() {
        let config = NatsConfig::default();
        assert_eq!(config.subject("site-created"), "pms.events.site-created");
        assert_eq!(config.topic_of("pms.events.site-created"), "site-created");
        assert_eq!(
            config.topic_of("pms.events.site-created.dead-letter"),
            "site-created.dead-letter"
        );
        assert_eq!(config.topic_of("other.subject"), "other.subject");
        assert_eq!(config.stream_subjects(), vec!["pms.events.>"]);
    }

    #[test]
    fn test_consumer_name_is_sanitised() {
        assert_eq!(
            NatsConfig::consumer_name("booking-group", "site-created"),
            "booking-group-site-created"
        );
        assert_eq!(
            NatsConfig::consumer_name("pms group", "site-created.dead-letter"),
            "pms_group-site-created_dead-letter"
        );
    }

    #[test]
    fn test_serde_defaults() {
        let config: NatsConfig =
            serde_json::from_str(r#"{"url":"nats://nats:4222","storage":"memory"}"#).unwrap();
        assert_eq!(config.url, "nats://nats:4222");
        assert_eq!(config.storage, StorageType::Memory);
        assert_eq!(config.stream_name, "PMS_EVENTS");
        assert_eq!(config.replicas, 1);
        assert_eq!(config.client_name, "pms-event");
    }

    #[test]
    fn test_client_name_from_messaging_config() {
        let messaging = MessagingConfig::for_service("booking-service");
        let config = NatsConfig::default().with_messaging(&messaging);
        assert_eq!(config.client_name, "booking-service");
        assert_eq!(config.url, NatsConfig::default().url);
    }
}
