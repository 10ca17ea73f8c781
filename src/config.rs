//! Messaging configuration
//!
//! Producer and consumer settings shared by every provider. Provider-specific
//! connection settings live with the provider (e.g. `NatsConfig`).

use crate::error::{EventError, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Producer acknowledgement level
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Acks {
    /// Fire and forget
    None,
    /// Leader only
    Leader,
    /// Every in-sync replica must confirm
    #[default]
    All,
}

/// Where a consumer group starts on its first run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum OffsetReset {
    /// Replay all retained history
    #[default]
    Earliest,
    /// Only records published after the group is created
    Latest,
}

/// Producer settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ProducerOptions {
    /// Required acknowledgement level
    pub acks: Acks,

    /// Send timeout in milliseconds; a publish not acked in time has failed
    pub publish_timeout_ms: u64,
}

impl Default for ProducerOptions {
    fn default() -> Self {
        Self {
            acks: Acks::All,
            publish_timeout_ms: 30_000,
        }
    }
}

impl ProducerOptions {
    pub fn publish_timeout(&self) -> Duration {
        Duration::from_millis(self.publish_timeout_ms)
    }

    /// Reject settings that would let a publish succeed without the broker
    /// holding the event on every in-sync replica
    pub fn validate(&self) -> Result<()> {
        if self.acks != Acks::All {
            return Err(EventError::Config(format!(
                "producer acks must be All, got {:?}",
                self.acks
            )));
        }
        non_zero("publish timeout", self.publish_timeout_ms)
    }
}

/// Consumer settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ConsumerOptions {
    /// Consumer group joined by this service instance
    pub group_id: String,

    /// Start position for a new group
    pub auto_offset_reset: OffsetReset,

    /// Must stay `false`: offsets are committed only after a handler succeeds
    pub enable_auto_commit: bool,

    /// How long a single poll waits for a record
    pub poll_timeout_ms: u64,

    /// Deliveries of one record before it is dead-lettered
    pub max_deliveries: u64,

    /// Upper bound on one handler invocation
    pub handler_timeout_ms: u64,

    /// How long shutdown waits for in-flight handlers
    pub shutdown_timeout_ms: u64,
}

impl Default for ConsumerOptions {
    fn default() -> Self {
        Self {
            group_id: "pms-service-group".to_string(),
            auto_offset_reset: OffsetReset::Earliest,
            enable_auto_commit: false,
            poll_timeout_ms: 1_000,
            max_deliveries: 5,
            handler_timeout_ms: 30_000,
            shutdown_timeout_ms: 10_000,
        }
    }
}

impl ConsumerOptions {
    pub fn poll_timeout(&self) -> Duration {
        Duration::from_millis(self.poll_timeout_ms)
    }

    pub fn handler_timeout(&self) -> Duration {
        Duration::from_millis(self.handler_timeout_ms)
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_millis(self.shutdown_timeout_ms)
    }

    /// Reject settings that would commit unhandled records or give up on
    /// every record immediately
    pub fn validate(&self) -> Result<()> {
        if self.group_id.trim().is_empty() {
            return Err(EventError::Config("consumer group id cannot be empty".to_string()));
        }
        if self.enable_auto_commit {
            return Err(EventError::Config(
                "auto-commit must be disabled; offsets are committed after handling".to_string(),
            ));
        }
        non_zero("poll timeout", self.poll_timeout_ms)?;
        non_zero("handler timeout", self.handler_timeout_ms)?;
        non_zero("max deliveries", self.max_deliveries)
    }
}

/// Top-level messaging configuration for one service
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct MessagingConfig {
    /// Identifies this service to the broker
    pub client_id: String,

    pub producer: ProducerOptions,

    pub consumer: ConsumerOptions,
}

impl Default for MessagingConfig {
    fn default() -> Self {
        Self {
            client_id: "pms-service".to_string(),
            producer: ProducerOptions::default(),
            consumer: ConsumerOptions::default(),
        }
    }
}

impl MessagingConfig {
    /// Defaults for a named service: client id `<service>`, group `<service>-group`
    pub fn for_service(service: &str) -> Self {
        Self {
            client_id: service.to_string(),
            consumer: ConsumerOptions {
                group_id: format!("{}-group", service),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    /// Overlay `PMS_*` environment variables on top of `self`
    pub fn with_env(self) -> Result<Self> {
        self.with_lookup(|key| std::env::var(key).ok())
    }

    /// Overlay values from an arbitrary key lookup (same keys as `with_env`)
    pub fn with_lookup(mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        if let Some(v) = lookup("PMS_CLIENT_ID") {
            self.client_id = v;
        }
        if let Some(v) = lookup("PMS_CONSUMER_GROUP") {
            self.consumer.group_id = v;
        }
        if let Some(v) = lookup("PMS_PUBLISH_TIMEOUT_MS") {
            self.producer.publish_timeout_ms = parse_u64("PMS_PUBLISH_TIMEOUT_MS", &v)?;
        }
        if let Some(v) = lookup("PMS_POLL_TIMEOUT_MS") {
            self.consumer.poll_timeout_ms = parse_u64("PMS_POLL_TIMEOUT_MS", &v)?;
        }
        if let Some(v) = lookup("PMS_MAX_DELIVERIES") {
            self.consumer.max_deliveries = parse_u64("PMS_MAX_DELIVERIES", &v)?;
        }
        if let Some(v) = lookup("PMS_HANDLER_TIMEOUT_MS") {
            self.consumer.handler_timeout_ms = parse_u64("PMS_HANDLER_TIMEOUT_MS", &v)?;
        }
        Ok(self)
    }

    /// Reject settings that would break delivery guarantees
    pub fn validate(&self) -> Result<()> {
        if self.client_id.trim().is_empty() {
            return Err(EventError::Config("client id cannot be empty".to_string()));
        }
        self.producer.validate()?;
        self.consumer.validate()
    }
}

fn non_zero(name: &str, value: u64) -> Result<()> {
    if value == 0 {
        return Err(EventError::Config(format!("{} must be greater than zero", name)));
    }
    Ok(())
}

fn parse_u64(key: &str, value: &str) -> Result<u64> {
    value
        .trim()
        .parse()
        .map_err(|e| EventError::Config(format!("{}={:?} is not a number: {}", key, value, e)))
}
