//! Integration event contract
//!
//! Every event carries an [`EventHeader`] (identity + UTC timestamp) that is
//! flattened into its JSON body. [`StagedEvent`] erases the concrete type so
//! one staging queue can hold any mix of events.

use crate::codec;
use crate::error::Result;
use crate::resolver::resolve_topic;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::fmt;
use std::sync::Arc;
use uuid::Uuid;

/// Identity and timestamp shared by all integration events
///
/// Set once at construction; receivers use `event_id` to recognise
/// redelivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventHeader {
    /// Globally unique event identifier
    pub event_id: Uuid,

    /// When the event was raised (UTC)
    pub occurred_at_utc: DateTime<Utc>,
}

impl EventHeader {
    /// Create a header with a fresh id and the current UTC time
    pub fn new() -> Self {
        Self {
            event_id: Uuid::new_v4(),
            occurred_at_utc: Utc::now(),
        }
    }
}

impl Default for EventHeader {
    fn default() -> Self {
        Self::new()
    }
}

/// A typed integration event exchanged between services
///
/// `EVENT_TYPE` is the stable tag used for topic resolution and handler
/// dispatch; it must be unique across the system.
///
/// ```rust
/// use pms_event::{EventHeader, IntegrationEvent};
/// use serde::{Deserialize, Serialize};
///
/// #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
/// #[serde(rename_all = "camelCase")]
/// struct TicketClosedEvent {
///     #[serde(flatten)]
///     header: EventHeader,
///     ticket_id: uuid::Uuid,
/// }
///
/// impl IntegrationEvent for TicketClosedEvent {
///     const EVENT_TYPE: &'static str = "TicketClosedEvent";
///     fn header(&self) -> &EventHeader {
///         &self.header
///     }
/// }
///
/// assert_eq!(TicketClosedEvent::topic(), "ticket-closed");
/// ```
pub trait IntegrationEvent:
    Serialize + DeserializeOwned + fmt::Debug + Clone + Send + Sync + 'static
{
    /// Stable type tag (e.g. `"SiteCreatedEvent"`)
    const EVENT_TYPE: &'static str;

    /// The event's identity header
    fn header(&self) -> &EventHeader;

    /// Unique event id
    fn event_id(&self) -> Uuid {
        self.header().event_id
    }

    /// UTC timestamp at construction
    fn occurred_at_utc(&self) -> DateTime<Utc> {
        self.header().occurred_at_utc
    }

    /// Topic derived from `EVENT_TYPE` with the default resolver
    fn topic() -> String {
        resolve_topic(Self::EVENT_TYPE)
    }
}

/// Object-safe view of an integration event
trait ErasedEvent: Send + Sync {
    fn header(&self) -> &EventHeader;
    fn event_type(&self) -> &'static str;
    fn encode(&self) -> Result<Vec<u8>>;
    fn as_any(&self) -> &dyn Any;
    fn debug(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result;
}

impl<E: IntegrationEvent> ErasedEvent for E {
    fn header(&self) -> &EventHeader {
        IntegrationEvent::header(self)
    }

    fn event_type(&self) -> &'static str {
        E::EVENT_TYPE
    }

    fn encode(&self) -> Result<Vec<u8>> {
        codec::encode(self)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn debug(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// A type-erased event waiting in a staging queue
///
/// Cheap to clone; the event itself is shared and never mutated.
#[derive(Clone)]
pub struct StagedEvent {
    inner: Arc<dyn ErasedEvent>,
}

impl StagedEvent {
    /// Wrap a concrete event
    pub fn new<E: IntegrationEvent>(event: E) -> Self {
        Self {
            inner: Arc::new(event),
        }
    }

    /// Unique event id
    pub fn event_id(&self) -> Uuid {
        self.inner.header().event_id
    }

    /// UTC timestamp at construction
    pub fn occurred_at_utc(&self) -> DateTime<Utc> {
        self.inner.header().occurred_at_utc
    }

    /// Stable type tag of the wrapped event
    pub fn event_type(&self) -> &'static str {
        self.inner.event_type()
    }

    /// Topic derived from the type tag with the default resolver
    pub fn topic(&self) -> String {
        resolve_topic(self.event_type())
    }

    /// Serialize the wrapped event to its JSON wire form
    pub fn encode(&self) -> Result<Vec<u8>> {
        self.inner.encode()
    }

    /// Borrow the concrete event if it is an `E`
    pub fn downcast_ref<E: IntegrationEvent>(&self) -> Option<&E> {
        self.inner.as_any().downcast_ref::<E>()
    }
}

impl<E: IntegrationEvent> From<E> for StagedEvent {
    fn from(event: E) -> Self {
        Self::new(event)
    }
}

impl fmt::Debug for StagedEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.inner.debug(f)
    }
}
