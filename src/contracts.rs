//! Message contracts shared between the PMS services
//!
//! Field names and JSON shapes match what the Site and Booking services put
//! on the wire, including the historical `numberOfSolts` spelling.

use crate::event::{EventHeader, IntegrationEvent};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Raised by the Site service when a site (parent or leaf) is created
///
/// Booking keeps a local replica of sites from this event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SiteCreatedEvent {
    #[serde(flatten)]
    header: EventHeader,

    site_id: Uuid,
    name_en: String,
    name_ar: String,
    path: String,
    is_leaf: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    price_per_hour: Option<f64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    integration_code: Option<String>,

    #[serde(
        default,
        rename = "numberOfSolts",
        skip_serializing_if = "Option::is_none"
    )]
    number_of_slots: Option<i32>,
}

impl SiteCreatedEvent {
    /// Start building a site event; defaults to a non-leaf site
    pub fn builder(
        site_id: Uuid,
        name_en: impl Into<String>,
        name_ar: impl Into<String>,
        path: impl Into<String>,
    ) -> SiteCreatedEventBuilder {
        SiteCreatedEventBuilder {
            site_id,
            name_en: name_en.into(),
            name_ar: name_ar.into(),
            path: path.into(),
            leaf: None,
        }
    }

    pub fn site_id(&self) -> Uuid {
        self.site_id
    }

    pub fn name_en(&self) -> &str {
        &self.name_en
    }

    pub fn name_ar(&self) -> &str {
        &self.name_ar
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn is_leaf(&self) -> bool {
        self.is_leaf
    }

    pub fn price_per_hour(&self) -> Option<f64> {
        self.price_per_hour
    }

    pub fn integration_code(&self) -> Option<&str> {
        self.integration_code.as_deref()
    }

    pub fn number_of_slots(&self) -> Option<i32> {
        self.number_of_slots
    }
}

impl IntegrationEvent for SiteCreatedEvent {
    const EVENT_TYPE: &'static str = "SiteCreatedEvent";

    fn header(&self) -> &EventHeader {
        &self.header
    }
}

/// Builder for [`SiteCreatedEvent`]
#[derive(Debug, Clone)]
pub struct SiteCreatedEventBuilder {
    site_id: Uuid,
    name_en: String,
    name_ar: String,
    path: String,
    leaf: Option<(f64, String, i32)>,
}

impl SiteCreatedEventBuilder {
    /// Mark the site as a bookable leaf with pricing and capacity
    pub fn leaf(
        mut self,
        price_per_hour: f64,
        integration_code: impl Into<String>,
        number_of_slots: i32,
    ) -> Self {
        self.leaf = Some((price_per_hour, integration_code.into(), number_of_slots));
        self
    }

    /// Build the event, stamping a fresh id and timestamp
    pub fn build(self) -> SiteCreatedEvent {
        let is_leaf = self.leaf.is_some();
        let (price_per_hour, integration_code, number_of_slots) = match self.leaf {
            Some((price, code, slots)) => (Some(price), Some(code), Some(slots)),
            None => (None, None, None),
        };

        SiteCreatedEvent {
            header: EventHeader::new(),
            site_id: self.site_id,
            name_en: self.name_en,
            name_ar: self.name_ar,
            path: self.path,
            is_leaf,
            price_per_hour,
            integration_code,
            number_of_slots,
        }
    }
}

/// Raised by the Booking service when a parking ticket is booked
///
/// Invoice generates exactly one invoice per ticket from this event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BookingCreatedEvent {
    #[serde(flatten)]
    header: EventHeader,

    /// Ticket id
    id: Uuid,
    site_name: String,
    plate_number: String,
    phone_number: String,
    booking_from: DateTime<Utc>,
    booking_to: DateTime<Utc>,
    total_price: f64,
}

impl BookingCreatedEvent {
    pub fn new(
        ticket_id: Uuid,
        site_name: impl Into<String>,
        plate_number: impl Into<String>,
        phone_number: impl Into<String>,
        booking_from: DateTime<Utc>,
        booking_to: DateTime<Utc>,
        total_price: f64,
    ) -> Self {
        Self {
            header: EventHeader::new(),
            id: ticket_id,
            site_name: site_name.into(),
            plate_number: plate_number.into(),
            phone_number: phone_number.into(),
            booking_from,
            booking_to,
            total_price,
        }
    }

    pub fn ticket_id(&self) -> Uuid {
        self.id
    }

    pub fn site_name(&self) -> &str {
        &self.site_name
    }

    pub fn plate_number(&self) -> &str {
        &self.plate_number
    }

    pub fn phone_number(&self) -> &str {
        &self.phone_number
    }

    pub fn booking_from(&self) -> DateTime<Utc> {
        self.booking_from
    }

    pub fn booking_to(&self) -> DateTime<Utc> {
        self.booking_to
    }

    pub fn total_price(&self) -> f64 {
        self.total_price
    }
}

impl IntegrationEvent for BookingCreatedEvent {
    const EVENT_TYPE: &'static str = "BookingCreatedEvent";

    fn header(&self) -> &EventHeader {
        &self.header
    }
}
