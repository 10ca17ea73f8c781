//! JSON wire codec for integration events
//!
//! camelCase field names, `None` fields omitted (declared per contract),
//! timestamps as RFC 3339 UTC.

use crate::error::{EventError, Result};
use crate::event::IntegrationEvent;
use serde::de::DeserializeOwned;
use serde::Serialize;

/// Pluggable message serializer
pub trait MessageSerializer: Send + Sync {
    /// Encode a value to bytes
    fn serialize<T: Serialize>(&self, value: &T) -> Result<Vec<u8>>;

    /// Decode bytes into a value
    fn deserialize<T: DeserializeOwned>(&self, bytes: &[u8]) -> Result<T>;
}

/// JSON serializer used on the wire
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonSerializer;

impl MessageSerializer for JsonSerializer {
    fn serialize<T: Serialize>(&self, value: &T) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(value)?)
    }

    fn deserialize<T: DeserializeOwned>(&self, bytes: &[u8]) -> Result<T> {
        Ok(serde_json::from_slice(bytes)?)
    }
}

/// Encode an event to its JSON wire form
pub fn encode<E: IntegrationEvent>(event: &E) -> Result<Vec<u8>> {
    JsonSerializer.serialize(event)
}

/// Decode an event from its JSON wire form
///
/// Failures are reported as [`EventError::Deserialization`] so consumers can
/// treat them as poison records.
pub fn decode<E: IntegrationEvent>(bytes: &[u8]) -> Result<E> {
    JsonSerializer
        .deserialize(bytes)
        .map_err(|e| EventError::Deserialization {
            event_type: E::EVENT_TYPE.to_string(),
            reason: e.to_string(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::contracts::{BookingCreatedEvent, SiteCreatedEvent};
    use chrono::{Duration, Utc};
    use uuid::Uuid;

    #[test]
    fn test_site_roundtrip() {
        let parent = SiteCreatedEvent::builder(Uuid::new_v4(), "Lot A", "موقف أ", "/lot-a").build();
        let leaf = SiteCreatedEvent::builder(Uuid::new_v4(), "Row 1", "صف 1", "/lot-a/row-1")
            .leaf(12.5, "INT-7", 25)
            .build();

        for event in [parent, leaf] {
            let decoded: SiteCreatedEvent = decode(&encode(&event).unwrap()).unwrap();
            assert_eq!(decoded, event);
        }
    }

    #[test]
    fn test_booking_roundtrip() {
        let from = Utc::now();
        let event = BookingCreatedEvent::new(
            Uuid::new_v4(),
            "Lot A",
            "XYZ-987",
            "+966500000000",
            from,
            from + Duration::minutes(90),
            17.25,
        );

        let decoded: BookingCreatedEvent = decode(&encode(&event).unwrap()).unwrap();
        assert_eq!(decoded, event);
        assert_eq!(decoded.event_id(), event.event_id());
        assert_eq!(decoded.occurred_at_utc(), event.occurred_at_utc());
    }

    #[test]
    fn test_prices_roundtrip_exactly() {
        let from = Utc::now();
        let mut prices = vec![0.9624999999999999, 0.1 + 0.2, 1.0 / 3.0, 12.35, 99.99 * 1.15];
        for quarter_hours in 1..60 {
            for rate in 1..60 {
                prices.push(quarter_hours as f64 * (rate as f64 * 0.35));
            }
        }

        for price in prices {
            let event = BookingCreatedEvent::new(
                Uuid::new_v4(),
                "Lot A",
                "XYZ-987",
                "+966500000000",
                from,
                from + Duration::hours(1),
                price,
            );
            let decoded: BookingCreatedEvent = decode(&encode(&event).unwrap()).unwrap();
            assert_eq!(
                decoded.total_price().to_bits(),
                price.to_bits(),
                "price {:?} changed in transit",
                price
            );

            let site = SiteCreatedEvent::builder(Uuid::new_v4(), "Row 1", "صف 1", "/a/1")
                .leaf(price, "INT-7", 25)
                .build();
            let decoded: SiteCreatedEvent = decode(&encode(&site).unwrap()).unwrap();
            assert_eq!(decoded, site);
        }
    }

    #[test]
    fn test_decode_garbage_is_poison() {
        let err = decode::<SiteCreatedEvent>(b"{not json").unwrap_err();
        assert!(err.is_poison());
        assert!(err.to_string().contains("SiteCreatedEvent"));
    }

    #[test]
    fn test_decode_wrong_shape_is_poison() {
        let other = BookingCreatedEvent::new(
            Uuid::new_v4(),
            "Lot A",
            "AAA-1",
            "1",
            Utc::now(),
            Utc::now(),
            1.0,
        );
        let bytes = encode(&other).unwrap();
        let err = decode::<SiteCreatedEvent>(&bytes).unwrap_err();
        assert!(matches!(err, EventError::Deserialization { .. }));
    }

    #[test]
    fn test_serializer_is_camel_case() {
        let event = SiteCreatedEvent::builder(Uuid::new_v4(), "Lot A", "أ", "/a").build();
        let text = String::from_utf8(JsonSerializer.serialize(&event).unwrap()).unwrap();
        assert!(text.contains("\"occurredAtUtc\""));
        assert!(text.contains("\"nameAr\""));
        assert!(!text.contains("name_ar"));
    }
}
