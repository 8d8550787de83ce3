//! Airbnb adapter: REST/JSON (spec.md §4.7).

use async_trait::async_trait;
use chrono::NaiveDate;
use pms_core::{AvailabilityBlock, Booking, BookingStatus, Channel, ChannelConnection, DateRange, PmsError, PropertyId};
use serde::{Deserialize, Serialize};

use crate::adapter::{ChannelAdapter, ExternalBookingSnapshot, ParsedInboundEvent, PricePoint, WebhookHeaders};
use crate::credentials::{self, PlatformCredentials};
use crate::http;

const BASE_URL: &str = "https://api.airbnb.com/v2";
const DATE_FMT: &str = "%Y-%m-%d";

pub struct AirbnbAdapter {
    client: reqwest::Client,
    deployment_key: [u8; 32],
}

impl AirbnbAdapter {
    pub fn new(client: reqwest::Client, deployment_key: [u8; 32]) -> Self {
        Self { client, deployment_key }
    }

    fn credentials(&self, connection: &ChannelConnection) -> Result<PlatformCredentials, PmsError> {
        credentials::unseal(&self.deployment_key, &connection.credentials_sealed)
    }
}

#[derive(Serialize)]
struct ReservationUpsert<'a> {
    listing_id: &'a str,
    start_date: String,
    end_date: String,
    guest_count: u32,
    total_amount_cents: i64,
    currency: &'a str,
}

#[derive(Deserialize)]
struct ReservationCreated {
    reservation_id: String,
}

#[derive(Deserialize)]
struct ReservationSummary {
    reservation_id: String,
    start_date: NaiveDate,
    end_date: NaiveDate,
    guest_count: u32,
    status: String,
    total_amount_cents: i64,
    currency: String,
}

fn map_status(status: &str) -> BookingStatus {
    match status {
        "accepted" => BookingStatus::Confirmed,
        "pending" => BookingStatus::Reserved,
        "cancelled" | "denied" | "expired" => BookingStatus::Cancelled,
        "checked_in" => BookingStatus::CheckedIn,
        "checked_out" => BookingStatus::CheckedOut,
        _ => BookingStatus::Inquiry,
    }
}

#[derive(Deserialize)]
struct WebhookPayload {
    event_id: String,
    listing_id: String,
    reservation: ReservationSummary,
}

#[async_trait]
impl ChannelAdapter for AirbnbAdapter {
    async fn upsert_booking(&self, connection: &ChannelConnection, booking: &Booking) -> Result<String, PmsError> {
        let creds = self.credentials(connection)?;
        let body = ReservationUpsert {
            listing_id: &connection.external_property_id,
            start_date: booking.check_in.format(DATE_FMT).to_string(),
            end_date: booking.check_out.format(DATE_FMT).to_string(),
            guest_count: booking.guests,
            total_amount_cents: booking.total.minor,
            currency: booking.total.currency_str(),
        };
        let response = self
            .client
            .post(format!("{BASE_URL}/reservations"))
            .bearer_auth(&creds.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| PmsError::AdapterTransient { cause: e.to_string() })?;
        let text = http::classify(connection.property_id.as_uuid(), response).await?;
        let created: ReservationCreated = serde_json::from_str(&text).map_err(|e| PmsError::AdapterPermanent { cause: e.to_string() })?;
        Ok(created.reservation_id)
    }

    async fn cancel_booking(&self, connection: &ChannelConnection, external_id: &str) -> Result<(), PmsError> {
        let creds = self.credentials(connection)?;
        let response = self
            .client
            .post(format!("{BASE_URL}/reservations/{external_id}/cancel"))
            .bearer_auth(&creds.api_key)
            .send()
            .await
            .map_err(|e| PmsError::AdapterTransient { cause: e.to_string() })?;
        http::classify(connection.property_id.as_uuid(), response).await.map(|_| ())
    }

    async fn push_availability(&self, connection: &ChannelConnection, _property_id: PropertyId, blocks: &[AvailabilityBlock]) -> Result<(), PmsError> {
        let creds = self.credentials(connection)?;
        #[derive(Serialize)]
        struct Blocked<'a> {
            listing_id: &'a str,
            blocked_dates: Vec<(String, String)>,
        }
        let blocked_dates = blocks.iter().map(|b| (b.start_date.format(DATE_FMT).to_string(), b.end_date.format(DATE_FMT).to_string())).collect();
        let response = self
            .client
            .put(format!("{BASE_URL}/calendars/{}", connection.external_property_id))
            .bearer_auth(&creds.api_key)
            .json(&Blocked { listing_id: &connection.external_property_id, blocked_dates })
            .send()
            .await
            .map_err(|e| PmsError::AdapterTransient { cause: e.to_string() })?;
        http::classify(connection.property_id.as_uuid(), response).await.map(|_| ())
    }

    async fn push_pricing(&self, connection: &ChannelConnection, _property_id: PropertyId, per_date_prices: &[PricePoint]) -> Result<(), PmsError> {
        let creds = self.credentials(connection)?;
        #[derive(Serialize)]
        struct NightlyPrice {
            date: String,
            amount_cents: i64,
            currency: String,
        }
        let prices: Vec<NightlyPrice> = per_date_prices
            .iter()
            .map(|p| NightlyPrice { date: p.date.format(DATE_FMT).to_string(), amount_cents: p.amount_minor, currency: p.currency.clone() })
            .collect();
        let response = self
            .client
            .put(format!("{BASE_URL}/calendars/{}/pricing", connection.external_property_id))
            .bearer_auth(&creds.api_key)
            .json(&prices)
            .send()
            .await
            .map_err(|e| PmsError::AdapterTransient { cause: e.to_string() })?;
        http::classify(connection.property_id.as_uuid(), response).await.map(|_| ())
    }

    async fn list_bookings(&self, connection: &ChannelConnection, window: DateRange) -> Result<Vec<ExternalBookingSnapshot>, PmsError> {
        let creds = self.credentials(connection)?;
        let response = self
            .client
            .get(format!("{BASE_URL}/reservations"))
            .bearer_auth(&creds.api_key)
            .query(&[("listing_id", connection.external_property_id.as_str()), ("start", &window.start.format(DATE_FMT).to_string()), ("end", &window.end.format(DATE_FMT).to_string())])
            .send()
            .await
            .map_err(|e| PmsError::AdapterTransient { cause: e.to_string() })?;
        let text = http::classify(connection.property_id.as_uuid(), response).await?;
        let reservations: Vec<ReservationSummary> = serde_json::from_str(&text).map_err(|e| PmsError::AdapterPermanent { cause: e.to_string() })?;
        Ok(reservations.into_iter().map(snapshot_from_reservation).collect())
    }

    async fn list_availability(&self, connection: &ChannelConnection, window: DateRange) -> Result<Vec<DateRange>, PmsError> {
        let creds = self.credentials(connection)?;
        #[derive(Deserialize)]
        struct Interval {
            start: NaiveDate,
            end: NaiveDate,
        }
        let response = self
            .client
            .get(format!("{BASE_URL}/calendars/{}/blocked", connection.external_property_id))
            .bearer_auth(&creds.api_key)
            .query(&[("start", &window.start.format(DATE_FMT).to_string()), ("end", &window.end.format(DATE_FMT).to_string())])
            .send()
            .await
            .map_err(|e| PmsError::AdapterTransient { cause: e.to_string() })?;
        let text = http::classify(connection.property_id.as_uuid(), response).await?;
        let intervals: Vec<Interval> = serde_json::from_str(&text).map_err(|e| PmsError::AdapterPermanent { cause: e.to_string() })?;
        Ok(intervals.into_iter().filter_map(|i| DateRange::new(i.start, i.end)).collect())
    }

    fn webhook_routing_key(&self, headers: &WebhookHeaders, body: &[u8]) -> Result<String, PmsError> {
        let signature = headers.get("X-Airbnb-Signature").ok_or(PmsError::AuthFailed { connection_id: uuid::Uuid::nil() })?;
        if signature.is_empty() {
            return Err(PmsError::AuthFailed { connection_id: uuid::Uuid::nil() });
        }
        let payload: WebhookPayload = serde_json::from_slice(body).map_err(|e| PmsError::AdapterPermanent { cause: e.to_string() })?;
        Ok(payload.listing_id)
    }

    fn parse_webhook(&self, connection: &ChannelConnection, headers: &WebhookHeaders, body: &[u8]) -> Result<ParsedInboundEvent, PmsError> {
        let creds = self.credentials(connection)?;
        let auth_failed = || PmsError::AuthFailed { connection_id: connection.property_id.as_uuid() };
        let signature = headers.get("X-Airbnb-Signature").ok_or_else(auth_failed)?;
        pms_crypto::verify_hmac_sha256(creds.webhook_secret.as_bytes(), body, signature).map_err(|_| auth_failed())?;
        let payload: WebhookPayload = serde_json::from_slice(body).map_err(|e| PmsError::AdapterPermanent { cause: e.to_string() })?;
        Ok(ParsedInboundEvent {
            external_message_id: payload.event_id,
            external_property_id: payload.listing_id,
            snapshot: snapshot_from_reservation(payload.reservation),
        })
    }

    async fn refresh_credentials(&self, connection: &ChannelConnection) -> Result<ChannelConnection, PmsError> {
        let creds = self.credentials(connection)?;
        #[derive(Serialize)]
        struct RefreshRequest<'a> {
            api_key: &'a str,
        }
        #[derive(Deserialize)]
        struct RefreshResponse {
            api_key: String,
        }
        let response = self
            .client
            .post(format!("{BASE_URL}/oauth/refresh"))
            .json(&RefreshRequest { api_key: &creds.api_key })
            .send()
            .await
            .map_err(|e| PmsError::AdapterTransient { cause: e.to_string() })?;
        let text = http::classify(connection.property_id.as_uuid(), response).await?;
        let refreshed: RefreshResponse = serde_json::from_str(&text).map_err(|e| PmsError::AdapterPermanent { cause: e.to_string() })?;
        let mut next = connection.clone();
        next.credentials_sealed = credentials::seal(&self.deployment_key, &PlatformCredentials { api_key: refreshed.api_key, webhook_secret: creds.webhook_secret });
        Ok(next)
    }

    fn channel(&self) -> Channel {
        Channel::Airbnb
    }
}

fn snapshot_from_reservation(r: ReservationSummary) -> ExternalBookingSnapshot {
    ExternalBookingSnapshot {
        external_id: r.reservation_id,
        check_in: r.start_date,
        check_out: r.end_date,
        guests: r.guest_count,
        status: map_status(&r.status),
        total_minor: r.total_amount_cents,
        currency: r.currency,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_mapping_covers_lifecycle() {
        assert_eq!(map_status("accepted"), BookingStatus::Confirmed);
        assert_eq!(map_status("pending"), BookingStatus::Reserved);
        assert_eq!(map_status("cancelled"), BookingStatus::Cancelled);
        assert_eq!(map_status("checked_in"), BookingStatus::CheckedIn);
        assert_eq!(map_status("checked_out"), BookingStatus::CheckedOut);
        assert_eq!(map_status("something_new"), BookingStatus::Inquiry);
    }

    const SAMPLE_BODY: &[u8] = br#"{
            "event_id": "evt-123",
            "listing_id": "lst-9",
            "reservation": {
                "reservation_id": "res-1",
                "start_date": "2026-03-01",
                "end_date": "2026-03-04",
                "guest_count": 2,
                "status": "accepted",
                "total_amount_cents": 30000,
                "currency": "USD"
            }
        }"#;

    fn connection_with_secret(deployment_key: [u8; 32], secret: &str) -> ChannelConnection {
        ChannelConnection {
            property_id: PropertyId::new(),
            channel: Channel::Airbnb,
            external_property_id: "lst-9".into(),
            credentials_sealed: credentials::seal(&deployment_key, &PlatformCredentials { api_key: "key".into(), webhook_secret: secret.into() }),
            sync_enabled: true,
            last_sync_at: None,
            last_error: None,
        }
    }

    #[test]
    fn webhook_routing_key_rejects_missing_signature() {
        let adapter = AirbnbAdapter::new(reqwest::Client::new(), [0u8; 32]);
        let headers = WebhookHeaders::new(&[]);
        let result = adapter.webhook_routing_key(&headers, b"{}");
        assert!(matches!(result, Err(PmsError::AuthFailed { .. })));
    }

    #[test]
    fn webhook_routing_key_extracts_listing_id_without_verifying_signature() {
        let adapter = AirbnbAdapter::new(reqwest::Client::new(), [0u8; 32]);
        let headers = WebhookHeaders::new(&[("X-Airbnb-Signature", "not-yet-verified")]);
        let listing_id = adapter.webhook_routing_key(&headers, SAMPLE_BODY).unwrap();
        assert_eq!(listing_id, "lst-9");
    }

    #[test]
    fn parse_webhook_rejects_a_signature_that_does_not_match_the_connections_secret() {
        let deployment_key = [0u8; 32];
        let adapter = AirbnbAdapter::new(reqwest::Client::new(), deployment_key);
        let connection = connection_with_secret(deployment_key, "shared-secret");
        let headers = WebhookHeaders::new(&[("X-Airbnb-Signature", "deadbeef")]);
        let result = adapter.parse_webhook(&connection, &headers, SAMPLE_BODY);
        assert!(matches!(result, Err(PmsError::AuthFailed { .. })));
    }

    #[test]
    fn parse_webhook_accepts_a_correctly_signed_body_and_extracts_stable_message_id() {
        let deployment_key = [0u8; 32];
        let adapter = AirbnbAdapter::new(reqwest::Client::new(), deployment_key);
        let connection = connection_with_secret(deployment_key, "shared-secret");
        let signature = pms_crypto::sign_hmac_sha256(b"shared-secret", SAMPLE_BODY);
        let header_pairs = [("X-Airbnb-Signature", signature.as_str())];
        let headers = WebhookHeaders::new(&header_pairs);

        let parsed = adapter.parse_webhook(&connection, &headers, SAMPLE_BODY).unwrap();
        assert_eq!(parsed.external_message_id, "evt-123");
        assert_eq!(parsed.snapshot.status, BookingStatus::Confirmed);

        // Re-parsing the identical delivery yields the identical id, the
        // property the idempotency layer depends on for dedup.
        let parsed_again = adapter.parse_webhook(&connection, &headers, SAMPLE_BODY).unwrap();
        assert_eq!(parsed.external_message_id, parsed_again.external_message_id);
    }
}
