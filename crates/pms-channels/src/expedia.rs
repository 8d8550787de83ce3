//! Expedia adapter: REST/JSON (spec.md §4.7). Expedia's lodging API speaks
//! in snake_case fields and distinguishes "stay" open-close dates from
//! "blocked" ranges using the same shape, which keeps this adapter close to
//! Airbnb's in structure despite the different field names.

use async_trait::async_trait;
use chrono::NaiveDate;
use pms_core::{AvailabilityBlock, Booking, BookingStatus, Channel, ChannelConnection, DateRange, PmsError, PropertyId};
use serde::{Deserialize, Serialize};

use crate::adapter::{ChannelAdapter, ExternalBookingSnapshot, ParsedInboundEvent, PricePoint, WebhookHeaders};
use crate::credentials::{self, PlatformCredentials};
use crate::http;

const BASE_URL: &str = "https://api.expediapartnercentral.com/lodging/v3";
const DATE_FMT: &str = "%Y-%m-%d";

pub struct ExpediaAdapter {
    client: reqwest::Client,
    deployment_key: [u8; 32],
}

impl ExpediaAdapter {
    pub fn new(client: reqwest::Client, deployment_key: [u8; 32]) -> Self {
        Self { client, deployment_key }
    }

    fn credentials(&self, connection: &ChannelConnection) -> Result<PlatformCredentials, PmsError> {
        credentials::unseal(&self.deployment_key, &connection.credentials_sealed)
    }
}

#[derive(Serialize)]
struct BookingUpsertRequest<'a> {
    property_id: &'a str,
    check_in_date: String,
    check_out_date: String,
    occupancy: u32,
    amount_due: i64,
    currency_code: &'a str,
}

#[derive(Deserialize)]
struct BookingUpsertResponse {
    itinerary_id: String,
}

#[derive(Deserialize)]
struct ItinerarySummary {
    itinerary_id: String,
    check_in_date: NaiveDate,
    check_out_date: NaiveDate,
    occupancy: u32,
    booking_status: String,
    amount_due: i64,
    currency_code: String,
}

fn map_status(status: &str) -> BookingStatus {
    match status {
        "Booked" => BookingStatus::Confirmed,
        "OnRequest" => BookingStatus::Reserved,
        "Cancelled" | "Rejected" => BookingStatus::Cancelled,
        "InHouse" => BookingStatus::CheckedIn,
        "CheckedOut" => BookingStatus::CheckedOut,
        _ => BookingStatus::Inquiry,
    }
}

#[derive(Deserialize)]
struct ExpediaWebhookBody {
    notification_id: String,
    property_id: String,
    itinerary: ItinerarySummary,
}

#[async_trait]
impl ChannelAdapter for ExpediaAdapter {
    async fn upsert_booking(&self, connection: &ChannelConnection, booking: &Booking) -> Result<String, PmsError> {
        let creds = self.credentials(connection)?;
        let body = BookingUpsertRequest {
            property_id: &connection.external_property_id,
            check_in_date: booking.check_in.format(DATE_FMT).to_string(),
            check_out_date: booking.check_out.format(DATE_FMT).to_string(),
            occupancy: booking.guests,
            amount_due: booking.total.minor,
            currency_code: booking.total.currency_str(),
        };
        let response = self
            .client
            .post(format!("{BASE_URL}/itineraries"))
            .header("Authorization", format!("EPC {}", creds.api_key))
            .json(&body)
            .send()
            .await
            .map_err(|e| PmsError::AdapterTransient { cause: e.to_string() })?;
        let text = http::classify(connection.property_id.as_uuid(), response).await?;
        let created: BookingUpsertResponse = serde_json::from_str(&text).map_err(|e| PmsError::AdapterPermanent { cause: e.to_string() })?;
        Ok(created.itinerary_id)
    }

    async fn cancel_booking(&self, connection: &ChannelConnection, external_id: &str) -> Result<(), PmsError> {
        let creds = self.credentials(connection)?;
        let response = self
            .client
            .delete(format!("{BASE_URL}/itineraries/{external_id}"))
            .header("Authorization", format!("EPC {}", creds.api_key))
            .send()
            .await
            .map_err(|e| PmsError::AdapterTransient { cause: e.to_string() })?;
        http::classify(connection.property_id.as_uuid(), response).await.map(|_| ())
    }

    async fn push_availability(&self, connection: &ChannelConnection, _property_id: PropertyId, blocks: &[AvailabilityBlock]) -> Result<(), PmsError> {
        let creds = self.credentials(connection)?;
        #[derive(Serialize)]
        struct AvailabilityUpdate {
            property_id: String,
            closed_ranges: Vec<(String, String)>,
        }
        let closed_ranges = blocks.iter().map(|b| (b.start_date.format(DATE_FMT).to_string(), b.end_date.format(DATE_FMT).to_string())).collect();
        let response = self
            .client
            .put(format!("{BASE_URL}/availability"))
            .header("Authorization", format!("EPC {}", creds.api_key))
            .json(&AvailabilityUpdate { property_id: connection.external_property_id.clone(), closed_ranges })
            .send()
            .await
            .map_err(|e| PmsError::AdapterTransient { cause: e.to_string() })?;
        http::classify(connection.property_id.as_uuid(), response).await.map(|_| ())
    }

    async fn push_pricing(&self, connection: &ChannelConnection, _property_id: PropertyId, per_date_prices: &[PricePoint]) -> Result<(), PmsError> {
        let creds = self.credentials(connection)?;
        #[derive(Serialize)]
        struct RatePlan {
            property_id: String,
            rates: Vec<(String, i64, String)>,
        }
        let rates = per_date_prices.iter().map(|p| (p.date.format(DATE_FMT).to_string(), p.amount_minor, p.currency.clone())).collect();
        let response = self
            .client
            .put(format!("{BASE_URL}/rates"))
            .header("Authorization", format!("EPC {}", creds.api_key))
            .json(&RatePlan { property_id: connection.external_property_id.clone(), rates })
            .send()
            .await
            .map_err(|e| PmsError::AdapterTransient { cause: e.to_string() })?;
        http::classify(connection.property_id.as_uuid(), response).await.map(|_| ())
    }

    async fn list_bookings(&self, connection: &ChannelConnection, window: DateRange) -> Result<Vec<ExternalBookingSnapshot>, PmsError> {
        let creds = self.credentials(connection)?;
        let response = self
            .client
            .get(format!("{BASE_URL}/itineraries"))
            .header("Authorization", format!("EPC {}", creds.api_key))
            .query(&[
                ("property_id", connection.external_property_id.as_str()),
                ("from", &window.start.format(DATE_FMT).to_string()),
                ("to", &window.end.format(DATE_FMT).to_string()),
            ])
            .send()
            .await
            .map_err(|e| PmsError::AdapterTransient { cause: e.to_string() })?;
        let text = http::classify(connection.property_id.as_uuid(), response).await?;
        let itineraries: Vec<ItinerarySummary> = serde_json::from_str(&text).map_err(|e| PmsError::AdapterPermanent { cause: e.to_string() })?;
        Ok(itineraries.into_iter().map(snapshot_from_itinerary).collect())
    }

    async fn list_availability(&self, connection: &ChannelConnection, window: DateRange) -> Result<Vec<DateRange>, PmsError> {
        let creds = self.credentials(connection)?;
        #[derive(Deserialize)]
        struct ClosedRange {
            start: NaiveDate,
            end: NaiveDate,
        }
        let response = self
            .client
            .get(format!("{BASE_URL}/availability"))
            .header("Authorization", format!("EPC {}", creds.api_key))
            .query(&[
                ("property_id", connection.external_property_id.as_str()),
                ("from", &window.start.format(DATE_FMT).to_string()),
                ("to", &window.end.format(DATE_FMT).to_string()),
            ])
            .send()
            .await
            .map_err(|e| PmsError::AdapterTransient { cause: e.to_string() })?;
        let text = http::classify(connection.property_id.as_uuid(), response).await?;
        let ranges: Vec<ClosedRange> = serde_json::from_str(&text).map_err(|e| PmsError::AdapterPermanent { cause: e.to_string() })?;
        Ok(ranges.into_iter().filter_map(|r| DateRange::new(r.start, r.end)).collect())
    }

    fn webhook_routing_key(&self, headers: &WebhookHeaders, body: &[u8]) -> Result<String, PmsError> {
        let signature = headers.get("Expedia-Signature").ok_or(PmsError::AuthFailed { connection_id: uuid::Uuid::nil() })?;
        if signature.is_empty() {
            return Err(PmsError::AuthFailed { connection_id: uuid::Uuid::nil() });
        }
        let payload: ExpediaWebhookBody = serde_json::from_slice(body).map_err(|e| PmsError::AdapterPermanent { cause: e.to_string() })?;
        Ok(payload.property_id)
    }

    fn parse_webhook(&self, connection: &ChannelConnection, headers: &WebhookHeaders, body: &[u8]) -> Result<ParsedInboundEvent, PmsError> {
        let creds = self.credentials(connection)?;
        let auth_failed = || PmsError::AuthFailed { connection_id: connection.property_id.as_uuid() };
        let signature = headers.get("Expedia-Signature").ok_or_else(auth_failed)?;
        pms_crypto::verify_hmac_sha256(creds.webhook_secret.as_bytes(), body, signature).map_err(|_| auth_failed())?;
        let payload: ExpediaWebhookBody = serde_json::from_slice(body).map_err(|e| PmsError::AdapterPermanent { cause: e.to_string() })?;
        Ok(ParsedInboundEvent {
            external_message_id: payload.notification_id,
            external_property_id: payload.property_id,
            snapshot: snapshot_from_itinerary(payload.itinerary),
        })
    }

    async fn refresh_credentials(&self, connection: &ChannelConnection) -> Result<ChannelConnection, PmsError> {
        let creds = self.credentials(connection)?;
        #[derive(Serialize)]
        struct RefreshRequest<'a> {
            refresh_token: &'a str,
        }
        #[derive(Deserialize)]
        struct RefreshResponse {
            access_token: String,
        }
        let response = self
            .client
            .post(format!("{BASE_URL}/oauth/token"))
            .json(&RefreshRequest { refresh_token: &creds.api_key })
            .send()
            .await
            .map_err(|e| PmsError::AdapterTransient { cause: e.to_string() })?;
        let text = http::classify(connection.property_id.as_uuid(), response).await?;
        let refreshed: RefreshResponse = serde_json::from_str(&text).map_err(|e| PmsError::AdapterPermanent { cause: e.to_string() })?;
        let mut next = connection.clone();
        next.credentials_sealed = credentials::seal(&self.deployment_key, &PlatformCredentials { api_key: refreshed.access_token, webhook_secret: creds.webhook_secret });
        Ok(next)
    }

    fn channel(&self) -> Channel {
        Channel::Expedia
    }
}

fn snapshot_from_itinerary(i: ItinerarySummary) -> ExternalBookingSnapshot {
    ExternalBookingSnapshot {
        external_id: i.itinerary_id,
        check_in: i.check_in_date,
        check_out: i.check_out_date,
        guests: i.occupancy,
        status: map_status(&i.booking_status),
        total_minor: i.amount_due,
        currency: i.currency_code,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_mapping_covers_lifecycle() {
        assert_eq!(map_status("Booked"), BookingStatus::Confirmed);
        assert_eq!(map_status("OnRequest"), BookingStatus::Reserved);
        assert_eq!(map_status("Rejected"), BookingStatus::Cancelled);
        assert_eq!(map_status("InHouse"), BookingStatus::CheckedIn);
        assert_eq!(map_status("CheckedOut"), BookingStatus::CheckedOut);
        assert_eq!(map_status("Quoted"), BookingStatus::Inquiry);
    }

    const SAMPLE_BODY: &[u8] = br#"{
            "notification_id": "note-7",
            "property_id": "prop-44",
            "itinerary": {
                "itinerary_id": "itin-1",
                "check_in_date": "2026-05-01",
                "check_out_date": "2026-05-03",
                "occupancy": 3,
                "booking_status": "Booked",
                "amount_due": 42000,
                "currency_code": "EUR"
            }
        }"#;

    fn connection_with_secret(deployment_key: [u8; 32], secret: &str) -> ChannelConnection {
        ChannelConnection {
            property_id: PropertyId::new(),
            channel: Channel::Expedia,
            external_property_id: "prop-44".into(),
            credentials_sealed: credentials::seal(&deployment_key, &PlatformCredentials { api_key: "key".into(), webhook_secret: secret.into() }),
            sync_enabled: true,
            last_sync_at: None,
            last_error: None,
        }
    }

    #[test]
    fn webhook_routing_key_requires_signature_header() {
        let adapter = ExpediaAdapter::new(reqwest::Client::new(), [0u8; 32]);
        let headers = WebhookHeaders::new(&[]);
        assert!(matches!(adapter.webhook_routing_key(&headers, b"{}"), Err(PmsError::AuthFailed { .. })));
    }

    #[test]
    fn parse_webhook_rejects_a_signature_that_does_not_match_the_connections_secret() {
        let deployment_key = [0u8; 32];
        let adapter = ExpediaAdapter::new(reqwest::Client::new(), deployment_key);
        let connection = connection_with_secret(deployment_key, "shared-secret");
        let headers = WebhookHeaders::new(&[("expedia-signature", "abc123")]);
        assert!(matches!(adapter.parse_webhook(&connection, &headers, SAMPLE_BODY), Err(PmsError::AuthFailed { .. })));
    }

    #[test]
    fn parse_webhook_normalizes_itinerary_once_signature_verifies() {
        let deployment_key = [0u8; 32];
        let adapter = ExpediaAdapter::new(reqwest::Client::new(), deployment_key);
        let connection = connection_with_secret(deployment_key, "shared-secret");
        let signature = pms_crypto::sign_hmac_sha256(b"shared-secret", SAMPLE_BODY);
        let header_pairs = [("expedia-signature", signature.as_str())];
        let headers = WebhookHeaders::new(&header_pairs);

        let parsed = adapter.parse_webhook(&connection, &headers, SAMPLE_BODY).unwrap();
        assert_eq!(parsed.external_message_id, "note-7");
        assert_eq!(parsed.external_property_id, "prop-44");
        assert_eq!(parsed.snapshot.status, BookingStatus::Confirmed);
        assert_eq!(parsed.snapshot.total_minor, 42000);
    }
}
