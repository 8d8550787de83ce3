//! Google Vacation Rentals adapter: REST/JSON, OAuth bearer tokens
//! (spec.md §4.7). Google's feed API names everything after its own
//! `VacationRentalBooking` resource shape.

use async_trait::async_trait;
use chrono::NaiveDate;
use pms_core::{AvailabilityBlock, Booking, BookingStatus, Channel, ChannelConnection, DateRange, PmsError, PropertyId};
use serde::{Deserialize, Serialize};

use crate::adapter::{ChannelAdapter, ExternalBookingSnapshot, ParsedInboundEvent, PricePoint, WebhookHeaders};
use crate::credentials::{self, PlatformCredentials};
use crate::http;

const BASE_URL: &str = "https://vacationrentals.googleapis.com/v1";
const DATE_FMT: &str = "%Y-%m-%d";

pub struct GoogleVrAdapter {
    client: reqwest::Client,
    deployment_key: [u8; 32],
}

impl GoogleVrAdapter {
    pub fn new(client: reqwest::Client, deployment_key: [u8; 32]) -> Self {
        Self { client, deployment_key }
    }

    fn credentials(&self, connection: &ChannelConnection) -> Result<PlatformCredentials, PmsError> {
        credentials::unseal(&self.deployment_key, &connection.credentials_sealed)
    }
}

#[derive(Serialize)]
struct VacationRentalBookingRequest<'a> {
    property_id: &'a str,
    check_in_date: String,
    check_out_date: String,
    num_guests: u32,
    total_price_micros: i64,
    currency_code: &'a str,
}

#[derive(Deserialize)]
struct VacationRentalBookingResponse {
    booking_id: String,
}

#[derive(Deserialize)]
struct BookingResource {
    booking_id: String,
    check_in_date: NaiveDate,
    check_out_date: NaiveDate,
    num_guests: u32,
    state: String,
    total_price_micros: i64,
    currency_code: String,
}

/// Google reports money as micros of the currency unit (1 unit = 1_000_000
/// micros); the rest of this workspace works in minor units (cents), so the
/// conversion happens at the boundary, here.
fn micros_to_minor(micros: i64) -> i64 {
    micros / 10_000
}

fn minor_to_micros(minor: i64) -> i64 {
    minor * 10_000
}

fn map_status(state: &str) -> BookingStatus {
    match state {
        "CONFIRMED" => BookingStatus::Confirmed,
        "PENDING" => BookingStatus::Reserved,
        "CANCELLED" | "DECLINED" => BookingStatus::Cancelled,
        "CHECKED_IN" => BookingStatus::CheckedIn,
        "CHECKED_OUT" => BookingStatus::CheckedOut,
        _ => BookingStatus::Inquiry,
    }
}

#[derive(Deserialize)]
struct PushNotification {
    message_id: String,
    property_id: String,
    booking: BookingResource,
}

#[async_trait]
impl ChannelAdapter for GoogleVrAdapter {
    async fn upsert_booking(&self, connection: &ChannelConnection, booking: &Booking) -> Result<String, PmsError> {
        let creds = self.credentials(connection)?;
        let body = VacationRentalBookingRequest {
            property_id: &connection.external_property_id,
            check_in_date: booking.check_in.format(DATE_FMT).to_string(),
            check_out_date: booking.check_out.format(DATE_FMT).to_string(),
            num_guests: booking.guests,
            total_price_micros: minor_to_micros(booking.total.minor),
            currency_code: booking.total.currency_str(),
        };
        let response = self
            .client
            .post(format!("{BASE_URL}/bookings"))
            .bearer_auth(&creds.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| PmsError::AdapterTransient { cause: e.to_string() })?;
        let text = http::classify(connection.property_id.as_uuid(), response).await?;
        let created: VacationRentalBookingResponse = serde_json::from_str(&text).map_err(|e| PmsError::AdapterPermanent { cause: e.to_string() })?;
        Ok(created.booking_id)
    }

    async fn cancel_booking(&self, connection: &ChannelConnection, external_id: &str) -> Result<(), PmsError> {
        let creds = self.credentials(connection)?;
        let response = self
            .client
            .post(format!("{BASE_URL}/bookings/{external_id}:cancel"))
            .bearer_auth(&creds.api_key)
            .send()
            .await
            .map_err(|e| PmsError::AdapterTransient { cause: e.to_string() })?;
        http::classify(connection.property_id.as_uuid(), response).await.map(|_| ())
    }

    async fn push_availability(&self, connection: &ChannelConnection, _property_id: PropertyId, blocks: &[AvailabilityBlock]) -> Result<(), PmsError> {
        let creds = self.credentials(connection)?;
        #[derive(Serialize)]
        struct AvailabilityPatch {
            property_id: String,
            unavailable_ranges: Vec<(String, String)>,
        }
        let unavailable_ranges = blocks.iter().map(|b| (b.start_date.format(DATE_FMT).to_string(), b.end_date.format(DATE_FMT).to_string())).collect();
        let response = self
            .client
            .patch(format!("{BASE_URL}/availability/{}", connection.external_property_id))
            .bearer_auth(&creds.api_key)
            .json(&AvailabilityPatch { property_id: connection.external_property_id.clone(), unavailable_ranges })
            .send()
            .await
            .map_err(|e| PmsError::AdapterTransient { cause: e.to_string() })?;
        http::classify(connection.property_id.as_uuid(), response).await.map(|_| ())
    }

    async fn push_pricing(&self, connection: &ChannelConnection, _property_id: PropertyId, per_date_prices: &[PricePoint]) -> Result<(), PmsError> {
        let creds = self.credentials(connection)?;
        #[derive(Serialize)]
        struct PricePatch {
            property_id: String,
            nightly_prices: Vec<(String, i64, String)>,
        }
        let nightly_prices = per_date_prices.iter().map(|p| (p.date.format(DATE_FMT).to_string(), minor_to_micros(p.amount_minor), p.currency.clone())).collect();
        let response = self
            .client
            .patch(format!("{BASE_URL}/pricing/{}", connection.external_property_id))
            .bearer_auth(&creds.api_key)
            .json(&PricePatch { property_id: connection.external_property_id.clone(), nightly_prices })
            .send()
            .await
            .map_err(|e| PmsError::AdapterTransient { cause: e.to_string() })?;
        http::classify(connection.property_id.as_uuid(), response).await.map(|_| ())
    }

    async fn list_bookings(&self, connection: &ChannelConnection, window: DateRange) -> Result<Vec<ExternalBookingSnapshot>, PmsError> {
        let creds = self.credentials(connection)?;
        let response = self
            .client
            .get(format!("{BASE_URL}/bookings"))
            .bearer_auth(&creds.api_key)
            .query(&[
                ("propertyId", connection.external_property_id.as_str()),
                ("startDate", &window.start.format(DATE_FMT).to_string()),
                ("endDate", &window.end.format(DATE_FMT).to_string()),
            ])
            .send()
            .await
            .map_err(|e| PmsError::AdapterTransient { cause: e.to_string() })?;
        let text = http::classify(connection.property_id.as_uuid(), response).await?;
        let bookings: Vec<BookingResource> = serde_json::from_str(&text).map_err(|e| PmsError::AdapterPermanent { cause: e.to_string() })?;
        Ok(bookings.into_iter().map(snapshot_from_resource).collect())
    }

    async fn list_availability(&self, connection: &ChannelConnection, window: DateRange) -> Result<Vec<DateRange>, PmsError> {
        let creds = self.credentials(connection)?;
        #[derive(Deserialize)]
        struct UnavailableRange {
            start_date: NaiveDate,
            end_date: NaiveDate,
        }
        let response = self
            .client
            .get(format!("{BASE_URL}/availability/{}", connection.external_property_id))
            .bearer_auth(&creds.api_key)
            .query(&[("startDate", &window.start.format(DATE_FMT).to_string()), ("endDate", &window.end.format(DATE_FMT).to_string())])
            .send()
            .await
            .map_err(|e| PmsError::AdapterTransient { cause: e.to_string() })?;
        let text = http::classify(connection.property_id.as_uuid(), response).await?;
        let ranges: Vec<UnavailableRange> = serde_json::from_str(&text).map_err(|e| PmsError::AdapterPermanent { cause: e.to_string() })?;
        Ok(ranges.into_iter().filter_map(|r| DateRange::new(r.start_date, r.end_date)).collect())
    }

    fn webhook_routing_key(&self, headers: &WebhookHeaders, body: &[u8]) -> Result<String, PmsError> {
        // Google VR authenticates push notifications with a bearer token in
        // the Authorization header rather than a body signature.
        let token = headers.get("Authorization").ok_or(PmsError::AuthFailed { connection_id: uuid::Uuid::nil() })?;
        if !token.starts_with("Bearer ") {
            return Err(PmsError::AuthFailed { connection_id: uuid::Uuid::nil() });
        }
        let payload: PushNotification = serde_json::from_slice(body).map_err(|e| PmsError::AdapterPermanent { cause: e.to_string() })?;
        Ok(payload.property_id)
    }

    fn parse_webhook(&self, connection: &ChannelConnection, headers: &WebhookHeaders, body: &[u8]) -> Result<ParsedInboundEvent, PmsError> {
        let creds = self.credentials(connection)?;
        let auth_failed = || PmsError::AuthFailed { connection_id: connection.property_id.as_uuid() };
        let token = headers.get("Authorization").ok_or_else(auth_failed)?;
        let token = token.strip_prefix("Bearer ").ok_or_else(auth_failed)?;
        pms_crypto::verify_bearer_token(&creds.webhook_secret, token).map_err(|_| auth_failed())?;
        let payload: PushNotification = serde_json::from_slice(body).map_err(|e| PmsError::AdapterPermanent { cause: e.to_string() })?;
        Ok(ParsedInboundEvent {
            external_message_id: payload.message_id,
            external_property_id: payload.property_id,
            snapshot: snapshot_from_resource(payload.booking),
        })
    }

    async fn refresh_credentials(&self, connection: &ChannelConnection) -> Result<ChannelConnection, PmsError> {
        let creds = self.credentials(connection)?;
        #[derive(Serialize)]
        struct TokenRequest<'a> {
            grant_type: &'a str,
            refresh_token: &'a str,
        }
        #[derive(Deserialize)]
        struct TokenResponse {
            access_token: String,
        }
        let response = self
            .client
            .post("https://oauth2.googleapis.com/token")
            .form(&TokenRequest { grant_type: "refresh_token", refresh_token: &creds.api_key })
            .send()
            .await
            .map_err(|e| PmsError::AdapterTransient { cause: e.to_string() })?;
        let text = http::classify(connection.property_id.as_uuid(), response).await?;
        let refreshed: TokenResponse = serde_json::from_str(&text).map_err(|e| PmsError::AdapterPermanent { cause: e.to_string() })?;
        let mut next = connection.clone();
        next.credentials_sealed = credentials::seal(&self.deployment_key, &PlatformCredentials { api_key: refreshed.access_token, webhook_secret: creds.webhook_secret });
        Ok(next)
    }

    fn channel(&self) -> Channel {
        Channel::GoogleVr
    }
}

fn snapshot_from_resource(r: BookingResource) -> ExternalBookingSnapshot {
    ExternalBookingSnapshot {
        external_id: r.booking_id,
        check_in: r.check_in_date,
        check_out: r.check_out_date,
        guests: r.num_guests,
        status: map_status(&r.state),
        total_minor: micros_to_minor(r.total_price_micros),
        currency: r.currency_code,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn micros_conversion_round_trips() {
        assert_eq!(micros_to_minor(minor_to_micros(12_345)), 12_345);
    }

    #[test]
    fn status_mapping_covers_lifecycle() {
        assert_eq!(map_status("CONFIRMED"), BookingStatus::Confirmed);
        assert_eq!(map_status("PENDING"), BookingStatus::Reserved);
        assert_eq!(map_status("DECLINED"), BookingStatus::Cancelled);
        assert_eq!(map_status("CHECKED_IN"), BookingStatus::CheckedIn);
        assert_eq!(map_status("CHECKED_OUT"), BookingStatus::CheckedOut);
        assert_eq!(map_status("UNSPECIFIED"), BookingStatus::Inquiry);
    }

    const SAMPLE_BODY: &[u8] = br#"{
            "message_id": "push-1",
            "property_id": "gvr-9",
            "booking": {
                "booking_id": "bk-1",
                "check_in_date": "2026-07-01",
                "check_out_date": "2026-07-05",
                "num_guests": 2,
                "state": "CONFIRMED",
                "total_price_micros": 1200000000,
                "currency_code": "USD"
            }
        }"#;

    fn connection_with_secret(deployment_key: [u8; 32], token: &str) -> ChannelConnection {
        ChannelConnection {
            property_id: PropertyId::new(),
            channel: Channel::GoogleVr,
            external_property_id: "gvr-9".into(),
            credentials_sealed: credentials::seal(&deployment_key, &PlatformCredentials { api_key: "key".into(), webhook_secret: token.into() }),
            sync_enabled: true,
            last_sync_at: None,
            last_error: None,
        }
    }

    #[test]
    fn webhook_routing_key_requires_bearer_token() {
        let adapter = GoogleVrAdapter::new(reqwest::Client::new(), [0u8; 32]);
        let headers = WebhookHeaders::new(&[("Authorization", "Basic xyz")]);
        assert!(matches!(adapter.webhook_routing_key(&headers, b"{}"), Err(PmsError::AuthFailed { .. })));
    }

    #[test]
    fn parse_webhook_rejects_a_token_that_does_not_match_the_connections_secret() {
        let deployment_key = [0u8; 32];
        let adapter = GoogleVrAdapter::new(reqwest::Client::new(), deployment_key);
        let connection = connection_with_secret(deployment_key, "tok-abc");
        let headers = WebhookHeaders::new(&[("Authorization", "Bearer tok-wrong")]);
        assert!(matches!(adapter.parse_webhook(&connection, &headers, SAMPLE_BODY), Err(PmsError::AuthFailed { .. })));
    }

    #[test]
    fn parse_webhook_normalizes_push_notification_once_token_verifies() {
        let deployment_key = [0u8; 32];
        let adapter = GoogleVrAdapter::new(reqwest::Client::new(), deployment_key);
        let connection = connection_with_secret(deployment_key, "tok-abc");
        let headers = WebhookHeaders::new(&[("Authorization", "Bearer tok-abc")]);

        let parsed = adapter.parse_webhook(&connection, &headers, SAMPLE_BODY).unwrap();
        assert_eq!(parsed.external_message_id, "push-1");
        assert_eq!(parsed.snapshot.total_minor, 120_000);
    }
}
