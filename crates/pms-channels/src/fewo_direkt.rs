//! FeWo-direkt (HomeAway DE) adapter: REST/JSON (spec.md §4.7). Smaller,
//! German-market platform; reuses the same request shape as the other REST
//! adapters but with the more restrictive rate limit the platform enforces
//! reflected only in configuration, not in this adapter's code.

use async_trait::async_trait;
use chrono::NaiveDate;
use pms_core::{AvailabilityBlock, Booking, BookingStatus, Channel, ChannelConnection, DateRange, PmsError, PropertyId};
use serde::{Deserialize, Serialize};

use crate::adapter::{ChannelAdapter, ExternalBookingSnapshot, ParsedInboundEvent, PricePoint, WebhookHeaders};
use crate::credentials::{self, PlatformCredentials};
use crate::http;

const BASE_URL: &str = "https://connect.fewo-direkt.de/api/v1";
const DATE_FMT: &str = "%Y-%m-%d";

pub struct FewoDirektAdapter {
    client: reqwest::Client,
    deployment_key: [u8; 32],
}

impl FewoDirektAdapter {
    pub fn new(client: reqwest::Client, deployment_key: [u8; 32]) -> Self {
        Self { client, deployment_key }
    }

    fn credentials(&self, connection: &ChannelConnection) -> Result<PlatformCredentials, PmsError> {
        credentials::unseal(&self.deployment_key, &connection.credentials_sealed)
    }
}

#[derive(Serialize)]
struct BuchungRequest<'a> {
    unterkunft_id: &'a str,
    anreise: String,
    abreise: String,
    gaeste: u32,
    betrag_cent: i64,
    waehrung: &'a str,
}

#[derive(Deserialize)]
struct BuchungCreated {
    buchung_id: String,
}

#[derive(Deserialize)]
struct BuchungSummary {
    buchung_id: String,
    anreise: NaiveDate,
    abreise: NaiveDate,
    gaeste: u32,
    status: String,
    betrag_cent: i64,
    waehrung: String,
}

fn map_status(status: &str) -> BookingStatus {
    match status {
        "bestaetigt" => BookingStatus::Confirmed,
        "angefragt" => BookingStatus::Reserved,
        "storniert" | "abgelehnt" => BookingStatus::Cancelled,
        "eingecheckt" => BookingStatus::CheckedIn,
        "ausgecheckt" => BookingStatus::CheckedOut,
        _ => BookingStatus::Inquiry,
    }
}

#[derive(Deserialize)]
struct WebhookBody {
    nachricht_id: String,
    unterkunft_id: String,
    buchung: BuchungSummary,
}

#[async_trait]
impl ChannelAdapter for FewoDirektAdapter {
    async fn upsert_booking(&self, connection: &ChannelConnection, booking: &Booking) -> Result<String, PmsError> {
        let creds = self.credentials(connection)?;
        let body = BuchungRequest {
            unterkunft_id: &connection.external_property_id,
            anreise: booking.check_in.format(DATE_FMT).to_string(),
            abreise: booking.check_out.format(DATE_FMT).to_string(),
            gaeste: booking.guests,
            betrag_cent: booking.total.minor,
            waehrung: booking.total.currency_str(),
        };
        let response = self
            .client
            .post(format!("{BASE_URL}/buchungen"))
            .header("X-Api-Key", &creds.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| PmsError::AdapterTransient { cause: e.to_string() })?;
        let text = http::classify(connection.property_id.as_uuid(), response).await?;
        let created: BuchungCreated = serde_json::from_str(&text).map_err(|e| PmsError::AdapterPermanent { cause: e.to_string() })?;
        Ok(created.buchung_id)
    }

    async fn cancel_booking(&self, connection: &ChannelConnection, external_id: &str) -> Result<(), PmsError> {
        let creds = self.credentials(connection)?;
        let response = self
            .client
            .post(format!("{BASE_URL}/buchungen/{external_id}/stornieren"))
            .header("X-Api-Key", &creds.api_key)
            .send()
            .await
            .map_err(|e| PmsError::AdapterTransient { cause: e.to_string() })?;
        http::classify(connection.property_id.as_uuid(), response).await.map(|_| ())
    }

    async fn push_availability(&self, connection: &ChannelConnection, _property_id: PropertyId, blocks: &[AvailabilityBlock]) -> Result<(), PmsError> {
        let creds = self.credentials(connection)?;
        #[derive(Serialize)]
        struct Sperrzeiten {
            unterkunft_id: String,
            gesperrt: Vec<(String, String)>,
        }
        let gesperrt = blocks.iter().map(|b| (b.start_date.format(DATE_FMT).to_string(), b.end_date.format(DATE_FMT).to_string())).collect();
        let response = self
            .client
            .put(format!("{BASE_URL}/kalender/{}", connection.external_property_id))
            .header("X-Api-Key", &creds.api_key)
            .json(&Sperrzeiten { unterkunft_id: connection.external_property_id.clone(), gesperrt })
            .send()
            .await
            .map_err(|e| PmsError::AdapterTransient { cause: e.to_string() })?;
        http::classify(connection.property_id.as_uuid(), response).await.map(|_| ())
    }

    async fn push_pricing(&self, connection: &ChannelConnection, _property_id: PropertyId, per_date_prices: &[PricePoint]) -> Result<(), PmsError> {
        let creds = self.credentials(connection)?;
        #[derive(Serialize)]
        struct Preisliste {
            unterkunft_id: String,
            preise: Vec<(String, i64, String)>,
        }
        let preise = per_date_prices.iter().map(|p| (p.date.format(DATE_FMT).to_string(), p.amount_minor, p.currency.clone())).collect();
        let response = self
            .client
            .put(format!("{BASE_URL}/preise/{}", connection.external_property_id))
            .header("X-Api-Key", &creds.api_key)
            .json(&Preisliste { unterkunft_id: connection.external_property_id.clone(), preise })
            .send()
            .await
            .map_err(|e| PmsError::AdapterTransient { cause: e.to_string() })?;
        http::classify(connection.property_id.as_uuid(), response).await.map(|_| ())
    }

    async fn list_bookings(&self, connection: &ChannelConnection, window: DateRange) -> Result<Vec<ExternalBookingSnapshot>, PmsError> {
        let creds = self.credentials(connection)?;
        let response = self
            .client
            .get(format!("{BASE_URL}/buchungen"))
            .header("X-Api-Key", &creds.api_key)
            .query(&[
                ("unterkunft_id", connection.external_property_id.as_str()),
                ("von", &window.start.format(DATE_FMT).to_string()),
                ("bis", &window.end.format(DATE_FMT).to_string()),
            ])
            .send()
            .await
            .map_err(|e| PmsError::AdapterTransient { cause: e.to_string() })?;
        let text = http::classify(connection.property_id.as_uuid(), response).await?;
        let buchungen: Vec<BuchungSummary> = serde_json::from_str(&text).map_err(|e| PmsError::AdapterPermanent { cause: e.to_string() })?;
        Ok(buchungen.into_iter().map(snapshot_from_buchung).collect())
    }

    async fn list_availability(&self, connection: &ChannelConnection, window: DateRange) -> Result<Vec<DateRange>, PmsError> {
        let creds = self.credentials(connection)?;
        #[derive(Deserialize)]
        struct Zeitraum {
            von: NaiveDate,
            bis: NaiveDate,
        }
        let response = self
            .client
            .get(format!("{BASE_URL}/kalender/{}/gesperrt", connection.external_property_id))
            .header("X-Api-Key", &creds.api_key)
            .query(&[("von", &window.start.format(DATE_FMT).to_string()), ("bis", &window.end.format(DATE_FMT).to_string())])
            .send()
            .await
            .map_err(|e| PmsError::AdapterTransient { cause: e.to_string() })?;
        let text = http::classify(connection.property_id.as_uuid(), response).await?;
        let zeitraeume: Vec<Zeitraum> = serde_json::from_str(&text).map_err(|e| PmsError::AdapterPermanent { cause: e.to_string() })?;
        Ok(zeitraeume.into_iter().filter_map(|z| DateRange::new(z.von, z.bis)).collect())
    }

    fn webhook_routing_key(&self, headers: &WebhookHeaders, body: &[u8]) -> Result<String, PmsError> {
        let signature = headers.get("X-FeWo-Signature").ok_or(PmsError::AuthFailed { connection_id: uuid::Uuid::nil() })?;
        if signature.is_empty() {
            return Err(PmsError::AuthFailed { connection_id: uuid::Uuid::nil() });
        }
        let payload: WebhookBody = serde_json::from_slice(body).map_err(|e| PmsError::AdapterPermanent { cause: e.to_string() })?;
        Ok(payload.unterkunft_id)
    }

    fn parse_webhook(&self, connection: &ChannelConnection, headers: &WebhookHeaders, body: &[u8]) -> Result<ParsedInboundEvent, PmsError> {
        let creds = self.credentials(connection)?;
        let auth_failed = || PmsError::AuthFailed { connection_id: connection.property_id.as_uuid() };
        let signature = headers.get("X-FeWo-Signature").ok_or_else(auth_failed)?;
        pms_crypto::verify_hmac_sha256(creds.webhook_secret.as_bytes(), body, signature).map_err(|_| auth_failed())?;
        let payload: WebhookBody = serde_json::from_slice(body).map_err(|e| PmsError::AdapterPermanent { cause: e.to_string() })?;
        Ok(ParsedInboundEvent {
            external_message_id: payload.nachricht_id,
            external_property_id: payload.unterkunft_id,
            snapshot: snapshot_from_buchung(payload.buchung),
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
            .post(format!("{BASE_URL}/auth/refresh"))
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
        Channel::FewoDirekt
    }
}

fn snapshot_from_buchung(b: BuchungSummary) -> ExternalBookingSnapshot {
    ExternalBookingSnapshot {
        external_id: b.buchung_id,
        check_in: b.anreise,
        check_out: b.abreise,
        guests: b.gaeste,
        status: map_status(&b.status),
        total_minor: b.betrag_cent,
        currency: b.waehrung,
    }
}
