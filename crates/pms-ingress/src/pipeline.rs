//! The admission pipeline itself (spec.md §4.9 steps 1-6):
//!
//!   1. route to the platform's adapter, verify the webhook's signature
//!   2. dedupe by `{channel}:{external_message_id}`, replaying a prior outcome
//!   3. acquire the property lock (spec.md §4.1's `booking:property:{id}` key,
//!      the same one a direct checkout session holds)
//!   4. run the Conflict Resolution Policy against local state
//!   5. apply the decision through the Booking Core
//!   6. persist the idempotency record with the outcome
//!
//! Step 3-5 run synchronously under the property lock; the one external call
//! this pipeline ever makes (telling a platform its proposed booking was
//! rejected) happens only after the lock is released, matching the rule that
//! a held lock must never block on an external platform call.

use chrono::{DateTime, Utc};
use thiserror::Error;

use pms_channels::{AdapterRegistry, ParsedInboundEvent, WebhookHeaders};
use pms_core::{clock::inbound_idempotency_key, constants, BookingId, BookingStatus, Channel, Clock, DateRange, Money, PmsError, PropertyId, Source};
use pms_policy::{evaluate_new_inbound, resolve_status_conflict, InboundDecision, StatusResolution};
use pms_store::{BookingEngine, IdempotencyRecord, OutboundEventKind};

/// What the pipeline did with a webhook call, persisted verbatim as the
/// idempotency record's snapshot so a retried delivery replays the exact
/// same outcome rather than re-deciding it.
#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum IngressOutcome {
    /// A brand-new booking was admitted.
    Accepted { booking_id: BookingId },
    /// An existing booking's status was changed to match the incoming report.
    Updated { booking_id: BookingId },
    /// The incoming booking was rejected at the platform; no local write.
    Rejected,
    /// The incoming report matched the local record already, or the local
    /// status won the conflict and a correction was queued back to the
    /// reporting channel; no local write either way.
    NoChange,
}

#[derive(Debug, Error)]
pub enum IngressError {
    /// Maps to a 403 at the transport (spec.md §4.9 step 1).
    #[error("webhook signature verification failed")]
    SignatureInvalid,
    /// Maps to a 409 retryable at the transport (spec.md §4.9 step 3).
    #[error("property lock busy, retry later")]
    LockBusy,
    /// No channel connection is registered for the platform's reported
    /// property id; nothing downstream knows which local property this is.
    #[error("no connection registered for {channel} property {external_property_id}")]
    UnknownConnection { channel: Channel, external_property_id: String },
    #[error(transparent)]
    Core(#[from] PmsError),
}

/// Decision reached under the property lock: either a local write already
/// happened, or the booking must be rejected once the lock is released.
enum Decision {
    Applied(IngressOutcome),
    Reject { alert_operator: bool },
}

/// Admit one webhook call (spec.md §4.9). `channel` is whatever the
/// transport's routing already determined (e.g. from the request path);
/// `headers`/`body` are handed straight to the matching adapter's
/// `parse_webhook`.
pub async fn admit_webhook<C: Clock + Clone>(
    engine: &BookingEngine<C>,
    registry: &AdapterRegistry,
    channel: Channel,
    headers: &WebhookHeaders<'_>,
    body: &[u8],
    now: DateTime<Utc>,
) -> Result<IngressOutcome, IngressError> {
    let adapter = registry.get(channel);

    // The routing key is read from the body before anything is verified, so
    // it must never be trusted for anything beyond looking up which
    // connection's secret to verify against (see `webhook_routing_key`'s
    // doc comment). A missing/empty signature header is rejected here too,
    // since such a call cannot verify against any connection.
    let routing_key = match adapter.webhook_routing_key(headers, body) {
        Ok(key) => key,
        Err(PmsError::AuthFailed { .. }) => {
            tracing::warn!(%channel, "webhook missing a usable signature, rejecting with 403 (security event)");
            return Err(IngressError::SignatureInvalid);
        }
        Err(e) => return Err(IngressError::Core(e)),
    };

    let connection = engine
        .outbox()
        .find_connection_by_external_property(channel, &routing_key)?
        .ok_or_else(|| IngressError::UnknownConnection { channel, external_property_id: routing_key.clone() })?;
    let property_id = connection.property_id;

    let parsed = match adapter.parse_webhook(&connection, headers, body) {
        Ok(parsed) => parsed,
        Err(PmsError::AuthFailed { .. }) => {
            tracing::warn!(%channel, %property_id, "webhook signature verification failed, rejecting with 403 (security event)");
            return Err(IngressError::SignatureInvalid);
        }
        Err(e) => return Err(IngressError::Core(e)),
    };

    let idempotency_key = inbound_idempotency_key(&channel.to_string(), &parsed.external_message_id);
    if let Some(record) = engine.db().get_idempotency_record(&idempotency_key)? {
        let outcome: IngressOutcome = bincode::deserialize(&record.result_snapshot).map_err(|e| PmsError::Serialization(e.to_string()))?;
        tracing::info!(%channel, message_id = %parsed.external_message_id, ?outcome, "replaying idempotent webhook outcome");
        return Ok(outcome);
    }

    let decision = engine
        .with_property_lock_async(property_id, constants::WEBHOOK_LOCK_TTL, constants::WEBHOOK_LOCK_WAIT, || decide_and_apply(engine, property_id, channel, &parsed, now))
        .await
        .map_err(|e| match e {
            PmsError::ConcurrentBooking => IngressError::LockBusy,
            other => IngressError::Core(other),
        })?;

    let outcome = match decision {
        Decision::Applied(outcome) => outcome,
        Decision::Reject { alert_operator } => {
            if alert_operator {
                tracing::warn!(%channel, %property_id, external_id = %parsed.snapshot.external_id, "inbound booking conflicts with a direct booking, operator alert raised");
            }
            if let Err(e) = adapter.cancel_booking(&connection, &parsed.snapshot.external_id).await {
                tracing::warn!(%channel, external_id = %parsed.snapshot.external_id, error = %e, "failed to notify platform its proposed booking was rejected");
            }
            IngressOutcome::Rejected
        }
    };

    let snapshot = bincode::serialize(&outcome).map_err(|e| PmsError::Serialization(e.to_string()))?;
    engine.db().put_idempotency_record(&IdempotencyRecord { key: idempotency_key, result_snapshot: snapshot, expires_at: now + chrono::Duration::days(7) })?;

    Ok(outcome)
}

/// Runs entirely under the property lock: pure policy evaluation plus, at
/// most, one fast local write. Never touches the network.
fn decide_and_apply<C: Clock + Clone>(engine: &BookingEngine<C>, property_id: PropertyId, channel: Channel, parsed: &ParsedInboundEvent, now: DateTime<Utc>) -> Result<Decision, PmsError> {
    let inventory = engine.inventory();
    let source = Source::Channel(channel);

    if let Some(existing) = inventory.find_by_source_external_id(source, &parsed.snapshot.external_id)? {
        return Ok(resolve_update(engine, channel, existing.id, existing.source, existing.status, existing.updated_at, parsed.snapshot.status, now));
    }

    let stay = DateRange::new(parsed.snapshot.check_in, parsed.snapshot.check_out).ok_or(PmsError::InvalidDateRange)?;
    let occupied = inventory.list_occupied(property_id, stay)?;
    let conflicts_with_local = !occupied.is_empty();
    let conflict_involves_direct = occupied.iter().any(|b| b.source == Source::Direct);

    match evaluate_new_inbound(conflicts_with_local, conflict_involves_direct) {
        InboundDecision::Accept => {
            let total = Money::new(parsed.snapshot.total_minor, &parsed.snapshot.currency);
            let booking = engine.accept_inbound_booking(
                property_id,
                channel,
                parsed.snapshot.external_id.clone(),
                parsed.snapshot.check_in,
                parsed.snapshot.check_out,
                parsed.snapshot.guests,
                BookingStatus::Confirmed,
                total,
            )?;
            Ok(Decision::Applied(IngressOutcome::Accepted { booking_id: booking.id }))
        }
        InboundDecision::Reject { alert_operator } => Ok(Decision::Reject { alert_operator }),
    }
}

fn resolve_update<C: Clock + Clone>(
    engine: &BookingEngine<C>,
    channel: Channel,
    booking_id: BookingId,
    booking_source: Source,
    booking_status: BookingStatus,
    booking_updated_at: DateTime<Utc>,
    incoming_status: BookingStatus,
    now: DateTime<Utc>,
) -> Decision {
    if booking_status == incoming_status {
        return Decision::Applied(IngressOutcome::NoChange);
    }

    match resolve_status_conflict(booking_source, booking_status, booking_updated_at, channel, incoming_status, now) {
        StatusResolution::IncomingWins => match engine.apply_inbound_status_update(booking_id, channel, incoming_status) {
            Ok(booking) => Decision::Applied(IngressOutcome::Updated { booking_id: booking.id }),
            Err(e) => {
                tracing::warn!(%channel, %booking_id, error = %e, "failed to apply inbound status update");
                Decision::Applied(IngressOutcome::NoChange)
            }
        },
        StatusResolution::LocalWins => {
            if let Ok(Some(booking)) = engine.inventory().get_booking(booking_id) {
                if let Ok(payload) = bincode::serialize(&booking) {
                    let _ = engine.outbox().requeue_for_channel(booking.property_id, booking.id.as_uuid(), OutboundEventKind::BookingUpdated, payload, channel, now);
                }
            }
            tracing::info!(%channel, %booking_id, "local status wins cross-channel conflict, re-pushing to the losing channel");
            Decision::Applied(IngressOutcome::NoChange)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pms_channels::{AdapterRegistry, WebhookHeaders};
    use pms_core::{CivilDate, ChannelConnection, FixedClock};
    use pms_store::PmsDb;

    fn harness() -> (tempfile::TempDir, BookingEngine<FixedClock>, AdapterRegistry) {
        let dir = tempfile::tempdir().unwrap();
        let db = PmsDb::open(dir.path()).unwrap();
        let clock = FixedClock::new(Utc::now());
        let engine = BookingEngine::new(db, clock).unwrap();
        let registry = AdapterRegistry::new([7u8; 32]);
        (dir, engine, registry)
    }

    fn d(y: i32, m: u32, day: u32) -> CivilDate {
        CivilDate::from_ymd_opt(y, m, day).unwrap()
    }

    const DEPLOYMENT_KEY: [u8; 32] = [7u8; 32];
    const WEBHOOK_SECRET: &str = "airbnb-shared-secret";

    fn connect(engine: &BookingEngine<FixedClock>, property: PropertyId, channel: Channel, external_property_id: &str) {
        let credentials = pms_channels::PlatformCredentials { api_key: "key".into(), webhook_secret: WEBHOOK_SECRET.into() };
        engine
            .outbox()
            .upsert_connection(ChannelConnection {
                property_id: property,
                channel,
                external_property_id: external_property_id.into(),
                credentials_sealed: pms_channels::credentials::seal(&DEPLOYMENT_KEY, &credentials),
                sync_enabled: true,
                last_sync_at: None,
                last_error: None,
            })
            .unwrap();
    }

    fn sign(body: &[u8]) -> String {
        pms_crypto::sign_hmac_sha256(WEBHOOK_SECRET.as_bytes(), body)
    }

    #[tokio::test]
    async fn unknown_connection_is_rejected_before_touching_the_lock() {
        let (_dir, engine, registry) = harness();
        let body = br#"{"event_id":"evt_1","listing_id":"prop-1","reservation":{"reservation_id":"HMABC","start_date":"2025-11-01","end_date":"2025-11-05","guest_count":2,"status":"accepted","total_amount_cents":10000,"currency":"USD"}}"#;
        let signature = sign(body);
        let header_pairs = [("X-Airbnb-Signature", signature.as_str())];
        let headers = WebhookHeaders::new(&header_pairs);

        let result = admit_webhook(&engine, &registry, Channel::Airbnb, &headers, body, Utc::now()).await;
        assert!(matches!(result, Err(IngressError::UnknownConnection { .. })));
    }

    #[tokio::test]
    async fn missing_signature_is_rejected_with_signature_invalid() {
        let (_dir, engine, registry) = harness();
        let headers = WebhookHeaders::new(&[]);

        let result = admit_webhook(&engine, &registry, Channel::Airbnb, &headers, b"{}", Utc::now()).await;
        assert!(matches!(result, Err(IngressError::SignatureInvalid)));
    }

    #[tokio::test]
    async fn a_signature_that_does_not_match_the_connections_secret_is_rejected() {
        let (_dir, engine, registry) = harness();
        let property = PropertyId::new();
        connect(&engine, property, Channel::Airbnb, "prop-1");

        let body = br#"{"event_id":"evt_1","listing_id":"prop-1","reservation":{"reservation_id":"HMABC","start_date":"2025-11-01","end_date":"2025-11-05","guest_count":2,"status":"accepted","total_amount_cents":10000,"currency":"USD"}}"#;
        let headers = WebhookHeaders::new(&[("X-Airbnb-Signature", "deadbeef")]);

        let result = admit_webhook(&engine, &registry, Channel::Airbnb, &headers, body, Utc::now()).await;
        assert!(matches!(result, Err(IngressError::SignatureInvalid)));
    }

    #[tokio::test]
    async fn accepting_a_new_booking_then_replaying_the_same_message_id_is_idempotent() {
        let (_dir, engine, registry) = harness();
        let property = PropertyId::new();
        connect(&engine, property, Channel::Airbnb, "prop-1");

        let body = br#"{"event_id":"evt_1","listing_id":"prop-1","reservation":{"reservation_id":"HMABC","start_date":"2025-11-01","end_date":"2025-11-05","guest_count":2,"status":"accepted","total_amount_cents":10000,"currency":"USD"}}"#;
        let signature = sign(body);
        let header_pairs = [("X-Airbnb-Signature", signature.as_str())];
        let headers = WebhookHeaders::new(&header_pairs);

        let first = admit_webhook(&engine, &registry, Channel::Airbnb, &headers, body, Utc::now()).await.unwrap();
        let booking_id = match first {
            IngressOutcome::Accepted { booking_id } => booking_id,
            other => panic!("expected Accepted, got {other:?}"),
        };

        let second = admit_webhook(&engine, &registry, Channel::Airbnb, &headers, body, Utc::now()).await.unwrap();
        assert_eq!(second, IngressOutcome::Accepted { booking_id });

        assert!(engine.inventory().get_booking(booking_id).unwrap().is_some());
    }

    #[tokio::test]
    async fn new_booking_conflicting_with_a_direct_booking_is_rejected_and_alerts() {
        let (_dir, engine, registry) = harness();
        let property = PropertyId::new();
        connect(&engine, property, Channel::Airbnb, "prop-1");

        engine
            .start_checkout(
                property,
                d(2025, 11, 1),
                d(2025, 11, 5),
                2,
                &pms_store::PricingRuleSet { base_price: Money::zero("USD"), date_overrides: Default::default(), rules: vec![] },
                Money::zero("USD"),
                0,
                pms_store::TaxTable { rate_basis_points: 0 },
            )
            .unwrap();

        let body = br#"{"event_id":"evt_2","listing_id":"prop-1","reservation":{"reservation_id":"HMXYZ","start_date":"2025-11-03","end_date":"2025-11-08","guest_count":1,"status":"accepted","total_amount_cents":5000,"currency":"USD"}}"#;
        let signature = sign(body);
        let header_pairs = [("X-Airbnb-Signature", signature.as_str())];
        let headers = WebhookHeaders::new(&header_pairs);

        let outcome = admit_webhook(&engine, &registry, Channel::Airbnb, &headers, body, Utc::now()).await.unwrap();
        assert_eq!(outcome, IngressOutcome::Rejected);
    }

    #[tokio::test]
    async fn owning_channel_status_update_is_applied() {
        let (_dir, engine, registry) = harness();
        let property = PropertyId::new();
        connect(&engine, property, Channel::Airbnb, "prop-1");

        let create_body = br#"{"event_id":"evt_1","listing_id":"prop-1","reservation":{"reservation_id":"HMABC","start_date":"2025-11-01","end_date":"2025-11-05","guest_count":2,"status":"accepted","total_amount_cents":10000,"currency":"USD"}}"#;
        let create_signature = sign(create_body);
        let create_header_pairs = [("X-Airbnb-Signature", create_signature.as_str())];
        let headers = WebhookHeaders::new(&create_header_pairs);
        let first = admit_webhook(&engine, &registry, Channel::Airbnb, &headers, create_body, Utc::now()).await.unwrap();
        let booking_id = match first {
            IngressOutcome::Accepted { booking_id } => booking_id,
            other => panic!("expected Accepted, got {other:?}"),
        };

        let cancel_body = br#"{"event_id":"evt_3","listing_id":"prop-1","reservation":{"reservation_id":"HMABC","start_date":"2025-11-01","end_date":"2025-11-05","guest_count":2,"status":"cancelled","total_amount_cents":10000,"currency":"USD"}}"#;
        let cancel_signature = sign(cancel_body);
        let cancel_header_pairs = [("X-Airbnb-Signature", cancel_signature.as_str())];
        let cancel_headers = WebhookHeaders::new(&cancel_header_pairs);
        let second = admit_webhook(&engine, &registry, Channel::Airbnb, &cancel_headers, cancel_body, Utc::now()).await.unwrap();
        assert_eq!(second, IngressOutcome::Updated { booking_id });

        let booking = engine.inventory().get_booking(booking_id).unwrap().unwrap();
        assert_eq!(booking.status, BookingStatus::Cancelled);
    }
}
