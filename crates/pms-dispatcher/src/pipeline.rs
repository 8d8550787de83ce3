//! The per-delivery dispatch pipeline (spec.md §4.8): idempotency guard,
//! circuit breaker, rate limiter, adapter invocation, outcome classification.
//! One call to [`dispatch_one`] handles exactly one claimed [`Delivery`].

use chrono::{DateTime, Utc};

use pms_channels::{AdapterRegistry, PricePoint};
use pms_core::{AvailabilityBlock, Booking, BookingId, Clock, PmsError};
use pms_resilience::circuit::{CircuitBreaker, Decision};
use pms_resilience::rate_limit::{Acquisition, RateLimiter};
use pms_store::{Delivery, IdempotencyRecord, OutboundEventKind, Outbox, PmsDb, SettleOutcome};

/// Retention for a delivery's idempotency record: long enough to outlive any
/// plausible crash-and-reclaim cycle (the visibility timeout is two minutes),
/// short enough that the tree does not grow without bound.
const IDEMPOTENCY_RETENTION: chrono::Duration = chrono::Duration::days(7);

fn idempotency_key(delivery: &Delivery) -> String {
    format!("outbound-delivery:{}", delivery.id)
}

/// Run one claimed delivery through the pipeline to completion: settles or
/// reschedules it in `PmsDb` before returning. Never propagates an error —
/// every fallible step degrades into a delivery-state transition instead,
/// since there is no caller left to hand a `Result` to once a delivery has
/// been claimed off the queue.
pub async fn dispatch_one<C: Clock>(
    db: &PmsDb,
    registry: &AdapterRegistry,
    circuit: &CircuitBreaker<C>,
    rate_limiter: &RateLimiter<C>,
    clock: &C,
    delivery: Delivery,
    credential_refresh_enabled: bool,
) {
    let outbox = Outbox::new(db);
    let now = clock.now();

    let key = idempotency_key(&delivery);
    if let Ok(Some(record)) = db.get_idempotency_record(&key) {
        if record.expires_at > now {
            tracing::debug!(delivery_id = %delivery.id, "replaying already-settled delivery, skipping adapter call");
            let _ = outbox.settle(delivery.id, SettleOutcome::Succeeded, now);
            return;
        }
    }

    if circuit.allow(delivery.channel) == Decision::Deny {
        let delay = chrono::Duration::from_std(pms_core::constants::CIRCUIT_COOLDOWN).unwrap_or_default();
        tracing::debug!(delivery_id = %delivery.id, channel = %delivery.channel, "circuit open, requeuing delivery");
        let _ = outbox.reschedule(delivery.id, delay, now);
        return;
    }

    match rate_limiter.try_acquire(delivery.channel, 1) {
        Acquisition::Denied { wait } => {
            tracing::debug!(delivery_id = %delivery.id, channel = %delivery.channel, wait_ms = wait.as_millis() as u64, "rate limited, requeuing delivery");
            let delay = chrono::Duration::from_std(wait).unwrap_or_default();
            let _ = outbox.reschedule(delivery.id, delay, now);
            return;
        }
        Acquisition::Granted => {}
    }

    let connection = match outbox.get_connection(delivery.property_id, delivery.channel) {
        Ok(Some(conn)) if conn.sync_enabled => conn,
        Ok(Some(_)) => {
            let _ = outbox.settle(delivery.id, SettleOutcome::PermanentFailure { error: "connection disabled".into() }, now);
            return;
        }
        Ok(None) => {
            let _ = outbox.settle(delivery.id, SettleOutcome::PermanentFailure { error: "no channel connection configured".into() }, now);
            return;
        }
        Err(e) => {
            tracing::warn!(delivery_id = %delivery.id, error = %e, "failed to load channel connection");
            let _ = outbox.reschedule(delivery.id, chrono::Duration::seconds(5), now);
            return;
        }
    };

    let adapter = registry.get(delivery.channel);

    let event = match outbox.get_event(delivery.event_id) {
        Ok(Some(event)) => event,
        Ok(None) => {
            let _ = outbox.settle(delivery.id, SettleOutcome::PermanentFailure { error: "outbound event missing".into() }, now);
            return;
        }
        Err(e) => {
            let _ = outbox.reschedule(delivery.id, chrono::Duration::seconds(5), now);
            tracing::warn!(delivery_id = %delivery.id, error = %e, "failed to load outbound event");
            return;
        }
    };

    let outcome: Result<(), PmsError> = match event.kind {
        OutboundEventKind::BookingCreated | OutboundEventKind::BookingUpdated => {
            match bincode::deserialize::<Booking>(&event.payload) {
                Ok(booking) => match adapter.upsert_booking(&connection, &booking).await {
                    Ok(external_id) => {
                        if let Err(e) = db.put_channel_link(booking.id.as_uuid(), delivery.channel, &external_id) {
                            tracing::warn!(delivery_id = %delivery.id, error = %e, "failed to record channel link after successful upsert");
                        }
                        Ok(())
                    }
                    Err(e) => Err(e),
                },
                Err(e) => Err(PmsError::Serialization(e.to_string())),
            }
        }
        OutboundEventKind::BookingCancelled => cancel_booking(db, &adapter, &connection, BookingId::from(delivery.entity_id)).await,
        OutboundEventKind::AvailabilityUpdated => match bincode::deserialize::<Vec<AvailabilityBlock>>(&event.payload) {
            Ok(blocks) => adapter.push_availability(&connection, delivery.property_id, &blocks).await,
            Err(e) => Err(PmsError::Serialization(e.to_string())),
        },
        OutboundEventKind::PricingUpdated => match bincode::deserialize::<Vec<PricePoint>>(&event.payload) {
            Ok(prices) => adapter.push_pricing(&connection, delivery.property_id, &prices).await,
            Err(e) => Err(PmsError::Serialization(e.to_string())),
        },
    };

    settle_outcome(db, &outbox, &adapter, &connection, delivery, outcome, now, rate_limiter, circuit, credential_refresh_enabled).await;
}

async fn cancel_booking(
    db: &PmsDb,
    adapter: &std::sync::Arc<dyn pms_channels::ChannelAdapter>,
    connection: &pms_core::ChannelConnection,
    booking_id: BookingId,
) -> Result<(), PmsError> {
    match db.get_channel_link(booking_id.as_uuid(), connection.channel) {
        Ok(Some(external_id)) => {
            adapter.cancel_booking(connection, &external_id).await?;
            let _ = db.remove_channel_link(booking_id.as_uuid(), connection.channel);
            Ok(())
        }
        Ok(None) => {
            // Never pushed to this channel (or already cancelled there) —
            // nothing remote to cancel, so this is a no-op success.
            Ok(())
        }
        Err(e) => Err(e),
    }
}

#[allow(clippy::too_many_arguments)]
async fn settle_outcome<C: Clock>(
    db: &PmsDb,
    outbox: &Outbox<'_>,
    adapter: &std::sync::Arc<dyn pms_channels::ChannelAdapter>,
    connection: &pms_core::ChannelConnection,
    delivery: Delivery,
    outcome: Result<(), PmsError>,
    now: DateTime<Utc>,
    rate_limiter: &RateLimiter<C>,
    circuit: &CircuitBreaker<C>,
    credential_refresh_enabled: bool,
) {
    match outcome {
        Ok(()) => {
            circuit.on_success(delivery.channel);
            let record = IdempotencyRecord {
                key: idempotency_key(&delivery),
                result_snapshot: b"ok".to_vec(),
                expires_at: now + IDEMPOTENCY_RETENTION,
            };
            if let Err(e) = db.put_idempotency_record(&record) {
                tracing::warn!(delivery_id = %delivery.id, error = %e, "failed to persist idempotency record");
            }
            let _ = outbox.settle(delivery.id, SettleOutcome::Succeeded, now);
        }
        Err(PmsError::RateLimited { retry_after_ms }) => {
            rate_limiter.penalize(delivery.channel, std::time::Duration::from_millis(retry_after_ms));
            let _ = outbox.reschedule(delivery.id, chrono::Duration::milliseconds(retry_after_ms as i64), now);
        }
        Err(PmsError::AdapterTransient { cause }) => {
            circuit.on_failure(delivery.channel);
            let _ = outbox.settle(delivery.id, SettleOutcome::TransientFailure { error: cause }, now);
        }
        Err(PmsError::AuthFailed { connection_id }) => {
            handle_auth_failure(db, outbox, adapter, connection, delivery, connection_id, now, circuit, credential_refresh_enabled).await;
        }
        Err(PmsError::AdapterPermanent { cause }) => {
            let _ = outbox.settle(delivery.id, SettleOutcome::PermanentFailure { error: cause }, now);
        }
        Err(other) => {
            // Any other `PmsError` reaching here (store/internal failures
            // surfaced through an adapter call) is treated as transient —
            // it was never classified by the platform at all.
            circuit.on_failure(delivery.channel);
            let _ = outbox.settle(delivery.id, SettleOutcome::TransientFailure { error: other.to_string() }, now);
        }
    }
}

/// Handles an `AUTH_FAILED` outcome. When `credential_refresh_enabled` is
/// `false`, skips straight to disabling the connection — used by callers
/// (tests, or an operator who has disabled automatic refresh for a platform
/// mid-incident) that want the disable path without a live refresh attempt.
#[allow(clippy::too_many_arguments)]
async fn handle_auth_failure<C: Clock>(
    db: &PmsDb,
    outbox: &Outbox<'_>,
    adapter: &std::sync::Arc<dyn pms_channels::ChannelAdapter>,
    connection: &pms_core::ChannelConnection,
    delivery: Delivery,
    connection_id: uuid::Uuid,
    now: DateTime<Utc>,
    circuit: &CircuitBreaker<C>,
    credential_refresh_enabled: bool,
) {
    circuit.on_auth_failure(delivery.channel);

    let refreshed = if credential_refresh_enabled {
        adapter.refresh_credentials(connection).await
    } else {
        Err(PmsError::AuthFailed { connection_id })
    };

    match refreshed {
        Ok(refreshed) => {
            tracing::info!(%connection_id, channel = %delivery.channel, "credential refresh succeeded after auth failure, will retry");
            if let Err(e) = outbox.upsert_connection(refreshed) {
                tracing::warn!(%connection_id, error = %e, "failed to persist refreshed credentials");
            }
            let _ = outbox.settle(delivery.id, SettleOutcome::TransientFailure { error: "auth failed, credentials refreshed".into() }, now);
        }
        Err(e) => {
            tracing::warn!(%connection_id, channel = %delivery.channel, error = %e, "credential refresh failed or disabled, disabling connection");
            let mut disabled = connection.clone();
            disabled.sync_enabled = false;
            disabled.last_error = Some(format!("auth failed and credential refresh failed: {e}"));
            let _ = outbox.upsert_connection(disabled);
            let _ = db.flush();
            let _ = outbox.settle(delivery.id, SettleOutcome::PermanentFailure { error: "auth failed, credential refresh exhausted".into() }, now);
        }
    }
}
