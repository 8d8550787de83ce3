//! Shared HTTP response classification (spec.md "Channel adapter contract
//! (wire-level)"): every REST adapter maps a `reqwest::Response` onto the
//! same error classes so the dispatcher never has to know which platform it
//! is talking to.

use pms_core::PmsError;

/// Turn a completed HTTP response into `Ok(body)` or the appropriate
/// `PmsError` integration variant, honoring `Retry-After` on 429s.
pub async fn classify(connection_id: uuid::Uuid, response: reqwest::Response) -> Result<String, PmsError> {
    let status = response.status();
    if status.is_success() {
        return response.text().await.map_err(|e| PmsError::AdapterTransient { cause: e.to_string() });
    }

    if status.as_u16() == 429 {
        let retry_after_ms = response
            .headers()
            .get(reqwest::header::RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<u64>().ok())
            .map(|secs| secs * 1000)
            .unwrap_or(1_000);
        tracing::debug!(%connection_id, retry_after_ms, "channel platform rate limited this request");
        return Err(PmsError::RateLimited { retry_after_ms });
    }

    if status.as_u16() == 401 || status.as_u16() == 403 {
        tracing::warn!(%connection_id, %status, "channel platform rejected credentials");
        return Err(PmsError::AuthFailed { connection_id });
    }

    let body = response.text().await.unwrap_or_default();
    if status.is_client_error() {
        Err(PmsError::AdapterPermanent { cause: format!("{status}: {body}") })
    } else {
        tracing::warn!(%connection_id, %status, "channel platform returned a server error");
        Err(PmsError::AdapterTransient { cause: format!("{status}: {body}") })
    }
}
