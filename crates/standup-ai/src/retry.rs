//! Backoff policy for model requests.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use chrono::{DateTime, Utc};

pub const BASE_BACKOFF_MS: u64 = 200;
const MAX_BACKOFF_DOUBLINGS: usize = 6;

static REQUEST_SEQUENCE: AtomicU64 = AtomicU64::new(1);
static JITTER_SEQUENCE: AtomicU64 = AtomicU64::new(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
/// How many times, and for how long, a failed model request may be retried.
///
/// A `budget_ms` of zero means the total wait is unbounded.
pub struct RetryPolicy {
    pub max_retries: usize,
    pub budget_ms: u64,
    pub jitter: bool,
}

impl RetryPolicy {
    /// Delay before retry number `attempt + 1`, or `None` once retries or budget run out.
    ///
    /// A server `Retry-After` hint raises the delay but never lowers it.
    pub fn delay_before_retry(
        &self,
        attempt: usize,
        elapsed: Duration,
        retry_after_ms: Option<u64>,
    ) -> Option<Duration> {
        if attempt >= self.max_retries {
            return None;
        }
        let backoff = backoff_ms(attempt, self.jitter);
        let delay_ms = retry_after_ms.map_or(backoff, |hint| backoff.max(hint));
        let elapsed_ms = u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX);
        if self.budget_ms > 0 && elapsed_ms.saturating_add(delay_ms) > self.budget_ms {
            return None;
        }
        Some(Duration::from_millis(delay_ms))
    }
}

pub fn is_transient_status(status: u16) -> bool {
    matches!(status, 408 | 409 | 425 | 429) || status >= 500
}

pub fn is_transient_transport_error(error: &reqwest::Error) -> bool {
    error.is_timeout() || error.is_connect() || error.is_request() || error.is_body()
}

/// Exponential backoff capped after six doublings; jitter keeps it in `[50%, 100%]`.
fn backoff_ms(attempt: usize, jitter: bool) -> u64 {
    let ceiling = BASE_BACKOFF_MS.saturating_mul(1_u64 << attempt.min(MAX_BACKOFF_DOUBLINGS));
    if !jitter {
        return ceiling;
    }
    let spread = ceiling / 2;
    let seed = JITTER_SEQUENCE
        .fetch_add(1, Ordering::Relaxed)
        .wrapping_mul(6_364_136_223_846_793_005)
        .wrapping_add(1_442_695_040_888_963_407);
    ceiling - spread + (seed >> 33) % (spread + 1)
}

/// `Retry-After` as milliseconds, accepting delta-seconds or an HTTP date.
pub fn retry_after_ms(headers: &reqwest::header::HeaderMap) -> Option<u64> {
    let raw = headers
        .get(reqwest::header::RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim();
    if let Ok(seconds) = raw.parse::<u64>() {
        return Some(seconds.saturating_mul(1_000));
    }
    let retry_at = DateTime::parse_from_rfc2822(raw).ok()?.with_timezone(&Utc);
    let remaining = retry_at.signed_duration_since(Utc::now()).num_milliseconds();
    Some(u64::try_from(remaining).unwrap_or(0))
}

pub fn request_id() -> String {
    let millis = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis();
    let sequence = REQUEST_SEQUENCE.fetch_add(1, Ordering::Relaxed);
    format!("standup-{millis}-{sequence}")
}
