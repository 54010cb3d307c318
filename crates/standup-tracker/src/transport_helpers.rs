use std::time::Duration;

const MAX_RETRY_DELAY_MS: u64 = 30_000;

/// Parse a `retry-after` header expressed in whole seconds.
pub fn parse_retry_after(headers: &reqwest::header::HeaderMap) -> Option<Duration> {
    let raw = headers.get("retry-after")?.to_str().ok()?;
    let seconds = raw.trim().parse::<u64>().ok()?;
    Some(Duration::from_secs(seconds))
}

/// Exponential delay for the 1-based `attempt`, floored by any server-provided hint.
///
/// Both the computed delay and the hint are capped at `MAX_RETRY_DELAY_MS`.
pub fn retry_delay(base_delay_ms: u64, attempt: usize, retry_after: Option<Duration>) -> Duration {
    let cap = Duration::from_millis(MAX_RETRY_DELAY_MS);
    if let Some(delay) = retry_after {
        return delay.max(Duration::from_millis(base_delay_ms)).min(cap);
    }
    let exponent = attempt.saturating_sub(1).min(10) as u32;
    let scaled = base_delay_ms.saturating_mul(2_u64.saturating_pow(exponent));
    Duration::from_millis(scaled).min(cap)
}

pub fn is_retryable_transport_error(error: &reqwest::Error) -> bool {
    error.is_timeout() || error.is_connect() || error.is_request()
}

pub fn is_retryable_tracker_status(status: u16) -> bool {
    status == 429 || status >= 500
}

pub fn truncate_for_error(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let mut truncated = text.chars().take(max_chars).collect::<String>();
    truncated.push_str("...");
    truncated
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use reqwest::header::{HeaderMap, HeaderValue};

    use super::{
        is_retryable_tracker_status, parse_retry_after, retry_delay, truncate_for_error,
    };

    #[test]
    fn unit_retry_delay_grows_exponentially_and_caps() {
        assert_eq!(retry_delay(100, 1, None), Duration::from_millis(100));
        assert_eq!(retry_delay(100, 3, None), Duration::from_millis(400));
        assert_eq!(retry_delay(10_000, 9, None), Duration::from_millis(30_000));
    }

    #[test]
    fn functional_retry_delay_prefers_retry_after_hint() {
        let mut headers = HeaderMap::new();
        headers.insert("retry-after", HeaderValue::from_static("2"));
        let hint = parse_retry_after(&headers);
        assert_eq!(hint, Some(Duration::from_secs(2)));
        assert_eq!(retry_delay(100, 1, hint), Duration::from_secs(2));
    }

    #[test]
    fn regression_retry_after_hint_is_capped() {
        let mut headers = HeaderMap::new();
        headers.insert("retry-after", HeaderValue::from_static("3600"));
        let hint = parse_retry_after(&headers);
        assert_eq!(retry_delay(100, 1, hint), Duration::from_secs(30));
    }

    #[test]
    fn unit_retryable_statuses_are_rate_limits_and_server_errors() {
        assert!(is_retryable_tracker_status(429));
        assert!(is_retryable_tracker_status(502));
        assert!(!is_retryable_tracker_status(404));
    }

    #[test]
    fn regression_truncate_for_error_respects_char_boundaries() {
        assert_eq!(truncate_for_error("şğüçö", 3), "şğü...");
        assert_eq!(truncate_for_error("short", 10), "short");
    }
}
