use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

pub const BASE_BACKOFF_MS: u64 = 200;
const MAX_BACKOFF_SHIFT: usize = 6;

static REQUEST_COUNTER: AtomicU64 = AtomicU64::new(1);
static JITTER_SEED: AtomicU64 = AtomicU64::new(0x5DEE_CE66_D1CE_4E5B);

/// Retry knobs shared by provider clients.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct RetryPolicy {
    pub(crate) max_retries: usize,
    pub(crate) budget_ms: u64,
    pub(crate) jitter: bool,
}

impl RetryPolicy {
    /// Delay before the next attempt, or `None` when retrying would exceed the budget.
    pub(crate) fn delay_for(
        &self,
        attempt: usize,
        elapsed_ms: u64,
        retry_after_ms: Option<u64>,
    ) -> Option<u64> {
        if attempt >= self.max_retries {
            return None;
        }
        let delay_ms = provider_retry_delay_ms(attempt, self.jitter, retry_after_ms);
        retry_budget_allows_delay(elapsed_ms, delay_ms, self.budget_ms).then_some(delay_ms)
    }
}

pub fn should_retry_status(status: u16) -> bool {
    matches!(status, 408 | 409 | 425 | 429) || status >= 500
}

pub fn next_backoff_ms(attempt: usize) -> u64 {
    BASE_BACKOFF_MS.saturating_mul(1_u64 << attempt.min(MAX_BACKOFF_SHIFT))
}

/// Exponential backoff with jitter bounded to `[50%, 100%]` of the deterministic delay.
pub fn next_backoff_ms_with_jitter(attempt: usize, jitter_enabled: bool) -> u64 {
    let base = next_backoff_ms(attempt);
    if !jitter_enabled || base <= 1 {
        return base;
    }
    let low = base / 2;
    let span = base - low;
    let seed = JITTER_SEED.fetch_add(0x9E37_79B9_7F4A_7C15, Ordering::Relaxed);
    let mixed = (seed ^ (seed >> 31)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    low + mixed % (span + 1)
}

pub fn parse_retry_after_ms(headers: &reqwest::header::HeaderMap) -> Option<u64> {
    let raw = headers.get("retry-after")?.to_str().ok()?.trim();
    if raw.is_empty() {
        return None;
    }
    if let Ok(seconds) = raw.parse::<u64>() {
        return Some(seconds.saturating_mul(1_000));
    }

    let retry_at = DateTime::parse_from_rfc2822(raw).ok()?.with_timezone(&Utc);
    let delay_ms = retry_at.signed_duration_since(Utc::now()).num_milliseconds();
    Some(u64::try_from(delay_ms).unwrap_or(0))
}

pub fn provider_retry_delay_ms(
    attempt: usize,
    jitter_enabled: bool,
    retry_after_ms: Option<u64>,
) -> u64 {
    let backoff_ms = next_backoff_ms_with_jitter(attempt, jitter_enabled);
    retry_after_ms.map_or(backoff_ms, |floor| backoff_ms.max(floor))
}

/// A zero budget means unbounded retries (subject to the attempt cap).
pub fn retry_budget_allows_delay(elapsed_ms: u64, delay_ms: u64, retry_budget_ms: u64) -> bool {
    retry_budget_ms == 0 || elapsed_ms.saturating_add(delay_ms) <= retry_budget_ms
}

/// Worst-case wall time of one completion call: every attempt runs into
/// `attempt_timeout_ms`, with unjittered backoff between attempts.
pub fn completion_deadline_ms(max_retries: usize, attempt_timeout_ms: u64) -> u64 {
    let attempts = u64::try_from(max_retries)
        .unwrap_or(u64::MAX)
        .saturating_add(1);
    let ramp_ms = (0..max_retries.min(MAX_BACKOFF_SHIFT))
        .map(next_backoff_ms)
        .fold(0_u64, u64::saturating_add);
    let capped_retries =
        u64::try_from(max_retries.saturating_sub(MAX_BACKOFF_SHIFT)).unwrap_or(u64::MAX);
    let plateau_ms = next_backoff_ms(MAX_BACKOFF_SHIFT).saturating_mul(capped_retries);
    attempt_timeout_ms
        .saturating_mul(attempts)
        .saturating_add(ramp_ms)
        .saturating_add(plateau_ms)
}

/// Retry budget that still leaves room for one full attempt before `deadline_ms`.
pub fn retry_budget_for_deadline(deadline_ms: u64, attempt_timeout_ms: u64) -> u64 {
    deadline_ms.saturating_sub(attempt_timeout_ms).max(1)
}

pub(crate) fn is_retryable_http_error(error: &reqwest::Error) -> bool {
    error.is_timeout() || error.is_connect() || error.is_request() || error.is_body()
}

pub fn new_request_id() -> String {
    let millis = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis();
    let count = REQUEST_COUNTER.fetch_add(1, Ordering::Relaxed);
    format!("kiln-{millis}-{count}")
}
