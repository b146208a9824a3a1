use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::db::Capture;

const MAX_EXPONENT: u32 = 16;

/// `base * 2^retry_count`, with the exponent capped.
pub fn retry_delay(base: Duration, retry_count: u32) -> Duration {
    base.saturating_mul(1u32 << retry_count.min(MAX_EXPONENT))
}

/// Whether an automatic pass may attempt this capture now. Captures that
/// never failed are always due; failed ones wait out their backoff since
/// the last attempt.
pub fn is_due(capture: &Capture, now: DateTime<Utc>, base: Duration) -> bool {
    if capture.retry_count == 0 {
        return true;
    }
    let Some(last_attempt) = capture.last_attempt_at else {
        return true;
    };
    let elapsed = (now - last_attempt).to_std().unwrap_or(Duration::ZERO);
    elapsed >= retry_delay(base, capture.retry_count)
}
