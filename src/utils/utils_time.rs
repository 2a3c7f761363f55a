use std::time::{SystemTime, UNIX_EPOCH};

/// Wall-clock milliseconds since the unix epoch.
/// Creation times are persisted in this unit.
pub fn current_time_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Milliseconds elapsed since `created_at`, saturating at zero for clock skew.
pub fn age_ms(created_at: u64) -> u64 {
    current_time_ms().saturating_sub(created_at)
}
