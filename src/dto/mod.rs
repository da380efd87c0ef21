use std::time::{Duration, SystemTime, UNIX_EPOCH};
use time::{OffsetDateTime, format_description::well_known::Rfc3339};

pub mod common;
pub mod health;
pub mod schema;
pub mod validation;
pub mod ws;

/// Wall-clock time in epoch milliseconds, as carried by envelopes.
pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_millis() as u64)
        .unwrap_or_default()
}

/// Render an epoch-milliseconds stamp as RFC 3339 for mirrored rows.
pub fn format_epoch_ms(millis: u64) -> String {
    let time = UNIX_EPOCH + Duration::from_millis(millis);
    OffsetDateTime::from(time)
        .format(&Rfc3339)
        .unwrap_or_else(|_| "invalid-timestamp".into())
}
