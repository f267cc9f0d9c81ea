pub mod api;
pub mod data_url;
pub mod events;
pub mod graph;
pub mod models;

use chrono::{SecondsFormat, Utc};

/// ISO-8601 UTC timestamp with millisecond precision, e.g.
/// `2025-01-31T12:00:00.000Z`.
pub fn now_utc_iso() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}
