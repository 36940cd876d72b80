use std::time::SystemTime;
use time::{OffsetDateTime, format_description::well_known::Rfc3339};

pub mod admin;
pub mod health;
pub mod participant;
pub mod session;
pub mod sse;
pub mod validation;

pub(crate) fn format_system_time(time: SystemTime) -> String {
    OffsetDateTime::from(time)
        .format(&Rfc3339)
        .unwrap_or_else(|_| "invalid-timestamp".into())
}

pub(crate) fn format_optional_time(time: Option<SystemTime>) -> Option<String> {
    time.map(format_system_time)
}

/// Parse an RFC 3339 timestamp supplied by a client.
pub(crate) fn parse_timestamp(raw: &str) -> Result<SystemTime, time::error::Parse> {
    OffsetDateTime::parse(raw, &Rfc3339).map(SystemTime::from)
}
