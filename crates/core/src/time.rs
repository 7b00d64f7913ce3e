use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::error::{Result, TracelineError};

/// Wire timestamps are floating-point epoch seconds.
pub fn epoch_seconds(ts: DateTime<Utc>) -> f64 {
    ts.timestamp() as f64 + f64::from(ts.timestamp_subsec_nanos()) / 1e9
}

pub fn parse_duration_str(input: &str) -> Result<Duration> {
    humantime::parse_duration(input)
        .map_err(|e| TracelineError::Parse(format!("invalid duration {input}: {e}")))
}
