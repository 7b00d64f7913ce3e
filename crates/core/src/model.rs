use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::ids::{EntityId, TraceId};

/// Ceiling on the total serialized metadata bytes across a segment and all
/// of its descendant subsegments.
pub const MAX_METADATA_BYTES: usize = 64 * 1024;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct HttpInfo {
    pub method: String,
    pub path: String,
    pub status: Option<u16>,
}

/// Immutable view of a closed subsegment, produced when the owning segment
/// is snapshotted for emission. Children are ordered by start time, ties
/// broken by the open-order sequence number.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SubsegmentSnapshot {
    pub name: String,
    pub id: EntityId,
    pub start_ts: DateTime<Utc>,
    pub end_ts: Option<DateTime<Utc>>,
    pub error: bool,
    pub fault: bool,
    pub http: Option<HttpInfo>,
    pub metadata: BTreeMap<String, Value>,
    pub subsegments: Vec<SubsegmentSnapshot>,
}

/// Immutable view of a closed segment tree, handed to the emitter.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SegmentSnapshot {
    pub trace_id: TraceId,
    /// Upstream entity id carried in the inbound propagation header, if any.
    pub parent_id: Option<EntityId>,
    pub sampled: bool,
    pub name: String,
    pub id: EntityId,
    pub start_ts: DateTime<Utc>,
    pub end_ts: Option<DateTime<Utc>>,
    pub error: bool,
    pub fault: bool,
    pub http: Option<HttpInfo>,
    pub metadata: BTreeMap<String, Value>,
    pub subsegments: Vec<SubsegmentSnapshot>,
}

impl SegmentSnapshot {
    pub fn duration_ms(&self) -> i64 {
        match self.end_ts {
            Some(end) => (end - self.start_ts).num_milliseconds().max(0),
            None => 0,
        }
    }
}

impl SubsegmentSnapshot {
    pub fn duration_ms(&self) -> i64 {
        match self.end_ts {
            Some(end) => (end - self.start_ts).num_milliseconds().max(0),
            None => 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, TimeZone, Utc};

    use super::*;

    #[test]
    fn duration_is_non_negative() {
        let start = Utc.with_ymd_and_hms(2026, 2, 1, 0, 0, 0).unwrap();
        let snapshot = SubsegmentSnapshot {
            name: "work".to_string(),
            id: EntityId::generate(),
            start_ts: start,
            end_ts: Some(start - Duration::milliseconds(5)),
            error: false,
            fault: false,
            http: None,
            metadata: BTreeMap::new(),
            subsegments: Vec::new(),
        };
        assert_eq!(snapshot.duration_ms(), 0);
    }

    #[test]
    fn open_snapshot_has_zero_duration() {
        let start = Utc.with_ymd_and_hms(2026, 2, 1, 0, 0, 0).unwrap();
        let snapshot = SubsegmentSnapshot {
            name: "work".to_string(),
            id: EntityId::generate(),
            start_ts: start,
            end_ts: None,
            error: false,
            fault: false,
            http: None,
            metadata: BTreeMap::new(),
            subsegments: Vec::new(),
        };
        assert_eq!(snapshot.duration_ms(), 0);
    }
}
