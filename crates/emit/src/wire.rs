use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use traceline_core::error::{Result, TracelineError};
use traceline_core::model::{HttpInfo, SegmentSnapshot, SubsegmentSnapshot};
use traceline_core::time::epoch_seconds;

/// Every datagram starts with this header line, then a newline, then the
/// segment document JSON.
pub const WIRE_HEADER: &str = r#"{"format": "json", "version": 1}"#;

/// Segment document as it appears on the wire. Subsegments reuse the same
/// shape without `trace_id`; timestamps are floating-point epoch seconds.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WireEntity {
    pub name: String,
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trace_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<String>,
    pub start_time: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_time: Option<f64>,
    #[serde(default, skip_serializing_if = "is_false")]
    pub in_progress: bool,
    #[serde(default, skip_serializing_if = "is_false")]
    pub error: bool,
    #[serde(default, skip_serializing_if = "is_false")]
    pub fault: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub http: Option<WireHttp>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: BTreeMap<String, BTreeMap<String, Value>>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub subsegments: Vec<WireEntity>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WireHttp {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request: Option<WireHttpRequest>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response: Option<WireHttpResponse>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WireHttpRequest {
    pub method: String,
    pub url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WireHttpResponse {
    pub status: u16,
}

fn is_false(v: &bool) -> bool {
    !*v
}

pub fn to_wire(segment: &SegmentSnapshot) -> WireEntity {
    WireEntity {
        name: segment.name.clone(),
        id: segment.id.as_str().to_string(),
        trace_id: Some(segment.trace_id.as_str().to_string()),
        parent_id: segment.parent_id.as_ref().map(|p| p.as_str().to_string()),
        start_time: epoch_seconds(segment.start_ts),
        end_time: segment.end_ts.map(epoch_seconds),
        in_progress: segment.end_ts.is_none(),
        error: segment.error,
        fault: segment.fault,
        http: segment.http.as_ref().map(http_to_wire),
        metadata: metadata_to_wire(&segment.metadata),
        subsegments: segment.subsegments.iter().map(subsegment_to_wire).collect(),
    }
}

fn subsegment_to_wire(subsegment: &SubsegmentSnapshot) -> WireEntity {
    WireEntity {
        name: subsegment.name.clone(),
        id: subsegment.id.as_str().to_string(),
        trace_id: None,
        parent_id: None,
        start_time: epoch_seconds(subsegment.start_ts),
        end_time: subsegment.end_ts.map(epoch_seconds),
        in_progress: subsegment.end_ts.is_none(),
        error: subsegment.error,
        fault: subsegment.fault,
        http: subsegment.http.as_ref().map(http_to_wire),
        metadata: metadata_to_wire(&subsegment.metadata),
        subsegments: subsegment.subsegments.iter().map(subsegment_to_wire).collect(),
    }
}

fn http_to_wire(http: &HttpInfo) -> WireHttp {
    WireHttp {
        request: (!http.method.is_empty() || !http.path.is_empty()).then(|| WireHttpRequest {
            method: http.method.clone(),
            url: http.path.clone(),
        }),
        response: http.status.map(|status| WireHttpResponse { status }),
    }
}

fn metadata_to_wire(metadata: &BTreeMap<String, Value>) -> BTreeMap<String, BTreeMap<String, Value>> {
    if metadata.is_empty() {
        return BTreeMap::new();
    }
    // Entries live under the "default" namespace on the wire.
    let mut out = BTreeMap::new();
    out.insert("default".to_string(), metadata.clone());
    out
}

pub fn encode_datagram(segment: &SegmentSnapshot) -> Result<Vec<u8>> {
    let body = serde_json::to_vec(&to_wire(segment))
        .map_err(|e| TracelineError::Emit(format!("segment serialization failed: {e}")))?;
    let mut out = Vec::with_capacity(WIRE_HEADER.len() + 1 + body.len());
    out.extend_from_slice(WIRE_HEADER.as_bytes());
    out.push(b'\n');
    out.extend_from_slice(&body);
    Ok(out)
}

pub fn decode_datagram(bytes: &[u8]) -> Result<WireEntity> {
    let pos = bytes
        .iter()
        .position(|b| *b == b'\n')
        .ok_or_else(|| TracelineError::Emit("datagram missing header line".to_string()))?;

    let header: Value = serde_json::from_slice(&bytes[..pos])
        .map_err(|e| TracelineError::Emit(format!("invalid datagram header: {e}")))?;
    if header.get("format") != Some(&Value::from("json")) {
        return Err(TracelineError::Emit(format!(
            "unsupported datagram format: {header}"
        )));
    }

    serde_json::from_slice(&bytes[pos + 1..])
        .map_err(|e| TracelineError::Emit(format!("invalid segment document: {e}")))
}
