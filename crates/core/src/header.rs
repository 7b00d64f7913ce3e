use crate::error::{Result, TracelineError};
use crate::ids::{EntityId, TraceId};

/// Propagation header name, read on ingress and written on egress.
pub const TRACE_HEADER: &str = "X-Amzn-Trace-Id";

/// Parsed form of the propagation header value, e.g.
/// `Root=1-5f84c7a1-e7d84594aac8b894c0b2cf5d;Parent=00f067aa0ba902b7;Sampled=1`.
///
/// Fields are `;`-separated and order-insensitive; unknown fields are
/// ignored. Any malformed field invalidates the whole header, which callers
/// treat as absent.
#[derive(Debug, Clone, PartialEq)]
pub struct TraceHeader {
    pub root: TraceId,
    pub parent: Option<EntityId>,
    pub sampled: Option<bool>,
}

impl TraceHeader {
    pub fn parse(value: &str) -> Result<Self> {
        let mut root = None;
        let mut parent = None;
        let mut sampled = None;

        for field in value.split(';') {
            let field = field.trim();
            if field.is_empty() {
                continue;
            }
            let Some((key, val)) = field.split_once('=') else {
                return Err(TracelineError::Parse(format!(
                    "malformed trace header field: {field}"
                )));
            };
            match key.trim() {
                "Root" => root = Some(TraceId::parse(val.trim())?),
                "Parent" => parent = Some(EntityId::parse(val.trim())?),
                "Sampled" => {
                    sampled = Some(match val.trim() {
                        "1" => true,
                        "0" => false,
                        other => {
                            return Err(TracelineError::Parse(format!(
                                "invalid sampled flag: {other}"
                            )));
                        }
                    });
                }
                _ => {}
            }
        }

        let Some(root) = root else {
            return Err(TracelineError::Parse(
                "trace header missing Root field".to_string(),
            ));
        };
        Ok(Self {
            root,
            parent,
            sampled,
        })
    }

    pub fn to_value(&self) -> String {
        let mut out = format!("Root={}", self.root.as_str());
        if let Some(parent) = &self.parent {
            out.push_str(";Parent=");
            out.push_str(parent.as_str());
        }
        if let Some(sampled) = self.sampled {
            out.push_str(if sampled { ";Sampled=1" } else { ";Sampled=0" });
        }
        out
    }
}
