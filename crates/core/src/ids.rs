use chrono::Utc;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{Result, TracelineError};

/// Trace identifier: `1-{8 hex epoch seconds}-{24 hex random}`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TraceId(String);

/// Segment/subsegment identifier: 16 lowercase hex chars.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EntityId(String);

impl TraceId {
    pub fn parse(input: &str) -> Result<Self> {
        let mut parts = input.splitn(3, '-');
        let (Some(version), Some(epoch), Some(random)) = (parts.next(), parts.next(), parts.next())
        else {
            return Err(TracelineError::Parse(format!("invalid trace id: {input}")));
        };
        if version != "1"
            || epoch.len() != 8
            || random.len() != 24
            || !epoch.chars().all(|c| c.is_ascii_hexdigit())
            || !random.chars().all(|c| c.is_ascii_hexdigit())
        {
            return Err(TracelineError::Parse(format!("invalid trace id: {input}")));
        }
        Ok(Self(input.to_ascii_lowercase()))
    }

    pub fn generate() -> Self {
        let epoch = Utc::now().timestamp().max(0);
        let random = Uuid::new_v4().simple().to_string();
        Self(format!("1-{epoch:08x}-{}", &random[..24]))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl EntityId {
    pub fn parse(input: &str) -> Result<Self> {
        if input.len() != 16 || !input.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(TracelineError::Parse(format!("invalid entity id: {input}")));
        }
        Ok(Self(input.to_ascii_lowercase()))
    }

    pub fn generate() -> Self {
        let random = Uuid::new_v4().simple().to_string();
        Self(random[..16].to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}
