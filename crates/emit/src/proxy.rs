use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;

use traceline_core::error::{Result, TracelineError};

/// Request/response client for the daemon's local TCP endpoint. One
/// line-delimited JSON exchange per call; the daemon proxies the call to
/// the remote backend.
pub struct DaemonProxy {
    addr: String,
    timeout: Duration,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum DaemonRequest {
    GetSamplingRules,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SamplingRule {
    pub rule_name: String,
    pub priority: u32,
    pub fixed_rate: f64,
    pub reservoir_size: u32,
    #[serde(default)]
    pub service_name: String,
    #[serde(default)]
    pub http_method: String,
    #[serde(default)]
    pub url_path: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct SamplingRulesResponse {
    pub sampling_rules: Vec<SamplingRule>,
}

impl DaemonProxy {
    pub fn new(addr: impl Into<String>, timeout: Duration) -> Self {
        Self {
            addr: addr.into(),
            timeout,
        }
    }

    /// Fetches the sampling rules document through the daemon. Callers fall
    /// back to the default sampling decision on any proxy error.
    pub async fn get_sampling_rules(&self) -> Result<Vec<SamplingRule>> {
        let response: SamplingRulesResponse = self.request(&DaemonRequest::GetSamplingRules).await?;
        Ok(response.sampling_rules)
    }

    async fn request<R: DeserializeOwned>(&self, req: &DaemonRequest) -> Result<R> {
        let payload = serde_json::to_vec(req)
            .map_err(|e| TracelineError::Proxy(format!("encode daemon request: {e}")))?;

        let exchange = async {
            let stream = TcpStream::connect(&self.addr).await.map_err(|e| {
                TracelineError::Proxy(format!("connect daemon {}: {e}", self.addr))
            })?;
            let mut stream = BufReader::new(stream);
            stream
                .get_mut()
                .write_all(&payload)
                .await
                .map_err(|e| TracelineError::Proxy(format!("write daemon request: {e}")))?;
            stream
                .get_mut()
                .write_all(b"\n")
                .await
                .map_err(|e| TracelineError::Proxy(format!("write daemon request: {e}")))?;
            stream
                .get_mut()
                .flush()
                .await
                .map_err(|e| TracelineError::Proxy(format!("flush daemon request: {e}")))?;

            let mut line = String::new();
            stream
                .read_line(&mut line)
                .await
                .map_err(|e| TracelineError::Proxy(format!("read daemon response: {e}")))?;
            serde_json::from_str(&line)
                .map_err(|e| TracelineError::Proxy(format!("decode daemon response: {e}")))
        };

        tokio::time::timeout(self.timeout, exchange)
            .await
            .map_err(|_| TracelineError::Proxy(format!("daemon {} timed out", self.addr)))?
    }
}
