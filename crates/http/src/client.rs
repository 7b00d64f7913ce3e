use reqwest::header::HeaderValue;

use traceline_core::context::TraceContext;
use traceline_core::header::TRACE_HEADER;

/// Outbound HTTP client instrumentation. Each call produces exactly one
/// child subsegment named for the target host, carries the propagation
/// header downstream, and records status or transport failure. The
/// caller's error handling is untouched: `reqwest` errors come back
/// unchanged.
#[derive(Clone)]
pub struct TracedClient {
    inner: reqwest::Client,
}

impl TracedClient {
    pub fn new(inner: reqwest::Client) -> Self {
        Self { inner }
    }

    pub async fn get(
        &self,
        cx: &TraceContext,
        url: &str,
    ) -> reqwest::Result<reqwest::Response> {
        let req = self.inner.get(url).build()?;
        self.execute(cx, req).await
    }

    pub async fn execute(
        &self,
        cx: &TraceContext,
        mut req: reqwest::Request,
    ) -> reqwest::Result<reqwest::Response> {
        let name = req.url().host_str().unwrap_or("remote").to_string();
        let (child, guard) = cx.open_subsegment(&name);
        child.set_http_request(req.method().as_str(), req.url().path());
        if let Ok(value) = HeaderValue::from_str(&child.header_value()) {
            req.headers_mut().insert(TRACE_HEADER, value);
        }

        match self.inner.execute(req).await {
            Ok(resp) => {
                guard.finish_with_status(resp.status().as_u16());
                Ok(resp)
            }
            Err(e) => {
                guard.finish(true);
                Err(e)
            }
        }
    }
}
