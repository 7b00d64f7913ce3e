use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use axum::body::Body;
use axum::http::{HeaderValue, Request, Response};
use tower::{Layer, Service};

use traceline_core::context::Tracer;
use traceline_core::header::{TRACE_HEADER, TraceHeader};

/// Per-route tracing middleware. Opens one segment per request under the
/// given descriptive name, stores the [`TraceContext`] in request
/// extensions for handlers, and closes the segment on every exit path,
/// handler error, panic and cancelled connection included.
///
/// [`TraceContext`]: traceline_core::context::TraceContext
#[derive(Clone)]
pub struct TraceLayer {
    tracer: Tracer,
    name: Arc<str>,
}

impl TraceLayer {
    pub fn new(tracer: Tracer, name: impl Into<Arc<str>>) -> Self {
        Self {
            tracer,
            name: name.into(),
        }
    }
}

impl<S> Layer<S> for TraceLayer {
    type Service = TraceService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        TraceService {
            inner,
            tracer: self.tracer.clone(),
            name: self.name.clone(),
        }
    }
}

#[derive(Clone)]
pub struct TraceService<S> {
    inner: S,
    tracer: Tracer,
    name: Arc<str>,
}

impl<S, B> Service<Request<B>> for TraceService<S>
where
    S: Service<Request<B>, Response = Response<Body>> + Clone + Send + 'static,
    S::Future: Send + 'static,
    B: Send + 'static,
{
    type Response = Response<Body>;
    type Error = S::Error;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, S::Error>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, mut req: Request<B>) -> Self::Future {
        // Swap in the clone so the ready service handles this request.
        let clone = self.inner.clone();
        let mut inner = std::mem::replace(&mut self.inner, clone);
        let tracer = self.tracer.clone();
        let name = self.name.clone();

        Box::pin(async move {
            let header = req
                .headers()
                .get(TRACE_HEADER)
                .and_then(|value| value.to_str().ok())
                .and_then(|value| TraceHeader::parse(value).ok());
            let (cx, guard) = tracer.open_segment(&name, header.as_ref());
            cx.set_http_request(req.method().as_str(), req.uri().path());
            let egress = cx.header_value();
            req.extensions_mut().insert(cx);

            match inner.call(req).await {
                Ok(mut resp) => {
                    guard.close(Some(resp.status().as_u16()));
                    if let Ok(value) = HeaderValue::from_str(&egress) {
                        resp.headers_mut().insert(TRACE_HEADER, value);
                    }
                    Ok(resp)
                }
                Err(e) => {
                    guard.close_error();
                    Err(e)
                }
            }
        })
    }
}
