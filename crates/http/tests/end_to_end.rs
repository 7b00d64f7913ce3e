use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::routing::get;
use axum::{Extension, Router};
use tower::ServiceExt;

use testkit::{CollectingSink, FakeDaemon};
use traceline_core::context::{TraceContext, Tracer, capture};
use traceline_core::header::{TRACE_HEADER, TraceHeader};
use traceline_emit::{Emitter, EmitterConfig};
use traceline_http::{TraceLayer, TracedClient};

async fn get_roles(Extension(cx): Extension<TraceContext>) -> &'static str {
    let built: Result<usize, String> = capture(&cx, "BuildRolesDetail", |cx| async move {
        let roles: Vec<String> = (0..50).map(|i| format!("role-{i}")).collect();
        if let Err(e) = cx.put_metadata("No. roles built", roles.len()) {
            return Err(e.to_string());
        }
        Ok(roles.len())
    })
    .await;
    assert_eq!(built.unwrap(), 50);
    "ok"
}

fn roles_app(tracer: Tracer) -> Router {
    Router::new()
        .route("/roles", get(get_roles))
        .route_layer(TraceLayer::new(tracer, "GetRoles"))
}

#[tokio::test]
async fn one_segment_per_request_with_capture_tree() {
    let sink = CollectingSink::default();
    let app = roles_app(Tracer::new(Arc::new(sink.clone())));

    let resp = app
        .oneshot(Request::builder().uri("/roles").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    assert!(resp.headers().contains_key(TRACE_HEADER));

    let segments = sink.segments();
    assert_eq!(segments.len(), 1);
    let segment = &segments[0];
    assert_eq!(segment.name, "GetRoles");
    assert_eq!(segment.http.as_ref().unwrap().status, Some(200));
    assert_eq!(segment.http.as_ref().unwrap().method, "GET");
    assert_eq!(segment.subsegments.len(), 1);

    let child = &segment.subsegments[0];
    assert_eq!(child.name, "BuildRolesDetail");
    assert_eq!(
        child.metadata.get("No. roles built"),
        Some(&serde_json::Value::from(50))
    );
}

#[tokio::test]
async fn adopts_valid_inbound_header() {
    let sink = CollectingSink::default();
    let app = roles_app(Tracer::new(Arc::new(sink.clone())));

    let resp = app
        .oneshot(
            Request::builder()
                .uri("/roles")
                .header(
                    TRACE_HEADER,
                    "Root=1-5f84c7a1-e7d84594aac8b894c0b2cf5d;Parent=00f067aa0ba902b7;Sampled=1",
                )
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    let segments = sink.segments();
    assert_eq!(
        segments[0].trace_id.as_str(),
        "1-5f84c7a1-e7d84594aac8b894c0b2cf5d"
    );
    assert_eq!(
        segments[0].parent_id.as_ref().unwrap().as_str(),
        "00f067aa0ba902b7"
    );

    let echoed = resp.headers().get(TRACE_HEADER).unwrap().to_str().unwrap();
    let echoed = TraceHeader::parse(echoed).unwrap();
    assert_eq!(echoed.root.as_str(), "1-5f84c7a1-e7d84594aac8b894c0b2cf5d");
}

#[tokio::test]
async fn malformed_header_gets_a_fresh_trace_id() {
    let sink = CollectingSink::default();
    let app = roles_app(Tracer::new(Arc::new(sink.clone())));

    app.oneshot(
        Request::builder()
            .uri("/roles")
            .header(TRACE_HEADER, "Root=garbage;Sampled=maybe")
            .body(Body::empty())
            .unwrap(),
    )
    .await
    .unwrap();

    let segments = sink.segments();
    assert_eq!(segments.len(), 1);
    assert_ne!(segments[0].trace_id.as_str(), "garbage");
    assert!(segments[0].parent_id.is_none());
}

#[tokio::test]
async fn unsampled_request_is_traced_but_not_emitted() {
    let sink = CollectingSink::default();
    let app = roles_app(Tracer::new(Arc::new(sink.clone())));

    let resp = app
        .oneshot(
            Request::builder()
                .uri("/roles")
                .header(
                    TRACE_HEADER,
                    "Root=1-5f84c7a1-e7d84594aac8b894c0b2cf5d;Sampled=0",
                )
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    assert!(sink.is_empty());
}

#[tokio::test]
async fn panicking_handler_still_closes_the_segment() {
    async fn boom() -> &'static str {
        panic!("handler exploded");
    }

    let sink = CollectingSink::default();
    let tracer = Tracer::new(Arc::new(sink.clone()));
    let app = Router::new()
        .route("/boom", get(boom))
        .route_layer(TraceLayer::new(tracer, "Boom"));

    let joined = tokio::spawn(
        app.oneshot(Request::builder().uri("/boom").body(Body::empty()).unwrap()),
    )
    .await;
    assert!(joined.unwrap_err().is_panic());

    let segments = sink.segments();
    assert_eq!(segments.len(), 1);
    assert!(segments[0].fault);
    assert!(segments[0].end_ts.is_some());
}

#[tokio::test]
async fn outbound_timeout_marks_subsegment_errored() {
    // Accepts the connection and never answers.
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let (_stream, _) = listener.accept().await.unwrap();
        tokio::time::sleep(Duration::from_secs(30)).await;
    });

    let sink = CollectingSink::default();
    let tracer = Tracer::new(Arc::new(sink.clone()));
    let (cx, guard) = tracer.open_segment("GetRoles", None);

    let client = TracedClient::new(
        reqwest::Client::builder()
            .timeout(Duration::from_millis(100))
            .build()
            .unwrap(),
    );
    let result = client.get(&cx, &format!("http://{addr}/detail")).await;
    assert!(result.is_err());

    guard.close(Some(200));
    let segments = sink.segments();
    let segment = &segments[0];
    assert!(!segment.fault);
    assert_eq!(segment.http.as_ref().unwrap().status, Some(200));
    assert_eq!(segment.subsegments.len(), 1);

    let child = &segment.subsegments[0];
    assert_eq!(child.name, "127.0.0.1");
    assert!(child.error);
    assert!(child.end_ts.is_some());
}

#[tokio::test]
async fn outbound_call_carries_the_propagation_header() {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let downstream: Router = Router::new().route(
        "/detail",
        get(|req: Request<Body>| async move {
            req.headers()
                .get(TRACE_HEADER)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string)
                .unwrap_or_default()
        }),
    );
    tokio::spawn(async move {
        axum::serve(listener, downstream).await.unwrap();
    });

    let sink = CollectingSink::default();
    let tracer = Tracer::new(Arc::new(sink.clone()));
    let (cx, guard) = tracer.open_segment("GetRoles", None);

    let client = TracedClient::new(reqwest::Client::new());
    let resp = client
        .get(&cx, &format!("http://{addr}/detail"))
        .await
        .unwrap();
    let body = resp.text().await.unwrap();
    let seen = TraceHeader::parse(&body).unwrap();
    assert_eq!(seen.root, cx.trace_id());

    guard.close(Some(200));
    let segments = sink.segments();
    let child = &segments[0].subsegments[0];
    assert_eq!(seen.parent.unwrap(), child.id);
    assert_eq!(child.http.as_ref().unwrap().status, Some(200));
    assert!(!child.error);
}

#[tokio::test]
async fn emits_the_request_tree_to_the_daemon_over_udp() {
    let mut daemon = FakeDaemon::spawn().await.unwrap();
    let emitter = Emitter::spawn(EmitterConfig {
        daemon_addr: daemon.addr.to_string(),
        channel_capacity: 8,
    });
    let app = roles_app(Tracer::new(Arc::new(emitter)));

    let resp = app
        .oneshot(Request::builder().uri("/roles").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);

    let doc = daemon.recv_document(Duration::from_secs(2)).await.unwrap();
    assert_eq!(doc.name, "GetRoles");
    assert!(doc.trace_id.is_some());
    assert!(!doc.in_progress);
    assert_eq!(doc.http.as_ref().unwrap().response.as_ref().unwrap().status, 200);

    let child = &doc.subsegments[0];
    assert_eq!(child.name, "BuildRolesDetail");
    assert_eq!(
        child.metadata.get("default").and_then(|m| m.get("No. roles built")),
        Some(&serde_json::Value::from(50))
    );
}
