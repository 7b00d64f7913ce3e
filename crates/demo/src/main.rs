use std::io::IsTerminal;
use std::sync::Arc;

use anyhow::Context;
use axum::routing::get;
use axum::{Extension, Json, Router};
use clap::Parser;
use serde::Serialize;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use traceline_core::capture;
use traceline_core::config::Config;
use traceline_core::context::{TraceContext, Tracer};
use traceline_emit::{DaemonProxy, Emitter, EmitterConfig};
use traceline_http::TraceLayer;

#[derive(Parser, Debug)]
#[command(name = "traceline-demo")]
#[command(about = "Sample service instrumented with traceline")]
struct Cli {
    #[arg(long, default_value = "127.0.0.1:8080")]
    bind: String,

    #[arg(long)]
    daemon_udp_addr: Option<String>,

    #[arg(long)]
    daemon_tcp_addr: Option<String>,
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(false)
        .with_ansi(std::io::stderr().is_terminal())
        .compact()
        .try_init();
}

#[derive(Debug, Clone, Serialize, Default)]
struct RoleDetail {
    name: String,
    policies: usize,
}

async fn get_roles(Extension(cx): Extension<TraceContext>) -> Json<Vec<RoleDetail>> {
    let roles = capture(&cx, "BuildRolesDetail", |cx| async move {
        let mut roles = Vec::new();
        for i in 0..50 {
            roles.push(RoleDetail {
                name: format!("role-{i}"),
                policies: i % 4,
            });
        }
        if let Err(e) = cx.put_metadata("No. roles built", roles.len()) {
            warn!(error = %e, "failed to attach roles metadata");
        }
        Ok::<_, std::convert::Infallible>(roles)
    })
    .await
    .unwrap_or_default();
    Json(roles)
}

fn app(tracer: Tracer) -> Router {
    Router::new()
        .route("/roles", get(get_roles))
        .route_layer(TraceLayer::new(tracer, "GetRoles"))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();
    let cli = Cli::parse();

    let mut cfg = Config::load()?;
    if let Some(addr) = cli.daemon_udp_addr {
        cfg.daemon_udp_addr = addr;
    }
    if let Some(addr) = cli.daemon_tcp_addr {
        cfg.daemon_tcp_addr = addr;
    }

    let emitter = Emitter::spawn(EmitterConfig {
        daemon_addr: cfg.daemon_udp_addr.clone(),
        channel_capacity: cfg.emit_channel_capacity,
    });
    let tracer = Tracer::new(Arc::new(emitter));

    // Best-effort: a missing daemon must not stop the service.
    let proxy = DaemonProxy::new(cfg.daemon_tcp_addr.clone(), cfg.proxy_timeout);
    match proxy.get_sampling_rules().await {
        Ok(rules) => info!(count = rules.len(), "fetched sampling rules from daemon"),
        Err(e) => warn!(error = %e, "sampling rules unavailable, tracing all requests"),
    }

    let listener = tokio::net::TcpListener::bind(&cli.bind)
        .await
        .with_context(|| format!("bind {}", cli.bind))?;
    info!(addr = %cli.bind, service = %cfg.service_name, "listening");
    axum::serve(listener, app(tracer)).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use testkit::CollectingSink;
    use tower::ServiceExt;

    use super::*;

    #[tokio::test]
    async fn get_roles_produces_the_expected_trace() {
        let sink = CollectingSink::default();
        let app = app(Tracer::new(Arc::new(sink.clone())));

        let resp = app
            .oneshot(Request::builder().uri("/roles").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);

        let segments = sink.segments();
        assert_eq!(segments.len(), 1);
        let segment = &segments[0];
        assert_eq!(segment.name, "GetRoles");
        assert_eq!(segment.http.as_ref().unwrap().status, Some(200));
        assert_eq!(segment.subsegments.len(), 1);

        let child = &segment.subsegments[0];
        assert_eq!(child.name, "BuildRolesDetail");
        assert_eq!(
            child.metadata.get("No. roles built"),
            Some(&serde_json::Value::from(50))
        );
        assert!(child.end_ts.unwrap() <= segment.end_ts.unwrap());
        assert!(child.start_ts >= segment.start_ts);
    }
}
