//! Start a gateway programmatically against a local OpenAI-compatible server.
//!
//! Usage:
//!   cargo run --example basic_gateway -- http://localhost:8000/v1

use messages_gateway::trace::Tracer;
use messages_gateway::{build_router, AppState, Gateway, GatewayConfig};
use std::sync::Arc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let base_url = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "http://localhost:8000/v1".to_string());

    let mut config = GatewayConfig::for_backend(base_url);
    config
        .models
        .insert("claude-sonnet-4".to_string(), "llama3".to_string());
    config.rate_limit.interval_secs = Some(1);
    config.rate_limit.wait = true;

    let (tracer, trace_path, _writer) = Tracer::spawn(std::path::Path::new("traces"))?;
    let gateway = Gateway::from_config(&config)?.with_tracer(tracer);

    println!("Backend: {}", config.backend.base_url);
    println!("Traces:  {}", trace_path.display());

    let port = config.port;
    let app = build_router(Arc::new(AppState { gateway }));
    let addr = format!("0.0.0.0:{port}");
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    println!("Listening on http://{addr}");
    println!();
    println!("  ANTHROPIC_BASE_URL=http://localhost:{port}");

    axum::serve(listener, app).await?;
    Ok(())
}
