use clap::Parser;
use messages_gateway::trace::Tracer;
use messages_gateway::{build_router, AppState, Gateway, GatewayConfig};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(
    name = "messages-gateway",
    about = "Serve the Anthropic Messages API on top of an OpenAI-compatible backend",
    version
)]
struct Cli {
    /// Path to config file (TOML)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Port to listen on (overrides config)
    #[arg(short, long)]
    port: Option<u16>,

    /// Ask on the terminal before forwarding each request
    #[arg(long)]
    manual: bool,

    /// Minimum seconds between forwarded requests (overrides config)
    #[arg(long, value_name = "SECONDS")]
    rate_limit: Option<u64>,

    /// Wait out the rate limit instead of answering 429
    #[arg(long)]
    wait: bool,

    /// Directory for JSONL request traces (overrides config)
    #[arg(long)]
    trace_dir: Option<PathBuf>,

    /// Print config search paths and exit
    #[arg(long)]
    show_config_paths: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "messages_gateway=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    if cli.show_config_paths {
        println!("Config search paths:");
        for (i, path) in messages_gateway::config::config_search_paths().iter().enumerate() {
            println!("  {}. {}", i + 1, path.display());
        }
        return Ok(());
    }

    let mut config = GatewayConfig::find_and_load(cli.config.as_deref())?;

    if let Some(port) = cli.port {
        config.port = port;
    }
    if cli.manual {
        config.manual_approval = true;
    }
    if let Some(secs) = cli.rate_limit {
        config.rate_limit.interval_secs = Some(secs);
    }
    if cli.wait {
        config.rate_limit.wait = true;
    }
    if let Some(dir) = cli.trace_dir {
        config.trace.dir = Some(dir);
    }

    let mut gateway = Gateway::from_config(&config)?;

    let trace_file = match config.trace.dir {
        Some(ref dir) => {
            let (tracer, path, _writer) = Tracer::spawn(dir)?;
            gateway = gateway.with_tracer(tracer);
            Some(path)
        }
        None => None,
    };

    info!("messages-gateway v{}", env!("CARGO_PKG_VERSION"));
    info!("  Backend:   {}", config.backend.base_url);
    info!("  Port:      {}", config.port);
    info!("  Models:    {} mapped", gateway.mapper().len());
    info!("  Approval:  {}", if config.manual_approval { "manual" } else { "auto" });
    match config.rate_limit.interval_secs {
        Some(secs) => info!(
            "  Rate limit: {}s ({})",
            secs,
            if config.rate_limit.wait { "wait" } else { "reject" }
        ),
        None => info!("  Rate limit: off"),
    }
    if let Some(ref path) = trace_file {
        info!("  Traces:    {}", path.display());
    }

    let state = Arc::new(AppState { gateway });

    let app = build_router(state);
    let bind_addr = format!("0.0.0.0:{}", config.port);
    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;

    info!("Listening on http://{}", bind_addr);
    info!("  ANTHROPIC_BASE_URL=http://localhost:{}", config.port);

    axum::serve(listener, app).await?;

    Ok(())
}
