//! Workbench server: HTTP/SSE transport over the workbench core.

mod error;
mod routes;
mod sse;
mod state;

use std::net::SocketAddr;
use std::path::PathBuf;

use axum::Router;
use axum::extract::DefaultBodyLimit;
use axum::routing::get;
use clap::Parser;
use tower_http::cors::{Any, CorsLayer};
use tracing::info;
use workbench::Workbench;
use workbench::io::config::load_config;

use crate::state::AppState;

#[derive(Parser)]
#[command(name = "workbench-server")]
#[command(about = "Project sandbox and execution engine over HTTP")]
struct Args {
    /// Address to bind the server to
    #[arg(long, default_value = "127.0.0.1")]
    bind: String,

    /// Port to listen on
    #[arg(long, default_value = "3100")]
    port: u16,

    /// Config file (missing file means defaults)
    #[arg(long, default_value = "workbench.toml")]
    config: PathBuf,

    /// Largest accepted request body (uploads, saves) in MiB
    #[arg(long, default_value = "64")]
    max_body_mb: usize,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    workbench::logging::init("workbench=info,workbench_server=info");

    let args = Args::parse();

    let config = load_config(&args.config)?;
    info!(config = %args.config.display(), data_dir = %config.data_dir.display(), "starting workbench-server");
    let workbench = Workbench::open(config)?;
    let state = AppState::new(workbench);

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = Router::new()
        .nest("/api", routes::api_router())
        .route("/events", get(sse::events_handler))
        .layer(DefaultBodyLimit::max(args.max_body_mb * 1024 * 1024))
        .layer(cors)
        .with_state(state);

    let addr: SocketAddr = format!("{}:{}", args.bind, args.port).parse()?;
    info!(addr = %addr, "listening");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
