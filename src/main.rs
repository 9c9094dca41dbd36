use anyhow::Result;
use clap::Parser;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

use usher_bot::channel::Connection;
use usher_bot::dispatch::BroadcastControl;
use usher_bot::gateway::GatewayClient;
use usher_bot::media::HttpFetcher;
use usher_bot::recognize::HttpRecognizer;
use usher_bot::{config, db, http};

#[derive(Debug, Parser)]
#[command(author, version, about)]
struct Args {
    /// Path to YAML config file
    #[arg(long, default_value = "config.yaml")]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_target(false)
        .compact()
        .init();

    let args = Args::parse();
    let cfg = config::load(Some(&args.config))?;
    cfg.ensure_dirs()?;

    let database_url = std::env::var("DATABASE_URL")
        .unwrap_or_else(|_| format!("sqlite://{}/usher.db", cfg.app.data_dir));

    let pool = db::init_pool(&database_url).await?;
    db::run_migrations(&pool).await?;

    // Bring the channel session up in the background; request paths observe
    // its state, they never wait for it.
    let client = Arc::new(GatewayClient::from_config(&cfg.channel)?);
    let conn = Connection::new(client);
    conn.spawn_session();

    let recognizer = Arc::new(HttpRecognizer::new(&cfg.recognizer.service_url)?);
    let fetcher = Arc::new(HttpFetcher::new());

    let addr: SocketAddr = cfg.app.bind_addr.parse()?;
    let ctx = http::AppContext {
        pool,
        conn,
        fetcher,
        recognizer,
        broadcast: BroadcastControl::new(),
        cfg: Arc::new(cfg),
    };

    info!("usher-bot listening on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, http::router(ctx)).await?;

    Ok(())
}
