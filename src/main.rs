use clap::Parser;
use tracing::info;

use sql_query_buddy::build_services;
use sql_query_buddy::config::Settings;
use sql_query_buddy::server::{AppState, router};

#[derive(Parser)]
#[command(
    name = "sql-query-buddy",
    about = "SQL Query Buddy: natural-language questions to SQL over registered table metadata"
)]
struct Args {
    /// Bind address (overrides HOST)
    #[arg(long)]
    host: Option<String>,

    /// Bind port (overrides PORT)
    #[arg(long)]
    port: Option<u16>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let mut settings = Settings::from_env()?;
    if let Some(host) = args.host {
        settings.host = host;
    }
    if let Some(port) = args.port {
        settings.port = port;
    }
    settings.validate();

    let (rag, generator) = build_services(&settings)?;
    let app = router(
        AppState { generator, rag },
        settings.allowed_origins.as_deref(),
    );

    let addr = format!("{}:{}", settings.host, settings.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!(
        %addr,
        model = %settings.openai_model,
        store = %settings.store_path.display(),
        format = %settings.response_format,
        "SQL Query Buddy listening"
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!("failed to install Ctrl+C handler: {e}");
    }
    info!("shutting down");
}
