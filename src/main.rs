use std::net::SocketAddr;

use clap::Parser;

use podgen::{api, cli, config, errors, jobs, AppState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "podgen=info,tower_http=info".into()),
        )
        .init();

    let cfg = config::load()?;
    errors::set_production_mode(cfg.production);
    let args = cli::Cli::parse();

    match args.command {
        Some(cli::Commands::Ingest { force }) => {
            let state = AppState::build(cfg).await?;
            let report = if force {
                state.ingest.refresh().await?
            } else {
                state.ingest.populate_archive().await?
            };
            println!("{}", serde_json::to_string_pretty(&report)?);
            Ok(())
        }
        Some(cli::Commands::ValidateKey { key }) => {
            let state = AppState::build(cfg).await?;
            let verdict = state.validator.validate(&key).await?;
            println!("{}", serde_json::to_string_pretty(&verdict)?);
            Ok(())
        }
        Some(cli::Commands::Serve { port }) => {
            let port = port.unwrap_or(cfg.port);
            run_server(cfg, port).await
        }
        None => {
            let port = cfg.port;
            run_server(cfg, port).await
        }
    }
}

async fn run_server(cfg: config::Config, port: u16) -> anyhow::Result<()> {
    let state = AppState::build(cfg).await?;

    // Ingestion runs in the background; the server accepts requests before
    // the first sweep completes.
    {
        let state = state.clone();
        tokio::spawn(async move {
            match state.ingest.populate_archive().await {
                Ok(report) => {
                    tracing::info!(
                        inserted = report.inserted,
                        total = report.total,
                        skipped = report.skipped,
                        "startup ingest finished"
                    );
                }
                Err(e) => tracing::error!("startup ingest failed: {}", e),
            }
        });
    }

    jobs::cleanup::spawn(state.store.clone(), state.config.event_retention_days);
    tracing::info!(
        retention_days = state.config.event_retention_days,
        "event retention job started"
    );

    let app = api::router(state.clone());

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("podgen listening on {}", addr);
    axum::serve(listener, app).await?;

    Ok(())
}
