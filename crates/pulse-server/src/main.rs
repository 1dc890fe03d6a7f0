use anyhow::Context;
use clap::Parser;
use pulse_config::ConfigLoader;
use pulse_logging::{init_logging, LogFormat};
use pulse_server::{api, metrics, Pipeline};
use std::net::SocketAddr;
use std::time::Duration;
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Config file path
    #[arg(short, long, default_value = "pulse.toml")]
    config: String,

    /// Run one ingestion pass, score it, raise alerts, and exit
    #[arg(long)]
    run_once: bool,

    /// Print the effective configuration and exit
    #[arg(long)]
    print_config: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let config = ConfigLoader::new(&args.config).load()?;

    if args.print_config {
        println!("{}", ConfigLoader::render(&config)?);
        return Ok(());
    }

    init_logging(
        &config.logging.level,
        LogFormat::from_json_flag(config.logging.json),
    )?;
    info!(
        config = %args.config,
        name = %config.system.name,
        version = %config.system.version,
        "Starting supply-chain pulse"
    );

    if let Some(listen) = &config.metrics.listen {
        let addr: SocketAddr = listen
            .parse()
            .with_context(|| format!("invalid metrics.listen address {:?}", listen))?;
        metrics::init_metrics(addr)?;
    }

    let pipeline = Pipeline::build(config.clone()).await?;

    if args.run_once {
        let report = pipeline.run_once().await;
        pipeline.drain_deliveries(Duration::from_secs(10)).await;
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    let consumers = pipeline.spawn_consumers();

    let mut scheduler = pipeline.scheduler().await?;
    scheduler.schedule(&config.ingestion.cron).await?;
    scheduler.start().await?;
    if config.ingestion.run_on_start {
        scheduler.spawn_run();
    }

    let server = if config.api.enabled {
        let addr: SocketAddr = format!("{}:{}", config.api.host, config.api.port)
            .parse()
            .context("invalid api host/port")?;
        let app = api::create_router(pipeline.state());
        let mut stop = pipeline.shutdown_signal();
        info!("HTTP API listening on http://{}", addr);
        Some(tokio::spawn(async move {
            let result = axum::Server::bind(&addr)
                .serve(app.into_make_service())
                .with_graceful_shutdown(async move {
                    let _ = stop.changed().await;
                })
                .await;
            if let Err(e) = result {
                error!(error = %e, "HTTP server failed");
            }
        }))
    } else {
        None
    };

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for Ctrl-C")?;
    pipeline.shutdown();

    scheduler.shutdown().await?;
    if let Some(server) = server {
        let _ = server.await;
    }
    for consumer in consumers {
        let _ = consumer.await;
    }

    info!("Supply-chain pulse stopped");
    Ok(())
}
