use anyhow::Context;
use pdf_rag::{api, components::Pipeline, config, logging};
use std::future::Future;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::watch;

const FALLBACK_PORTS: std::ops::RangeInclusive<u16> = 8000..=8099;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    logging::init_tracing("pdf-rag");
    let config = config::load().context("Failed to load configuration")?;
    let upload_max_bytes = config.upload_max_bytes;
    let requested_port = config.server_port;

    let pipeline = Pipeline::connect(config)
        .await
        .context("Failed to initialize pipeline components")?;
    let service = Arc::new(pipeline.rag_service().await?);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        if let Err(error) = tokio::signal::ctrl_c().await {
            tracing::error!(%error, "Failed to listen for Ctrl-C");
            return;
        }
        let _ = shutdown_tx.send(true);
    });

    let embedded_worker = if pipeline.config().worker_embedded {
        let worker = Arc::new(pipeline.worker()?);
        tracing::info!("Running embedded ingestion worker");
        Some(tokio::spawn(
            worker.run_until(pipeline.queue(), shutdown_requested(shutdown_rx.clone())),
        ))
    } else {
        None
    };

    let app = api::create_router(service, upload_max_bytes);
    let (listener, port) = bind_listener(requested_port).await?;
    tracing::info!("Listening on http://0.0.0.0:{}", port);
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_requested(shutdown_rx))
        .await
        .context("HTTP server failed")?;

    if let Some(handle) = embedded_worker {
        handle.await.context("Embedded worker panicked")?;
    }
    tracing::info!("Shutdown complete");
    Ok(())
}

fn shutdown_requested(mut rx: watch::Receiver<bool>) -> impl Future<Output = ()> + Send + 'static {
    async move {
        let _ = rx.wait_for(|stopped| *stopped).await;
    }
}

async fn bind_listener(port: Option<u16>) -> anyhow::Result<(TcpListener, u16)> {
    use std::net::Ipv4Addr;

    if let Some(port) = port {
        let listener = TcpListener::bind((Ipv4Addr::UNSPECIFIED, port))
            .await
            .with_context(|| format!("Failed to bind port {port}"))?;
        return Ok((listener, port));
    }

    for port in FALLBACK_PORTS {
        match TcpListener::bind((Ipv4Addr::UNSPECIFIED, port)).await {
            Ok(listener) => {
                tracing::debug!(port, "Bound server port");
                return Ok((listener, port));
            }
            Err(err) if err.kind() == std::io::ErrorKind::AddrInUse => {
                tracing::debug!(port, "Port already in use; trying next");
                continue;
            }
            Err(err) => return Err(err.into()),
        }
    }

    anyhow::bail!(
        "No available port found in range {}-{}",
        FALLBACK_PORTS.start(),
        FALLBACK_PORTS.end()
    )
}
