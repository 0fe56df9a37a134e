//! Voxserve - HTTP API for Qwen3-TTS custom voice, voice design and voice cloning

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod api;
mod error;
mod state;

use state::AppState;
use voxserve_core::{EngineConfig, ModelSize, ServerConfig, TtsService};

#[derive(Debug, Parser)]
#[command(
    name = "voxserve-server",
    about = "HTTP API server for Qwen3-TTS speech synthesis",
    version = env!("CARGO_PKG_VERSION")
)]
struct ServerArgs {
    /// Host to bind to
    #[arg(short = 'H', long)]
    host: Option<String>,

    /// Port to listen on
    #[arg(short, long)]
    port: Option<u16>,

    /// Model size tier (0.6B or 1.7B)
    #[arg(long)]
    model_size: Option<String>,

    /// Compute device preference (auto, cuda, cpu)
    #[arg(long)]
    device: Option<String>,

    /// Hugging Face cache directory for checkpoints
    #[arg(long)]
    models_dir: Option<PathBuf>,

    /// Directory holding the browser UI
    #[arg(long)]
    ui_dir: Option<PathBuf>,

    /// Skip background model loading at startup
    #[arg(long)]
    no_preload: bool,
}

impl ServerArgs {
    fn apply(self, engine: &mut EngineConfig, server: &mut ServerConfig) -> anyhow::Result<()> {
        if let Some(host) = self.host {
            server.host = host;
        }
        if let Some(port) = self.port {
            server.port = port;
        }
        if let Some(ui_dir) = self.ui_dir {
            server.ui_dir = ui_dir;
        }
        if let Some(size) = self.model_size {
            engine.model_size = size
                .parse::<ModelSize>()
                .with_context(|| format!("invalid --model-size '{size}'"))?;
        }
        if let Some(device) = self.device {
            engine.device = device;
        }
        if let Some(models_dir) = self.models_dir {
            engine.models_dir = models_dir;
        }
        if self.no_preload {
            engine.preload_on_startup = false;
        }
        Ok(())
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = ServerArgs::parse();

    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "voxserve_server=info,voxserve_core=info,tower_http=info".into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting Voxserve TTS Server");

    // Load configuration
    let mut engine_config = EngineConfig::default();
    let mut server_config = ServerConfig::default();
    args.apply(&mut engine_config, &mut server_config)?;
    info!("Models directory: {:?}", engine_config.models_dir);

    // Device selection probes the driver, keep it off the runtime threads
    let service = tokio::task::spawn_blocking(move || TtsService::new(engine_config))
        .await
        .context("service initialization panicked")?;
    let service = Arc::new(service);
    let state = AppState::new(service.clone(), &server_config);

    if service.config().preload_on_startup {
        let preload = service.clone();
        tokio::spawn(async move { preload.preload().await });
    } else {
        info!("Startup preload disabled; models load on first use");
    }

    let app = api::create_router(state);

    let addr = format!("{}:{}", server_config.host, server_config.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    info!("Server listening on http://{}", addr);

    let server = axum::serve(listener, app).with_graceful_shutdown(shutdown_signal());

    info!("Server ready. Press Ctrl+C to stop.");
    server.await?;

    service.shutdown().await;
    info!("Shutdown complete");

    Ok(())
}

/// Wait for Ctrl+C or SIGTERM
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl+C: {}", err);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(err) => {
                warn!("Failed to install SIGTERM handler: {}", err);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, shutting down...");
        },
        _ = terminate => {
            info!("Received SIGTERM, shutting down...");
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_overrides_config() {
        let args = ServerArgs::parse_from([
            "voxserve-server",
            "-H",
            "127.0.0.1",
            "--port",
            "9000",
            "--model-size",
            "1.7B",
            "--device",
            "cpu",
            "--no-preload",
        ]);
        let mut engine = EngineConfig::default();
        let mut server = ServerConfig::default();
        args.apply(&mut engine, &mut server).unwrap();

        assert_eq!(server.host, "127.0.0.1");
        assert_eq!(server.port, 9000);
        assert_eq!(engine.model_size, ModelSize::Large);
        assert_eq!(engine.device, "cpu");
        assert!(!engine.preload_on_startup);
    }

    #[test]
    fn test_invalid_model_size_is_rejected() {
        let args = ServerArgs::parse_from(["voxserve-server", "--model-size", "7B"]);
        let mut engine = EngineConfig::default();
        let mut server = ServerConfig::default();
        assert!(args.apply(&mut engine, &mut server).is_err());
    }
}
