use anyhow::{Context, Result};
use clap::Parser;
use organ_sampler::{
    create_router, AppState, Config, CpalHost, Encoder, Mp3Encoder, Phase, ProjectSetup, Recorder,
    SessionSnapshot, WavEncoder,
};
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

/// Unattended note-by-note sampling of pipe organ registers
#[derive(Debug, Parser)]
#[command(name = "organ-sampler", version)]
struct Args {
    /// Address to bind the remote control server to
    #[arg(long)]
    host: Option<String>,

    /// Port of the remote control server
    #[arg(long)]
    port: Option<u16>,

    /// Project (instrument) to set up at startup
    #[arg(long, requires = "register")]
    project: Option<String>,

    /// Register to set up at startup
    #[arg(long, requires = "project")]
    register: Option<String>,

    /// Keyboard/division level of the register
    #[arg(long)]
    keyboard: Option<String>,

    /// Root directory for recordings
    #[arg(long)]
    output: Option<PathBuf>,

    /// Configuration file, extension optional
    #[arg(long, default_value = "config/organ-sampler")]
    config: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();
    let cfg = Config::load(&args.config)?;

    info!("{} v{}", cfg.service.name, env!("CARGO_PKG_VERSION"));

    let mut session = cfg.session_config()?;
    if let Some(output) = &args.output {
        session.layout.output_root = output.clone();
    }
    info!("Recordings go to {}", session.layout.output_root.display());

    let encoder: Arc<dyn Encoder> = if cfg.encoder.compress {
        Arc::new(Mp3Encoder::new(&cfg.encoder.lame_path))
    } else {
        Arc::new(WavEncoder)
    };
    let recorder = Recorder::new(session, Arc::new(CpalHost::new()), encoder, cfg.timings())?;

    recorder.add_sink(Arc::new(|snapshot: &SessionSnapshot| -> Result<()> {
        if snapshot.phase != Phase::Recording || snapshot.level == 0.0 {
            debug!(
                "State {:?} note {} countdown {}",
                snapshot.phase, snapshot.note.current_name, snapshot.countdown
            );
        }
        Ok(())
    }));

    if let (Some(project), Some(register)) = (args.project, args.register) {
        let setup = ProjectSetup {
            project,
            register,
            keyboard: args.keyboard,
            ..Default::default()
        };
        let dir = recorder.configure_project(setup).await?;
        info!("Recording into {}", dir.display());
    }

    let bind = args.host.unwrap_or(cfg.service.http.bind);
    let port = args.port.unwrap_or(cfg.service.http.port);
    let addr = format!("{}:{}", bind, port);

    let stop_requested = CancellationToken::new();
    let app = create_router(
        AppState::new(recorder.clone())
            .with_port(port)
            .with_shutdown(stop_requested.clone()),
    );
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    info!("Remote control listening on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown(recorder, stop_requested))
        .await
        .context("HTTP server failed")?;

    Ok(())
}

/// Wait for Ctrl-C or a shutdown request, then stop any running cycle so
/// devices are released
async fn shutdown(recorder: Recorder, requested: CancellationToken) {
    tokio::select! {
        signal = tokio::signal::ctrl_c() => {
            if let Err(e) = signal {
                tracing::error!("Failed to listen for shutdown signal: {}", e);
                requested.cancelled().await;
            }
        }
        _ = requested.cancelled() => {}
    }
    info!("Shutting down");
    recorder.stop().await;
}
