// web_compressor daemon
// Media compression service accessible via Unix Domain Socket

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

use web_compressor::config::CompressorConfig;
use web_compressor::directives::DirectiveComposer;
use web_compressor::ffmpeg::{FfmpegTranscoder, TranscodeEvent};
use web_compressor::imaging::WebpCodec;
use web_compressor::orchestrator::Orchestrator;
use web_compressor::service::{Call, CompressorService, MediaCompressor, Reply};
use web_compressor::storage::LocalArtifactStore;
use web_compressor::workspace::Workspace;

/// Requests larger than this are refused and the connection dropped
const MAX_FRAME_LEN: usize = 16 * 1024 * 1024;

#[derive(Parser)]
#[command(name = "web_compressor", version, about = "Web media compression daemon")]
struct Args {
    /// Unix socket path for UDS server
    #[arg(long, default_value = "/tmp/web_compressor.sock")]
    socket_path: String,

    /// JSON config file; flags below override its values
    #[arg(long)]
    config: Option<PathBuf>,

    /// Root of the input/ and output/ working directories
    #[arg(long)]
    work_dir: Option<PathBuf>,

    /// Directory for image outputs
    #[arg(long)]
    uploads_dir: Option<PathBuf>,

    /// Backing directory for stored video artifacts
    #[arg(long)]
    storage_dir: Option<PathBuf>,

    /// URL prefix for stored artifacts
    #[arg(long)]
    public_base_url: Option<String>,

    /// ffmpeg binary
    #[arg(long)]
    ffmpeg_path: Option<PathBuf>,
}

impl Args {
    fn load_config(&self) -> Result<CompressorConfig> {
        let mut config = match &self.config {
            Some(path) => CompressorConfig::from_json_file(path)?,
            None => CompressorConfig::default(),
        };
        if let Some(dir) = &self.work_dir {
            config.work_dir = dir.clone();
        }
        if let Some(dir) = &self.uploads_dir {
            config.uploads_dir = dir.clone();
        }
        if let Some(dir) = &self.storage_dir {
            config.storage_dir = dir.clone();
        }
        if let Some(url) = &self.public_base_url {
            config.public_base_url = url.clone();
        }
        if let Some(path) = &self.ffmpeg_path {
            config.ffmpeg_path = path.clone();
        }
        config.validate()?;
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info"))
        )
        .init();

    let args = Args::parse();
    let config = args.load_config().context("Failed to load configuration")?;

    info!("Starting web_compressor daemon");
    info!("   Socket: {}", args.socket_path);
    info!("   Work dir: {}", config.work_dir.display());
    info!("   Storage: {} -> {}", config.storage_dir.display(), config.public_base_url);

    // Track startup time for health checks
    let start_time = std::time::Instant::now();

    let (events_tx, events_rx) = broadcast::channel(64);
    let transcoder = FfmpegTranscoder::new(&config.ffmpeg_path).with_events(events_tx);
    match transcoder.probe().await {
        Ok(version) => info!("   ✓ {}", version),
        Err(e) => warn!("ffmpeg unavailable, video operations will fail: {}", e),
    }
    tokio::spawn(log_transcode_events(events_rx));

    let orchestrator = Orchestrator::new(
        DirectiveComposer::new(config.crf()?, config.quality()?),
        Arc::new(WebpCodec::new(config.webp_method)),
        Arc::new(transcoder),
        Arc::new(Workspace::new(&config.work_dir)),
        Arc::new(LocalArtifactStore::new(&config.storage_dir, config.public_base_url.clone())),
        &config.uploads_dir,
    );
    let service = Arc::new(MediaCompressor::new(Arc::new(orchestrator)));

    info!("   ✓ Compressor initialized");

    // Remove old socket if exists
    let socket_path = PathBuf::from(&args.socket_path);
    if socket_path.exists() {
        std::fs::remove_file(&socket_path)
            .context("Failed to remove old socket")?;
    }

    // Create UDS listener
    let listener = UnixListener::bind(&socket_path)
        .context("Failed to bind Unix socket")?;

    info!("   ✓ Listening on {}", args.socket_path);

    // Serve requests
    loop {
        match listener.accept().await {
            Ok((stream, _addr)) => {
                let service = Arc::clone(&service);
                tokio::spawn(async move {
                    if let Err(e) = handle_connection(stream, service, start_time).await {
                        error!("Connection error: {}", e);
                    }
                });
            }
            Err(e) => {
                error!("Accept error: {}", e);
            }
        }
    }
}

/// Handle a single UDS connection
async fn handle_connection(
    mut stream: UnixStream,
    service: Arc<MediaCompressor>,
    start_time: std::time::Instant,
) -> Result<()> {
    let mut buffer = vec![0u8; 65536]; // 64KB buffer

    loop {
        // Read request length (4 bytes)
        let mut len_buf = [0u8; 4];
        match stream.read_exact(&mut len_buf).await {
            Ok(_) => {}
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                debug!("Client disconnected");
                return Ok(());
            }
            Err(e) => return Err(e.into()),
        }

        let len = u32::from_be_bytes(len_buf) as usize;
        if len > MAX_FRAME_LEN {
            anyhow::bail!("Request frame of {} bytes exceeds {} byte limit", len, MAX_FRAME_LEN);
        }
        if len > buffer.len() {
            buffer.resize(len, 0);
        }

        // Read request body
        stream.read_exact(&mut buffer[..len]).await?;

        let call: Call = serde_json::from_slice(&buffer[..len])
            .context("Failed to parse call")?;

        debug!("Received: op={}", call.op);

        // Health check is answered by the daemon itself
        let reply = if call.op == "health" {
            Reply {
                ok: true,
                output: serde_json::json!({
                    "status": "healthy",
                    "service": env!("CARGO_PKG_NAME"),
                    "version": env!("CARGO_PKG_VERSION"),
                    "uptime_ms": start_time.elapsed().as_millis() as u64,
                }),
                latency_ms: 0,
            }
        } else {
            match service.handle(call).await {
                Ok(reply) => reply,
                Err(e) => {
                    error!("Handle error: {:?}", e);
                    Reply {
                        ok: false,
                        output: serde_json::json!({
                            "error": e.code(),
                            "message": e.to_string(),
                        }),
                        latency_ms: 0,
                    }
                }
            }
        };

        // Serialize reply
        let reply_bytes = serde_json::to_vec(&reply)
            .context("Failed to serialize reply")?;

        // Write reply length + body
        let len_bytes = (reply_bytes.len() as u32).to_be_bytes();
        stream.write_all(&len_bytes).await?;
        stream.write_all(&reply_bytes).await?;
        stream.flush().await?;

        debug!("Sent: ok={}, latency={}ms", reply.ok, reply.latency_ms);
    }
}

async fn log_transcode_events(mut events: broadcast::Receiver<TranscodeEvent>) {
    loop {
        match events.recv().await {
            Ok(event) => debug!("Transcode event: {:?}", event),
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                debug!("Transcode event log lagged by {} events", skipped);
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}
