//! Audiocrypt Client - headless consumer CLI.
//!
//! Uploads a local audio file to a running audiocrypt-server, performs the
//! ECDH-P256 key exchange, and walks every slice through fetch, decrypt,
//! decompress, decode. Exercises the full consumer pipeline without an
//! audio output sink attached.

mod http_transport;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use audiocrypt_core::{
    AesGcmProcessor, BalancedBufferStrategy, ClientKeyExchangeProcessor, ConsumerTransport,
    DeflateProcessor, EcdhP256ClientProcessor, LinearPrefetchStrategy, PlaybackController,
    SliceLoader, TrackMeta, UnsupportedPcmDecoder,
};
use clap::Parser;

use crate::http_transport::{parse_container_tag, HttpConsumerTransport};

/// Audiocrypt Client - headless consumer for encrypted audio slice streaming.
#[derive(Parser, Debug)]
#[command(name = "audiocrypt-client")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the audio file to stream.
    #[arg(short, long, value_name = "FILE")]
    file: PathBuf,

    /// Base URL of the audiocrypt-server instance.
    #[arg(short, long, default_value = "http://127.0.0.1:8787", env = "AUDIOCRYPT_SERVER_URL")]
    server: String,

    /// Log level (error, warn, info, debug, trace).
    #[arg(short, long, default_value = "info", env = "AUDIOCRYPT_LOG_LEVEL")]
    log_level: log::LevelFilter,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    env_logger::Builder::new()
        .filter_level(args.log_level)
        .format_timestamp_millis()
        .init();

    log::info!("Audiocrypt Client v{}", env!("CARGO_PKG_VERSION"));

    let audio_data = std::fs::read(&args.file)
        .with_context(|| format!("failed to read {}", args.file.display()))?;
    log::info!("Loaded {} bytes from {}", audio_data.len(), args.file.display());

    let transport = Arc::new(HttpConsumerTransport::new(args.server.clone()));

    let session_id = transport
        .create_session(audio_data, serde_json::Value::Null)
        .await
        .map_err(|e| anyhow::anyhow!("create_session failed: {e}"))?;
    log::info!("Session created: {session_id}");

    let mut client = EcdhP256ClientProcessor::default();
    client
        .initialize()
        .map_err(|e| anyhow::anyhow!("key exchange init failed: {e}"))?;
    let request = client
        .create_request()
        .map_err(|e| anyhow::anyhow!("key exchange request failed: {e}"))?;

    let exchange = transport
        .perform_key_exchange(&session_id, request, None)
        .await
        .map_err(|e| anyhow::anyhow!("key exchange failed: {e}"))?;
    let session_key = client
        .process_response(&exchange.response)
        .map_err(|e| anyhow::anyhow!("failed to derive session key: {e}"))?;
    log::info!("Key exchange complete, session key derived");

    let session_info = exchange.session_info;
    let meta = TrackMeta {
        sample_rate: session_info.sample_rate,
        channels: session_info.channels,
        bit_depth: session_info.bit_depth.unwrap_or(16),
        is_float32: session_info.is_float32.unwrap_or(false),
        format: parse_container_tag(session_info.format.as_deref()),
    };
    let total_slices = session_info.total_slices;

    let loader = Arc::new(SliceLoader::new(
        transport,
        Arc::new(AesGcmProcessor),
        Arc::new(DeflateProcessor),
        Arc::new(UnsupportedPcmDecoder),
        session_id.clone(),
    ));
    loader.set_session_key(session_key);
    loader.set_track_info(None, session_info.slice_ids.clone(), meta);

    let controller = PlaybackController::new(
        Arc::clone(&loader),
        Arc::new(BalancedBufferStrategy::default()),
        Arc::new(LinearPrefetchStrategy::default()),
        total_slices,
    );

    log::info!("Streaming {total_slices} slices");
    let mut total_samples = 0usize;
    for (index, slice_id) in session_info.slice_ids.iter().enumerate() {
        let slice = loader
            .load_slice(slice_id, None)
            .await
            .map_err(|e| anyhow::anyhow!("slice {index} load failed: {e}"))?;
        total_samples += slice.samples.len();

        controller.play().ok();
        let next = controller.advance();
        log::debug!(
            "slice {index}/{total_slices} decoded ({} samples), advancing to {next}",
            slice.samples.len()
        );
    }

    let duration_secs = if session_info.sample_rate > 0 && session_info.channels > 0 {
        total_samples as f64 / (session_info.sample_rate as f64 * session_info.channels as f64)
    } else {
        0.0
    };
    log::info!(
        "Done: {total_slices} slices, {total_samples} samples decoded (~{duration_secs:.2}s)"
    );

    Ok(())
}
