//! nocturne - framed, prioritised transport over a small-MTU radio link
//!
//! Runs a loopback session: a simulated display peer connects, negotiates the
//! binary protocol, receives the current playback state and one bulk asset.

use bytes::Bytes;
use nocturne_link::{ChannelId, Config, Orchestrator, PeerId};
use nocturne_peer::{LoopbackTransport, PeerEvent, PeerMirror};
use nocturne_protocol::FullState;
use nocturne_transfer::{Asset, AssetClass};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

/// Simulated per-write radio latency.
const LOOPBACK_LATENCY: Duration = Duration::from_millis(1);

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    // Load configuration (from file if NOCTURNE_CONFIG is set, then env overrides)
    let config = match Config::load() {
        Ok(c) => {
            if let Ok(path) = std::env::var("NOCTURNE_CONFIG") {
                tracing::info!("Loaded config from {}", path);
            }
            c
        }
        Err(e) => {
            // If a config file was explicitly specified, fail on error
            if std::env::var("NOCTURNE_CONFIG").is_ok() {
                tracing::error!("Failed to load config: {}", e);
                return Err(e.into());
            }
            tracing::info!("Using default configuration");
            Config::default()
        }
    };

    tracing::info!("Starting nocturne loopback session");
    tracing::info!("  Device: {} (max MTU {})", config.device.name, config.device.max_mtu);
    tracing::info!(
        "  Pacing: bulk {}ms, normal {}ms",
        config.queue.bulk_interval_ms,
        config.queue.normal_interval_ms
    );
    tracing::info!(
        "  Transfers: compression={} level={} checksum={:?} timeout={}s",
        config.transfer.compression,
        config.transfer.compression_level,
        config.transfer.checksum,
        config.transfer.timeout_secs
    );

    let peer_mtu = config.device.max_mtu.min(247);
    let (link, mut events) = LoopbackTransport::with_events(LOOPBACK_LATENCY);
    let orch = Arc::new(Orchestrator::new(config, link.clone())?);
    let scheduler = orch.start();

    // Log what the simulated peer sees
    tokio::spawn(async move {
        while let Some((peer, event)) = events.recv().await {
            match event {
                PeerEvent::AssetReceived(asset) => tracing::info!(
                    "{} received {} '{}' ({} bytes, {})",
                    peer,
                    asset.class,
                    asset.asset_id,
                    asset.data.len(),
                    &hex::encode(asset.checksum)[..16]
                ),
                other => tracing::debug!("{} saw {:?}", peer, other),
            }
        }
    });

    // Connect the peer and run its handshake
    let peer = PeerId::from("display-1");
    let mirror = PeerMirror::full(peer_mtu);
    let handshake = mirror.handshake()?;
    link.attach(peer.clone(), mirror);
    orch.on_peer_connected(peer.clone());
    orch.on_mtu_changed(&peer, peer_mtu);
    orch.on_subscription_changed(&peer, ChannelId::State, true);
    orch.on_subscription_changed(&peer, ChannelId::Bulk, true);
    orch.handle_inbound(&peer, ChannelId::Command, &handshake);

    tracing::info!("Device info: {}", orch.device_info_json(Some(&peer))?);

    // Forward the peer's writes (transfer results) back to the host
    let pump = {
        let orch = orch.clone();
        let link = link.clone();
        let peer = peer.clone();
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(Duration::from_millis(10)).await;
                match link.take_outbound(&peer) {
                    Ok(writes) => {
                        for bytes in writes {
                            orch.handle_inbound(&peer, ChannelId::Command, &bytes);
                        }
                    }
                    Err(_) => break,
                }
            }
        })
    };

    orch.push_state(&FullState {
        is_playing: true,
        duration_ms: 241_000,
        position_ms: 12_500,
        volume_percent: 55,
        artist: "Loopback".to_string(),
        album: "Simulated".to_string(),
        track: "Test Pattern".to_string(),
    });

    let (asset_id, data) = load_asset().await?;
    let asset = Asset::new(AssetClass::AlbumArt, asset_id, data);

    match orch.send_asset(&peer, asset).await {
        Ok(report) => tracing::info!(
            "Transfer {} done: {} -> {} bytes in {} chunks, {:?}, confirmed={:?}",
            &hex::encode(report.checksum)[..16],
            report.original_size,
            report.payload_size,
            report.total_chunks,
            report.elapsed,
            report.confirmed
        ),
        Err(e) => tracing::error!("Transfer failed: {} (retryable={})", e, e.is_retryable()),
    }

    if let Some(metrics) = orch.metrics() {
        println!("{}", metrics.encode()?);
    }

    tracing::info!("Scheduler stats: {:?}", orch.scheduler().stats());

    orch.on_peer_disconnected(&peer);
    link.detach(&peer);
    let _ = pump.await;

    orch.shutdown();
    let _ = scheduler.await;

    tracing::info!("Session closed");
    Ok(())
}

/// Reads the asset named by the first argument or `NOCTURNE_ASSET`, or
/// synthesises a 50 000-byte test pattern.
async fn load_asset() -> Result<(String, Bytes), std::io::Error> {
    let path = std::env::args()
        .nth(1)
        .or_else(|| std::env::var("NOCTURNE_ASSET").ok());

    match path {
        Some(path) => {
            let data = tokio::fs::read(&path).await?;
            tracing::info!("Loaded asset {} ({} bytes)", path, data.len());
            Ok((path, Bytes::from(data)))
        }
        None => {
            let data: Vec<u8> = (0..50_000u32)
                .map(|i| (i.wrapping_mul(2_654_435_761) >> 24) as u8)
                .collect();
            Ok(("test-pattern".to_string(), Bytes::from(data)))
        }
    }
}
