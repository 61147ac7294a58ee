//! WHEP player binary entry point
//!
//! Runs one live-view player per camera endpoint, logs every status change
//! and, once a camera is live, logs RTP packet/byte counters for each of its
//! tracks (video and audio).
//!
//! # Usage
//!
//! ```bash
//! # Two cameras on the barrier LAN, host candidates only
//! cargo run -p gateview-player -- \
//!   --endpoint http://192.168.1.50:8889/gate-north/whep \
//!   --endpoint http://192.168.1.51:8889/gate-south/whep \
//!   --stun-servers ""
//!
//! # Reconnect with backoff, JSON logs
//! cargo run -p gateview-player -- \
//!   --config ./player.toml \
//!   --retry --max-retries 10 \
//!   --log-format json
//! ```

mod settings;

use clap::Parser;
use gateview_whep::{
    MediaTrack, PlayerStatus, ReconnectionPolicy, StateChange, WhepConfig, WhepPlayer,
};
use settings::{Args, LogFormat, Settings};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Set up Ctrl+C handler at the very start
    let shutdown_flag = Arc::new(AtomicBool::new(false));
    let shutdown_flag_handler = Arc::clone(&shutdown_flag);

    ctrlc::set_handler(move || {
        let was_already_set = shutdown_flag_handler.swap(true, Ordering::SeqCst);
        if was_already_set {
            eprintln!("Shutdown already in progress, forcing immediate exit");
            std::process::exit(0);
        }

        eprintln!("\nCtrl+C received, stopping players...");

        std::thread::spawn(move || {
            std::thread::sleep(Duration::from_secs(5));
            eprintln!("Graceful shutdown timeout (5s), forcing exit");
            std::process::exit(0);
        });
    })?;

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(num_cpus::get())
        .thread_name("whep-worker")
        .enable_all()
        .build()?;

    runtime.block_on(async_main(args, shutdown_flag))
}

async fn async_main(args: Args, shutdown_flag: Arc<AtomicBool>) -> anyhow::Result<()> {
    init_tracing(args.log_format)?;

    let settings = Settings::from_args(&args)?;

    info!(
        version = gateview_whep::version(),
        cameras = settings.endpoints.len(),
        stun_servers = ?settings.whep.stun_servers,
        retry = settings.retry.is_some(),
        "Gateview WHEP player starting"
    );

    let shutdown = CancellationToken::new();
    let stats_interval = Duration::from_secs(args.stats_interval_secs.max(1));

    let players: Vec<JoinHandle<()>> = settings
        .endpoints
        .iter()
        .map(|endpoint| {
            let camera = Camera {
                endpoint: endpoint.clone(),
                config: settings.whep.clone(),
                retry: settings.retry.clone(),
                stats_interval,
            };
            let shutdown = shutdown.clone();
            tokio::spawn(async move {
                if let Err(e) = camera.run(shutdown).await {
                    error!(camera = %camera.endpoint, "Player stopped: {}", e);
                }
            })
        })
        .collect();

    info!("Players running. Press Ctrl+C to shutdown.");

    while !shutdown_flag.load(Ordering::SeqCst) {
        tokio::time::sleep(Duration::from_millis(100)).await;
    }

    info!("Shutdown signal received, releasing cameras...");
    shutdown.cancel();

    for result in futures::future::join_all(players).await {
        if let Err(e) = result {
            warn!("Player task ended abnormally: {}", e);
        }
    }

    info!("All players stopped");
    Ok(())
}

/// One camera tile
struct Camera {
    endpoint: String,
    config: WhepConfig,
    retry: Option<ReconnectionPolicy>,
    stats_interval: Duration,
}

/// How often a live camera is checked for tracks that joined late
const TRACK_POLL_INTERVAL: Duration = Duration::from_millis(500);

impl Camera {
    async fn run(&self, shutdown: CancellationToken) -> anyhow::Result<()> {
        let player = WhepPlayer::new(self.config.clone())?;
        let mut changes = player.subscribe();
        let mut readers: HashMap<String, JoinHandle<()>> = HashMap::new();
        let mut live = false;
        let mut attempt = 0u32;
        let mut track_poll = tokio::time::interval(TRACK_POLL_INTERVAL);

        player.start(&self.endpoint).await?;

        loop {
            let change = tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = track_poll.tick() => {
                    if live {
                        self.read_new_tracks(&player, &mut readers, &shutdown);
                    }
                    continue;
                }
                change = changes.recv() => match change {
                    Some(change) => change,
                    None => break,
                },
            };

            self.log_change(&change);

            match PlayerStatus::from(change.to) {
                PlayerStatus::Connecting => {}
                PlayerStatus::Live => {
                    live = true;
                    attempt = 0;
                    self.read_new_tracks(&player, &mut readers, &shutdown);
                }
                PlayerStatus::Error => {
                    live = false;
                    stop_readers(&mut readers);

                    // Replacing the session below emits Closed for the old one
                    if change.to.is_terminal() {
                        continue;
                    }

                    let Some(policy) = &self.retry else {
                        warn!(camera = %self.endpoint, "Camera in error state, not retrying");
                        continue;
                    };

                    if !policy.should_retry(attempt) {
                        error!(
                            camera = %self.endpoint,
                            attempts = attempt,
                            "Giving up on camera"
                        );
                        continue;
                    }

                    let delay = policy.calculate_backoff(attempt);
                    attempt += 1;
                    info!(
                        camera = %self.endpoint,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        "Reconnecting after backoff"
                    );

                    tokio::select! {
                        _ = shutdown.cancelled() => break,
                        _ = tokio::time::sleep(delay) => {}
                    }
                    player.start(&self.endpoint).await?;
                }
            }
        }

        stop_readers(&mut readers);
        player.stop().await;
        info!(camera = %self.endpoint, "Camera released");

        Ok(())
    }

    fn log_change(&self, change: &StateChange) {
        let status = PlayerStatus::from(change.to);
        match &change.error {
            Some(e) => warn!(
                camera = %self.endpoint,
                session = %change.session_id,
                from = ?change.from,
                to = ?change.to,
                status = %status,
                "Camera status changed: {}",
                e
            ),
            None => info!(
                camera = %self.endpoint,
                session = %change.session_id,
                from = ?change.from,
                to = ?change.to,
                status = %status,
                "Camera status changed"
            ),
        }
    }

    /// Start a reader for every track of the live stream not read yet
    fn read_new_tracks(
        &self,
        player: &WhepPlayer,
        readers: &mut HashMap<String, JoinHandle<()>>,
        shutdown: &CancellationToken,
    ) {
        let Some(media) = player.media() else {
            return;
        };

        for track in media.tracks() {
            if readers.contains_key(track.track_id()) {
                continue;
            }
            if let Some(reader) = self.spawn_rtp_reader(track.clone(), shutdown.child_token()) {
                readers.insert(track.track_id().to_string(), reader);
            }
        }
    }

    /// Stand-in for the renderer: drain RTP and log counters
    fn spawn_rtp_reader(
        &self,
        track: MediaTrack,
        shutdown: CancellationToken,
    ) -> Option<JoinHandle<()>> {
        let remote = Arc::clone(track.remote_track()?);
        let camera = self.endpoint.clone();
        let interval = self.stats_interval;

        Some(tokio::spawn(async move {
            let mut packets = 0u64;
            let mut bytes = 0u64;
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = ticker.tick() => info!(
                        camera = %camera,
                        track = track.track_id(),
                        kind = %track.kind(),
                        codec = track.mime_type(),
                        packets,
                        bytes,
                        "RTP counters"
                    ),
                    read = remote.read_rtp() => match read {
                        Ok((packet, _)) => {
                            packets += 1;
                            bytes += packet.payload.len() as u64;
                        }
                        Err(e) => {
                            debug!(camera = %camera, track = track.track_id(), "Track ended: {}", e);
                            break;
                        }
                    },
                }
            }
        }))
    }
}

fn stop_readers(readers: &mut HashMap<String, JoinHandle<()>>) {
    for (_, reader) in readers.drain() {
        reader.abort();
    }
}

fn init_tracing(format: LogFormat) -> anyhow::Result<()> {
    // Initialize tracing with EnvFilter for RUST_LOG support
    let env_filter = EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new("info"))?;
    let registry = tracing_subscriber::registry().with(env_filter);

    match format {
        LogFormat::Pretty => registry.with(tracing_subscriber::fmt::layer()).try_init()?,
        LogFormat::Json => registry
            .with(tracing_subscriber::fmt::layer().json())
            .try_init()?,
    }

    Ok(())
}
