use anyhow::{anyhow, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use webradar::radar::{RenderSnapshot, RenderState, ViewportMetrics};
use webradar::shutdown::spawn_signal_handlers;
use webradar::{
    init_logging, ConnectionManager, LogOptions, MapCatalog, MapTracker, PlayerId, Settings,
    SettingsStore, TelemetryFrame, WebradarConfig, WsConnector,
};

#[derive(Parser, Debug)]
#[command(name = "radar-viewer")]
#[command(about = "Headless radar viewer: connects to the relay and renders telemetry frames")]
#[command(version)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "webradar.toml")]
    config: String,

    #[arg(short, long, help = "Enable debug level logging")]
    debug: bool,

    #[arg(short, long, help = "Enable verbose info level logging")]
    verbose: bool,

    #[arg(short, long, help = "Enable quiet mode - only log errors")]
    quiet: bool,

    #[arg(long, value_name = "FORMAT", help = "Log output format: json, pretty, or compact")]
    log_format: Option<String>,

    #[arg(long, value_name = "PATH")]
    log_file: Option<PathBuf>,

    /// Relay websocket endpoint, e.g. ws://localhost:22006/cs2_webradar
    #[arg(short, long)]
    endpoint: Option<String>,

    /// Shared key presented to the relay
    #[arg(short, long)]
    key: Option<String>,

    /// Follow this player id (persisted in the settings file)
    #[arg(short, long)]
    follow: Option<PlayerId>,

    /// Viewport size in pixels, as WIDTHxHEIGHT
    #[arg(long, value_parser = parse_viewport)]
    viewport: Option<(f64, f64)>,

    /// Directory holding <map>/data.json calibration files
    #[arg(long)]
    data_dir: Option<String>,

    /// Settings file
    #[arg(long)]
    settings: Option<String>,

    /// Print every render snapshot to stdout as JSON
    #[arg(long)]
    json: bool,
}

fn parse_viewport(value: &str) -> std::result::Result<(f64, f64), String> {
    let (width, height) = value
        .split_once(['x', 'X'])
        .ok_or_else(|| format!("expected WIDTHxHEIGHT, got '{}'", value))?;
    let width: f64 = width.trim().parse().map_err(|e| format!("bad width: {}", e))?;
    let height: f64 = height.trim().parse().map_err(|e| format!("bad height: {}", e))?;
    Ok((width, height))
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let args = Args::parse();

    let _log_guard = init_logging(&LogOptions {
        debug: args.debug,
        verbose: args.verbose,
        quiet: args.quiet,
        format: args.log_format.clone(),
        file: args.log_file.clone(),
    })?;

    let mut config = WebradarConfig::load_from_file(&args.config)?;
    if let Some(endpoint) = args.endpoint.clone() {
        config.viewer.endpoint = endpoint;
    }
    if let Some(key) = args.key.clone() {
        config.viewer.key = key;
    }
    if let Some(data_dir) = args.data_dir.clone() {
        config.viewer.data_dir = data_dir;
    }
    if let Some(settings) = args.settings.clone() {
        config.viewer.settings_path = settings;
    }
    config.validate().map_err(|e| anyhow!("Invalid configuration: {}", e))?;

    info!("Starting radar viewer v{}", env!("CARGO_PKG_VERSION"));

    let store = SettingsStore::new(&config.viewer.settings_path);
    let mut settings = store.load().await;
    if let Some(id) = args.follow {
        settings.follow_player_id = Some(id);
        store.save(&settings).await?;
    }

    let (width, height) = args.viewport.unwrap_or((
        config.render.viewport.0 as f64,
        config.render.viewport.1 as f64,
    ));
    let viewport = ViewportMetrics::new(width, height);

    let manager = ConnectionManager::new(&config.viewer, Arc::new(WsConnector))?;
    let shutdown = CancellationToken::new();
    spawn_signal_handlers(shutdown.clone());

    let mut viewer = Viewer {
        tracker: MapTracker::new(MapCatalog::new(&config.viewer.data_dir)),
        render: RenderState::new(config.render.team_policy, config.render.entity_eviction_frames),
        store,
        settings,
        viewport,
        json: args.json,
    };

    manager.start().await?;
    let result = viewer.run(&manager, &shutdown).await;
    manager.stop().await?;

    if let Err(e) = &result {
        error!("Viewer error: {}", e);
    }
    info!("Radar viewer exited");
    result
}

struct Viewer {
    tracker: MapTracker,
    render: RenderState,
    store: SettingsStore,
    settings: Settings,
    viewport: ViewportMetrics,
    json: bool,
}

impl Viewer {
    async fn run(&mut self, manager: &ConnectionManager, shutdown: &CancellationToken) -> Result<()> {
        let mut status = manager.subscribe_status();
        let mut frames = manager.subscribe_frames();

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                changed = status.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    let message = status.borrow_and_update().message();
                    info!("{}", message);
                    if !self.json {
                        println!("{}", message);
                    }
                }
                changed = frames.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    let frame = frames.borrow_and_update().clone();
                    if let Some(frame) = frame {
                        let snapshot = self.on_frame(&frame).await;
                        self.emit(&snapshot, manager)?;
                    }
                }
            }
        }

        Ok(())
    }

    async fn on_frame(&mut self, frame: &TelemetryFrame) -> RenderSnapshot {
        self.tracker.observe(&frame.map).await;

        if self.settings.reconcile_follow(frame, self.render.policy()) {
            if let Err(e) = self.store.save(&self.settings).await {
                warn!("Failed to persist settings: {}", e);
            }
        }

        let calibration = self.tracker.asset().map(|asset| &asset.calibration);
        self.render.render(frame, calibration, self.viewport, &self.settings)
    }

    fn emit(&self, snapshot: &RenderSnapshot, manager: &ConnectionManager) -> Result<()> {
        if self.json {
            println!("{}", serde_json::to_string(snapshot)?);
            return Ok(());
        }

        let visible = snapshot.players.iter().filter(|p| p.visible).count();
        let latency = manager
            .latency()
            .map(|l| format!("{}ms", l.as_millis()))
            .unwrap_or_else(|| "-".to_string());

        if snapshot.map_ready {
            debug!(
                "map {} | {} players ({} visible) | camera rot {:.1} | latency {}",
                self.tracker.current_map().unwrap_or("?"),
                snapshot.players.len(),
                visible,
                snapshot.camera.rotation,
                latency
            );
        } else {
            debug!("waiting for map data | latency {}", latency);
        }
        Ok(())
    }
}
