mod http;
mod persist;

use anyhow::{Context, Result};
use drumstick_config::{AppConfig, Hand};
use drumstick_imu::HandClient;
use drumstick_zones::ZoneLayout;
use http::AppState;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{info, warn};

const USAGE: &str = "usage: drumstick [CONFIG.toml] | drumstick --write-config [PATH]";

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging.
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "drumstick=info,drumstick_imu=info,drumstick_zones=info,drumstick_config=info".into()
            }),
        )
        .init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let (config, config_file) = match args.as_slice() {
        // An unreadable file is never overwritten.
        [] => match drumstick_config::load_config() {
            Ok(config) => (config, drumstick_config::config_path().ok()),
            Err(e) => {
                warn!(?e, "Failed to load config, using defaults");
                (AppConfig::default(), None)
            }
        },
        [flag, rest @ ..] if flag == "--write-config" => {
            let config = AppConfig::default();
            match rest {
                [] => drumstick_config::save_config(&config)?,
                [path] => drumstick_config::save_config_to(&config, Path::new(path))?,
                _ => anyhow::bail!(USAGE),
            }
            return Ok(());
        }
        [flag] if flag == "--help" || flag == "-h" => {
            println!("{USAGE}");
            return Ok(());
        }
        [path] => (drumstick_config::load_config_from(Path::new(path))?, Some(PathBuf::from(path))),
        _ => anyhow::bail!(USAGE),
    };

    info!("Drumstick hit server starting");

    // A bad layout is fatal before any hand starts.
    let layout = Arc::new(ZoneLayout::from_config(&config.classifier).context("invalid zone layout")?);
    info!(
        zones = layout.zones().len(),
        mode = ?layout.mode(),
        default = %layout.default_zone().name,
        "Zone layout loaded"
    );

    let state = Arc::new(AppState {
        right: HandClient::start(Hand::Right, &config, Arc::clone(&layout)),
        left: HandClient::start(Hand::Left, &config, Arc::clone(&layout)),
        layout,
    });

    // Captured gyro offsets survive a restart.
    match config_file {
        Some(path) => {
            tokio::spawn(persist::persist_calibration(
                config.clone(),
                path,
                state.right.calibration_updates(),
                state.left.calibration_updates(),
            ));
        }
        None => warn!("Calibration changes will not be saved"),
    }

    let listener = TcpListener::bind(&config.server.bind)
        .await
        .with_context(|| format!("binding {}", config.server.bind))?;
    info!(addr = %config.server.bind, "Polling API listening");

    tokio::select! {
        result = http::serve(listener, state) => result?,
        _ = tokio::signal::ctrl_c() => info!("Shutting down"),
    }

    Ok(())
}
