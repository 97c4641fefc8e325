//! Writes calibration changes back to the config file they were loaded from.

use drumstick_config::{AppConfig, CalibrationConfig, Hand};
use std::path::PathBuf;
use tokio::sync::watch;

/// Save `config` to `path` each time either hand's calibration changes.
/// Returns once both hands have shut down.
pub async fn persist_calibration(
    mut config: AppConfig,
    path: PathBuf,
    mut right: watch::Receiver<CalibrationConfig>,
    mut left: watch::Receiver<CalibrationConfig>,
) {
    loop {
        let hand = tokio::select! {
            changed = right.changed() => match changed {
                Ok(()) => Hand::Right,
                Err(_) => break,
            },
            changed = left.changed() => match changed {
                Ok(()) => Hand::Left,
                Err(_) => break,
            },
        };
        let calibration = match hand {
            Hand::Right => right.borrow_and_update().clone(),
            Hand::Left => left.borrow_and_update().clone(),
        };
        match hand {
            Hand::Right => config.right.calibration = calibration,
            Hand::Left => config.left.calibration = calibration,
        }

        match drumstick_config::save_config_to(&config, &path) {
            Ok(()) => tracing::info!(%hand, ?path, "Calibration saved"),
            Err(e) => tracing::warn!(%hand, ?e, "Failed to save calibration"),
        }
    }
}
