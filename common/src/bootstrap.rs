use std::path::Path;

use tracing::{error, info, warn};

use crate::{config::KioskConfig, error::ConfigError, logging};

/// Startup sequence shared by every agent binary: read the config file,
/// start logging to the file `log_file` selects, then apply environment
/// overrides and sanitize. Anything logged along the way reaches the log.
pub fn init<F>(log_file: F) -> Result<KioskConfig, ConfigError>
where
    F: Fn(&KioskConfig) -> &Path,
{
    let path = KioskConfig::config_path();
    let mut config = KioskConfig::load(&path)?;

    logging::init(log_file(&config));
    install_panic_hook();

    if path.exists() {
        info!("loaded config from {}", path.display());
    } else {
        warn!("config file {} not found, using defaults", path.display());
    }

    config.apply_env_overrides();
    config.sanitize();
    Ok(config)
}

/// Routes panic messages through the log before the default hook runs.
fn install_panic_hook() {
    let default_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |info| {
        error!("fatal error: {info}");
        default_hook(info);
    }));
}
