use std::{sync::Arc, time::Duration};

use anyhow::Context;
use tracing::info;

use kiosk_common::{bootstrap, shutdown::shutdown_token, HostRunner, PidFile};

use crate::health::HealthMonitor;

pub async fn run() -> anyhow::Result<()> {
    let config = bootstrap::init(|config| &config.watchdog.log_file)
        .context("failed to load kiosk configuration")?;

    let pid = PidFile::create(&config.watchdog.pid_file);
    let interval = Duration::from_secs(config.watchdog.check_interval_secs);
    info!("kiosk watchdog starting (check interval: {}s)", interval.as_secs());

    HealthMonitor::new(Arc::new(HostRunner), &config.surface, interval)
        .run(shutdown_token())
        .await;

    pid.remove();
    info!("kiosk watchdog stopped");
    Ok(())
}
