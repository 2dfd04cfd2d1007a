use std::sync::Arc;

use anyhow::Context;
use tracing::info;

use kiosk_common::{bootstrap, endpoints, shutdown::shutdown_token, HostRunner, PidFile};

use crate::{
    applier::ActionApplier,
    poller::{Poller, ScheduleClient},
    publisher::SnapshotPublisher,
};

pub async fn run() -> anyhow::Result<()> {
    let config = bootstrap::init(|config| &config.scheduler.log_file)
        .context("failed to load kiosk configuration")?;

    let device_id = config
        .device_id()
        .context("the scheduler needs a device id; set display.id or KIOSK_DEVICE_ID")?
        .to_string();

    let pid = PidFile::create(&config.scheduler.pid_file);
    info!(
        "display scheduler starting for device {device_id} against {}",
        config.api.url
    );

    let status_url = endpoints::schedule_status_url(&config.api.url, &device_id)
        .context("api.url cannot be used as the schedule server address")?;
    let client = ScheduleClient::new(status_url, config.status_timeout())
        .context("failed to build schedule http client")?;
    let applier = ActionApplier::new(Arc::new(HostRunner), &config);
    let publisher = SnapshotPublisher::new(&config.scheduler.status_file, device_id);

    Poller::new(client, applier, publisher, config.check_interval())
        .run(shutdown_token())
        .await;

    pid.remove();
    Ok(())
}
