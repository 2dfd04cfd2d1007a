use std::{sync::Arc, time::Duration};

use anyhow::Context;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use kiosk_common::{
    bootstrap, endpoints,
    shutdown::{shutdown_token, wait_or_shutdown},
    HostRunner, PidFile, ProcessRunner,
};

use crate::{
    commands::CommandExecutor,
    registration::{DeviceIdentity, RegistrationClient},
    server::{self, AccessPolicy},
};

pub async fn run() -> anyhow::Result<()> {
    let config = bootstrap::init(|config| &config.agent.log_file)
        .context("failed to load kiosk configuration")?;

    let pid = PidFile::create(&config.agent.pid_file);
    let identity = DeviceIdentity::detect();
    info!("kiosk agent starting");
    info!("hostname: {}", identity.hostname);
    info!("mac: {}", identity.mac);
    info!("log file: {}", config.agent.log_file.display());

    let register_url = endpoints::register_url(&config.api.url)
        .context("api.url cannot be used as the registration address")?;
    let registration = RegistrationClient::new(
        register_url,
        Duration::from_secs(config.api.register_timeout_secs),
    )
    .context("failed to build registration http client")?;
    let state = registration.register_once(&identity).await;

    let executor = Arc::new(CommandExecutor::new(
        Arc::new(HostRunner),
        &config,
        identity,
        state.device_id().map(str::to_string),
    ));

    let listener = TcpListener::bind(&config.agent.listen_addr)
        .await
        .with_context(|| format!("failed to bind agent server at {}", config.agent.listen_addr))?;
    info!("agent listening on http://{}", config.agent.listen_addr);

    let policy = AccessPolicy::from_config(&config.agent);
    if !policy.has_token() {
        warn!("agent.command_token is not set, POST /api/command will be refused");
    }

    let shutdown = shutdown_token();
    let app = server::router(executor.clone(), executor.screenshot_dir(), policy);
    let server = tokio::spawn(server::serve(listener, app, shutdown.clone()));

    report_status(
        executor.as_ref(),
        Duration::from_secs(config.agent.poll_interval_secs),
        &shutdown,
    )
    .await;

    match server.await {
        Ok(Ok(())) => {}
        Ok(Err(err)) => warn!("agent server stopped with error: {err}"),
        Err(err) => warn!("agent server task failed: {err}"),
    }

    pid.remove();
    info!("kiosk agent stopped");
    Ok(())
}

async fn report_status<R: ProcessRunner>(
    executor: &CommandExecutor<R>,
    interval: Duration,
    shutdown: &CancellationToken,
) {
    info!("waiting for commands");

    while !wait_or_shutdown(shutdown, interval).await {
        let status = executor.device_status().await;
        debug!("status: {status:?}");
    }
}
