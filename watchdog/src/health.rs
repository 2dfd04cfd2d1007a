use std::{sync::Arc, time::Duration};

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use kiosk_common::{config::SurfaceConfig, shutdown::wait_or_shutdown, ProcessRunner};

/// What one look at the rendering surface found.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SurfaceHealth {
    pub windowing_running: bool,
    pub running_browser: Option<String>,
}

impl SurfaceHealth {
    pub fn healthy(&self) -> bool {
        self.windowing_running && self.running_browser.is_some()
    }
}

/// Observes the windowing process and browsers. Never restarts anything.
pub struct HealthMonitor<R> {
    runner: Arc<R>,
    windowing_process: String,
    browsers: Vec<String>,
    interval: Duration,
}

impl<R: ProcessRunner> HealthMonitor<R> {
    pub fn new(runner: Arc<R>, surface: &SurfaceConfig, interval: Duration) -> Self {
        Self {
            runner,
            windowing_process: surface.windowing_process.clone(),
            browsers: surface.browsers.clone(),
            interval,
        }
    }

    pub async fn inspect(&self) -> SurfaceHealth {
        let windowing_running = self.runner.is_running(&self.windowing_process).await;

        let mut running_browser = None;
        for browser in &self.browsers {
            if self.runner.is_running(browser).await {
                running_browser = Some(browser.clone());
                break;
            }
        }

        SurfaceHealth {
            windowing_running,
            running_browser,
        }
    }

    pub async fn check(&self) -> SurfaceHealth {
        let health = self.inspect().await;

        match (&health.running_browser, health.windowing_running) {
            (Some(browser), true) => {
                info!("{} and {browser} are running", self.windowing_process)
            }
            (Some(browser), false) => {
                warn!("{} is not running ({browser} is)", self.windowing_process)
            }
            (None, true) => warn!(
                "{} is running but no browser is ({})",
                self.windowing_process,
                self.browsers.join(", ")
            ),
            (None, false) => warn!(
                "neither {} nor any browser is running",
                self.windowing_process
            ),
        }

        health
    }

    pub async fn run(self, shutdown: CancellationToken) {
        while !shutdown.is_cancelled() {
            self.check().await;

            if wait_or_shutdown(&shutdown, self.interval).await {
                break;
            }
        }
    }
}
