use std::time::Duration;

use reqwest::{Client, StatusCode, Url};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use kiosk_common::{
    shutdown::wait_or_shutdown, AppliedStatus, Decision, DesiredStatus, FetchError,
    ProcessRunner, ScheduleStatusResponse, StatusReconciler, StatusReport,
};

use crate::{applier::ActionApplier, publisher::SnapshotPublisher};

/// A partly failed apply is retried on later cycles, at most this many
/// attempts in total before it is recorded anyway.
pub const MAX_APPLY_ATTEMPTS: u32 = 3;

/// Reads the desired status for one device from the schedule server.
pub struct ScheduleClient {
    http: Client,
    url: Url,
}

impl ScheduleClient {
    /// `url` is the device's schedule status endpoint, see
    /// [`kiosk_common::endpoints::schedule_status_url`].
    pub fn new(url: Url, timeout: Duration) -> reqwest::Result<Self> {
        let http = Client::builder().timeout(timeout).build()?;
        Ok(Self { http, url })
    }

    pub async fn fetch(&self) -> Result<StatusReport, FetchError> {
        let response = self
            .http
            .get(self.url.clone())
            .send()
            .await
            .map_err(classify)?;

        let status = response.status();
        if status != StatusCode::OK {
            return Err(FetchError::Status(status.as_u16()));
        }

        let body = response.bytes().await.map_err(classify)?;
        let parsed: ScheduleStatusResponse = serde_json::from_slice(&body)
            .map_err(|err| FetchError::Malformed(err.to_string()))?;

        Ok(StatusReport::from_wire(&parsed.status))
    }
}

fn classify(err: reqwest::Error) -> FetchError {
    if err.is_timeout() {
        FetchError::Timeout
    } else {
        FetchError::Transport(err.to_string())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CycleOutcome {
    FetchFailed,
    Unchanged,
    Rejected,
    Applied(DesiredStatus),
    ApplyFailed(DesiredStatus),
}

/// The reconciliation loop: fetch, compare with what was last applied,
/// apply and publish only on change.
pub struct Poller<R> {
    client: ScheduleClient,
    applier: ActionApplier<R>,
    publisher: SnapshotPublisher,
    reconciler: StatusReconciler,
    /// Status whose apply partly failed, with the attempts made so far.
    pending: Option<(DesiredStatus, u32)>,
    interval: Duration,
}

impl<R: ProcessRunner> Poller<R> {
    pub fn new(
        client: ScheduleClient,
        applier: ActionApplier<R>,
        publisher: SnapshotPublisher,
        interval: Duration,
    ) -> Self {
        Self {
            client,
            applier,
            publisher,
            reconciler: StatusReconciler::new(),
            pending: None,
            interval,
        }
    }

    pub fn applied(&self) -> AppliedStatus {
        self.reconciler.current()
    }

    pub async fn check_and_apply(&mut self) -> CycleOutcome {
        let report = match self.client.fetch().await {
            Ok(report) => report,
            Err(err) => {
                warn!("could not fetch schedule status, keeping current state: {err}");
                return CycleOutcome::FetchFailed;
            }
        };

        match self.reconciler.decide(&report) {
            Decision::Unchanged => {
                debug!("status {report} unchanged");
                self.pending = None;
                CycleOutcome::Unchanged
            }
            Decision::Reject(_) => {
                self.applier.apply(&report).await;
                CycleOutcome::Rejected
            }
            Decision::Apply(status) => {
                let attempt = match self.pending {
                    Some((pending, attempts)) if pending == status => attempts + 1,
                    _ => 1,
                };

                if attempt == 1 {
                    info!(
                        "status changed: {} -> {status}",
                        self.reconciler.current().as_str()
                    );
                } else {
                    info!("retrying status {status} (attempt {attempt}/{MAX_APPLY_ATTEMPTS})");
                }

                let succeeded = self.applier.apply(&report).await;

                if attempt == 1 {
                    if let Err(err) = self.publisher.publish(status) {
                        warn!("failed to update status file: {err}");
                    }
                }

                if succeeded {
                    self.pending = None;
                    self.reconciler.record_applied(status);
                    return CycleOutcome::Applied(status);
                }

                if attempt >= MAX_APPLY_ATTEMPTS {
                    error!(
                        "giving up on status {status} after {attempt} attempts, \
                         waiting for the schedule to change"
                    );
                    self.pending = None;
                    self.reconciler.record_applied(status);
                } else {
                    warn!(
                        "status {status} not fully applied, retrying next cycle \
                         (attempt {attempt}/{MAX_APPLY_ATTEMPTS})"
                    );
                    self.pending = Some((status, attempt));
                }
                CycleOutcome::ApplyFailed(status)
            }
        }
    }

    pub async fn run(mut self, shutdown: CancellationToken) {
        info!(
            "starting display scheduler (check interval: {}s, status file: {})",
            self.interval.as_secs(),
            self.publisher.path().display()
        );

        while !shutdown.is_cancelled() {
            let outcome = self.check_and_apply().await;
            debug!("cycle finished: {outcome:?}");

            if wait_or_shutdown(&shutdown, self.interval).await {
                break;
            }
        }

        info!(
            "display scheduler stopped (last applied: {}, before that: {})",
            self.applied().as_str(),
            self.reconciler.previous().as_str()
        );
    }
}
