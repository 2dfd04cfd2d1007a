use std::{sync::Arc, time::Duration};

use tracing::{error, info, warn};

use kiosk_common::{
    plan_actions, ControlAction, Invocation, KioskConfig, ProcessRunner, StatusReport,
};

/// Drives the content service and display power towards a status. Every
/// sub-action is attempted even when an earlier one fails.
pub struct ActionApplier<R> {
    runner: Arc<R>,
    manager: Vec<String>,
    content_service: String,
    control_timeout: Duration,
    power_command: Vec<String>,
    power_on_arg: String,
    power_off_arg: String,
    power_timeout: Duration,
}

impl<R: ProcessRunner> ActionApplier<R> {
    pub fn new(runner: Arc<R>, config: &KioskConfig) -> Self {
        Self {
            runner,
            manager: config.service.manager.clone(),
            content_service: config.service.content_service.clone(),
            control_timeout: Duration::from_secs(config.service.control_timeout_secs),
            power_command: config.display.power_command.clone(),
            power_on_arg: config.display.power_on_arg.clone(),
            power_off_arg: config.display.power_off_arg.clone(),
            power_timeout: Duration::from_secs(config.display.power_timeout_secs),
        }
    }

    /// Returns `true` only when every sub-action succeeded.
    pub async fn apply(&self, report: &StatusReport) -> bool {
        let status = match report {
            StatusReport::Known(status) => *status,
            StatusReport::Unrecognized(raw) => {
                warn!("unknown status {raw:?}, nothing applied");
                return false;
            }
        };

        info!("applying status: {status}");

        let mut all_succeeded = true;
        for action in plan_actions(status) {
            all_succeeded &= self.perform(action).await;
        }

        if all_succeeded {
            info!("status {status} applied");
        } else {
            warn!("status {status} applied with failures");
        }
        all_succeeded
    }

    async fn perform(&self, action: ControlAction) -> bool {
        let (invocation, timeout) = match action {
            ControlAction::StartService | ControlAction::StopService => (
                Invocation::from_prefix(&self.manager).map(|invocation| {
                    invocation.args([action.as_str(), self.content_service.as_str()])
                }),
                self.control_timeout,
            ),
            ControlAction::DisplayOn => (
                Invocation::from_prefix(&self.power_command)
                    .map(|invocation| invocation.arg(&self.power_on_arg)),
                self.power_timeout,
            ),
            ControlAction::DisplayOff => (
                Invocation::from_prefix(&self.power_command)
                    .map(|invocation| invocation.arg(&self.power_off_arg)),
                self.power_timeout,
            ),
        };

        let Some(invocation) = invocation else {
            error!("no command configured for {action:?}");
            return false;
        };

        match self.runner.run_checked(&invocation, timeout).await {
            Ok(_) => {
                info!("`{invocation}` succeeded");
                true
            }
            Err(err) => {
                error!("`{invocation}` failed: {err}");
                false
            }
        }
    }
}
