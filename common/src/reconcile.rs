use crate::types::{AppliedStatus, DesiredStatus, StatusReport};

/// One OS-level side effect of applying a status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlAction {
    StartService,
    StopService,
    DisplayOn,
    DisplayOff,
}

impl ControlAction {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::StartService => "start",
            Self::StopService => "stop",
            Self::DisplayOn => "on",
            Self::DisplayOff => "off",
        }
    }
}

/// Side effects needed to reach `status`. Service control always precedes
/// display control.
pub fn plan_actions(status: DesiredStatus) -> [ControlAction; 2] {
    match status {
        DesiredStatus::Active => [ControlAction::StartService, ControlAction::DisplayOn],
        DesiredStatus::TurnedOff => [ControlAction::StopService, ControlAction::DisplayOff],
    }
}

/// What a poll should lead to, given the last applied status.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    Unchanged,
    Apply(DesiredStatus),
    Reject(String),
}

/// Remembers what the scheduler last applied and decides whether a fresh
/// report requires action.
#[derive(Debug, Clone, Default)]
pub struct StatusReconciler {
    current: AppliedStatus,
    previous: AppliedStatus,
}

impl StatusReconciler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn current(&self) -> AppliedStatus {
        self.current
    }

    pub fn previous(&self) -> AppliedStatus {
        self.previous
    }

    pub fn decide(&self, report: &StatusReport) -> Decision {
        match report {
            StatusReport::Known(status) if self.current.matches(*status) => Decision::Unchanged,
            StatusReport::Known(status) => Decision::Apply(*status),
            StatusReport::Unrecognized(raw) => Decision::Reject(raw.clone()),
        }
    }

    pub fn record_applied(&mut self, status: DesiredStatus) {
        let applied = AppliedStatus::from(status);
        if applied != self.current {
            self.previous = self.current;
            self.current = applied;
        }
    }
}
