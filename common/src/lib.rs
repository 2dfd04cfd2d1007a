pub mod bootstrap;
pub mod config;
pub mod endpoints;
pub mod error;
pub mod logging;
pub mod pidfile;
pub mod process;
pub mod reconcile;
pub mod shutdown;
pub mod system;
pub mod types;

pub use config::KioskConfig;
pub use error::{CommandError, ConfigError, FetchError, RegistrationError, SnapshotError};
pub use pidfile::PidFile;
pub use process::{CommandOutput, HostRunner, Invocation, ProcessRunner};
pub use reconcile::{plan_actions, ControlAction, Decision, StatusReconciler};
pub use types::{
    AppliedStatus, CommandResult, DesiredStatus, DeviceStatus, LoadAverage, RegistrationRequest,
    RegistrationResponse, ScheduleStatusResponse, StatusReport, StatusSnapshot,
};
