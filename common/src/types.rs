use serde::{Deserialize, Deserializer, Serialize};

/// Operational state requested by the remote schedule authority.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DesiredStatus {
    Active,
    TurnedOff,
}

impl DesiredStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Active => "ACTIVE",
            Self::TurnedOff => "TURNED_OFF",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "ACTIVE" => Some(Self::Active),
            "TURNED_OFF" => Some(Self::TurnedOff),
            _ => None,
        }
    }
}

impl std::fmt::Display for DesiredStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of one successful status fetch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StatusReport {
    Known(DesiredStatus),
    Unrecognized(String),
}

impl StatusReport {
    pub fn from_wire(value: &str) -> Self {
        DesiredStatus::parse(value)
            .map(Self::Known)
            .unwrap_or_else(|| Self::Unrecognized(value.to_string()))
    }
}

impl std::fmt::Display for StatusReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Known(status) => f.write_str(status.as_str()),
            Self::Unrecognized(raw) => write!(f, "{raw:?}"),
        }
    }
}

/// Last status the scheduler actually applied. Starts out `Unknown` so the
/// first successful poll always differs from it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AppliedStatus {
    #[default]
    Unknown,
    Active,
    TurnedOff,
}

impl AppliedStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Unknown => "UNKNOWN",
            Self::Active => "ACTIVE",
            Self::TurnedOff => "TURNED_OFF",
        }
    }

    pub fn matches(self, desired: DesiredStatus) -> bool {
        matches!(
            (self, desired),
            (Self::Active, DesiredStatus::Active) | (Self::TurnedOff, DesiredStatus::TurnedOff)
        )
    }
}

impl From<DesiredStatus> for AppliedStatus {
    fn from(status: DesiredStatus) -> Self {
        match status {
            DesiredStatus::Active => Self::Active,
            DesiredStatus::TurnedOff => Self::TurnedOff,
        }
    }
}

/// Body of `GET /device/{id}/schedule_status`.
#[derive(Debug, Clone, Deserialize)]
pub struct ScheduleStatusResponse {
    #[serde(default = "default_wire_status")]
    pub status: String,
}

fn default_wire_status() -> String {
    DesiredStatus::Active.as_str().to_string()
}

/// File-resident record for external observers, rewritten after every apply.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusSnapshot {
    pub device_id: String,
    pub status: DesiredStatus,
    pub timestamp: String,
    pub uptime: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct RegistrationRequest {
    pub hostname: String,
    pub mac: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RegistrationResponse {
    #[serde(default)]
    pub success: bool,
    #[serde(default, deserialize_with = "string_or_number")]
    pub id: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
}

fn string_or_number<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(serde_json::Value::String(id)) => Some(id),
        Some(serde_json::Value::Number(id)) => Some(id.to_string()),
        _ => None,
    })
}

/// Outcome of one agent command. Handlers never propagate errors; they
/// report them here.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandResult {
    pub success: bool,
    pub message: String,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl CommandResult {
    pub fn ok(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
            extra: serde_json::Map::new(),
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
            extra: serde_json::Map::new(),
        }
    }

    pub fn with_field(mut self, key: &str, value: impl Into<serde_json::Value>) -> Self {
        self.extra.insert(key.to_string(), value.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoadAverage {
    #[serde(rename = "1min")]
    pub one: f64,
    #[serde(rename = "5min")]
    pub five: f64,
    #[serde(rename = "15min")]
    pub fifteen: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceStatus {
    pub hostname: String,
    pub mac: String,
    pub device_id: Option<String>,
    pub uptime: u64,
    pub load: LoadAverage,
    pub x_running: bool,
    pub browser_running: bool,
    pub timestamp: String,
}
