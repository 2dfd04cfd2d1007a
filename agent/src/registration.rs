use std::time::Duration;

use reqwest::{Client, Url};
use tracing::{error, info};

use kiosk_common::{system, RegistrationError, RegistrationRequest, RegistrationResponse};

/// Hostname and hardware address reported to the server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceIdentity {
    pub hostname: String,
    pub mac: String,
}

impl DeviceIdentity {
    pub fn detect() -> Self {
        Self {
            hostname: system::hostname(),
            mac: system::primary_mac(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum AgentState {
    #[default]
    Unregistered,
    Registered {
        device_id: String,
    },
}

impl AgentState {
    pub fn device_id(&self) -> Option<&str> {
        match self {
            Self::Unregistered => None,
            Self::Registered { device_id } => Some(device_id),
        }
    }
}

pub struct RegistrationClient {
    http: Client,
    url: Url,
}

impl RegistrationClient {
    pub fn new(url: Url, timeout: Duration) -> reqwest::Result<Self> {
        Ok(Self {
            http: Client::builder().timeout(timeout).build()?,
            url,
        })
    }

    pub async fn register(&self, identity: &DeviceIdentity) -> Result<String, RegistrationError> {
        let request = RegistrationRequest {
            hostname: identity.hostname.clone(),
            mac: identity.mac.clone(),
        };

        let response = self
            .http
            .post(self.url.clone())
            .json(&request)
            .send()
            .await
            .map_err(|err| RegistrationError::Transport(err.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(RegistrationError::Status(status.as_u16()));
        }

        let body: RegistrationResponse = response
            .json()
            .await
            .map_err(|err| RegistrationError::Malformed(err.to_string()))?;

        match body {
            RegistrationResponse {
                success: true,
                id: Some(id),
                ..
            } => Ok(id),
            RegistrationResponse {
                success: true,
                id: None,
                ..
            } => Err(RegistrationError::Malformed(
                "success without an id".to_string(),
            )),
            RegistrationResponse { message, .. } => Err(RegistrationError::Rejected(
                message.unwrap_or_else(|| "no reason given".to_string()),
            )),
        }
    }

    /// One attempt; failure leaves the agent unregistered.
    pub async fn register_once(&self, identity: &DeviceIdentity) -> AgentState {
        match self.register(identity).await {
            Ok(device_id) => {
                info!("device registered successfully (id: {device_id})");
                AgentState::Registered { device_id }
            }
            Err(err) => {
                error!("device registration failed: {err}");
                AgentState::Unregistered
            }
        }
    }
}
