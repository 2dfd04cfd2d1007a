use url::Url;

use crate::error::ConfigError;

pub const PATH_REGISTER: &str = "register";

/// `{base}/device/{id}/schedule_status`. The id is a single escaped path
/// segment.
pub fn schedule_status_url(base_url: &str, device_id: &str) -> Result<Url, ConfigError> {
    endpoint(base_url, &["device", device_id, "schedule_status"])
}

pub fn register_url(base_url: &str) -> Result<Url, ConfigError> {
    endpoint(base_url, &[PATH_REGISTER])
}

fn endpoint(base_url: &str, segments: &[&str]) -> Result<Url, ConfigError> {
    let invalid = |reason: String| ConfigError::InvalidUrl {
        url: base_url.to_string(),
        reason,
    };

    let mut url = Url::parse(base_url).map_err(|err| invalid(err.to_string()))?;
    url.path_segments_mut()
        .map_err(|()| invalid("cannot carry a path".to_string()))?
        .pop_if_empty()
        .extend(segments);
    Ok(url)
}
