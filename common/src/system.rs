//! Host facts read from procfs and sysfs.

use std::path::Path;

use chrono::{Local, SecondsFormat};

use crate::types::LoadAverage;

const NET_CLASS_DIR: &str = "/sys/class/net";
const PREFERRED_INTERFACES: [&str; 2] = ["eth0", "wlan0"];
pub const NULL_MAC: &str = "00:00:00:00:00:00";

/// Seconds since system boot, or 0 when unavailable.
pub fn uptime_seconds() -> u64 {
    std::fs::read_to_string("/proc/uptime")
        .ok()
        .and_then(|raw| parse_uptime(&raw))
        .unwrap_or(0)
}

pub fn parse_uptime(raw: &str) -> Option<u64> {
    let seconds = raw.split_whitespace().next()?.parse::<f64>().ok()?;
    if seconds.is_finite() && seconds >= 0.0 {
        Some(seconds as u64)
    } else {
        None
    }
}

pub fn load_average() -> LoadAverage {
    std::fs::read_to_string("/proc/loadavg")
        .ok()
        .and_then(|raw| parse_loadavg(&raw))
        .unwrap_or(LoadAverage {
            one: 0.0,
            five: 0.0,
            fifteen: 0.0,
        })
}

pub fn parse_loadavg(raw: &str) -> Option<LoadAverage> {
    let mut fields = raw.split_whitespace().map(|field| field.parse::<f64>().ok());
    Some(LoadAverage {
        one: fields.next()??,
        five: fields.next()??,
        fifteen: fields.next()??,
    })
}

pub fn hostname() -> String {
    ["/proc/sys/kernel/hostname", "/etc/hostname"]
        .iter()
        .filter_map(|path| std::fs::read_to_string(path).ok())
        .map(|raw| raw.trim().to_string())
        .find(|name| !name.is_empty())
        .unwrap_or_else(|| "localhost".to_string())
}

pub fn primary_mac() -> String {
    primary_mac_in(Path::new(NET_CLASS_DIR))
}

/// eth0, then wlan0, then the first non-loopback interface with a non-null
/// address.
pub fn primary_mac_in(net_dir: &Path) -> String {
    let read_address = |iface: &Path| {
        std::fs::read_to_string(iface.join("address"))
            .ok()
            .map(|raw| raw.trim().to_string())
            .filter(|mac| !mac.is_empty())
    };

    for name in PREFERRED_INTERFACES {
        if let Some(mac) = read_address(&net_dir.join(name)) {
            return mac;
        }
    }

    let Ok(entries) = std::fs::read_dir(net_dir) else {
        return NULL_MAC.to_string();
    };

    let mut interfaces: Vec<_> = entries
        .filter_map(Result::ok)
        .filter(|entry| entry.file_name() != "lo")
        .map(|entry| entry.path())
        .collect();
    interfaces.sort();

    interfaces
        .iter()
        .filter_map(|iface| read_address(iface))
        .find(|mac| mac != NULL_MAC)
        .unwrap_or_else(|| NULL_MAC.to_string())
}

/// Local time in RFC 3339 form, the timestamp format of every record the
/// agents write.
pub fn local_timestamp() -> String {
    Local::now().to_rfc3339_opts(SecondsFormat::Secs, false)
}
