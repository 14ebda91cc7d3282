use std::sync::OnceLock;

use regex::Regex;

use crate::app::models::WifiState;

pub const DEVICES_HEADER: &str = "List of devices attached";

/// Marker carried by device ids of devices attached through wireless debugging.
pub const TLS_CONNECT_MARKER: &str = "adb-tls-connect";

fn device_line_regex() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^(\S+)\s+device(?:\s|$)").ok())
        .as_ref()
}

fn address_regex() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(\d{1,3}\.\d{1,3}\.\d{1,3}\.\d{1,3}):(\d+)").ok())
        .as_ref()
}

fn trailing_ipv4_regex() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\b(\d{1,3}\.\d{1,3}\.\d{1,3}\.\d{1,3})\s*$").ok())
        .as_ref()
}

/// Ids of devices in the `device` state. Output whose first line is not the
/// `devices` header (daemon start-up chatter, errors) yields nothing.
pub fn parse_device_ids(lines: &[String]) -> Vec<String> {
    match lines.first() {
        Some(first) if first.trim() == DEVICES_HEADER => {}
        _ => return Vec::new(),
    }
    let Some(device_re) = device_line_regex() else {
        return Vec::new();
    };
    lines
        .iter()
        .skip(1)
        .map(|line| line.trim())
        .filter(|line| !line.is_empty())
        .filter_map(|line| device_re.captures(line))
        .map(|caps| caps[1].to_string())
        .collect()
}

/// Devices attached over TCP carry their address in the id.
pub fn wifi_state_from_device_id(device_id: &str) -> Option<WifiState> {
    let caps = address_regex()?.captures(device_id)?;
    Some(WifiState {
        connected: true,
        ip_address: Some(caps[1].to_string()),
        port: Some(caps[2].to_string()),
    })
}

/// Reads the wlan0 address out of `ip route` output.
pub fn parse_wlan_route(device_id: &str, lines: &[String]) -> WifiState {
    let ip_address = lines
        .iter()
        .filter(|line| line.contains("wlan0"))
        .find_map(|line| {
            trailing_ipv4_regex()?
                .captures(line)
                .map(|caps| caps[1].to_string())
        });
    match ip_address {
        Some(ip_address) => WifiState {
            connected: device_id.contains(TLS_CONNECT_MARKER),
            ip_address: Some(ip_address),
            port: None,
        },
        None => WifiState::unavailable(),
    }
}

pub fn is_pair_success(lines: &[String]) -> bool {
    lines
        .first()
        .map(|line| line.trim_start().starts_with("Successfully"))
        .unwrap_or(false)
}

/// `adb connect` exits 0 even when it fails, so only the text tells.
pub fn is_connect_success(lines: &[String]) -> bool {
    lines.iter().any(|line| {
        let lower = line.to_lowercase();
        (lower.contains("connected to") && !lower.contains("cannot"))
            || lower.contains("already connected")
    })
}
