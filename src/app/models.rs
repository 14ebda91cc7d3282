use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct WifiState {
    pub connected: bool,
    pub ip_address: Option<String>,
    pub port: Option<String>,
}

impl WifiState {
    /// The device has no wlan0 route.
    pub fn unavailable() -> Self {
        Self {
            connected: false,
            ip_address: None,
            port: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Device {
    pub device_id: String,
    pub wifi_state: WifiState,
}

impl Device {
    pub fn new(device_id: impl Into<String>, wifi_state: WifiState) -> Self {
        Self {
            device_id: device_id.into(),
            wifi_state,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AndroidVirtualDevice {
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FileEntry {
    pub is_dir: bool,
    pub name: String,
    /// Human formatted, empty for directories.
    pub size: String,
    pub modified_at: String,
    pub symlink_target: Option<String>,
    pub permissions: String,
}

/// Which device-side command produced a listing.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ListingFormat {
    /// `ls -l -p` output.
    LongListing,
    /// `|`-delimited `stat -c` records.
    StatRecords,
}
