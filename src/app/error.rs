use serde::Serialize;
use std::fmt;

#[derive(Debug, Clone, Serialize)]
pub struct AppError {
    pub error: String,
    pub code: String,
    pub trace_id: String,
}

impl AppError {
    pub fn new(code: impl Into<String>, message: impl Into<String>, trace_id: impl Into<String>) -> Self {
        Self {
            error: message.into(),
            code: code.into(),
            trace_id: trace_id.into(),
        }
    }

    pub fn validation(message: impl Into<String>, trace_id: impl Into<String>) -> Self {
        Self::new("ERR_VALIDATION", message, trace_id)
    }

    pub fn dependency(message: impl Into<String>, trace_id: impl Into<String>) -> Self {
        Self::new("ERR_DEPENDENCY", message, trace_id)
    }

    pub fn system(message: impl Into<String>, trace_id: impl Into<String>) -> Self {
        Self::new("ERR_SYSTEM", message, trace_id)
    }

    pub fn no_device(trace_id: impl Into<String>) -> Self {
        Self::new("ERR_NO_DEVICE", "No device connected", trace_id)
    }

    pub fn device(failure: DeviceFailure, trace_id: impl Into<String>) -> Self {
        Self::new("ERR_DEVICE", failure.to_string(), trace_id)
    }

    pub fn is_no_device(&self) -> bool {
        self.code == "ERR_NO_DEVICE"
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.error, self.code)
    }
}

impl std::error::Error for AppError {}

pub fn resolve_trace_id(input: Option<String>) -> String {
    input
        .filter(|value| !value.trim().is_empty())
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string())
}

pub fn ensure_non_empty(value: &str, field: &str, trace_id: &str) -> Result<(), AppError> {
    if value.trim().is_empty() {
        return Err(AppError::validation(
            format!("{field} is required"),
            trace_id,
        ));
    }
    Ok(())
}

/// Device-side failure reported as free text on the bridge tool's output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum DeviceFailure {
    PermissionDenied,
    NoSuchFile,
    ReadOnlyFileSystem,
    DirectoryNotEmpty,
    NoSpaceLeft,
    Other(String),
}

impl fmt::Display for DeviceFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::PermissionDenied => write!(f, "Permission denied"),
            Self::NoSuchFile => write!(f, "No such file or directory"),
            Self::ReadOnlyFileSystem => write!(f, "Read-only file system"),
            Self::DirectoryNotEmpty => write!(f, "Directory not empty"),
            Self::NoSpaceLeft => write!(f, "No space left on device"),
            Self::Other(line) => write!(f, "{line}"),
        }
    }
}

const FAILURE_PHRASES: [(&str, DeviceFailure); 5] = [
    ("Permission denied", DeviceFailure::PermissionDenied),
    ("No such file", DeviceFailure::NoSuchFile),
    ("Read-only file system", DeviceFailure::ReadOnlyFileSystem),
    ("Directory not empty", DeviceFailure::DirectoryNotEmpty),
    ("No space left", DeviceFailure::NoSpaceLeft),
];

/// Scans command output for the phrases the bridge tool and the device shell
/// use to report failures. Known phrases win over a generic `error:` line.
pub fn classify_output(lines: &[String]) -> Option<DeviceFailure> {
    for (phrase, failure) in FAILURE_PHRASES.iter() {
        if lines.iter().any(|line| line.contains(phrase)) {
            return Some(failure.clone());
        }
    }
    lines
        .iter()
        .map(|line| line.trim())
        .find(|line| line.to_lowercase().contains("error:"))
        .map(|line| DeviceFailure::Other(line.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lines(raw: &[&str]) -> Vec<String> {
        raw.iter().map(|line| line.to_string()).collect()
    }

    #[test]
    fn classifies_known_phrases() {
        assert_eq!(
            classify_output(&lines(&["rm: /system/app: Permission denied"])),
            Some(DeviceFailure::PermissionDenied)
        );
        assert_eq!(
            classify_output(&lines(&["ls: /sdcard/nope: No such file or directory"])),
            Some(DeviceFailure::NoSuchFile)
        );
        assert_eq!(
            classify_output(&lines(&["mkdir: '/system/x': Read-only file system"])),
            Some(DeviceFailure::ReadOnlyFileSystem)
        );
        assert_eq!(
            classify_output(&lines(&["rmdir: Directory not empty"])),
            Some(DeviceFailure::DirectoryNotEmpty)
        );
        assert_eq!(
            classify_output(&lines(&["adb: error: write failed: No space left on device"])),
            Some(DeviceFailure::NoSpaceLeft)
        );
    }

    #[test]
    fn falls_back_to_generic_error_line() {
        let failure = classify_output(&lines(&[
            "",
            "adb: error: failed to stat remote object '/sdcard/x'",
        ]));
        assert_eq!(
            failure,
            Some(DeviceFailure::Other(
                "adb: error: failed to stat remote object '/sdcard/x'".to_string()
            ))
        );
    }

    #[test]
    fn clean_output_is_not_a_failure() {
        assert_eq!(classify_output(&lines(&["SUCCESS"])), None);
        assert_eq!(classify_output(&[]), None);
    }

    #[test]
    fn trace_id_is_minted_when_missing() {
        assert_eq!(resolve_trace_id(Some("abc".to_string())), "abc");
        assert_eq!(resolve_trace_id(Some("  ".to_string())).len(), 36);
        assert_eq!(resolve_trace_id(None).len(), 36);
    }

    #[test]
    fn ensure_non_empty_rejects_blank() {
        let err = ensure_non_empty(" ", "address", "trace-2").unwrap_err();
        assert_eq!(err.code, "ERR_VALIDATION");
        assert_eq!(err.error, "address is required");
        assert!(ensure_non_empty("x", "address", "trace-2").is_ok());
    }

    #[test]
    fn no_device_error_carries_message_and_code() {
        let err = AppError::no_device("trace-1");
        assert!(err.is_no_device());
        assert_eq!(err.error, "No device connected");
        assert_eq!(err.trace_id, "trace-1");
    }
}
