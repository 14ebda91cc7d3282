use std::path::{Path, PathBuf};

use crate::app::config::AdbSettings;

pub fn normalize_command_path(value: &str) -> String {
    let trimmed = value.trim();
    if let Some(inner) = trimmed
        .strip_prefix('"')
        .and_then(|candidate| candidate.strip_suffix('"'))
    {
        return inner.trim().to_string();
    }
    if let Some(inner) = trimmed
        .strip_prefix('\'')
        .and_then(|candidate| candidate.strip_suffix('\''))
    {
        return inner.trim().to_string();
    }
    trimmed.to_string()
}

pub fn resolve_adb_program(config_command_path: &str) -> String {
    let normalized = normalize_command_path(config_command_path);
    if normalized.is_empty() {
        "adb".to_string()
    } else {
        normalized
    }
}

pub fn validate_adb_program(program: &str) -> Result<(), String> {
    if program.trim().is_empty() {
        return Err("ADB command is empty".to_string());
    }
    if program == "adb" {
        return Ok(());
    }
    let path = Path::new(program);
    if path.is_dir() {
        return Err("ADB path must point to an executable file".to_string());
    }
    if !path.exists() {
        return Err("ADB executable not found at the configured path".to_string());
    }
    Ok(())
}

/// Configured SDK home first, then `ANDROID_HOME`, then `ANDROID_SDK_ROOT`.
pub fn resolve_sdk_home(settings: &AdbSettings) -> Option<PathBuf> {
    let configured = normalize_command_path(&settings.sdk_home);
    if !configured.is_empty() {
        return Some(PathBuf::from(configured));
    }
    ["ANDROID_HOME", "ANDROID_SDK_ROOT"]
        .iter()
        .filter_map(|name| std::env::var(name).ok())
        .map(|value| normalize_command_path(&value))
        .find(|value| !value.is_empty())
        .map(PathBuf::from)
}

pub fn emulator_program(sdk_home: &Path) -> PathBuf {
    let name = if cfg!(windows) { "emulator.exe" } else { "emulator" };
    sdk_home.join("emulator").join(name)
}

/// Quotes a program path for the host shell when it contains whitespace.
pub fn quote_program(program: &str) -> String {
    if program.chars().any(char::is_whitespace) {
        format!("\"{program}\"")
    } else {
        program.to_string()
    }
}
