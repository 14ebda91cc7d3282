use tracing::{info, warn};

use crate::app::adb::listing::{parse_listing, parse_long_listing};
use crate::app::adb::paths::{
    access_check_command, device_parent_dir, join_device_path, listing_command, remote_shell,
    search_command, shell_quote, validate_device_path, validate_mutable_device_path,
};
use crate::app::error::{classify_output, ensure_non_empty, AppError};
use crate::app::models::{FileEntry, ListingFormat};
use crate::app::poller::DeviceSessionManager;

const ACCESS_SUCCESS: &str = "SUCCESS";
const ACCESS_FAILURE: &str = "FAILURE";

fn checked_path(path: &str, trace_id: &str) -> Result<String, AppError> {
    validate_device_path(path).map_err(|err| AppError::validation(err, trace_id))?;
    Ok(path.trim().to_string())
}

fn checked_mutable_path(path: &str, trace_id: &str) -> Result<String, AppError> {
    validate_mutable_device_path(path).map_err(|err| AppError::validation(err, trace_id))?;
    Ok(path.trim().trim_end_matches('/').to_string())
}

/// Runs `command` on the current device and turns any failure phrase in the output into `ERR_DEVICE`.
fn exec_checked(
    manager: &DeviceSessionManager,
    command: &str,
    trace_id: &str,
) -> Result<Vec<String>, AppError> {
    let output = manager.exec(command, trace_id)?;
    if let Some(failure) = classify_output(&output) {
        warn!(trace_id = %trace_id, failure = %failure, "device command failed");
        return Err(AppError::device(failure, trace_id));
    }
    Ok(output)
}

/// Unparseable lines are dropped; the listing only fails when nothing parsed
/// and the output carries a failure phrase.
fn entries_or_failure(
    entries: Vec<FileEntry>,
    output: &[String],
    trace_id: &str,
) -> Result<Vec<FileEntry>, AppError> {
    if entries.is_empty() {
        if let Some(failure) = classify_output(output) {
            warn!(trace_id = %trace_id, failure = %failure, "listing failed");
            return Err(AppError::device(failure, trace_id));
        }
    }
    Ok(entries)
}

pub fn list_dir(
    manager: &DeviceSessionManager,
    path: &str,
    format: ListingFormat,
    trace_id: &str,
) -> Result<Vec<FileEntry>, AppError> {
    let path = checked_path(path, trace_id)?;
    let output = manager.exec(&listing_command(&path, format), trace_id)?;
    let entries = parse_listing(format, &output);
    entries_or_failure(entries, &output, trace_id)
}

/// Case-insensitive name filter over the long listing of `path`.
pub fn search(
    manager: &DeviceSessionManager,
    path: &str,
    query: &str,
    trace_id: &str,
) -> Result<Vec<FileEntry>, AppError> {
    let path = checked_path(path, trace_id)?;
    ensure_non_empty(query, "query", trace_id)?;
    let output = manager.exec(&search_command(&path, query.trim()), trace_id)?;
    let entries = parse_long_listing(&output);
    entries_or_failure(entries, &output, trace_id)
}

/// Whether the device shell can enter `path`.
pub fn dir_accessible(
    manager: &DeviceSessionManager,
    path: &str,
    trace_id: &str,
) -> Result<bool, AppError> {
    let path = checked_path(path, trace_id)?;
    let output = manager.exec(&access_check_command(&path), trace_id)?;
    let refused = classify_output(&output).is_some()
        || output.iter().any(|line| line.contains(ACCESS_FAILURE));
    Ok(!refused && output.iter().any(|line| line.trim() == ACCESS_SUCCESS))
}

pub fn delete(manager: &DeviceSessionManager, path: &str, trace_id: &str) -> Result<(), AppError> {
    let path = checked_mutable_path(path, trace_id)?;
    exec_checked(
        manager,
        &remote_shell(&format!("rm -rf {}", shell_quote(&path))),
        trace_id,
    )?;
    info!(trace_id = %trace_id, path = %path, "deleted");
    Ok(())
}

pub fn mkdir(manager: &DeviceSessionManager, path: &str, trace_id: &str) -> Result<(), AppError> {
    let path = checked_mutable_path(path, trace_id)?;
    exec_checked(
        manager,
        &remote_shell(&format!("mkdir {}", shell_quote(&path))),
        trace_id,
    )?;
    info!(trace_id = %trace_id, path = %path, "directory created");
    Ok(())
}

/// Writes `content` plus a trailing newline, replacing any existing file.
pub fn create_file(
    manager: &DeviceSessionManager,
    path: &str,
    content: &str,
    trace_id: &str,
) -> Result<(), AppError> {
    let path = checked_mutable_path(path, trace_id)?;
    exec_checked(
        manager,
        &remote_shell(&format!(
            "echo {} > {}",
            shell_quote(content),
            shell_quote(&path)
        )),
        trace_id,
    )?;
    info!(trace_id = %trace_id, path = %path, bytes = content.len(), "file written");
    Ok(())
}

/// Renames `path` to `new_name` inside the same directory.
pub fn rename(
    manager: &DeviceSessionManager,
    path: &str,
    new_name: &str,
    trace_id: &str,
) -> Result<(), AppError> {
    let from = checked_mutable_path(path, trace_id)?;
    ensure_non_empty(new_name, "new_name", trace_id)?;
    let new_name = new_name.trim();
    if new_name.contains('/') || new_name == "." || new_name == ".." {
        return Err(AppError::validation(
            "new_name must be a single path segment",
            trace_id,
        ));
    }
    let to = join_device_path(&device_parent_dir(&from), new_name);
    exec_checked(
        manager,
        &remote_shell(&format!("mv {} {}", shell_quote(&from), shell_quote(&to))),
        trace_id,
    )?;
    info!(trace_id = %trace_id, from = %from, to = %to, "renamed");
    Ok(())
}

/// Copies a device file to the host. Returns the tool's output lines.
pub fn pull(
    manager: &DeviceSessionManager,
    remote: &str,
    local: &str,
    trace_id: &str,
) -> Result<Vec<String>, AppError> {
    let remote = checked_path(remote, trace_id)?;
    ensure_non_empty(local, "local_path", trace_id)?;
    let output = exec_checked(
        manager,
        &format!("pull {} {}", shell_quote(&remote), shell_quote(local.trim())),
        trace_id,
    )?;
    info!(trace_id = %trace_id, remote = %remote, local = %local.trim(), "pulled");
    Ok(output)
}

/// Copies a host file or directory to the device.
pub fn push(
    manager: &DeviceSessionManager,
    local: &str,
    remote: &str,
    trace_id: &str,
) -> Result<Vec<String>, AppError> {
    ensure_non_empty(local, "local_path", trace_id)?;
    let remote = checked_path(remote, trace_id)?;
    let output = exec_checked(
        manager,
        &format!("push {} {}", shell_quote(local.trim()), shell_quote(&remote)),
        trace_id,
    )?;
    info!(trace_id = %trace_id, local = %local.trim(), remote = %remote, "pushed");
    Ok(output)
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::Arc;

    use crate::app::config::PollingSettings;
    use crate::app::error::DeviceFailure;
    use crate::app::models::{Device, WifiState};
    use crate::app::testing::ScriptedChannel;

    fn connected(channel: &Arc<ScriptedChannel>) -> DeviceSessionManager {
        let manager = DeviceSessionManager::new(
            "adb",
            None,
            &PollingSettings::default(),
            Arc::clone(channel) as Arc<dyn crate::app::adb::runner::CommandChannel>,
        );
        manager.select_device(Device::new("R58M123", WifiState::unavailable()));
        manager
    }

    #[test]
    fn list_dir_parses_long_listing() {
        let channel = Arc::new(ScriptedChannel::default());
        channel.respond(
            "ls -l -p",
            &[
                "total 8",
                "drwxrwx--x 2 root sdcard_rw 4096 2024-05-01 10:00 Download/",
                "-rw-rw---- 1 root sdcard_rw 1536 2024-05-01 10:01 notes.txt",
            ],
        );
        let manager = connected(&channel);

        let entries = list_dir(&manager, "/sdcard", ListingFormat::LongListing, "trace")
            .expect("listing");
        assert_eq!(entries.len(), 2);
        assert!(entries[0].is_dir);
        assert_eq!(entries[0].name, "Download");
        assert_eq!(entries[1].size, "1.5 KB");
        assert!(channel.calls()[0].starts_with("adb -s R58M123 shell "));
    }

    #[test]
    fn list_dir_reports_permission_denied_when_nothing_parsed() {
        let channel = Arc::new(ScriptedChannel::default());
        channel.respond("ls -l -p", &["ls: /data: Permission denied"]);
        let manager = connected(&channel);

        let err = list_dir(&manager, "/data", ListingFormat::LongListing, "trace").unwrap_err();
        assert_eq!(err.code, "ERR_DEVICE");
        assert_eq!(err.error, DeviceFailure::PermissionDenied.to_string());
    }

    #[test]
    fn list_dir_keeps_partial_results() {
        let channel = Arc::new(ScriptedChannel::default());
        channel.respond(
            "ls -l -p",
            &[
                "ls: /sdcard/secret: Permission denied",
                "-rw-rw---- 1 root sdcard_rw 10 2024-05-01 10:01 a.txt",
            ],
        );
        let manager = connected(&channel);

        let entries = list_dir(&manager, "/sdcard", ListingFormat::LongListing, "trace")
            .expect("partial listing");
        assert_eq!(entries.len(), 1);
    }

    #[test]
    fn stat_listing_of_empty_directory_is_empty() {
        let channel = Arc::new(ScriptedChannel::default());
        channel.respond("find ", &[]);
        let manager = connected(&channel);

        let entries = list_dir(&manager, "/sdcard/Empty", ListingFormat::StatRecords, "trace")
            .expect("empty listing");
        assert!(entries.is_empty());
        assert!(channel.calls()[0].contains("-mindepth 1 -maxdepth 1"));
    }

    /// Runs device-side commands on the host through a stand-in bridge tool.
    #[cfg(target_os = "linux")]
    #[test]
    fn both_formats_list_an_empty_directory_through_a_real_shell() {
        use std::os::unix::fs::PermissionsExt;

        use crate::app::adb::runner::ProcessChannel;

        let tools = tempfile::TempDir::new().expect("tmp");
        let adb = tools.path().join("adb");
        std::fs::write(
            &adb,
            "#!/bin/sh\nexport LC_ALL=C TIME_STYLE=long-iso\nshift 2\n[ \"$1\" = shell ] && shift\nexec sh -c \"$*\"\n",
        )
        .expect("write adb");
        std::fs::set_permissions(&adb, std::fs::Permissions::from_mode(0o755)).expect("chmod");

        let manager = DeviceSessionManager::new(
            adb.to_string_lossy().to_string(),
            None,
            &PollingSettings::default(),
            Arc::new(ProcessChannel::new()),
        );
        manager.select_device(Device::new("R58M123", WifiState::unavailable()));

        let target = tempfile::TempDir::new().expect("tmp");
        let dir = target.path().to_string_lossy().to_string();
        for format in [ListingFormat::LongListing, ListingFormat::StatRecords] {
            let entries = list_dir(&manager, &dir, format, "trace").expect("empty listing");
            assert!(entries.is_empty(), "{format:?} listed {entries:?}");
        }

        std::fs::write(target.path().join("f.txt"), "x").expect("write file");
        for format in [ListingFormat::LongListing, ListingFormat::StatRecords] {
            let entries = list_dir(&manager, &dir, format, "trace").expect("listing");
            let names: Vec<&str> = entries.iter().map(|entry| entry.name.as_str()).collect();
            assert_eq!(names, vec!["f.txt"], "{format:?}");
        }
    }

    #[test]
    fn list_dir_rejects_relative_paths_without_running() {
        let channel = Arc::new(ScriptedChannel::default());
        let manager = connected(&channel);

        let err = list_dir(&manager, "sdcard/../data", ListingFormat::StatRecords, "trace")
            .unwrap_err();
        assert_eq!(err.code, "ERR_VALIDATION");
        assert!(channel.calls().is_empty());
    }

    #[test]
    fn list_dir_without_device_reports_no_device() {
        let channel = Arc::new(ScriptedChannel::default());
        let manager = DeviceSessionManager::new(
            "adb",
            None,
            &PollingSettings::default(),
            Arc::clone(&channel) as Arc<dyn crate::app::adb::runner::CommandChannel>,
        );

        let err = list_dir(&manager, "/sdcard", ListingFormat::LongListing, "trace").unwrap_err();
        assert!(err.is_no_device());
        assert!(channel.calls().is_empty());
    }

    #[test]
    fn search_filters_with_grep() {
        let channel = Arc::new(ScriptedChannel::default());
        channel.respond(
            "grep -i",
            &["-rw-rw---- 1 root sdcard_rw 2048 2024-05-01 10:01 IMG_001.jpg"],
        );
        let manager = connected(&channel);

        let entries = search(&manager, "/sdcard/DCIM", "img", "trace").expect("search");
        assert_eq!(entries[0].name, "IMG_001.jpg");
        assert!(channel.calls()[0].contains("grep -i 'img'"));
        assert_eq!(search(&manager, "/sdcard", " ", "trace").unwrap_err().code, "ERR_VALIDATION");
    }

    #[test]
    fn dir_accessible_reads_success_marker() {
        let channel = Arc::new(ScriptedChannel::default());
        channel.respond("'\\''/sdcard'\\''", &["SUCCESS"]);
        channel.respond("'\\''/data'\\''", &["/system/bin/sh: cd: /data: Permission denied", "FAILURE"]);
        let manager = connected(&channel);

        assert!(dir_accessible(&manager, "/sdcard", "trace").expect("access check"));
        assert!(!dir_accessible(&manager, "/data", "trace").expect("access check"));
    }

    #[test]
    fn delete_refuses_root() {
        let channel = Arc::new(ScriptedChannel::default());
        let manager = connected(&channel);

        assert_eq!(delete(&manager, "/", "trace").unwrap_err().code, "ERR_VALIDATION");
        assert!(channel.calls().is_empty());
    }

    #[test]
    fn delete_classifies_read_only_failure() {
        let channel = Arc::new(ScriptedChannel::default());
        channel.respond("rm -rf", &["rm: /system/app: Read-only file system"]);
        let manager = connected(&channel);

        let err = delete(&manager, "/system/app", "trace").unwrap_err();
        assert_eq!(err.error, DeviceFailure::ReadOnlyFileSystem.to_string());
    }

    #[test]
    fn mutations_quote_paths_for_the_device_shell() {
        let channel = Arc::new(ScriptedChannel::default());
        let manager = connected(&channel);

        mkdir(&manager, "/sdcard/New Folder", "trace").expect("mkdir");
        create_file(&manager, "/sdcard/a.txt", "hello", "trace").expect("create");
        rename(&manager, "/sdcard/a.txt", "b.txt", "trace").expect("rename");

        let calls = channel.calls();
        assert_eq!(calls.len(), 3);
        assert!(calls[0].contains("mkdir '\\''/sdcard/New Folder'\\''"));
        assert!(calls[1].contains("echo '\\''hello'\\'' > '\\''/sdcard/a.txt'\\''"));
        assert!(calls[2].contains("mv '\\''/sdcard/a.txt'\\'' '\\''/sdcard/b.txt'\\''"));
    }

    #[test]
    fn rename_stays_in_the_parent_directory() {
        let channel = Arc::new(ScriptedChannel::default());
        let manager = connected(&channel);

        rename(&manager, "/sdcard/Download/old dir/", "new dir", "trace").expect("rename");
        assert!(channel.calls()[0]
            .contains("mv '\\''/sdcard/Download/old dir'\\'' '\\''/sdcard/Download/new dir'\\''"));

        rename(&manager, "/top.txt", "renamed.txt", "trace").expect("rename at root");
        assert!(channel.calls()[1].contains("'\\''/renamed.txt'\\''"));

        for bad in ["", "a/b", ".."] {
            let err = rename(&manager, "/sdcard/a.txt", bad, "trace").unwrap_err();
            assert_eq!(err.code, "ERR_VALIDATION", "{bad:?}");
        }
        assert_eq!(channel.calls().len(), 2);
    }

    #[test]
    fn transfers_surface_tool_errors() {
        let channel = Arc::new(ScriptedChannel::default());
        channel.respond("pull", &["adb: error: failed to stat remote object '/sdcard/x'"]);
        channel.respond("push", &["/tmp/a.txt: 1 file pushed, 0 skipped."]);
        let manager = connected(&channel);

        let err = pull(&manager, "/sdcard/x", "/tmp/x", "trace").unwrap_err();
        assert_eq!(err.code, "ERR_DEVICE");
        let output = push(&manager, "/tmp/a.txt", "/sdcard/", "trace").expect("push");
        assert_eq!(output.len(), 1);
        assert_eq!(
            channel.calls()[1],
            "adb -s R58M123 push '/tmp/a.txt' '/sdcard/'"
        );
    }
}
