use crate::app::models::ListingFormat;

/// `stat -c` format producing `|`-delimited listing records.
pub const STAT_RECORD_FORMAT: &str = "%F|%A|%h|%U|%G|%s|%Y|%n|%N";

pub fn validate_device_path(path: &str) -> Result<(), String> {
    let trimmed = path.trim();
    if trimmed.is_empty() {
        return Err("device_path is required".to_string());
    }
    if !trimmed.starts_with('/') {
        return Err("device_path must be an absolute device path starting with '/'".to_string());
    }
    if trimmed.contains('\0') {
        return Err("device_path contains invalid characters".to_string());
    }
    for segment in trimmed.split('/') {
        if segment == ".." {
            return Err("device_path must not contain '..' segments".to_string());
        }
    }
    Ok(())
}

/// Stricter check for paths that get modified or deleted.
pub fn validate_mutable_device_path(path: &str) -> Result<(), String> {
    validate_device_path(path)?;
    if path.trim().trim_end_matches('/').is_empty() {
        return Err("device_path must not be root".to_string());
    }
    Ok(())
}

pub fn device_parent_dir(device_path: &str) -> String {
    let trimmed = device_path.trim();
    if trimmed.is_empty() || trimmed == "/" {
        return "/".to_string();
    }
    let mut path = trimmed.trim_end_matches('/').to_string();
    if path.is_empty() {
        return "/".to_string();
    }
    match path.rfind('/') {
        Some(0) | None => "/".to_string(),
        Some(index) => {
            path.truncate(index);
            path
        }
    }
}

pub fn join_device_path(dir: &str, name: &str) -> String {
    let dir = dir.trim().trim_end_matches('/');
    let name = name.trim().trim_start_matches('/');
    format!("{dir}/{name}")
}

/// Single-quotes `value` for a POSIX shell.
pub fn shell_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', "'\\''"))
}

/// `shell <cmd>` with the device-side command passed as one host-shell word.
pub fn remote_shell(device_command: &str) -> String {
    format!("shell {}", shell_quote(device_command))
}

pub fn listing_command(path: &str, format: ListingFormat) -> String {
    let dir = listing_dir(path);
    match format {
        ListingFormat::LongListing => {
            format!("{} | sort", remote_shell(&format!("ls -l -p {}", shell_quote(&dir))))
        }
        // `find` prints nothing for an empty directory where an unmatched glob would
        // error. The trailing slash makes it descend into a symlinked directory.
        ListingFormat::StatRecords => remote_shell(&format!(
            "find {} -mindepth 1 -maxdepth 1 -exec stat -c {} {{}} +",
            shell_quote(&format!("{}/", dir.trim_end_matches('/'))),
            shell_quote(STAT_RECORD_FORMAT)
        )),
    }
}

pub fn search_command(path: &str, query: &str) -> String {
    format!(
        "{} | grep -i {} | sort",
        remote_shell(&format!("ls -l -p {}", shell_quote(&listing_dir(path)))),
        shell_quote(query)
    )
}

pub fn access_check_command(path: &str) -> String {
    remote_shell(&format!(
        "cd {} && echo SUCCESS || echo FAILURE",
        shell_quote(&listing_dir(path))
    ))
}

fn listing_dir(path: &str) -> String {
    let trimmed = path.trim();
    if trimmed.is_empty() {
        return "/".to_string();
    }
    if trimmed.starts_with('/') {
        trimmed.to_string()
    } else {
        format!("/{trimmed}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validate_device_path_requires_absolute() {
        assert!(validate_device_path("").is_err());
        assert!(validate_device_path("sdcard/file.txt").is_err());
        assert!(validate_device_path("/").is_ok());
        assert!(validate_device_path("/sdcard/file.txt").is_ok());
    }

    #[test]
    fn validate_device_path_blocks_dotdot() {
        assert!(validate_device_path("/sdcard/../etc/passwd").is_err());
        assert!(validate_device_path("/sdcard/..").is_err());
        assert!(validate_device_path("/sdcard/a/../b").is_err());
    }

    #[test]
    fn mutable_paths_exclude_root() {
        assert!(validate_mutable_device_path("/").is_err());
        assert!(validate_mutable_device_path("//").is_err());
        assert!(validate_mutable_device_path("/sdcard/tmp").is_ok());
    }

    #[test]
    fn device_parent_dir_handles_common_cases() {
        assert_eq!(device_parent_dir("/sdcard/Download/file.txt"), "/sdcard/Download");
        assert_eq!(device_parent_dir("/sdcard/Download/"), "/sdcard");
        assert_eq!(device_parent_dir("/file.txt"), "/");
        assert_eq!(device_parent_dir("/"), "/");
        assert_eq!(device_parent_dir(""), "/");
    }

    #[test]
    fn joins_paths_without_doubled_separators() {
        assert_eq!(join_device_path("/sdcard/", "a.txt"), "/sdcard/a.txt");
        assert_eq!(join_device_path("/", "sdcard"), "/sdcard");
        assert_eq!(join_device_path("/sdcard", "/b"), "/sdcard/b");
    }

    #[test]
    fn quotes_embedded_single_quotes() {
        assert_eq!(shell_quote("it's"), "'it'\\''s'");
        assert_eq!(remote_shell("ls /"), "shell 'ls /'");
    }

    #[test]
    fn builds_listing_commands() {
        assert_eq!(
            listing_command("/sdcard", ListingFormat::LongListing),
            "shell 'ls -l -p '\\''/sdcard'\\''' | sort"
        );
        let stat = listing_command("/sdcard/", ListingFormat::StatRecords);
        assert!(stat.starts_with("shell 'find "));
        assert!(stat.contains("-mindepth 1 -maxdepth 1 -exec stat -c"));
        assert!(stat.contains("%F|%A|%h|%U|%G|%s|%Y|%n|%N"));
        assert!(!stat.contains("/*"));
    }

    #[test]
    fn builds_access_check_and_search_commands() {
        assert!(access_check_command("/data").contains("echo SUCCESS || echo FAILURE"));
        let search = search_command("/sdcard", "img");
        assert!(search.ends_with("| grep -i 'img' | sort"));
    }
}
