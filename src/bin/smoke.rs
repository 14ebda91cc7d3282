use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use adb_file_manager_lib::app::adb::locator::{
    quote_program, resolve_adb_program, validate_adb_program,
};
use adb_file_manager_lib::app::adb::runner::{CommandChannel, ProcessChannel};
use adb_file_manager_lib::app::config::load_config;
use adb_file_manager_lib::app::files::{dir_accessible, list_dir};
use adb_file_manager_lib::app::logging::init_logging;
use adb_file_manager_lib::app::models::{Device, ListingFormat};
use adb_file_manager_lib::app::poller::DeviceSessionManager;
use serde::Serialize;
use uuid::Uuid;

#[derive(Debug, Clone)]
struct Args {
    serial: Option<String>,
    out_dir: Option<PathBuf>,
    path: String,
    format: ListingFormat,
    json: bool,
    with_avds: bool,
    watch_secs: u64,
}

#[derive(Serialize)]
struct SmokeSummary {
    tool: &'static str,
    status: &'static str,
    trace_id: String,
    serial: Option<String>,
    adb_program: Option<String>,
    out_dir: String,
    artifacts: HashMap<String, String>,
    checks: Vec<SmokeCheck>,
}

#[derive(Serialize)]
struct SmokeCheck {
    name: &'static str,
    status: &'static str, // pass|fail|warn|skip
    duration_ms: u128,
    artifacts: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error_code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl SmokeCheck {
    fn skipped(name: &'static str) -> Self {
        Self {
            name,
            status: "skip",
            duration_ms: 0,
            artifacts: vec![],
            error_code: None,
            error: None,
        }
    }
}

type CheckResult = Result<(Vec<String>, Option<String>), (String, String)>;

fn parse_args() -> Result<Args, String> {
    let mut serial = std::env::var("ANDROID_SERIAL")
        .ok()
        .filter(|s| !s.trim().is_empty());
    let mut out_dir: Option<PathBuf> = None;
    let mut path = "/sdcard".to_string();
    let mut format = ListingFormat::LongListing;
    let mut json = false;
    let mut with_avds = false;
    let mut watch_secs = 0u64;

    let mut it = std::env::args().skip(1);
    while let Some(arg) = it.next() {
        match arg.as_str() {
            "--serial" => {
                serial = it
                    .next()
                    .map(|v| v.trim().to_string())
                    .filter(|v| !v.is_empty());
                if serial.is_none() {
                    return Err("--serial requires a value".to_string());
                }
            }
            "--out" => {
                let value = it
                    .next()
                    .ok_or_else(|| "--out requires a value".to_string())?;
                out_dir = Some(PathBuf::from(value));
            }
            "--path" => {
                path = it
                    .next()
                    .ok_or_else(|| "--path requires a value".to_string())?;
            }
            "--format" => {
                let value = it
                    .next()
                    .ok_or_else(|| "--format requires a value".to_string())?;
                format = match value.as_str() {
                    "ls" | "long" => ListingFormat::LongListing,
                    "stat" => ListingFormat::StatRecords,
                    other => return Err(format!("Unknown listing format: {other}")),
                };
            }
            "--json" => {
                json = true;
            }
            "--with-avds" => {
                with_avds = true;
            }
            "--watch" => {
                let value = it
                    .next()
                    .ok_or_else(|| "--watch requires a value".to_string())?;
                watch_secs = value
                    .parse()
                    .map_err(|_| format!("--watch expects seconds, got {value}"))?;
            }
            "-h" | "--help" => {
                return Err(
                    "Usage: cargo run --bin smoke -- [--serial SERIAL] [--out DIR] [--path /sdcard] [--format ls|stat] [--json] [--with-avds] [--watch SECS]\n"
                        .to_string(),
                );
            }
            other => return Err(format!("Unknown arg: {other}")),
        }
    }

    Ok(Args {
        serial,
        out_dir,
        path,
        format,
        json,
        with_avds,
        watch_secs,
    })
}

fn ensure_dir(path: &Path) -> Result<(), String> {
    fs::create_dir_all(path)
        .map_err(|err| format!("Failed to create dir {}: {err}", path.display()))
}

fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<String, (String, String)> {
    let body = serde_json::to_string_pretty(value)
        .map_err(|err| ("ERR_IO".to_string(), format!("Failed to serialize: {err}")))?;
    fs::write(path, body).map_err(|err| {
        (
            "ERR_IO".to_string(),
            format!("Failed to write {}: {err}", path.display()),
        )
    })?;
    Ok(path.to_string_lossy().to_string())
}

/// With no serial the only online device is used; several is an error.
fn pick_device(devices: &[Device], serial: Option<&str>) -> Result<Device, String> {
    if let Some(serial) = serial {
        return devices
            .iter()
            .find(|device| device.device_id == serial)
            .cloned()
            .ok_or_else(|| format!("Device {serial} is not online."));
    }
    match devices {
        [] => Err("No online adb devices found.".to_string()),
        [device] => Ok(device.clone()),
        _ => {
            let serials = devices
                .iter()
                .map(|d| d.device_id.as_str())
                .collect::<Vec<_>>()
                .join(", ");
            Err(format!(
                "Multiple online devices found ({serials}). Set ANDROID_SERIAL or pass --serial."
            ))
        }
    }
}

/// `fail` marks a failed check fatal for the run; otherwise failures are warnings.
fn run_check<F>(checks: &mut Vec<SmokeCheck>, name: &'static str, fail: bool, f: F) -> bool
where
    F: FnOnce() -> CheckResult,
{
    let start = Instant::now();
    let (status, artifacts, error_code, error, ok) = match f() {
        Ok((artifacts, warning)) => {
            let status = if warning.is_some() { "warn" } else { "pass" };
            let code = warning.as_ref().map(|_| "WARN".to_string());
            (status, artifacts, code, warning, true)
        }
        Err((code, err)) => {
            let status = if fail { "fail" } else { "warn" };
            (status, vec![], Some(code), Some(err), !fail)
        }
    };
    checks.push(SmokeCheck {
        name,
        status,
        duration_ms: start.elapsed().as_millis(),
        artifacts,
        error_code,
        error,
    });
    ok
}

fn finish(summary: SmokeSummary, json: bool) -> ! {
    let output = if json {
        serde_json::to_string_pretty(&summary).unwrap_or_else(|_| "{}".to_string())
    } else {
        let mut text = format!(
            "status: {}\ntrace_id: {}\nout: {}\n",
            summary.status, summary.trace_id, summary.out_dir
        );
        for check in &summary.checks {
            text.push_str(&format!(
                "  {:<16} {:<5} {}ms{}\n",
                check.name,
                check.status,
                check.duration_ms,
                check
                    .error
                    .as_ref()
                    .map(|err| format!(" ({err})"))
                    .unwrap_or_default()
            ));
        }
        text
    };
    println!("{output}");
    std::process::exit(if summary.status == "pass" { 0 } else { 1 });
}

fn main() {
    let args = match parse_args() {
        Ok(v) => v,
        Err(msg) => {
            eprintln!("{msg}");
            std::process::exit(2);
        }
    };

    let trace_id = Uuid::new_v4().to_string();

    let out_dir = args.out_dir.clone().unwrap_or_else(|| {
        let mut p = std::env::temp_dir();
        p.push(format!("adb_file_manager_smoke_{trace_id}"));
        p
    });
    if let Err(err) = ensure_dir(&out_dir) {
        eprintln!("{err}");
        std::process::exit(1);
    }

    let mut artifacts: HashMap<String, String> = HashMap::new();
    let mut checks: Vec<SmokeCheck> = Vec::new();
    let mut status = "pass";

    let config = match load_config(&trace_id) {
        Ok(cfg) => cfg,
        Err(err) => {
            checks.push(SmokeCheck {
                name: "load_config",
                status: "fail",
                duration_ms: 0,
                artifacts: vec![],
                error_code: Some(err.code.clone()),
                error: Some(err.error.clone()),
            });
            finish(
                SmokeSummary {
                    tool: "adb_file_manager_smoke",
                    status: "fail",
                    trace_id,
                    serial: args.serial,
                    adb_program: None,
                    out_dir: out_dir.to_string_lossy().to_string(),
                    artifacts,
                    checks,
                },
                args.json,
            );
        }
    };
    init_logging(&config.logging.level);
    let adb_program = resolve_adb_program(&config.adb.command_path);

    if !run_check(&mut checks, "check_adb", true, || {
        validate_adb_program(&adb_program).map_err(|err| ("ERR_VALIDATION".to_string(), err))?;
        let channel = ProcessChannel::with_timeout(Some(Duration::from_secs(10)));
        let output = channel
            .run(&format!("{} version", quote_program(&adb_program)), &trace_id)
            .map_err(|err| (err.code, err.error))?;
        if !output.iter().any(|line| line.contains("Android Debug Bridge")) {
            return Err((
                "ERR_DEPENDENCY".to_string(),
                format!("Unexpected adb version output: {}", output.join(" ")),
            ));
        }
        Ok((vec![], None))
    }) {
        status = "fail";
    }

    let manager = DeviceSessionManager::from_config(&config);

    let mut devices = Vec::new();
    if !run_check(&mut checks, "poll_devices", true, || {
        devices = manager
            .poll_once(&trace_id)
            .map_err(|err| (err.code, err.error))?;
        let path = write_json(&out_dir.join("devices.json"), &devices)?;
        artifacts.insert("devices".to_string(), path.clone());
        Ok((vec![path], None))
    }) {
        status = "fail";
    }

    let mut selected: Option<Device> = None;
    if !run_check(&mut checks, "select_device", true, || {
        let device = pick_device(&devices, args.serial.as_deref())
            .map_err(|err| ("ERR_PICK_DEVICE".to_string(), err))?;
        manager.select_device(device.clone());
        selected = Some(device);
        Ok((vec![], None))
    }) {
        status = "fail";
    }

    if selected.is_some() {
        if !run_check(&mut checks, "dir_accessible", true, || {
            let accessible = dir_accessible(&manager, &args.path, &trace_id)
                .map_err(|err| (err.code, err.error))?;
            if accessible {
                Ok((vec![], None))
            } else {
                Err((
                    "ERR_DEVICE".to_string(),
                    format!("{} is not accessible on the device", args.path),
                ))
            }
        }) {
            status = "fail";
        }

        if !run_check(&mut checks, "list_dir", true, || {
            let entries = list_dir(&manager, &args.path, args.format, &trace_id)
                .map_err(|err| (err.code, err.error))?;
            let path = write_json(&out_dir.join("listing.json"), &entries)?;
            artifacts.insert("listing".to_string(), path.clone());
            let warning = entries
                .is_empty()
                .then(|| format!("{} listed no entries", args.path));
            Ok((vec![path], warning))
        }) {
            status = "fail";
        }
    } else {
        checks.push(SmokeCheck::skipped("dir_accessible"));
        checks.push(SmokeCheck::skipped("list_dir"));
    }

    if args.with_avds {
        run_check(&mut checks, "list_avds", false, || {
            let avds = manager.list_avds(&trace_id);
            let path = write_json(&out_dir.join("avds.json"), &avds)?;
            artifacts.insert("avds".to_string(), path.clone());
            let warning = avds
                .is_empty()
                .then(|| "No AVDs found (SDK home unresolved or none installed).".to_string());
            Ok((vec![path], warning))
        });
    } else {
        checks.push(SmokeCheck::skipped("list_avds"));
    }

    if args.watch_secs > 0 {
        run_check(&mut checks, "watch_devices", false, || {
            let subscription = manager.subscribe(&trace_id);
            let deadline = Instant::now() + Duration::from_secs(args.watch_secs);
            let mut snapshots = Vec::new();
            while let Some(remaining) = deadline.checked_duration_since(Instant::now()) {
                if let Some(devices) = subscription.recv_timeout(remaining) {
                    snapshots.push(devices);
                }
            }
            subscription.stop();
            let path = write_json(&out_dir.join("watch.json"), &snapshots)?;
            artifacts.insert("watch".to_string(), path.clone());
            let warning = snapshots
                .is_empty()
                .then(|| "No device lists published while watching.".to_string());
            Ok((vec![path], warning))
        });
    } else {
        checks.push(SmokeCheck::skipped("watch_devices"));
    }

    finish(
        SmokeSummary {
            tool: "adb_file_manager_smoke",
            status,
            trace_id,
            serial: selected.map(|device| device.device_id),
            adb_program: Some(adb_program),
            out_dir: out_dir.to_string_lossy().to_string(),
            artifacts,
            checks,
        },
        args.json,
    );
}
