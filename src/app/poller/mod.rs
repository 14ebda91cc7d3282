use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::app::adb::locator::{emulator_program, quote_program, resolve_adb_program, resolve_sdk_home};
use crate::app::adb::parse::{
    is_connect_success, is_pair_success, parse_device_ids, parse_wlan_route,
    wifi_state_from_device_id,
};
use crate::app::adb::runner::{CommandChannel, LineStream, ProcessChannel};
use crate::app::config::{AppConfig, PollingSettings};
use crate::app::error::{ensure_non_empty, AppError};
use crate::app::models::{AndroidVirtualDevice, Device, WifiState};
use crate::app::session::SessionContext;


pub const DEFAULT_TCP_PORT: &str = "5555";

pub type DeviceEmitter = Arc<dyn Fn(Vec<Device>) + Send + Sync>;

/// Delay between poll cycles. Idle polling sits at the cap; an invalidation
/// drops it to the fast delay, from where it climbs back geometrically.
#[derive(Debug, Clone, PartialEq)]
pub struct PollBackoff {
    current: Duration,
    fast: Duration,
    max: Duration,
    growth: f64,
}

impl PollBackoff {
    pub fn new(settings: &PollingSettings) -> Self {
        Self {
            current: settings.max_delay(),
            fast: settings.fast_delay(),
            max: settings.max_delay(),
            growth: settings.growth_factor,
        }
    }

    pub fn current(&self) -> Duration {
        self.current
    }

    pub fn grow(&mut self) -> Duration {
        self.current = self.current.mul_f64(self.growth).min(self.max);
        self.current
    }

    pub fn reset_fast(&mut self) {
        self.current = self.fast;
    }
}

impl Default for PollBackoff {
    fn default() -> Self {
        Self::new(&PollingSettings::default())
    }
}

struct PaceState {
    backoff: PollBackoff,
    pending: bool,
}

/// Poll delay and the pending-invalidation flag under one lock, so a reset is
/// never overtaken by the growth step of a wait that just timed out.
struct Pacer {
    state: Mutex<PaceState>,
    cv: Condvar,
}

impl Pacer {
    fn new(backoff: PollBackoff) -> Self {
        Self {
            state: Mutex::new(PaceState {
                backoff,
                pending: false,
            }),
            cv: Condvar::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, PaceState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn delay(&self) -> Duration {
        self.lock().backoff.current()
    }

    fn invalidate(&self) {
        let mut state = self.lock();
        state.backoff.reset_fast();
        state.pending = true;
        self.cv.notify_all();
    }

    fn clear_pending(&self) {
        self.lock().pending = false;
    }

    /// Wakes waiters without counting as an invalidation.
    fn wake(&self) {
        let _state = self.lock();
        self.cv.notify_all();
    }

    /// Sleeps for the current delay. True when cut short by an invalidation;
    /// the delay grows only when the full delay elapsed.
    fn wait(&self, stop_flag: &AtomicBool) -> bool {
        let state = self.lock();
        let delay = state.backoff.current();
        let (mut state, _) = self
            .cv
            .wait_timeout_while(state, delay, |state| {
                !state.pending && !stop_flag.load(Ordering::Relaxed)
            })
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if state.pending {
            state.pending = false;
            return true;
        }
        if !stop_flag.load(Ordering::Relaxed) {
            state.backoff.grow();
        }
        false
    }
}

struct PollerHandle {
    stop_flag: Arc<AtomicBool>,
    pacer: Arc<Pacer>,
    join: Mutex<Option<JoinHandle<()>>>,
}

impl PollerHandle {
    fn stop(&self) {
        self.stop_flag.store(true, Ordering::Relaxed);
        self.pacer.wake();
        let join = match self.join.lock() {
            Ok(mut guard) => guard.take(),
            Err(_) => None,
        };
        if let Some(join) = join {
            // Stopping from inside the emitter runs on the poll thread itself.
            if join.thread().id() != thread::current().id() {
                let _ = join.join();
            }
        }
    }

    fn is_running(&self) -> bool {
        if self.stop_flag.load(Ordering::Relaxed) {
            return false;
        }
        match self.join.lock() {
            Ok(guard) => guard.as_ref().map(|join| !join.is_finished()).unwrap_or(false),
            Err(_) => false,
        }
    }
}

struct SessionCore {
    adb_program: String,
    sdk_home: Option<PathBuf>,
    channel: Arc<dyn CommandChannel>,
    session: SessionContext,
    pacer: Arc<Pacer>,
    auto_select: bool,
}

impl SessionCore {
    fn host_command(&self, command: &str) -> String {
        format!("{} {}", quote_program(&self.adb_program), command.trim())
    }

    fn device_command(&self, device_id: &str, command: &str) -> String {
        format!(
            "{} -s {} {}",
            quote_program(&self.adb_program),
            device_id,
            command.trim()
        )
    }

    fn devices(&self, trace_id: &str) -> Result<Vec<String>, AppError> {
        let output = self.channel.run(&self.host_command("devices"), trace_id)?;
        Ok(parse_device_ids(&output))
    }

    fn wifi_state(&self, device_id: &str, trace_id: &str) -> Result<WifiState, AppError> {
        if let Some(state) = wifi_state_from_device_id(device_id) {
            return Ok(state);
        }
        let output = self
            .channel
            .run(&self.device_command(device_id, "shell ip route"), trace_id)?;
        Ok(parse_wlan_route(device_id, &output))
    }

    fn poll_once(&self, trace_id: &str) -> Result<Vec<Device>, AppError> {
        let devices = self
            .devices(trace_id)?
            .into_iter()
            .map(|device_id| {
                let wifi_state = self.wifi_state(&device_id, trace_id).unwrap_or_else(|err| {
                    warn!(
                        trace_id = %trace_id,
                        device_id = %device_id,
                        error = %err,
                        "wifi lookup failed"
                    );
                    WifiState::unavailable()
                });
                Device::new(device_id, wifi_state)
            })
            .collect::<Vec<_>>();
        self.session.reconcile(&devices, self.auto_select);
        Ok(devices)
    }

    fn invalidate(&self) {
        self.pacer.invalidate();
    }
}

/// Owns the live device list, the current-device slot, and routes ad-hoc
/// commands to the selected device.
pub struct DeviceSessionManager {
    core: Arc<SessionCore>,
    poller: Mutex<Option<Arc<PollerHandle>>>,
}

impl DeviceSessionManager {
    pub fn new(
        adb_program: impl Into<String>,
        sdk_home: Option<PathBuf>,
        polling: &PollingSettings,
        channel: Arc<dyn CommandChannel>,
    ) -> Self {
        Self {
            core: Arc::new(SessionCore {
                adb_program: adb_program.into(),
                sdk_home,
                channel,
                session: SessionContext::new(),
                pacer: Arc::new(Pacer::new(PollBackoff::new(polling))),
                auto_select: polling.auto_select,
            }),
            poller: Mutex::new(None),
        }
    }

    pub fn from_config(config: &AppConfig) -> Self {
        Self::new(
            resolve_adb_program(&config.adb.command_path),
            resolve_sdk_home(&config.adb),
            &config.polling,
            Arc::new(ProcessChannel::with_timeout(config.command_timeout())),
        )
    }

    pub fn session(&self) -> &SessionContext {
        &self.core.session
    }

    pub fn current_device(&self) -> Option<Device> {
        self.core.session.current()
    }

    pub fn select_device(&self, device: Device) {
        info!(device_id = %device.device_id, "device selected");
        self.core.session.select(device);
    }

    pub fn disconnect(&self) {
        info!("device deselected");
        self.core.session.clear();
    }

    pub fn poll_delay(&self) -> Duration {
        self.core.pacer.delay()
    }

    pub fn devices(&self, trace_id: &str) -> Result<Vec<String>, AppError> {
        self.core.devices(trace_id)
    }

    pub fn wifi_state(&self, device_id: &str, trace_id: &str) -> Result<WifiState, AppError> {
        self.core.wifi_state(device_id, trace_id)
    }

    /// One enumeration pass, also folded into the current-device slot.
    pub fn poll_once(&self, trace_id: &str) -> Result<Vec<Device>, AppError> {
        self.core.poll_once(trace_id)
    }

    /// Starts the poll loop, replacing any loop that is already running.
    pub fn start_polling(&self, emitter: DeviceEmitter, trace_id: &str) {
        self.start(emitter, trace_id);
    }

    /// Starts (or restarts) polling and hands back the device lists as they are published.
    pub fn subscribe(&self, trace_id: &str) -> DeviceSubscription {
        let (sender, receiver) = mpsc::channel::<Vec<Device>>();
        let sender = Mutex::new(sender);
        let emitter: DeviceEmitter = Arc::new(move |devices| {
            if let Ok(sender) = sender.lock() {
                let _ = sender.send(devices);
            }
        });
        let handle = self.start(emitter, trace_id);
        DeviceSubscription { receiver, handle }
    }

    pub fn stop_polling(&self) {
        let handle = match self.poller.lock() {
            Ok(mut guard) => guard.take(),
            Err(_) => None,
        };
        if let Some(handle) = handle {
            handle.stop();
        }
    }

    pub fn is_polling(&self) -> bool {
        match self.poller.lock() {
            Ok(guard) => guard.as_ref().map(|handle| handle.is_running()).unwrap_or(false),
            Err(_) => false,
        }
    }

    /// Forces a poll cycle now and switches to fast polling.
    pub fn invalidate(&self) {
        debug!("device poll invalidated");
        self.core.invalidate();
    }

    /// Runs `command` against the current device, e.g. `shell ls /sdcard`.
    pub fn exec(&self, command: &str, trace_id: &str) -> Result<Vec<String>, AppError> {
        let Some(device) = self.core.session.current() else {
            warn!(trace_id = %trace_id, "exec requested with no device selected");
            return Err(AppError::no_device(trace_id));
        };
        let result = self
            .core
            .channel
            .run(&self.core.device_command(&device.device_id, command), trace_id);
        self.invalidate();
        result
    }

    pub fn exec_stream(&self, command: &str, trace_id: &str) -> Result<LineStream, AppError> {
        let Some(device) = self.core.session.current() else {
            warn!(trace_id = %trace_id, "stream requested with no device selected");
            return Err(AppError::no_device(trace_id));
        };
        let stream = self
            .core
            .channel
            .stream(&self.core.device_command(&device.device_id, command), trace_id);
        self.invalidate();
        stream
    }

    /// Bridge-tool command that does not target a device, e.g. `connect`.
    pub fn run_host(&self, command: &str, trace_id: &str) -> Result<Vec<String>, AppError> {
        let result = self.core.channel.run(&self.core.host_command(command), trace_id);
        self.invalidate();
        result
    }

    /// Does not wait for the device to appear; the next poll cycles report the real state.
    pub fn connect(&self, ip: &str, port: &str, trace_id: &str) -> Result<WifiState, AppError> {
        ensure_non_empty(ip, "ip", trace_id)?;
        ensure_non_empty(port, "port", trace_id)?;
        let (ip, port) = (ip.trim(), port.trim());

        let output = self.run_host(&format!("connect {ip}:{port}"), trace_id)?;
        if is_connect_success(&output) {
            info!(trace_id = %trace_id, address = %format!("{ip}:{port}"), "adb connect issued");
        } else {
            warn!(
                trace_id = %trace_id,
                address = %format!("{ip}:{port}"),
                output = %output.join(" | "),
                "adb connect reported no connection"
            );
        }
        Ok(WifiState {
            connected: false,
            ip_address: Some(ip.to_string()),
            port: Some(port.to_string()),
        })
    }

    pub fn pair(&self, ip: &str, port: &str, code: &str, trace_id: &str) -> Result<Vec<String>, AppError> {
        ensure_non_empty(ip, "ip", trace_id)?;
        ensure_non_empty(port, "port", trace_id)?;
        ensure_non_empty(code, "pairing_code", trace_id)?;
        self.run_host(
            &format!("pair {}:{} {}", ip.trim(), port.trim(), code.trim()),
            trace_id,
        )
    }

    /// Pairs first when a pairing port and code are given, then connects.
    /// An empty `port` means the default adb TCP port.
    pub fn pair_and_connect(
        &self,
        ip: &str,
        port: &str,
        pairing_port: &str,
        pairing_code: &str,
        trace_id: &str,
    ) -> Result<WifiState, AppError> {
        let port = if port.trim().is_empty() {
            DEFAULT_TCP_PORT
        } else {
            port.trim()
        };
        if !pairing_port.trim().is_empty() && !pairing_code.trim().is_empty() {
            let output = self.pair(ip, pairing_port, pairing_code, trace_id)?;
            if !is_pair_success(&output) {
                let detail = output.join(" ");
                return Err(AppError::dependency(
                    format!("adb pair failed: {}", detail.trim()),
                    trace_id,
                ));
            }
        }
        self.connect(ip, port, trace_id)
    }

    /// Best effort: any failure yields an empty list.
    pub fn list_avds(&self, trace_id: &str) -> Vec<AndroidVirtualDevice> {
        let Some(sdk_home) = self.core.sdk_home.as_ref() else {
            debug!(trace_id = %trace_id, "no SDK home; skipping AVD listing");
            return Vec::new();
        };
        let program = emulator_program(sdk_home);
        let command = format!("{} -list-avds", quote_program(&program.to_string_lossy()));
        match self.core.channel.run(&command, trace_id) {
            Ok(output) => output
                .iter()
                .map(|line| line.trim())
                .filter(|line| !line.is_empty() && !line.contains(char::is_whitespace))
                .map(|name| AndroidVirtualDevice {
                    name: name.to_string(),
                })
                .collect(),
            Err(err) => {
                warn!(trace_id = %trace_id, error = %err, "failed to list AVDs");
                Vec::new()
            }
        }
    }

    fn start(&self, emitter: DeviceEmitter, trace_id: &str) -> Arc<PollerHandle> {
        self.stop_polling();
        // The new loop polls at once; an invalidation left from before would double it.
        self.core.pacer.clear_pending();

        let stop_flag = Arc::new(AtomicBool::new(false));
        let join = spawn_poll_loop(
            Arc::clone(&self.core),
            emitter,
            trace_id.to_string(),
            Arc::clone(&stop_flag),
        );
        let handle = Arc::new(PollerHandle {
            stop_flag,
            pacer: Arc::clone(&self.core.pacer),
            join: Mutex::new(Some(join)),
        });
        match self.poller.lock() {
            Ok(mut guard) => *guard = Some(Arc::clone(&handle)),
            Err(poisoned) => *poisoned.into_inner() = Some(Arc::clone(&handle)),
        }
        handle
    }
}

impl Drop for DeviceSessionManager {
    fn drop(&mut self) {
        self.stop_polling();
    }
}

fn spawn_poll_loop(
    core: Arc<SessionCore>,
    emitter: DeviceEmitter,
    trace_id: String,
    stop_flag: Arc<AtomicBool>,
) -> JoinHandle<()> {
    thread::spawn(move || {
        info!(trace_id = %trace_id, "device polling started");
        loop {
            if stop_flag.load(Ordering::Relaxed) {
                break;
            }
            match core.poll_once(&trace_id) {
                Ok(devices) => {
                    if stop_flag.load(Ordering::Relaxed) {
                        break;
                    }
                    debug!(trace_id = %trace_id, device_count = devices.len(), "device poll");
                    (emitter)(devices);
                }
                Err(err) => {
                    warn!(
                        trace_id = %trace_id,
                        error = %err.error,
                        code = %err.code,
                        "device poll failed; retrying next cycle"
                    );
                }
            }

            core.pacer.wait(&stop_flag);
        }
        info!(trace_id = %trace_id, "device polling stopped");
    })
}

/// Device lists published by the poll loop. Dropping the subscription stops polling.
pub struct DeviceSubscription {
    receiver: Receiver<Vec<Device>>,
    handle: Arc<PollerHandle>,
}

impl DeviceSubscription {
    pub fn recv_timeout(&self, timeout: Duration) -> Option<Vec<Device>> {
        self.receiver.recv_timeout(timeout).ok()
    }

    /// Most recent list already published, skipping older ones.
    pub fn latest(&self) -> Option<Vec<Device>> {
        self.receiver.try_iter().last()
    }

    pub fn is_active(&self) -> bool {
        self.handle.is_running()
    }

    pub fn stop(self) {
        self.handle.stop();
    }
}

impl Iterator for DeviceSubscription {
    type Item = Vec<Device>;

    fn next(&mut self) -> Option<Vec<Device>> {
        if !self.handle.is_running() {
            return self.receiver.try_recv().ok();
        }
        self.receiver.recv().ok()
    }
}

impl Drop for DeviceSubscription {
    fn drop(&mut self) {
        self.handle.stop();
    }
}
