use std::io::{BufRead, BufReader, Read};
use std::process::{Child, Command, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use crate::app::error::AppError;

/// Executes one command string per call. Implementations must never panic on
/// spawn failures; they report them as `ERR_SYSTEM`.
pub trait CommandChannel: Send + Sync {
    /// Runs to completion and returns stdout and stderr merged, split into lines.
    /// A non-zero exit status is not an error.
    fn run(&self, command: &str, trace_id: &str) -> Result<Vec<String>, AppError>;

    /// Starts the command and yields output lines as they arrive.
    fn stream(&self, command: &str, trace_id: &str) -> Result<LineStream, AppError>;
}

/// Splits a command string into the platform's process invocation. POSIX goes
/// through `sh -c` so pipes and redirection keep working.
pub fn shell_invocation(command: &str) -> (String, Vec<String>) {
    if cfg!(windows) {
        let mut parts = command.split_whitespace().map(str::to_string);
        let program = parts.next().unwrap_or_default();
        (program, parts.collect())
    } else {
        ("sh".to_string(), vec!["-c".to_string(), command.to_string()])
    }
}

#[derive(Debug, Clone, Default)]
pub struct ProcessChannel {
    timeout: Option<Duration>,
}

impl ProcessChannel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_timeout(timeout: Option<Duration>) -> Self {
        Self { timeout }
    }
}

impl CommandChannel for ProcessChannel {
    fn run(&self, command: &str, trace_id: &str) -> Result<Vec<String>, AppError> {
        let command = command.trim();
        if command.is_empty() {
            return Ok(Vec::new());
        }
        debug!(trace_id = %trace_id, command = %command, "run command");

        let mut child = spawn_merged(command, trace_id)?;
        let (sender, receiver) = mpsc::channel::<String>();
        let pumps = attach_pumps(&mut child, sender, trace_id)?;

        let exit_code = match self.timeout {
            None => child
                .wait()
                .map_err(|err| {
                    AppError::system(format!("Failed to wait for command: {err}"), trace_id)
                })?
                .code(),
            Some(timeout) => {
                let start = Instant::now();
                loop {
                    match child.try_wait() {
                        Ok(Some(status)) => break status.code(),
                        Ok(None) => {
                            if start.elapsed() > timeout {
                                kill_process_tree(&mut child);
                                drop(pumps);
                                warn!(trace_id = %trace_id, command = %command, "command timed out");
                                return Err(AppError::system("Command timed out", trace_id));
                            }
                            thread::sleep(Duration::from_millis(50));
                        }
                        Err(err) => {
                            kill_process_tree(&mut child);
                            drop(pumps);
                            return Err(AppError::system(
                                format!("Failed to poll command: {err}"),
                                trace_id,
                            ));
                        }
                    }
                }
            }
        };

        join_pumps(pumps);
        let lines: Vec<String> = receiver.try_iter().collect();
        debug!(
            trace_id = %trace_id,
            exit_code = ?exit_code,
            line_count = lines.len(),
            "command finished"
        );
        Ok(lines)
    }

    fn stream(&self, command: &str, trace_id: &str) -> Result<LineStream, AppError> {
        let command = command.trim();
        if command.is_empty() {
            return Ok(LineStream::from_lines(Vec::new()));
        }
        debug!(trace_id = %trace_id, command = %command, "stream command");

        let mut child = spawn_merged(command, trace_id)?;
        let (sender, receiver) = mpsc::channel::<String>();
        // Pump threads end on their own once the child is killed and the pipes close.
        attach_pumps(&mut child, sender, trace_id)?;

        Ok(LineStream {
            receiver,
            child: Arc::new(Mutex::new(Some(child))),
            cancelled: Arc::new(AtomicBool::new(false)),
        })
    }
}

/// The child leads its own process group so everything the shell starts
/// (pipeline stages, the bridge tool) can be killed with it.
fn spawn_merged(command: &str, trace_id: &str) -> Result<Child, AppError> {
    let (program, args) = shell_invocation(command);
    let mut cmd = Command::new(&program);
    cmd.args(&args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    #[cfg(unix)]
    {
        use std::os::unix::process::CommandExt;
        cmd.process_group(0);
    }
    cmd.spawn()
        .map_err(|err| {
            warn!(trace_id = %trace_id, program = %program, error = %err, "failed to spawn command");
            AppError::system(format!("Failed to spawn command: {err}"), trace_id)
        })
}

/// Kills the child's process group, then the child itself, and reaps it.
fn kill_process_tree(child: &mut Child) {
    #[cfg(unix)]
    {
        // The group id equals the child pid; see `spawn_merged`.
        if let Ok(pgid) = libc::pid_t::try_from(child.id()) {
            unsafe {
                libc::killpg(pgid, libc::SIGKILL);
            }
        }
    }
    let _ = child.kill();
    let _ = child.wait();
}

/// Drains stdout and stderr into one channel so both reach the caller in arrival order.
fn attach_pumps(
    child: &mut Child,
    sender: Sender<String>,
    trace_id: &str,
) -> Result<Vec<JoinHandle<()>>, AppError> {
    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| AppError::system("Failed to capture stdout", trace_id))?;
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| AppError::system("Failed to capture stderr", trace_id))?;

    Ok(vec![
        pump_lines(stdout, sender.clone()),
        pump_lines(stderr, sender),
    ])
}

fn pump_lines<R: Read + Send + 'static>(reader: R, sender: Sender<String>) -> JoinHandle<()> {
    thread::spawn(move || {
        let mut reader = BufReader::new(reader);
        let mut buffer = Vec::<u8>::new();
        loop {
            buffer.clear();
            match reader.read_until(b'\n', &mut buffer) {
                Ok(0) | Err(_) => break,
                Ok(_) => {
                    let line = String::from_utf8_lossy(&buffer)
                        .trim_end_matches(['\r', '\n'])
                        .to_string();
                    if sender.send(line).is_err() {
                        break;
                    }
                }
            }
        }
    })
}

fn join_pumps(pumps: Vec<JoinHandle<()>>) {
    for pump in pumps {
        let _ = pump.join();
    }
}

/// Output of a long-lived command. Dropping or cancelling it kills the child.
pub struct LineStream {
    receiver: Receiver<String>,
    child: Arc<Mutex<Option<Child>>>,
    cancelled: Arc<AtomicBool>,
}

impl LineStream {
    /// A stream over fixed lines with no process behind it.
    pub fn from_lines(lines: Vec<String>) -> Self {
        let (sender, receiver) = mpsc::channel();
        for line in lines {
            let _ = sender.send(line);
        }
        Self {
            receiver,
            child: Arc::new(Mutex::new(None)),
            cancelled: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn recv_timeout(&self, timeout: Duration) -> Result<String, RecvTimeoutError> {
        if self.cancelled.load(Ordering::Relaxed) {
            return Err(RecvTimeoutError::Disconnected);
        }
        self.receiver.recv_timeout(timeout)
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Relaxed)
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Relaxed);
        self.terminate();
    }

    fn terminate(&self) {
        if let Ok(mut guard) = self.child.lock() {
            if let Some(mut child) = guard.take() {
                kill_process_tree(&mut child);
            }
        }
    }
}

impl Iterator for LineStream {
    type Item = String;

    fn next(&mut self) -> Option<String> {
        if self.cancelled.load(Ordering::Relaxed) {
            return None;
        }
        match self.receiver.recv() {
            Ok(line) => Some(line),
            Err(_) => {
                // Both pipes closed: reap the child.
                self.terminate();
                None
            }
        }
    }
}

impl Drop for LineStream {
    fn drop(&mut self) {
        self.terminate();
    }
}
