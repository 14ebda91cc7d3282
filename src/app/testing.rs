use std::sync::Mutex;

use crate::app::adb::runner::{CommandChannel, LineStream};
use crate::app::error::AppError;

/// Answers commands by the first matching substring and records every command it sees.
#[derive(Default)]
pub(crate) struct ScriptedChannel {
    responses: Mutex<Vec<(String, Result<Vec<String>, AppError>)>>,
    calls: Mutex<Vec<String>>,
}

impl ScriptedChannel {
    pub(crate) fn respond(&self, needle: &str, lines: &[&str]) {
        self.responses.lock().expect("responses").push((
            needle.to_string(),
            Ok(lines.iter().map(|line| line.to_string()).collect()),
        ));
    }

    pub(crate) fn fail(&self, needle: &str) {
        self.responses.lock().expect("responses").push((
            needle.to_string(),
            Err(AppError::system("spawn failed", "scripted")),
        ));
    }

    pub(crate) fn calls(&self) -> Vec<String> {
        self.calls.lock().expect("calls").clone()
    }

    fn lookup(&self, command: &str) -> Result<Vec<String>, AppError> {
        self.calls.lock().expect("calls").push(command.to_string());
        let responses = self.responses.lock().expect("responses");
        responses
            .iter()
            .find(|(needle, _)| command.contains(needle.as_str()))
            .map(|(_, response)| response.clone())
            .unwrap_or_else(|| Ok(Vec::new()))
    }
}

impl CommandChannel for ScriptedChannel {
    fn run(&self, command: &str, _trace_id: &str) -> Result<Vec<String>, AppError> {
        self.lookup(command)
    }

    fn stream(&self, command: &str, _trace_id: &str) -> Result<LineStream, AppError> {
        self.lookup(command).map(LineStream::from_lines)
    }
}

/// Serialises tests that touch process environment variables.
pub(crate) fn env_lock() -> std::sync::MutexGuard<'static, ()> {
    static LOCK: std::sync::OnceLock<Mutex<()>> = std::sync::OnceLock::new();
    LOCK.get_or_init(|| Mutex::new(()))
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
}
