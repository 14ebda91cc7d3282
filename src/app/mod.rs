pub mod adb;
pub mod config;
pub mod error;
pub mod files;
pub mod logging;
pub mod models;
pub mod poller;
pub mod session;

#[cfg(test)]
pub(crate) mod testing;
