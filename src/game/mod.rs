//! The seam between the server entity and the managed JVM process.
//!
//! `GameDriver` is what a live process looks like to the rest of the crate;
//! `GameLauncher` is how one comes into being. Production code uses
//! [`JavaLauncher`]; tests substitute scripted doubles.

mod config;
mod process;
#[cfg(test)]
pub(crate) mod testing;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::error::Result;

pub use config::ServerConfig;
pub use process::JavaLauncher;

/// Observed state of the managed process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GameStatus {
    Starting,
    Running,
    Stopping,
    Stopped,
    Crashed,
}

/// Notifications parsed from the process console.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GameEvent {
    /// Auto-save was disabled (`save-off` acknowledged).
    SaveOff,
    /// All pending chunks were written (`save-all` acknowledged).
    Saved,
    /// Auto-save was re-enabled (`save-on` acknowledged).
    SaveOn,
    Status(GameStatus),
}

/// How long a launch may take before the process is considered wedged.
pub(crate) const STARTUP_WAIT: Duration = Duration::from_secs(180);

/// Control surface of a live managed process.
#[async_trait]
pub trait GameDriver: Send + Sync {
    fn status(&self) -> GameStatus;

    /// Subscribes to console events. Subscribe *before* sending the command
    /// whose acknowledgement you intend to wait for.
    fn events(&self) -> broadcast::Receiver<GameEvent>;

    /// Injects one line into the process control channel.
    async fn send_command(&self, line: &str) -> Result<()>;

    /// Graceful shutdown; resolves once the process has exited.
    /// Stopping an already-stopped process is a no-op.
    async fn stop(&self) -> Result<()>;

    /// Stop followed by a relaunch with the original configuration.
    async fn restart(&self) -> Result<()>;
}

/// Spawns a managed process rooted in `server_dir`.
#[async_trait]
pub trait GameLauncher: Send + Sync {
    async fn launch(
        &self,
        server_dir: &std::path::Path,
        jar: &std::path::Path,
        config: &ServerConfig,
    ) -> Result<Arc<dyn GameDriver>>;
}
