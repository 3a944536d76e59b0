//! Crash-consistent backup and restore of the instance directory.
//!
//! While the process is live, writes are quiesced through a command
//! handshake before the snapshot store copies the tree: `save-off` to
//! suspend auto-saving, `save-all` to flush pending chunks, the snapshot
//! itself, then `save-on` to resume. Every acknowledgement wait is
//! timeout-bounded.

use std::time::Duration;

use log::{debug, info, warn};
use tokio::sync::broadcast;
use tokio::time::{sleep, timeout};

use super::Server;
use crate::backup::{BackupId, BackupStore};
use crate::error::{Result, ServerError};
use crate::game::{GameDriver, GameEvent, GameStatus};

/// Settling delays and wait bounds of the quiesce handshake.
///
/// The settling delays compensate for the process acknowledging saves
/// before the data is durably on disk; there is no stronger confirmation
/// signal in the console protocol.
#[derive(Debug, Clone)]
pub struct BackupTuning {
    /// Pause between the save-off acknowledgement and the flush command,
    /// so the flush cannot race the save-disable bookkeeping.
    pub save_off_settle: Duration,
    /// Pause between the flush acknowledgement and the snapshot.
    pub save_all_settle: Duration,
    /// Bound on each acknowledgement wait.
    pub event_timeout: Duration,
}

impl Default for BackupTuning {
    fn default() -> Self {
        Self {
            save_off_settle: Duration::from_millis(500),
            save_all_settle: Duration::from_secs(5),
            event_timeout: Duration::from_secs(30),
        }
    }
}

impl Server {
    /// Captures a snapshot of the server directory.
    ///
    /// With the process stopped this is a plain snapshot. With the process
    /// live, the quiesce handshake runs first and auto-saving is restored
    /// afterward; if any step fails, one best-effort `save-on` is sent so
    /// the process is not silently left with auto-save disabled, then the
    /// original error is surfaced.
    pub async fn backup(&mut self) -> Result<BackupId> {
        let Some(game) = self.game.clone() else {
            debug!("process stopped, snapshotting {} directly", self.dir().display());
            return self.backups.backup().await;
        };

        info!("starting live backup of {}", self.dir().display());
        match quiesced_backup(game.as_ref(), &self.backups, &self.tuning).await {
            Ok(id) => {
                let _ = game.send_command("say Server Backup Complete").await;
                info!("live backup {} complete", id);
                Ok(id)
            }
            Err(err) => {
                warn!("live backup failed ({}); re-enabling auto-save", err);
                let _ = game.send_command("save-on").await;
                Err(err)
            }
        }
    }

    /// Restores snapshot `id` over the server directory.
    ///
    /// Hard precondition: the process must be stopped. A live process is
    /// rejected before any filesystem action is taken.
    pub async fn restore(&mut self, id: BackupId) -> Result<()> {
        if self.game.is_some() {
            return Err(ServerError::StillRunning);
        }
        self.backups.restore(id).await
    }
}

async fn quiesced_backup(
    game: &dyn GameDriver,
    store: &BackupStore,
    tuning: &BackupTuning,
) -> Result<BackupId> {
    // subscribe before the first command so no acknowledgement can be missed
    let mut events = game.events();

    let _ = game.send_command("say Server Backup Happening Now").await;

    send_and_await(game, &mut events, "save-off", &GameEvent::SaveOff, "saveoff", tuning).await?;
    sleep(tuning.save_off_settle).await;

    send_and_await(game, &mut events, "save-all", &GameEvent::Saved, "saved", tuning).await?;
    sleep(tuning.save_all_settle).await;

    let id = store.backup().await?;

    send_and_await(game, &mut events, "save-on", &GameEvent::SaveOn, "saveon", tuning).await?;

    Ok(id)
}

async fn send_and_await(
    game: &dyn GameDriver,
    events: &mut broadcast::Receiver<GameEvent>,
    command: &'static str,
    ack: &GameEvent,
    ack_name: &'static str,
    tuning: &BackupTuning,
) -> Result<()> {
    debug!("handshake step: {}", command);
    game.send_command(command).await.map_err(|err| {
        warn!("could not send '{}': {}", command, err);
        ServerError::Handshake { step: command }
    })?;

    let wait = async {
        loop {
            match events.recv().await {
                Ok(event) if event == *ack => return Ok(()),
                Ok(GameEvent::Status(GameStatus::Stopped | GameStatus::Crashed)) => {
                    return Err(ServerError::Handshake { step: command })
                }
                Ok(_) => {}
                Err(broadcast::error::RecvError::Lagged(_)) => {}
                Err(broadcast::error::RecvError::Closed) => {
                    return Err(ServerError::Handshake { step: command })
                }
            }
        }
    };

    timeout(tuning.event_timeout, wait)
        .await
        .map_err(|_| ServerError::Timeout { waiting_for: ack_name })?
}

#[cfg(test)]
mod tests {
    use std::path::Path;
    use std::sync::Arc;

    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    use super::*;
    use crate::game::testing::{FakeGame, FakeLauncher};
    use crate::server::CreateData;

    fn fast_tuning() -> BackupTuning {
        BackupTuning {
            save_off_settle: Duration::from_millis(1),
            save_all_settle: Duration::from_millis(1),
            event_timeout: Duration::from_millis(100),
        }
    }

    async fn fixture() -> (TempDir, Server, Arc<FakeGame>) {
        let _ = pretty_env_logger::try_init();
        let dir = TempDir::new().unwrap();
        let launcher = FakeLauncher::new();
        let game = launcher.game.clone();
        let mut server = Server::with_launcher(dir.path().join("instance"), Arc::new(launcher));
        server.create(CreateData::default()).await.unwrap();
        server.set_backup_tuning(fast_tuning());
        (dir, server, game)
    }

    fn tree_contents(root: &Path) -> Vec<(String, Vec<u8>)> {
        let mut out = Vec::new();
        let mut stack = vec![root.to_path_buf()];
        while let Some(dir) = stack.pop() {
            for entry in std::fs::read_dir(&dir).unwrap() {
                let path = entry.unwrap().path();
                if path.is_dir() {
                    stack.push(path);
                } else {
                    let rel = path.strip_prefix(root).unwrap().to_string_lossy().into_owned();
                    out.push((rel, std::fs::read(&path).unwrap()));
                }
            }
        }
        out.sort();
        out
    }

    #[tokio::test]
    async fn backup_while_stopped_needs_no_handshake() {
        let (_dir, mut server, game) = fixture().await;
        std::fs::create_dir_all(server.file("server/world")).unwrap();
        std::fs::write(server.file("server/world/level.dat"), b"original").unwrap();
        let before = tree_contents(&server.file("server"));

        let id = server.backup().await.unwrap();
        assert!(server.backups().exists(id).await);
        assert!(game.sent().is_empty());

        // a later restore reproduces the captured contents exactly
        std::fs::write(server.file("server/world/level.dat"), b"corrupted").unwrap();
        server.restore(id).await.unwrap();
        assert_eq!(tree_contents(&server.file("server")), before);
    }

    #[tokio::test]
    async fn live_backup_runs_the_handshake_in_order() {
        let (_dir, mut server, game) = fixture().await;
        server.start().await.unwrap();
        game.set_marker_dir(&server.file("server"));

        let id = server.backup().await.unwrap();

        assert_eq!(
            game.sent(),
            vec![
                "say Server Backup Happening Now".to_string(),
                "save-off".to_string(),
                "save-all".to_string(),
                "save-on".to_string(),
                "say Server Backup Complete".to_string(),
            ]
        );

        // the snapshot was taken after the flush ack and before save-on
        let snapshot = server.backups().store_dir().join(id.to_string());
        assert!(snapshot.join("flushed.dat").exists());
        assert!(!snapshot.join("late.dat").exists());
    }

    #[tokio::test]
    async fn restore_while_running_is_rejected_untouched() {
        let (_dir, mut server, _game) = fixture().await;
        std::fs::write(server.file("server/world.dat"), b"live data").unwrap();
        server.start().await.unwrap();
        let before = tree_contents(server.dir());

        let err = server.restore(BackupId::from(1)).await.unwrap_err();
        assert!(matches!(err, ServerError::StillRunning));
        assert_eq!(tree_contents(server.dir()), before);
    }

    #[tokio::test]
    async fn missing_acknowledgement_times_out() {
        let (_dir, mut server, game) = fixture().await;
        server.start().await.unwrap();
        game.suppress_ack("save-off");

        let err = server.backup().await.unwrap_err();
        assert!(matches!(
            err,
            ServerError::Timeout {
                waiting_for: "saveoff"
            }
        ));

        // auto-save is re-enabled on the failure path
        assert_eq!(game.sent().last().map(String::as_str), Some("save-on"));
    }

    #[tokio::test]
    async fn snapshot_failure_reenables_auto_save() {
        let (_dir, mut server, game) = fixture().await;
        server.start().await.unwrap();

        // make the snapshot step fail: the source tree is gone
        std::fs::remove_dir_all(server.file("server")).unwrap();

        let err = server.backup().await.unwrap_err();
        assert!(matches!(err, ServerError::Io(_)));

        let sent = game.sent();
        assert_eq!(sent.last().map(String::as_str), Some("save-on"));
        assert!(!sent.contains(&"say Server Backup Complete".to_string()));
    }
}
