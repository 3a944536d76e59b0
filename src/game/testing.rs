//! Scripted in-process stand-ins for the JVM driver, used by the server
//! and coordinator tests. The fake acknowledges save commands the way a
//! cooperative server would and records every line it is sent.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex as StdMutex};

use async_trait::async_trait;
use tokio::sync::{broadcast, watch};

use super::{GameDriver, GameEvent, GameLauncher, GameStatus, ServerConfig};
use crate::error::Result;

pub(crate) struct FakeGame {
    status_tx: watch::Sender<GameStatus>,
    event_tx: broadcast::Sender<GameEvent>,
    sent: StdMutex<Vec<String>>,
    /// When set, `save-all` drops `flushed.dat` and `save-on` drops
    /// `late.dat` into this directory, so tests can prove the snapshot was
    /// taken between the two acknowledgements.
    marker_dir: StdMutex<Option<PathBuf>>,
    /// Commands that are accepted but never acknowledged.
    suppressed: StdMutex<Vec<String>>,
}

impl FakeGame {
    pub fn new() -> Arc<Self> {
        let (status_tx, _) = watch::channel(GameStatus::Running);
        let (event_tx, _) = broadcast::channel(64);
        Arc::new(Self {
            status_tx,
            event_tx,
            sent: StdMutex::new(Vec::new()),
            marker_dir: StdMutex::new(None),
            suppressed: StdMutex::new(Vec::new()),
        })
    }

    pub fn set_marker_dir(&self, dir: &Path) {
        *self.marker_dir.lock().unwrap() = Some(dir.to_path_buf());
    }

    pub fn suppress_ack(&self, command: &str) {
        self.suppressed.lock().unwrap().push(command.to_string());
    }

    pub fn sent(&self) -> Vec<String> {
        self.sent.lock().unwrap().clone()
    }

    fn drop_marker(&self, name: &str) {
        if let Some(dir) = self.marker_dir.lock().unwrap().as_ref() {
            std::fs::write(dir.join(name), name).unwrap();
        }
    }
}

#[async_trait]
impl GameDriver for FakeGame {
    fn status(&self) -> GameStatus {
        *self.status_tx.borrow()
    }

    fn events(&self) -> broadcast::Receiver<GameEvent> {
        self.event_tx.subscribe()
    }

    async fn send_command(&self, line: &str) -> Result<()> {
        self.sent.lock().unwrap().push(line.to_string());
        if self.suppressed.lock().unwrap().iter().any(|c| c == line) {
            return Ok(());
        }
        match line {
            "save-off" => {
                let _ = self.event_tx.send(GameEvent::SaveOff);
            }
            "save-all" => {
                self.drop_marker("flushed.dat");
                let _ = self.event_tx.send(GameEvent::Saved);
            }
            "save-on" => {
                self.drop_marker("late.dat");
                let _ = self.event_tx.send(GameEvent::SaveOn);
            }
            "stop" => {
                self.status_tx.send_replace(GameStatus::Stopped);
                let _ = self.event_tx.send(GameEvent::Status(GameStatus::Stopped));
            }
            _ => {}
        }
        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        self.status_tx.send_replace(GameStatus::Stopped);
        Ok(())
    }

    async fn restart(&self) -> Result<()> {
        self.sent.lock().unwrap().push("<restart>".to_string());
        self.status_tx.send_replace(GameStatus::Running);
        Ok(())
    }
}

pub(crate) struct FakeLauncher {
    pub game: Arc<FakeGame>,
}

impl FakeLauncher {
    pub fn new() -> Self {
        Self {
            game: FakeGame::new(),
        }
    }
}

#[async_trait]
impl GameLauncher for FakeLauncher {
    async fn launch(
        &self,
        _server_dir: &Path,
        _jar: &Path,
        _config: &ServerConfig,
    ) -> Result<Arc<dyn GameDriver>> {
        self.game.status_tx.send_replace(GameStatus::Running);
        Ok(self.game.clone() as Arc<dyn GameDriver>)
    }
}
