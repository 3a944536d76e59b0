//! Start / stop / restart of the managed process.

use std::io;

use log::info;
use tokio::sync::broadcast;
use tokio::time::timeout;

use super::Server;
use crate::error::{Result, ServerError};
use crate::game::{GameDriver, GameEvent, GameStatus, STARTUP_WAIT};

impl Server {
    /// Launches the managed process and waits until it reports ready.
    ///
    /// Only valid while stopped. On any failure no handle is retained, so
    /// the entity observably stays `Stopped`.
    pub async fn start(&mut self) -> Result<()> {
        if self.game.is_some() {
            return Err(ServerError::AlreadyRunning);
        }

        let config = self.config.read().await?;
        let server_dir = self.file("server");
        let driver = self
            .launcher
            .launch(&server_dir, &self.jar_path(), &config)
            .await?;

        if driver.status() != GameStatus::Running {
            if let Err(err) = wait_until_running(driver.as_ref()).await {
                let _ = driver.stop().await;
                return Err(err);
            }
        }

        info!("server at {} is up", self.dir().display());
        self.game = Some(driver);
        Ok(())
    }

    /// Graceful shutdown. Stopping an already-stopped server is a no-op
    /// success; the handle is discarded only once the stop completed.
    pub async fn stop(&mut self) -> Result<()> {
        let Some(game) = &self.game else {
            return Ok(());
        };

        game.stop().await?;
        self.game = None;
        info!("server at {} stopped", self.dir().display());
        Ok(())
    }

    /// Stop-then-start preserving configuration; the handle is retained
    /// across the call. Only valid while running.
    pub async fn restart(&mut self) -> Result<()> {
        match &self.game {
            None => Err(ServerError::NotRunning),
            Some(game) => game.restart().await,
        }
    }
}

async fn wait_until_running(driver: &dyn GameDriver) -> Result<()> {
    let mut events = driver.events();
    // the ready line may already have been printed before we subscribed
    if driver.status() == GameStatus::Running {
        return Ok(());
    }

    let wait = async {
        loop {
            match events.recv().await {
                Ok(GameEvent::Status(GameStatus::Running)) => return Ok(()),
                Ok(GameEvent::Status(GameStatus::Stopped | GameStatus::Crashed)) => {
                    return Err(ServerError::Spawn {
                        source: io::Error::other("server exited during startup"),
                    })
                }
                Ok(_) => {}
                Err(broadcast::error::RecvError::Lagged(_)) => {}
                Err(broadcast::error::RecvError::Closed) => {
                    return Err(ServerError::Spawn {
                        source: io::Error::other("console channel closed during startup"),
                    })
                }
            }
        }
    };

    timeout(STARTUP_WAIT, wait)
        .await
        .map_err(|_| ServerError::Timeout {
            waiting_for: "server startup",
        })?
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use tempfile::TempDir;

    use super::*;
    use crate::game::testing::{FakeGame, FakeLauncher};
    use crate::server::CreateData;

    async fn fixture() -> (TempDir, Server, Arc<FakeGame>) {
        let _ = pretty_env_logger::try_init();
        let dir = TempDir::new().unwrap();
        let launcher = FakeLauncher::new();
        let game = launcher.game.clone();
        let server = Server::with_launcher(dir.path().join("instance"), Arc::new(launcher));
        server.create(CreateData::default()).await.unwrap();
        (dir, server, game)
    }

    #[tokio::test]
    async fn start_then_stop_round_trips_the_status() {
        let (_dir, mut server, _game) = fixture().await;
        assert_eq!(server.status(), GameStatus::Stopped);

        server.start().await.unwrap();
        assert_eq!(server.status(), GameStatus::Running);

        server.stop().await.unwrap();
        assert_eq!(server.status(), GameStatus::Stopped);

        // stop on an already-stopped server is a no-op success
        server.stop().await.unwrap();
        assert_eq!(server.status(), GameStatus::Stopped);
    }

    #[tokio::test]
    async fn start_while_running_is_rejected() {
        let (_dir, mut server, _game) = fixture().await;
        server.start().await.unwrap();

        let err = server.start().await.unwrap_err();
        assert!(matches!(err, ServerError::AlreadyRunning));
        assert_eq!(server.status(), GameStatus::Running);
    }

    #[tokio::test]
    async fn start_with_missing_jar_leaves_no_handle() {
        // uses the real JVM launcher: the jar probe fails before any spawn
        let dir = TempDir::new().unwrap();
        let mut server = Server::new(dir.path().join("instance"));
        server.create(CreateData::default()).await.unwrap();

        let err = server.start().await.unwrap_err();
        assert!(matches!(err, ServerError::Spawn { .. }));
        assert_eq!(server.status(), GameStatus::Stopped);
    }

    #[tokio::test]
    async fn restart_requires_a_running_server() {
        let (_dir, mut server, game) = fixture().await;

        let err = server.restart().await.unwrap_err();
        assert!(matches!(err, ServerError::NotRunning));

        server.start().await.unwrap();
        server.restart().await.unwrap();
        assert_eq!(server.status(), GameStatus::Running);
        assert!(game.sent().contains(&"<restart>".to_string()));
    }
}
