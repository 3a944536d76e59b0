//! The server instance aggregate.
//!
//! A [`Server`] is bound to one root directory and owns everything under
//! it: the persisted config set, the snapshot store and, while the managed
//! process is live, the process driver handle. `game` being `Some` is the
//! single source of truth for "running".

mod backup;
mod jar;
mod lifecycle;

pub use backup::BackupTuning;

use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use log::info;
use tokio::fs;

use crate::backup::BackupStore;
use crate::error::{Result, ServerError};
use crate::game::{GameDriver, GameLauncher, GameStatus, JavaLauncher, ServerConfig};
use crate::storage::{JsonFile, ListFile, LogFile, PropertiesFile};

/// Initial file contents for [`Server::create`]. Members left `None` are
/// materialized as empty defaults.
#[derive(Debug, Clone, Default)]
pub struct CreateData {
    pub config: Option<ServerConfig>,
    pub properties: Option<std::collections::BTreeMap<String, String>>,
    pub whitelist: Option<Vec<String>>,
    pub ops: Option<Vec<String>>,
    pub banned_players: Option<Vec<String>>,
    pub banned_ips: Option<Vec<String>>,
    pub jar: Option<PathBuf>,
}

/// Active ban sets, with comment lines already filtered out.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BannedLists {
    pub ips: Vec<String>,
    pub players: Vec<String>,
}

pub struct Server {
    dir: PathBuf,

    pub log: LogFile,
    pub config: JsonFile<ServerConfig>,
    pub properties: PropertiesFile,
    pub whitelist: ListFile,
    pub operators: ListFile,
    pub banned_ips: ListFile,
    pub banned_players: ListFile,

    backups: BackupStore,
    launcher: Arc<dyn GameLauncher>,
    tuning: BackupTuning,
    game: Option<Arc<dyn GameDriver>>,
}

impl Server {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self::with_launcher(dir, Arc::new(JavaLauncher))
    }

    /// Builds a server that spawns its process through `launcher` instead
    /// of the default JVM launcher.
    pub fn with_launcher(dir: impl Into<PathBuf>, launcher: Arc<dyn GameLauncher>) -> Self {
        let dir = dir.into();
        Self {
            log: LogFile::new(dir.join("server/server.log")),
            config: JsonFile::new(dir.join("config.json")),
            properties: PropertiesFile::new(dir.join("server/server.properties")),
            whitelist: ListFile::new(dir.join("server/white-list.txt")),
            operators: ListFile::new(dir.join("server/ops.txt")),
            banned_ips: ListFile::with_ignore(dir.join("server/banned-ips.txt"), '#'),
            banned_players: ListFile::with_ignore(dir.join("server/banned-players.txt"), '#'),
            backups: BackupStore::new(dir.join("server"), dir.join("backups")),
            launcher,
            tuning: BackupTuning::default(),
            game: None,
            dir,
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Resolves a path relative to the instance root.
    pub fn file(&self, rel: impl AsRef<Path>) -> PathBuf {
        self.dir.join(rel)
    }

    pub fn backups(&self) -> &BackupStore {
        &self.backups
    }

    pub fn set_backup_tuning(&mut self, tuning: BackupTuning) {
        self.tuning = tuning;
    }

    /// `Stopped` whenever no process handle exists, else whatever the
    /// driver reports.
    pub fn status(&self) -> GameStatus {
        match &self.game {
            None => GameStatus::Stopped,
            Some(game) => game.status(),
        }
    }

    pub async fn exists(&self) -> bool {
        fs::try_exists(&self.dir).await.unwrap_or(false)
    }

    /// Materializes the instance directory and every persisted member.
    ///
    /// The member initializations are independent and run concurrently;
    /// the first error wins. Fails with `AlreadyExists` if the root
    /// directory is already present, leaving it untouched.
    pub async fn create(&self, data: CreateData) -> Result<()> {
        if self.exists().await {
            return Err(ServerError::AlreadyExists {
                dir: self.dir.clone(),
            });
        }

        fs::create_dir_all(self.file("server")).await?;

        tokio::try_join!(
            async {
                match &data.config {
                    Some(config) => self.config.write(config).await,
                    None => self.config.empty().await,
                }
            },
            async {
                match &data.properties {
                    Some(properties) => self.properties.write(properties).await,
                    None => self.properties.empty().await,
                }
            },
            self.log.empty(),
            async {
                match &data.whitelist {
                    Some(names) => self.whitelist.write(names).await,
                    None => self.whitelist.empty().await,
                }
            },
            async {
                match &data.ops {
                    Some(names) => self.operators.write(names).await,
                    None => self.operators.empty().await,
                }
            },
            async {
                match &data.banned_players {
                    Some(names) => self.banned_players.write(names).await,
                    None => self.banned_players.empty().await,
                }
            },
            async {
                match &data.banned_ips {
                    Some(ips) => self.banned_ips.write(ips).await,
                    None => self.banned_ips.empty().await,
                }
            },
            async {
                fs::create_dir_all(self.file("backups"))
                    .await
                    .map_err(ServerError::from)
            },
            async {
                match &data.jar {
                    Some(source) => self.link_jar(source).await,
                    None => Ok(()),
                }
            },
        )?;

        info!("created server instance at {}", self.dir.display());
        Ok(())
    }

    /// Stops the process if needed, then removes the whole instance tree.
    /// Deleting an instance that does not exist is a success.
    pub async fn delete(&mut self) -> Result<()> {
        if self.game.is_some() {
            self.stop().await?;
        }

        match fs::remove_dir_all(&self.dir).await {
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
            other => {
                other?;
                info!("deleted server instance at {}", self.dir.display());
                Ok(())
            }
        }
    }

    pub async fn banned(&self) -> Result<BannedLists> {
        let (ips, players) = tokio::try_join!(self.banned_ips.read(), self.banned_players.read())?;
        Ok(BannedLists { ips, players })
    }

    /// Removes the configured world directory. The world name comes from
    /// `level-name` in server.properties, falling back to `world`. Not
    /// gated on process state.
    pub async fn nuke_world(&self) -> Result<()> {
        let properties = self.properties.read().await?;
        let level = properties
            .get("level-name")
            .map(String::as_str)
            .unwrap_or("world");

        let world = self.file("server").join(level);
        match fs::remove_dir_all(&world).await {
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
            other => {
                other?;
                info!("nuked world directory {}", world.display());
                Ok(())
            }
        }
    }
}
