//! Lifecycle management and crash-consistent backups for a single
//! Minecraft server instance.
//!
//! A [`Server`] is rooted in one directory and bundles the persisted
//! config set, process control and the snapshot store:
//!
//! ```no_run
//! use craftd::{CreateData, Server};
//!
//! # async fn demo() -> Result<(), craftd::ServerError> {
//! let mut server = Server::new("/srv/minecraft/main");
//! server.create(CreateData::default()).await?;
//! server.start().await?;
//! let backup = server.backup().await?; // safe while running
//! server.stop().await?;
//! server.restore(backup).await?;
//! # Ok(())
//! # }
//! ```

pub mod backup;
pub mod error;
pub mod game;
pub mod server;
pub mod storage;

pub use backup::{BackupId, BackupStore};
pub use error::ServerError;
pub use game::{GameDriver, GameEvent, GameLauncher, GameStatus, JavaLauncher, ServerConfig};
pub use server::{BackupTuning, BannedLists, CreateData, Server};
