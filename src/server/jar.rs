//! Server jar provisioning: symlink a local artifact or download one.

use std::io;
use std::path::{Path, PathBuf};

use futures::StreamExt;
use log::info;
use tokio::fs;
use tokio::io::AsyncWriteExt;

use super::Server;
use crate::error::Result;

impl Server {
    /// Fixed location of the server executable artifact.
    pub fn jar_path(&self) -> PathBuf {
        self.file("server/minecraft_server.jar")
    }

    pub async fn has_jar(&self) -> bool {
        fs::try_exists(self.jar_path()).await.unwrap_or(false)
    }

    /// Creates (or replaces) a symlink at the jar path pointing at `source`.
    pub async fn link_jar(&self, source: &Path) -> Result<()> {
        let dest = self.jar_path();
        match fs::remove_file(&dest).await {
            Err(err) if err.kind() != io::ErrorKind::NotFound => return Err(err.into()),
            _ => {}
        }
        symlink(source, &dest).await?;
        info!("linked {} -> {}", dest.display(), source.display());
        Ok(())
    }

    /// Streams a remote jar to the fixed jar path.
    pub async fn download_jar(&self, url: &str) -> Result<()> {
        let response = reqwest::get(url).await?.error_for_status()?;
        let mut file = fs::File::create(self.jar_path()).await?;
        let mut body = response.bytes_stream();
        while let Some(chunk) = body.next().await {
            file.write_all(&chunk?).await?;
        }
        file.flush().await?;
        info!("downloaded server jar from {}", url);
        Ok(())
    }
}

#[cfg(unix)]
async fn symlink(source: &Path, dest: &Path) -> io::Result<()> {
    fs::symlink(source, dest).await
}

#[cfg(windows)]
async fn symlink(source: &Path, dest: &Path) -> io::Result<()> {
    fs::symlink_file(source, dest).await
}
