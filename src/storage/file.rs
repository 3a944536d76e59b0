//! File-backed values of the persisted config set.
//!
//! Every member supports read / write / empty and owns exactly one path
//! under the server root. All I/O goes through `tokio::fs`.

use std::collections::BTreeMap;
use std::marker::PhantomData;
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::fs;

use crate::error::Result;

/// Serde-typed JSON document.
pub struct JsonFile<T> {
    path: PathBuf,
    _marker: PhantomData<fn() -> T>,
}

impl<T> JsonFile<T>
where
    T: Serialize + DeserializeOwned + Default,
{
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            _marker: PhantomData,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn read(&self) -> Result<T> {
        let text = fs::read_to_string(&self.path).await?;
        Ok(serde_json::from_str(&text)?)
    }

    /// Writes the document, keeping a `.bak` copy of the previous contents.
    pub async fn write(&self, value: &T) -> Result<()> {
        if fs::try_exists(&self.path).await? {
            fs::copy(&self.path, self.path.with_extension("bak")).await?;
        }
        let text = serde_json::to_string_pretty(value)?;
        fs::write(&self.path, text).await?;
        Ok(())
    }

    pub async fn empty(&self) -> Result<()> {
        self.write(&T::default()).await
    }
}

/// `key=value` text with `#` comment lines (server.properties).
///
/// Values stay untyped strings; the file format carries no type information.
pub struct PropertiesFile {
    path: PathBuf,
}

impl PropertiesFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn read(&self) -> Result<BTreeMap<String, String>> {
        let text = fs::read_to_string(&self.path).await?;
        let mut map = BTreeMap::new();
        for line in text.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            if let Some((key, value)) = line.split_once('=') {
                map.insert(key.trim().to_string(), value.trim().to_string());
            }
        }
        Ok(map)
    }

    pub async fn write(&self, properties: &BTreeMap<String, String>) -> Result<()> {
        let mut text = String::new();
        for (key, value) in properties {
            text.push_str(key);
            text.push('=');
            text.push_str(value);
            text.push('\n');
        }
        fs::write(&self.path, text).await?;
        Ok(())
    }

    pub async fn empty(&self) -> Result<()> {
        fs::write(&self.path, "").await?;
        Ok(())
    }
}

/// One entry per line, optionally skipping commented lines on read.
pub struct ListFile {
    path: PathBuf,
    ignore: Option<char>,
}

impl ListFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            ignore: None,
        }
    }

    /// Lines starting with `prefix` are excluded from `read()`.
    pub fn with_ignore(path: impl Into<PathBuf>, prefix: char) -> Self {
        Self {
            path: path.into(),
            ignore: Some(prefix),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn read(&self) -> Result<Vec<String>> {
        let text = fs::read_to_string(&self.path).await?;
        Ok(text
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .filter(|line| match self.ignore {
                Some(prefix) => !line.starts_with(prefix),
                None => true,
            })
            .map(str::to_string)
            .collect())
    }

    pub async fn write(&self, entries: &[String]) -> Result<()> {
        let mut text = entries.join("\n");
        if !text.is_empty() {
            text.push('\n');
        }
        fs::write(&self.path, text).await?;
        Ok(())
    }

    pub async fn empty(&self) -> Result<()> {
        fs::write(&self.path, "").await?;
        Ok(())
    }
}

/// Plain text file the core only ever creates empty; the managed process
/// writes into it.
pub struct LogFile {
    path: PathBuf,
}

impl LogFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn empty(&self) -> Result<()> {
        fs::write(&self.path, "").await?;
        Ok(())
    }
}
