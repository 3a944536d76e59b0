//! Real JVM process driver.
//!
//! Spawns `java -jar minecraft_server.jar nogui` with piped stdio, pumps
//! stdout/stderr through a console-pattern table, and republishes what the
//! process reports as [`GameStatus`] changes and [`GameEvent`]s.

use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use async_trait::async_trait;
use lazy_static::lazy_static;
use log::{debug, info, warn};
use regex::Regex;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{ChildStdin, Command};
use tokio::select;
use tokio::sync::{broadcast, watch, Mutex, Notify};
use tokio::time::timeout;

use super::{GameDriver, GameEvent, GameLauncher, GameStatus, ServerConfig, STARTUP_WAIT};
use crate::error::{Result, ServerError};

/// Grace period between the `stop` command and a forced kill.
const SHUTDOWN_WAIT: Duration = Duration::from_secs(60);

lazy_static! {
    static ref DONE_PATTERN: Regex =
        Regex::new(r#"Done \(\d+[.,]\d{1,3}s\)! For help, type ["']help["']"#)
            .expect("Failed to compile DONE_PATTERN regex");
    static ref SAVE_OFF_PATTERN: Regex =
        Regex::new("Turned off world auto-saving|Saving is already turned off")
            .expect("Failed to compile SAVE_OFF_PATTERN regex");
    static ref SAVED_PATTERN: Regex =
        Regex::new("Saved the (world|game)").expect("Failed to compile SAVED_PATTERN regex");
    static ref SAVE_ON_PATTERN: Regex =
        Regex::new("Turned on world auto-saving|Saving is already turned on")
            .expect("Failed to compile SAVE_ON_PATTERN regex");
}

fn parse_line(line: &str) -> Option<GameEvent> {
    let line = line.trim_end();
    if DONE_PATTERN.is_match(line) {
        Some(GameEvent::Status(GameStatus::Running))
    } else if line.contains("Stopping the server") {
        Some(GameEvent::Status(GameStatus::Stopping))
    } else if line.contains("Minecraft has crashed") {
        Some(GameEvent::Status(GameStatus::Crashed))
    } else if SAVE_OFF_PATTERN.is_match(line) {
        Some(GameEvent::SaveOff)
    } else if SAVED_PATTERN.is_match(line) {
        Some(GameEvent::Saved)
    } else if SAVE_ON_PATTERN.is_match(line) {
        Some(GameEvent::SaveOn)
    } else {
        None
    }
}

/// Launches [`JavaProcess`] instances.
pub struct JavaLauncher;

#[async_trait]
impl GameLauncher for JavaLauncher {
    async fn launch(
        &self,
        server_dir: &Path,
        jar: &Path,
        config: &ServerConfig,
    ) -> Result<Arc<dyn GameDriver>> {
        let process = JavaProcess::spawn(server_dir, jar, config).await?;
        Ok(Arc::new(process) as Arc<dyn GameDriver>)
    }
}

/// A managed JVM process. The launch parameters are retained so the same
/// driver can relaunch itself on `restart`.
pub struct JavaProcess {
    server_dir: PathBuf,
    jar: PathBuf,
    config: ServerConfig,
    status_tx: Arc<watch::Sender<GameStatus>>,
    event_tx: broadcast::Sender<GameEvent>,
    stdin: Mutex<Option<ChildStdin>>,
    kill: StdMutex<Arc<Notify>>,
}

impl JavaProcess {
    async fn spawn(server_dir: &Path, jar: &Path, config: &ServerConfig) -> Result<Self> {
        // a missing artifact is a spawn failure, not a late JVM error
        if !tokio::fs::try_exists(jar).await.unwrap_or(false) {
            return Err(ServerError::Spawn {
                source: io::Error::new(
                    io::ErrorKind::NotFound,
                    format!("server jar not found: {}", jar.display()),
                ),
            });
        }

        let (status_tx, _) = watch::channel(GameStatus::Starting);
        let (event_tx, _) = broadcast::channel(64);
        let process = Self {
            server_dir: server_dir.to_path_buf(),
            jar: jar.to_path_buf(),
            config: config.clone(),
            status_tx: Arc::new(status_tx),
            event_tx,
            stdin: Mutex::new(None),
            kill: StdMutex::new(Arc::new(Notify::new())),
        };
        process.spawn_child().await?;
        Ok(process)
    }

    async fn spawn_child(&self) -> Result<()> {
        let mut cmd = Command::new(&self.config.java_path);
        cmd.arg(format!("-Xms{}", self.config.min_ram))
            .arg(format!("-Xmx{}", self.config.max_ram))
            .args(&self.config.jvm_args)
            .arg("-jar")
            .arg(&self.jar)
            .arg("nogui")
            .current_dir(&self.server_dir)
            .envs(&self.config.env)
            .stdin(std::process::Stdio::piped())
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped())
            .kill_on_drop(true);

        let mut child = cmd.spawn().map_err(|source| ServerError::Spawn { source })?;
        let pid = child.id().unwrap_or(0);
        info!("spawned server process (pid={})", pid);

        self.status_tx.send_replace(GameStatus::Starting);
        *self.stdin.lock().await = Some(child.stdin.take().unwrap());
        let stdout = child.stdout.take().unwrap();
        let stderr = child.stderr.take().unwrap();

        // fresh kill handle per child, so a stale permit from a previous
        // generation can never reap the new process
        let kill = Arc::new(Notify::new());
        *self.kill.lock().unwrap() = kill.clone();

        tokio::spawn({
            let status_tx = Arc::clone(&self.status_tx);
            let event_tx = self.event_tx.clone();

            async move {
                let mut stdout = BufReader::new(stdout).lines();
                let mut stderr = BufReader::new(stderr).lines();
                loop {
                    select! {
                        line = stdout.next_line() => {
                            if let Ok(Some(line)) = line {
                                handle_line(&line, &status_tx, &event_tx);
                            }
                        }
                        line = stderr.next_line() => {
                            if let Ok(Some(line)) = line {
                                handle_line(&line, &status_tx, &event_tx);
                            }
                        }
                        result = child.wait() => {
                            match result {
                                Ok(code) => debug!("server process exited: {}", code),
                                Err(err) => warn!("could not reap server process: {}", err),
                            }
                            mark_stopped(&status_tx, &event_tx);
                            break;
                        }
                        _ = kill.notified() => {
                            if let Err(err) = child.kill().await {
                                warn!("could not kill process (pid={}): {}", pid, err);
                            }
                            mark_stopped(&status_tx, &event_tx);
                            break;
                        }
                    }
                }
            }
        });

        Ok(())
    }
}

fn handle_line(
    line: &str,
    status_tx: &watch::Sender<GameStatus>,
    event_tx: &broadcast::Sender<GameEvent>,
) {
    if let Some(event) = parse_line(line) {
        debug!("console event {:?} from: {}", event, line.trim_end());
        if let GameEvent::Status(status) = &event {
            status_tx.send_replace(*status);
        }
        let _ = event_tx.send(event);
    }
}

fn mark_stopped(status_tx: &watch::Sender<GameStatus>, event_tx: &broadcast::Sender<GameEvent>) {
    // a crash report already explains the exit; keep it visible
    if *status_tx.borrow() != GameStatus::Crashed {
        status_tx.send_replace(GameStatus::Stopped);
        let _ = event_tx.send(GameEvent::Status(GameStatus::Stopped));
    }
}

#[async_trait]
impl GameDriver for JavaProcess {
    fn status(&self) -> GameStatus {
        *self.status_tx.borrow()
    }

    fn events(&self) -> broadcast::Receiver<GameEvent> {
        self.event_tx.subscribe()
    }

    async fn send_command(&self, line: &str) -> Result<()> {
        let mut stdin = self.stdin.lock().await;
        let Some(stdin) = stdin.as_mut() else {
            return Err(ServerError::NotRunning);
        };
        stdin.write_all(line.as_bytes()).await?;
        stdin.write_all(b"\n").await?;
        stdin.flush().await?;
        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        if matches!(self.status(), GameStatus::Stopped | GameStatus::Crashed) {
            return Ok(());
        }

        if self.send_command("stop").await.is_err() {
            // control channel is gone, force the issue
            self.kill.lock().unwrap().notify_one();
        }

        let mut rx = self.status_tx.subscribe();
        let exited = rx.wait_for(|s| matches!(s, GameStatus::Stopped | GameStatus::Crashed));
        if timeout(SHUTDOWN_WAIT, exited).await.is_err() {
            warn!("graceful shutdown timed out, killing the process");
            self.kill.lock().unwrap().notify_one();
            let mut rx = self.status_tx.subscribe();
            let _ = timeout(
                Duration::from_secs(5),
                rx.wait_for(|s| matches!(s, GameStatus::Stopped | GameStatus::Crashed)),
            )
            .await;
        }

        *self.stdin.lock().await = None;
        Ok(())
    }

    async fn restart(&self) -> Result<()> {
        self.stop().await?;
        self.spawn_child().await?;

        let mut rx = self.status_tx.subscribe();
        let settled = rx.wait_for(|s| {
            matches!(
                s,
                GameStatus::Running | GameStatus::Stopped | GameStatus::Crashed
            )
        });
        let result = match timeout(STARTUP_WAIT, settled).await {
            Err(_) => Err(ServerError::Timeout {
                waiting_for: "server startup",
            }),
            Ok(result) => match result.map(|status| *status) {
                Ok(GameStatus::Running) => Ok(()),
                _ => Err(ServerError::Spawn {
                    source: io::Error::other("server exited during restart"),
                }),
            },
        };
        result
    }
}
