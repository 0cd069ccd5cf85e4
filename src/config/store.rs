//! Loading and change detection for the router config file.

use crate::config::{build_table, RawConfig, RoutingTable};
use crate::error::{Result, RouterError};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant, SystemTime};

/// Loads the TOML config and tracks its content hash and mtime so the
/// hot-reload loop can poll cheaply.
///
/// Change detection is rate-limited: `has_changed` returns false without
/// touching the filesystem when called more often than `poll_interval`.
/// When the mtime has moved it falls back to a content hash, so a
/// touch-without-edit does not trigger a reload.
#[derive(Debug)]
pub struct ConfigStore {
    path: Option<PathBuf>,
    poll_interval: Duration,
    last_hash: Option<String>,
    last_mtime: Option<SystemTime>,
    last_check: Option<Instant>,
}

impl ConfigStore {
    /// Uses the given path, or searches the standard locations when `None`.
    pub fn new(path: Option<PathBuf>) -> Self {
        Self {
            path: path.or_else(Self::locate),
            poll_interval: Duration::from_secs(1),
            last_hash: None,
            last_mtime: None,
            last_check: None,
        }
    }

    /// A store with no backing file; `load` yields an empty table.
    pub fn detached() -> Self {
        Self {
            path: None,
            poll_interval: Duration::from_secs(1),
            last_hash: None,
            last_mtime: None,
            last_check: None,
        }
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// First existing candidate: `./mcpmux.toml`, `./config/mcpmux.toml`,
    /// `~/.config/mcpmux/mcpmux.toml`, `/etc/mcpmux/mcpmux.toml`.
    pub fn locate() -> Option<PathBuf> {
        let mut candidates = vec![
            PathBuf::from("mcpmux.toml"),
            PathBuf::from("config/mcpmux.toml"),
        ];
        if let Some(config_dir) = dirs::config_dir() {
            candidates.push(config_dir.join("mcpmux").join("mcpmux.toml"));
        }
        candidates.push(PathBuf::from("/etc/mcpmux/mcpmux.toml"));
        candidates.into_iter().find(|p| p.is_file())
    }

    /// Reads and parses the config into a fresh routing table.
    ///
    /// A missing file is not an error; it yields an empty table so the
    /// router can start before any config exists.
    pub async fn load(&mut self) -> Result<RoutingTable> {
        let Some(path) = self.path.clone() else {
            return Ok(RoutingTable::empty());
        };

        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "config file not found, using empty table");
                return Ok(RoutingTable::empty());
            }
            Err(err) => return Err(RouterError::ConfigIo(err)),
        };

        let text = String::from_utf8_lossy(&bytes);
        let raw: RawConfig = toml::from_str(&text)?;

        self.last_hash = Some(content_hash(&bytes));
        self.last_mtime = tokio::fs::metadata(&path)
            .await
            .ok()
            .and_then(|m| m.modified().ok());

        let table = build_table(raw);
        tracing::debug!(
            path = %path.display(),
            servers = table.servers.len(),
            "loaded config"
        );
        Ok(table)
    }

    /// Whether the file content differs from the last `load`.
    ///
    /// Rate-limited by the poll interval; a vanished file reports false.
    pub async fn has_changed(&mut self) -> bool {
        let Some(path) = self.path.clone() else {
            return false;
        };

        let now = Instant::now();
        if let Some(last) = self.last_check {
            if now.duration_since(last) < self.poll_interval {
                return false;
            }
        }
        self.last_check = Some(now);

        let mtime = match tokio::fs::metadata(&path).await {
            Ok(meta) => meta.modified().ok(),
            Err(_) => return false,
        };
        if mtime.is_some() && mtime == self.last_mtime {
            return false;
        }

        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(_) => return false,
        };
        let hash = content_hash(&bytes);
        if Some(&hash) == self.last_hash.as_ref() {
            self.last_mtime = mtime;
            return false;
        }

        self.last_hash = Some(hash);
        self.last_mtime = mtime;
        true
    }
}

fn content_hash(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}
