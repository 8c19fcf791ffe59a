//! Purpose: The durable server config: listen port plus the mount table.
//! Exports: `DEFAULT_PORT`, `default_config_path`, `load`, `LoadedConfig`,
//! Exports: `FileConfigSink`.
//! Role: One JSON document, read at startup and rewritten on every change.
//! Invariants: Writes replace the file via a temp file and rename.
//! Invariants: A missing file means defaults; a malformed one is an error.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU16, Ordering};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::task;

use crate::core::backend::ConfigSink;
use crate::core::error::{ApiResult, Error};
use crate::core::mount::{MountConfig, MountTable};
use crate::core::path::VPath;

pub const DEFAULT_PORT: u16 = 20223;

pub fn default_config_path() -> PathBuf {
    let home = std::env::var_os("HOME").unwrap_or_default();
    PathBuf::from(home).join(".quarry").join("config.json")
}

/// On-disk shape: `{"server": {"port": N}, "mounts": {"/path/": {...}}}`.
/// Both sections are optional on read.
#[derive(Debug, Default, Serialize, Deserialize)]
struct Document {
    #[serde(default)]
    server: ServerSection,
    #[serde(default)]
    mounts: BTreeMap<String, MountConfig>,
}

#[derive(Debug, Serialize, Deserialize)]
struct ServerSection {
    #[serde(default = "default_port")]
    port: u16,
}

impl Default for ServerSection {
    fn default() -> ServerSection {
        ServerSection { port: DEFAULT_PORT }
    }
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

#[derive(Debug)]
pub struct LoadedConfig {
    pub port: u16,
    pub table: MountTable,
}

/// Reads the config file. Absence is not an error; anything else that
/// stops the document from loading cleanly is, since starting with a
/// silently truncated mount table would look like data loss.
pub fn load(path: &Path) -> ApiResult<LoadedConfig> {
    let text = match std::fs::read_to_string(path) {
        Ok(text) => text,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            return Ok(LoadedConfig {
                port: DEFAULT_PORT,
                table: MountTable::new(),
            });
        }
        Err(err) => {
            return Err(Error::env_connection(format!(
                "cannot read {}: {err}",
                path.display()
            )));
        }
    };
    let document: Document = serde_json::from_str(&text).map_err(|err| {
        Error::env_invalid_config(format!("cannot parse {}: {err}", path.display()))
    })?;
    let mut table = MountTable::new();
    for (key, config) in document.mounts {
        let path = VPath::parse(&key)
            .map_err(|err| Error::env_invalid_config(format!("mount {key:?}: {err}")))?;
        config
            .validate_at(&path)
            .map_err(|err| Error::env_invalid_config(format!("mount {key:?}: {err}")))?;
        table
            .check_overlap(&path)
            .map_err(|err| Error::env_invalid_config(format!("mount {key:?}: {err}")))?;
        table.insert(path, config);
    }
    Ok(LoadedConfig {
        port: document.server.port,
        table,
    })
}

fn write_atomic(path: &Path, text: &str) -> ApiResult<()> {
    let describe = |err: std::io::Error| {
        Error::env_connection(format!("cannot write {}: {err}", path.display()))
    };
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(describe)?;
    }
    let tmp = path.with_extension("json.tmp");
    std::fs::write(&tmp, text).map_err(describe)?;
    std::fs::rename(&tmp, path).map_err(describe)?;
    Ok(())
}

/// Persists the table (and the current port) back to the config file.
/// The port lives here because port changes and mount changes both
/// rewrite the same document.
pub struct FileConfigSink {
    path: PathBuf,
    port: AtomicU16,
}

impl FileConfigSink {
    pub fn new(path: impl Into<PathBuf>, port: u16) -> FileConfigSink {
        FileConfigSink {
            path: path.into(),
            port: AtomicU16::new(port),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn port(&self) -> u16 {
        self.port.load(Ordering::SeqCst)
    }

    pub fn set_port(&self, port: u16) {
        self.port.store(port, Ordering::SeqCst);
    }

    fn render(&self, table: &MountTable) -> ApiResult<String> {
        let document = Document {
            server: ServerSection { port: self.port() },
            mounts: table
                .iter()
                .map(|(path, config)| (path.to_string(), config.clone()))
                .collect(),
        };
        serde_json::to_string_pretty(&document)
            .map_err(|err| Error::env_unexpected(format!("cannot encode the config: {err}")))
    }
}

#[async_trait]
impl ConfigSink for FileConfigSink {
    async fn persist(&self, table: &MountTable) -> ApiResult<()> {
        let text = self.render(table)?;
        let path = self.path.clone();
        task::spawn_blocking(move || write_atomic(&path, &text))
            .await
            .map_err(|err| Error::env_unexpected(format!("blocking task failed: {err}")))?
    }
}
