use std::io;
use std::path::{Path, PathBuf};

use crate::config::{MachineConfig, machine_dir};
use crate::{Error, Result};

const CONFIG_FILE: &str = "config.json";

/// On-disk machine records, one directory per machine:
/// `<root>/machines/<name>/config.json` next to the SSH key pair.
#[derive(Debug, Clone)]
pub struct MachineStore {
    root: PathBuf,
}

fn store_err(path: &Path) -> impl FnOnce(io::Error) -> Error + '_ {
    move |source| Error::Store {
        path: path.to_path_buf(),
        source,
    }
}

impl MachineStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn machine_dir(&self, name: &str) -> PathBuf {
        machine_dir(&self.root, name)
    }

    fn config_path(&self, name: &str) -> PathBuf {
        self.machine_dir(name).join(CONFIG_FILE)
    }

    /// Whether a record is saved for `name`. Failing to tell is an error,
    /// not a missing record.
    pub async fn exists(&self, name: &str) -> Result<bool> {
        let path = self.config_path(name);
        tokio::fs::try_exists(&path).await.map_err(store_err(&path))
    }

    pub async fn save(&self, config: &MachineConfig) -> Result<()> {
        let dir = self.machine_dir(&config.machine_name);
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(store_err(&dir))?;

        let path = dir.join(CONFIG_FILE);
        let body = serde_json::to_vec_pretty(config)?;
        tokio::fs::write(&path, body)
            .await
            .map_err(store_err(&path))?;

        tracing::debug!(machine = %config.machine_name, path = %path.display(), "saved machine record");
        Ok(())
    }

    pub async fn load(&self, name: &str) -> Result<MachineConfig> {
        let path = self.config_path(name);
        let body = tokio::fs::read(&path).await.map_err(store_err(&path))?;
        let config: MachineConfig = serde_json::from_slice(&body)?;
        config.validate_sizes()?;
        Ok(config)
    }

    /// Delete the machine's directory, keys included.
    pub async fn remove(&self, name: &str) -> Result<()> {
        let dir = self.machine_dir(name);
        match tokio::fs::remove_dir_all(&dir).await {
            Err(e) if e.kind() != io::ErrorKind::NotFound => Err(store_err(&dir)(e)),
            _ => Ok(()),
        }
    }

    /// Names of all machines with a saved record, sorted.
    pub async fn list(&self) -> Result<Vec<String>> {
        let dir = self.root.join("machines");
        let mut entries = match tokio::fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(store_err(&dir)(e)),
        };

        let mut names = Vec::new();
        while let Some(entry) = entries.next_entry().await.map_err(store_err(&dir))? {
            let Some(name) = entry.file_name().to_str().map(str::to_string) else {
                continue;
            };
            if self.exists(&name).await? {
                names.push(name);
            }
        }
        names.sort();
        Ok(names)
    }
}
