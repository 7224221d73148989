use std::ffi::OsString;
use std::io;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::process::Command;

/// Produces an SSH key pair at `path` (private) and `path.pub` (public).
#[async_trait]
pub trait KeyGenerator: Send + Sync {
    async fn generate(&self, path: &Path) -> io::Result<()>;
}

/// Generates keys with the system `ssh-keygen`.
#[derive(Debug, Clone, Copy, Default)]
pub struct SshKeygen;

#[async_trait]
impl KeyGenerator for SshKeygen {
    async fn generate(&self, path: &Path) -> io::Result<()> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        // ssh-keygen prompts instead of overwriting
        for stale in [path.to_path_buf(), public_key_path(path)] {
            match tokio::fs::remove_file(&stale).await {
                Err(e) if e.kind() != io::ErrorKind::NotFound => return Err(e),
                _ => {}
            }
        }

        let output = Command::new("ssh-keygen")
            .args(["-t", "rsa", "-b", "2048", "-N", "", "-q", "-f"])
            .arg(path)
            .output()
            .await?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(io::Error::other(format!(
                "ssh-keygen exited with {}: {}",
                output.status,
                stderr.trim()
            )));
        }

        tracing::debug!(path = %path.display(), "generated ssh key pair");
        Ok(())
    }
}

pub fn public_key_path(private_key: &Path) -> PathBuf {
    let mut path = OsString::from(private_key.as_os_str());
    path.push(".pub");
    PathBuf::from(path)
}

/// Read back the public half of the pair at `private_key`, trimmed.
pub async fn read_public_key(private_key: &Path) -> io::Result<String> {
    let key = tokio::fs::read_to_string(public_key_path(private_key)).await?;
    Ok(key.trim().to_string())
}
