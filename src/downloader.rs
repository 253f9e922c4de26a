use std::io::Read as _;
use std::path::{Component, Path, PathBuf};
use std::time::Duration;

use futures_util::StreamExt;
use md5::{Digest, Md5};
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

use crate::error::AgentError;

const CLEANUP_RETRIES: u32 = 3;
const CLEANUP_RETRY_DELAY: Duration = Duration::from_millis(50);

/// URL -> local file with streaming MD5, bounded cleanup retries, safe
/// unpack into a target directory (component C, `spec.md` §4.4).
pub struct Downloader {
    http: reqwest::Client,
}

impl Default for Downloader {
    fn default() -> Self {
        Self::new()
    }
}

impl Downloader {
    pub fn new() -> Self {
        Self {
            http: reqwest::Client::new(),
        }
    }

    /// Implements `spec.md` §4.3 install steps 3-7: create `target_dir`,
    /// download `url` while streaming MD5, verify against `expected_md5`,
    /// unpack as a zip archive, then delete the archive. On any failure the
    /// target directory (and `algorithm_dir` if it is now empty) is removed
    /// before returning.
    pub async fn install(
        &self,
        target_dir: &Path,
        algorithm_dir: &Path,
        url: &str,
        expected_md5: &str,
    ) -> Result<(), AgentError> {
        tokio::fs::create_dir_all(target_dir)
            .await
            .map_err(|e| AgentError::FilesystemIo(format!("create {}: {e}", target_dir.display())))?;
        apply_dir_mode(target_dir);

        let archive_path = match self.download(target_dir, url, expected_md5).await {
            Ok(path) => path,
            Err(e) => {
                cleanup(target_dir, algorithm_dir).await;
                return Err(e);
            }
        };

        if let Err(e) = unpack(&archive_path, target_dir) {
            let _ = std::fs::remove_file(&archive_path);
            cleanup(target_dir, algorithm_dir).await;
            return Err(e);
        }

        // Finalize: best-effort removal of the archive itself.
        if let Err(e) = std::fs::remove_file(&archive_path) {
            warn!(path = %archive_path.display(), error = %e, "failed to remove downloaded archive");
        }

        Ok(())
    }

    async fn download(
        &self,
        target_dir: &Path,
        url: &str,
        expected_md5: &str,
    ) -> Result<PathBuf, AgentError> {
        let file_name = file_name_from_url(url);
        let target_path = target_dir.join(&file_name);

        info!(url, path = %target_path.display(), "downloading algorithm archive");

        let response = self
            .http
            .get(url)
            .send()
            .await
            .map_err(|e| AgentError::DownloadTransport(e.to_string()))?;

        if !response.status().is_success() {
            return Err(AgentError::DownloadHttpStatus(response.status().as_u16()));
        }

        let mut file = tokio::fs::File::create(&target_path)
            .await
            .map_err(|e| AgentError::FilesystemIo(format!("create {}: {e}", target_path.display())))?;

        let mut hasher = Md5::new();
        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| AgentError::DownloadTransport(e.to_string()))?;
            hasher.update(&chunk);
            file.write_all(&chunk)
                .await
                .map_err(|e| AgentError::FilesystemIo(e.to_string()))?;
        }
        file.flush().await.map_err(|e| AgentError::FilesystemIo(e.to_string()))?;

        let computed = hex::encode(hasher.finalize());
        if !computed.eq_ignore_ascii_case(expected_md5) {
            let _ = std::fs::remove_file(&target_path);
            return Err(AgentError::HashMismatch {
                expected: expected_md5.to_string(),
                actual: computed,
            });
        }

        debug!(path = %target_path.display(), md5 = %computed, "download verified");
        Ok(target_path)
    }
}

fn file_name_from_url(url: &str) -> String {
    let name = url
        .rsplit('/')
        .next()
        .unwrap_or("")
        .split('?')
        .next()
        .unwrap_or("");
    if name.is_empty() || name == "." {
        "algorithm.bin".to_string()
    } else {
        name.to_string()
    }
}

/// Unpack `archive_path` (a zip file) into `target_dir`, rejecting any entry
/// whose cleaned path escapes `target_dir` (`spec.md` §4.3 step 6).
fn unpack(archive_path: &Path, target_dir: &Path) -> Result<(), AgentError> {
    let file = std::fs::File::open(archive_path)
        .map_err(|e| AgentError::UnpackFailure(format!("open archive: {e}")))?;
    let mut archive =
        zip::ZipArchive::new(file).map_err(|e| AgentError::UnpackFailure(e.to_string()))?;

    for i in 0..archive.len() {
        let mut entry = archive
            .by_index(i)
            .map_err(|e| AgentError::UnpackFailure(e.to_string()))?;
        let relative = match entry.enclosed_name() {
            Some(path) => path,
            None => {
                return Err(AgentError::PathTraversal(entry.name().to_string()));
            }
        };
        if relative
            .components()
            .any(|c| matches!(c, Component::ParentDir | Component::Prefix(_)))
        {
            return Err(AgentError::PathTraversal(entry.name().to_string()));
        }

        let dest = target_dir.join(&relative);
        if !dest.starts_with(target_dir) {
            return Err(AgentError::PathTraversal(entry.name().to_string()));
        }

        if entry.is_dir() {
            std::fs::create_dir_all(&dest)
                .map_err(|e| AgentError::UnpackFailure(format!("mkdir {}: {e}", dest.display())))?;
            apply_mode(&dest, entry.unix_mode());
            continue;
        }

        if let Some(parent) = dest.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| AgentError::UnpackFailure(format!("mkdir {}: {e}", parent.display())))?;
        }
        let mut out = std::fs::File::create(&dest)
            .map_err(|e| AgentError::UnpackFailure(format!("create {}: {e}", dest.display())))?;
        let mut buf = Vec::with_capacity(entry.size() as usize);
        entry
            .read_to_end(&mut buf)
            .map_err(|e| AgentError::UnpackFailure(e.to_string()))?;
        std::io::Write::write_all(&mut out, &buf)
            .map_err(|e| AgentError::UnpackFailure(e.to_string()))?;
        apply_mode(&dest, entry.unix_mode());
    }

    Ok(())
}

#[cfg(unix)]
fn apply_mode(path: &Path, mode: Option<u32>) {
    use std::os::unix::fs::PermissionsExt;
    if let Some(mode) = mode {
        let _ = std::fs::set_permissions(path, std::fs::Permissions::from_mode(mode));
    }
}

#[cfg(not(unix))]
fn apply_mode(_path: &Path, _mode: Option<u32>) {}

#[cfg(unix)]
fn apply_dir_mode(path: &Path) {
    use std::os::unix::fs::PermissionsExt;
    let _ = std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o755));
}

#[cfg(not(unix))]
fn apply_dir_mode(_path: &Path) {}

/// Remove `target_dir`, then `algorithm_dir` if it is now empty, with a
/// short bounded retry to tolerate OS file-handle release lag
/// (`spec.md` §4.3 step 4, §4.4).
async fn cleanup(target_dir: &Path, algorithm_dir: &Path) {
    remove_dir_with_retry(target_dir).await;
    if dir_is_empty(algorithm_dir) {
        remove_dir_with_retry(algorithm_dir).await;
    }
}

async fn remove_dir_with_retry(path: &Path) {
    if !path.exists() {
        return;
    }
    for attempt in 1..=CLEANUP_RETRIES {
        match std::fs::remove_dir_all(path) {
            Ok(()) => return,
            Err(e) if attempt == CLEANUP_RETRIES => {
                warn!(path = %path.display(), error = %e, "giving up removing directory after retries");
            }
            Err(_) => tokio::time::sleep(CLEANUP_RETRY_DELAY).await,
        }
    }
}

fn dir_is_empty(path: &Path) -> bool {
    match std::fs::read_dir(path) {
        Ok(mut entries) => entries.next().is_none(),
        Err(_) => false,
    }
}
