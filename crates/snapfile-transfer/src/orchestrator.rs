//! Encrypted upload and download of whole files.
//!
//! Uploads stream `file -> EncryptingStream -> request body`, downloads stream
//! `response body -> DecryptingStream -> temp file -> rename`. Nothing is held
//! in memory beyond one read buffer and one chunk.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use futures::{StreamExt, TryStreamExt};
use snapfile_core::{SnapfileError, SnapfileResult};
use snapfile_crypto::{ChunkCodec, DecryptingStream, EncryptingStream, SessionKey, StreamError};
use tokio::io::AsyncWriteExt;
use tokio_util::io::ReaderStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::api::ApiClient;

/// Progress callback: (bytes_done, bytes_total, file_name)
pub type ProgressFn = Arc<dyn Fn(u64, u64, &str) + Send + Sync>;

const DEFAULT_READ_BUFFER: usize = 1024 * 1024;

/// Result of uploading a single file.
#[derive(Debug, Clone)]
pub struct UploadResult {
    pub path: PathBuf,
    /// Name the file was stored under
    pub name: String,
    /// Plaintext size
    pub bytes: u64,
    /// Bytes actually sent
    pub encrypted_bytes: u64,
    /// Status text returned by the server
    pub status: String,
}

/// Per-file entry of [`TransferOrchestrator::upload_batch`].
#[derive(Debug)]
pub struct UploadOutcome {
    pub path: PathBuf,
    pub result: SnapfileResult<UploadResult>,
}

#[derive(Debug, Clone)]
pub struct DownloadResult {
    pub file_id: String,
    pub local_path: PathBuf,
    /// Plaintext bytes written
    pub bytes: u64,
}

pub struct TransferOrchestrator {
    api: ApiClient,
    key: Arc<SessionKey>,
    codec: ChunkCodec,
    read_buffer_size: usize,
}

impl TransferOrchestrator {
    pub fn new(api: ApiClient, key: Arc<SessionKey>, codec: ChunkCodec) -> Self {
        Self {
            api,
            key,
            codec,
            read_buffer_size: DEFAULT_READ_BUFFER,
        }
    }

    pub fn with_read_buffer_size(mut self, size: usize) -> Self {
        self.read_buffer_size = size.max(1);
        self
    }

    pub fn api(&self) -> &ApiClient {
        &self.api
    }

    /// Encrypt `path` on the fly and POST it to `/files`.
    ///
    /// The request carries the exact ciphertext length as `Content-Length`.
    /// Cancelling `cancel` drops the request together with its body stream
    /// and file handle, and returns [`SnapfileError::Cancelled`].
    pub async fn upload_file(
        &self,
        path: &Path,
        progress: Option<&ProgressFn>,
        cancel: &CancellationToken,
    ) -> SnapfileResult<UploadResult> {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .ok_or_else(|| SnapfileError::Config(format!("not a file: {}", path.display())))?;
        let name = sanitize_file_name(&name)?;

        let file = tokio::fs::File::open(path).await?;
        let plain_len = file.metadata().await?.len();
        let total = self.codec.encrypted_len(plain_len);

        let encrypted = EncryptingStream::new(
            ReaderStream::with_capacity(file, self.read_buffer_size),
            Arc::clone(&self.key),
            self.codec,
        );
        let body = match progress.cloned() {
            Some(progress) => {
                let label = name.clone();
                let mut sent = 0u64;
                reqwest::Body::wrap_stream(encrypted.inspect_ok(move |unit| {
                    sent += unit.len() as u64;
                    progress(sent, total, &label);
                }))
            }
            None => reqwest::Body::wrap_stream(encrypted),
        };

        debug!(path = %path.display(), plain_len, total, "upload starting");
        let status = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                info!(name = %name, "upload cancelled");
                return Err(SnapfileError::Cancelled);
            }
            status = self.api.upload(&name, body, total) => status?,
        };

        info!(name = %name, bytes = plain_len, "uploaded");
        Ok(UploadResult {
            path: path.to_path_buf(),
            name,
            bytes: plain_len,
            encrypted_bytes: total,
            status,
        })
    }

    /// Upload files one after another. A failure is recorded in that file's
    /// outcome and the batch moves on; after cancellation every remaining
    /// file is reported as cancelled.
    pub async fn upload_batch(
        &self,
        paths: &[PathBuf],
        progress: Option<&ProgressFn>,
        cancel: &CancellationToken,
    ) -> Vec<UploadOutcome> {
        let mut outcomes = Vec::with_capacity(paths.len());
        for path in paths {
            let result = if cancel.is_cancelled() {
                Err(SnapfileError::Cancelled)
            } else {
                self.upload_file(path, progress, cancel).await
            };
            if let Err(e) = &result {
                warn!(path = %path.display(), error = %e, "upload failed");
            }
            outcomes.push(UploadOutcome {
                path: path.clone(),
                result,
            });
        }
        outcomes
    }

    /// Fetch `file_id`, decrypt it and store it as `dest_dir/<name>`.
    ///
    /// Data lands in a hidden temp file that is renamed once the whole
    /// stream has authenticated. An existing file is never replaced: the
    /// download takes the first free `name (N).ext` instead. Any failure
    /// removes the temp file.
    pub async fn download_file(
        &self,
        file_id: &str,
        name: &str,
        dest_dir: &Path,
        progress: Option<&ProgressFn>,
        cancel: &CancellationToken,
    ) -> SnapfileResult<DownloadResult> {
        let name = sanitize_file_name(name)?;
        tokio::fs::create_dir_all(dest_dir).await?;
        let tmp_path = dest_dir.join(format!(".{name}.snapfile-part"));

        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(SnapfileError::Cancelled),
            r = self.fetch_into(file_id, &name, &tmp_path, progress) => r,
        };

        let result = match result {
            Ok(bytes) => place(&tmp_path, dest_dir, &name)
                .await
                .map(|local_path| (local_path, bytes)),
            Err(e) => Err(e),
        };

        match result {
            Ok((local_path, bytes)) => {
                info!(file_id, path = %local_path.display(), bytes, "downloaded");
                Ok(DownloadResult {
                    file_id: file_id.to_string(),
                    local_path,
                    bytes,
                })
            }
            Err(e) => {
                if let Err(rm) = tokio::fs::remove_file(&tmp_path).await {
                    if rm.kind() != std::io::ErrorKind::NotFound {
                        warn!(path = %tmp_path.display(), error = %rm, "could not remove partial download");
                    }
                }
                if matches!(e, SnapfileError::Authentication(_)) {
                    warn!(file_id, "download failed to decrypt");
                }
                Err(e)
            }
        }
    }

    async fn fetch_into(
        &self,
        file_id: &str,
        name: &str,
        tmp_path: &Path,
        progress: Option<&ProgressFn>,
    ) -> SnapfileResult<u64> {
        let resp = self.api.download(file_id, name).await?;
        let total = resp.content_length().unwrap_or(0);

        let progress = progress.cloned();
        let label = name.to_string();
        let mut received = 0u64;
        let source = resp.bytes_stream().inspect_ok(move |fragment| {
            received += fragment.len() as u64;
            if let Some(progress) = &progress {
                progress(received, total.max(received), &label);
            }
        });
        let mut plain = DecryptingStream::new(Box::pin(source), Arc::clone(&self.key), self.codec);

        let mut file = tokio::fs::File::create(tmp_path).await?;
        let mut written = 0u64;
        while let Some(chunk) = plain.next().await {
            let chunk = chunk.map_err(stream_error)?;
            file.write_all(&chunk).await?;
            written += chunk.len() as u64;
        }
        file.flush().await?;
        Ok(written)
    }
}

/// Move a finished download to the first name in `dir` that is not taken.
async fn place(tmp_path: &Path, dir: &Path, name: &str) -> SnapfileResult<PathBuf> {
    let mut target = dir.join(name);
    let mut n = 0u32;
    while tokio::fs::try_exists(&target).await? {
        n = n.checked_add(1).ok_or_else(|| {
            SnapfileError::Protocol(format!("no free file name for {name:?}"))
        })?;
        target = dir.join(numbered_name(name, n));
    }
    tokio::fs::rename(tmp_path, &target).await?;
    Ok(target)
}

/// `report.pdf` -> `report (2).pdf`; names without an extension get the suffix.
fn numbered_name(name: &str, n: u32) -> String {
    let path = Path::new(name);
    match (path.file_stem(), path.extension()) {
        (Some(stem), Some(ext)) => format!(
            "{} ({n}).{}",
            stem.to_string_lossy(),
            ext.to_string_lossy()
        ),
        _ => format!("{name} ({n})"),
    }
}

fn stream_error(e: StreamError) -> SnapfileError {
    match e {
        StreamError::Crypto(e) => e.into(),
        StreamError::Source(e) => SnapfileError::Transport(format!("download interrupted: {e}")),
    }
}

/// Reduce a server-supplied name to its final path component.
///
/// # Errors
///
/// Returns [`SnapfileError::Protocol`] when nothing usable remains.
pub fn sanitize_file_name(name: &str) -> SnapfileResult<String> {
    let last = name.rsplit(['/', '\\']).next().unwrap_or_default();
    let clean: String = last.chars().filter(|c| !c.is_control()).collect();
    let clean = clean.trim();
    if clean.is_empty() || clean == "." || clean == ".." {
        return Err(SnapfileError::Protocol(format!("unusable file name {name:?}")));
    }
    Ok(clean.to_string())
}
