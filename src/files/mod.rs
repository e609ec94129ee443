//! Storage of uploaded payment slips under a single upload root.
//!
//! Files live at `<root>/<YYYY-MM-DD>/<32 hex chars><.ext>` and are addressed
//! by the relative URL `/uploads/<YYYY-MM-DD>/<name>`. Every path derived from
//! client input goes through [`UploadStore::resolve`], which refuses anything
//! that would land outside the root.

pub mod upload;

use bytes::Bytes;
use chrono::Utc;
use rand::RngCore;
use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};
use tokio::{fs, io::AsyncWriteExt};
use tracing::{debug, info, warn};

use crate::errors::ServiceError;

pub use upload::{parse_slip_form, SlipUploadForm, StagedFile};

/// Public URL prefix under which stored files are served.
pub const UPLOADS_URL_PREFIX: &str = "/uploads/";

pub const ALLOWED_EXTENSIONS: [&str; 4] = ["jpeg", "jpg", "png", "pdf"];
pub const ALLOWED_CONTENT_TYPES: [&str; 4] =
    ["image/jpeg", "image/jpg", "image/png", "application/pdf"];

const MAX_NAME_ATTEMPTS: usize = 5;

/// A file written to the upload root.
#[derive(Debug, Clone)]
pub struct StoredFile {
    pub path: PathBuf,
    /// `/uploads/<date>/<name>`
    pub url: String,
}

#[derive(Debug, Clone)]
pub struct UploadStore {
    root: PathBuf,
    max_file_size: u64,
}

impl UploadStore {
    pub fn new(root: impl Into<PathBuf>, max_file_size: u64) -> Self {
        Self {
            root: root.into(),
            max_file_size,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn max_file_size(&self) -> u64 {
        self.max_file_size
    }

    /// Creates the upload root if it does not exist yet.
    pub async fn ensure_root(&self) -> Result<(), ServiceError> {
        fs::create_dir_all(&self.root).await?;
        Ok(())
    }

    pub fn too_large_message(&self) -> String {
        format!(
            "File is too large. Maximum size is {} MB.",
            format_megabytes(self.max_file_size)
        )
    }

    /// Writes `file` under today's (UTC) directory with a fresh random name.
    /// The file is opened with create-new semantics; a name collision draws a
    /// new name, up to five attempts.
    pub async fn store(&self, file: &StagedFile) -> Result<StoredFile, ServiceError> {
        let date = Utc::now().format("%Y-%m-%d").to_string();
        let dir = self.root.join(&date);
        fs::create_dir_all(&dir).await?;

        for attempt in 1..=MAX_NAME_ATTEMPTS {
            let name = format!("{}.{}", random_file_stem(), file.extension);
            let path = dir.join(&name);

            let mut handle = match fs::OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&path)
                .await
            {
                Ok(handle) => handle,
                Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                    warn!(attempt, name = %name, "upload name collision, drawing a new name");
                    continue;
                }
                Err(e) => return Err(e.into()),
            };

            if let Err(e) = write_all(&mut handle, &file.bytes).await {
                drop(handle);
                let _ = fs::remove_file(&path).await;
                return Err(e.into());
            }

            info!(path = %path.display(), size = file.bytes.len(), "stored upload");
            return Ok(StoredFile {
                url: format!("{}{}/{}", UPLOADS_URL_PREFIX, date, name),
                path,
            });
        }

        Err(ServiceError::InternalError(
            "Could not allocate a unique upload file name".to_string(),
        ))
    }

    /// Best-effort removal of a stored file whose database record was never written.
    pub async fn discard(&self, stored: &StoredFile) {
        match fs::remove_file(&stored.path).await {
            Ok(()) => debug!(path = %stored.path.display(), "discarded orphaned upload"),
            Err(e) => warn!(path = %stored.path.display(), error = %e, "failed to discard upload"),
        }
    }

    /// Lexically resolves a client-supplied relative path against the root.
    /// `..` may walk back up but never past the root; absolute paths are refused.
    pub fn resolve(&self, relative: &str) -> Result<PathBuf, ServiceError> {
        let normalized = relative.replace('\\', "/");
        let mut parts: Vec<&std::ffi::OsStr> = Vec::new();

        for component in Path::new(&normalized).components() {
            match component {
                Component::Normal(part) => parts.push(part),
                Component::CurDir => {}
                Component::ParentDir => {
                    if parts.pop().is_none() {
                        return Err(access_denied(relative));
                    }
                }
                Component::RootDir | Component::Prefix(_) => return Err(access_denied(relative)),
            }
        }

        let mut resolved = self.root.clone();
        resolved.extend(parts);
        Ok(resolved)
    }

    /// Maps a stored `/uploads/...` URL back to its on-disk path.
    pub fn path_for_url(&self, file_url: &str) -> Result<PathBuf, ServiceError> {
        let relative = file_url
            .strip_prefix(UPLOADS_URL_PREFIX)
            .or_else(|| file_url.strip_prefix("/uploads"))
            .unwrap_or(file_url);
        self.resolve(relative.trim_start_matches('/'))
    }

    /// Resolves `relative` and checks that it names an existing regular file
    /// whose canonical (symlink-free) location is still inside the root.
    pub async fn locate(&self, relative: &str) -> Result<PathBuf, ServiceError> {
        let path = self.resolve(relative)?;
        self.check_file(&path, "File not found").await?;
        Ok(path)
    }

    /// Existence, regular-file and canonical containment checks for a resolved path.
    pub async fn check_file(&self, path: &Path, missing_message: &str) -> Result<(), ServiceError> {
        let metadata = match fs::metadata(path).await {
            Ok(metadata) => metadata,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!(path = %path.display(), "requested file missing");
                return Err(ServiceError::NotFound(missing_message.to_string()));
            }
            Err(e) => return Err(e.into()),
        };

        let canonical_root = fs::canonicalize(&self.root).await?;
        let canonical = fs::canonicalize(path).await?;
        if !canonical.starts_with(&canonical_root) {
            warn!(path = %path.display(), "symlink escapes upload root");
            return Err(ServiceError::Forbidden("Access denied".to_string()));
        }

        if !metadata.is_file() {
            return Err(ServiceError::BadRequest("Not a valid file".to_string()));
        }
        Ok(())
    }
}

async fn write_all(handle: &mut fs::File, bytes: &Bytes) -> std::io::Result<()> {
    handle.write_all(bytes).await?;
    handle.flush().await?;
    handle.sync_all().await
}

fn access_denied(relative: &str) -> ServiceError {
    warn!(requested = %relative, "path traversal attempt blocked");
    ServiceError::Forbidden("Access denied".to_string())
}

/// 16 random bytes, hex encoded.
fn random_file_stem() -> String {
    let mut bytes = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

fn format_megabytes(bytes: u64) -> String {
    const MIB: u64 = 1024 * 1024;
    if bytes % MIB == 0 {
        (bytes / MIB).to_string()
    } else {
        format!("{:.1}", bytes as f64 / MIB as f64)
    }
}
