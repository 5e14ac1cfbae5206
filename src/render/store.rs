//! Artifact store: uploads, per-request temp files and allow-listed reads.
//!
//! Everything lives under one public root with two subdirectories,
//! `uploads/` for reference recordings and `temp/` for generated audio.
//! Files are named after a per-request UUID so concurrent requests never
//! share a path.

use std::path::{Component, Path, PathBuf};
use thiserror::Error;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::debug;
use uuid::Uuid;

use crate::policy;

pub const TEMP_DIR: &str = "temp";
pub const UPLOADS_DIR: &str = "uploads";

/// Route that serves stored files back to clients.
pub const SERVE_ROUTE: &str = "/api/serve-audio";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid filename: {0}")]
    InvalidFilename(String),

    #[error("Unsupported file type: {0}")]
    UnsupportedFileType(String),

    #[error("File too large: {0} bytes (max: {1})")]
    FileTooLarge(u64, u64),

    #[error("Empty file")]
    EmptyFile,

    #[error("Access denied: {0}")]
    AccessDenied(String),

    #[error("File not found: {0}")]
    NotFound(String),
}

/// A saved upload.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredUpload {
    pub path: PathBuf,
    /// Path relative to the public root, e.g. `uploads/<id>_voice.wav`.
    pub public_path: String,
    pub file_name: String,
    pub original_name: String,
    pub size: u64,
}

/// Temp file namer for a single request.
#[derive(Debug, Clone)]
pub struct RequestScope {
    id: String,
    temp_dir: PathBuf,
}

impl RequestScope {
    pub fn id(&self) -> &str {
        &self.id
    }

    /// `temp/<request id>_<label>.<extension>`
    pub fn file(&self, label: &str, extension: &str) -> PathBuf {
        self.temp_dir
            .join(format!("{}_{}.{}", self.id, label, extension))
    }
}

#[derive(Debug, Clone)]
pub struct ArtifactStore {
    root: PathBuf,
    max_upload_bytes: u64,
}

impl ArtifactStore {
    pub fn new(root: impl Into<PathBuf>, max_upload_bytes: u64) -> Self {
        Self {
            root: root.into(),
            max_upload_bytes,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn max_upload_bytes(&self) -> u64 {
        self.max_upload_bytes
    }

    /// Creates the root and both subdirectories.
    pub async fn init(&self) -> Result<(), StoreError> {
        fs::create_dir_all(self.root.join(TEMP_DIR)).await?;
        fs::create_dir_all(self.root.join(UPLOADS_DIR)).await?;
        Ok(())
    }

    /// Opens a fresh naming scope. Nothing is written until a file is used.
    pub fn scope(&self) -> RequestScope {
        RequestScope {
            id: Uuid::new_v4().simple().to_string(),
            temp_dir: self.root.join(TEMP_DIR),
        }
    }

    /// Validates and writes an uploaded reference recording.
    pub async fn save_upload(
        &self,
        filename: &str,
        content_type: Option<&str>,
        data: &[u8],
    ) -> Result<StoredUpload, StoreError> {
        let size = data.len() as u64;
        if size == 0 {
            return Err(StoreError::EmptyFile);
        }
        if size > self.max_upload_bytes {
            return Err(StoreError::FileTooLarge(size, self.max_upload_bytes));
        }

        let safe_name = sanitize_filename(filename)?;
        let extension = audio_extension(&safe_name, content_type, data)
            .ok_or_else(|| StoreError::UnsupportedFileType(filename.to_string()))?;

        let stem = Path::new(&safe_name)
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("audio");
        let file_name = format!("{}_{}.{}", Uuid::new_v4().simple(), stem, extension);

        let dir = self.root.join(UPLOADS_DIR);
        fs::create_dir_all(&dir).await?;
        let path = dir.join(&file_name);
        let mut file = fs::File::create(&path).await?;
        file.write_all(data).await?;
        file.flush().await?;

        debug!("Stored upload {} ({} bytes)", file_name, size);
        Ok(StoredUpload {
            public_path: format!("{}/{}", UPLOADS_DIR, file_name),
            path,
            file_name,
            original_name: filename.to_string(),
            size,
        })
    }

    /// Path of `file` relative to the root, if it lives in an allowed directory.
    pub fn public_path(&self, file: &Path) -> Option<String> {
        let relative = file.strip_prefix(&self.root).ok()?;
        let rendered = relative
            .components()
            .map(|c| c.as_os_str().to_str())
            .collect::<Option<Vec<_>>>()?
            .join("/");
        allow_listed_dir(&rendered).map(|_| rendered)
    }

    /// URL under which `file` is served.
    pub fn public_url(&self, file: &Path) -> Option<String> {
        self.public_path(file)
            .map(|p| format!("{}?path={}", SERVE_ROUTE, urlencoding::encode(&p)))
    }

    /// Maps a client-supplied public path to an existing file.
    ///
    /// Only `temp/` and `uploads/` are reachable; anything else, including
    /// traversal out of them, is denied.
    pub async fn resolve(&self, requested: &str) -> Result<PathBuf, StoreError> {
        let clean = requested.trim_start_matches('/');
        let Some(allowed_dir) = allow_listed_dir(clean) else {
            return Err(StoreError::AccessDenied(requested.to_string()));
        };
        let relative = Path::new(clean);
        if relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_)))
        {
            return Err(StoreError::AccessDenied(requested.to_string()));
        }

        let full = self.root.join(relative);
        let canonical = match fs::canonicalize(&full).await {
            Ok(path) => path,
            Err(_) => return Err(StoreError::NotFound(requested.to_string())),
        };
        // Symlinks inside the folder must not lead out of it.
        let allowed_root = fs::canonicalize(self.root.join(allowed_dir)).await?;
        if !canonical.starts_with(&allowed_root) {
            return Err(StoreError::AccessDenied(requested.to_string()));
        }
        if !fs::metadata(&canonical).await?.is_file() {
            return Err(StoreError::NotFound(requested.to_string()));
        }
        Ok(canonical)
    }
}

/// The allow-listed folder `relative` points into, if any.
fn allow_listed_dir(relative: &str) -> Option<&'static str> {
    [TEMP_DIR, UPLOADS_DIR].into_iter().find(|dir| {
        relative
            .strip_prefix(dir)
            .and_then(|rest| rest.strip_prefix('/'))
            .is_some_and(|rest| !rest.is_empty())
    })
}

/// Strips any directory part and characters unsafe in file names.
pub fn sanitize_filename(filename: &str) -> Result<String, StoreError> {
    let name = Path::new(filename)
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| StoreError::InvalidFilename(filename.to_string()))?;

    if name.contains('\0') || name.starts_with('.') {
        return Err(StoreError::InvalidFilename(filename.to_string()));
    }

    let sanitized: String = name
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' | ' ' => '_',
            c if c.is_control() => '_',
            _ => c,
        })
        .collect();

    if sanitized.is_empty() {
        return Err(StoreError::InvalidFilename(filename.to_string()));
    }
    Ok(sanitized)
}

fn extension_for_mime(mime: &str) -> Option<&'static str> {
    let mime = mime.split(';').next().unwrap_or("").trim();
    if !policy::ALLOWED_AUDIO_MIME_TYPES.contains(&mime) {
        return None;
    }
    match mime {
        "audio/wav" | "audio/x-wav" => Some("wav"),
        "audio/mpeg" => Some("mp3"),
        "audio/mp4" | "audio/m4a" | "audio/x-m4a" => Some("m4a"),
        "audio/ogg" => Some("ogg"),
        "audio/webm" | "video/webm" => Some("webm"),
        _ => None,
    }
}

/// Accepts a file by extension, then declared MIME type, then sniffed content.
pub fn audio_extension(
    filename: &str,
    content_type: Option<&str>,
    data: &[u8],
) -> Option<&'static str> {
    let by_name = Path::new(filename)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_lowercase())
        .and_then(|e| {
            policy::ALLOWED_AUDIO_EXTENSIONS
                .iter()
                .find(|allowed| **allowed == e)
                .copied()
        });

    by_name
        .or_else(|| content_type.and_then(extension_for_mime))
        .or_else(|| infer::get(data).and_then(|kind| extension_for_mime(kind.mime_type())))
}

/// MIME type used when serving a stored file.
pub fn content_type_for(path: &Path) -> &'static str {
    match path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_lowercase())
        .as_deref()
    {
        Some("mp3") => "audio/mpeg",
        Some("wav") => "audio/wav",
        Some("m4a") => "audio/mp4",
        Some("ogg") => "audio/ogg",
        _ => "audio/wav",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engines::wav::silent_wav;

    fn store(dir: &Path) -> ArtifactStore {
        ArtifactStore::new(dir, 1024 * 1024)
    }

    #[test]
    fn test_sanitize_filename() {
        assert_eq!(sanitize_filename("voice.mp3").unwrap(), "voice.mp3");
        assert_eq!(sanitize_filename("/path/to/voice.mp3").unwrap(), "voice.mp3");
        assert_eq!(sanitize_filename("../voice.mp3").unwrap(), "voice.mp3");
        assert_eq!(sanitize_filename("my voice:1.wav").unwrap(), "my_voice_1.wav");
        assert!(sanitize_filename(".hidden").is_err());
        assert!(sanitize_filename("..").is_err());
        assert!(sanitize_filename("").is_err());
    }

    #[test]
    fn test_audio_extension_sources() {
        assert_eq!(audio_extension("a.WAV", None, b""), Some("wav"));
        assert_eq!(audio_extension("a.bin", Some("audio/mpeg"), b""), Some("mp3"));
        assert_eq!(
            audio_extension("a.bin", Some("audio/ogg; codecs=opus"), b""),
            Some("ogg")
        );
        assert_eq!(audio_extension("blob", None, &silent_wav(8000, 1)), Some("wav"));
        assert_eq!(audio_extension("a.txt", Some("text/plain"), b"hello"), None);
        assert_eq!(audio_extension("a.flac", None, b""), None);
    }

    #[test]
    fn test_content_type_for() {
        assert_eq!(content_type_for(Path::new("a.mp3")), "audio/mpeg");
        assert_eq!(content_type_for(Path::new("a.WAV")), "audio/wav");
        assert_eq!(content_type_for(Path::new("a.m4a")), "audio/mp4");
        assert_eq!(content_type_for(Path::new("a.ogg")), "audio/ogg");
        assert_eq!(content_type_for(Path::new("a.webm")), "audio/wav");
    }

    #[test]
    fn test_scopes_are_unique() {
        let store = store(Path::new("/srv/public"));
        let a = store.scope();
        let b = store.scope();
        assert_ne!(a.id(), b.id());
        let file = a.file("stream", "mp3");
        assert!(file.starts_with("/srv/public/temp"));
        assert!(file
            .file_name()
            .unwrap()
            .to_str()
            .unwrap()
            .ends_with("_stream.mp3"));
    }

    #[test]
    fn test_public_url() {
        let store = store(Path::new("/srv/public"));
        let url = store
            .public_url(Path::new("/srv/public/temp/abc_full.mp3"))
            .unwrap();
        assert_eq!(url, "/api/serve-audio?path=temp%2Fabc_full.mp3");
        assert_eq!(store.public_path(Path::new("/srv/public/other/x.mp3")), None);
        assert_eq!(store.public_path(Path::new("/elsewhere/temp/x.mp3")), None);
    }

    #[tokio::test]
    async fn test_save_upload() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(dir.path());
        store.init().await.unwrap();

        let upload = store
            .save_upload("../../my voice.wav", Some("audio/wav"), &silent_wav(8000, 1))
            .await
            .unwrap();

        assert!(upload.path.starts_with(dir.path().join("uploads")));
        assert!(upload.file_name.ends_with("_my_voice.wav"));
        assert_eq!(upload.public_path, format!("uploads/{}", upload.file_name));
        assert_eq!(upload.size, 16044);
        assert!(upload.path.exists());
    }

    #[tokio::test]
    async fn test_upload_limits() {
        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::new(dir.path(), 100);

        assert!(matches!(
            store.save_upload("a.wav", None, &[0u8; 101]).await,
            Err(StoreError::FileTooLarge(101, 100))
        ));
        assert!(matches!(
            store.save_upload("a.wav", None, &[]).await,
            Err(StoreError::EmptyFile)
        ));
        assert!(matches!(
            store.save_upload("a.exe", Some("application/x-msdownload"), b"MZ").await,
            Err(StoreError::UnsupportedFileType(_))
        ));
    }

    #[tokio::test]
    async fn test_resolve_allow_list() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(dir.path());
        store.init().await.unwrap();
        std::fs::write(dir.path().join("temp/a.mp3"), b"x").unwrap();
        std::fs::write(dir.path().join("secret.txt"), b"x").unwrap();

        assert!(store.resolve("temp/a.mp3").await.is_ok());
        assert!(store.resolve("/temp/a.mp3").await.is_ok());
        assert!(matches!(
            store.resolve("temp/missing.mp3").await,
            Err(StoreError::NotFound(_))
        ));
        assert!(matches!(
            store.resolve("secret.txt").await,
            Err(StoreError::AccessDenied(_))
        ));
        assert!(matches!(
            store.resolve("temp/../secret.txt").await,
            Err(StoreError::AccessDenied(_))
        ));
        assert!(matches!(
            store.resolve("tempo/a.mp3").await,
            Err(StoreError::AccessDenied(_))
        ));
        assert!(matches!(
            store.resolve("temp/").await,
            Err(StoreError::AccessDenied(_))
        ));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_resolve_rejects_links_out_of_folder() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(dir.path());
        store.init().await.unwrap();
        std::fs::write(dir.path().join("secret.txt"), b"x").unwrap();
        std::fs::write(dir.path().join("uploads/voice.wav"), b"x").unwrap();
        std::os::unix::fs::symlink(
            dir.path().join("secret.txt"),
            dir.path().join("temp/leak.mp3"),
        )
        .unwrap();
        std::os::unix::fs::symlink(
            dir.path().join("uploads/voice.wav"),
            dir.path().join("temp/cross.wav"),
        )
        .unwrap();
        std::fs::write(dir.path().join("temp/own.mp3"), b"x").unwrap();
        std::os::unix::fs::symlink(
            dir.path().join("temp/own.mp3"),
            dir.path().join("temp/alias.mp3"),
        )
        .unwrap();

        assert!(matches!(
            store.resolve("temp/leak.mp3").await,
            Err(StoreError::AccessDenied(_))
        ));
        assert!(matches!(
            store.resolve("temp/cross.wav").await,
            Err(StoreError::AccessDenied(_))
        ));
        assert!(store.resolve("temp/alias.mp3").await.is_ok());
    }
}
