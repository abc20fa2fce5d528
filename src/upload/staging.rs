//! File staging
//!
//! A staged file is selected locally and validated against the upload
//! constraints, but not yet transmitted.

use super::UploadError;
use crate::config::UploadConfig;
use std::path::{Path, PathBuf};

/// Client-side constraints checked before a file can be staged
#[derive(Debug, Clone)]
pub struct FileConstraints {
    pub max_size_bytes: u64,
    /// Lowercase extensions without the leading dot
    pub accepted_extensions: Vec<String>,
}

impl FileConstraints {
    pub fn from_config(config: &UploadConfig) -> Self {
        Self {
            max_size_bytes: config.max_file_size_bytes(),
            accepted_extensions: config
                .accepted_extensions
                .iter()
                .map(|ext| ext.trim_start_matches('.').to_ascii_lowercase())
                .collect(),
        }
    }

    /// Check a file name and size, returning the matched extension
    pub fn check(&self, file_name: &str, size_bytes: u64) -> Result<String, UploadError> {
        let extension = Path::new(file_name)
            .extension()
            .and_then(|ext| ext.to_str())
            .map(str::to_ascii_lowercase)
            .ok_or_else(|| UploadError::UnsupportedFileType(file_name.to_string()))?;

        if !self.accepted_extensions.contains(&extension) {
            return Err(UploadError::UnsupportedFileType(file_name.to_string()));
        }

        if size_bytes > self.max_size_bytes {
            return Err(UploadError::FileTooLarge {
                size: size_bytes,
                limit: self.max_size_bytes,
            });
        }

        Ok(extension)
    }
}

impl Default for FileConstraints {
    fn default() -> Self {
        Self::from_config(&UploadConfig::default())
    }
}

/// A validated file waiting to be uploaded
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StagedFile {
    pub path: PathBuf,
    pub file_name: String,
    pub size_bytes: u64,
}

impl StagedFile {
    /// Stat `path` and validate it against `constraints`
    pub async fn from_path(
        path: impl AsRef<Path>,
        constraints: &FileConstraints,
    ) -> Result<Self, UploadError> {
        let path = path.as_ref();
        let metadata = tokio::fs::metadata(path).await?;
        if !metadata.is_file() {
            return Err(UploadError::IoError(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                format!("{} is not a regular file", path.display()),
            )));
        }

        let file_name = path
            .file_name()
            .and_then(|name| name.to_str())
            .ok_or_else(|| UploadError::UnsupportedFileType(path.display().to_string()))?
            .to_string();

        constraints.check(&file_name, metadata.len())?;

        Ok(Self {
            path: path.to_path_buf(),
            file_name,
            size_bytes: metadata.len(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_accepts_known_extensions_case_insensitively() {
        let constraints = FileConstraints::default();
        assert_eq!(constraints.check("talk.MP4", 10).unwrap(), "mp4");
        assert_eq!(constraints.check("clip.3gpp", 10).unwrap(), "3gpp");
        assert_eq!(constraints.check("demo.webm", 10).unwrap(), "webm");
    }

    #[test]
    fn test_rejects_unknown_extension() {
        let constraints = FileConstraints::default();
        assert!(matches!(
            constraints.check("slides.pdf", 10),
            Err(UploadError::UnsupportedFileType(_))
        ));
        assert!(matches!(
            constraints.check("no_extension", 10),
            Err(UploadError::UnsupportedFileType(_))
        ));
    }

    #[test]
    fn test_rejects_oversized_file() {
        let constraints = FileConstraints::default();
        let limit = 2048 * 1024 * 1024;
        assert!(constraints.check("talk.mp4", limit).is_ok());
        assert!(matches!(
            constraints.check("talk.mp4", limit + 1),
            Err(UploadError::FileTooLarge { .. })
        ));
    }

    #[test]
    fn test_config_extensions_are_normalized() {
        let config = UploadConfig {
            accepted_extensions: vec![".MKV".into()],
            ..UploadConfig::default()
        };
        let constraints = FileConstraints::from_config(&config);
        assert!(constraints.check("movie.mkv", 1).is_ok());
    }

    #[tokio::test]
    async fn test_from_path_reads_size() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("session.mov");
        std::fs::File::create(&path)
            .unwrap()
            .write_all(&[0u8; 128])
            .unwrap();

        let staged = StagedFile::from_path(&path, &FileConstraints::default())
            .await
            .unwrap();
        assert_eq!(staged.file_name, "session.mov");
        assert_eq!(staged.size_bytes, 128);
    }

    #[tokio::test]
    async fn test_from_path_missing_file() {
        let result =
            StagedFile::from_path("/nonexistent/video.mp4", &FileConstraints::default()).await;
        assert!(matches!(result, Err(UploadError::IoError(_))));
    }
}
