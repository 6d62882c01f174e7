//! Uploader that stores raw files in a local directory.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use folio_core::pipeline::UploadFile;
use folio_core::{UploadError, UploadResponse, Uploader};

/// Copies files into the directory named by a `file://` endpoint.
#[derive(Debug, Default)]
pub struct DirUploader;

impl DirUploader {
    fn target_dir(endpoint: &str) -> Result<PathBuf, UploadError> {
        let path = endpoint.strip_prefix("file://").unwrap_or(endpoint);
        if path.starts_with('/') {
            Ok(PathBuf::from(path))
        } else {
            Err(UploadError::InvalidEndpoint(endpoint.to_string()))
        }
    }
}

/// Keep only characters that are safe in a file name.
fn safe_name(filename: &str) -> String {
    let name = Path::new(filename)
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("upload");
    name.chars()
        .map(|c| {
            if c.is_alphanumeric() || matches!(c, '.' | '-' | '_') {
                c
            } else {
                '_'
            }
        })
        .collect()
}

#[async_trait]
impl Uploader for DirUploader {
    async fn upload(
        &self,
        file: &UploadFile,
        field_name: &str,
        endpoint: &str,
        headers: &BTreeMap<String, String>,
    ) -> Result<UploadResponse, UploadError> {
        let dir = Self::target_dir(endpoint)?;
        tokio::fs::create_dir_all(&dir).await?;

        let stored = format!(
            "{}-{}",
            uuid::Uuid::new_v4().simple(),
            safe_name(&file.filename)
        );
        let path = dir.join(stored);
        tokio::fs::write(&path, &file.bytes).await?;

        tracing::debug!(
            field = field_name,
            headers = headers.len(),
            path = %path.display(),
            "Stored raw upload"
        );

        Ok(UploadResponse::Url {
            url: format!("file://{}", path.display()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_copies_file_into_directory() {
        let temp_dir = tempfile::tempdir().unwrap();
        let endpoint = format!("file://{}", temp_dir.path().display());
        let file = UploadFile::new("../odd name.rtf", "text/rtf", &b"{\\rtf1}"[..]);

        let response = DirUploader
            .upload(&file, "file", &endpoint, &BTreeMap::new())
            .await
            .unwrap();

        let UploadResponse::Url { url } = response else {
            panic!("expected url response");
        };
        let stored = PathBuf::from(url.strip_prefix("file://").unwrap());
        assert_eq!(stored.parent().unwrap(), temp_dir.path());
        assert!(stored.to_str().unwrap().ends_with("-odd_name.rtf"));
        assert_eq!(std::fs::read(&stored).unwrap(), b"{\\rtf1}");
    }

    #[tokio::test]
    async fn test_rejects_remote_endpoints() {
        let file = UploadFile::new("a.bin", "", &b"x"[..]);
        let err = DirUploader
            .upload(&file, "file", "https://example.com/upload", &BTreeMap::new())
            .await
            .unwrap_err();
        assert!(matches!(err, UploadError::InvalidEndpoint(_)));
    }
}
