use std::path::{Path, PathBuf};
use std::time::SystemTime;

use tokio::fs;

use crate::error::Result;
use crate::store::ExtractedFile;

/// A file selected by the user. Nothing on disk is owned.
#[derive(Debug, Clone)]
pub struct LocalFile {
    path: PathBuf,
    name: String,
    size: u64,
    mtime: Option<SystemTime>,
}

impl LocalFile {
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let meta = fs::metadata(&path).await?;
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.to_string_lossy().into_owned());

        Ok(Self {
            name,
            size: meta.len(),
            mtime: meta.modified().ok(),
            path,
        })
    }
}

#[derive(Debug, Clone)]
pub enum FileRef {
    Local(LocalFile),
    Extracted(ExtractedFile),
}

impl FileRef {
    pub fn path(&self) -> &Path {
        match self {
            FileRef::Local(f) => &f.path,
            FileRef::Extracted(f) => f.path(),
        }
    }

    pub fn name(&self) -> &str {
        match self {
            FileRef::Local(f) => &f.name,
            FileRef::Extracted(f) => f.name(),
        }
    }

    pub fn size(&self) -> u64 {
        match self {
            FileRef::Local(f) => f.size,
            FileRef::Extracted(f) => f.size(),
        }
    }

    pub fn mtime(&self) -> Option<SystemTime> {
        match self {
            FileRef::Local(f) => f.mtime,
            FileRef::Extracted(f) => Some(f.mtime()),
        }
    }

    pub fn container_path(&self) -> Option<&Path> {
        match self {
            FileRef::Local(_) => None,
            FileRef::Extracted(f) => f.container_path(),
        }
    }

    /// Path a file manager should highlight: the package for extracted files.
    pub fn reveal_path(&self) -> &Path {
        self.container_path().unwrap_or_else(|| self.path())
    }

    pub async fn content(&self) -> Result<Vec<u8>> {
        Ok(fs::read(self.path()).await?)
    }

    pub async fn free(&self) -> Result<()> {
        match self {
            FileRef::Local(_) => Ok(()),
            FileRef::Extracted(f) => f.free().await,
        }
    }
}

impl From<LocalFile> for FileRef {
    fn from(file: LocalFile) -> Self {
        FileRef::Local(file)
    }
}

impl From<ExtractedFile> for FileRef {
    fn from(file: ExtractedFile) -> Self {
        FileRef::Extracted(file)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::tests::{remove_test_dir, test_store};

    #[tokio::test]
    async fn test_local_file_free_keeps_file() {
        let store = test_store();
        let extracted = store.extract("fw.bin", b"abcd", None).await.unwrap();

        let local = FileRef::from(LocalFile::open(extracted.path()).await.unwrap());
        assert_eq!(local.size(), 4);
        assert!(local.container_path().is_none());
        assert_eq!(local.reveal_path(), extracted.path());

        local.free().await.unwrap();
        assert!(extracted.path().exists());
        assert_eq!(local.content().await.unwrap(), b"abcd");

        remove_test_dir(&store).await;
    }

    #[tokio::test]
    async fn test_extracted_reveal_points_at_container() {
        let store = test_store();
        let container = PathBuf::from("/downloads/fw.lpk");
        let file = FileRef::from(
            store
                .extract("./app.bin", b"abcd", Some(&container))
                .await
                .unwrap(),
        );

        assert_eq!(file.reveal_path(), container.as_path());
        assert!(file.mtime().is_some());

        file.free().await.unwrap();
        assert!(!file.path().exists());

        remove_test_dir(&store).await;
    }

    #[tokio::test]
    async fn test_missing_local_file_is_io_error() {
        let err = LocalFile::open("/nonexistent/fwflash/firmware.bin")
            .await
            .unwrap_err();
        assert!(matches!(err, crate::Error::Io(_)));
    }
}
