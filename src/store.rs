//! Ephemeral files materialized from firmware packages.
//!
//! Extracted partitions live in a private directory owned by an
//! [`EphemeralFileStore`]. The directory is swept once at startup so that files
//! orphaned by a previous abnormal exit do not accumulate.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use log::{debug, warn};
use rand::distributions::Alphanumeric;
use rand::{thread_rng, Rng};
use tokio::fs;

use crate::config::FlashConfig;
use crate::error::{Error, Result};

const TMP_NAME_LEN: usize = 10;

#[derive(Debug, Clone)]
pub struct EphemeralFileStore {
    root: PathBuf,
}

impl EphemeralFileStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn from_config(config: &FlashConfig) -> Self {
        Self::new(&config.temp_dir)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Removes the whole private directory. Must run before any extraction.
    pub async fn sweep(&self) {
        match fs::remove_dir_all(&self.root).await {
            Ok(()) => debug!("Swept temporary directory {}", self.root.display()),
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => warn!(
                "Failed to sweep temporary directory {}: {}",
                self.root.display(),
                e
            ),
        }
    }

    /// Writes `content` to a new randomly named file and returns its handle.
    ///
    /// `pseudo_path` is the path of the entry inside its container; only its
    /// file name is kept, as the display name.
    pub async fn extract(
        &self,
        pseudo_path: &str,
        content: &[u8],
        container_path: Option<&Path>,
    ) -> Result<ExtractedFile> {
        fs::create_dir_all(&self.root)
            .await
            .map_err(|source| Error::Resource {
                path: self.root.clone(),
                source,
            })?;

        let path = self.root.join(generate_tmp_file_name());
        fs::write(&path, content)
            .await
            .map_err(|source| Error::Resource {
                path: path.clone(),
                source,
            })?;

        let mtime = match fs::metadata(&path).await.and_then(|m| m.modified()) {
            Ok(mtime) => mtime,
            Err(_) => SystemTime::now(),
        };

        let name = Path::new(pseudo_path)
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| pseudo_path.to_string());

        debug!("Extracted {} to {}", pseudo_path, path.display());

        Ok(ExtractedFile {
            path,
            name,
            size: content.len() as u64,
            mtime,
            container_path: container_path.map(Path::to_path_buf),
        })
    }
}

fn generate_tmp_file_name() -> String {
    let name: String = thread_rng()
        .sample_iter(&Alphanumeric)
        .take(TMP_NAME_LEN)
        .map(char::from)
        .collect();
    format!("{}.bin", name)
}

/// Handle to a file owned by an [`EphemeralFileStore`].
///
/// Clones share the backing path. Freeing an already removed file succeeds, so
/// every clone may be freed independently.
#[derive(Debug, Clone)]
pub struct ExtractedFile {
    path: PathBuf,
    name: String,
    size: u64,
    mtime: SystemTime,
    container_path: Option<PathBuf>,
}

impl ExtractedFile {
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn mtime(&self) -> SystemTime {
        self.mtime
    }

    pub fn container_path(&self) -> Option<&Path> {
        self.container_path.as_deref()
    }

    pub async fn free(&self) -> Result<()> {
        match fs::remove_file(&self.path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!("{} already removed", self.path.display());
                Ok(())
            }
            Err(source) => Err(Error::Resource {
                path: self.path.clone(),
                source,
            }),
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// Store rooted at `<tmp>/fwflash-tests/<random>/unpacked`. Fixtures go in
    /// a sibling directory so they never count as extracted files.
    pub(crate) fn test_store() -> EphemeralFileStore {
        let dir = std::env::temp_dir()
            .join("fwflash-tests")
            .join(generate_tmp_file_name().trim_end_matches(".bin"))
            .join("unpacked");
        EphemeralFileStore::new(dir)
    }

    pub(crate) fn test_dir(store: &EphemeralFileStore) -> &Path {
        store.root().parent().unwrap()
    }

    /// Removes the store and every fixture written next to it.
    pub(crate) async fn remove_test_dir(store: &EphemeralFileStore) {
        match fs::remove_dir_all(test_dir(store)).await {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => panic!("failed to remove {}: {}", test_dir(store).display(), e),
        }
    }

    pub(crate) fn count_files(store: &EphemeralFileStore) -> usize {
        std::fs::read_dir(store.root())
            .map(|entries| entries.count())
            .unwrap_or(0)
    }

    #[tokio::test]
    async fn test_extract_records_metadata() {
        let store = test_store();
        let container = PathBuf::from("/firmware/app.lpk");
        let file = store
            .extract("images/app.bin", b"\x01\x02\x03", Some(&container))
            .await
            .unwrap();

        assert_eq!(file.name(), "app.bin");
        assert_eq!(file.size(), 3);
        assert_eq!(file.container_path(), Some(container.as_path()));
        assert!(file.path().starts_with(store.root()));
        assert_eq!(std::fs::read(file.path()).unwrap(), vec![1, 2, 3]);

        remove_test_dir(&store).await;
    }

    #[tokio::test]
    async fn test_extract_names_do_not_collide() {
        let store = test_store();
        let a = store.extract("a.bin", b"a", None).await.unwrap();
        let b = store.extract("a.bin", b"b", None).await.unwrap();

        assert_ne!(a.path(), b.path());
        assert_eq!(count_files(&store), 2);

        remove_test_dir(&store).await;
    }

    #[tokio::test]
    async fn test_double_free_is_not_an_error() {
        let store = test_store();
        let file = store.extract("a.bin", b"data", None).await.unwrap();
        let shared = file.clone();

        file.free().await.unwrap();
        assert!(!file.path().exists());
        shared.free().await.unwrap();

        remove_test_dir(&store).await;
    }

    #[tokio::test]
    async fn test_sweep_removes_directory_and_tolerates_absence() {
        let store = test_store();
        store.extract("a.bin", b"data", None).await.unwrap();
        assert!(store.root().exists());

        store.sweep().await;
        assert!(!store.root().exists());

        // Nothing left to remove.
        store.sweep().await;
        remove_test_dir(&store).await;
    }
}
