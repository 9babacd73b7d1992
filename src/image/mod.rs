use std::path::{Path, PathBuf};

use log::{info, warn};

use crate::config::FlashConfig;
use crate::error::{Error, Result};
use crate::store::EphemeralFileStore;

mod file;
pub mod hex;
pub mod package;
mod types;

pub use file::{FileRef, LocalFile};
pub use package::Package;
pub use types::{format_address, parse_address, Partition, Section};

const HEX_EXTENSION: &str = "hex";
const PACKAGE_EXTENSION: &str = "lpk";

/// Firmware selected for one flashing run.
#[derive(Debug, Clone)]
pub enum ImageSet {
    Bin(Vec<Partition>),
    Hex {
        file: FileRef,
        sections: Vec<Section>,
    },
    Package(Package),
}

fn has_extension(path: &Path, ext: &str) -> bool {
    path.extension()
        .map(|e| e.to_string_lossy().eq_ignore_ascii_case(ext))
        .unwrap_or(false)
}

impl ImageSet {
    /// Loads the images at `paths`.
    ///
    /// A hex file always wins and is used alone. Otherwise every path becomes
    /// one partition at address 0, except packages, which are expanded in
    /// place.
    pub async fn build<P: AsRef<Path>>(
        store: &EphemeralFileStore,
        config: &FlashConfig,
        paths: &[P],
    ) -> Result<Self> {
        let paths: Vec<&Path> = paths.iter().map(|p| p.as_ref()).collect();
        if paths.is_empty() {
            return Err(Error::Configuration("No firmware file specified".into()));
        }

        if let Some(hex_path) = paths.iter().copied().find(|p| has_extension(p, HEX_EXTENSION)) {
            if paths.len() > 1 {
                warn!(
                    "Using hex file {} alone, ignoring {} other file(s)",
                    hex_path.display(),
                    paths.len() - 1
                );
            }
            let file = FileRef::from(LocalFile::open(hex_path).await?);
            let sections = hex::read_sections(hex_path).await?;
            return Ok(ImageSet::Hex { file, sections });
        }

        if let [path] = paths.as_slice() {
            if has_extension(path, PACKAGE_EXTENSION) {
                let package = package::read_package(store, config, path).await?;
                return Ok(ImageSet::Package(package));
            }
        }

        let mut partitions: Vec<Partition> = Vec::new();
        for path in paths {
            let loaded = if has_extension(path, PACKAGE_EXTENSION) {
                package::read_package(store, config, path)
                    .await
                    .map(|package| package.partitions)
            } else {
                LocalFile::open(path).await.map(|file| {
                    vec![Partition {
                        addr: 0,
                        file: file.into(),
                    }]
                })
            };

            match loaded {
                Ok(loaded) => partitions.extend(loaded),
                Err(e) => {
                    ImageSet::Bin(partitions).free().await;
                    return Err(e);
                }
            }
        }

        info!("Loaded {} partition(s)", partitions.len());
        Ok(ImageSet::Bin(partitions))
    }

    /// Number of independently progressed entries.
    pub fn len(&self) -> usize {
        match self {
            ImageSet::Bin(partitions) => partitions.len(),
            ImageSet::Hex { sections, .. } => sections.len(),
            ImageSet::Package(package) => package.partitions.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn entry_size(&self, index: usize) -> u64 {
        match self {
            ImageSet::Bin(partitions)
            | ImageSet::Package(Package { partitions, .. }) => {
                partitions.get(index).map_or(0, |p| p.file.size())
            }
            ImageSet::Hex { sections, .. } => sections.get(index).map_or(0, |s| s.size as u64),
        }
    }

    pub fn size(&self) -> u64 {
        self.size_up_to(self.len())
    }

    /// Sum of the entries strictly before `index`.
    pub fn size_up_to(&self, index: usize) -> u64 {
        match self {
            ImageSet::Bin(partitions)
            | ImageSet::Package(Package { partitions, .. }) => partitions
                .iter()
                .take(index)
                .map(|p| p.file.size())
                .sum(),
            ImageSet::Hex { sections, .. } => {
                sections.iter().take(index).map(|s| s.size as u64).sum()
            }
        }
    }

    /// Flat addressed view handed to the burner; a hex file is one partition.
    pub fn partitions(&self) -> Vec<(u32, &FileRef)> {
        match self {
            ImageSet::Bin(partitions)
            | ImageSet::Package(Package { partitions, .. }) => {
                partitions.iter().map(|p| (p.addr, &p.file)).collect()
            }
            ImageSet::Hex { file, .. } => vec![(0, file)],
        }
    }

    pub fn files(&self) -> Vec<&FileRef> {
        self.partitions().into_iter().map(|(_, file)| file).collect()
    }

    pub fn paths(&self) -> Vec<PathBuf> {
        self.files().iter().map(|f| f.path().to_path_buf()).collect()
    }

    /// Releases every owned file. Failures are logged, never returned.
    pub async fn free(&self) {
        for file in self.files() {
            if let Err(e) = file.free().await {
                warn!("Failed to free {}: {}", file.path().display(), e);
            }
        }
    }
}
