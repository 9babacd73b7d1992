//! LPK partition packages.
//!
//! An LPK is a zip archive holding a `manifest.json` and the partition images
//! it lists:
//!
//! ```json
//! {
//!   "chip": "csk6011a",
//!   "images": [
//!     { "addr": "0x0", "file": "./flashboot.bin", "md5": "..." },
//!     { "addr": "0x100000", "file": "./master.bin", "md5": "..." }
//!   ]
//! }
//! ```

use std::io::{Cursor, Read};
use std::path::Path;

use log::{debug, info, warn};
use serde::Deserialize;
use serde_json::Value;
use tokio::fs;
use zip::result::ZipError;
use zip::ZipArchive;

use super::file::FileRef;
use super::types::{format_address, parse_address, Partition};
use crate::config::FlashConfig;
use crate::error::{Error, PackageError, Result};
use crate::store::{EphemeralFileStore, ExtractedFile};

const MANIFEST_NAME: &str = "manifest.json";

// Archive headers are untrusted; larger entries grow the buffer as they are read.
const PREALLOC_LIMIT: u64 = 16 * 1024 * 1024;

#[derive(Deserialize)]
struct Manifest {
    chip: Option<Value>,
    images: Option<Value>,
}

struct ImageEntry {
    addr: u32,
    file: String,
    md5: String,
}

/// Contents of a successfully validated package.
#[derive(Debug, Clone)]
pub struct Package {
    pub chip: String,
    pub partitions: Vec<Partition>,
}

pub async fn read_package(
    store: &EphemeralFileStore,
    config: &FlashConfig,
    path: impl AsRef<Path>,
) -> Result<Package> {
    let path = path.as_ref();
    let buffer = fs::read(path).await?;
    let mut zip = ZipArchive::new(Cursor::new(buffer)).map_err(PackageError::ArchiveUnreadable)?;

    let (chip, entries) = read_manifest(&mut zip, config)?;
    info!(
        "{}: chip {}, {} image(s)",
        path.display(),
        chip,
        entries.len()
    );

    let mut extracted: Vec<ExtractedFile> = Vec::with_capacity(entries.len());
    let mut partitions = Vec::with_capacity(entries.len());

    for entry in entries {
        match extract_entry(&mut zip, store, path, &entry).await {
            Ok(file) => {
                debug!("{} -> {}", entry.file, format_address(entry.addr));
                extracted.push(file.clone());
                partitions.push(Partition {
                    addr: entry.addr,
                    file: FileRef::Extracted(file),
                });
            }
            Err(e) => {
                release(&extracted).await;
                return Err(e);
            }
        }
    }

    Ok(Package { chip, partitions })
}

fn read_manifest<R: Read + std::io::Seek>(
    zip: &mut ZipArchive<R>,
    config: &FlashConfig,
) -> Result<(String, Vec<ImageEntry>)> {
    let content = read_entry(zip, MANIFEST_NAME).map_err(|e| match e {
        ZipError::FileNotFound => Error::from(PackageError::MissingManifest),
        ZipError::Io(io) => Error::Io(io),
        other => Error::from(PackageError::ArchiveUnreadable(other)),
    })?;

    let manifest: Manifest =
        serde_json::from_slice(&content).map_err(PackageError::MalformedManifest)?;

    let chip = match manifest.chip {
        Some(Value::String(chip)) => chip,
        Some(other) => return Err(PackageError::UnsupportedChip(other.to_string()).into()),
        None => return Err(PackageError::MissingField("chip").into()),
    };
    if !config.supports_chip(&chip) {
        return Err(PackageError::UnsupportedChip(chip).into());
    }

    let images = match manifest.images {
        Some(Value::Array(images)) => images,
        _ => return Err(PackageError::MissingImages.into()),
    };
    if images.is_empty() {
        return Err(PackageError::EmptyImages.into());
    }

    let entries = images
        .iter()
        .map(parse_image)
        .collect::<std::result::Result<Vec<_>, _>>()?;

    Ok((chip, entries))
}

fn parse_image(image: &Value) -> std::result::Result<ImageEntry, PackageError> {
    let field = |name: &'static str| {
        image
            .get(name)
            .and_then(Value::as_str)
            .ok_or(PackageError::MissingField(name))
    };

    let addr = field("addr")?;
    let file = field("file")?;
    let md5 = field("md5")?;

    let addr = parse_address(addr).ok_or_else(|| PackageError::InvalidAddress(addr.to_string()))?;

    Ok(ImageEntry {
        addr,
        file: file.to_string(),
        md5: md5.to_string(),
    })
}

async fn extract_entry<R: Read + std::io::Seek>(
    zip: &mut ZipArchive<R>,
    store: &EphemeralFileStore,
    container: &Path,
    entry: &ImageEntry,
) -> Result<ExtractedFile> {
    let inner_path = entry.file.strip_prefix("./").unwrap_or(&entry.file);

    let content = read_entry(zip, inner_path).map_err(|e| match e {
        ZipError::FileNotFound => Error::from(PackageError::MissingEntry(entry.file.clone())),
        ZipError::Io(io) => Error::Io(io),
        other => Error::from(PackageError::ArchiveUnreadable(other)),
    })?;

    let actual = format!("{:x}", md5::compute(&content));
    if !actual.eq_ignore_ascii_case(&entry.md5) {
        return Err(PackageError::ChecksumMismatch {
            file: entry.file.clone(),
            expected: entry.md5.to_lowercase(),
            actual,
        }
        .into());
    }

    store.extract(inner_path, &content, Some(container)).await
}

fn read_entry<R: Read + std::io::Seek>(
    zip: &mut ZipArchive<R>,
    name: &str,
) -> std::result::Result<Vec<u8>, ZipError> {
    let mut file = zip.by_name(name)?;
    let mut content = Vec::with_capacity(prealloc_len(file.size()));
    file.read_to_end(&mut content)?;
    Ok(content)
}

fn prealloc_len(declared: u64) -> usize {
    declared.min(PREALLOC_LIMIT) as usize
}

async fn release(files: &[ExtractedFile]) {
    for file in files {
        if let Err(e) = file.free().await {
            warn!("Failed to remove {}: {}", file.path().display(), e);
        }
    }
}
