//! Firmware Flashing Library
//!
//! This library loads firmware images, hands them to the external `cskburn`
//! burner and turns the burner's text output into structured progress.
//!
//! # Features
//! - Raw binary, Intel HEX and LPK partition package support
//! - Package manifest validation with per-image MD5 verification
//! - Temporary file management for extracted partitions
//! - Ordered decoding of the burner's stdout/stderr protocol
//! - Byte-weighted progress across all partitions
//!
//! # Examples
//!
//! ```ignore
//! use fwflash::{BurnerConfig, FlashConfig, FlashProgressTracker};
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() -> fwflash::Result<()> {
//!     let config = FlashConfig::new();
//!     let store = fwflash::prepare(&config).await?;
//!
//!     let images = fwflash::load_images(&store, &config, &["firmware.lpk"]).await?;
//!     let burner = fwflash::Burner::new(BurnerConfig::new().with_port("/dev/ttyUSB0"))?;
//!
//!     let mut tracker = FlashProgressTracker::new();
//!     let result = fwflash::flash(&burner, &images, &mut tracker, CancellationToken::new(), |_, state| {
//!         println!("{:.1}%", state.progress * 100.0);
//!     })
//!     .await;
//!
//!     images.free().await;
//!     result.map(|_| ())
//! }
//! ```

mod burner;
mod config;
mod error;
mod image;
mod progress;
mod store;

pub use burner::{
    decode_output, decode_with, flash_id_size, Burner, BurnerConfig, BurnerEvent, BurnerOutput,
    BurnerSession, Channel, Chunk, LineClassifier, LineCodec, OutputDecoder,
};
pub use config::FlashConfig;
pub use error::{Error, HexError, PackageError, ProcessError, Result};
pub use image::hex::{parse_sections, read_sections};
pub use image::package::read_package;
pub use image::{
    format_address, parse_address, FileRef, ImageSet, LocalFile, Package, Partition, Section,
};
pub use progress::{FlashProgressTracker, FlashStatus, PartitionProgress, ProgressState};
pub use store::{EphemeralFileStore, ExtractedFile};

use std::path::Path;

use log::info;
use tokio_util::sync::CancellationToken;

/// Validates `config` and clears temporary files left by a previous run.
///
/// Call once at startup, before any image is loaded.
pub async fn prepare(config: &FlashConfig) -> Result<EphemeralFileStore> {
    config.validate()?;
    let store = EphemeralFileStore::from_config(config);
    store.sweep().await;
    Ok(store)
}

/// Loads the firmware images at `paths`
pub async fn load_images<P: AsRef<Path>>(
    store: &EphemeralFileStore,
    config: &FlashConfig,
    paths: &[P],
) -> Result<ImageSet> {
    ImageSet::build(store, config, paths).await
}

/// Flashes `images`, reporting every burner event together with the updated
/// progress.
pub async fn flash<F>(
    burner: &Burner,
    images: &ImageSet,
    tracker: &mut FlashProgressTracker,
    cancel: CancellationToken,
    mut on_progress: F,
) -> Result<BurnerOutput>
where
    F: FnMut(&BurnerEvent, &ProgressState),
{
    info!(
        "Flashing {} partition(s), {} bytes",
        images.partitions().len(),
        images.size()
    );

    tracker.reset();
    tracker.set_status(FlashStatus::Connecting);

    let mut session = burner.spawn(images, cancel)?;
    while let Some(event) = session.next_event().await {
        tracker.apply(&event);
        on_progress(&event, &tracker.state(images));
    }

    let result = session.wait().await;
    match &result {
        Ok(_) => tracker.set_status(FlashStatus::Success),
        Err(e) if e.is_cancelled() => tracker.set_status(FlashStatus::Stopped),
        Err(_) => tracker.set_status(FlashStatus::Error),
    }
    result
}

/// MD5 of a file on disk, as lowercase hex.
pub async fn file_md5(path: impl AsRef<Path>) -> Result<String> {
    let content = tokio::fs::read(path).await?;
    Ok(format!("{:x}", md5::compute(&content)))
}
