use std::path::PathBuf;

use crate::error::{Error, Result};

const DEFAULT_CHIP_PREFIX: &str = "csk6";

/// Settings shared by image loading and extraction.
#[derive(Debug, Clone)]
pub struct FlashConfig {
    pub temp_dir: PathBuf,
    pub chip_prefixes: Vec<String>,
}

impl Default for FlashConfig {
    fn default() -> Self {
        Self {
            temp_dir: std::env::temp_dir().join("fwflash").join("unpacked"),
            chip_prefixes: vec![DEFAULT_CHIP_PREFIX.to_string()],
        }
    }
}

impl FlashConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_temp_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.temp_dir = dir.into();
        self
    }

    pub fn with_chip_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.chip_prefixes.push(prefix.into());
        self
    }

    /// Checks `chip` against the supported families, ignoring case.
    pub fn supports_chip(&self, chip: &str) -> bool {
        let chip = chip.to_lowercase();
        self.chip_prefixes
            .iter()
            .any(|prefix| chip.starts_with(&prefix.to_lowercase()))
    }

    pub fn validate(&self) -> Result<()> {
        if self.temp_dir.as_os_str().is_empty() {
            return Err(Error::Configuration(
                "Temporary directory must be specified".into(),
            ));
        }

        if self.chip_prefixes.is_empty() {
            return Err(Error::Configuration(
                "At least one chip family must be supported".into(),
            ));
        }

        Ok(())
    }
}
