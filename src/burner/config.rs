use std::path::PathBuf;

use super::types::BurnerConfig;
use crate::error::{Error, Result};
use crate::image::{format_address, ImageSet};

impl Default for BurnerConfig {
    fn default() -> Self {
        Self {
            program: PathBuf::from("cskburn"),
            port: String::new(),
            baud: 1_500_000,
            chip: 6,
            verbose: true,
            chip_id: true,
            probe_timeout: 1000,
            reset_attempts: 2,
            reset_delay: 100,
            extra_args: Vec::new(),
        }
    }
}

impl BurnerConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_program(mut self, program: impl Into<PathBuf>) -> Self {
        self.program = program.into();
        self
    }

    pub fn with_port(mut self, port: impl Into<String>) -> Self {
        self.port = port.into();
        self
    }

    pub fn with_baud(mut self, baud: u32) -> Self {
        self.baud = baud;
        self
    }

    pub fn with_chip(mut self, chip: u8) -> Self {
        self.chip = chip;
        self
    }

    pub fn with_probe_timeout(mut self, millis: u32) -> Self {
        self.probe_timeout = millis;
        self
    }

    pub fn with_reset_attempts(mut self, attempts: u32) -> Self {
        self.reset_attempts = attempts;
        self
    }

    pub fn with_reset_delay(mut self, millis: u32) -> Self {
        self.reset_delay = millis;
        self
    }

    pub fn with_arg(mut self, arg: impl Into<String>) -> Self {
        self.extra_args.push(arg.into());
        self
    }

    pub fn quiet(mut self) -> Self {
        self.verbose = false;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.program.as_os_str().is_empty() {
            return Err(Error::Configuration("Burner program must be specified".into()));
        }

        if self.port.is_empty() {
            return Err(Error::Configuration("Port must be specified".into()));
        }

        if self.baud == 0 {
            return Err(Error::Configuration("Baud rate must be non-zero".into()));
        }

        Ok(())
    }

    /// Full command line for flashing `images`.
    pub fn args(&self, images: &ImageSet) -> Vec<String> {
        let mut args = vec![
            "-s".to_string(),
            self.port.clone(),
            "-b".to_string(),
            self.baud.to_string(),
            "--chip".to_string(),
            self.chip.to_string(),
        ];

        if self.verbose {
            args.push("--verbose".into());
        }
        if self.chip_id {
            args.push("--chip-id".into());
        }

        args.extend([
            "--probe-timeout".to_string(),
            self.probe_timeout.to_string(),
            "--reset-attempts".to_string(),
            self.reset_attempts.to_string(),
            "--reset-delay".to_string(),
            self.reset_delay.to_string(),
        ]);
        args.extend(self.extra_args.iter().cloned());

        match images {
            ImageSet::Hex { file, .. } => {
                args.push(file.path().to_string_lossy().into_owned());
            }
            ImageSet::Bin(_) | ImageSet::Package(_) => {
                for (addr, file) in images.partitions() {
                    args.push(format_address(addr));
                    args.push(file.path().to_string_lossy().into_owned());
                }
            }
        }

        args
    }
}
