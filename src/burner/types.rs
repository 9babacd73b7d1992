use std::path::PathBuf;

use bytes::Bytes;

/// Structured line emitted by the burner.
#[derive(Debug, Clone, PartialEq)]
pub enum BurnerEvent {
    WaitingForDevice,
    EnteringUpdateMode,
    ChipId(String),
    FlashId { id: String, size: Option<u64> },
    PartitionStart { index: usize, total: usize, addr: u32 },
    Progress { index: usize, fraction: f64 },
    Wrote { index: usize },
    Verified { index: usize, md5: String },
    Resetting,
    Finished,
    Error(String),
    /// Any line not matching the grammar above.
    Output(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Channel {
    Stdout,
    Stderr,
}

/// Raw bytes read from one of the burner's pipes.
#[derive(Debug, Clone)]
pub struct Chunk {
    pub channel: Channel,
    pub data: Bytes,
}

impl Chunk {
    pub fn new(channel: Channel, data: impl Into<Bytes>) -> Self {
        Self {
            channel,
            data: data.into(),
        }
    }
}

/// Result of a burner run that exited cleanly.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BurnerOutput {
    pub output: String,
}

#[derive(Debug, Clone)]
pub struct BurnerConfig {
    pub program: PathBuf,
    pub port: String,
    pub baud: u32,
    pub chip: u8,
    pub verbose: bool,
    pub chip_id: bool,
    pub probe_timeout: u32,
    pub reset_attempts: u32,
    pub reset_delay: u32,
    pub extra_args: Vec<String>,
}
