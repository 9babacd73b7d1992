use bytes::BytesMut;
use log::{debug, trace};
use once_cell::sync::Lazy;
use regex::Regex;
use tokio_util::codec::Decoder;

use super::codec::{decode_output, LineCodec};
use super::types::{BurnerEvent, Channel, Chunk};

const WAITING_FOR_DEVICE: &str = "Waiting for device...";
const ENTERING_UPDATE_MODE: &str = "Entering update mode...";
const WRITING_TOOK: &str = "Writing took";
const RESETTING: &str = "Resetting...";
const FINISHED: &str = "Finished";

static CHIP_ID: Lazy<Regex> = Lazy::new(|| Regex::new(r"^chip-id: (.+)$").expect("valid regex"));
static FLASH_ID: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^flash-id: (.+)$").expect("valid regex"));
static PARTITION: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^Burning partition (\d+)/(\d+)\.\.\. \(0x([0-9A-Fa-f]+),").expect("valid regex")
});
static PROGRESS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(\d+\.\d{2}) KB / (\d+\.\d{2}) KB").expect("valid regex"));
static VERIFIED: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^md5 \(.+\): (.+)$").expect("valid regex"));
static ERROR: Lazy<Regex> = Lazy::new(|| Regex::new(r"^ERROR: (.+)$").expect("valid regex"));

/// Flash size encoded in a JEDEC flash id: the third byte is log2 of the size.
pub fn flash_id_size(id: &str) -> Option<u64> {
    let exponent = u32::from_str_radix(id.get(4..6)?, 16).ok()?;
    1u64.checked_shl(exponent)
}

/// Maps single trimmed lines to events, tracking the partition being written.
#[derive(Debug, Default)]
pub struct LineClassifier {
    current: usize,
}

impl LineClassifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn current_index(&self) -> usize {
        self.current
    }

    pub fn classify(&mut self, line: &str) -> BurnerEvent {
        match line {
            WAITING_FOR_DEVICE => return BurnerEvent::WaitingForDevice,
            ENTERING_UPDATE_MODE => return BurnerEvent::EnteringUpdateMode,
            RESETTING => return BurnerEvent::Resetting,
            FINISHED => return BurnerEvent::Finished,
            _ => {}
        }

        if let Some(caps) = CHIP_ID.captures(line) {
            return BurnerEvent::ChipId(caps[1].to_string());
        }

        if let Some(caps) = FLASH_ID.captures(line) {
            let id = caps[1].to_string();
            let size = flash_id_size(&id);
            return BurnerEvent::FlashId { id, size };
        }

        if let Some(caps) = PARTITION.captures(line) {
            let parsed = (
                caps[1].parse::<usize>(),
                caps[2].parse::<usize>(),
                u32::from_str_radix(&caps[3], 16),
            );
            if let (Ok(number), Ok(total), Ok(addr)) = parsed {
                self.current = number.saturating_sub(1);
                return BurnerEvent::PartitionStart {
                    index: self.current,
                    total,
                    addr,
                };
            }
        }

        if let Some(caps) = PROGRESS.captures(line) {
            if let (Ok(done), Ok(total)) = (caps[1].parse::<f64>(), caps[2].parse::<f64>()) {
                let fraction = if total > 0.0 {
                    (done / total).clamp(0.0, 1.0)
                } else {
                    0.0
                };
                return BurnerEvent::Progress {
                    index: self.current,
                    fraction,
                };
            }
        }

        if line.starts_with(WRITING_TOOK) {
            return BurnerEvent::Wrote {
                index: self.current,
            };
        }

        if let Some(caps) = VERIFIED.captures(line) {
            return BurnerEvent::Verified {
                index: self.current,
                md5: caps[1].to_string(),
            };
        }

        if let Some(caps) = ERROR.captures(line) {
            return BurnerEvent::Error(caps[1].to_string());
        }

        BurnerEvent::Output(line.to_string())
    }
}

/// Turns chunks from both burner pipes into events.
///
/// Chunks must be fed in arrival order. Each channel keeps its own partial
/// line, so a line split across reads is emitted once it is complete.
#[derive(Debug, Default)]
pub struct OutputDecoder {
    codec: LineCodec,
    stdout: BytesMut,
    stderr: BytesMut,
    classifier: LineClassifier,
    output: String,
    last_error: Option<String>,
}

impl OutputDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn feed(&mut self, chunk: Chunk) -> Vec<BurnerEvent> {
        trace!("{:?}: {} byte(s)", chunk.channel, chunk.data.len());
        self.output.push_str(&decode_output(&chunk.data));
        self.buffer(chunk.channel).extend_from_slice(&chunk.data);

        let mut events = Vec::new();
        while let Some(line) = self.next_line(chunk.channel, false) {
            self.push_line(&line, &mut events);
        }
        events
    }

    /// Emits whatever partial lines remain once both pipes are closed.
    pub fn finish(&mut self) -> Vec<BurnerEvent> {
        let mut events = Vec::new();
        for channel in [Channel::Stdout, Channel::Stderr] {
            while let Some(line) = self.next_line(channel, true) {
                self.push_line(&line, &mut events);
            }
        }
        events
    }

    /// Every chunk decoded so far, concatenated in arrival order.
    pub fn output(&self) -> &str {
        &self.output
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    pub fn into_parts(self) -> (String, Option<String>) {
        (self.output, self.last_error)
    }

    fn buffer(&mut self, channel: Channel) -> &mut BytesMut {
        match channel {
            Channel::Stdout => &mut self.stdout,
            Channel::Stderr => &mut self.stderr,
        }
    }

    fn next_line(&mut self, channel: Channel, eof: bool) -> Option<String> {
        let mut codec = self.codec;
        let buf = self.buffer(channel);
        let line = if eof {
            codec.decode_eof(buf)
        } else {
            codec.decode(buf)
        };
        // LineCodec never fails.
        line.ok().flatten()
    }

    fn push_line(&mut self, raw: &str, events: &mut Vec<BurnerEvent>) {
        let line = raw.trim();
        if line.is_empty() {
            return;
        }

        let event = self.classifier.classify(line);
        debug!("burner: {}", line);
        if let BurnerEvent::Error(message) = &event {
            self.last_error = Some(message.clone());
        }
        events.push(event);
    }
}
