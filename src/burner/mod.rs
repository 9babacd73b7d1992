//! Driving the external burner process.
//!
//! The burner reports its progress as text on both stdout and stderr. Both pipes
//! are pumped into one queue in arrival order and decoded by a single
//! consumer, so events come out in the order the lines were produced.

use std::ffi::OsStr;
use std::io;
use std::pin::Pin;
use std::process::{ExitStatus, Stdio};
use std::task::{Context, Poll};

use log::{error, info, warn};
use tokio::io::AsyncRead;
use tokio::process::{Child, Command};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_stream::{Stream, StreamExt};
use tokio_util::codec::{BytesCodec, FramedRead};
use tokio_util::sync::CancellationToken;

use crate::error::{Error, ProcessError, Result};
use crate::image::ImageSet;

mod codec;
mod config;
mod decoder;
mod types;

pub use codec::{decode_output, decode_with, LineCodec};
pub use decoder::{flash_id_size, LineClassifier, OutputDecoder};
pub use types::{BurnerConfig, BurnerEvent, BurnerOutput, Channel, Chunk};

pub struct Burner {
    config: BurnerConfig,
}

impl Burner {
    pub fn new(config: BurnerConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &BurnerConfig {
        &self.config
    }

    /// Starts flashing `images`. Must be called from within a tokio runtime.
    pub fn spawn(&self, images: &ImageSet, cancel: CancellationToken) -> Result<BurnerSession> {
        let args = self.config.args(images);
        self.spawn_with_args(args, cancel)
    }

    /// Starts the burner with an explicit command line.
    pub fn spawn_with_args<I, S>(&self, args: I, cancel: CancellationToken) -> Result<BurnerSession>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        info!("Starting {}", self.config.program.display());

        let mut child = Command::new(&self.config.program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                error!("Failed to start {}: {}", self.config.program.display(), e);
                ProcessError::Spawn(e)
            })?;

        let (chunk_tx, chunk_rx) = mpsc::unbounded_channel();
        if let Some(stdout) = child.stdout.take() {
            tokio::spawn(pump(stdout, Channel::Stdout, chunk_tx.clone()));
        }
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(pump(stderr, Channel::Stderr, chunk_tx));
        }

        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let task = tokio::spawn(drive(child, chunk_rx, event_tx, cancel));

        Ok(BurnerSession {
            events: event_rx,
            task,
        })
    }
}

/// A running burner: an ordered event stream plus the final outcome.
pub struct BurnerSession {
    events: mpsc::UnboundedReceiver<BurnerEvent>,
    task: JoinHandle<Result<BurnerOutput>>,
}

impl BurnerSession {
    /// Next event, or `None` once the burner has exited and all output is
    /// decoded.
    pub async fn next_event(&mut self) -> Option<BurnerEvent> {
        self.events.recv().await
    }

    /// Waits for the burner to exit. Events not yet received are dropped.
    pub async fn wait(self) -> Result<BurnerOutput> {
        match self.task.await {
            Ok(result) => result,
            Err(e) => Err(Error::Io(io::Error::new(io::ErrorKind::Other, e))),
        }
    }

    /// Forwards every event to `on_event`, then returns the outcome.
    pub async fn run<F>(mut self, mut on_event: F) -> Result<BurnerOutput>
    where
        F: FnMut(BurnerEvent),
    {
        while let Some(event) = self.events.recv().await {
            on_event(event);
        }
        self.wait().await
    }
}

impl Stream for BurnerSession {
    type Item = BurnerEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.events.poll_recv(cx)
    }
}

async fn pump<R>(reader: R, channel: Channel, tx: mpsc::UnboundedSender<Chunk>)
where
    R: AsyncRead + Unpin,
{
    let mut frames = FramedRead::new(reader, BytesCodec::new());
    while let Some(frame) = frames.next().await {
        match frame {
            Ok(data) => {
                if tx.send(Chunk::new(channel, data.freeze())).is_err() {
                    break;
                }
            }
            Err(e) => {
                warn!("Failed to read burner {:?}: {}", channel, e);
                break;
            }
        }
    }
}

async fn drive(
    mut child: Child,
    mut chunks: mpsc::UnboundedReceiver<Chunk>,
    events: mpsc::UnboundedSender<BurnerEvent>,
    cancel: CancellationToken,
) -> Result<BurnerOutput> {
    let mut decoder = OutputDecoder::new();

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(kill(&mut child).await),
            chunk = chunks.recv() => match chunk {
                Some(chunk) => {
                    for event in decoder.feed(chunk) {
                        let _ = events.send(event);
                    }
                }
                None => break,
            },
        }
    }

    for event in decoder.finish() {
        let _ = events.send(event);
    }

    let status = tokio::select! {
        biased;
        _ = cancel.cancelled() => return Err(kill(&mut child).await),
        status = child.wait() => status?,
    };

    let (output, last_error) = decoder.into_parts();
    classify_exit(status, output, last_error)
}

async fn kill(child: &mut Child) -> Error {
    if let Err(e) = child.kill().await {
        warn!("Failed to kill burner: {}", e);
    }
    info!("Burner cancelled");
    ProcessError::Cancelled.into()
}

fn classify_exit(
    status: ExitStatus,
    output: String,
    last_error: Option<String>,
) -> Result<BurnerOutput> {
    match status.code() {
        Some(0) => {
            info!("Burner finished successfully");
            Ok(BurnerOutput { output })
        }
        Some(code) => {
            error!("Burner exited with code {}", code);
            Err(ProcessError::AbnormalExit { code, last_error }.into())
        }
        None => {
            let signal = exit_signal(&status);
            error!("Burner terminated by signal {:?}", signal);
            Err(ProcessError::Terminated { signal }.into())
        }
    }
}

#[cfg(unix)]
fn exit_signal(status: &ExitStatus) -> Option<i32> {
    use std::os::unix::process::ExitStatusExt;
    status.signal()
}

#[cfg(not(unix))]
fn exit_signal(_status: &ExitStatus) -> Option<i32> {
    None
}
