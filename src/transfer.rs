//! Payload Transfer System
//!
//! Streams a binary payload from a source stream to a file in a destination
//! directory, alongside (never instead of) the small control messages on the
//! same session. A transfer is created when a received message carries a
//! payload descriptor; the byte stream itself is produced by the transport
//! collaborator through the [`PayloadOpener`] interface.
//!
//! ## Lifecycle
//!
//! ```text
//! Pending → Resolving → Active → Completed
//!                          └────→ Failed
//! ```
//!
//! - **Resolving**: the destination name is re-derived until it no longer
//!   collides with an existing file. Probing is side-effect-free; nothing is
//!   written until the name is fixed.
//! - **Active**: bytes stream to the now-fixed destination; progress is
//!   monotonic.
//! - **Completed / Failed**: terminal. Exactly one terminal notification
//!   event is emitted per transfer, carrying the peer name, the resolved
//!   destination name, and the success flag. On failure the partial file is
//!   removed.
//!
//! ## Name conflict resolution
//!
//! When the candidate name exists, the *rightmost* run of digits in the name
//! is incremented, re-padded to its original width ("report007" becomes
//! "report008", not "report8"). A name with no digits gets a "1" spliced in
//! before its last extension, or appended when there is none. The scan uses
//! the digit-run pattern `(^|[^0-9])([0-9]+)` taking the last match.
//!
//! Aborting (peer disconnect, local cancel) is cooperative: the streaming
//! task observes the cancellation between chunk reads, releases the
//! destination, and emits its single terminal event with `success: false`.

use crate::fs_utils::{cleanup_partial_file, create_file_safe, write_file_safe};
use crate::notification::{NotificationSink, TransferResult};
use crate::{Message, ProtocolError, Result};
use async_trait::async_trait;
use regex::Regex;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::sync::{watch, Notify};
use tracing::{debug, info, warn};

/// Buffer size for payload streaming (64KB)
const BUFFER_SIZE: usize = 65536;

/// A readable payload byte stream supplied by the transport collaborator
pub type PayloadStream = Box<dyn AsyncRead + Send + Unpin>;

/// Produces the byte stream for a message's payload descriptor
///
/// Implemented by the transport collaborator, which knows how to turn the
/// opaque `payloadTransferInfo` negotiation parameters into a connected
/// stream of exactly the declared length.
#[async_trait]
pub trait PayloadOpener: Send + Sync {
    /// Open the payload stream described by `message`
    ///
    /// # Errors
    ///
    /// Returns an error if the message has no payload descriptor or the
    /// transport cannot reach the peer's payload endpoint.
    async fn open(&self, message: &Message) -> Result<PayloadStream>;
}

/// State of a payload transfer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferState {
    /// Created, not yet started
    Pending,
    /// Deriving a non-colliding destination name
    Resolving,
    /// Destination fixed, bytes streaming
    Active,
    /// All bytes written, terminal
    Completed,
    /// Faulted or aborted, partial file removed, terminal
    Failed,
}

impl TransferState {
    /// Check whether the transfer has reached a terminal state
    pub fn is_terminal(&self) -> bool {
        matches!(self, TransferState::Completed | TransferState::Failed)
    }
}

/// A payload transfer ready to begin
///
/// Owns the source stream and the metadata needed to resolve a destination
/// and report completion.
pub struct PayloadTransfer {
    source: PayloadStream,
    filename: String,
    total_bytes: Option<u64>,
    peer_name: String,
}

impl PayloadTransfer {
    /// Create a transfer for a payload stream
    ///
    /// `total_bytes` is the declared payload size; `None` means an
    /// indefinite stream that completes on source exhaustion.
    pub fn new(
        source: PayloadStream,
        filename: impl Into<String>,
        total_bytes: Option<u64>,
        peer_name: impl Into<String>,
    ) -> Self {
        Self {
            source,
            filename: filename.into(),
            total_bytes,
            peer_name: peer_name.into(),
        }
    }

    /// Start the transfer into `destination_dir`
    ///
    /// Resolves name conflicts, then streams in a spawned task so a large
    /// payload never blocks message dispatch. The returned handle observes
    /// progress and state, and can abort the transfer.
    pub fn begin(
        self,
        destination_dir: impl Into<PathBuf>,
        sink: Arc<dyn NotificationSink>,
    ) -> TransferHandle {
        let dir = destination_dir.into();
        let (state_tx, state_rx) = watch::channel(TransferState::Pending);
        let bytes = Arc::new(AtomicU64::new(0));
        let cancelled = Arc::new(AtomicBool::new(false));
        let cancel_notify = Arc::new(Notify::new());
        let destination = Arc::new(OnceLock::new());

        let total_bytes = self.total_bytes;
        tokio::spawn(run_transfer(
            self,
            dir,
            sink,
            state_tx,
            bytes.clone(),
            cancelled.clone(),
            cancel_notify.clone(),
            destination.clone(),
        ));

        TransferHandle {
            state: state_rx,
            bytes,
            total_bytes,
            cancelled,
            cancel_notify,
            destination,
        }
    }
}

/// Observer and controller for a running transfer
pub struct TransferHandle {
    state: watch::Receiver<TransferState>,
    bytes: Arc<AtomicU64>,
    total_bytes: Option<u64>,
    cancelled: Arc<AtomicBool>,
    cancel_notify: Arc<Notify>,
    destination: Arc<OnceLock<PathBuf>>,
}

impl TransferHandle {
    /// Current state
    pub fn state(&self) -> TransferState {
        *self.state.borrow()
    }

    /// Bytes written so far; only ever increases
    pub fn bytes_transferred(&self) -> u64 {
        self.bytes.load(Ordering::Relaxed)
    }

    /// Declared payload size, if any
    pub fn total_bytes(&self) -> Option<u64> {
        self.total_bytes
    }

    /// Resolved destination path, available once resolution finished
    pub fn destination(&self) -> Option<PathBuf> {
        self.destination.get().cloned()
    }

    /// Check whether the transfer has reached a terminal state
    pub fn is_finished(&self) -> bool {
        self.state().is_terminal()
    }

    /// Request the transfer be aborted
    ///
    /// The streaming task observes the request, removes the partial file,
    /// transitions to `Failed` and emits its terminal event. Aborting an
    /// already-terminal transfer has no effect.
    pub fn abort(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
        self.cancel_notify.notify_one();
    }

    /// Wait for the transfer to reach a terminal state
    pub async fn wait(&mut self) -> TransferState {
        loop {
            let state = *self.state.borrow_and_update();
            if state.is_terminal() {
                return state;
            }
            if self.state.changed().await.is_err() {
                return *self.state.borrow();
            }
        }
    }
}

#[allow(clippy::too_many_arguments)]
async fn run_transfer(
    transfer: PayloadTransfer,
    dir: PathBuf,
    sink: Arc<dyn NotificationSink>,
    state_tx: watch::Sender<TransferState>,
    bytes: Arc<AtomicU64>,
    cancelled: Arc<AtomicBool>,
    cancel_notify: Arc<Notify>,
    destination_cell: Arc<OnceLock<PathBuf>>,
) {
    let PayloadTransfer {
        mut source,
        filename,
        total_bytes,
        peer_name,
    } = transfer;

    let _ = state_tx.send(TransferState::Resolving);
    let destination = resolve_destination(&dir, &filename);
    let destination_name = destination
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| filename.clone());
    let _ = destination_cell.set(destination.clone());

    debug!(
        "Transfer from {} resolving '{}' -> {:?}",
        peer_name, filename, destination
    );

    let outcome = stream_payload(
        &mut source,
        &destination,
        total_bytes,
        &state_tx,
        &bytes,
        &cancelled,
        &cancel_notify,
    )
    .await;

    // Single terminal transition and single terminal event, both paths.
    // The event goes out before the state flips terminal so an observer
    // that saw the terminal state can rely on the event having been sent.
    match outcome {
        Ok(received) => {
            info!(
                "Transfer of '{}' from {} completed ({} bytes)",
                destination_name, peer_name, received
            );
            sink.transfer_finished(TransferResult {
                peer_name,
                destination_name,
                containing_dir: dir,
                success: true,
                error: None,
            });
            let _ = state_tx.send(TransferState::Completed);
        }
        Err(e) => {
            cleanup_partial_file(&destination).await;
            warn!(
                "Transfer of '{}' from {} failed: {}",
                destination_name, peer_name, e
            );
            sink.transfer_finished(TransferResult {
                peer_name,
                destination_name,
                containing_dir: dir,
                success: false,
                error: Some(e.to_string()),
            });
            let _ = state_tx.send(TransferState::Failed);
        }
    }
}

async fn stream_payload(
    source: &mut PayloadStream,
    destination: &Path,
    total_bytes: Option<u64>,
    state_tx: &watch::Sender<TransferState>,
    bytes: &AtomicU64,
    cancelled: &AtomicBool,
    cancel_notify: &Notify,
) -> Result<u64> {
    let mut file = create_file_safe(destination).await?;

    // Destination is fixed from here on
    let _ = state_tx.send(TransferState::Active);

    let mut buf = vec![0u8; BUFFER_SIZE];
    let mut received: u64 = 0;

    loop {
        if cancelled.load(Ordering::SeqCst) {
            return Err(ProtocolError::Cancelled("transfer aborted".to_string()));
        }

        let want = match total_bytes {
            Some(total) => {
                let remaining = total.saturating_sub(received);
                if remaining == 0 {
                    break;
                }
                remaining.min(BUFFER_SIZE as u64) as usize
            }
            None => BUFFER_SIZE,
        };

        let n = tokio::select! {
            read = source.read(&mut buf[..want]) => {
                read.map_err(|e| ProtocolError::from_io_error(e, "reading payload"))?
            }
            _ = cancel_notify.notified() => {
                return Err(ProtocolError::Cancelled("transfer aborted".to_string()));
            }
        };

        if n == 0 {
            match total_bytes {
                Some(total) if received < total => {
                    return Err(ProtocolError::NetworkError(format!(
                        "source exhausted after {} of {} bytes",
                        received, total
                    )));
                }
                _ => break,
            }
        }

        write_file_safe(&mut file, &buf[..n]).await?;
        received += n as u64;
        bytes.fetch_add(n as u64, Ordering::Relaxed);
    }

    file.flush()
        .await
        .map_err(|e| ProtocolError::from_io_error(e, "flushing destination"))?;

    Ok(received)
}

/// Derive the next candidate name for a colliding filename
///
/// The rightmost digit run is incremented in place, preserving zero-padding
/// width; a name without digits gets a "1" before its last extension (or
/// appended when there is none).
pub fn autoinc_filename(name: &str) -> String {
    // Matches a digit run preceded by start-of-name or a non-digit; the
    // last match is the rightmost run
    static DIGIT_RUN: OnceLock<Regex> = OnceLock::new();
    let re = DIGIT_RUN.get_or_init(|| Regex::new("(^|[^0-9])([0-9]+)").expect("valid pattern"));

    if let Some(caps) = re.captures_iter(name).last() {
        let run = caps.get(2).map(|m| (m.start(), m.end(), m.as_str()));
        if let Some((start, end, digits)) = run {
            let incremented = digits.parse::<u128>().unwrap_or(0) + 1;
            let number = format!("{:0width$}", incremented, width = digits.len());
            return format!("{}{}{}", &name[..start], number, &name[end..]);
        }
    }

    match name.rfind('.') {
        Some(dot) => format!("{}1{}", &name[..dot], &name[dot..]),
        None => format!("{}1", name),
    }
}

/// Resolve a non-colliding destination path for `filename` under `dir`
///
/// Re-derives the candidate name until it no longer collides. Probing only
/// checks for existence; nothing is created or written.
pub fn resolve_destination(dir: &Path, filename: &str) -> PathBuf {
    let mut candidate = filename.to_string();
    let mut path = dir.join(&candidate);

    while path.exists() {
        candidate = autoinc_filename(&candidate);
        path = dir.join(&candidate);
    }

    path
}
