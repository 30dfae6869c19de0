//! Notification and Content Collaborator Interfaces
//!
//! The desktop surface that shows alerts and the component that opens
//! received content live outside this crate. Sessions and handlers talk to
//! them through the traits here, injected at session construction rather
//! than reached through a process-wide singleton.

use crate::Result;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Context handed to the notification surface for a pairing decision
///
/// Carries enough for the surface to later call `accept_pairing()` or
/// `reject_pairing()` on the originating session.
#[derive(Debug, Clone, PartialEq)]
pub struct PairingDecisionRequest {
    /// Stable id of the requesting peer
    pub peer_id: String,
    /// Display name of the requesting peer
    pub peer_name: String,
}

/// Terminal event of a payload transfer
///
/// Emitted exactly once per transfer, success or failure. On success the
/// surface may offer an "open containing location" action using
/// `containing_dir`.
#[derive(Debug, Clone, PartialEq)]
pub struct TransferResult {
    /// Display name of the peer the payload came from
    pub peer_name: String,
    /// Final (conflict-resolved) destination file name
    pub destination_name: String,
    /// Directory the destination lives in
    pub containing_dir: PathBuf,
    /// Whether the transfer completed
    pub success: bool,
    /// Failure cause, when `success` is false
    pub error: Option<String>,
}

/// Sink for user-visible events
///
/// Implemented by the notification collaborator and injected into each
/// session. Implementations must be cheap and non-blocking; anything slow
/// belongs on the collaborator's side of the boundary.
pub trait NotificationSink: Send + Sync {
    /// An incoming pairing request needs a user decision
    fn pairing_decision_requested(&self, request: PairingDecisionRequest);

    /// A payload transfer reached its terminal state
    fn transfer_finished(&self, result: TransferResult);
}

/// Sink that only logs, for headless operation and tests
#[derive(Debug, Clone, Copy, Default)]
pub struct NullSink;

impl NotificationSink for NullSink {
    fn pairing_decision_requested(&self, request: PairingDecisionRequest) {
        info!(
            "Pairing decision requested by {} ({})",
            request.peer_name, request.peer_id
        );
    }

    fn transfer_finished(&self, result: TransferResult) {
        info!(
            "Transfer of '{}' from {} finished (success: {})",
            result.destination_name, result.peer_name, result.success
        );
    }
}

/// Opens shared inline content (text, URLs) and file locations
///
/// Text and URL shares carry their content in the message body and never go
/// through the payload transfer machinery; they hand off here directly.
pub trait ContentOpener: Send + Sync {
    /// Present a piece of shared text to the user
    fn open_text(&self, text: &str) -> Result<()>;

    /// Open a shared URL with the default handler
    fn open_url(&self, url: &str) -> Result<()>;

    /// Open the directory containing a finished transfer
    fn open_location(&self, dir: &Path) -> Result<()>;
}

/// Default opener backed by the platform's URL/file associations
///
/// Shared text is spooled to a temporary file and opened with the default
/// editor, mirroring how the desktop handles it when no dedicated viewer is
/// around.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemOpener;

impl ContentOpener for SystemOpener {
    fn open_text(&self, text: &str) -> Result<()> {
        let path = std::env::temp_dir().join(format!(
            "devicelink-share-{}.txt",
            crate::message::current_timestamp()
        ));
        std::fs::write(&path, text)?;
        debug!("Spooled shared text to {:?}", path);
        open::that(&path)?;
        Ok(())
    }

    fn open_url(&self, url: &str) -> Result<()> {
        debug!("Opening shared URL: {}", url);
        open::that(url)?;
        Ok(())
    }

    fn open_location(&self, dir: &Path) -> Result<()> {
        open::that(dir)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_null_sink_is_silent() {
        let sink = NullSink;
        sink.pairing_decision_requested(PairingDecisionRequest {
            peer_id: "id".into(),
            peer_name: "Phone".into(),
        });
        sink.transfer_finished(TransferResult {
            peer_name: "Phone".into(),
            destination_name: "file.txt".into(),
            containing_dir: PathBuf::from("/tmp"),
            success: true,
            error: None,
        });
    }
}
