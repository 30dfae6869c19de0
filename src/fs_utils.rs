//! File System Utilities
//!
//! Safe file operations for the transfer subsystem: parent directory
//! creation, write helpers that refine disk-full and permission errors, and
//! partial-file cleanup after a failed transfer.

use crate::{ProtocolError, Result};
use std::path::Path;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

/// Ensure parent directory exists, creating it if necessary
pub async fn ensure_parent_dir(file_path: impl AsRef<Path>) -> Result<()> {
    let file_path = file_path.as_ref();

    if let Some(parent) = file_path.parent() {
        if !parent.exists() {
            debug!("Creating parent directory: {}", parent.display());

            fs::create_dir_all(parent).await.map_err(|e| {
                if e.kind() == std::io::ErrorKind::PermissionDenied {
                    ProtocolError::PermissionDenied(format!(
                        "Cannot create directory {}: permission denied",
                        parent.display()
                    ))
                } else {
                    ProtocolError::from_io_error(
                        e,
                        &format!("creating directory {}", parent.display()),
                    )
                }
            })?;
        }
    }

    Ok(())
}

/// Create a file, ensuring its parent directory exists
///
/// # Errors
///
/// - `PermissionDenied` for permission errors
/// - `ResourceExhausted` for disk full
/// - `Io` for other errors
pub async fn create_file_safe(path: impl AsRef<Path>) -> Result<fs::File> {
    let path = path.as_ref();

    ensure_parent_dir(path).await?;

    let file = fs::File::create(path).await.map_err(|e| match e.kind() {
        std::io::ErrorKind::PermissionDenied => ProtocolError::PermissionDenied(format!(
            "Cannot create file {}: permission denied",
            path.display()
        )),
        _ => {
            let error_msg = e.to_string().to_lowercase();
            if error_msg.contains("no space") || error_msg.contains("disk full") {
                ProtocolError::ResourceExhausted(format!(
                    "Disk full: cannot create file {}",
                    path.display()
                ))
            } else {
                ProtocolError::from_io_error(e, &format!("creating file {}", path.display()))
            }
        }
    })?;

    debug!("Created file: {}", path.display());
    Ok(file)
}

/// Write data to a file, converting disk-full errors to `ResourceExhausted`
pub async fn write_file_safe(file: &mut fs::File, data: &[u8]) -> Result<()> {
    file.write_all(data).await.map_err(|e| {
        let error_msg = e.to_string().to_lowercase();
        if error_msg.contains("no space") || error_msg.contains("disk full") {
            ProtocolError::ResourceExhausted("Disk full during file write".to_string())
        } else {
            ProtocolError::Io(e)
        }
    })
}

/// Clean up a partially written file
///
/// Attempts to delete the file; logs errors but does not fail, since this
/// runs on an already-failed path.
pub async fn cleanup_partial_file(path: impl AsRef<Path>) {
    let path = path.as_ref();

    if path.exists() {
        if let Err(e) = fs::remove_file(path).await {
            warn!("Failed to clean up partial file {}: {}", path.display(), e);
        } else {
            debug!("Cleaned up partial file: {}", path.display());
        }
    }
}
