//! File transfer coordinator
//!
//! Drives the upload and download handshakes on top of the framer and the
//! blob store. The server assumes one transfer per direction per connection:
//! an upload owns the connection's read side until the declared bytes have
//! arrived, and a download holds the peer's write lock for the whole blob so
//! no chat or relay write can interleave with the announced byte stream.

use tokio::io::{AsyncReadExt, AsyncWriteExt};

use crate::error::{Result, TransferError};
use crate::protocol::notice;
use crate::storage::{FileRecord, FileStore};

use super::connection::ControlStream;
use super::{PeerHandle, SharedState};

/// Receive one announced upload into the blob store.
///
/// Returns the names of peers whose `FILE_NEW_AVAILABLE` notice could not be
/// delivered. A transport failure mid-transfer deletes the partial blob and
/// propagates so the connection tears down; a bad file name is only reported
/// to the uploader.
pub async fn receive_upload(
    state: &SharedState,
    stream: &mut ControlStream,
    peer: &PeerHandle,
    raw_name: &str,
    size: u64,
) -> Result<Vec<String>> {
    let name = match FileStore::sanitize(raw_name) {
        Ok(name) => name,
        Err(e) => {
            tracing::warn!(peer = peer.name(), raw_name, "rejecting upload: {e}");
            peer.send_line(&notice::file_upload_error(&e.to_string())).await?;
            return Ok(Vec::new());
        }
    };
    tracing::info!(peer = peer.name(), file = %name, size, "upload starting");

    let path = state.store.blob_path(&name);
    let mut blob = match tokio::fs::File::create(&path).await {
        Ok(file) => file,
        Err(e) => {
            // READY was never sent, so the peer sends no bytes.
            tracing::error!(file = %name, error = %e, "could not create blob");
            peer.send_line(&notice::file_upload_error("server storage failure")).await?;
            return Ok(Vec::new());
        }
    };

    peer.send_line(&notice::file_ready_to_recv(&name)).await?;

    match stream.stream_payload_to(size as usize, &mut blob).await {
        Ok(received) => {
            blob.flush().await?;
            drop(blob);
            state.store.insert(FileRecord {
                name: name.clone(),
                size,
                owner: peer.name().to_string(),
            });
            tracing::info!(peer = peer.name(), file = %name, received, "upload complete");
            let line = notice::file_new_available(peer.name(), &name, size);
            Ok(state
                .registry
                .broadcast(line.as_bytes(), Some(peer.name()))
                .await)
        }
        Err(e) => {
            drop(blob);
            if let Err(remove_err) = tokio::fs::remove_file(&path).await {
                tracing::warn!(file = %name, error = %remove_err, "could not remove partial blob");
            }
            tracing::warn!(peer = peer.name(), file = %name, error = %e, "upload aborted");
            Err(TransferError::Aborted(e.to_string()).into())
        }
    }
}

/// Send one blob back to the requester: the `FILE_SEND_START` header followed
/// immediately by exactly the announced number of raw bytes.
pub async fn send_download(state: &SharedState, peer: &PeerHandle, raw_name: &str) -> Result<()> {
    let name = match FileStore::sanitize(raw_name) {
        Ok(name) => name,
        Err(_) => {
            peer.send_line(&notice::file_not_found(raw_name)).await?;
            return Ok(());
        }
    };
    if state.store.record(&name).is_none() {
        peer.send_line(&notice::file_not_found(&name)).await?;
        return Ok(());
    }

    let path = state.store.blob_path(&name);
    let file = match tokio::fs::File::open(&path).await {
        Ok(file) => file,
        Err(e) => {
            tracing::warn!(file = %name, error = %e, "cataloged blob missing on disk");
            peer.send_line(&notice::file_not_found(&name)).await?;
            return Ok(());
        }
    };

    // Announce the on-disk size and send exactly that many bytes, so the
    // requester can read to the announced length even if a re-upload lands
    // while we stream.
    let size = file.metadata().await?.len();
    tracing::info!(peer = peer.name(), file = %name, size, "download starting");

    let mut writer = peer.lock_writer().await;
    writer
        .write_all(notice::file_send_start(&name, size).as_bytes())
        .await?;
    let mut capped = file.take(size);
    tokio::io::copy(&mut capped, &mut *writer).await?;
    writer.flush().await?;
    tracing::info!(peer = peer.name(), file = %name, "download complete");
    Ok(())
}
