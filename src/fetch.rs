//! Chunked download of document content from the storage backend.

use std::io::Cursor;

use thiserror::Error;
use tracing::debug;

use crate::error::FailureKind;
use crate::google::{DriveError, StorageBackend};

/// Default chunk size: 8 MiB.
pub const DEFAULT_CHUNK_SIZE: u64 = 8 * 1024 * 1024;

#[derive(Error, Debug)]
pub enum FetchError {
    #[error("download failed: {0}")]
    Backend(#[from] DriveError),
    #[error("file {0} has no content")]
    Empty(String),
    /// The backend stopped returning bytes before the advertised size.
    #[error("download of {file_id} stalled at {received} of {expected} bytes")]
    Stalled {
        file_id: String,
        received: u64,
        expected: u64,
    },
}

impl FetchError {
    pub fn kind(&self) -> FailureKind {
        match self {
            FetchError::Backend(e) => e.kind(),
            FetchError::Empty(_) => FailureKind::Malformed,
            FetchError::Stalled { .. } => FailureKind::Transient,
        }
    }
}

pub struct ContentFetcher<'a> {
    storage: &'a dyn StorageBackend,
    chunk_size: u64,
}

impl<'a> ContentFetcher<'a> {
    pub fn new(storage: &'a dyn StorageBackend) -> Self {
        Self {
            storage,
            chunk_size: DEFAULT_CHUNK_SIZE,
        }
    }

    pub fn with_chunk_size(mut self, chunk_size: u64) -> Self {
        self.chunk_size = chunk_size.max(1);
        self
    }

    /// Download the whole file into memory.
    ///
    /// Stops once the offset reaches the reported total size or, when the
    /// backend does not report one, at the first short chunk.
    pub async fn fetch(&self, origin_id: &str) -> Result<Cursor<Vec<u8>>, FetchError> {
        let mut buffer: Vec<u8> = Vec::new();
        let mut total: Option<u64> = None;

        loop {
            let offset = buffer.len() as u64;
            let chunk = self
                .storage
                .download_chunk(origin_id, offset, self.chunk_size)
                .await?;
            if total.is_none() {
                total = chunk.total_size;
            }
            let received = chunk.bytes.len() as u64;
            buffer.extend_from_slice(&chunk.bytes);

            let done = buffer.len() as u64;
            match total {
                Some(total) => debug!(
                    "Download {}: {}% ({} of {} bytes)",
                    origin_id,
                    if total == 0 { 100 } else { done * 100 / total },
                    done,
                    total
                ),
                None => debug!("Download {}: {} bytes so far", origin_id, done),
            }

            match total {
                Some(total) if done >= total => break,
                Some(total) if received == 0 => {
                    return Err(FetchError::Stalled {
                        file_id: origin_id.to_string(),
                        received: done,
                        expected: total,
                    })
                }
                Some(_) => {}
                None if received < self.chunk_size => break,
                None => {}
            }
        }

        if buffer.is_empty() {
            return Err(FetchError::Empty(origin_id.to_string()));
        }

        Ok(Cursor::new(buffer))
    }
}
