//! Spool store
//!
//! The request body can only be read once, but an import attempt may run
//! several times. The body is therefore copied to a temporary file up front
//! and every attempt re-reads that file from the start.

use bytes::Bytes;
use futures::{Stream, StreamExt};
use std::path::Path;
use tempfile::TempPath;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio_util::io::StreamReader;
use tracing::{debug, warn};

use super::error::ImportError;
use super::progress::ImportMonitor;

/// Copy buffer size
pub const SPOOL_CHUNK_SIZE: usize = 4096;

/// A spooled request body on local disk.
///
/// The file is removed by [`Spool::close`], or on drop if `close` is never
/// reached.
#[derive(Debug)]
pub struct Spool {
    path: TempPath,
    len: u64,
}

impl Spool {
    /// Spool an HTTP body (or any fallible byte stream)
    pub async fn from_stream<S, E>(
        stream: S,
        dir: Option<&Path>,
        monitor: &ImportMonitor,
    ) -> Result<Self, ImportError>
    where
        S: Stream<Item = Result<Bytes, E>>,
        E: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        let stream = stream.map(|chunk| {
            chunk.map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e))
        });
        let reader = StreamReader::new(stream);
        tokio::pin!(reader);

        Self::from_reader(&mut reader, dir, monitor).await
    }

    /// Spool everything readable from `reader`
    pub async fn from_reader<R>(
        reader: &mut R,
        dir: Option<&Path>,
        monitor: &ImportMonitor,
    ) -> Result<Self, ImportError>
    where
        R: AsyncRead + Unpin + ?Sized,
    {
        let mut builder = tempfile::Builder::new();
        builder.prefix("import_stream");
        let temp = match dir {
            Some(dir) => builder.tempfile_in(dir)?,
            None => builder.tempfile()?,
        };
        let (file, path) = temp.into_parts();
        let mut file = tokio::fs::File::from_std(file);

        let mut buf = vec![0u8; SPOOL_CHUNK_SIZE];
        let mut len = 0u64;
        loop {
            let n = reader.read(&mut buf).await?;
            if n == 0 {
                break;
            }
            file.write_all(&buf[..n]).await?;
            len += n as u64;
            monitor.add_spooled(n as u64);
        }
        file.flush().await?;
        file.sync_all().await?;

        debug!(path = %path.display(), bytes = len, "Import stream spooled");

        Ok(Self { path, len })
    }

    /// Fresh reader positioned at the first byte
    pub async fn open(&self) -> Result<BufReader<tokio::fs::File>, ImportError> {
        let file = tokio::fs::File::open(&self.path).await?;
        Ok(BufReader::with_capacity(SPOOL_CHUNK_SIZE, file))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Number of bytes spooled
    pub fn len(&self) -> u64 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Delete the spool file
    pub fn close(self) {
        let shown = self.path.display().to_string();
        if let Err(e) = self.path.close() {
            warn!(path = %shown, error = %e, "Failed to delete import spool");
        } else {
            debug!(path = %shown, "Import spool deleted");
        }
    }
}
