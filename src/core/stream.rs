//! Streaming support for squirrel-dl
//!
//! Adapts an HTTP response body into an AsyncRead the transfer loop can pull
//! fixed-size buffers from.

use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::io::{AsyncRead, ReadBuf};
use futures::TryStreamExt;

/// Buffer size for the transfer read loop (64 KiB).
pub const TRANSFER_BUFFER_SIZE: usize = 64 * 1024;

/// Byte stream of one in-flight transfer.
pub struct TransferStream {
    inner: Box<dyn AsyncRead + Send + Unpin>,
}

impl AsyncRead for TransferStream {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        Pin::new(&mut self.inner).poll_read(cx, buf)
    }
}

/// Creates a TransferStream from an HTTP response
pub fn create_transfer_stream(response: reqwest::Response) -> TransferStream {
    let inner = Box::new(tokio_util::io::StreamReader::new(
        response
            .bytes_stream()
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e)),
    ));
    TransferStream { inner }
}
