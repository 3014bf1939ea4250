//! Metered, pull-driven conduits between byte streams.
//!
//! Both directions wrap the source stream and forward one chunk per poll of
//! the consumer. Nothing is read ahead, so a slow sink holds the source back.

use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};

use bytes::Bytes;
use futures::Stream;
use futures::stream::StreamExt;
use thiserror::Error;
use tracing::{debug, info, warn};

use coffer_blob::{BlobMetadata, ByteStream};
use coffer_core::{BlobId, RecordId};

/// An inbound stream grew past the configured maximum size.
#[derive(Debug, Error)]
#[error("payload exceeds the {limit} byte limit")]
pub struct LimitExceeded {
    /// The maximum number of bytes allowed.
    pub limit: u64,
}

/// An outbound stream failed after `offset` bytes were delivered.
#[derive(Debug, Error)]
#[error("transfer failed after {offset} bytes: {source}")]
pub struct TransferFailed {
    /// Bytes delivered to the consumer before the failure.
    pub offset: u64,
    /// The error raised by the storage stream.
    #[source]
    pub source: io::Error,
}

/// Factory for inbound and outbound transfer streams.
#[derive(Debug, Clone, Copy, Default)]
pub struct TransferPipe {
    max_bytes: Option<u64>,
}

impl TransferPipe {
    /// Create a pipe. Inbound transfers larger than `max_bytes` are cut off.
    #[must_use]
    pub fn new(max_bytes: Option<u64>) -> Self {
        Self { max_bytes }
    }

    /// The inbound size limit, if any.
    #[must_use]
    pub fn max_bytes(&self) -> Option<u64> {
        self.max_bytes
    }

    /// Wrap an upload source, enforcing the size limit.
    ///
    /// The chunk that crosses the limit is replaced by an error wrapping
    /// [`LimitExceeded`] and the stream ends there.
    pub fn inbound<'a>(&self, source: ByteStream<'a>) -> ByteStream<'a> {
        match self.max_bytes {
            None => source,
            Some(limit) => Inbound {
                source,
                offset: 0,
                limit,
                done: false,
            }
            .boxed(),
        }
    }

    /// Wrap a stored blob's content for delivery to a consumer.
    ///
    /// Source errors are rewrapped as [`TransferFailed`] with the offset
    /// reached. Completion, failure and early drop are logged.
    pub fn outbound(
        &self,
        record_id: RecordId,
        metadata: &BlobMetadata,
        source: ByteStream<'static>,
    ) -> ByteStream<'static> {
        Outbound {
            source,
            record_id,
            blob_id: metadata.id.clone(),
            expected: metadata.size_bytes,
            offset: 0,
            finished: false,
        }
        .boxed()
    }
}

struct Inbound<'a> {
    source: ByteStream<'a>,
    offset: u64,
    limit: u64,
    done: bool,
}

impl Stream for Inbound<'_> {
    type Item = io::Result<Bytes>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        if this.done {
            return Poll::Ready(None);
        }
        match this.source.poll_next_unpin(cx) {
            Poll::Ready(Some(Ok(chunk))) => {
                this.offset += chunk.len() as u64;
                if this.offset > this.limit {
                    this.done = true;
                    debug!(limit = this.limit, "upload exceeded size limit");
                    return Poll::Ready(Some(Err(io::Error::other(LimitExceeded {
                        limit: this.limit,
                    }))));
                }
                Poll::Ready(Some(Ok(chunk)))
            }
            Poll::Ready(Some(Err(e))) => {
                this.done = true;
                Poll::Ready(Some(Err(e)))
            }
            Poll::Ready(None) => {
                this.done = true;
                Poll::Ready(None)
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

struct Outbound {
    source: ByteStream<'static>,
    record_id: RecordId,
    blob_id: BlobId,
    expected: u64,
    offset: u64,
    finished: bool,
}

impl Stream for Outbound {
    type Item = io::Result<Bytes>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        if this.finished {
            return Poll::Ready(None);
        }
        match this.source.poll_next_unpin(cx) {
            Poll::Ready(Some(Ok(chunk))) => {
                this.offset += chunk.len() as u64;
                Poll::Ready(Some(Ok(chunk)))
            }
            Poll::Ready(Some(Err(source))) => {
                this.finished = true;
                warn!(
                    record_id = %this.record_id,
                    blob_id = %this.blob_id,
                    offset = this.offset,
                    error = %source,
                    "attachment download failed"
                );
                let kind = source.kind();
                Poll::Ready(Some(Err(io::Error::new(
                    kind,
                    TransferFailed {
                        offset: this.offset,
                        source,
                    },
                ))))
            }
            Poll::Ready(None) => {
                this.finished = true;
                debug!(
                    record_id = %this.record_id,
                    blob_id = %this.blob_id,
                    bytes = this.offset,
                    "attachment download complete"
                );
                Poll::Ready(None)
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

impl Drop for Outbound {
    fn drop(&mut self) {
        if !self.finished {
            info!(
                record_id = %self.record_id,
                blob_id = %self.blob_id,
                offset = self.offset,
                expected = self.expected,
                "attachment download cancelled by consumer"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use coffer_blob::{collect, from_chunks};

    use super::*;

    fn metadata(size: u64) -> BlobMetadata {
        BlobMetadata {
            id: BlobId::new("b1"),
            filename: "f.bin".into(),
            content_type: "application/octet-stream".into(),
            size_bytes: size,
            checksum_sha256: String::new(),
            created_at: coffer_core::now(),
        }
    }

    fn chunks(sizes: &[usize]) -> ByteStream<'static> {
        let items: Vec<io::Result<Bytes>> = sizes
            .iter()
            .map(|&n| Ok(Bytes::from(vec![7u8; n])))
            .collect();
        from_chunks(items)
    }

    #[tokio::test]
    async fn inbound_without_limit_passes_through() {
        let pipe = TransferPipe::default();
        let all = collect(pipe.inbound(chunks(&[10, 20]))).await.unwrap();
        assert_eq!(all.len(), 30);
    }

    #[tokio::test]
    async fn inbound_at_limit_is_accepted() {
        let pipe = TransferPipe::new(Some(30));
        let all = collect(pipe.inbound(chunks(&[10, 20]))).await.unwrap();
        assert_eq!(all.len(), 30);
    }

    #[tokio::test]
    async fn inbound_over_limit_fails_with_limit_exceeded() {
        let pipe = TransferPipe::new(Some(25));
        let mut stream = pipe.inbound(chunks(&[10, 20, 5]));

        assert_eq!(stream.next().await.unwrap().unwrap().len(), 10);
        let err = stream.next().await.unwrap().unwrap_err();
        let limit = err
            .get_ref()
            .and_then(|e| e.downcast_ref::<LimitExceeded>())
            .expect("error should carry LimitExceeded");
        assert_eq!(limit.limit, 25);
        assert!(stream.next().await.is_none(), "stream ends after the breach");
    }

    #[tokio::test]
    async fn inbound_forwards_source_errors_and_stops() {
        let pipe = TransferPipe::new(Some(1_000));
        let source = from_chunks(vec![
            Ok(Bytes::from_static(b"abc")),
            Err(io::Error::new(io::ErrorKind::ConnectionReset, "reset")),
            Ok(Bytes::from_static(b"never")),
        ]);
        let mut stream = pipe.inbound(source);
        stream.next().await.unwrap().unwrap();
        let err = stream.next().await.unwrap().unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::ConnectionReset);
        assert!(stream.next().await.is_none());
    }

    #[tokio::test]
    async fn outbound_reports_offset_on_failure() {
        let pipe = TransferPipe::default();
        let source = from_chunks(vec![
            Ok(Bytes::from(vec![1u8; 100])),
            Ok(Bytes::from(vec![1u8; 50])),
            Err(io::Error::new(io::ErrorKind::UnexpectedEof, "chunk missing")),
        ]);
        let mut stream = pipe.outbound(RecordId::generate(), &metadata(300), source);

        stream.next().await.unwrap().unwrap();
        stream.next().await.unwrap().unwrap();
        let err = stream.next().await.unwrap().unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);
        let failed = err
            .get_ref()
            .and_then(|e| e.downcast_ref::<TransferFailed>())
            .expect("error should carry TransferFailed");
        assert_eq!(failed.offset, 150);
        assert!(stream.next().await.is_none());
    }

    #[tokio::test]
    async fn outbound_is_pull_driven() {
        let pulled = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&pulled);
        let source = futures::stream::iter(0..3)
            .map(move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok::<_, io::Error>(Bytes::from(vec![0u8; 10]))
            })
            .boxed();

        let pipe = TransferPipe::default();
        let mut stream = pipe.outbound(RecordId::generate(), &metadata(30), source);
        assert_eq!(stream.next().await.unwrap().unwrap().len(), 10);
        assert_eq!(pulled.load(Ordering::SeqCst), 1, "no read-ahead");
        drop(stream);
        assert_eq!(pulled.load(Ordering::SeqCst), 1);
    }
}
