//! Byte stream type shared by blob stores and their callers.

use std::io;

use bytes::{Bytes, BytesMut};
use futures::stream::{self, BoxStream, StreamExt, TryStreamExt};

/// A boxed stream of content chunks.
///
/// Inbound streams may borrow from the request that produced them; streams
/// handed out by [`BlobStore::read`](crate::BlobStore::read) are `'static`.
pub type ByteStream<'a> = BoxStream<'a, io::Result<Bytes>>;

/// A stream yielding `data` as a single chunk.
pub fn from_bytes(data: impl Into<Bytes>) -> ByteStream<'static> {
    stream::once(futures::future::ready(Ok(data.into()))).boxed()
}

/// A stream yielding each item of `chunks` in order.
pub fn from_chunks<I>(chunks: I) -> ByteStream<'static>
where
    I: IntoIterator<Item = io::Result<Bytes>>,
    I::IntoIter: Send + 'static,
{
    stream::iter(chunks).boxed()
}

/// Drain a stream into a single buffer.
///
/// Only intended for small payloads and tests; production paths stream.
pub async fn collect(stream: ByteStream<'_>) -> io::Result<Bytes> {
    let buf = stream
        .try_fold(BytesMut::new(), |mut acc, chunk| async move {
            acc.extend_from_slice(&chunk);
            Ok(acc)
        })
        .await?;
    Ok(buf.freeze())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn collect_concatenates_chunks() {
        let stream = from_chunks(vec![
            Ok(Bytes::from_static(b"ab")),
            Ok(Bytes::new()),
            Ok(Bytes::from_static(b"cd")),
        ]);
        let all = collect(stream).await.unwrap();
        assert_eq!(&all[..], b"abcd");
    }

    #[tokio::test]
    async fn collect_surfaces_errors() {
        let stream = from_chunks(vec![
            Ok(Bytes::from_static(b"ab")),
            Err(io::Error::new(io::ErrorKind::BrokenPipe, "gone")),
        ]);
        let err = collect(stream).await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::BrokenPipe);
    }
}
