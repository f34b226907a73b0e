//! SHA-1 hashing wrapper around an upload body stream
//!
//! B2 upload requests may send `X-Bz-Content-Sha1: hex_digits_at_end` and
//! append the hex digest after the content bytes. [`HashingStream`] produces
//! exactly that body: it forwards the source chunks while hashing them, and
//! once the source is exhausted it emits the 40-character digest as a final
//! chunk. Digest bytes are never fed back into the hash.

use std::io;
use std::pin::Pin;
use std::sync::{Arc, OnceLock};
use std::task::{Context, Poll};

use bytes::Bytes;
use futures::Stream;
use sha1::{Digest, Sha1};

/// Length of the hex SHA-1 trailer appended to every upload body.
pub const SHA1_HEX_LEN: u64 = 40;

/// Callback invoked with the running count of source bytes consumed.
/// The trailer does not count.
pub type ProgressFn = Arc<dyn Fn(u64) + Send + Sync>;

/// Handle through which the final digest becomes visible once the stream is
/// exhausted. The HTTP machinery takes ownership of the stream itself, so
/// callers keep one of these to read the digest after the request completes.
#[derive(Clone, Debug, Default)]
pub struct DigestHandle {
    cell: Arc<OnceLock<String>>,
}

impl DigestHandle {
    /// The finalized hex digest, or `None` while the source is still being read.
    pub fn get(&self) -> Option<String> {
        self.cell.get().cloned()
    }
}

enum Phase {
    Streaming,
    Finished,
}

/// Byte stream that hashes everything it forwards and appends the digest.
pub struct HashingStream<S> {
    inner: S,
    hasher: Option<Sha1>,
    handle: DigestHandle,
    phase: Phase,
    bytes_consumed: u64,
    progress: Option<ProgressFn>,
}

impl<S> HashingStream<S> {
    pub fn new(inner: S) -> Self {
        Self {
            inner,
            hasher: Some(Sha1::new()),
            handle: DigestHandle::default(),
            phase: Phase::Streaming,
            bytes_consumed: 0,
            progress: None,
        }
    }

    /// Register a progress callback fed with the cumulative source byte count.
    pub fn with_progress(mut self, progress: ProgressFn) -> Self {
        self.progress = Some(progress);
        self
    }

    /// Handle that outlives the stream and yields the digest after exhaustion.
    pub fn digest_handle(&self) -> DigestHandle {
        self.handle.clone()
    }

    /// The finalized digest, available once the source is exhausted.
    pub fn digest(&self) -> Option<String> {
        self.handle.get()
    }
}

impl<S> Stream for HashingStream<S>
where
    S: Stream<Item = io::Result<Bytes>> + Unpin,
{
    type Item = io::Result<Bytes>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        match this.phase {
            Phase::Streaming => match Pin::new(&mut this.inner).poll_next(cx) {
                Poll::Ready(Some(Ok(chunk))) => {
                    if let Some(hasher) = this.hasher.as_mut() {
                        hasher.update(&chunk);
                    }
                    this.bytes_consumed += chunk.len() as u64;
                    if let Some(progress) = &this.progress {
                        progress(this.bytes_consumed);
                    }
                    Poll::Ready(Some(Ok(chunk)))
                }
                Poll::Ready(Some(Err(err))) => Poll::Ready(Some(Err(err))),
                Poll::Ready(None) => {
                    this.phase = Phase::Finished;
                    let Some(hasher) = this.hasher.take() else {
                        return Poll::Ready(None);
                    };
                    let digest = hex::encode(hasher.finalize());
                    let _ = this.handle.cell.set(digest.clone());
                    Poll::Ready(Some(Ok(Bytes::from(digest))))
                }
                Poll::Pending => Poll::Pending,
            },
            Phase::Finished => Poll::Ready(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::stream::{self, StreamExt};

    fn chunked(data: &[u8], chunk_size: usize) -> impl Stream<Item = io::Result<Bytes>> + Unpin {
        let chunks: Vec<io::Result<Bytes>> = data
            .chunks(chunk_size.max(1))
            .map(|c| Ok(Bytes::copy_from_slice(c)))
            .collect();
        stream::iter(chunks)
    }

    async fn collect(mut s: impl Stream<Item = io::Result<Bytes>> + Unpin) -> Vec<u8> {
        let mut out = Vec::new();
        while let Some(chunk) = s.next().await {
            out.extend_from_slice(&chunk.unwrap());
        }
        out
    }

    // SHA-1("abc")
    const ABC_SHA1: &str = "a9993e364706816aba3e25717850c26c9cd0d89d";

    #[tokio::test]
    async fn test_body_ends_with_digest_trailer() {
        let hashing = HashingStream::new(chunked(b"abc", 1));
        let handle = hashing.digest_handle();

        let body = collect(hashing).await;

        assert_eq!(&body[..3], b"abc");
        assert_eq!(&body[3..], ABC_SHA1.as_bytes());
        assert_eq!(body.len(), 3 + SHA1_HEX_LEN as usize);
        assert_eq!(handle.get().as_deref(), Some(ABC_SHA1));
    }

    #[tokio::test]
    async fn test_digest_is_chunking_invariant() {
        let data: Vec<u8> = (0u32..4096).map(|i| (i % 251) as u8).collect();

        let mut digests = Vec::new();
        for chunk_size in [1, 7, 64, 1000, 4096, 9999] {
            let hashing = HashingStream::new(chunked(&data, chunk_size));
            let handle = hashing.digest_handle();
            collect(hashing).await;
            digests.push(handle.get().unwrap());
        }

        let expected = hex::encode(Sha1::digest(&data));
        assert!(digests.iter().all(|d| *d == expected));
    }

    #[tokio::test]
    async fn test_digest_unavailable_until_exhaustion() {
        let mut hashing = HashingStream::new(chunked(b"hello world", 4));

        assert!(hashing.digest().is_none());
        hashing.next().await;
        assert!(hashing.digest().is_none());

        while hashing.next().await.is_some() {}
        assert_eq!(
            hashing.digest(),
            Some(hex::encode(Sha1::digest(b"hello world")))
        );
    }

    #[tokio::test]
    async fn test_reading_past_trailer_yields_end_of_stream() {
        let mut hashing = HashingStream::new(chunked(b"abc", 16));

        assert!(hashing.next().await.is_some()); // content
        assert!(hashing.next().await.is_some()); // trailer
        assert!(hashing.next().await.is_none());
        assert!(hashing.next().await.is_none());
    }

    #[tokio::test]
    async fn test_empty_source_still_produces_digest() {
        let hashing = HashingStream::new(stream::iter(Vec::<io::Result<Bytes>>::new()));
        let handle = hashing.digest_handle();

        let body = collect(hashing).await;

        // SHA-1 of the empty input
        assert_eq!(body, b"da39a3ee5e6b4b0d3255bfef95601890afd80709");
        assert_eq!(handle.get().unwrap().len(), SHA1_HEX_LEN as usize);
    }

    #[tokio::test]
    async fn test_progress_counts_source_bytes_only() {
        use std::sync::Mutex;

        let seen: Arc<Mutex<Vec<u64>>> = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let hashing = HashingStream::new(chunked(b"0123456789", 3))
            .with_progress(Arc::new(move |n| sink.lock().unwrap().push(n)));

        collect(hashing).await;

        let seen = seen.lock().unwrap();
        assert_eq!(*seen, vec![3, 6, 9, 10]);
    }

    #[tokio::test]
    async fn test_source_errors_propagate() {
        let failing = stream::iter(vec![
            Ok(Bytes::from_static(b"ok")),
            Err(io::Error::new(io::ErrorKind::ConnectionReset, "reset")),
        ]);
        let mut hashing = HashingStream::new(failing);
        let handle = hashing.digest_handle();

        assert!(hashing.next().await.unwrap().is_ok());
        assert!(hashing.next().await.unwrap().is_err());
        assert!(handle.get().is_none());
    }
}
