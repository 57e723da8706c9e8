//! Cache read streams
//!
//! A read stream is handed out before its metadata lookup has happened.
//! The lookup runs on the first read and the stream then moves through
//! `Pending -> Streaming -> Closed`, or to `Errored` if the lookup or the
//! blob read fails.

use std::future::Future;
use std::io;
use std::pin::Pin;
use std::task::{ready, Context, Poll};

use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncReadExt, ReadBuf};
use tracing::{debug, trace};

use super::errors::CacheResult;
use crate::store::BlobSource;

/// Deferred metadata lookup resolving to the blob source
pub(crate) type Lookup = Pin<Box<dyn Future<Output = CacheResult<BlobSource>> + Send>>;

/// Observable phase of a [`CacheReadStream`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadPhase {
    /// Metadata lookup not finished yet
    Pending,
    /// Relaying bytes from the blob store
    Streaming,
    /// All bytes delivered
    Closed,
    /// Lookup or read failed; the error was delivered once
    Errored,
}

enum ReadState {
    Pending(Lookup),
    Streaming(BlobSource),
    Closed,
    Errored,
}

/// Readable handle to a cached blob
pub struct CacheReadStream {
    url: String,
    state: ReadState,
}

impl CacheReadStream {
    pub(crate) fn new(url: String, lookup: Lookup) -> Self {
        Self {
            url,
            state: ReadState::Pending(lookup),
        }
    }

    /// URL this stream was opened for
    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn phase(&self) -> ReadPhase {
        match self.state {
            ReadState::Pending(_) => ReadPhase::Pending,
            ReadState::Streaming(_) => ReadPhase::Streaming,
            ReadState::Closed => ReadPhase::Closed,
            ReadState::Errored => ReadPhase::Errored,
        }
    }

    /// Read the whole blob into memory
    pub async fn collect(mut self) -> CacheResult<Bytes> {
        let mut data = Vec::new();
        self.read_to_end(&mut data).await?;
        Ok(Bytes::from(data))
    }
}

impl AsyncRead for CacheReadStream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        loop {
            match &mut this.state {
                ReadState::Pending(lookup) => {
                    let resolved = ready!(lookup.as_mut().poll(cx));
                    match resolved {
                        Ok(source) => {
                            debug!(url = %this.url, "Read stream ready");
                            this.state = ReadState::Streaming(source);
                        }
                        Err(e) => {
                            debug!(url = %this.url, error = %e, "Read stream failed");
                            this.state = ReadState::Errored;
                            return Poll::Ready(Err(e.into()));
                        }
                    }
                }
                ReadState::Streaming(source) => {
                    let before = buf.filled().len();
                    let polled = ready!(source.as_mut().poll_read(cx, buf));
                    return match polled {
                        Ok(()) => {
                            if buf.filled().len() == before && buf.remaining() > 0 {
                                trace!(url = %this.url, "Read stream closed");
                                this.state = ReadState::Closed;
                            }
                            Poll::Ready(Ok(()))
                        }
                        Err(e) => {
                            this.state = ReadState::Errored;
                            Poll::Ready(Err(e))
                        }
                    };
                }
                ReadState::Closed => return Poll::Ready(Ok(())),
                ReadState::Errored => {
                    return Poll::Ready(Err(io::Error::other(format!(
                        "read stream for {} already failed",
                        this.url
                    ))))
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::CacheError;
    use crate::store::StoreError;

    fn ready_lookup(data: &'static [u8]) -> Lookup {
        Box::pin(async move { Ok::<_, CacheError>(Box::pin(io::Cursor::new(data)) as BlobSource) })
    }

    #[tokio::test]
    async fn test_pending_until_first_read() {
        let stream = CacheReadStream::new("u".to_string(), ready_lookup(b"abc"));
        assert_eq!(stream.phase(), ReadPhase::Pending);
        assert_eq!(stream.collect().await.unwrap(), Bytes::from_static(b"abc"));
    }

    #[tokio::test]
    async fn test_phases_through_close() {
        let mut stream = CacheReadStream::new("u".to_string(), ready_lookup(b"abc"));
        let mut buf = [0u8; 8];

        let n = stream.read(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"abc");
        assert_eq!(stream.phase(), ReadPhase::Streaming);

        assert_eq!(stream.read(&mut buf).await.unwrap(), 0);
        assert_eq!(stream.phase(), ReadPhase::Closed);
    }

    #[tokio::test]
    async fn test_lookup_error_is_delivered() {
        let lookup: Lookup =
            Box::pin(async { Err::<BlobSource, _>(CacheError::KeyNotFound("http://a/b.png".to_string())) });
        let mut stream = CacheReadStream::new("http://a/b.png".to_string(), lookup);

        let err = CacheError::from(stream.read(&mut [0u8; 4]).await.unwrap_err());
        assert!(matches!(&err, CacheError::KeyNotFound(url) if url == "http://a/b.png"));
        assert_eq!(stream.phase(), ReadPhase::Errored);
    }

    #[tokio::test]
    async fn test_store_error_passes_through() {
        let lookup: Lookup = Box::pin(async {
            Err::<BlobSource, _>(CacheError::Store(StoreError::Backend("disk gone".to_string())))
        });
        let stream = CacheReadStream::new("u".to_string(), lookup);

        let err = stream.collect().await.unwrap_err();
        assert!(matches!(err, CacheError::Store(StoreError::Backend(_))));
    }
}
