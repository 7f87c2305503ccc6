//! Rate-limited writer

use pin_project_lite::pin_project;
use std::future::Future;
use std::io;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::io::AsyncWrite;

use super::TokenBucket;

type Acquire = Pin<Box<dyn Future<Output = ()> + Send>>;

pin_project! {
    /// A writer that takes one token per byte from a [`TokenBucket`]
    ///
    /// Tokens are taken before the bytes are handed to the inner writer, at
    /// most one burst at a time. Tokens left over from a short write are kept
    /// for the next one.
    pub struct RateLimitedWriter<W> {
        #[pin]
        inner: W,
        bucket: Arc<TokenBucket>,
        acquiring: Option<(usize, Acquire)>,
        granted: usize,
    }
}

impl<W> RateLimitedWriter<W> {
    pub fn new(inner: W, bucket: Arc<TokenBucket>) -> Self {
        Self {
            inner,
            bucket,
            acquiring: None,
            granted: 0,
        }
    }

    pub fn bucket(&self) -> &Arc<TokenBucket> {
        &self.bucket
    }

    /// Get a reference to the inner writer
    pub fn inner(&self) -> &W {
        &self.inner
    }

    /// Consume this wrapper and return the inner writer
    pub fn into_inner(self) -> W {
        self.inner
    }
}

impl<W: AsyncWrite> AsyncWrite for RateLimitedWriter<W> {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        let this = self.project();
        if buf.is_empty() {
            return this.inner.poll_write(cx, buf);
        }

        if *this.granted == 0 {
            let (want, acquire) = this.acquiring.get_or_insert_with(|| {
                let want = buf.len().min(this.bucket.burst() as usize);
                let bucket = Arc::clone(this.bucket);
                let acquire: Acquire = Box::pin(async move { bucket.acquire(want).await });
                (want, acquire)
            });
            match acquire.as_mut().poll(cx) {
                Poll::Pending => return Poll::Pending,
                Poll::Ready(()) => {
                    *this.granted = *want;
                    *this.acquiring = None;
                }
            }
        }

        let n = buf.len().min(*this.granted);
        let result = this.inner.poll_write(cx, &buf[..n]);
        if let Poll::Ready(Ok(written)) = &result {
            *this.granted -= *written;
        }
        result
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        self.project().inner.poll_flush(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        self.project().inner.poll_shutdown(cx)
    }
}
