//! Stream hashing helpers.

use std::io;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use digest::{Digest, Output as DigestOutput};
use tokio::io::{AsyncRead, ReadBuf};
use tokio::sync::OnceCell;

/// An [`AsyncRead`] adapter that feeds every byte through a digest.
///
/// The hash and the total byte count become available through the
/// returned [`OnceCell`] once the inner reader signals EOF; reading the
/// stream only partially leaves the cell empty.
pub struct HashReader<R, D: Digest> {
    inner: R,
    digest: Option<D>,
    bytes_read: usize,
    finalized: Arc<OnceCell<(DigestOutput<D>, usize)>>,
}

impl<R, D: Digest> HashReader<R, D> {
    pub fn new(inner: R, digest: D) -> (Self, Arc<OnceCell<(DigestOutput<D>, usize)>>) {
        let finalized = Arc::new(OnceCell::new());

        let reader = Self {
            inner,
            digest: Some(digest),
            bytes_read: 0,
            finalized: finalized.clone(),
        };

        (reader, finalized)
    }
}

impl<R, D> AsyncRead for HashReader<R, D>
where
    R: AsyncRead + Unpin,
    D: Digest + Unpin,
{
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        let before = buf.filled().len();

        match Pin::new(&mut this.inner).poll_read(cx, buf) {
            Poll::Ready(Ok(())) => {
                let filled = &buf.filled()[before..];

                if filled.is_empty() {
                    // EOF: finalize exactly once.
                    if let Some(digest) = this.digest.take() {
                        let _ = this.finalized.set((digest.finalize(), this.bytes_read));
                    }
                } else if let Some(digest) = this.digest.as_mut() {
                    digest.update(filled);
                    this.bytes_read += filled.len();
                }

                Poll::Ready(Ok(()))
            }
            other => other,
        }
    }
}
