//! Request and response bodies.
//!
//! The handler answers with a [`Body`]: status replies, lock and multistatus
//! documents are a single in-memory chunk, GET streams file contents. On
//! the request side [`StreamBody`] adapts any `Stream` of buffers to
//! `http_body::Body`, so servers that hand out a stream can be served too.

use std::error::Error as StdError;
use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};

use bytes::{Buf, Bytes};
use futures_util::stream::{BoxStream, Stream};
use http::header::HeaderMap;
use http_body::{Body as HttpBody, SizeHint};

use pin_project::pin_project;
use pin_utils::pin_mut;

/// Response body. Implements both `Stream` and `http_body::Body`.
pub struct Body {
    pub(crate) inner: Payload,
}

pub(crate) enum Payload {
    Once(Option<Bytes>),
    Chunked(BoxStream<'static, io::Result<Bytes>>),
}

impl Body {
    /// A body without content.
    pub fn empty() -> Body {
        Body {
            inner: Payload::Once(None),
        }
    }

    /// A body that yields the chunks of `stream`.
    pub fn stream(stream: impl Stream<Item = io::Result<Bytes>> + Send + 'static) -> Body {
        Body {
            inner: Payload::Chunked(Box::pin(stream)),
        }
    }

    fn once(data: Bytes) -> Body {
        let inner = if data.is_empty() {
            Payload::Once(None)
        } else {
            Payload::Once(Some(data))
        };
        Body { inner }
    }
}

impl Stream for Body {
    type Item = io::Result<Bytes>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context) -> Poll<Option<Self::Item>> {
        match &mut self.inner {
            Payload::Once(data) => Poll::Ready(data.take().map(Ok)),
            Payload::Chunked(stream) => {
                pin_mut!(stream);
                stream.poll_next(cx)
            }
        }
    }
}

impl HttpBody for Body {
    type Data = Bytes;
    type Error = io::Error;

    fn poll_data(
        self: Pin<&mut Self>,
        cx: &mut Context,
    ) -> Poll<Option<Result<Self::Data, Self::Error>>> {
        self.poll_next(cx)
    }

    fn poll_trailers(
        self: Pin<&mut Self>,
        _cx: &mut Context,
    ) -> Poll<Result<Option<HeaderMap>, Self::Error>> {
        Poll::Ready(Ok(None))
    }

    fn is_end_stream(&self) -> bool {
        matches!(self.inner, Payload::Once(None))
    }

    fn size_hint(&self) -> SizeHint {
        match &self.inner {
            Payload::Once(None) => SizeHint::with_exact(0),
            Payload::Once(Some(b)) => SizeHint::with_exact(b.len() as u64),
            Payload::Chunked(_) => SizeHint::default(),
        }
    }
}

macro_rules! body_from {
    ($($t:ty),*) => {
        $(
            impl From<$t> for Body {
                fn from(t: $t) -> Body {
                    Body::once(Bytes::from(t))
                }
            }
        )*
    };
}

body_from!(String, Vec<u8>, Bytes);

impl From<&str> for Body {
    fn from(t: &str) -> Body {
        Body::once(Bytes::copy_from_slice(t.as_bytes()))
    }
}

/// Wraps a request-body `Stream` so it can be passed to
/// [`DavHandler::handle`](crate::DavHandler::handle).
#[pin_project]
pub(crate) struct StreamBody<B> {
    #[pin]
    body: B,
}

impl<B> StreamBody<B> {
    pub(crate) fn new(body: B) -> StreamBody<B> {
        StreamBody { body }
    }
}

impl<B, D, E> HttpBody for StreamBody<B>
where
    D: Buf + Send,
    E: StdError + Send + Sync + 'static,
    B: Stream<Item = Result<D, E>>,
{
    type Data = D;
    type Error = E;

    fn poll_data(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Result<D, E>>> {
        self.project().body.poll_next(cx)
    }

    fn poll_trailers(
        self: Pin<&mut Self>,
        _cx: &mut Context,
    ) -> Poll<Result<Option<HeaderMap>, E>> {
        Poll::Ready(Ok(None))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::{stream, StreamExt};

    #[tokio::test]
    async fn once_and_chunked() {
        let mut b = Body::from("hello");
        assert_eq!(HttpBody::size_hint(&b).exact(), Some(5));
        assert_eq!(b.next().await.unwrap().unwrap(), "hello");
        assert!(b.next().await.is_none());
        assert!(b.is_end_stream());

        assert!(Body::from(Vec::new()).is_end_stream());

        let chunks = vec![Ok(Bytes::from("a")), Ok(Bytes::from("b"))];
        let b = Body::stream(stream::iter(chunks));
        assert_eq!(HttpBody::size_hint(&b).exact(), None);
        let all: Vec<_> = b.map(|c| c.unwrap()).collect().await;
        assert_eq!(all, vec![Bytes::from("a"), Bytes::from("b")]);
    }

    #[tokio::test]
    async fn request_stream() {
        let chunks: Vec<Result<Bytes, io::Error>> = vec![Ok(Bytes::from("x")), Ok(Bytes::from("yz"))];
        let mut body = Box::pin(StreamBody::new(stream::iter(chunks)));
        let mut data = Vec::new();
        while let Some(chunk) = futures_util::future::poll_fn(|cx| body.as_mut().poll_data(cx)).await {
            data.extend_from_slice(&chunk.unwrap());
        }
        assert_eq!(data, b"xyz");
    }
}
