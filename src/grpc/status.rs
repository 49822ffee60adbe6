//! Final `grpc-status` detection for layers that sit outside tonic's routes.
//!
//! A gRPC response carries its status in one of two places:
//!
//! - the response headers, for trailers-only responses (errors raised before
//!   any message was sent, unknown services)
//! - the trailers frame at the end of the body
//!
//! [`watch_status`] checks the headers and otherwise wraps the body in a
//! [`StatusBody`] that reports the status once the trailers arrive. A body
//! that ends without trailers reports `Ok`; one dropped before the end
//! reports `Cancelled`.

use std::pin::Pin;
use std::task::{Context, Poll, ready};

use axum::http::{HeaderMap, Response};
use http_body::{Body, Frame, SizeHint};
use pin_project_lite::pin_project;
use tonic::Code;

type Callback = Box<dyn FnOnce(Code) + Send + 'static>;

/// Runs a callback exactly once with the final status code.
///
/// Dropping an unfired hook fires it with [`Code::Cancelled`].
pub(crate) struct StatusHook(Option<Callback>);

impl StatusHook {
    pub(crate) fn new(on_status: impl FnOnce(Code) + Send + 'static) -> Self {
        Self(Some(Box::new(on_status)))
    }

    /// A hook with nothing to report to.
    pub(crate) fn none() -> Self {
        Self(None)
    }

    pub(crate) fn fire(&mut self, code: Code) {
        if let Some(on_status) = self.0.take() {
            on_status(code);
        }
    }
}

impl Drop for StatusHook {
    fn drop(&mut self) {
        self.fire(Code::Cancelled);
    }
}

/// The `grpc-status` carried by a header map, if any.
pub(crate) fn code_from_headers(headers: &HeaderMap) -> Option<Code> {
    tonic::Status::from_header_map(headers).map(|status| status.code())
}

/// Fire `hook` now for trailers-only responses, otherwise when the body ends.
pub(crate) fn watch_status<B>(response: Response<B>, mut hook: StatusHook) -> Response<StatusBody<B>> {
    if let Some(code) = code_from_headers(response.headers()) {
        hook.fire(code);
    }
    response.map(|inner| StatusBody { inner, hook })
}

pin_project! {
    /// Response body that reports the call's final status to a [`StatusHook`].
    pub struct StatusBody<B> {
        #[pin]
        inner: B,
        hook: StatusHook,
    }
}

impl<B> StatusBody<B> {
    /// Wrap `inner` without reporting anything.
    pub(crate) fn passthrough(inner: B) -> Self {
        Self {
            inner,
            hook: StatusHook::none(),
        }
    }
}

impl<B: Body> Body for StatusBody<B> {
    type Data = B::Data;
    type Error = B::Error;

    fn poll_frame(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
        let this = self.project();
        let polled = ready!(this.inner.poll_frame(cx));

        match &polled {
            Some(Ok(frame)) => {
                if let Some(trailers) = frame.trailers_ref() {
                    this.hook
                        .fire(code_from_headers(trailers).unwrap_or(Code::Unknown));
                }
            }
            Some(Err(_)) => this.hook.fire(Code::Unknown),
            None => this.hook.fire(Code::Ok),
        }

        Poll::Ready(polled)
    }

    fn is_end_stream(&self) -> bool {
        self.inner.is_end_stream()
    }

    fn size_hint(&self) -> SizeHint {
        self.inner.size_hint()
    }
}

/// Test body yielding data frames then optional trailers.
#[cfg(test)]
pub(crate) mod testing {
    use std::collections::VecDeque;
    use std::convert::Infallible;

    use axum::body::Bytes;

    use super::*;

    pub(crate) struct FramesBody(VecDeque<Frame<Bytes>>);

    impl FramesBody {
        pub(crate) fn new(data: &'static str, trailers: Option<HeaderMap>) -> Self {
            let mut frames = VecDeque::from([Frame::data(Bytes::from_static(data.as_bytes()))]);
            if let Some(trailers) = trailers {
                frames.push_back(Frame::trailers(trailers));
            }
            Self(frames)
        }
    }

    impl Body for FramesBody {
        type Data = Bytes;
        type Error = Infallible;

        fn poll_frame(
            mut self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
        ) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
            Poll::Ready(self.0.pop_front().map(Ok))
        }
    }

    pub(crate) fn grpc_status(code: Code) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert("grpc-status", i32::from(code).into());
        headers
    }
}
