use std::{
    pin::Pin,
    task::{ready, Context, Poll},
};

use http_body::{Body, Frame, SizeHint};
use pin_project_lite::pin_project;

use crate::instrument::RequestLifecycle;

pin_project! {
    /// Response body that signals the end of the response to its [`RequestLifecycle`].
    ///
    /// Reaching the end of the stream finishes the request, an error frame fails it, and dropping the body before the
    /// end closes it.
    pub struct InstrumentedBody<B> {
        #[pin]
        inner: B,
        lifecycle: RequestLifecycle,
    }
}

impl<B> InstrumentedBody<B> {
    pub(crate) fn new(inner: B, lifecycle: RequestLifecycle) -> Self {
        InstrumentedBody { inner, lifecycle }
    }

    /// Returns a reference to the wrapped body.
    pub fn get_ref(&self) -> &B {
        &self.inner
    }
}

impl<B> Body for InstrumentedBody<B>
where
    B: Body,
{
    type Data = B::Data;
    type Error = B::Error;

    fn poll_frame(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
        let mut this = self.project();
        let frame = ready!(this.inner.as_mut().poll_frame(cx));

        match &frame {
            None => this.lifecycle.finish(),
            Some(Err(_)) => this.lifecycle.error(),
            Some(Ok(_)) => {
                // Bodies that know they are done after this frame may never be polled again.
                if this.inner.is_end_stream() {
                    this.lifecycle.finish();
                }
            }
        }

        Poll::Ready(frame)
    }

    fn is_end_stream(&self) -> bool {
        self.inner.is_end_stream()
    }

    fn size_hint(&self) -> SizeHint {
        self.inner.size_hint()
    }
}
