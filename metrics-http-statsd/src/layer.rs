use std::{
    future::Future,
    pin::Pin,
    sync::Arc,
    task::{ready, Context, Poll},
};

use http::{Method, Request, Response, StatusCode};
use http_body::Body;
use pin_project_lite::pin_project;
use tower_layer::Layer;
use tower_service::Service;

use crate::{
    body::InstrumentedBody,
    config::{Config, ConfigError},
    context::RequestStats,
    instrument::{Instrumentation, RequestLifecycle},
    sink::MetricsSink,
};

/// Layer that reports request metrics for the services it wraps.
///
/// More information on the behavior of the layer can be found in [`StatsdService`].
#[derive(Clone, Debug)]
pub struct StatsdLayer {
    instrumentation: Arc<Instrumentation>,
}

impl StatsdLayer {
    /// Creates a layer that sends metrics to the StatsD client described by `config`.
    ///
    /// # Errors
    ///
    /// If the configuration is invalid, or the StatsD client cannot be built, an error is returned.
    pub fn new(config: Config) -> Result<Self, ConfigError> {
        Instrumentation::new(config).map(Self::from_instrumentation)
    }

    /// Creates a layer that sends metrics to the given sink.
    ///
    /// # Errors
    ///
    /// If the configuration is invalid, an error is returned.
    pub fn with_sink<S>(config: Config, sink: S) -> Result<Self, ConfigError>
    where
        S: MetricsSink + 'static,
    {
        Instrumentation::with_sink(config, sink).map(Self::from_instrumentation)
    }

    /// Creates a layer from existing instrumentation.
    pub fn from_instrumentation(instrumentation: Instrumentation) -> Self {
        StatsdLayer { instrumentation: Arc::new(instrumentation) }
    }
}

impl<S> Layer<S> for StatsdLayer {
    type Service = StatsdService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        StatsdService { inner, instrumentation: Arc::clone(&self.instrumentation) }
    }
}

/// Service that reports a status code counter and a response time timer for every response that finishes.
///
/// For each request, the service:
///
/// - starts the response timer
/// - makes sure the request extensions hold a [`RequestStats`], inserting one if an outer layer has not
/// - calls the inner service straight away
/// - wraps the response body, so that the end of the response can be observed
///
/// Metrics are reported once the response body has been fully produced. Responses that carry no body (replies to
/// `HEAD` requests, and `1xx`, `204` and `304` responses) are reported as soon as their head is ready. If the inner service fails, the body yields an
/// error, or the response (or its body) is dropped before the end, nothing is reported. The metric key and tags are
/// read from the [`RequestStats`] at that point, so the inner service is free to set them while handling the request.
#[derive(Clone, Debug)]
pub struct StatsdService<S> {
    inner: S,
    instrumentation: Arc<Instrumentation>,
}

impl<S> StatsdService<S> {
    /// Returns a reference to the inner service.
    pub fn get_ref(&self) -> &S {
        &self.inner
    }
}

impl<S, ReqBody, ResBody> Service<Request<ReqBody>> for StatsdService<S>
where
    S: Service<Request<ReqBody>, Response = Response<ResBody>>,
    ResBody: Body,
{
    type Response = Response<InstrumentedBody<ResBody>>;
    type Error = S::Error;
    type Future = ResponseFuture<S::Future>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, mut req: Request<ReqBody>) -> Self::Future {
        let stats = RequestStats::get_or_insert(req.extensions_mut());
        let lifecycle = self.instrumentation.arm(stats);
        let is_head = req.method() == Method::HEAD;

        ResponseFuture { inner: self.inner.call(req), lifecycle: Some(lifecycle), is_head }
    }
}

pin_project! {
    /// Response future of [`StatsdService`].
    pub struct ResponseFuture<F> {
        #[pin]
        inner: F,
        lifecycle: Option<RequestLifecycle>,
        is_head: bool,
    }
}

// 1xx, 204 and 304 responses never carry a body.
fn status_allows_body(status: StatusCode) -> bool {
    !(status.is_informational() || status == StatusCode::NO_CONTENT || status == StatusCode::NOT_MODIFIED)
}

impl<F, ResBody, E> Future for ResponseFuture<F>
where
    F: Future<Output = Result<Response<ResBody>, E>>,
    ResBody: Body,
{
    type Output = Result<Response<InstrumentedBody<ResBody>>, E>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.project();
        let result = ready!(this.inner.poll(cx));
        let mut lifecycle = this.lifecycle.take().expect("ResponseFuture polled after completion");

        match result {
            Ok(response) => {
                lifecycle.set_status(response.status());

                let (parts, body) = response.into_parts();

                // Servers send nothing past the head for bodiless responses, and may never poll a body that is
                // already at its end, so such responses are finished as soon as the head is ready.
                if *this.is_head || !status_allows_body(parts.status) || body.is_end_stream() {
                    lifecycle.finish();
                }

                Poll::Ready(Ok(Response::from_parts(parts, InstrumentedBody::new(body, lifecycle))))
            }
            Err(e) => {
                lifecycle.error();
                Poll::Ready(Err(e))
            }
        }
    }
}
