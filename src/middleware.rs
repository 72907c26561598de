//! Request logging middleware for [`tower`] services over [`http`] requests.
//!
//! Every request gets a fresh request id bound into a [`LogContext`]. The context is
//! inserted into the request extensions and made current while the inner service runs,
//! so both [`ContextLogger`] calls and plain `log` macros in handlers carry the id.
//!
//! Unless the request matches a [`BypassRule`], the middleware emits an
//! "Incoming request" record with [`RequestDetails`] before calling the inner service
//! and a "Request completed" record with the latency in seconds afterwards.

use std::{
    net::SocketAddr,
    pin::Pin,
    sync::Arc,
    task::{Context, Poll, ready},
    time::Instant,
};

use http::Request;
use pin_project::pin_project;
use serde::Serialize;
use tokio_util::sync::DropGuard;
use tower::{Layer, Service};

use crate::{
    BypassRegistry, BypassRule, ContextLogger, ContextValue, FutureExt, LogContext,
    MiddlewareConfig, future::LogContextFuture,
};

/// The remote socket address of a request, as reported by the server.
///
/// Insert it into the request extensions before the middleware runs. A
/// [`SocketAddr`] extension is used as a fallback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteAddr(pub String);

impl From<SocketAddr> for RemoteAddr {
    fn from(addr: SocketAddr) -> Self {
        Self(addr.to_string())
    }
}

/// Snapshot of an incoming request, logged as the `details` attribute.
///
/// Missing headers are rendered as empty strings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RequestDetails {
    pub method: String,
    pub url: String,
    pub path: String,
    pub query_params: String,
    pub protocol: String,
    pub host: String,

    pub user_ip: String,
    pub remote_addr: String,
    pub user_agent: String,
    pub referer: String,

    pub content_type: String,
    pub content_length: Option<u64>,
    pub accept: String,
    pub accept_encoding: String,
    pub accept_language: String,

    pub origin: String,

    pub x_forwarded_for: String,
    pub x_forwarded_proto: String,
    pub x_forwarded_host: String,
    pub x_real_ip: String,
    pub x_client_ip: String,
}

const X_FORWARDED_FOR: &str = "x-forwarded-for";
const X_REAL_IP: &str = "x-real-ip";
const X_CLIENT_IP: &str = "x-client-ip";

fn header<B>(req: &Request<B>, name: &str) -> String {
    req.headers()
        .get(name)
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default()
        .to_owned()
}

impl RequestDetails {
    pub fn from_request<B>(req: &Request<B>) -> Self {
        let host = req
            .headers()
            .get(http::header::HOST)
            .and_then(|value| value.to_str().ok())
            .or_else(|| req.uri().authority().map(http::uri::Authority::as_str))
            .unwrap_or_default()
            .to_owned();
        let content_length = req
            .headers()
            .get(http::header::CONTENT_LENGTH)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.trim().parse().ok());

        Self {
            method: req.method().to_string(),
            url: req.uri().to_string(),
            path: req.uri().path().to_owned(),
            query_params: req.uri().query().unwrap_or_default().to_owned(),
            protocol: format!("{:?}", req.version()),
            host,

            user_ip: client_ip(req),
            remote_addr: remote_addr(req),
            user_agent: header(req, "user-agent"),
            referer: header(req, "referer"),

            content_type: header(req, "content-type"),
            content_length,
            accept: header(req, "accept"),
            accept_encoding: header(req, "accept-encoding"),
            accept_language: header(req, "accept-language"),

            origin: header(req, "origin"),

            x_forwarded_for: header(req, X_FORWARDED_FOR),
            x_forwarded_proto: header(req, "x-forwarded-proto"),
            x_forwarded_host: header(req, "x-forwarded-host"),
            x_real_ip: header(req, X_REAL_IP),
            x_client_ip: header(req, X_CLIENT_IP),
        }
    }
}

fn remote_addr<B>(req: &Request<B>) -> String {
    let extensions = req.extensions();
    extensions
        .get::<RemoteAddr>()
        .map(|addr| addr.0.clone())
        .or_else(|| extensions.get::<SocketAddr>().map(ToString::to_string))
        .unwrap_or_default()
}

/// Host part of a `host:port` address, `[v6]:port` included.
fn split_host(addr: &str) -> Option<&str> {
    let host = if let Some(rest) = addr.strip_prefix('[') {
        let (host, tail) = rest.split_once(']')?;
        tail.strip_prefix(':')?;
        host
    } else {
        let (host, _port) = addr.rsplit_once(':')?;
        if host.contains(':') {
            return None;
        }
        host
    };
    (!host.is_empty()).then_some(host)
}

/// Resolves the IP of the client that sent `req`.
///
/// The first non-empty candidate wins: the first entry of `X-Forwarded-For`,
/// `X-Real-IP`, `X-Client-IP`, the host of the remote address and finally the remote
/// address as is.
pub fn client_ip<B>(req: &Request<B>) -> String {
    let forwarded_for = header(req, X_FORWARDED_FOR);
    let forwarded_for = forwarded_for.split(',').next().unwrap_or_default().trim();
    if !forwarded_for.is_empty() {
        return forwarded_for.to_owned();
    }

    for name in [X_REAL_IP, X_CLIENT_IP] {
        let value = header(req, name);
        if !value.is_empty() {
            return value;
        }
    }

    let remote_addr = remote_addr(req);
    split_host(&remote_addr).map_or_else(|| remote_addr.clone(), ToOwned::to_owned)
}

/// Returns the log context the middleware attached to `req`, or the current context
/// if the request did not pass through the middleware.
pub fn request_context<B>(req: &Request<B>) -> LogContext {
    req.extensions()
        .get::<LogContext>()
        .cloned()
        .unwrap_or_else(LogContext::current)
}

#[derive(Debug, Clone)]
struct Options {
    log_request_details: bool,
    log_completion: bool,
    bypass: BypassRegistry,
}

/// [`Layer`] that wraps services with [`RequestLogging`].
///
/// # Examples
///
/// ```
/// use request_logger::{BypassRule, ContextLogger, RequestLoggingLayer};
///
/// let logger = ContextLogger::new(env_logger::builder().build()).request_id_prefix("API-");
/// let layer = RequestLoggingLayer::new(logger)
///     .log_completion(false)
///     .bypass([BypassRule::glob("/health"), BypassRule::regex("/metrics").methods("GET")]);
/// ```
#[derive(Debug, Clone)]
pub struct RequestLoggingLayer {
    logger: ContextLogger,
    options: Arc<Options>,
}

impl RequestLoggingLayer {
    /// Creates a layer that logs request details and completion for every request.
    #[must_use]
    pub fn new(logger: ContextLogger) -> Self {
        Self::from_config(logger, MiddlewareConfig::default())
    }

    #[must_use]
    pub fn from_config(logger: ContextLogger, config: MiddlewareConfig) -> Self {
        Self {
            logger,
            options: Arc::new(Options {
                log_request_details: config.log_request_details,
                log_completion: config.log_completion,
                bypass: BypassRegistry::new(config.bypass),
            }),
        }
    }

    #[must_use]
    pub fn log_request_details(mut self, enabled: bool) -> Self {
        Arc::make_mut(&mut self.options).log_request_details = enabled;
        self
    }

    #[must_use]
    pub fn log_completion(mut self, enabled: bool) -> Self {
        Arc::make_mut(&mut self.options).log_completion = enabled;
        self
    }

    /// Replaces the bypass rules. The rules are compiled right away.
    #[must_use]
    pub fn bypass(mut self, rules: impl IntoIterator<Item = BypassRule>) -> Self {
        Arc::make_mut(&mut self.options).bypass = BypassRegistry::new(rules);
        self
    }
}

impl<S> Layer<S> for RequestLoggingLayer {
    type Service = RequestLogging<S>;

    fn layer(&self, inner: S) -> Self::Service {
        RequestLogging {
            inner,
            logger: self.logger.clone(),
            options: self.options.clone(),
        }
    }
}

/// Middleware that assigns request ids and logs requests, see the [module](self) docs.
#[derive(Debug, Clone)]
pub struct RequestLogging<S> {
    inner: S,
    logger: ContextLogger,
    options: Arc<Options>,
}

impl<S, B> Service<Request<B>> for RequestLogging<S>
where
    S: Service<Request<B>>,
{
    type Response = S::Response;
    type Error = S::Error;
    type Future = ResponseFuture<S::Future>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, mut req: Request<B>) -> Self::Future {
        let started_at = Instant::now();

        let (context, cancel) = request_context(&req).with_cancel();
        let context = context.with_request_id(self.logger.generate_request_id());

        let bypassed = self
            .options
            .bypass
            .should_bypass(req.uri().path(), req.method().as_str());

        if self.options.log_request_details && !bypassed {
            let details = RequestDetails::from_request(&req);
            self.logger.info_with(
                &context,
                "Incoming request",
                [("details", ContextValue::serde(details))],
            );
        }

        req.extensions_mut().insert(context.clone());
        let inner = self.inner.call(req).in_log_context(context.clone());

        ResponseFuture {
            inner,
            completion: Some(Completion {
                logger: self.logger.clone(),
                context,
                started_at,
                log_completion: self.options.log_completion && !bypassed,
                _cancel: cancel.drop_guard(),
            }),
        }
    }
}

#[derive(Debug)]
struct Completion {
    logger: ContextLogger,
    context: LogContext,
    started_at: Instant,
    log_completion: bool,
    // Cancels the request context once the response is ready or the future is dropped.
    _cancel: DropGuard,
}

impl Completion {
    fn finish(self) {
        let latency = self.started_at.elapsed();
        if self.log_completion {
            self.logger.info_with(
                &self.context,
                "Request completed",
                [("latency", ContextValue::from(latency.as_secs_f64()))],
            );
        }
    }
}

/// Response future of [`RequestLogging`].
#[pin_project]
#[derive(Debug)]
pub struct ResponseFuture<F> {
    #[pin]
    inner: LogContextFuture<F>,
    completion: Option<Completion>,
}

impl<F> Future for ResponseFuture<F>
where
    F: Future,
{
    type Output = F::Output;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.project();

        let output = ready!(this.inner.poll(cx));
        if let Some(completion) = this.completion.take() {
            completion.finish();
        }
        Poll::Ready(output)
    }
}
