//! Log context propagation across `.await` points.

use std::{
    pin::Pin,
    task::{Context, Poll},
};

use pin_project::pin_project;

use crate::{LogContext, stack::CONTEXT_STACK};

/// Extension trait that runs a future inside a [`LogContext`].
pub trait FutureExt: Future + Sized {
    /// Makes `context` current for the calling thread every time the future is polled.
    fn in_log_context(self, context: LogContext) -> LogContextFuture<Self>;
}

impl<F> FutureExt for F
where
    F: Future,
{
    fn in_log_context(self, context: LogContext) -> LogContextFuture<Self> {
        LogContextFuture {
            inner: self,
            context,
        }
    }
}

/// Future returned by [`FutureExt::in_log_context`].
#[pin_project]
#[derive(Debug)]
pub struct LogContextFuture<F> {
    #[pin]
    inner: F,
    context: LogContext,
}

impl<F> Future for LogContextFuture<F>
where
    F: Future,
{
    type Output = F::Output;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.project();

        let _guard = this.context.clone().enter();
        this.inner.poll(cx)
    }
}
