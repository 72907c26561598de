//! A current log context guard.

use std::marker::PhantomData;

use crate::{LogContext, stack::CONTEXT_STACK};

/// A guard representing the current log context of a thread.
///
/// When the guard is dropped, the context is removed from the context stack and the
/// previously entered context becomes current again.
/// This is returned by the [`LogContext::enter`] method.
///
/// # Examples
///
/// ```
/// use request_logger::LogContext;
///
/// let guard = LogContext::new().with_request_id("req-1").enter();
/// assert_eq!(LogContext::current().request_id(), Some("req-1"));
///
/// drop(guard);
/// assert_eq!(LogContext::current().request_id(), None);
/// ```
#[non_exhaustive]
#[derive(Debug)]
pub struct LogContextGuard<'a> {
    // Make this guard unsendable.
    _marker: PhantomData<&'a *mut ()>,
}

impl LogContextGuard<'_> {
    pub(crate) fn enter(context: LogContext) -> Self {
        CONTEXT_STACK.with(|stack| stack.push(context));
        Self {
            _marker: PhantomData,
        }
    }
}

impl Drop for LogContextGuard<'_> {
    fn drop(&mut self) {
        CONTEXT_STACK.with(|stack| stack.pop());
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::stack::ContextStack;

    #[test]
    fn test_log_context_guard_enter() {
        let context = LogContext::new().with_request_id("req-1");
        assert_eq!(CONTEXT_STACK.with(ContextStack::is_empty), true);

        let guard = context.enter();
        assert_eq!(CONTEXT_STACK.with(ContextStack::len), 1);
        assert_eq!(LogContext::current().request_id(), Some("req-1"));

        drop(guard);
        assert_eq!(CONTEXT_STACK.with(ContextStack::len), 0);
    }

    #[test]
    fn test_log_context_nested_guards() {
        let outer_guard = LogContext::new().with_request_id("outer").enter();
        assert_eq!(LogContext::current().request_id(), Some("outer"));

        {
            let inner_guard = LogContext::current().with_user("alice").enter();
            assert_eq!(CONTEXT_STACK.with(ContextStack::len), 2);

            let current = LogContext::current();
            assert_eq!(current.request_id(), Some("outer"));
            assert_eq!(current.user().and_then(crate::ContextValue::as_str), Some("alice"));

            drop(inner_guard);
        }

        let current = LogContext::current();
        assert_eq!(current.request_id(), Some("outer"));
        assert!(current.user().is_none());

        drop(outer_guard);
        assert_eq!(CONTEXT_STACK.with(ContextStack::is_empty), true);
    }

    #[test]
    fn test_log_context_multithread() {
        let local_guard = LogContext::new().with_request_id("main").enter();

        let handles = ["first_thread", "second_thread"].map(|name| {
            std::thread::spawn(move || {
                assert_eq!(LogContext::current().request_id(), None);

                let inner_guard = LogContext::new().with_request_id(name).enter();
                assert_eq!(CONTEXT_STACK.with(ContextStack::len), 1);
                assert_eq!(LogContext::current().request_id(), Some(name));
                drop(inner_guard);
            })
        });
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(LogContext::current().request_id(), Some("main"));
        drop(local_guard);
    }
}
