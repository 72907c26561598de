use std::cell::{Ref, RefCell};

use crate::LogContext;

thread_local! {
    pub static CONTEXT_STACK: ContextStack = const { ContextStack::new() };
}

#[derive(Debug)]
pub struct ContextStack {
    inner: RefCell<Vec<LogContext>>,
}

impl ContextStack {
    pub const fn new() -> Self {
        ContextStack {
            inner: RefCell::new(Vec::new()),
        }
    }

    pub fn push(&self, context: LogContext) {
        self.inner.borrow_mut().push(context);
    }

    pub fn pop(&self) -> Option<LogContext> {
        self.inner.borrow_mut().pop()
    }

    pub fn top(&self) -> Option<Ref<'_, LogContext>> {
        Ref::filter_map(self.inner.borrow(), |inner| inner.last()).ok()
    }
}

impl Default for ContextStack {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
impl ContextStack {
    pub fn len(&self) -> usize {
        self.inner.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.borrow().is_empty()
    }
}
