//! An immutable, chainable log context.

use std::{
    collections::HashSet,
    sync::Arc,
    time::{Duration, Instant},
};

use tokio_util::sync::CancellationToken;

use crate::{ContextValue, StaticCowStr, guard::LogContextGuard, stack::CONTEXT_STACK};

/// A per-request carrier of correlation data.
///
/// Every `with_*` method returns a new context layered on top of the current one, the
/// original context is never modified. Lookups walk from the most recent layer outwards,
/// so the last value written for a key wins.
///
/// Besides attributes a context carries a lifetime: an optional cancellation token and an
/// optional deadline. A context created with [`LogContext::new`] is never cancelled.
///
/// # Examples
///
/// ```
/// use request_logger::LogContext;
///
/// let root = LogContext::new();
/// let ctx = root.with_request_id("req-1").with_user("alice");
///
/// assert_eq!(ctx.request_id(), Some("req-1"));
/// assert_eq!(root.request_id(), None);
/// ```
#[derive(Debug, Clone, Default)]
pub struct LogContext {
    attributes: Option<Arc<Layer>>,
    lifetime: Lifetime,
}

#[derive(Debug)]
struct Layer {
    parent: Option<Arc<Layer>>,
    entry: Entry,
}

#[derive(Debug)]
enum Entry {
    RequestId(StaticCowStr),
    User(ContextValue),
    Field(StaticCowStr, ContextValue),
}

#[derive(Debug, Clone, Default)]
struct Lifetime {
    token: Option<CancellationToken>,
    deadline: Option<Instant>,
}

impl LogContext {
    /// Creates an empty context without cancellation or deadline.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            attributes: None,
            lifetime: Lifetime {
                token: None,
                deadline: None,
            },
        }
    }

    /// Returns the context on top of the current thread's context stack.
    ///
    /// Falls back to an empty context outside of [`LogContext::enter`] or
    /// [`in_log_context`](crate::FutureExt::in_log_context).
    #[must_use]
    pub fn current() -> Self {
        CONTEXT_STACK
            .try_with(|stack| stack.top().map(|top| top.clone()))
            .ok()
            .flatten()
            .unwrap_or_default()
    }

    fn push(&self, entry: Entry) -> Self {
        Self {
            attributes: Some(Arc::new(Layer {
                parent: self.attributes.clone(),
                entry,
            })),
            lifetime: self.lifetime.clone(),
        }
    }

    fn layers(&self) -> impl Iterator<Item = &Entry> {
        std::iter::successors(self.attributes.as_deref(), |layer| layer.parent.as_deref())
            .map(|layer| &layer.entry)
    }

    #[must_use]
    pub fn with_request_id(&self, request_id: impl Into<StaticCowStr>) -> Self {
        self.push(Entry::RequestId(request_id.into()))
    }

    #[must_use]
    pub fn request_id(&self) -> Option<&str> {
        self.layers().find_map(|entry| match entry {
            Entry::RequestId(id) => Some(&**id),
            _ => None,
        })
    }

    /// Binds an authenticated user. The value is opaque, no schema is enforced.
    #[must_use]
    pub fn with_user(&self, user: impl Into<ContextValue>) -> Self {
        self.push(Entry::User(user.into()))
    }

    #[must_use]
    pub fn user(&self) -> Option<&ContextValue> {
        self.layers().find_map(|entry| match entry {
            Entry::User(user) => Some(user),
            _ => None,
        })
    }

    /// Binds a named field.
    ///
    /// Fields only show up in log records when their name is in the logger's
    /// extra field list, see [`ContextLogger::extra_field`](crate::ContextLogger::extra_field).
    #[must_use]
    pub fn with_field(&self, name: impl Into<StaticCowStr>, value: impl Into<ContextValue>) -> Self {
        self.push(Entry::Field(name.into(), value.into()))
    }

    #[must_use]
    pub fn field(&self, name: &str) -> Option<&ContextValue> {
        self.layers().find_map(|entry| match entry {
            Entry::Field(key, value) if key == name => Some(value),
            _ => None,
        })
    }

    /// Derives a context which is cancelled either explicitly through the returned token
    /// or together with this context.
    #[must_use]
    pub fn with_cancel(&self) -> (Self, CancellationToken) {
        let token = self
            .lifetime
            .token
            .as_ref()
            .map_or_else(CancellationToken::new, CancellationToken::child_token);
        let context = Self {
            attributes: self.attributes.clone(),
            lifetime: Lifetime {
                token: Some(token.clone()),
                deadline: self.lifetime.deadline,
            },
        };
        (context, token)
    }

    /// Like [`LogContext::with_cancel`], but the derived context also expires after
    /// `timeout`. An earlier deadline inherited from this context is kept.
    ///
    /// A `timeout` too large to be represented as an [`Instant`] adds no deadline.
    #[must_use]
    pub fn with_timeout(&self, timeout: Duration) -> (Self, CancellationToken) {
        let (mut context, token) = self.with_cancel();
        if let Some(deadline) = Instant::now().checked_add(timeout) {
            context.lifetime.deadline = Some(
                self.lifetime
                    .deadline
                    .map_or(deadline, |parent| parent.min(deadline)),
            );
        }
        (context, token)
    }

    #[must_use]
    pub const fn deadline(&self) -> Option<Instant> {
        self.lifetime.deadline
    }

    /// Returns `true` once the context has been cancelled or its deadline has passed.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        let cancelled = self
            .lifetime
            .token
            .as_ref()
            .is_some_and(CancellationToken::is_cancelled);
        let expired = self
            .lifetime
            .deadline
            .is_some_and(|deadline| deadline <= Instant::now());
        cancelled || expired
    }

    /// Waits until the context is cancelled or its deadline passes.
    ///
    /// Never resolves for a context without token and deadline.
    pub async fn cancelled(&self) {
        let token = self.lifetime.token.clone();
        let cancelled = async move {
            match token {
                Some(token) => token.cancelled_owned().await,
                None => std::future::pending().await,
            }
        };
        let expired = async {
            match self.lifetime.deadline {
                Some(deadline) => {
                    tokio::time::sleep_until(tokio::time::Instant::from_std(deadline)).await;
                }
                None => std::future::pending().await,
            }
        };

        tokio::select! {
            () = cancelled => {},
            () = expired => {},
        }
    }

    /// Copies the request id, the user and every field into a new context which has
    /// no cancellation and no deadline.
    ///
    /// Use it for work that has to outlive the request which started it.
    ///
    /// # Examples
    ///
    /// ```
    /// use request_logger::LogContext;
    ///
    /// let (request, cancel) = LogContext::new().with_request_id("req-1").with_cancel();
    /// let background = request.detach();
    /// cancel.cancel();
    ///
    /// assert!(request.is_cancelled());
    /// assert!(!background.is_cancelled());
    /// assert_eq!(background.request_id(), Some("req-1"));
    /// ```
    #[must_use]
    pub fn detach(&self) -> Self {
        let mut detached = Self::new();
        if let Some(request_id) = self.request_id() {
            detached = detached.with_request_id(request_id.to_owned());
        }
        if let Some(user) = self.user() {
            detached = detached.with_user(user.clone());
        }

        // Only the newest value of every field, oldest field first.
        let mut seen = HashSet::new();
        let mut fields = self
            .layers()
            .filter_map(|entry| match entry {
                Entry::Field(key, value) if seen.insert(&**key) => Some((key, value)),
                _ => None,
            })
            .collect::<Vec<_>>();
        fields.reverse();
        for (key, value) in fields {
            detached = detached.with_field(key.clone(), value.clone());
        }
        detached
    }

    /// Detaches the context and bounds the follow-up work by `timeout`.
    ///
    /// The returned token cancels the detached context early. The original context's
    /// cancellation and deadline are not inherited.
    #[must_use]
    pub fn detach_with_timeout(&self, timeout: Duration) -> (Self, CancellationToken) {
        self.detach().with_timeout(timeout)
    }

    /// Makes this context the current one for the calling thread.
    #[must_use]
    pub fn enter<'a>(self) -> LogContextGuard<'a> {
        LogContextGuard::enter(self)
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn test_set_then_get() {
        let root = LogContext::new();
        assert_eq!(root.request_id(), None);
        assert!(root.user().is_none());

        let ctx = root.with_request_id("req-1").with_user("alice");
        assert_eq!(ctx.request_id(), Some("req-1"));
        assert_eq!(ctx.user().and_then(ContextValue::as_str), Some("alice"));

        // Deriving never touches the ancestor.
        assert_eq!(root.request_id(), None);
        assert!(root.user().is_none());
    }

    #[test]
    fn test_last_writer_wins() {
        let first = LogContext::new().with_request_id("first");
        let second = first.with_request_id("second");

        assert_eq!(first.request_id(), Some("first"));
        assert_eq!(second.request_id(), Some("second"));
    }

    #[test]
    fn test_fields_lookup() {
        let ctx = LogContext::new()
            .with_field("tenant", "acme")
            .with_request_id("req-1")
            .with_field("tenant", "globex");

        assert_eq!(ctx.field("tenant").and_then(ContextValue::as_str), Some("globex"));
        assert!(ctx.field("region").is_none());
    }

    #[test]
    fn test_siblings_are_isolated() {
        let parent = LogContext::new().with_request_id("req-1");
        let left = parent.with_field("side", "left");
        let right = parent.with_field("side", "right");

        assert_eq!(left.field("side").and_then(ContextValue::as_str), Some("left"));
        assert_eq!(right.field("side").and_then(ContextValue::as_str), Some("right"));
        assert!(parent.field("side").is_none());
    }

    #[test]
    fn test_cancel_propagates_to_children() {
        let (parent, cancel) = LogContext::new().with_cancel();
        let (child, _child_cancel) = parent.with_request_id("req-1").with_cancel();

        assert!(!child.is_cancelled());
        cancel.cancel();
        assert!(parent.is_cancelled());
        assert!(child.is_cancelled());
    }

    #[test]
    fn test_child_cancel_does_not_reach_parent() {
        let (parent, _cancel) = LogContext::new().with_cancel();
        let (child, child_cancel) = parent.with_cancel();

        child_cancel.cancel();
        assert!(child.is_cancelled());
        assert!(!parent.is_cancelled());
    }

    #[test]
    fn test_timeout_keeps_earlier_deadline() {
        let (parent, _) = LogContext::new().with_timeout(Duration::from_secs(1));
        let (child, _) = parent.with_timeout(Duration::from_secs(60));

        assert_eq!(child.deadline(), parent.deadline());
    }

    #[test]
    fn test_detach_copies_values() {
        let ctx = LogContext::new()
            .with_field("tenant", "acme")
            .with_request_id("req-1")
            .with_user(42)
            .with_field("tenant", "globex")
            .with_field("region", "eu");

        let detached = ctx.detach();
        assert_eq!(detached.request_id(), Some("req-1"));
        assert_eq!(detached.user().map(ToString::to_string).as_deref(), Some("42"));
        assert_eq!(
            detached.field("tenant").and_then(ContextValue::as_str),
            Some("globex")
        );
        assert_eq!(detached.field("region").and_then(ContextValue::as_str), Some("eu"));
    }

    #[test]
    fn test_detach_drops_shadowed_fields() {
        let ctx = LogContext::new()
            .with_field("tenant", "acme")
            .with_field("region", "us")
            .with_field("tenant", "globex")
            .with_field("region", "eu")
            .with_field("tenant", "initech");

        let detached = ctx.detach();
        assert_eq!(detached.layers().count(), 2);
        assert_eq!(
            detached.field("tenant").and_then(ContextValue::as_str),
            Some("initech")
        );
        assert_eq!(detached.field("region").and_then(ContextValue::as_str), Some("eu"));
    }

    #[test]
    fn test_detach_with_huge_timeout() {
        let (detached, cancel) = LogContext::new()
            .with_request_id("req-1")
            .detach_with_timeout(Duration::MAX);

        assert!(detached.deadline().is_none());
        assert!(!detached.is_cancelled());
        assert_eq!(detached.request_id(), Some("req-1"));

        cancel.cancel();
        assert!(detached.is_cancelled());
    }

    #[test]
    fn test_huge_timeout_keeps_inherited_deadline() {
        let (parent, _) = LogContext::new().with_timeout(Duration::from_secs(1));
        let (child, _) = parent.with_timeout(Duration::MAX);

        assert_eq!(child.deadline(), parent.deadline());
    }

    #[test]
    fn test_detach_of_empty_context() {
        let detached = LogContext::new().detach();
        assert_eq!(detached.request_id(), None);
        assert!(detached.user().is_none());
        assert!(detached.deadline().is_none());
    }

    #[test]
    fn test_detach_ignores_parent_cancellation() {
        let (request, cancel) = LogContext::new().with_request_id("req-1").with_cancel();
        let (request, _) = request.with_timeout(Duration::from_millis(1));

        let detached = request.detach();
        cancel.cancel();

        assert!(request.is_cancelled());
        assert!(!detached.is_cancelled());
        assert!(detached.deadline().is_none());
        assert_eq!(detached.request_id(), request.request_id());
    }

    #[test]
    fn test_detach_with_timeout_cancels_independently() {
        let (request, request_cancel) = LogContext::new().with_request_id("req-1").with_cancel();
        let (detached, cancel) = request.detach_with_timeout(Duration::from_secs(60));

        request_cancel.cancel();
        assert!(!detached.is_cancelled());
        assert!(detached.deadline().is_some());

        cancel.cancel();
        assert!(detached.is_cancelled());
        assert!(!LogContext::new().is_cancelled());
    }
}
