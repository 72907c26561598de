//! # Overview
//!
#![doc = include_utils::include_md!("README.md:description")]
//!
//! Every record emitted through a [`ContextLogger`] is enriched, in this order, with:
//!
//! - the fixed key-values configured on the logger;
//! - the request id bound to the [`LogContext`];
//! - the user bound to the [`LogContext`];
//! - the context fields whose names are in the logger's extra field list;
//! - the key-values passed with the record itself.
//!
//! The logger wraps any implementation of the standard [`Log`](log::Log) trait, so the
//! records end up in [`env_logger`], [`structured-logger`] or any other `log` backend.
//!
//! ## Basic example
//!
#![doc = include_utils::include_md!("README.md:basic_example")]
//!
//! ## HTTP middleware
//!
#![doc = include_utils::include_md!("README.md:middleware_example")]
//!
//! [`env_logger`]: https://docs.rs/env_logger/latest/env_logger
//! [`structured-logger`]: https://docs.rs/structured-logger/latest/structured_logger

use std::{borrow::Cow, fmt, panic::Location, sync::Arc};

pub use tokio_util::sync::CancellationToken;

pub use self::{
    bypass::{BypassRegistry, BypassRule},
    config::{LoggerConfig, MiddlewareConfig},
    context::LogContext,
    error::{Error, Result},
    future::FutureExt,
    level::Level,
    middleware::{RemoteAddr, RequestLoggingLayer},
    value::ContextValue,
};

mod bypass;
mod config;
mod context;
mod error;
pub mod future;
pub mod guard;
mod level;
pub mod middleware;
pub mod pattern;
mod stack;
mod value;

type StaticCowStr = Cow<'static, str>;

/// A key-value pair attached to a log record.
pub type Attribute = (StaticCowStr, ContextValue);

const REQUEST_ID_KEY: &str = "request_id";
const USER_KEY: &str = "user";
const TARGET: &str = "request_logger";

/// A logger handle that merges [`LogContext`] data into every record.
///
/// The handle is cheap to clone and can be passed to every place that logs, including
/// the [`RequestLoggingLayer`]. It can also be installed as the global `log` logger, in
/// which case records produced by the `log` macros are enriched with the
/// [current](LogContext::current) context.
///
/// # Example
///
/// ```
/// use request_logger::{ContextLogger, ContextValue, LogContext};
///
/// let logger = ContextLogger::new(env_logger::builder().build())
///     .request_id_prefix("API-")
///     .default_record("service", "billing")
///     .extra_field("tenant");
///
/// let ctx = LogContext::new()
///     .with_request_id(logger.generate_request_id())
///     .with_field("tenant", "acme");
///
/// // Includes service, request_id, tenant and attempt.
/// logger.info_with(&ctx, "Charging card", [("attempt", ContextValue::from(2))]);
/// ```
#[derive(Clone)]
pub struct ContextLogger {
    inner: Arc<LoggerInner>,
}

#[derive(Clone)]
struct LoggerInner {
    sink: Arc<dyn log::Log>,
    default_records: Vec<Attribute>,
    extra_fields: Vec<StaticCowStr>,
    request_id_prefix: String,
    development: bool,
}

impl ContextLogger {
    /// Creates a new [`ContextLogger`] that writes records to `sink`.
    ///
    /// The logger starts in production mode, without request id prefix, default
    /// records or extra fields.
    pub fn new<L>(sink: L) -> Self
    where
        L: log::Log + 'static,
    {
        Self {
            inner: Arc::new(LoggerInner {
                sink: Arc::new(sink),
                default_records: Vec::new(),
                extra_fields: Vec::new(),
                request_id_prefix: String::new(),
                development: false,
            }),
        }
    }

    /// Creates a logger from a deserialized [`LoggerConfig`].
    pub fn from_config<L>(config: LoggerConfig, sink: L) -> Self
    where
        L: log::Log + 'static,
    {
        let logger = config.fixed_key_values.into_iter().fold(
            Self::new(sink)
                .development(config.development)
                .request_id_prefix(config.request_id_prefix),
            |logger, (key, value)| logger.default_record(key, value),
        );
        config
            .extra_fields
            .into_iter()
            .fold(logger, |logger, name| logger.extra_field(name))
    }

    fn inner_mut(&mut self) -> &mut LoggerInner {
        Arc::make_mut(&mut self.inner)
    }

    /// Enables `debug` records.
    #[must_use]
    pub fn development(mut self, development: bool) -> Self {
        self.inner_mut().development = development;
        self
    }

    /// Sets the prefix of the ids produced by [`ContextLogger::generate_request_id`].
    #[must_use]
    pub fn request_id_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.inner_mut().request_id_prefix = prefix.into();
        self
    }

    /// Adds a default record that will be included in all log entries.
    ///
    /// Default records are added first, before any context data. If multiple records
    /// with the same key exist, all of them are passed to the sink; most sinks keep the
    /// last one.
    #[must_use]
    pub fn default_record(
        mut self,
        key: impl Into<StaticCowStr>,
        value: impl Into<ContextValue>,
    ) -> Self {
        self.inner_mut()
            .default_records
            .push((key.into(), value.into()));
        self
    }

    /// Allows the context field `name` to be attached to records.
    #[must_use]
    pub fn extra_field(mut self, name: impl Into<StaticCowStr>) -> Self {
        self.inner_mut().extra_fields.push(name.into());
        self
    }

    #[must_use]
    pub fn is_dev_mode(&self) -> bool {
        self.inner.development
    }

    /// The lowest level that is emitted: `Debug` in development mode, `Info` otherwise.
    #[must_use]
    pub fn min_level(&self) -> Level {
        if self.inner.development {
            Level::Debug
        } else {
            Level::Info
        }
    }

    #[must_use]
    pub fn max_level(&self) -> log::LevelFilter {
        self.min_level().as_log_level().to_level_filter()
    }

    /// Returns the configured prefix followed by a random UUID.
    #[must_use]
    pub fn generate_request_id(&self) -> String {
        format!("{}{}", self.inner.request_id_prefix, uuid::Uuid::new_v4())
    }

    /// Collects the extra fields bound to `ctx`, in the order they were configured.
    ///
    /// Returns `None` when no extra fields are configured. Fields missing from the
    /// context are skipped.
    #[must_use]
    pub fn extra_fields(&self, ctx: &LogContext) -> Option<Vec<Attribute>> {
        if self.inner.extra_fields.is_empty() {
            return None;
        }

        let fields = self
            .inner
            .extra_fields
            .iter()
            .filter_map(|name| Some((name.clone(), ctx.field(name)?.clone())))
            .collect();
        Some(fields)
    }

    /// Builds the attributes of a record: default records, request id, user, extra
    /// fields and finally `pairs`.
    pub fn combine_attributes<K, V>(
        &self,
        ctx: &LogContext,
        pairs: impl IntoIterator<Item = (K, V)>,
    ) -> Vec<Attribute>
    where
        K: Into<StaticCowStr>,
        V: Into<ContextValue>,
    {
        let mut attributes = self.inner.default_records.clone();
        if let Some(request_id) = ctx.request_id() {
            attributes.push((REQUEST_ID_KEY.into(), request_id.to_owned().into()));
        }
        if let Some(user) = ctx.user() {
            attributes.push((USER_KEY.into(), user.clone()));
        }
        if let Some(fields) = self.extra_fields(ctx) {
            attributes.extend(fields);
        }
        attributes.extend(
            pairs
                .into_iter()
                .map(|(key, value)| (key.into(), value.into())),
        );
        attributes
    }

    #[must_use]
    pub fn enabled(&self, level: Level) -> bool {
        level >= self.min_level()
            && self.inner.sink.enabled(
                &log::Metadata::builder()
                    .level(level.as_log_level())
                    .target(TARGET)
                    .build(),
            )
    }

    /// Emits a record with the attributes of `ctx` followed by `pairs`.
    ///
    /// # Panics
    ///
    /// Panics with `message` after emitting a [`Level::Panic`] record. A [`Level::Fatal`]
    /// record terminates the process with exit code 1 instead.
    #[track_caller]
    pub fn log<K, V>(
        &self,
        level: Level,
        ctx: &LogContext,
        message: impl fmt::Display,
        pairs: impl IntoIterator<Item = (K, V)>,
    ) where
        K: Into<StaticCowStr>,
        V: Into<ContextValue>,
    {
        let location = Location::caller();
        if self.enabled(level) {
            let attributes = self.combine_attributes(ctx, pairs);
            self.inner.sink.log(
                &log::Record::builder()
                    .args(format_args!("{message}"))
                    .level(level.as_log_level())
                    .target(TARGET)
                    .file_static(Some(location.file()))
                    .line(Some(location.line()))
                    .key_values(&Attributes {
                        records: &attributes,
                        source: None,
                    })
                    .build(),
            );
        }

        match level {
            Level::Panic => {
                self.flush();
                panic!("{message}");
            }
            Level::Fatal => {
                self.flush();
                std::process::exit(1);
            }
            _ => {}
        }
    }

    /// Blocks until every record emitted so far has been handed to the sink.
    pub fn flush(&self) {
        self.inner.sink.flush();
    }

    /// Installs a clone of this logger as the global `log` logger.
    ///
    /// # Panics
    ///
    /// Panics if a global logger has already been set.
    pub fn install(&self) {
        self.try_install()
            .expect("ContextLogger::install should not be called after logger initialization");
    }

    /// Installs a clone of this logger as the global `log` logger.
    ///
    /// # Errors
    ///
    /// Returns an error if a global logger has already been set.
    pub fn try_install(&self) -> Result<()> {
        log::set_boxed_logger(Box::new(self.clone()))?;
        log::set_max_level(self.max_level());
        Ok(())
    }
}

macro_rules! level_methods {
    ($($level:ident: $plain:ident, $with:ident;)*) => {
        impl ContextLogger {
            $(
                #[doc = concat!("Emits a [`Level::", stringify!($level), "`] record.")]
                #[track_caller]
                pub fn $plain(&self, ctx: &LogContext, message: impl fmt::Display) {
                    self.log(Level::$level, ctx, message, std::iter::empty::<Attribute>());
                }

                #[doc = concat!("Emits a [`Level::", stringify!($level), "`] record with extra key-values.")]
                #[track_caller]
                pub fn $with<K, V>(
                    &self,
                    ctx: &LogContext,
                    message: impl fmt::Display,
                    pairs: impl IntoIterator<Item = (K, V)>,
                ) where
                    K: Into<StaticCowStr>,
                    V: Into<ContextValue>,
                {
                    self.log(Level::$level, ctx, message, pairs);
                }
            )*
        }
    };
}

level_methods! {
    Debug: debug, debug_with;
    Info: info, info_with;
    Warn: warn, warn_with;
    Error: error, error_with;
    Panic: panic, panic_with;
    Fatal: fatal, fatal_with;
}

impl fmt::Debug for ContextLogger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ContextLogger")
            .field("development", &self.inner.development)
            .field("request_id_prefix", &self.inner.request_id_prefix)
            .finish_non_exhaustive()
    }
}

impl log::Log for ContextLogger {
    fn enabled(&self, metadata: &log::Metadata) -> bool {
        metadata.level() <= self.max_level() && self.inner.sink.enabled(metadata)
    }

    fn log(&self, record: &log::Record) {
        if !log::Log::enabled(self, record.metadata()) {
            return;
        }

        let context = LogContext::current();
        let attributes = self.combine_attributes(&context, std::iter::empty::<Attribute>());
        let source = Attributes {
            records: &attributes,
            source: Some(record.key_values()),
        };
        self.inner
            .sink
            .log(&record.to_builder().key_values(&source).build());
    }

    fn flush(&self) {
        self.inner.sink.flush();
    }
}

struct Attributes<'a> {
    records: &'a [Attribute],
    source: Option<&'a dyn log::kv::Source>,
}

impl log::kv::Source for Attributes<'_> {
    fn visit<'kvs>(
        &'kvs self,
        visitor: &mut dyn log::kv::VisitSource<'kvs>,
    ) -> Result<(), log::kv::Error> {
        for (key, value) in self.records {
            visitor.visit_pair(log::kv::Key::from_str(key), value.as_log_value())?;
        }
        match self.source {
            Some(source) => source.visit(visitor),
            None => Ok(()),
        }
    }
}
