use std::{borrow::Cow, fmt, sync::Arc, time::Duration};

/// An opaque value that can be attached to a log context or a single record.
///
/// Values are immutable and reference counted, so cloning a value is cheap and
/// never aliases mutable state.
#[derive(Clone)]
pub struct ContextValue(ContextValueInner);

#[derive(Clone)]
enum ContextValueInner {
    Null,
    String(Cow<'static, str>),
    Bool(bool),
    I64(i64),
    U64(u64),
    F64(f64),
    Debug(Arc<dyn fmt::Debug + Send + Sync + 'static>),
    Display(Arc<dyn fmt::Display + Send + Sync + 'static>),
    Error(Arc<dyn std::error::Error + Send + Sync + 'static>),
    Serde(Arc<dyn erased_serde::Serialize + Send + Sync + 'static>),
}

impl From<ContextValueInner> for ContextValue {
    fn from(inner: ContextValueInner) -> Self {
        ContextValue(inner)
    }
}

impl ContextValue {
    #[must_use]
    pub const fn null() -> Self {
        ContextValue(ContextValueInner::Null)
    }

    pub fn serde<S>(value: S) -> Self
    where
        S: serde::Serialize + Send + Sync + 'static,
    {
        let value = Arc::new(value);
        ContextValueInner::Serde(value).into()
    }

    pub fn display<T>(value: T) -> Self
    where
        T: fmt::Display + Send + Sync + 'static,
    {
        let value = Arc::new(value);
        ContextValueInner::Display(value).into()
    }

    pub fn debug<T>(value: T) -> Self
    where
        T: fmt::Debug + Send + Sync + 'static,
    {
        let value = Arc::new(value);
        ContextValueInner::Debug(value).into()
    }

    pub fn error<T>(value: T) -> Self
    where
        T: std::error::Error + Send + Sync + 'static,
    {
        let value = Arc::new(value);
        ContextValueInner::Error(value).into()
    }

    /// Returns the string payload if this value was created from a string.
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match &self.0 {
            ContextValueInner::String(s) => Some(&**s),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_log_value(&self) -> log::kv::Value<'_> {
        match &self.0 {
            ContextValueInner::Null => log::kv::Value::null(),
            ContextValueInner::String(s) => log::kv::Value::from(&**s),
            ContextValueInner::Bool(b) => log::kv::Value::from(*b),
            ContextValueInner::I64(n) => log::kv::Value::from(*n),
            ContextValueInner::U64(n) => log::kv::Value::from(*n),
            ContextValueInner::F64(n) => log::kv::Value::from(*n),
            ContextValueInner::Display(value) => log::kv::Value::from_dyn_display(&**value),
            ContextValueInner::Debug(value) => log::kv::Value::from_dyn_debug(&**value),
            ContextValueInner::Error(value) => log::kv::Value::from_dyn_error(&**value),
            ContextValueInner::Serde(value) => log::kv::Value::from_serde(value),
        }
    }
}

impl fmt::Debug for ContextValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.as_log_value(), f)
    }
}

impl fmt::Display for ContextValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.as_log_value(), f)
    }
}

impl From<&'static str> for ContextValue {
    fn from(value: &'static str) -> Self {
        ContextValueInner::String(Cow::Borrowed(value)).into()
    }
}

impl From<String> for ContextValue {
    fn from(value: String) -> Self {
        ContextValueInner::String(Cow::Owned(value)).into()
    }
}

impl From<Cow<'static, str>> for ContextValue {
    fn from(value: Cow<'static, str>) -> Self {
        ContextValueInner::String(value).into()
    }
}

impl From<bool> for ContextValue {
    fn from(value: bool) -> Self {
        ContextValueInner::Bool(value).into()
    }
}

impl From<f64> for ContextValue {
    fn from(value: f64) -> Self {
        ContextValueInner::F64(value).into()
    }
}

impl From<Duration> for ContextValue {
    fn from(value: Duration) -> Self {
        ContextValue::debug(value)
    }
}

impl From<serde_json::Value> for ContextValue {
    fn from(value: serde_json::Value) -> Self {
        match value {
            serde_json::Value::Null => ContextValue::null(),
            serde_json::Value::String(s) => s.into(),
            serde_json::Value::Bool(b) => b.into(),
            other => ContextValue::serde(other),
        }
    }
}

macro_rules! impl_from_int {
    ($variant:ident => $target:ty: $($ty:ty),*) => {
        $(
            impl From<$ty> for ContextValue {
                fn from(value: $ty) -> Self {
                    ContextValueInner::$variant(<$target>::from(value)).into()
                }
            }
        )*
    };
}

impl_from_int!(I64 => i64: i8, i16, i32, i64);
impl_from_int!(U64 => u64: u8, u16, u32, u64);

impl From<usize> for ContextValue {
    fn from(value: usize) -> Self {
        ContextValueInner::U64(value as u64).into()
    }
}
