//! Rules for skipping the automatic request logging of selected routes.

use regex::Regex;
use serde::Deserialize;

use crate::pattern::glob_match;

/// A route whose automatic request logging should be skipped.
///
/// `path` is a hierarchical glob (see [`crate::pattern`]) unless `is_regex` is set, in
/// which case it is a regular expression that has to match the whole path.
/// `methods` is a comma separated list of HTTP methods, an empty list means any method.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct BypassRule {
    pub path: String,
    #[serde(default)]
    pub methods: String,
    #[serde(default)]
    pub is_regex: bool,
}

impl BypassRule {
    /// Creates a glob rule matching any method.
    pub fn glob(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            ..Self::default()
        }
    }

    /// Creates a regular expression rule matching any method.
    pub fn regex(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            methods: String::new(),
            is_regex: true,
        }
    }

    /// Restricts the rule to a comma separated list of methods.
    #[must_use]
    pub fn methods(mut self, methods: impl Into<String>) -> Self {
        self.methods = methods.into();
        self
    }
}

#[derive(Debug, Clone)]
struct CompiledRule {
    rule: BypassRule,
    methods: Vec<String>,
    // `None` for glob rules and for regex rules that failed to compile.
    regex: Option<Regex>,
}

impl CompiledRule {
    fn compile(rule: BypassRule) -> Self {
        let methods = rule
            .methods
            .split(',')
            .map(str::trim)
            .filter(|method| !method.is_empty())
            .map(str::to_owned)
            .collect();

        let regex = if rule.is_regex {
            match Regex::new(&format!("^(?:{})$", rule.path)) {
                Ok(regex) => Some(regex),
                Err(err) => {
                    log::warn!(
                        pattern = rule.path.as_str();
                        "Invalid bypass pattern, requests will be logged: {err}"
                    );
                    None
                }
            }
        } else {
            None
        };

        Self {
            rule,
            methods,
            regex,
        }
    }

    fn matches_method(&self, method: &str) -> bool {
        self.methods.is_empty()
            || self
                .methods
                .iter()
                .any(|allowed| allowed.eq_ignore_ascii_case(method))
    }

    fn matches_path(&self, path: &str) -> bool {
        if self.rule.is_regex {
            self.regex.as_ref().is_some_and(|regex| regex.is_match(path))
        } else {
            glob_match(&self.rule.path, path)
        }
    }
}

/// A compiled, read-only set of [`BypassRule`]s.
///
/// # Examples
///
/// ```
/// use request_logger::{BypassRegistry, BypassRule};
///
/// let registry = BypassRegistry::new([
///     BypassRule::glob("/health"),
///     BypassRule::regex("/metrics").methods("GET"),
/// ]);
///
/// assert!(registry.should_bypass("/health", "POST"));
/// assert!(registry.should_bypass("/metrics", "get"));
/// assert!(!registry.should_bypass("/metrics", "POST"));
/// ```
#[derive(Debug, Clone, Default)]
pub struct BypassRegistry {
    rules: Vec<CompiledRule>,
}

impl BypassRegistry {
    /// Compiles the rules.
    ///
    /// A regular expression that fails to compile is reported with a `warn` record and
    /// the rule never matches.
    pub fn new(rules: impl IntoIterator<Item = BypassRule>) -> Self {
        Self {
            rules: rules.into_iter().map(CompiledRule::compile).collect(),
        }
    }

    /// Returns `true` if any rule matches both the method and the path.
    #[must_use]
    pub fn should_bypass(&self, path: &str, method: &str) -> bool {
        self.rules
            .iter()
            .any(|rule| rule.matches_method(method) && rule.matches_path(path))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.rules.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

impl FromIterator<BypassRule> for BypassRegistry {
    fn from_iter<T: IntoIterator<Item = BypassRule>>(iter: T) -> Self {
        Self::new(iter)
    }
}
