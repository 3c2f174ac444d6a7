//! Explicit process environments.
//!
//! The supervised server and the sysroot query run with an environment that
//! is derived step by step (search-path retry, library paths), so it is kept
//! as a value instead of mutating the parent process environment.

use std::collections::BTreeMap;
use std::path::PathBuf;

/// Separator for search-path style variables (`PATH`, `LD_LIBRARY_PATH`).
pub const PATH_LIST_SEPARATOR: char = if cfg!(windows) { ';' } else { ':' };

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Environment {
    vars: BTreeMap<String, String>,
}

impl Environment {
    /// Snapshot of the current process environment.
    ///
    /// Variables whose name or value is not valid UTF-8 are skipped.
    #[must_use]
    pub fn inherited() -> Self {
        let vars = std::env::vars_os()
            .filter_map(|(k, v)| Some((k.into_string().ok()?, v.into_string().ok()?)))
            .collect();
        Self { vars }
    }

    #[must_use]
    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            vars: pairs
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }

    #[must_use]
    pub fn get(&self, key: &str) -> Option<&str> {
        self.vars.get(key).map(String::as_str)
    }

    /// Whether `key` is set to a non-empty value.
    #[must_use]
    pub fn is_set(&self, key: &str) -> bool {
        self.get(key).is_some_and(|v| !v.is_empty())
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.vars.insert(key.into(), value.into());
    }

    /// Prefix `component` onto a search-path variable, keeping any existing
    /// value after it.
    pub fn prepend_path(&mut self, key: &str, component: &str) {
        let value = match self.get(key) {
            Some(old) if !old.is_empty() => format!("{component}{PATH_LIST_SEPARATOR}{old}"),
            _ => component.to_string(),
        };
        self.set(key, value);
    }

    /// Home directory as seen by this environment, falling back to the
    /// current user's home.
    #[must_use]
    pub fn home_dir(&self) -> Option<PathBuf> {
        let key = if cfg!(windows) { "USERPROFILE" } else { "HOME" };
        match self.get(key) {
            Some(home) if !home.is_empty() => Some(PathBuf::from(home)),
            _ => dirs::home_dir(),
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.vars.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.vars.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.vars.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prepend_path_keeps_existing_value() {
        let mut env = Environment::from_pairs([("LD_LIBRARY_PATH", "/usr/lib")]);
        env.prepend_path("LD_LIBRARY_PATH", "/sysroot/lib");
        assert_eq!(
            env.get("LD_LIBRARY_PATH"),
            Some(format!("/sysroot/lib{PATH_LIST_SEPARATOR}/usr/lib").as_str())
        );
    }

    #[test]
    fn prepend_path_on_unset_or_empty_variable() {
        let mut env = Environment::from_pairs([("EMPTY", "")]);
        env.prepend_path("EMPTY", "/a");
        env.prepend_path("UNSET", "/b");
        assert_eq!(env.get("EMPTY"), Some("/a"));
        assert_eq!(env.get("UNSET"), Some("/b"));
    }

    #[test]
    fn is_set_ignores_empty_values() {
        let env = Environment::from_pairs([("A", ""), ("B", "x")]);
        assert!(!env.is_set("A"));
        assert!(env.is_set("B"));
        assert!(!env.is_set("C"));
    }

    #[cfg(unix)]
    #[test]
    fn home_dir_prefers_environment_value() {
        let env = Environment::from_pairs([("HOME", "/home/ferris")]);
        assert_eq!(env.home_dir(), Some(PathBuf::from("/home/ferris")));
    }

    #[test]
    fn inherited_is_not_empty() {
        // Every test harness runs with at least PATH set.
        assert!(!Environment::inherited().is_empty());
    }
}
