//! Options recognised by [`spawn`](super::spawn)

use super::record::ProcessState;
use crate::{CoreError, Result};
use std::collections::BTreeMap;
use std::ffi::OsString;
use std::fmt;
use std::path::PathBuf;

/// Completion callback run once by the reaper after the exit status is published
pub type OnExit = Box<dyn FnOnce(&ProcessState) + Send + 'static>;

/// Changes applied on top of the environment the child inherits
///
/// `Some(value)` sets or overwrites a variable, `None` removes it. Variables
/// without an entry are inherited unchanged.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EnvOverrides {
    entries: BTreeMap<String, Option<String>>,
}

impl EnvOverrides {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set `key` to `value` in the child
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) -> &mut Self {
        self.entries.insert(key.into(), Some(value.into()));
        self
    }

    /// Remove `key` from the child's inherited environment
    pub fn remove(&mut self, key: impl Into<String>) -> &mut Self {
        self.entries.insert(key.into(), None);
        self
    }

    pub fn get(&self, key: &str) -> Option<&Option<String>> {
        self.entries.get(key)
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, Option<&str>)> {
        self.entries
            .iter()
            .map(|(k, v)| (k.as_str(), v.as_deref()))
    }

    /// Reject names and values that cannot be passed to `execve`
    pub fn validate(&self) -> Result<()> {
        for (key, value) in &self.entries {
            if key.is_empty() {
                return Err(CoreError::ValidationError(
                    "environment: variable name cannot be empty".to_string(),
                ));
            }
            if key.contains('=') || key.contains('\0') {
                return Err(CoreError::ValidationError(format!(
                    "environment.{}: name cannot contain '=' or NUL",
                    key.escape_debug()
                )));
            }
            if value.as_deref().is_some_and(|v| v.contains('\0')) {
                return Err(CoreError::ValidationError(format!(
                    "environment.{}: value cannot contain NUL",
                    key
                )));
            }
        }
        Ok(())
    }

    /// Produce the child's environment from `inherited` plus these overrides
    pub fn apply<I>(&self, inherited: I) -> BTreeMap<OsString, OsString>
    where
        I: IntoIterator<Item = (OsString, OsString)>,
    {
        let mut env: BTreeMap<OsString, OsString> = inherited.into_iter().collect();
        for (key, value) in &self.entries {
            match value {
                Some(value) => {
                    env.insert(OsString::from(key), OsString::from(value));
                }
                None => {
                    env.remove(&OsString::from(key));
                }
            }
        }
        env
    }
}

impl<K, V> FromIterator<(K, Option<V>)> for EnvOverrides
where
    K: Into<String>,
    V: Into<String>,
{
    fn from_iter<T: IntoIterator<Item = (K, Option<V>)>>(iter: T) -> Self {
        Self {
            entries: iter
                .into_iter()
                .map(|(k, v)| (k.into(), v.map(Into::into)))
                .collect(),
        }
    }
}

/// Launch options: working directory, environment overrides, initial input
/// and a completion callback
///
/// ```rust,no_run
/// use spawnkit_core::process::{spawn, SpawnOptions};
///
/// let options = SpawnOptions::new()
///     .working_directory("/tmp")
///     .env("GREETING", "hello")
///     .env_remove("HISTFILE")
///     .input("some input\n");
/// let mut record = spawn(["cat"], options)?;
/// record.wait()?;
/// # Ok::<(), spawnkit_core::CoreError>(())
/// ```
#[derive(Default)]
pub struct SpawnOptions {
    pub(crate) working_directory: Option<PathBuf>,
    pub(crate) environment: EnvOverrides,
    pub(crate) input: Option<Vec<u8>>,
    pub(crate) on_exit: Option<OnExit>,
}

impl SpawnOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Directory the child starts in; defaults to the caller's current directory
    pub fn working_directory(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_directory = Some(dir.into());
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.environment.set(key, value);
        self
    }

    pub fn env_remove(mut self, key: impl Into<String>) -> Self {
        self.environment.remove(key);
        self
    }

    /// Replace all environment overrides at once
    pub fn environment(mut self, overrides: EnvOverrides) -> Self {
        self.environment = overrides;
        self
    }

    /// Bytes written to the child's stdin before `spawn` returns.
    ///
    /// Stdin is closed right after writing, even for empty input. Without this
    /// option stdin stays open for the caller.
    pub fn input(mut self, input: impl Into<Vec<u8>>) -> Self {
        self.input = Some(input.into());
        self
    }

    /// Run `callback` once the reaper has recorded the child's exit status
    pub fn on_exit<F>(mut self, callback: F) -> Self
    where
        F: FnOnce(&ProcessState) + Send + 'static,
    {
        self.on_exit = Some(Box::new(callback));
        self
    }

    pub fn has_input(&self) -> bool {
        self.input.is_some()
    }
}

impl fmt::Debug for SpawnOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SpawnOptions")
            .field("working_directory", &self.working_directory)
            .field("environment", &self.environment)
            .field("input_len", &self.input.as_ref().map(Vec::len))
            .field("on_exit", &self.on_exit.is_some())
            .finish()
    }
}
