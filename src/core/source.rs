#![forbid(unsafe_code)]

use std::path::Path;

use crate::error::McError;

/// Outcome of reading an optional backing file. Keeps "nothing there" apart
/// from "there but unreadable" so callers choose how to degrade.
#[derive(Debug)]
pub enum Source<T> {
    Loaded(T),
    Missing,
    Unreadable(McError),
}

impl<T> Source<T> {
    /// Reads `path` as UTF-8 text and hands it to `parse`.
    pub fn read_with(path: &Path, parse: impl FnOnce(&str) -> Result<T, McError>) -> Self {
        match std::fs::read_to_string(path) {
            Ok(raw) => match parse(&raw) {
                Ok(v) => Self::Loaded(v),
                Err(e) => Self::Unreadable(e),
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Self::Missing,
            Err(e) => Self::Unreadable(McError::io(path, e)),
        }
    }

    #[must_use]
    pub fn is_unreadable(&self) -> bool {
        matches!(self, Self::Unreadable(_))
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Source<U> {
        match self {
            Self::Loaded(v) => Source::Loaded(f(v)),
            Self::Missing => Source::Missing,
            Self::Unreadable(e) => Source::Unreadable(e),
        }
    }

    /// Missing becomes `None`; unreadable becomes an error.
    pub fn into_result(self) -> Result<Option<T>, McError> {
        match self {
            Self::Loaded(v) => Ok(Some(v)),
            Self::Missing => Ok(None),
            Self::Unreadable(e) => Err(e),
        }
    }
}

impl<T: Default> Source<T> {
    /// Degrades to the default value, logging unreadable sources.
    pub fn or_default_logged(self, what: &str) -> T {
        match self {
            Self::Loaded(v) => v,
            Self::Missing => T::default(),
            Self::Unreadable(e) => {
                tracing::warn!(source = what, error = %e, "source unreadable, using empty value");
                T::default()
            }
        }
    }
}
