//! Error types for configuration handling.
//!
//! Out-of-range tunable values are clamped, never rejected; the only
//! failures are names and values that cannot be interpreted at all.

use std::fmt;

/// The result type for core operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while interpreting configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// No tunable has this attribute name.
    UnknownTunable {
        /// The name that was looked up.
        name: String,
    },

    /// The value is not an integer.
    InvalidValue {
        /// The tunable being set.
        tunable: &'static str,
        /// The text that failed to parse.
        value: String,
    },
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnknownTunable { name } => write!(f, "unknown tunable '{name}'"),
            Self::InvalidValue { tunable, value } => {
                write!(f, "invalid value for '{tunable}': {value:?}")
            }
        }
    }
}

impl std::error::Error for Error {}
