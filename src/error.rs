use thiserror::Error;

use strum::{Display, EnumIter};

macro_rules! invalid_parameter {
    // Single string version
    ($msg:expr) => {
        crate::Error::InvalidParameter {
            message: $msg.to_string(),
            file: file!(),
            line: line!(),
        }
    };

    // Format string with arguments version
    ($fmt:expr, $($arg:tt)*) => {
        crate::Error::InvalidParameter {
            message: format!($fmt, $($arg)*),
            file: file!(),
            line: line!(),
        }
    };
}

macro_rules! illegal_state {
    ($msg:expr) => {
        crate::Error::IllegalState {
            message: $msg.to_string(),
            file: file!(),
            line: line!(),
        }
    };

    ($fmt:expr, $($arg:tt)*) => {
        crate::Error::IllegalState {
            message: format!($fmt, $($arg)*),
            file: file!(),
            line: line!(),
        }
    };
}

macro_rules! runtime_error {
    ($msg:expr) => {
        crate::Error::RuntimeError {
            message: $msg.to_string(),
            file: file!(),
            line: line!(),
        }
    };

    ($fmt:expr, $($arg:tt)*) => {
        crate::Error::RuntimeError {
            message: format!($fmt, $($arg)*),
            file: file!(),
            line: line!(),
        }
    };
}

/// Coarse classification of an [`Error`], used as the diagnostic code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumIter)]
pub enum ErrorKind {
    /// A caller passed a malformed, out-of-range or detached argument.
    #[strum(serialize = "ERR_INVALID_PARAMETER")]
    InvalidParameter,
    /// An internal invariant or the host protocol was violated.
    #[strum(serialize = "ERR_ILLEGAL_STATE")]
    IllegalState,
    /// An external collaborator failed.
    #[strum(serialize = "ERR_RUNTIME_ERROR")]
    RuntimeError,
    /// A lock guarding shared state was poisoned.
    #[strum(serialize = "ERR_LOCK")]
    Lock,
}

/// The generic Error type, which covers every failure a lifecycle operation can report.
///
/// None of these errors is fatal for the process. The host-driven lifecycle call that
/// received the error is expected to abort that single step and carry on.
///
/// # Error Categories
///
/// - [`Error::InvalidParameter`] - Malformed, out-of-range or detached argument (caller bug)
/// - [`Error::IllegalState`] - Protocol misuse, e.g. a foreign record in a chain slot or an
///   uninit cause the host is not supposed to produce
/// - [`Error::RuntimeError`] - An external collaborator (surface resolution) failed
/// - [`Error::LockError`] - A lock guarding registry state was poisoned
///
/// # Examples
///
/// ```rust
/// use ctxsync::{Error, ErrorKind};
///
/// fn classify(err: &Error) -> &'static str {
///     match err.kind() {
///         ErrorKind::InvalidParameter => "caller bug",
///         ErrorKind::IllegalState => "protocol violation",
///         ErrorKind::RuntimeError => "collaborator failure",
///         ErrorKind::Lock => "poisoned lock",
///     }
/// }
/// # let _ = classify;
/// ```
#[derive(Error, Debug)]
pub enum Error {
    /// An argument did not pass validation.
    ///
    /// Raised for empty names or symbols, a zero timeframe, a record that carries no
    /// program id where one is required, or an out-of-range program id.
    ///
    /// # Fields
    ///
    /// * `message` - Detailed description of the rejected argument
    /// * `file` - Source file where the error was detected
    /// * `line` - Source line where the error was detected
    #[error("Invalid parameter - {file}:{line}: {message}")]
    InvalidParameter {
        /// The message to be printed for the InvalidParameter error
        message: String,
        /// The source file in which this error occured
        file: &'static str,
        /// The source line in which this error occured
        line: u32,
    },

    /// The registry or the host protocol is in a state that must not happen.
    ///
    /// Typical causes are a release call for a record that is not the chain's current
    /// main record, or an uninit cause that the host never produces for the given
    /// program kind and environment.
    #[error("Illegal state - {file}:{line}: {message}")]
    IllegalState {
        /// The message to be printed for the IllegalState error
        message: String,
        /// The source file in which this error occured
        file: &'static str,
        /// The source line in which this error occured
        line: u32,
    },

    /// An external collaborator failed, or an expected resurrection target is missing.
    #[error("Runtime error - {file}:{line}: {message}")]
    RuntimeError {
        /// The message to be printed for the RuntimeError error
        message: String,
        /// The source file in which this error occured
        file: &'static str,
        /// The source line in which this error occured
        line: u32,
    },

    /// Failed to lock target.
    ///
    /// A thread panicked while holding a lock on a record or on the registry.
    #[error("Failed to lock target")]
    LockError,
}

impl Error {
    /// Returns the classification of this error.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::InvalidParameter { .. } => ErrorKind::InvalidParameter,
            Error::IllegalState { .. } => ErrorKind::IllegalState,
            Error::RuntimeError { .. } => ErrorKind::RuntimeError,
            Error::LockError => ErrorKind::Lock,
        }
    }

    /// Returns the bare message without the source location, if the variant carries one.
    #[must_use]
    pub fn message(&self) -> Option<&str> {
        match self {
            Error::InvalidParameter { message, .. }
            | Error::IllegalState { message, .. }
            | Error::RuntimeError { message, .. } => Some(message.as_str()),
            Error::LockError => None,
        }
    }

    /// Returns the source location `(file, line)` where the error was raised.
    #[must_use]
    pub fn location(&self) -> Option<(&'static str, u32)> {
        match self {
            Error::InvalidParameter { file, line, .. }
            | Error::IllegalState { file, line, .. }
            | Error::RuntimeError { file, line, .. } => Some((*file, *line)),
            Error::LockError => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_macros_capture_location() {
        let err = invalid_parameter!("invalid parameter period = {}", 0);
        assert_eq!(err.kind(), ErrorKind::InvalidParameter);
        assert_eq!(err.message(), Some("invalid parameter period = 0"));

        let (file, line) = err.location().unwrap();
        assert!(file.ends_with("error.rs"));
        assert!(line > 0);
    }

    #[test]
    fn test_display_contains_message() {
        let err = illegal_state!("unexpected uninit reason");
        let display = format!("{err}");
        assert!(display.starts_with("Illegal state - "));
        assert!(display.contains("unexpected uninit reason"));

        let err = runtime_error!("surface lookup failed");
        assert_eq!(err.kind(), ErrorKind::RuntimeError);
        assert_eq!(Error::LockError.kind(), ErrorKind::Lock);
        assert!(Error::LockError.message().is_none());
    }

    #[test]
    fn test_kind_codes() {
        assert_eq!(ErrorKind::InvalidParameter.to_string(), "ERR_INVALID_PARAMETER");
        assert_eq!(ErrorKind::IllegalState.to_string(), "ERR_ILLEGAL_STATE");
        assert_eq!(ErrorKind::RuntimeError.to_string(), "ERR_RUNTIME_ERROR");
    }
}
