use std::fmt::{self, Display};

/// What went wrong in a tool call.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// The model passed arguments the tool cannot use.
    InvalidInput,
    /// The tool ran but could not complete its work.
    ExecutionError,
    /// The tool did not finish within its budget.
    TimedOut,
}

impl ErrorKind {
    /// Returns a short lowercase label, suitable for logs.
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::InvalidInput => "invalid input",
            ErrorKind::ExecutionError => "execution error",
            ErrorKind::TimedOut => "timed out",
        }
    }
}

impl Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A failed tool call.
///
/// The message is reported back to the model, so it should say what
/// happened in terms the model can act on.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Error {
    kind: ErrorKind,
    message: String,
}

impl Error {
    /// Creates an error of the given kind.
    pub fn new<S: Into<String>>(kind: ErrorKind, message: S) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    /// Shorthand for an [`ErrorKind::InvalidInput`] error.
    #[inline]
    pub fn invalid_input<S: Into<String>>(message: S) -> Self {
        Self::new(ErrorKind::InvalidInput, message)
    }

    /// Shorthand for an [`ErrorKind::ExecutionError`] error.
    #[inline]
    pub fn execution_error<S: Into<String>>(message: S) -> Self {
        Self::new(ErrorKind::ExecutionError, message)
    }

    /// Shorthand for an [`ErrorKind::TimedOut`] error.
    #[inline]
    pub fn timed_out<S: Into<String>>(message: S) -> Self {
        Self::new(ErrorKind::TimedOut, message)
    }

    /// Returns the kind of the error.
    #[inline]
    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// Returns the message reported to the model.
    #[inline]
    pub fn message(&self) -> &str {
        &self.message
    }
}

impl Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.message.is_empty() {
            return write!(f, "{}", self.kind);
        }
        f.write_str(&self.message)
    }
}

impl std::error::Error for Error {}
