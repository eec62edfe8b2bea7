//! Script errors.
//!
//! A script error carries a kind, a message and, when it was raised by a
//! native builtin, the original error as its source. The source survives the
//! trip through the interpreter so hosts can recover typed failures (for
//! example a workflow's custom error reason) from an uncaught script error.

use std::fmt;
use std::rc::Rc;

use super::ast::Span;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Syntax,
    Name,
    Type,
    Value,
    Attribute,
    Key,
    Index,
    ZeroDivision,
    Overflow,
    Recursion,
    Load,
    /// Raised by `fail()` in script code.
    Fail,
    /// Raised by a native builtin; see [`Error::source_error`].
    Native,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Syntax => "SyntaxError",
            ErrorKind::Name => "NameError",
            ErrorKind::Type => "TypeError",
            ErrorKind::Value => "ValueError",
            ErrorKind::Attribute => "AttributeError",
            ErrorKind::Key => "KeyError",
            ErrorKind::Index => "IndexError",
            ErrorKind::ZeroDivision => "ZeroDivisionError",
            ErrorKind::Overflow => "OverflowError",
            ErrorKind::Recursion => "RecursionError",
            ErrorKind::Load => "LoadError",
            ErrorKind::Fail => "Error",
            ErrorKind::Native => "Error",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone)]
pub struct Error {
    kind: ErrorKind,
    message: String,
    span: Option<Span>,
    source: Option<Rc<dyn std::error::Error + 'static>>,
    /// Machine-readable failure reason, set for errors raised by hosts.
    reason: Option<String>,
    details: Option<String>,
    /// Function names from innermost to outermost.
    trace: Vec<String>,
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            span: None,
            source: None,
            reason: None,
            details: None,
            trace: Vec::new(),
        }
    }

    pub fn syntax(message: impl Into<String>, span: Option<Span>) -> Self {
        Self {
            span,
            ..Self::new(ErrorKind::Syntax, message)
        }
    }

    pub fn name(name: &str) -> Self {
        Self::new(ErrorKind::Name, format!("name '{}' is not defined", name))
    }

    pub fn type_error(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Type, message)
    }

    pub fn value(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Value, message)
    }

    pub fn fail(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Fail, message)
    }

    /// Wrap an error raised by native code.
    pub fn native<E>(err: E) -> Self
    where
        E: std::error::Error + 'static,
    {
        Self {
            message: err.to_string(),
            source: Some(Rc::new(err)),
            ..Self::new(ErrorKind::Native, String::new())
        }
    }

    /// Attach a failure reason and optional details.
    pub fn with_reason(mut self, reason: impl Into<String>, details: Option<String>) -> Self {
        self.reason = Some(reason.into());
        self.details = details;
        self
    }

    /// The host-supplied reason, or the error kind's name.
    pub fn reason(&self) -> &str {
        self.reason.as_deref().unwrap_or(self.kind.as_str())
    }

    pub fn details(&self) -> Option<&str> {
        self.details.as_deref()
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn span(&self) -> Option<Span> {
        self.span
    }

    pub fn trace(&self) -> &[String] {
        &self.trace
    }

    /// The native error this script error was raised from, if any.
    pub fn source_error(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source.as_deref()
    }

    /// Downcast the native source to a concrete error type.
    pub fn downcast_source<E: std::error::Error + 'static>(&self) -> Option<&E> {
        self.source.as_deref().and_then(|e| e.downcast_ref::<E>())
    }

    pub(crate) fn with_span(mut self, span: Span) -> Self {
        if self.span.is_none() {
            self.span = Some(span);
        }
        self
    }

    pub(crate) fn in_function(mut self, name: &str) -> Self {
        self.trace.push(name.to_string());
        self
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            ErrorKind::Native | ErrorKind::Fail => write!(f, "{}", self.message)?,
            kind => write!(f, "{}: {}", kind, self.message)?,
        }
        if let Some(span) = self.span {
            write!(f, " (line {}, column {})", span.line + 1, span.col + 1)?;
        }
        if let Some(innermost) = self.trace.first() {
            write!(f, " in {}", innermost)?;
        }
        Ok(())
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source.as_deref()
    }
}
