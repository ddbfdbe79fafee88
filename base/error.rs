// This file is part of Sentry NVR, a multi-stream video surveillance recorder.
// SPDX-License-Identifier: GPL-3.0-or-later

//! A small gRPC-flavored error type used throughout the workspace.
//!
//! Every fallible operation returns a [`Result<T, Error>`] carrying an
//! [`ErrorKind`] that the HTTP layer maps to a status code exactly once
//! (see `web::error_response`), rather than re-deriving status codes at
//! each call site.

use derive_more::Display;
use std::fmt;

/// Error classification, modeled on gRPC's `StatusCode`.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Display)]
#[non_exhaustive]
pub enum ErrorKind {
    #[display("cancelled")]
    Cancelled,
    #[display("unknown")]
    Unknown,
    #[display("invalid argument")]
    InvalidArgument,
    #[display("deadline exceeded")]
    DeadlineExceeded,
    #[display("not found")]
    NotFound,
    #[display("already exists")]
    AlreadyExists,
    #[display("permission denied")]
    PermissionDenied,
    #[display("resource exhausted")]
    ResourceExhausted,
    #[display("failed precondition")]
    FailedPrecondition,
    #[display("aborted")]
    Aborted,
    #[display("out of range")]
    OutOfRange,
    #[display("internal")]
    Internal,
    #[display("unavailable")]
    Unavailable,
    #[display("data loss")]
    DataLoss,
}

type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

pub struct Error {
    kind: ErrorKind,
    msg: Option<String>,
    source: Option<BoxError>,
}

impl Error {
    pub fn new(kind: ErrorKind) -> Self {
        Error {
            kind,
            msg: None,
            source: None,
        }
    }

    pub fn with_msg(mut self, msg: impl Into<String>) -> Self {
        self.msg = Some(msg.into());
        self
    }

    pub fn with_source<E: Into<BoxError>>(mut self, source: E) -> Self {
        self.source = Some(source.into());
        self
    }

    /// Wraps an arbitrary error, classifying it with `kind`.
    pub fn wrap<E: Into<BoxError>>(kind: ErrorKind, source: E) -> Self {
        Error::new(kind).with_source(source)
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// Returns a `Display` impl that prints this error and every `source()`
    /// in its chain, one per line. Used at the top level (`main`) and
    /// anywhere else a full causal chain is worth logging.
    pub fn chain(&self) -> Chain<'_> {
        Chain(self)
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.msg {
            Some(m) => write!(f, "{}: {}", self.kind, m),
            None => write!(f, "{}", self.kind),
        }
    }
}

impl fmt::Debug for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source.as_deref().map(|e| e as _)
    }
}

pub struct Chain<'a>(&'a Error);

impl fmt::Display for Chain<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)?;
        let mut cause = std::error::Error::source(self.0);
        while let Some(c) = cause {
            write!(f, "\ncaused by: {c}")?;
            cause = c.source();
        }
        Ok(())
    }
}

impl From<rusqlite::Error> for Error {
    fn from(e: rusqlite::Error) -> Self {
        Error::wrap(ErrorKind::Internal, e)
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        let kind = match e.kind() {
            std::io::ErrorKind::NotFound => ErrorKind::NotFound,
            std::io::ErrorKind::PermissionDenied => ErrorKind::PermissionDenied,
            std::io::ErrorKind::AlreadyExists => ErrorKind::AlreadyExists,
            _ => ErrorKind::Internal,
        };
        Error::wrap(kind, e)
    }
}

/// Extension methods for annotating foreign errors with an [`ErrorKind`].
pub trait ResultExt<T> {
    fn err_kind(self, k: ErrorKind) -> Result<T, Error>;
}

impl<T, E: Into<BoxError>> ResultExt<T> for Result<T, E> {
    fn err_kind(self, k: ErrorKind) -> Result<T, Error> {
        self.map_err(|e| Error::wrap(k, e))
    }
}

/// Builds an [`Error`] without returning it.
///
/// ```ignore
/// err!(NotFound, "no such stream {name}")
/// err!(Internal, "writing segment"; source: underlying)
/// ```
#[macro_export]
macro_rules! err {
    ($kind:ident, $fmt:expr $(, $arg:expr)* ; source: $src:expr) => {
        $crate::Error::new($crate::ErrorKind::$kind)
            .with_msg(format!($fmt $(, $arg)*))
            .with_source($src)
    };
    ($kind:ident ; source: $src:expr) => {
        $crate::Error::new($crate::ErrorKind::$kind).with_source($src)
    };
    ($kind:ident, $fmt:expr $(, $arg:expr)*) => {
        $crate::Error::new($crate::ErrorKind::$kind).with_msg(format!($fmt $(, $arg)*))
    };
    ($kind:ident) => {
        $crate::Error::new($crate::ErrorKind::$kind)
    };
}

/// Like [`err!`], but returns immediately with `Err(...)`.
#[macro_export]
macro_rules! bail {
    ($($t:tt)+) => {
        return Err($crate::err!($($t)+))
    };
}
