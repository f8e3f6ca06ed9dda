use serde::Serialize;
use std::io;
use thiserror::Error;

/// Misuse detected before any socket is opened.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ProbeError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("invalid config: {0}")]
    InvalidConfig(String),
}

/// Platform failure of a single connect attempt, passed through for display.
#[derive(Debug, Error, Clone, PartialEq, Eq, Serialize)]
#[error("{code}: {message}")]
pub struct AttemptError {
    /// Symbolic name such as `ECONNREFUSED`, or the `io::ErrorKind` when unknown.
    pub code: String,
    pub errno: Option<i32>,
    pub message: String,
}

impl AttemptError {
    pub fn from_io(err: &io::Error) -> Self {
        let errno = err.raw_os_error();
        let code = errno
            .and_then(errno_name)
            .map(str::to_string)
            .unwrap_or_else(|| format!("{:?}", err.kind()));
        Self {
            code,
            errno,
            message: err.to_string(),
        }
    }

    /// Attempt torn down by `Prober::stop` before it could settle on its own.
    pub fn aborted() -> Self {
        Self {
            code: "ECONNABORTED".to_string(),
            errno: None,
            message: "attempt aborted by stop".to_string(),
        }
    }

    pub fn is_aborted(&self) -> bool {
        self.errno.is_none() && self.code == "ECONNABORTED"
    }
}

#[cfg(unix)]
fn errno_name(errno: i32) -> Option<&'static str> {
    let name = match errno {
        libc::ECONNREFUSED => "ECONNREFUSED",
        libc::ECONNRESET => "ECONNRESET",
        libc::ECONNABORTED => "ECONNABORTED",
        libc::ENETUNREACH => "ENETUNREACH",
        libc::EHOSTUNREACH => "EHOSTUNREACH",
        libc::ENETDOWN => "ENETDOWN",
        libc::EHOSTDOWN => "EHOSTDOWN",
        libc::ETIMEDOUT => "ETIMEDOUT",
        libc::EADDRNOTAVAIL => "EADDRNOTAVAIL",
        libc::EADDRINUSE => "EADDRINUSE",
        libc::EACCES => "EACCES",
        libc::EPERM => "EPERM",
        libc::EAFNOSUPPORT => "EAFNOSUPPORT",
        libc::EMFILE => "EMFILE",
        libc::ENFILE => "ENFILE",
        libc::ENOBUFS => "ENOBUFS",
        _ => return None,
    };
    Some(name)
}

#[cfg(not(unix))]
fn errno_name(_errno: i32) -> Option<&'static str> {
    None
}
