//! Error taxonomy and the sticky error context.
//!
//! Lower layers return [`KnitResult`] values. The [`Runtime`](crate::Runtime)
//! reports each failure once through an [`ErrorContext`], which keeps the
//! first error until it is cleared and applies the configured [`ErrorPolicy`].

use std::collections::TryReserveError;

use derive_more::{Display, Error};
use serde::{Deserialize, Serialize};
use tracing::debug;

pub type KnitResult<T> = Result<T, KnitError>;

/// Error categories. The discriminants are the numeric codes handed to
/// embedders that work with plain integers.
#[derive(Clone, Copy, Debug, Display, Error, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ErrorKind {
    #[display("out of memory")]
    OutOfMemory = 1,

    /// Reserved for the parsing stage.
    #[display("syntax error")]
    Syntax = 2,

    #[display("runtime error")]
    Runtime = 3,

    #[display("not found")]
    NotFound = 4,
}

impl ErrorKind {
    pub const fn code(self) -> u8 {
        self as u8
    }
}

/// A failure produced by one of the runtime layers.
#[derive(Clone, Debug, Display, Error, PartialEq, Eq)]
#[display("{message}")]
pub struct KnitError {
    kind: ErrorKind,
    message: String,
}

impl KnitError {
    pub fn new(kind: ErrorKind, message: impl std::fmt::Display) -> Self {
        Self {
            kind,
            message: message.to_string(),
        }
    }

    pub fn out_of_memory(msg: impl std::fmt::Display) -> Self {
        Self::new(ErrorKind::OutOfMemory, msg)
    }

    pub fn syntax(msg: impl std::fmt::Display) -> Self {
        Self::new(ErrorKind::Syntax, msg)
    }

    pub fn runtime(msg: impl std::fmt::Display) -> Self {
        Self::new(ErrorKind::Runtime, msg)
    }

    pub fn not_found(msg: impl std::fmt::Display) -> Self {
        Self::new(ErrorKind::NotFound, msg)
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl From<TryReserveError> for KnitError {
    fn from(error: TryReserveError) -> Self {
        KnitError::out_of_memory(format!("allocation failed: {error}"))
    }
}

/// What happens when an error is captured.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorPolicy {
    /// Print the message to stderr and terminate the process.
    #[default]
    Exit,
    /// Hand the error code back to the caller and keep the error latched.
    Continue,
}

/// Sticky first-error state.
#[derive(Debug)]
pub struct ErrorContext {
    policy: ErrorPolicy,
    pending: Option<KnitError>,
}

impl ErrorContext {
    pub fn new(policy: ErrorPolicy) -> Self {
        Self {
            policy,
            pending: None,
        }
    }

    pub fn policy(&self) -> ErrorPolicy {
        self.policy
    }

    /// Capture `error` unless another one is already pending.
    ///
    /// Returns the kind of the pending error, which is `error`'s own kind
    /// only when nothing was pending before. Under [`ErrorPolicy::Exit`] this
    /// does not return.
    pub fn report(&mut self, error: KnitError) -> ErrorKind {
        if let Some(pending) = &self.pending {
            debug!(
                pending = %pending.kind,
                suppressed = %error,
                "error suppressed while another one is pending"
            );
            return pending.kind;
        }

        let kind = error.kind;
        debug!(%kind, message = %error.message, "error captured");
        self.pending = Some(error);
        self.act();
        kind
    }

    fn act(&self) {
        if self.policy != ErrorPolicy::Exit {
            return;
        }
        match &self.pending {
            Some(error) if !error.message.is_empty() => eprintln!("{}", error.message),
            _ => eprintln!("an unknown error occurred (no error message)"),
        }
        std::process::exit(1);
    }

    /// Drop the pending error, if any, so the next one can be captured.
    pub fn clear(&mut self) {
        self.pending = None;
    }

    pub fn is_pending(&self) -> bool {
        self.pending.is_some()
    }

    pub fn pending(&self) -> Option<&KnitError> {
        self.pending.as_ref()
    }

    pub fn kind(&self) -> Option<ErrorKind> {
        self.pending.as_ref().map(KnitError::kind)
    }

    pub fn message(&self) -> Option<&str> {
        self.pending.as_ref().map(KnitError::message)
    }
}
