//! Values published on the session channels.

use std::fmt;
use std::ops::Deref;
use std::sync::Arc;

use crate::error::{DriverStatus, Error, ErrorCategory};
use crate::types::BitMode;

/// One drain of the receive queue, as published on the data channel.
///
/// Chunks are immutable and cheap to clone; every subscriber shares the
/// same allocation.
#[derive(Clone, PartialEq, Eq)]
pub struct DataChunk(Arc<[u8]>);

impl DataChunk {
    /// Number of bytes in the chunk.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether the chunk is empty.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl Deref for DataChunk {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        &self.0
    }
}

impl From<&[u8]> for DataChunk {
    fn from(bytes: &[u8]) -> Self {
        Self(Arc::from(bytes))
    }
}

impl From<Vec<u8>> for DataChunk {
    fn from(bytes: Vec<u8>) -> Self {
        Self(Arc::from(bytes))
    }
}

impl fmt::Debug for DataChunk {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DataChunk({:02X?})", &self.0[..])
    }
}

/// Lifecycle/status event kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StatusKind {
    /// Serial parameters were applied.
    Configured,
    /// The poller started.
    ReadingStarted,
    /// The poller exited.
    ReadingStopped,
    /// A write finished.
    WriteCompleted,
    /// The poller hit a transport error and stopped itself.
    Error,
    /// The session was closed.
    Closed,
}

/// A lifecycle/status event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusEvent {
    /// What happened.
    pub kind: StatusKind,
    /// Human-readable detail.
    pub message: String,
}

impl StatusEvent {
    /// Create an event.
    pub fn new(kind: StatusKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

/// Command operations that publish a [`CommandResponse`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CommandKind {
    /// `configure`
    Configure,
    /// `write`
    Write,
    /// `set_bit_mode`
    SetBitMode,
    /// `set_gpio`
    SetGpio,
    /// `get_gpio`
    GetGpio,
    /// `purge` and `hard_purge`
    Purge,
    /// `reset`
    Reset,
}

/// Typed result value attached to a successful response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandPayload {
    /// Bytes accepted by a write.
    BytesWritten(usize),
    /// Mode entered by `set_bit_mode` or `reset`.
    BitMode(BitMode),
    /// Pin byte read by `get_gpio`.
    Pins(u8),
    /// Bytes discarded while draining during a hard purge.
    BytesDiscarded(usize),
}

/// Cloneable description of the error behind a failed command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorDetail {
    /// Error classification.
    pub category: ErrorCategory,
    /// Driver status code, when the driver reported one.
    pub status: Option<DriverStatus>,
    /// Rendered error message.
    pub message: String,
}

impl From<&Error> for ErrorDetail {
    fn from(err: &Error) -> Self {
        Self {
            category: err.category(),
            status: err.driver_status(),
            message: err.to_string(),
        }
    }
}

/// Outcome of one command invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandResponse {
    /// The command that produced this response.
    pub kind: CommandKind,
    /// Whether the command succeeded.
    pub success: bool,
    /// Human-readable outcome.
    pub message: String,
    /// Result value, for commands that produce one.
    pub payload: Option<CommandPayload>,
    /// Failure detail, when `success` is false.
    pub error: Option<ErrorDetail>,
}

impl CommandResponse {
    pub(crate) fn success(
        kind: CommandKind,
        message: String,
        payload: Option<CommandPayload>,
    ) -> Self {
        Self {
            kind,
            success: true,
            message,
            payload,
            error: None,
        }
    }

    pub(crate) fn failure(kind: CommandKind, err: &Error) -> Self {
        let detail = ErrorDetail::from(err);
        Self {
            kind,
            success: false,
            message: format!("{kind:?} failed: {}", detail.message),
            payload: None,
            error: Some(detail),
        }
    }
}
