//! Error types for the ftdi-session crate.

use crate::types::ChipType;

/// Status code reported by the vendor driver when a call fails.
///
/// The numeric values follow the D2XX `FT_STATUS` convention so that codes
/// coming from a native driver binding can be carried through unchanged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, thiserror::Error)]
pub enum DriverStatus {
    /// The handle is not valid (closed or never opened).
    #[error("invalid handle")]
    InvalidHandle,
    /// No device matched the open request.
    #[error("device not found")]
    DeviceNotFound,
    /// The device could not be opened.
    #[error("device not opened")]
    DeviceNotOpened,
    /// Generic I/O failure talking to the device.
    #[error("I/O error")]
    IoError,
    /// The driver ran out of resources.
    #[error("insufficient resources")]
    InsufficientResources,
    /// A parameter was rejected by the driver.
    #[error("invalid parameter")]
    InvalidParameter,
    /// The requested baud rate is not supported.
    #[error("invalid baud rate")]
    InvalidBaudRate,
    /// Writing to the device failed.
    #[error("failed to write device")]
    FailedToWriteDevice,
    /// The arguments to the call were invalid.
    #[error("invalid arguments")]
    InvalidArgs,
    /// The operation is not supported by this device.
    #[error("not supported")]
    NotSupported,
    /// Any other driver failure.
    #[error("other error")]
    OtherError,
    /// The device list has not been built yet.
    #[error("device list not ready")]
    DeviceListNotReady,
}

impl DriverStatus {
    /// Numeric status code.
    pub fn code(self) -> u32 {
        match self {
            Self::InvalidHandle => 1,
            Self::DeviceNotFound => 2,
            Self::DeviceNotOpened => 3,
            Self::IoError => 4,
            Self::InsufficientResources => 5,
            Self::InvalidParameter => 6,
            Self::InvalidBaudRate => 7,
            Self::FailedToWriteDevice => 10,
            Self::InvalidArgs => 16,
            Self::NotSupported => 17,
            Self::OtherError => 18,
            Self::DeviceListNotReady => 19,
        }
    }

    /// Decode a numeric status code. Returns `None` for `0` (OK).
    ///
    /// Codes without a dedicated variant map to [`DriverStatus::OtherError`].
    pub fn from_code(code: u32) -> Option<Self> {
        let status = match code {
            0 => return None,
            1 => Self::InvalidHandle,
            2 => Self::DeviceNotFound,
            3 => Self::DeviceNotOpened,
            4 => Self::IoError,
            5 => Self::InsufficientResources,
            6 => Self::InvalidParameter,
            7 => Self::InvalidBaudRate,
            10 => Self::FailedToWriteDevice,
            16 => Self::InvalidArgs,
            17 => Self::NotSupported,
            19 => Self::DeviceListNotReady,
            _ => Self::OtherError,
        };
        Some(status)
    }
}

/// Coarse classification of an [`Error`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// A driver or USB call failed.
    Transport,
    /// The operation is not valid in the current device state.
    Precondition,
    /// A bounded wait expired.
    Timeout,
    /// The device answered, but not with what the protocol requires.
    ProtocolViolation,
    /// Argument, configuration or runtime errors.
    Other,
}

/// The error type for session operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A driver call returned a non-OK status.
    #[error("driver error: {0} (status {code})", code = .0.code())]
    Driver(#[from] DriverStatus),

    /// An error from the nusb USB layer.
    #[cfg(feature = "usb")]
    #[error("USB error: {0}")]
    Usb(#[from] nusb::Error),

    /// A USB transfer error.
    #[cfg(feature = "usb")]
    #[error("USB transfer error: {0}")]
    Transfer(#[from] nusb::transfer::TransferError),

    /// No matching device was found.
    #[error("device not found")]
    DeviceNotFound,

    /// The session or handle has been closed.
    #[error("device is not open")]
    NotOpen,

    /// The operation is not permitted in the current device mode.
    #[error("{0}")]
    Precondition(&'static str),

    /// A bounded wait exceeded its deadline.
    #[error("timed out: {0}")]
    Timeout(&'static str),

    /// The device response did not match the expected pattern.
    #[error("protocol violation: {0}")]
    ProtocolViolation(&'static str),

    /// Invalid argument(s) were provided.
    #[error("invalid argument: {0}")]
    InvalidArgument(&'static str),

    /// The requested baud rate cannot be achieved within tolerance.
    #[error("unsupported baud rate: requested {requested}, nearest achievable {actual}")]
    UnsupportedBaudRate {
        /// The requested baud rate.
        requested: u32,
        /// The nearest achievable baud rate.
        actual: u32,
    },

    /// The operation is not supported for this chip type.
    #[error("unsupported operation for chip type {0:?}")]
    UnsupportedChip(ChipType),

    /// Starting the poller requires a tokio runtime.
    #[error("no tokio runtime available to run the poller")]
    NoRuntime,

    /// A background blocking task panicked or was cancelled.
    #[error("background task failed: {0}")]
    Task(String),
}

impl Error {
    /// Classify this error.
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::Driver(_) | Self::DeviceNotFound | Self::NotOpen => ErrorCategory::Transport,
            #[cfg(feature = "usb")]
            Self::Usb(_) | Self::Transfer(_) => ErrorCategory::Transport,
            Self::Precondition(_) => ErrorCategory::Precondition,
            Self::Timeout(_) => ErrorCategory::Timeout,
            Self::ProtocolViolation(_) => ErrorCategory::ProtocolViolation,
            Self::InvalidArgument(_)
            | Self::UnsupportedBaudRate { .. }
            | Self::UnsupportedChip(_)
            | Self::NoRuntime
            | Self::Task(_) => ErrorCategory::Other,
        }
    }

    /// Whether this error came from the transport layer.
    pub fn is_transport(&self) -> bool {
        self.category() == ErrorCategory::Transport
    }

    /// The driver status code, if this is a [`Error::Driver`] error.
    pub fn driver_status(&self) -> Option<DriverStatus> {
        match self {
            Self::Driver(status) => Some(*status),
            _ => None,
        }
    }
}

/// A specialized `Result` type for session operations.
pub type Result<T> = std::result::Result<T, Error>;
