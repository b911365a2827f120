//! Session management for FTDI USB bridge chips.
//!
//! A [`Session`] owns one opened device and keeps the mode it believes the
//! device is in. On top of raw transport calls it provides:
//!
//! - **Background reading**: a tokio task polls the receive queue and
//!   broadcasts what arrives as [`DataChunk`]s ([`Session::start_reading`]).
//! - **Status and responses**: lifecycle [`StatusEvent`]s and one
//!   [`CommandResponse`] per command, for any number of observers.
//! - **Bit modes and GPIO**: mode changes, bit-bang pin writes and reads
//!   gated on the current mode.
//! - **MPSSE self-test**: loopback check that the command processor is
//!   answering ([`Session::test_mpsse`]).
//! - **Hard purge**: flush, purge and drain until nothing stale remains
//!   ([`Session::hard_purge`]).
//!
//! The device is reached through the [`Transport`] trait. The `usb` feature
//! (on by default) provides [`usb::UsbDriver`] built on
//! [nusb](https://crates.io/crates/nusb); [`sim`] provides an in-memory
//! device for tests.
//!
//! # Quick Start
//!
//! ```no_run
//! use std::time::Duration;
//! use ftdi_session::usb::UsbDriver;
//! use ftdi_session::{SerialConfig, Session, SessionConfig};
//!
//! # async fn run() -> ftdi_session::Result<()> {
//! let mut session = Session::open_by_index(&UsbDriver::new(), 0, SessionConfig::default())?;
//! session.configure(&SerialConfig::new(115_200))?;
//!
//! let mut data = session.subscribe_data();
//! session.start_reading(4096, Duration::from_millis(10))?;
//! session.write(b"hello\r\n")?;
//! while let Some(chunk) = data.recv().await {
//!     println!("{:02X?}", &chunk[..]);
//! }
//! # Ok(())
//! # }
//! ```

pub mod channel;
pub mod config;
pub mod constants;
pub mod error;
pub mod event;
mod poller;
mod purge;
pub mod selftest;
pub mod session;
pub mod sim;
pub mod transport;
pub mod types;
#[cfg(feature = "usb")]
pub mod usb;

// ---- Convenience re-exports ----

pub use channel::{DataChannel, ResponseChannel, StatusChannel, Subscription};
pub use config::SessionConfig;
pub use constants::FTDI_VID;
pub use error::{DriverStatus, Error, ErrorCategory, Result};
pub use event::{
    CommandKind, CommandPayload, CommandResponse, DataChunk, ErrorDetail, StatusEvent, StatusKind,
};
pub use poller::ReadStopHandle;
pub use session::Session;
pub use transport::{Driver, Transport};
pub use types::*;
