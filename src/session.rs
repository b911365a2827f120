//! Device session: the handle, its believed mode, the poller and the
//! channels, behind one API.
//!
//! [`Session`] is the main type in this crate. Commands (`configure`,
//! `write`, `set_bit_mode`, `set_gpio`, `get_gpio`, `purge`, `hard_purge`,
//! `reset`) return their result to the caller and also publish one
//! [`CommandResponse`] for observers. Queries (`read`, `queue_status`,
//! `read_device_bit_mode`) only return their result.
//!
//! All transport calls, foreground and poller alike, are serialized through
//! one lock, so commands may be issued while the poller is running.
//!
//! # Example
//!
//! ```
//! use ftdi_session::sim::SimDriver;
//! use ftdi_session::{BitMode, Session, SessionConfig};
//!
//! let mut driver = SimDriver::new();
//! driver.add_device("FT000001", "Simulated FT232H");
//!
//! let mut session = Session::open_by_index(&driver, 0, SessionConfig::default())?;
//! session.set_bit_mode(0xFF, BitMode::AsyncBitBang)?;
//! session.set_gpio(0x7B)?;
//! assert_eq!(session.get_gpio()?, 0x7B);
//! session.close()?;
//! # Ok::<(), ftdi_session::Error>(())
//! ```

use std::time::Duration;

use tokio::sync::watch;

use crate::channel::{Channels, Subscription};
use crate::config::SessionConfig;
use crate::constants::command_frame;
use crate::error::{DriverStatus, Error, Result};
use crate::event::{
    CommandKind, CommandPayload, CommandResponse, DataChunk, StatusEvent, StatusKind,
};
use crate::poller::{PollSettings, Poller, ReadStopHandle};
use crate::purge;
use crate::selftest;
use crate::transport::{Driver, SharedTransport, Transport};
use crate::types::{BitMode, DeviceIdentity, PurgeMask, QueueStatus, SerialConfig};

/// Mode and lifecycle state owned by the session.
///
/// `bit_mode` is a cache of the last mode this session successfully
/// requested. Another process, or a device-side reset, can change the real
/// mode without this cache noticing; use
/// [`Session::read_device_bit_mode`] to ask the hardware.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct SessionState {
    bit_mode: BitMode,
    open: bool,
}

/// An open device session.
pub struct Session {
    transport: SharedTransport,
    identity: DeviceIdentity,
    state: SessionState,
    config: SessionConfig,
    poller: Poller,
    channels: Channels,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("identity", &self.identity)
            .field("bit_mode", &self.state.bit_mode)
            .field("open", &self.state.open)
            .field("reading", &self.poller.is_running())
            .finish_non_exhaustive()
    }
}

// ---- Opening ----

impl Session {
    /// Open the device at `index` in the driver's device list.
    pub fn open_by_index<D: Driver>(
        driver: &D,
        index: u32,
        config: SessionConfig,
    ) -> Result<Self> {
        log::debug!("Opening device at index {}", index);
        let (transport, identity) = driver.open_by_index(index)?;
        Self::from_transport(transport, identity, config)
    }

    /// Open the device with the given serial number.
    pub fn open_by_serial<D: Driver>(
        driver: &D,
        serial: &str,
        config: SessionConfig,
    ) -> Result<Self> {
        log::debug!("Opening device with serial {}", serial);
        let (transport, identity) = driver.open_by_serial(serial)?;
        Self::from_transport(transport, identity, config)
    }

    /// Wrap an already opened transport.
    ///
    /// Applies the timeouts, latency timer and USB transfer size from
    /// `config`. On failure the transport is closed again.
    pub fn from_transport<T: Transport + 'static>(
        mut transport: T,
        identity: DeviceIdentity,
        config: SessionConfig,
    ) -> Result<Self> {
        if let Err(e) = apply_config(&mut transport, &config) {
            if let Err(close_err) = transport.close() {
                log::warn!("Failed to close device after setup error: {}", close_err);
            }
            return Err(e);
        }

        log::info!(
            "Opened device {} (serial {:?}, {:?})",
            identity.index,
            identity.serial_number,
            identity.description
        );

        let channels = Channels::new(config.data_capacity, config.status_capacity);
        Ok(Self {
            transport: SharedTransport::new(Box::new(transport)),
            identity,
            state: SessionState {
                bit_mode: BitMode::Reset,
                open: true,
            },
            config,
            poller: Poller::default(),
            channels,
        })
    }
}

fn apply_config(transport: &mut dyn Transport, config: &SessionConfig) -> Result<()> {
    transport.set_timeouts(config.read_timeout, config.write_timeout)?;
    if let Some(latency) = config.latency_timer {
        if latency == 0 {
            return Err(Error::InvalidArgument("latency must be between 1 and 255"));
        }
        transport.set_latency_timer(latency)?;
    }
    if let Some(size) = config.usb_transfer_size {
        transport.set_usb_parameters(size, size)?;
    }
    Ok(())
}

// ---- Identity / state ----

impl Session {
    /// Identity of the opened device.
    pub fn identity(&self) -> &DeviceIdentity {
        &self.identity
    }

    /// Position of the device in the driver's list when it was opened.
    pub fn device_index(&self) -> u32 {
        self.identity.index
    }

    /// USB serial number.
    pub fn serial_number(&self) -> &str {
        &self.identity.serial_number
    }

    /// USB product description.
    pub fn description(&self) -> &str {
        &self.identity.description
    }

    /// Whether the session is open.
    pub fn is_open(&self) -> bool {
        self.state.open
    }

    /// The mode this session last set successfully.
    pub fn bit_mode(&self) -> BitMode {
        self.state.bit_mode
    }

    /// The configuration the session was opened with.
    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    fn ensure_open(&self) -> Result<()> {
        if self.state.open {
            Ok(())
        } else {
            Err(Error::NotOpen)
        }
    }

    fn ensure_bit_bang(&self) -> Result<()> {
        if self.state.bit_mode.is_bit_bang() {
            Ok(())
        } else {
            Err(Error::Precondition("device not in bit-bang mode"))
        }
    }

    /// Run a command and publish its outcome.
    fn command<T>(
        &mut self,
        kind: CommandKind,
        op: impl FnOnce(&mut Self) -> Result<T>,
        describe: impl FnOnce(&T) -> (String, Option<CommandPayload>),
    ) -> Result<T> {
        let outcome = self.ensure_open().and_then(|()| op(self));
        let response = match &outcome {
            Ok(value) => {
                let (message, payload) = describe(value);
                log::debug!("{:?}: {}", kind, message);
                CommandResponse::success(kind, message, payload)
            }
            Err(e) => {
                log::debug!("{:?} failed: {}", kind, e);
                CommandResponse::failure(kind, e)
            }
        };
        self.channels.responses.publish(response);
        outcome
    }
}

// ---- Commands ----

impl Session {
    /// Apply baud rate, word length, stop bits, parity and flow control.
    pub fn configure(&mut self, serial: &SerialConfig) -> Result<()> {
        let serial = *serial;
        self.command(
            CommandKind::Configure,
            |s| {
                let mut t = s.transport.lock();
                t.set_baud_rate(serial.baud_rate)?;
                t.set_data_characteristics(serial.data_bits, serial.stop_bits, serial.parity)?;
                t.set_flow_control(serial.flow_control)
            },
            |_| (format!("Configured {serial}"), None),
        )?;
        self.channels.status.publish(StatusEvent::new(
            StatusKind::Configured,
            format!("Configured {serial}"),
        ));
        Ok(())
    }

    /// Write bytes to the device. Returns the number of bytes accepted,
    /// which may be less than `data.len()`.
    pub fn write(&mut self, data: &[u8]) -> Result<usize> {
        let written = self.command(
            CommandKind::Write,
            |s| s.transport.lock().write(data),
            |&n| {
                (
                    format!("Wrote {} of {} bytes", n, data.len()),
                    Some(CommandPayload::BytesWritten(n)),
                )
            },
        )?;
        log::trace!("Sent {} bytes", written);
        self.channels.status.publish(StatusEvent::new(
            StatusKind::WriteCompleted,
            format!("{written} bytes written"),
        ));
        Ok(written)
    }

    /// Enter a bit mode. `mask` selects output pins (bit = 1).
    ///
    /// The cached mode changes only when the driver call succeeds.
    pub fn set_bit_mode(&mut self, mask: u8, mode: BitMode) -> Result<()> {
        self.command(
            CommandKind::SetBitMode,
            |s| {
                s.transport.lock().set_bit_mode(mask, mode)?;
                s.state.bit_mode = mode;
                Ok(())
            },
            |()| {
                (
                    format!("Bit mode {mode:?} (mask 0x{mask:02X})"),
                    Some(CommandPayload::BitMode(mode)),
                )
            },
        )
    }

    /// Drive the bit-bang output pins.
    ///
    /// Sends a five-byte frame: `value` followed by four zero bytes. Fails
    /// without touching the device unless the session is in a bit-bang mode.
    pub fn set_gpio(&mut self, value: u8) -> Result<()> {
        self.command(
            CommandKind::SetGpio,
            |s| {
                s.ensure_bit_bang()?;
                let frame = command_frame(value);
                let n = s.transport.lock().write(&frame)?;
                if n != frame.len() {
                    return Err(Error::Driver(DriverStatus::FailedToWriteDevice));
                }
                Ok(())
            },
            |_| (format!("GPIO set to 0x{value:02X}"), None),
        )
    }

    /// Read the instantaneous pin byte.
    ///
    /// Gated like [`set_gpio`](Self::set_gpio): fails unless the session is
    /// in a bit-bang mode.
    pub fn get_gpio(&mut self) -> Result<u8> {
        self.command(
            CommandKind::GetGpio,
            |s| {
                s.ensure_bit_bang()?;
                s.transport.lock().get_bit_mode()
            },
            |&pins| (format!("GPIO reads 0x{pins:02X}"), Some(CommandPayload::Pins(pins))),
        )
    }

    /// Clear the driver buffers selected by `mask`.
    pub fn purge(&mut self, mask: PurgeMask) -> Result<()> {
        self.command(
            CommandKind::Purge,
            |s| s.transport.lock().purge(mask),
            |_| (format!("Purged {mask:?}"), None),
        )
    }

    /// Flush, purge and drain until the receive queue is empty.
    ///
    /// Afterwards no queued device-to-host byte predates the next read,
    /// unless the device keeps sending. Returns the number of late bytes
    /// discarded by the drain.
    pub fn hard_purge(&mut self) -> Result<usize> {
        let mode = self.state.bit_mode;
        let timeout = self.config.purge_timeout;
        self.command(
            CommandKind::Purge,
            |s| purge::hard_purge(s.transport.lock().as_mut(), mode, timeout),
            |&n| {
                (
                    format!("Hard purge complete, {n} late bytes discarded"),
                    Some(CommandPayload::BytesDiscarded(n)),
                )
            },
        )
    }

    /// Reset the device. The cached mode returns to [`BitMode::Reset`].
    pub fn reset(&mut self) -> Result<()> {
        self.command(
            CommandKind::Reset,
            |s| {
                s.transport.lock().reset_device()?;
                s.state.bit_mode = BitMode::Reset;
                Ok(())
            },
            |_| ("Device reset".to_string(), Some(CommandPayload::BitMode(BitMode::Reset))),
        )
    }

    /// Set the latency timer (1-255 ms).
    pub fn set_latency_timer(&mut self, latency_ms: u8) -> Result<()> {
        self.ensure_open()?;
        if latency_ms == 0 {
            return Err(Error::InvalidArgument("latency must be between 1 and 255"));
        }
        self.transport.lock().set_latency_timer(latency_ms)
    }
}

// ---- Queries ----

impl Session {
    /// Read up to `max_len` bytes directly, bypassing the data channel.
    pub fn read(&mut self, max_len: usize) -> Result<Vec<u8>> {
        self.ensure_open()?;
        let mut buf = vec![0u8; max_len];
        let n = self.transport.lock().read(&mut buf)?;
        buf.truncate(n);
        Ok(buf)
    }

    /// Query the driver queue depths.
    pub fn queue_status(&mut self) -> Result<QueueStatus> {
        self.ensure_open()?;
        self.transport.lock().queue_status()
    }

    /// Ask the device for its pin byte now, ignoring the cached mode.
    pub fn read_device_bit_mode(&mut self) -> Result<u8> {
        self.ensure_open()?;
        self.transport.lock().get_bit_mode()
    }

    /// Verify MPSSE command mode with the loopback self-test.
    ///
    /// Runs in any cached mode; outside [`BitMode::Mpsse`] a warning is
    /// logged and the device will usually not answer. Fails with
    /// [`Error::Timeout`] when the device does not answer within
    /// [`SessionConfig::self_test_timeout`] and with
    /// [`Error::ProtocolViolation`] when the answer lacks the echo. The
    /// transport stays locked for the whole sequence.
    pub fn verify_mpsse(&mut self) -> Result<()> {
        self.ensure_open()?;
        if self.state.bit_mode != BitMode::Mpsse {
            log::warn!("Running MPSSE self-test in {:?} mode", self.state.bit_mode);
        }
        let timeout = self.config.self_test_timeout;
        selftest::run_loopback_test(self.transport.lock().as_mut(), timeout)
    }

    /// Run the MPSSE self-test; `true` when it passes.
    ///
    /// See [`verify_mpsse`](Self::verify_mpsse) for the failure cause.
    pub fn test_mpsse(&mut self) -> bool {
        match self.verify_mpsse() {
            Ok(()) => {
                log::info!("MPSSE self-test passed");
                true
            }
            Err(e) => {
                log::warn!("MPSSE self-test failed: {}", e);
                false
            }
        }
    }
}

// ---- Reading / channels ----

impl Session {
    /// Start the background poller. No-op if it is already running.
    ///
    /// Must be called from within a tokio runtime. A `buffer_size` of 0 is
    /// treated as 1.
    pub fn start_reading(&mut self, buffer_size: usize, poll_interval: Duration) -> Result<()> {
        self.ensure_open()?;
        self.poller.start(
            self.transport.clone(),
            self.channels.clone(),
            PollSettings {
                buffer_size,
                interval: poll_interval,
            },
        )
    }

    /// Start the poller with the configured default buffer size and interval.
    pub fn start_reading_default(&mut self) -> Result<()> {
        self.start_reading(self.config.default_buffer_size, self.config.default_poll_interval)
    }

    /// Stop the background poller. No-op if it is not running.
    pub fn stop_reading(&mut self) {
        self.poller.stop();
    }

    /// Whether the poller is running.
    pub fn is_reading(&self) -> bool {
        self.poller.is_running()
    }

    /// A handle that stops the current poller from any thread.
    pub fn reading_stop_handle(&self) -> Option<ReadStopHandle> {
        self.poller.stop_handle()
    }

    /// Subscribe to received data.
    pub fn subscribe_data(&self) -> Subscription<DataChunk> {
        self.channels.data.subscribe()
    }

    /// Subscribe to status events, starting with the latest one.
    pub fn subscribe_status(&self) -> Subscription<StatusEvent> {
        self.channels.status.subscribe()
    }

    /// Watch the latest command response.
    pub fn subscribe_responses(&self) -> watch::Receiver<Option<CommandResponse>> {
        self.channels.responses.subscribe()
    }

    /// The latest status event.
    pub fn last_status(&self) -> Option<StatusEvent> {
        self.channels.status.latest()
    }

    /// The latest command response.
    pub fn last_response(&self) -> Option<CommandResponse> {
        self.channels.responses.latest()
    }
}

// ---- Closing ----

impl Session {
    /// Stop reading and close the device. Idempotent.
    pub fn close(&mut self) -> Result<()> {
        if !self.state.open {
            return Ok(());
        }
        self.poller.stop();
        self.state.open = false;
        let result = self.transport.lock().close();
        let message = match &result {
            Ok(()) => "Device closed".to_string(),
            Err(e) => format!("Device closed with error: {e}"),
        };
        log::info!("{} (serial {:?})", message, self.identity.serial_number);
        self.channels
            .status
            .publish(StatusEvent::new(StatusKind::Closed, message));
        result
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            log::warn!("Failed to close device on drop: {}", e);
        }
    }
}
