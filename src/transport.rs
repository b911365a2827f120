//! The driver handle contract consumed by the session.
//!
//! A [`Transport`] is an opened device handle exposing the synchronous
//! primitives of a vendor driver: single reads and writes, queue status,
//! purge, reset and mode control. A [`Driver`] opens handles by list index
//! or serial number.
//!
//! The session never calls a transport concurrently: every call, from the
//! foreground or from the background poller, goes through one lock.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use crate::error::{Error, Result};
use crate::types::{
    BitMode, DataBits, DeviceIdentity, FlowControl, Parity, PurgeMask, QueueStatus, StopBits,
};

/// An opened device handle.
///
/// All methods are synchronous and expected to complete within the driver's
/// own timeouts. Failures are reported as [`Error::Driver`] (or the USB
/// variants for the `nusb` backend).
pub trait Transport: Send {
    /// Release the handle. Further calls fail.
    fn close(&mut self) -> Result<()>;

    /// Whether the handle is still open.
    fn is_open(&self) -> bool;

    /// Write bytes to the device. Returns the number of bytes accepted.
    fn write(&mut self, data: &[u8]) -> Result<usize>;

    /// Read up to `buf.len()` bytes. Returns the number of bytes read, which
    /// may be zero.
    fn read(&mut self, buf: &mut [u8]) -> Result<usize>;

    /// Query the receive/transmit queue depths.
    fn queue_status(&mut self) -> Result<QueueStatus>;

    /// Clear the driver buffers selected by `mask`.
    fn purge(&mut self, mask: PurgeMask) -> Result<()>;

    /// Reset the device port.
    fn reset_device(&mut self) -> Result<()>;

    /// Select an operating mode. `mask` selects output pins (bit = 1).
    fn set_bit_mode(&mut self, mask: u8, mode: BitMode) -> Result<()>;

    /// Read the instantaneous pin byte reported by the driver.
    fn get_bit_mode(&mut self) -> Result<u8>;

    /// Set the latency timer in milliseconds.
    fn set_latency_timer(&mut self, latency_ms: u8) -> Result<()>;

    /// Set the baud rate.
    fn set_baud_rate(&mut self, baud_rate: u32) -> Result<()>;

    /// Set word length, stop bits and parity.
    fn set_data_characteristics(
        &mut self,
        data_bits: DataBits,
        stop_bits: StopBits,
        parity: Parity,
    ) -> Result<()>;

    /// Set the flow control mode.
    fn set_flow_control(&mut self, flow: FlowControl) -> Result<()>;

    /// Set the USB transfer sizes.
    fn set_usb_parameters(&mut self, in_size: u32, out_size: u32) -> Result<()>;

    /// Set the read and write timeouts.
    fn set_timeouts(&mut self, read: Duration, write: Duration) -> Result<()>;
}

impl<T: Transport + ?Sized> Transport for Box<T> {
    fn close(&mut self) -> Result<()> {
        (**self).close()
    }

    fn is_open(&self) -> bool {
        (**self).is_open()
    }

    fn write(&mut self, data: &[u8]) -> Result<usize> {
        (**self).write(data)
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        (**self).read(buf)
    }

    fn queue_status(&mut self) -> Result<QueueStatus> {
        (**self).queue_status()
    }

    fn purge(&mut self, mask: PurgeMask) -> Result<()> {
        (**self).purge(mask)
    }

    fn reset_device(&mut self) -> Result<()> {
        (**self).reset_device()
    }

    fn set_bit_mode(&mut self, mask: u8, mode: BitMode) -> Result<()> {
        (**self).set_bit_mode(mask, mode)
    }

    fn get_bit_mode(&mut self) -> Result<u8> {
        (**self).get_bit_mode()
    }

    fn set_latency_timer(&mut self, latency_ms: u8) -> Result<()> {
        (**self).set_latency_timer(latency_ms)
    }

    fn set_baud_rate(&mut self, baud_rate: u32) -> Result<()> {
        (**self).set_baud_rate(baud_rate)
    }

    fn set_data_characteristics(
        &mut self,
        data_bits: DataBits,
        stop_bits: StopBits,
        parity: Parity,
    ) -> Result<()> {
        (**self).set_data_characteristics(data_bits, stop_bits, parity)
    }

    fn set_flow_control(&mut self, flow: FlowControl) -> Result<()> {
        (**self).set_flow_control(flow)
    }

    fn set_usb_parameters(&mut self, in_size: u32, out_size: u32) -> Result<()> {
        (**self).set_usb_parameters(in_size, out_size)
    }

    fn set_timeouts(&mut self, read: Duration, write: Duration) -> Result<()> {
        (**self).set_timeouts(read, write)
    }
}

/// Opens device handles.
pub trait Driver {
    /// The handle type produced by this driver.
    type Transport: Transport + 'static;

    /// Open the device at `index` in the driver's device list.
    fn open_by_index(&self, index: u32) -> Result<(Self::Transport, DeviceIdentity)>;

    /// Open the device with the given serial number.
    fn open_by_serial(&self, serial: &str) -> Result<(Self::Transport, DeviceIdentity)>;
}

/// A transport behind the single lock that serializes all driver calls.
#[derive(Clone)]
pub(crate) struct SharedTransport {
    inner: Arc<Mutex<Box<dyn Transport>>>,
}

impl SharedTransport {
    pub(crate) fn new(transport: Box<dyn Transport>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(transport)),
        }
    }

    /// Acquire the handle. A poisoned lock is recovered: the handle itself
    /// holds no invariants a panicking caller could have broken.
    pub(crate) fn lock(&self) -> MutexGuard<'_, Box<dyn Transport>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Run `f` against the handle on tokio's blocking pool.
    pub(crate) async fn with_blocking<T, F>(&self, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut dyn Transport) -> T + Send + 'static,
    {
        let shared = self.clone();
        tokio::task::spawn_blocking(move || {
            let mut guard = shared.lock();
            f(guard.as_mut())
        })
        .await
        .map_err(|e| Error::Task(e.to_string()))
    }
}

impl std::fmt::Debug for SharedTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SharedTransport").finish_non_exhaustive()
    }
}
