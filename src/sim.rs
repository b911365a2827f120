//! In-memory simulated device.
//!
//! [`SimulatedDevice`] implements [`Transport`] without hardware, for tests
//! and for exercising session logic on a desk. A cloneable [`SimHandle`]
//! shares the device state so a test can feed receive data, inspect writes
//! and inject driver failures while a session owns the transport.
//!
//! Behavior:
//!
//! - Bytes pushed with [`SimHandle::push_rx`] are pending immediately.
//!   Batches pushed with [`SimHandle::push_in_flight`] are still "on the
//!   wire": one batch lands in the receive queue per queue-status query, and
//!   a purge does not discard them.
//! - In MPSSE and MCU host bus modes every opcode `>= 0x80` outside the
//!   defined range is answered with the bad-command echo `0xFA, opcode`.
//!   A custom responder replaces this behavior.
//! - In bit-bang modes the pins latch the first byte of each write.
//! - Device reset clears the queues but keeps the bit mode.
//! - [`SimHandle::set_call_latency`] makes every call take that long, as a
//!   slow USB round trip would.
//!
//! ```
//! use ftdi_session::sim::SimulatedDevice;
//! use ftdi_session::Transport;
//!
//! let mut dev = SimulatedDevice::new();
//! let handle = dev.handle();
//! handle.push_rx(b"hi");
//! assert_eq!(dev.queue_status()?.rx_pending, 2);
//! # Ok::<(), ftdi_session::Error>(())
//! ```

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use crate::constants::mpsse;
use crate::error::{DriverStatus, Error, Result};
use crate::transport::{Driver, Transport};
use crate::types::{
    BitMode, DataBits, DeviceIdentity, FlowControl, Parity, PurgeMask, QueueStatus, StopBits,
};

/// Transport operations, for the call log and fault injection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SimOp {
    Close,
    Write,
    Read,
    QueueStatus,
    Purge,
    ResetDevice,
    SetBitMode,
    GetBitMode,
    SetLatencyTimer,
    SetBaudRate,
    SetDataCharacteristics,
    SetFlowControl,
    SetUsbParameters,
    SetTimeouts,
}

type Responder = Box<dyn FnMut(&[u8]) -> Vec<u8> + Send>;

/// Line and driver settings last applied to the simulated device.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SimSettings {
    pub baud_rate: Option<u32>,
    pub data_characteristics: Option<(DataBits, StopBits, Parity)>,
    pub flow_control: Option<FlowControl>,
    pub latency_timer: Option<u8>,
    pub usb_parameters: Option<(u32, u32)>,
    pub timeouts: Option<(Duration, Duration)>,
}

struct SimState {
    open: bool,
    rx: VecDeque<u8>,
    in_flight: VecDeque<Vec<u8>>,
    writes: Vec<Vec<u8>>,
    calls: Vec<SimOp>,
    faults: Vec<(SimOp, DriverStatus)>,
    bit_mode: BitMode,
    pin_mask: u8,
    pins: u8,
    write_limit: Option<usize>,
    stalled_reads: usize,
    call_latency: Duration,
    responder: Option<Responder>,
    settings: SimSettings,
}

impl Default for SimState {
    fn default() -> Self {
        Self {
            open: true,
            rx: VecDeque::new(),
            in_flight: VecDeque::new(),
            writes: Vec::new(),
            calls: Vec::new(),
            faults: Vec::new(),
            bit_mode: BitMode::Reset,
            pin_mask: 0,
            pins: 0,
            write_limit: None,
            stalled_reads: 0,
            call_latency: Duration::ZERO,
            responder: None,
            settings: SimSettings::default(),
        }
    }
}

impl SimState {
    /// Log the call and fail if it is closed or has a fault queued.
    fn enter(&mut self, op: SimOp) -> Result<()> {
        self.calls.push(op);
        if let Some(pos) = self.faults.iter().position(|(f, _)| *f == op) {
            let (_, status) = self.faults.remove(pos);
            return Err(Error::Driver(status));
        }
        if !self.open {
            return Err(Error::Driver(DriverStatus::InvalidHandle));
        }
        Ok(())
    }

    fn respond(&mut self, data: &[u8]) {
        if let Some(responder) = self.responder.as_mut() {
            let reply = responder(data);
            self.rx.extend(reply);
            return;
        }
        if self.bit_mode.is_command_processor() {
            for &op in data.iter().filter(|&&b| is_undefined_opcode(b)) {
                self.rx.extend([mpsse::BAD_COMMAND, op]);
            }
        }
    }
}

/// Opcodes from 0x80 upward that the command processor rejects.
fn is_undefined_opcode(byte: u8) -> bool {
    byte > 0x9E
}

/// Shared view of a simulated device's state.
#[derive(Clone)]
pub struct SimHandle {
    state: Arc<Mutex<SimState>>,
}

impl SimHandle {
    fn lock(&self) -> MutexGuard<'_, SimState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Make bytes pending in the receive queue.
    pub fn push_rx(&self, bytes: &[u8]) {
        self.lock().rx.extend(bytes.iter().copied());
    }

    /// Queue a batch that lands on a later queue-status query.
    pub fn push_in_flight(&self, batch: Vec<u8>) {
        self.lock().in_flight.push_back(batch);
    }

    /// Bytes currently pending in the receive queue.
    pub fn rx_pending(&self) -> usize {
        self.lock().rx.len()
    }

    /// Every write accepted so far, in order.
    pub fn writes(&self) -> Vec<Vec<u8>> {
        self.lock().writes.clone()
    }

    /// Every transport call made so far, in order.
    pub fn calls(&self) -> Vec<SimOp> {
        self.lock().calls.clone()
    }

    /// Forget the call and write logs.
    pub fn clear_log(&self) {
        let mut state = self.lock();
        state.calls.clear();
        state.writes.clear();
    }

    /// Make the next call of `op` fail with `status`.
    pub fn fail_next(&self, op: SimOp, status: DriverStatus) {
        self.lock().faults.push((op, status));
    }

    /// Accept at most `limit` bytes per write.
    pub fn limit_writes(&self, limit: usize) {
        self.lock().write_limit = Some(limit);
    }

    /// Make the next `count` reads return zero bytes even with data pending.
    pub fn stall_reads(&self, count: usize) {
        self.lock().stalled_reads = count;
    }

    /// Delay every later transport call by `latency`.
    pub fn set_call_latency(&self, latency: Duration) {
        self.lock().call_latency = latency;
    }

    /// Replace the default reply behavior: the bytes returned by `responder`
    /// are queued after every write.
    pub fn set_responder<F>(&self, responder: F)
    where
        F: FnMut(&[u8]) -> Vec<u8> + Send + 'static,
    {
        self.lock().responder = Some(Box::new(responder));
    }

    /// The bit mode the device is actually in.
    pub fn bit_mode(&self) -> BitMode {
        self.lock().bit_mode
    }

    /// Force the device mode, as another process would.
    pub fn force_bit_mode(&self, mode: BitMode) {
        self.lock().bit_mode = mode;
    }

    /// Current pin byte.
    pub fn pins(&self) -> u8 {
        self.lock().pins
    }

    /// Whether the device is open.
    pub fn is_open(&self) -> bool {
        self.lock().open
    }

    /// Settings applied so far.
    pub fn settings(&self) -> SimSettings {
        self.lock().settings.clone()
    }
}

impl std::fmt::Debug for SimHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.lock();
        f.debug_struct("SimHandle")
            .field("open", &state.open)
            .field("bit_mode", &state.bit_mode)
            .field("rx_pending", &state.rx.len())
            .finish_non_exhaustive()
    }
}

/// A simulated device handle.
#[derive(Debug)]
pub struct SimulatedDevice {
    handle: SimHandle,
}

impl SimulatedDevice {
    /// Create an open device with empty queues in reset mode.
    pub fn new() -> Self {
        Self {
            handle: SimHandle {
                state: Arc::new(Mutex::new(SimState::default())),
            },
        }
    }

    /// A handle sharing this device's state.
    pub fn handle(&self) -> SimHandle {
        self.handle.clone()
    }

    fn state(&self) -> MutexGuard<'_, SimState> {
        let latency = self.handle.lock().call_latency;
        if !latency.is_zero() {
            std::thread::sleep(latency);
        }
        self.handle.lock()
    }
}

impl Default for SimulatedDevice {
    fn default() -> Self {
        Self::new()
    }
}

impl Transport for SimulatedDevice {
    fn close(&mut self) -> Result<()> {
        let mut state = self.state();
        state.enter(SimOp::Close)?;
        state.open = false;
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.state().open
    }

    fn write(&mut self, data: &[u8]) -> Result<usize> {
        let mut state = self.state();
        state.enter(SimOp::Write)?;
        let accepted = state.write_limit.map_or(data.len(), |l| l.min(data.len()));
        let data = &data[..accepted];
        state.writes.push(data.to_vec());
        if state.bit_mode.is_bit_bang() {
            if let Some(&first) = data.first() {
                let mask = state.pin_mask;
                state.pins = (first & mask) | (state.pins & !mask);
            }
        }
        state.respond(data);
        Ok(accepted)
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        let mut state = self.state();
        state.enter(SimOp::Read)?;
        if state.stalled_reads > 0 {
            state.stalled_reads -= 1;
            return Ok(0);
        }
        let n = buf.len().min(state.rx.len());
        for (dst, src) in buf.iter_mut().zip(state.rx.drain(..n)) {
            *dst = src;
        }
        Ok(n)
    }

    fn queue_status(&mut self) -> Result<QueueStatus> {
        let mut state = self.state();
        state.enter(SimOp::QueueStatus)?;
        if let Some(batch) = state.in_flight.pop_front() {
            state.rx.extend(batch);
        }
        Ok(QueueStatus {
            rx_pending: state.rx.len(),
            tx_pending: 0,
            event_mask: 0,
        })
    }

    fn purge(&mut self, mask: PurgeMask) -> Result<()> {
        let mut state = self.state();
        state.enter(SimOp::Purge)?;
        if mask.includes_rx() {
            state.rx.clear();
        }
        Ok(())
    }

    fn reset_device(&mut self) -> Result<()> {
        let mut state = self.state();
        state.enter(SimOp::ResetDevice)?;
        state.rx.clear();
        Ok(())
    }

    fn set_bit_mode(&mut self, mask: u8, mode: BitMode) -> Result<()> {
        let mut state = self.state();
        state.enter(SimOp::SetBitMode)?;
        state.bit_mode = mode;
        state.pin_mask = mask;
        Ok(())
    }

    fn get_bit_mode(&mut self) -> Result<u8> {
        let mut state = self.state();
        state.enter(SimOp::GetBitMode)?;
        Ok(state.pins)
    }

    fn set_latency_timer(&mut self, latency_ms: u8) -> Result<()> {
        let mut state = self.state();
        state.enter(SimOp::SetLatencyTimer)?;
        if latency_ms == 0 {
            return Err(Error::Driver(DriverStatus::InvalidParameter));
        }
        state.settings.latency_timer = Some(latency_ms);
        Ok(())
    }

    fn set_baud_rate(&mut self, baud_rate: u32) -> Result<()> {
        let mut state = self.state();
        state.enter(SimOp::SetBaudRate)?;
        if baud_rate == 0 {
            return Err(Error::Driver(DriverStatus::InvalidBaudRate));
        }
        state.settings.baud_rate = Some(baud_rate);
        Ok(())
    }

    fn set_data_characteristics(
        &mut self,
        data_bits: DataBits,
        stop_bits: StopBits,
        parity: Parity,
    ) -> Result<()> {
        let mut state = self.state();
        state.enter(SimOp::SetDataCharacteristics)?;
        state.settings.data_characteristics = Some((data_bits, stop_bits, parity));
        Ok(())
    }

    fn set_flow_control(&mut self, flow: FlowControl) -> Result<()> {
        let mut state = self.state();
        state.enter(SimOp::SetFlowControl)?;
        state.settings.flow_control = Some(flow);
        Ok(())
    }

    fn set_usb_parameters(&mut self, in_size: u32, out_size: u32) -> Result<()> {
        let mut state = self.state();
        state.enter(SimOp::SetUsbParameters)?;
        state.settings.usb_parameters = Some((in_size, out_size));
        Ok(())
    }

    fn set_timeouts(&mut self, read: Duration, write: Duration) -> Result<()> {
        let mut state = self.state();
        state.enter(SimOp::SetTimeouts)?;
        state.settings.timeouts = Some((read, write));
        Ok(())
    }
}

/// A driver over a fixed list of simulated devices.
#[derive(Debug, Default)]
pub struct SimDriver {
    devices: Vec<(DeviceIdentity, SimHandle)>,
}

impl SimDriver {
    /// Create a driver with no devices.
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach a closed device and return its handle.
    pub fn add_device(&mut self, serial: &str, description: &str) -> SimHandle {
        let device = SimulatedDevice::new();
        let handle = device.handle();
        handle.lock().open = false;
        let identity = DeviceIdentity {
            index: self.devices.len() as u32,
            serial_number: serial.to_string(),
            description: description.to_string(),
        };
        self.devices.push((identity, handle.clone()));
        handle
    }

    fn open_entry(
        &self,
        entry: Option<&(DeviceIdentity, SimHandle)>,
    ) -> Result<(SimulatedDevice, DeviceIdentity)> {
        let (identity, handle) = entry.ok_or(Error::Driver(DriverStatus::DeviceNotFound))?;
        let mut state = handle.lock();
        if state.open {
            return Err(Error::Driver(DriverStatus::DeviceNotOpened));
        }
        state.open = true;
        drop(state);
        Ok((
            SimulatedDevice {
                handle: handle.clone(),
            },
            identity.clone(),
        ))
    }
}

impl Driver for SimDriver {
    type Transport = SimulatedDevice;

    fn open_by_index(&self, index: u32) -> Result<(SimulatedDevice, DeviceIdentity)> {
        self.open_entry(self.devices.get(index as usize))
    }

    fn open_by_serial(&self, serial: &str) -> Result<(SimulatedDevice, DeviceIdentity)> {
        self.open_entry(self.devices.iter().find(|(id, _)| id.serial_number == serial))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reads_drain_in_order() {
        let mut dev = SimulatedDevice::new();
        dev.handle().push_rx(&[1, 2, 3, 4, 5]);
        let mut buf = [0u8; 3];
        assert_eq!(dev.read(&mut buf).unwrap(), 3);
        assert_eq!(buf, [1, 2, 3]);
        assert_eq!(dev.read(&mut buf).unwrap(), 2);
        assert_eq!(&buf[..2], &[4, 5]);
        assert_eq!(dev.read(&mut buf).unwrap(), 0);
    }

    #[test]
    fn in_flight_batches_land_one_per_status_query() {
        let mut dev = SimulatedDevice::new();
        let handle = dev.handle();
        handle.push_in_flight(vec![1; 4]);
        handle.push_in_flight(vec![2; 4]);
        dev.purge(PurgeMask::RxTx).unwrap();
        assert_eq!(dev.queue_status().unwrap().rx_pending, 4);
        assert_eq!(dev.queue_status().unwrap().rx_pending, 8);
        assert_eq!(dev.queue_status().unwrap().rx_pending, 8);
    }

    #[test]
    fn mpsse_echoes_undefined_opcodes() {
        let mut dev = SimulatedDevice::new();
        dev.set_bit_mode(0, BitMode::Mpsse).unwrap();
        dev.write(&[mpsse::LOOPBACK_START]).unwrap();
        assert_eq!(dev.handle().rx_pending(), 0);
        dev.write(&[mpsse::BOGUS_OPCODE]).unwrap();
        let mut buf = [0u8; 4];
        assert_eq!(dev.read(&mut buf).unwrap(), 2);
        assert_eq!(&buf[..2], &[0xFA, 0xAA]);
    }

    #[test]
    fn serial_mode_does_not_echo() {
        let mut dev = SimulatedDevice::new();
        dev.write(&[mpsse::BOGUS_OPCODE]).unwrap();
        assert_eq!(dev.handle().rx_pending(), 0);
    }

    #[test]
    fn faults_are_one_shot() {
        let mut dev = SimulatedDevice::new();
        dev.handle().fail_next(SimOp::QueueStatus, DriverStatus::IoError);
        let err = dev.queue_status().unwrap_err();
        assert_eq!(err.driver_status(), Some(DriverStatus::IoError));
        assert!(dev.queue_status().is_ok());
    }

    #[test]
    fn closed_device_rejects_calls() {
        let mut dev = SimulatedDevice::new();
        dev.close().unwrap();
        assert!(!dev.is_open());
        let err = dev.write(&[0]).unwrap_err();
        assert_eq!(err.driver_status(), Some(DriverStatus::InvalidHandle));
    }

    #[test]
    fn bit_bang_pins_follow_mask() {
        let mut dev = SimulatedDevice::new();
        dev.set_bit_mode(0x0F, BitMode::SyncBitBang).unwrap();
        dev.write(&[0xFF, 0, 0, 0, 0]).unwrap();
        assert_eq!(dev.get_bit_mode().unwrap(), 0x0F);
    }

    #[test]
    fn driver_opens_by_index_and_serial() {
        let mut driver = SimDriver::new();
        driver.add_device("A1", "first");
        let second = driver.add_device("B2", "second");

        let (_dev, id) = driver.open_by_serial("B2").unwrap();
        assert_eq!(id.index, 1);
        assert_eq!(id.description, "second");
        assert!(second.is_open());

        let err = driver.open_by_index(1).unwrap_err();
        assert_eq!(err.driver_status(), Some(DriverStatus::DeviceNotOpened));

        let err = driver.open_by_index(7).unwrap_err();
        assert_eq!(err.driver_status(), Some(DriverStatus::DeviceNotFound));

        assert!(driver.open_by_index(0).is_ok());
    }
}
