//! [`Transport`] over a claimed USB interface.
//!
//! Speaks the SIO vendor protocol with control requests and moves data over
//! the port's bulk endpoints. The chip prefixes every max-packet-size chunk
//! of bulk IN data with two modem status bytes; those are stripped and the
//! payload is kept in a receive queue.
//!
//! The chip has no request for its receive queue depth, so
//! [`queue_status`](Transport::queue_status) reports what is already
//! buffered, or else makes one short bulk read to see whether anything
//! arrived.

use std::collections::VecDeque;
use std::time::Duration;

use nusb::transfer::{
    Buffer, Bulk, ControlIn, ControlOut, ControlType, In, Out, Recipient, TransferError,
};
use nusb::MaybeFuture;

use super::baudrate;
use super::Port;
use crate::constants::sio;
use crate::error::{DriverStatus, Error, Result};
use crate::transport::Transport;
use crate::types::{
    BitMode, ChipType, DataBits, FlowControl, Parity, PurgeMask, QueueStatus, StopBits,
};

/// Default read/write timeout until the session applies its own.
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

/// Default bulk transfer size.
const DEFAULT_TRANSFER_SIZE: usize = 4096;

/// How long a queue-status query waits for bulk IN data.
const STATUS_READ_TIMEOUT: Duration = Duration::from_millis(2);

/// Bytes of modem status at the start of every IN packet.
const MODEM_STATUS_LEN: usize = 2;

struct Claimed {
    #[allow(dead_code)] // keeps the device open
    device: nusb::Device,
    interface: nusb::Interface,
}

/// An open FTDI port.
pub struct UsbTransport {
    claimed: Option<Claimed>,
    chip: ChipType,
    port: Port,
    packet_size: usize,
    mode: BitMode,
    rx: VecDeque<u8>,
    read_size: usize,
    write_size: usize,
    read_timeout: Duration,
    write_timeout: Duration,
}

impl std::fmt::Debug for UsbTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UsbTransport")
            .field("chip", &self.chip)
            .field("port", &self.port)
            .field("open", &self.claimed.is_some())
            .field("packet_size", &self.packet_size)
            .field("rx_buffered", &self.rx.len())
            .finish_non_exhaustive()
    }
}

impl UsbTransport {
    /// Open and claim `port` of the device described by `info`.
    pub(crate) fn open(info: &nusb::DeviceInfo, port: Port) -> Result<Self> {
        let device = info.open().wait()?;
        let interface = device
            .detach_and_claim_interface(port.interface_number())
            .wait()?;

        let desc = device.device_descriptor();
        let chip = ChipType::from_release(
            desc.device_version(),
            desc.serial_number_string_index().is_some(),
        );
        let packet_size = if chip.is_h_type() { 512 } else { 64 };
        log::debug!("Claimed port {:?} of {:?} (packet size {})", port, chip, packet_size);

        let mut transport = Self {
            claimed: Some(Claimed { device, interface }),
            chip,
            port,
            packet_size,
            mode: BitMode::Reset,
            rx: VecDeque::new(),
            read_size: DEFAULT_TRANSFER_SIZE,
            write_size: DEFAULT_TRANSFER_SIZE,
            read_timeout: DEFAULT_TIMEOUT,
            write_timeout: DEFAULT_TIMEOUT,
        };
        transport.reset_device()?;
        Ok(transport)
    }

    /// The detected chip.
    pub fn chip_type(&self) -> ChipType {
        self.chip
    }

    /// The claimed port.
    pub fn port(&self) -> Port {
        self.port
    }

    fn interface(&self) -> Result<&nusb::Interface> {
        self.claimed
            .as_ref()
            .map(|c| &c.interface)
            .ok_or(Error::Driver(DriverStatus::InvalidHandle))
    }

    fn control_out(&self, request: u8, value: u16, index: u16) -> Result<()> {
        self.interface()?
            .control_out(
                ControlOut {
                    control_type: ControlType::Vendor,
                    recipient: Recipient::Device,
                    request,
                    value,
                    index,
                    data: &[],
                },
                self.write_timeout,
            )
            .wait()?;
        Ok(())
    }

    /// Control request addressed to this port.
    fn port_request(&self, request: u8, value: u16) -> Result<()> {
        self.control_out(request, value, self.port.sio_index())
    }

    /// One bulk IN transfer. Payload lands in the receive queue; a timeout
    /// counts as no data. Returns the number of payload bytes received.
    fn fill(&mut self, timeout: Duration) -> Result<usize> {
        let read_size = self.read_size;
        let packet_size = self.packet_size;
        let mut ep = self.interface()?.endpoint::<Bulk, In>(self.port.read_endpoint())?;

        let len = read_size.div_ceil(packet_size) * packet_size;
        let mut buf = Buffer::new(len);
        buf.set_requested_len(len);
        let raw = match ep.transfer_blocking(buf, timeout).into_result() {
            Ok(raw) => raw,
            Err(TransferError::Cancelled) => return Ok(0),
            Err(e) => return Err(e.into()),
        };

        let before = self.rx.len();
        for packet in raw.chunks(packet_size) {
            if let Some(payload) = packet.get(MODEM_STATUS_LEN..) {
                self.rx.extend(payload);
            }
        }
        Ok(self.rx.len() - before)
    }
}

impl Transport for UsbTransport {
    fn close(&mut self) -> Result<()> {
        if self.claimed.take().is_none() {
            return Err(Error::Driver(DriverStatus::InvalidHandle));
        }
        self.rx.clear();
        log::debug!("Released port {:?}", self.port);
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.claimed.is_some()
    }

    fn write(&mut self, data: &[u8]) -> Result<usize> {
        let mut ep = self.interface()?.endpoint::<Bulk, Out>(self.port.write_endpoint())?;
        let mut written = 0;
        for chunk in data.chunks(self.write_size.max(1)) {
            let mut buf = Buffer::new(chunk.len());
            buf.extend_from_slice(chunk);
            let completion = ep.transfer_blocking(buf, self.write_timeout);
            match completion.status {
                Ok(()) => written += completion.actual_len,
                // A timed-out write may have sent part of the chunk.
                Err(TransferError::Cancelled) => {
                    written += completion.actual_len;
                    break;
                }
                Err(e) => return Err(e.into()),
            }
            if completion.actual_len < chunk.len() {
                break;
            }
        }
        Ok(written)
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        if self.rx.is_empty() {
            self.fill(self.read_timeout)?;
        }
        let n = buf.len().min(self.rx.len());
        for (dst, src) in buf.iter_mut().zip(self.rx.drain(..n)) {
            *dst = src;
        }
        Ok(n)
    }

    fn queue_status(&mut self) -> Result<QueueStatus> {
        if self.rx.is_empty() {
            self.fill(STATUS_READ_TIMEOUT)?;
        }
        Ok(QueueStatus {
            rx_pending: self.rx.len(),
            tx_pending: 0,
            event_mask: 0,
        })
    }

    fn purge(&mut self, mask: PurgeMask) -> Result<()> {
        if mask.includes_rx() {
            self.port_request(sio::RESET_REQUEST, sio::TCIFLUSH)?;
            self.rx.clear();
        }
        if mask.includes_tx() {
            self.port_request(sio::RESET_REQUEST, sio::TCOFLUSH)?;
        }
        Ok(())
    }

    fn reset_device(&mut self) -> Result<()> {
        self.port_request(sio::RESET_REQUEST, sio::RESET_SIO)?;
        self.rx.clear();
        Ok(())
    }

    fn set_bit_mode(&mut self, mask: u8, mode: BitMode) -> Result<()> {
        let value = mask as u16 | (mode.wire_value() as u16) << 8;
        self.port_request(sio::SET_BITMODE_REQUEST, value)?;
        self.mode = mode;
        Ok(())
    }

    fn get_bit_mode(&mut self) -> Result<u8> {
        let data = self
            .interface()?
            .control_in(
                ControlIn {
                    control_type: ControlType::Vendor,
                    recipient: Recipient::Device,
                    request: sio::READ_PINS_REQUEST,
                    value: 0,
                    index: self.port.sio_index(),
                    length: 1,
                },
                self.read_timeout,
            )
            .wait()?;
        data.first()
            .copied()
            .ok_or(Error::Driver(DriverStatus::IoError))
    }

    fn set_latency_timer(&mut self, latency_ms: u8) -> Result<()> {
        if latency_ms == 0 {
            return Err(Error::Driver(DriverStatus::InvalidParameter));
        }
        self.port_request(sio::SET_LATENCY_TIMER_REQUEST, latency_ms as u16)
    }

    fn set_baud_rate(&mut self, baud_rate: u32) -> Result<()> {
        // The bit-bang clock runs at four times the baud rate.
        let effective = if self.mode == BitMode::Reset {
            baud_rate
        } else {
            baud_rate.saturating_mul(4)
        };
        let divisor = baudrate::encode(effective, self.chip, self.port.sio_index())?;
        log::debug!("Baud {} -> actual {}", effective, divisor.actual);
        self.control_out(sio::SET_BAUDRATE_REQUEST, divisor.value, divisor.index)
    }

    fn set_data_characteristics(
        &mut self,
        data_bits: DataBits,
        stop_bits: StopBits,
        parity: Parity,
    ) -> Result<()> {
        let value =
            data_bits.wire_value() | parity.wire_value() << 8 | stop_bits.wire_value() << 11;
        self.port_request(sio::SET_DATA_REQUEST, value)
    }

    fn set_flow_control(&mut self, flow: FlowControl) -> Result<()> {
        let (value, handshake) = match flow {
            FlowControl::Disabled => (0, sio::DISABLE_FLOW_CTRL),
            FlowControl::RtsCts => (0, sio::RTS_CTS_HS),
            FlowControl::DtrDsr => (0, sio::DTR_DSR_HS),
            FlowControl::XonXoff { xon, xoff } => {
                (xon as u16 | (xoff as u16) << 8, sio::XON_XOFF_HS)
            }
        };
        self.control_out(
            sio::SET_FLOW_CTRL_REQUEST,
            value,
            handshake | self.port.sio_index(),
        )
    }

    fn set_usb_parameters(&mut self, in_size: u32, out_size: u32) -> Result<()> {
        if in_size == 0 || out_size == 0 {
            return Err(Error::Driver(DriverStatus::InvalidParameter));
        }
        self.read_size = in_size as usize;
        self.write_size = out_size as usize;
        Ok(())
    }

    fn set_timeouts(&mut self, read: Duration, write: Duration) -> Result<()> {
        self.read_timeout = read;
        self.write_timeout = write;
        Ok(())
    }
}
