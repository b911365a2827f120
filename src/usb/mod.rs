//! USB backend built on [nusb](https://crates.io/crates/nusb).
//!
//! [`UsbDriver`] enumerates FTDI devices and opens one port of a device as a
//! [`UsbTransport`]. No C library or `libftd2xx` is needed.
//!
//! ```no_run
//! use ftdi_session::usb::{Port, UsbDriver};
//! use ftdi_session::{Session, SessionConfig};
//!
//! let driver = UsbDriver::new().port(Port::B);
//! let session = Session::open_by_serial(&driver, "FT4ABCDE", SessionConfig::default())?;
//! println!("{}", session.description());
//! # Ok::<(), ftdi_session::Error>(())
//! ```

mod baudrate;
mod device;

use nusb::{DeviceInfo, MaybeFuture};

use crate::constants::{pid, FTDI_VID};
use crate::error::{Error, Result};
use crate::transport::Driver;
use crate::types::DeviceIdentity;

pub use device::UsbTransport;

/// Product IDs matched when no explicit product ID is given.
const KNOWN_PIDS: [u16; 5] = [pid::FT232, pid::FT2232, pid::FT4232, pid::FT232H, pid::FT230X];

/// Port of a multi-port chip. Single-port chips only have [`Port::A`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Port {
    /// First port, interface 0.
    #[default]
    A,
    /// Second port (FT2232, FT4232H).
    B,
    /// Third port (FT4232H).
    C,
    /// Fourth port (FT4232H).
    D,
}

impl Port {
    fn ordinal(self) -> u8 {
        match self {
            Self::A => 0,
            Self::B => 1,
            Self::C => 2,
            Self::D => 3,
        }
    }

    /// USB interface number.
    pub fn interface_number(self) -> u8 {
        self.ordinal()
    }

    /// `wIndex` that addresses this port in SIO requests.
    pub(crate) fn sio_index(self) -> u16 {
        self.ordinal() as u16 + 1
    }

    /// Bulk OUT endpoint address.
    pub(crate) fn write_endpoint(self) -> u8 {
        0x02 + 2 * self.ordinal()
    }

    /// Bulk IN endpoint address.
    pub(crate) fn read_endpoint(self) -> u8 {
        0x81 + 2 * self.ordinal()
    }
}

/// Opens FTDI devices attached over USB.
///
/// Devices are indexed in enumeration order among those matching the vendor
/// and product filter.
#[derive(Debug, Clone, Copy)]
pub struct UsbDriver {
    vendor_id: u16,
    product_id: Option<u16>,
    port: Port,
}

impl Default for UsbDriver {
    fn default() -> Self {
        Self::new()
    }
}

impl UsbDriver {
    /// Match any known FTDI product, port A.
    pub fn new() -> Self {
        Self {
            vendor_id: FTDI_VID,
            product_id: None,
            port: Port::A,
        }
    }

    /// Match exactly this vendor and product ID.
    pub fn with_ids(vendor_id: u16, product_id: u16) -> Self {
        Self {
            vendor_id,
            product_id: Some(product_id),
            port: Port::A,
        }
    }

    /// Select the port to claim.
    pub fn port(mut self, port: Port) -> Self {
        self.port = port;
        self
    }

    fn matches(&self, info: &DeviceInfo) -> bool {
        info.vendor_id() == self.vendor_id
            && match self.product_id {
                Some(pid) => info.product_id() == pid,
                None => KNOWN_PIDS.contains(&info.product_id()),
            }
    }

    /// Identities of all matching devices, in index order.
    pub fn list(&self) -> Result<Vec<DeviceIdentity>> {
        Ok(nusb::list_devices()
            .wait()?
            .filter(|d| self.matches(d))
            .enumerate()
            .map(|(i, d)| identity(i, &d))
            .collect())
    }

    fn open_where(
        &self,
        pred: impl Fn(usize, &DeviceInfo) -> bool,
    ) -> Result<(UsbTransport, DeviceIdentity)> {
        let (index, info) = nusb::list_devices()
            .wait()?
            .filter(|d| self.matches(d))
            .enumerate()
            .find(|(i, d)| pred(*i, d))
            .ok_or(Error::DeviceNotFound)?;
        let transport = UsbTransport::open(&info, self.port)?;
        Ok((transport, identity(index, &info)))
    }
}

fn identity(index: usize, info: &DeviceInfo) -> DeviceIdentity {
    DeviceIdentity {
        index: index as u32,
        serial_number: info.serial_number().unwrap_or_default().to_string(),
        description: info.product_string().unwrap_or_default().to_string(),
    }
}

impl Driver for UsbDriver {
    type Transport = UsbTransport;

    fn open_by_index(&self, index: u32) -> Result<(UsbTransport, DeviceIdentity)> {
        self.open_where(|i, _| i == index as usize)
    }

    fn open_by_serial(&self, serial: &str) -> Result<(UsbTransport, DeviceIdentity)> {
        self.open_where(|_, d| d.serial_number() == Some(serial))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn port_endpoints() {
        assert_eq!(
            (Port::A.sio_index(), Port::A.write_endpoint(), Port::A.read_endpoint()),
            (1, 0x02, 0x81)
        );
        assert_eq!(
            (Port::B.sio_index(), Port::B.write_endpoint(), Port::B.read_endpoint()),
            (2, 0x04, 0x83)
        );
        assert_eq!(
            (Port::D.interface_number(), Port::D.write_endpoint(), Port::D.read_endpoint()),
            (3, 0x08, 0x87)
        );
    }

    #[test]
    fn driver_builder() {
        let driver = UsbDriver::with_ids(FTDI_VID, pid::FT232H).port(Port::B);
        assert_eq!(driver.product_id, Some(pid::FT232H));
        assert_eq!(driver.port, Port::B);
        assert_eq!(UsbDriver::default().product_id, None);
    }
}
