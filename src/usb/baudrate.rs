//! Baud rate divisor encoding for the SIO set-baud-rate request.
//!
//! The chips divide a base clock by a fixed predivisor and then by a
//! divisor with three fractional bits. BM-class chips use 48 MHz / 16;
//! H-type chips can also use 120 MHz / 10 for rates above ~7.3 kBd.

use crate::constants::sio::{C_CLK, H_CLK};
use crate::error::{Error, Result};
use crate::types::ChipType;

/// Maps the three fractional divisor bits to the chip's encoding.
const FRAC_CODE: [u32; 8] = [0, 3, 2, 4, 1, 5, 6, 7];

/// Largest divisor, in eighths.
const MAX_DIVISOR: u32 = 0x1FFFF;

/// Encoded divisor for one baud rate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Divisor {
    /// The rate the chip will actually run at.
    pub actual: u32,
    /// `wValue` of the control request.
    pub value: u16,
    /// `wIndex` of the control request.
    pub index: u16,
}

/// Nearest achievable rate and its encoded divisor.
fn nearest(baud: u32, clk: u32, prediv: u32) -> (u32, u32) {
    // Divisors 1, 1.5 and 2 have dedicated codes.
    for (half_steps, code) in [(2, 0), (3, 1), (4, 2)] {
        let rate = clk * 2 / (prediv * half_steps);
        if baud >= rate {
            return (rate, code);
        }
    }

    let sixteenths = clk * 16 / prediv / baud;
    let mut eighths = sixteenths.div_ceil(2);
    if eighths > MAX_DIVISOR + 1 {
        eighths = MAX_DIVISOR;
    }
    let actual = (clk * 16 / prediv / eighths).div_ceil(2);
    let encoded = (eighths >> 3) | (FRAC_CODE[(eighths & 7) as usize] << 14);
    (actual, encoded)
}

/// Whether `actual` is within 5% of `requested`.
fn within_tolerance(requested: u32, actual: u32) -> bool {
    let (lo, hi) = if actual < requested {
        (actual as u64, requested as u64)
    } else {
        (requested as u64, actual as u64)
    };
    lo * 21 >= hi * 20
}

/// Encode `baud` for `chip` on the port with SIO index `usb_index`.
pub(crate) fn encode(baud: u32, chip: ChipType, usb_index: u16) -> Result<Divisor> {
    if baud == 0 {
        return Err(Error::InvalidArgument("baud rate must be > 0"));
    }

    let (actual, encoded) = match chip {
        ChipType::Am => return Err(Error::UnsupportedChip(chip)),
        _ if chip.is_h_type() && baud as u64 * 10 > (H_CLK / 0x3FFF) as u64 => {
            let (actual, encoded) = nearest(baud, H_CLK, 10);
            (actual, encoded | 0x20000)
        }
        _ => nearest(baud, C_CLK, 16),
    };

    if !within_tolerance(baud, actual) {
        return Err(Error::UnsupportedBaudRate {
            requested: baud,
            actual,
        });
    }

    let index = if chip.is_h_type() {
        ((encoded >> 8) as u16 & 0xFF00) | usb_index
    } else {
        (encoded >> 16) as u16
    };
    Ok(Divisor {
        actual,
        value: encoded as u16,
        index,
    })
}
