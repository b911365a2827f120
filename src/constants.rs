//! Protocol constants.
//!
//! MPSSE opcodes and frame sizes used by the session core, and the SIO
//! vendor request codes used by the USB transport.

/// Default FTDI vendor ID.
pub const FTDI_VID: u16 = 0x0403;

/// Known FTDI product IDs.
pub mod pid {
    /// FT232AM, FT232BM, FT232R.
    pub const FT232: u16 = 0x6001;
    /// FT2232C/D/H.
    pub const FT2232: u16 = 0x6010;
    /// FT4232H.
    pub const FT4232: u16 = 0x6011;
    /// FT232H.
    pub const FT232H: u16 = 0x6014;
    /// FT230X.
    pub const FT230X: u16 = 0x6015;
}

/// MPSSE opcodes used by the session.
pub mod mpsse {
    /// Connect TDI/DO to TDO/DI internally.
    pub const LOOPBACK_START: u8 = 0x84;
    /// Send immediate: flush the chip's buffer back to the host.
    pub const SEND_IMMEDIATE: u8 = 0x87;
    /// First byte the chip echoes after an unrecognized opcode.
    pub const BAD_COMMAND: u8 = 0xFA;
    /// Opcode that is never defined; used to provoke the bad-command echo.
    pub const BOGUS_OPCODE: u8 = 0xAA;
}

/// Length of the GPIO and flush command frames.
pub const COMMAND_FRAME_LEN: usize = 5;

/// Maximum bytes read back during the MPSSE self-test.
pub const SELF_TEST_READ_MAX: usize = 100;

/// Chunk size used when draining the receive queue during a hard purge.
pub const DRAIN_CHUNK_SIZE: usize = 4096;

/// Build a command frame: `first` followed by zero padding.
pub(crate) fn command_frame(first: u8) -> [u8; COMMAND_FRAME_LEN] {
    let mut frame = [0u8; COMMAND_FRAME_LEN];
    frame[0] = first;
    frame
}

// ---- SIO vendor request codes ----

#[cfg(feature = "usb")]
pub(crate) mod sio {
    /// Reset the port.
    pub const RESET_REQUEST: u8 = 0x00;
    /// Set flow control register.
    pub const SET_FLOW_CTRL_REQUEST: u8 = 0x02;
    /// Set baud rate.
    pub const SET_BAUDRATE_REQUEST: u8 = 0x03;
    /// Set data characteristics (bits, parity, stop).
    pub const SET_DATA_REQUEST: u8 = 0x04;
    /// Set latency timer.
    pub const SET_LATENCY_TIMER_REQUEST: u8 = 0x09;
    /// Set bitbang mode.
    pub const SET_BITMODE_REQUEST: u8 = 0x0B;
    /// Read pin states directly.
    pub const READ_PINS_REQUEST: u8 = 0x0C;

    /// Device reset.
    pub const RESET_SIO: u16 = 0;
    /// Flush the chip's RX FIFO (chip -> host).
    pub const TCIFLUSH: u16 = 2;
    /// Flush the chip's TX FIFO (host -> chip).
    pub const TCOFLUSH: u16 = 1;

    /// Disable flow control.
    pub const DISABLE_FLOW_CTRL: u16 = 0x0;
    /// RTS/CTS hardware flow control.
    pub const RTS_CTS_HS: u16 = 0x1 << 8;
    /// DTR/DSR hardware flow control.
    pub const DTR_DSR_HS: u16 = 0x2 << 8;
    /// XON/XOFF software flow control.
    pub const XON_XOFF_HS: u16 = 0x4 << 8;

    /// H-type clock: 120 MHz.
    pub const H_CLK: u32 = 120_000_000;
    /// Standard clock: 48 MHz.
    pub const C_CLK: u32 = 48_000_000;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn command_frame_pads_with_zeros() {
        assert_eq!(command_frame(0x7B), [0x7B, 0, 0, 0, 0]);
        assert_eq!(command_frame(mpsse::SEND_IMMEDIATE), [0x87, 0, 0, 0, 0]);
    }

    #[test]
    fn self_test_opcodes() {
        assert_eq!(mpsse::LOOPBACK_START, 0x84);
        assert_eq!(mpsse::BAD_COMMAND, 0xFA);
        assert_eq!(mpsse::BOGUS_OPCODE, 0xAA);
    }
}
