//! Type definitions shared by the session, the transports and the channels.
//!
//! These types model device operating modes, serial line properties, queue
//! status and device identity.

/// Device operating (bit) mode.
///
/// Each mode carries the one-byte code sent with the set-bit-mode request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum BitMode {
    /// Normal serial/FIFO mode (bitbang disabled).
    #[default]
    Reset,
    /// Asynchronous bitbang mode.
    AsyncBitBang,
    /// MPSSE command-processor mode.
    Mpsse,
    /// Synchronous bitbang mode.
    SyncBitBang,
    /// MCU host bus emulation mode.
    McuHostBusEmulation,
    /// Fast opto-isolated serial mode.
    FastOptoIsolatedSerial,
    /// CBUS bitbang mode (pins configured in EEPROM first).
    CbusBitBang,
    /// Single channel synchronous FIFO mode.
    SingleChannelSyncFifo,
}

impl BitMode {
    /// All modes, in wire-code order.
    pub const ALL: [BitMode; 8] = [
        Self::Reset,
        Self::AsyncBitBang,
        Self::Mpsse,
        Self::SyncBitBang,
        Self::McuHostBusEmulation,
        Self::FastOptoIsolatedSerial,
        Self::CbusBitBang,
        Self::SingleChannelSyncFifo,
    ];

    /// Wire value for the set-bit-mode request.
    pub fn wire_value(self) -> u8 {
        match self {
            Self::Reset => 0x00,
            Self::AsyncBitBang => 0x01,
            Self::Mpsse => 0x02,
            Self::SyncBitBang => 0x04,
            Self::McuHostBusEmulation => 0x08,
            Self::FastOptoIsolatedSerial => 0x10,
            Self::CbusBitBang => 0x20,
            Self::SingleChannelSyncFifo => 0x40,
        }
    }

    /// Decode a wire value.
    pub fn from_wire(value: u8) -> Option<Self> {
        Self::ALL.into_iter().find(|mode| mode.wire_value() == value)
    }

    /// Whether GPIO pins are directly driven in this mode.
    #[inline]
    pub fn is_bit_bang(self) -> bool {
        matches!(
            self,
            Self::AsyncBitBang | Self::SyncBitBang | Self::CbusBitBang
        )
    }

    /// Whether the chip runs its command processor and buffers responses
    /// until told to flush them.
    #[inline]
    pub fn is_command_processor(self) -> bool {
        matches!(self, Self::Mpsse | Self::McuHostBusEmulation)
    }
}

/// Which driver buffers a purge clears.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PurgeMask {
    /// Receive buffer (device to host).
    Rx,
    /// Transmit buffer (host to device).
    Tx,
    /// Both buffers.
    RxTx,
}

impl PurgeMask {
    /// D2XX-style bitmask (`FT_PURGE_RX = 1`, `FT_PURGE_TX = 2`).
    pub fn bits(self) -> u8 {
        match self {
            Self::Rx => 0x01,
            Self::Tx => 0x02,
            Self::RxTx => 0x03,
        }
    }

    /// Whether the receive side is included.
    pub fn includes_rx(self) -> bool {
        self.bits() & 0x01 != 0
    }

    /// Whether the transmit side is included.
    pub fn includes_tx(self) -> bool {
        self.bits() & 0x02 != 0
    }
}

/// Snapshot of the driver queues. Polled, never cached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct QueueStatus {
    /// Bytes received from the device and waiting to be read.
    pub rx_pending: usize,
    /// Bytes queued for transmission to the device.
    pub tx_pending: usize,
    /// Driver event bits.
    pub event_mask: u32,
}

/// Identity of an opened device.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct DeviceIdentity {
    /// Position of the device in the driver's device list.
    pub index: u32,
    /// USB serial number string.
    pub serial_number: String,
    /// USB product description string.
    pub description: String,
}

/// Supported FTDI chip types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChipType {
    /// Original FTDI chip (FT8U232AM).
    Am,
    /// B-type chip (FT232BM, FT245BM).
    Bm,
    /// Dual-port chip (FT2232C/D/L).
    Ft2232C,
    /// FT232R / FT245R.
    Ft232R,
    /// Dual hi-speed chip (FT2232H).
    Ft2232H,
    /// Quad-port chip (FT4232H).
    Ft4232H,
    /// Single hi-speed chip (FT232H).
    Ft232H,
    /// FT230X / FT231X / FT234XD.
    Ft230X,
}

impl ChipType {
    /// Detect the chip from the USB `bcdDevice` field.
    pub fn from_release(bcd: u16, has_serial: bool) -> Self {
        match bcd {
            0x0400 => Self::Bm,
            // BM reports 0x200 when its serial number is blank
            0x0200 if !has_serial => Self::Bm,
            0x0200 => Self::Am,
            0x0500 => Self::Ft2232C,
            0x0600 => Self::Ft232R,
            0x0700 => Self::Ft2232H,
            0x0800 => Self::Ft4232H,
            0x0900 => Self::Ft232H,
            0x1000 => Self::Ft230X,
            _ => Self::Bm,
        }
    }

    /// Whether this is an H-type (hi-speed) chip.
    #[inline]
    pub fn is_h_type(self) -> bool {
        matches!(self, Self::Ft2232H | Self::Ft4232H | Self::Ft232H)
    }
}

/// Parity mode for serial communication.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Parity {
    /// No parity bit.
    #[default]
    None,
    /// Odd parity.
    Odd,
    /// Even parity.
    Even,
    /// Mark parity (always 1).
    Mark,
    /// Space parity (always 0).
    Space,
}

impl Parity {
    #[cfg_attr(not(feature = "usb"), allow(dead_code))]
    pub(crate) fn wire_value(self) -> u16 {
        match self {
            Self::None => 0x00,
            Self::Odd => 0x01,
            Self::Even => 0x02,
            Self::Mark => 0x03,
            Self::Space => 0x04,
        }
    }
}

/// Number of stop bits for serial communication.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum StopBits {
    /// 1 stop bit.
    #[default]
    One,
    /// 1.5 stop bits.
    OnePointFive,
    /// 2 stop bits.
    Two,
}

impl StopBits {
    #[cfg_attr(not(feature = "usb"), allow(dead_code))]
    pub(crate) fn wire_value(self) -> u16 {
        match self {
            Self::One => 0x00,
            Self::OnePointFive => 0x01,
            Self::Two => 0x02,
        }
    }
}

/// Number of data bits (word length) for serial communication.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum DataBits {
    /// 7 data bits.
    Seven,
    /// 8 data bits.
    #[default]
    Eight,
}

impl DataBits {
    #[cfg_attr(not(feature = "usb"), allow(dead_code))]
    pub(crate) fn wire_value(self) -> u16 {
        match self {
            Self::Seven => 7,
            Self::Eight => 8,
        }
    }
}

/// Flow control mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum FlowControl {
    /// No flow control.
    #[default]
    Disabled,
    /// Hardware RTS/CTS flow control.
    RtsCts,
    /// Hardware DTR/DSR flow control.
    DtrDsr,
    /// Software flow control with the given XON/XOFF characters.
    XonXoff {
        /// Character that resumes transmission.
        xon: u8,
        /// Character that pauses transmission.
        xoff: u8,
    },
}

/// Serial line configuration applied by [`Session::configure`](crate::Session::configure).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SerialConfig {
    /// Baud rate in bits per second.
    pub baud_rate: u32,
    /// Word length.
    pub data_bits: DataBits,
    /// Stop bits.
    pub stop_bits: StopBits,
    /// Parity.
    pub parity: Parity,
    /// Flow control.
    pub flow_control: FlowControl,
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            baud_rate: 115_200,
            data_bits: DataBits::Eight,
            stop_bits: StopBits::One,
            parity: Parity::None,
            flow_control: FlowControl::Disabled,
        }
    }
}

impl SerialConfig {
    /// 8N1 at the given baud rate, no flow control.
    pub fn new(baud_rate: u32) -> Self {
        Self {
            baud_rate,
            ..Self::default()
        }
    }

    /// Set the word length.
    pub fn data_bits(mut self, data_bits: DataBits) -> Self {
        self.data_bits = data_bits;
        self
    }

    /// Set the number of stop bits.
    pub fn stop_bits(mut self, stop_bits: StopBits) -> Self {
        self.stop_bits = stop_bits;
        self
    }

    /// Set the parity.
    pub fn parity(mut self, parity: Parity) -> Self {
        self.parity = parity;
        self
    }

    /// Set the flow control mode.
    pub fn flow_control(mut self, flow_control: FlowControl) -> Self {
        self.flow_control = flow_control;
        self
    }
}

impl std::fmt::Display for SerialConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let parity = match self.parity {
            Parity::None => 'N',
            Parity::Odd => 'O',
            Parity::Even => 'E',
            Parity::Mark => 'M',
            Parity::Space => 'S',
        };
        let stop = match self.stop_bits {
            StopBits::One => "1",
            StopBits::OnePointFive => "1.5",
            StopBits::Two => "2",
        };
        write!(
            f,
            "{} baud {}{}{}",
            self.baud_rate,
            self.data_bits.wire_value(),
            parity,
            stop
        )
    }
}
