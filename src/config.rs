//! Session configuration.

use std::time::Duration;

/// Default read/write timeout.
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

/// Tunables applied when a [`Session`](crate::Session) is opened.
///
/// # Example
///
/// ```
/// use std::time::Duration;
/// use ftdi_session::SessionConfig;
///
/// let config = SessionConfig::default()
///     .latency_timer(2)
///     .self_test_timeout(Duration::from_millis(250));
/// assert_eq!(config.latency_timer, Some(2));
/// ```
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Timeout for a single driver read.
    pub read_timeout: Duration,
    /// Timeout for a single driver write.
    pub write_timeout: Duration,
    /// Latency timer in milliseconds, or `None` to keep the device default.
    pub latency_timer: Option<u8>,
    /// USB transfer size for both directions, or `None` to keep the default.
    pub usb_transfer_size: Option<u32>,
    /// Chunks buffered per data subscriber before the oldest are dropped.
    pub data_capacity: usize,
    /// Events buffered per status subscriber before the oldest are dropped.
    pub status_capacity: usize,
    /// Deadline for the self-test response.
    pub self_test_timeout: Duration,
    /// Deadline for draining the receive queue during a hard purge.
    pub purge_timeout: Duration,
    /// Poller read buffer size used by
    /// [`Session::start_reading_default`](crate::Session::start_reading_default).
    pub default_buffer_size: usize,
    /// Poller idle interval used by
    /// [`Session::start_reading_default`](crate::Session::start_reading_default).
    pub default_poll_interval: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            read_timeout: DEFAULT_TIMEOUT,
            write_timeout: DEFAULT_TIMEOUT,
            latency_timer: None,
            usb_transfer_size: None,
            data_capacity: 256,
            status_capacity: 32,
            self_test_timeout: Duration::from_secs(1),
            purge_timeout: Duration::from_secs(2),
            default_buffer_size: 4096,
            default_poll_interval: Duration::from_millis(10),
        }
    }
}

impl SessionConfig {
    /// Set the read and write timeouts.
    pub fn timeouts(mut self, read: Duration, write: Duration) -> Self {
        self.read_timeout = read;
        self.write_timeout = write;
        self
    }

    /// Set the latency timer (1-255 ms).
    pub fn latency_timer(mut self, latency_ms: u8) -> Self {
        self.latency_timer = Some(latency_ms);
        self
    }

    /// Set the USB transfer size.
    pub fn usb_transfer_size(mut self, size: u32) -> Self {
        self.usb_transfer_size = Some(size);
        self
    }

    /// Set the per-subscriber buffer sizes of the data and status channels.
    pub fn channel_capacity(mut self, data: usize, status: usize) -> Self {
        self.data_capacity = data;
        self.status_capacity = status;
        self
    }

    /// Set the self-test deadline.
    pub fn self_test_timeout(mut self, timeout: Duration) -> Self {
        self.self_test_timeout = timeout;
        self
    }

    /// Set the hard-purge drain deadline.
    pub fn purge_timeout(mut self, timeout: Duration) -> Self {
        self.purge_timeout = timeout;
        self
    }

    /// Set the default poller settings.
    pub fn poll_defaults(mut self, buffer_size: usize, interval: Duration) -> Self {
        self.default_buffer_size = buffer_size;
        self.default_poll_interval = interval;
        self
    }
}
