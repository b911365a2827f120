//! Background polling read loop.
//!
//! The poller runs as a tokio task. Each iteration queries the receive
//! queue; if bytes are pending it reads up to its buffer size and publishes
//! exactly the bytes read as one [`DataChunk`]. With nothing pending it
//! sleeps for the poll interval. Driver calls run on the blocking pool, one
//! call at a time. The stop token is checked during the sleep and again
//! under the transport lock before each read, so a stop request either
//! leaves pending bytes in the device queue or lets the read publish them.
//!
//! A transport error inside the loop is published as a
//! [`StatusKind::Error`] event and stops the loop. Every exit publishes
//! [`StatusKind::ReadingStopped`] once. A restarted loop waits for the
//! previous one to exit before publishing [`StatusKind::ReadingStarted`].

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::channel::{Channels, DataChannel};
use crate::error::{Error, Result};
use crate::event::{DataChunk, StatusEvent, StatusKind};
use crate::transport::{SharedTransport, Transport};

/// Stops a running poller. Cloneable and callable from any thread.
#[derive(Debug, Clone)]
pub struct ReadStopHandle {
    token: CancellationToken,
    // Held by the loop across each read and publish; stop() takes it after
    // cancelling so no chunk is published once stop() has returned.
    publish_gate: Arc<Mutex<()>>,
}

impl ReadStopHandle {
    fn new() -> Self {
        Self {
            token: CancellationToken::new(),
            publish_gate: Arc::new(Mutex::new(())),
        }
    }

    /// Signal the loop to stop. Idempotent. Waits at most for a read that is
    /// already in progress; the loop exits at its next check and then
    /// publishes `ReadingStopped`.
    pub fn stop(&self) {
        if self.token.is_cancelled() {
            return;
        }
        self.token.cancel();
        let _gate = self.publish_gate.lock().unwrap_or_else(PoisonError::into_inner);
    }

    /// Whether stop has been requested (or the loop stopped itself).
    pub fn is_stopped(&self) -> bool {
        self.token.is_cancelled()
    }
}

/// Poller settings.
#[derive(Debug, Clone, Copy)]
pub(crate) struct PollSettings {
    pub buffer_size: usize,
    pub interval: Duration,
}

struct PollerTask {
    stop: ReadStopHandle,
    handle: JoinHandle<()>,
}

/// Owner of at most one running poll loop.
#[derive(Default)]
pub(crate) struct Poller {
    task: Option<PollerTask>,
    // Loop that was asked to stop but may still be inside a driver call.
    retiring: Option<JoinHandle<()>>,
}

impl Poller {
    /// Start the loop. No-op if it is already running.
    pub(crate) fn start(
        &mut self,
        transport: SharedTransport,
        channels: Channels,
        mut settings: PollSettings,
    ) -> Result<()> {
        if self.is_running() {
            log::debug!("Poller already running");
            return Ok(());
        }
        let runtime = tokio::runtime::Handle::try_current().map_err(|_| Error::NoRuntime)?;

        if settings.buffer_size == 0 {
            log::warn!("Poll buffer size 0 clipped to 1");
            settings.buffer_size = 1;
        }

        let previous = match self.task.take() {
            Some(task) => Some(task.handle),
            None => self.retiring.take(),
        };
        self.retiring = None;

        let stop = ReadStopHandle::new();
        let handle = runtime.spawn(poll_loop(
            transport,
            channels,
            stop.clone(),
            settings,
            previous,
        ));
        self.task = Some(PollerTask { stop, handle });
        Ok(())
    }

    /// Request the loop to stop. No-op if it is not running.
    pub(crate) fn stop(&mut self) {
        if let Some(task) = self.task.take() {
            task.stop.stop();
            self.retiring = Some(task.handle);
        }
    }

    /// Whether the loop is running and has not been asked to stop.
    pub(crate) fn is_running(&self) -> bool {
        self.task
            .as_ref()
            .is_some_and(|t| !t.stop.is_stopped() && !t.handle.is_finished())
    }

    /// Stop handle of the current loop, until that loop has exited.
    pub(crate) fn stop_handle(&self) -> Option<ReadStopHandle> {
        self.task
            .as_ref()
            .filter(|t| !t.handle.is_finished())
            .map(|t| t.stop.clone())
    }
}

impl Drop for Poller {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn poll_loop(
    transport: SharedTransport,
    channels: Channels,
    stop: ReadStopHandle,
    settings: PollSettings,
    previous: Option<JoinHandle<()>>,
) {
    if let Some(previous) = previous {
        if let Err(e) = previous.await {
            log::warn!("Previous poller ended abnormally: {}", e);
        }
    }

    channels.status.publish(StatusEvent::new(
        StatusKind::ReadingStarted,
        format!(
            "Reading started (buffer {} bytes, interval {:?})",
            settings.buffer_size, settings.interval
        ),
    ));

    let mut buffer = vec![0u8; settings.buffer_size];
    let mut total: u64 = 0;

    while !stop.is_stopped() {
        match poll_once(&transport, &channels, &stop, settings, &mut buffer).await {
            Ok(n) => total += n as u64,
            Err(e) if stop.is_stopped() => {
                log::debug!("Ignoring transport error after stop: {}", e);
            }
            Err(e) => {
                log::warn!("Poller stopping after transport error: {}", e);
                channels
                    .status
                    .publish(StatusEvent::new(StatusKind::Error, e.to_string()));
                stop.token.cancel();
            }
        }
    }

    channels.status.publish(StatusEvent::new(
        StatusKind::ReadingStopped,
        format!("Reading stopped after {total} bytes"),
    ));
}

/// One iteration. Returns the number of bytes published.
async fn poll_once(
    transport: &SharedTransport,
    channels: &Channels,
    stop: &ReadStopHandle,
    settings: PollSettings,
    buffer: &mut Vec<u8>,
) -> Result<usize> {
    let status = transport.with_blocking(|t| t.queue_status()).await??;

    if status.rx_pending == 0 {
        tokio::select! {
            _ = stop.token.cancelled() => {}
            _ = tokio::time::sleep(settings.interval) => {}
        }
        return Ok(0);
    }
    if stop.is_stopped() {
        return Ok(0);
    }

    let want = status.rx_pending.min(settings.buffer_size);
    let mut buf = std::mem::take(buffer);
    let stop = stop.clone();
    let data = Arc::clone(&channels.data);
    let (read, buf) = transport
        .with_blocking(move |t| {
            let read = read_and_publish(t, &stop, &data, &mut buf[..want]);
            (read, buf)
        })
        .await?;
    *buffer = buf;
    read
}

/// Read once and publish what arrived, holding the publish gate throughout.
///
/// Runs with the transport locked. A stop requested before this point
/// skips the read so the bytes stay queued in the device.
fn read_and_publish(
    transport: &mut dyn Transport,
    stop: &ReadStopHandle,
    data: &DataChannel,
    buf: &mut [u8],
) -> Result<usize> {
    let _gate = stop
        .publish_gate
        .lock()
        .unwrap_or_else(PoisonError::into_inner);
    if stop.is_stopped() {
        return Ok(0);
    }
    let n = transport.read(buf)?;
    // Pending bytes can vanish between the status query and the read.
    if n > 0 {
        log::trace!("Received {} bytes", n);
        data.publish(DataChunk::from(&buf[..n]));
    }
    Ok(n)
}
