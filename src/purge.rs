//! Hard purge: flush the chip, purge the driver, drain what still arrives.

use std::time::{Duration, Instant};

use crate::constants::{command_frame, mpsse, DRAIN_CHUNK_SIZE};
use crate::error::{Error, Result};
use crate::transport::Transport;
use crate::types::{BitMode, PurgeMask};

/// Run the hard-purge sequence on a locked transport.
///
/// In command-processor modes a send-immediate frame first makes the chip
/// hand its buffered bytes to the host. After the driver purge, the receive
/// queue is read and discarded until it reports empty or `timeout` expires.
/// Returns the number of bytes discarded by the drain.
pub(crate) fn hard_purge(
    transport: &mut dyn Transport,
    mode: BitMode,
    timeout: Duration,
) -> Result<usize> {
    if mode.is_command_processor() {
        transport.write(&command_frame(mpsse::SEND_IMMEDIATE))?;
    }
    transport.purge(PurgeMask::RxTx)?;

    let deadline = Instant::now() + timeout;
    let mut scratch = vec![0u8; DRAIN_CHUNK_SIZE];
    let mut discarded = 0;
    loop {
        let status = transport.queue_status()?;
        if status.rx_pending == 0 {
            break;
        }
        if Instant::now() >= deadline {
            return Err(Error::Timeout("receive queue did not drain"));
        }
        let want = status.rx_pending.min(DRAIN_CHUNK_SIZE);
        discarded += transport.read(&mut scratch[..want])?;
    }

    if discarded > 0 {
        log::debug!("Hard purge discarded {} late bytes", discarded);
    }
    Ok(discarded)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{DriverStatus, ErrorCategory};
    use crate::sim::{SimOp, SimulatedDevice};

    #[test]
    fn flush_frame_only_in_command_processor_modes() {
        for mode in BitMode::ALL {
            let mut dev = SimulatedDevice::new();
            let sim = dev.handle();
            hard_purge(&mut dev, mode, Duration::from_millis(100)).unwrap();
            let expected: Vec<Vec<u8>> = if mode.is_command_processor() {
                vec![vec![0x87, 0, 0, 0, 0]]
            } else {
                Vec::new()
            };
            assert_eq!(sim.writes(), expected, "mode {mode:?}");
        }
    }

    #[test]
    fn drains_late_arrivals() {
        let mut dev = SimulatedDevice::new();
        let sim = dev.handle();
        sim.push_rx(&[1; 100]);
        sim.push_in_flight(vec![2; 5000]);
        sim.push_in_flight(vec![3; 10]);

        let discarded = hard_purge(&mut dev, BitMode::Reset, Duration::from_secs(1)).unwrap();
        assert_eq!(discarded, 5010);
        assert_eq!(dev.queue_status().unwrap().rx_pending, 0);

        // 4096 of the first batch, then the rest of it plus the second batch
        let reads = sim.calls().iter().filter(|op| **op == SimOp::Read).count();
        assert_eq!(reads, 2);
    }

    #[test]
    fn endless_stream_times_out() {
        let mut dev = SimulatedDevice::new();
        let sim = dev.handle();
        sim.push_in_flight(vec![0; 16]);
        sim.stall_reads(usize::MAX);
        let err = hard_purge(&mut dev, BitMode::Reset, Duration::from_millis(20)).unwrap_err();
        assert_eq!(err.category(), ErrorCategory::Timeout);
    }

    #[test]
    fn purge_failure_propagates() {
        let mut dev = SimulatedDevice::new();
        dev.handle().fail_next(SimOp::Purge, DriverStatus::IoError);
        let err = hard_purge(&mut dev, BitMode::Reset, Duration::from_millis(20)).unwrap_err();
        assert_eq!(err.driver_status(), Some(DriverStatus::IoError));
    }
}
