//! MPSSE loopback self-test.
//!
//! The command processor answers an opcode it does not recognize with the
//! bad-command byte `0xFA` followed by the offending opcode. The self-test
//! enables internal loopback, sends an opcode that is never defined and
//! looks for that echo in the reply.

use std::time::{Duration, Instant};

use crate::constants::{mpsse, SELF_TEST_READ_MAX};
use crate::error::{DriverStatus, Error, Result};
use crate::transport::Transport;
use crate::types::PurgeMask;

/// Whether `response` contains the bad-command echo for `opcode`.
pub fn contains_bad_command_echo(response: &[u8], opcode: u8) -> bool {
    response
        .windows(2)
        .any(|pair| pair == [mpsse::BAD_COMMAND, opcode])
}

/// Run the self-test sequence on a locked transport.
///
/// Fails with [`Error::Timeout`] if no reply arrives within `timeout`, and
/// with [`Error::ProtocolViolation`] if the reply lacks the echo.
pub(crate) fn run_loopback_test(transport: &mut dyn Transport, timeout: Duration) -> Result<()> {
    transport.reset_device()?;
    transport.purge(PurgeMask::RxTx)?;

    write_opcode(transport, mpsse::LOOPBACK_START)?;
    write_opcode(transport, mpsse::BOGUS_OPCODE)?;

    let deadline = Instant::now() + timeout;
    let pending = loop {
        let status = transport.queue_status()?;
        if status.rx_pending > 0 {
            break status.rx_pending;
        }
        if Instant::now() >= deadline {
            return Err(Error::Timeout("no reply to MPSSE self-test"));
        }
        std::hint::spin_loop();
    };

    let mut response = vec![0u8; pending.min(SELF_TEST_READ_MAX)];
    let n = transport.read(&mut response)?;
    response.truncate(n);
    log::debug!("Self-test reply: {:02X?}", response);

    if contains_bad_command_echo(&response, mpsse::BOGUS_OPCODE) {
        Ok(())
    } else {
        Err(Error::ProtocolViolation(
            "bad-command echo missing from self-test reply",
        ))
    }
}

fn write_opcode(transport: &mut dyn Transport, opcode: u8) -> Result<()> {
    match transport.write(&[opcode])? {
        1 => Ok(()),
        _ => Err(Error::Driver(DriverStatus::FailedToWriteDevice)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCategory;
    use crate::sim::{SimOp, SimulatedDevice};
    use crate::types::BitMode;

    fn mpsse_device() -> SimulatedDevice {
        let mut dev = SimulatedDevice::new();
        dev.set_bit_mode(0, BitMode::Mpsse).unwrap();
        dev
    }

    #[test]
    fn echo_scan() {
        assert!(contains_bad_command_echo(&[0xFA, 0xAA], 0xAA));
        assert!(contains_bad_command_echo(&[0x00, 0x12, 0xFA, 0xAA, 0x34], 0xAA));
        assert!(!contains_bad_command_echo(&[0x00, 0x01], 0xAA));
        assert!(!contains_bad_command_echo(&[0xFA, 0xAB], 0xAA));
        assert!(!contains_bad_command_echo(&[0xAA, 0xFA], 0xAA));
        assert!(!contains_bad_command_echo(&[0xFA], 0xAA));
        assert!(!contains_bad_command_echo(&[], 0xAA));
    }

    #[test]
    fn passes_on_echo() {
        let mut dev = mpsse_device();
        run_loopback_test(&mut dev, Duration::from_millis(100)).unwrap();
    }

    #[test]
    fn sequence_resets_purges_then_writes_two_single_byte_frames() {
        let mut dev = mpsse_device();
        let sim = dev.handle();
        sim.clear_log();
        run_loopback_test(&mut dev, Duration::from_millis(100)).unwrap();

        assert_eq!(sim.writes(), vec![vec![0x84], vec![0xAA]]);
        let calls = sim.calls();
        assert_eq!(
            &calls[..4],
            &[SimOp::ResetDevice, SimOp::Purge, SimOp::Write, SimOp::Write]
        );
        assert_eq!(calls.last(), Some(&SimOp::Read));
    }

    #[test]
    fn stale_bytes_are_purged_first() {
        let mut dev = mpsse_device();
        dev.handle().push_rx(&[0xFA, 0xAA]);
        dev.handle().set_responder(|_| Vec::new());
        let err = run_loopback_test(&mut dev, Duration::from_millis(20)).unwrap_err();
        assert_eq!(err.category(), ErrorCategory::Timeout);
    }

    #[test]
    fn wrong_reply_is_a_protocol_violation() {
        let mut dev = mpsse_device();
        dev.handle().set_responder(|written| {
            if written == [0xAA] {
                vec![0x00, 0x01]
            } else {
                Vec::new()
            }
        });
        let err = run_loopback_test(&mut dev, Duration::from_millis(100)).unwrap_err();
        assert_eq!(err.category(), ErrorCategory::ProtocolViolation);
    }

    #[test]
    fn reads_at_most_100_bytes() {
        let mut dev = mpsse_device();
        let sim = dev.handle();
        sim.set_responder(|written| {
            if written == [0xAA] {
                let mut reply = vec![0u8; 150];
                reply[148] = 0xFA;
                reply[149] = 0xAA;
                reply
            } else {
                Vec::new()
            }
        });
        let err = run_loopback_test(&mut dev, Duration::from_millis(100)).unwrap_err();
        assert_eq!(err.category(), ErrorCategory::ProtocolViolation);
        assert_eq!(sim.rx_pending(), 50);
    }

    #[test]
    fn transport_failure_propagates() {
        let mut dev = mpsse_device();
        dev.handle().fail_next(SimOp::ResetDevice, DriverStatus::IoError);
        let err = run_loopback_test(&mut dev, Duration::from_millis(100)).unwrap_err();
        assert_eq!(err.driver_status(), Some(DriverStatus::IoError));
    }
}
