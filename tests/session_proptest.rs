//! Property-based tests for the poller stream and the GPIO mode gate.
//!
//! Uses `proptest` to generate arrival patterns, buffer sizes and modes and
//! runs each case against the simulated driver.

use std::time::Duration;

use ftdi_session::sim::{SimDriver, SimHandle};
use ftdi_session::{BitMode, CommandPayload, ErrorCategory, Session, SessionConfig};
use proptest::prelude::*;

fn open(config: SessionConfig) -> (Session, SimHandle) {
    let mut driver = SimDriver::new();
    let sim = driver.add_device("PROP0001", "Simulated device");
    let session = Session::open_by_index(&driver, 0, config).unwrap();
    (session, sim)
}

fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap()
}

fn mode_strategy() -> impl Strategy<Value = BitMode> {
    prop::sample::select(BitMode::ALL.to_vec())
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    /// Concatenated chunks equal the arrived bytes, in order, with nothing
    /// lost or repeated, whatever the buffer size and arrival pattern.
    #[test]
    fn chunks_concatenate_to_the_stream(
        batches in prop::collection::vec(prop::collection::vec(any::<u8>(), 1..64), 1..16),
        buffer_size in 1usize..48,
    ) {
        let expected: Vec<u8> = batches.concat();
        let config = SessionConfig::default().channel_capacity(4096, 32);
        let (mut session, sim) = open(config);
        for batch in batches {
            sim.push_in_flight(batch);
        }

        let received = runtime().block_on(async {
            let mut data = session.subscribe_data();
            session.start_reading(buffer_size, Duration::from_millis(1)).unwrap();
            let mut received = Vec::new();
            while received.len() < expected.len() {
                let chunk = tokio::time::timeout(Duration::from_secs(5), data.recv())
                    .await
                    .unwrap()
                    .unwrap();
                prop_assert!(!chunk.is_empty());
                prop_assert!(chunk.len() <= buffer_size);
                received.extend_from_slice(&chunk);
            }
            session.stop_reading();
            prop_assert_eq!(data.dropped(), 0);
            Ok(received)
        })?;

        prop_assert_eq!(received, expected);
    }

    /// GPIO calls succeed exactly in the bit-bang modes.
    #[test]
    fn gpio_gate_follows_mode(mode in mode_strategy(), value in any::<u8>()) {
        let (mut session, sim) = open(SessionConfig::default());
        session.set_bit_mode(0xFF, mode).unwrap();
        sim.clear_log();

        let set = session.set_gpio(value);
        let get = session.get_gpio();
        if mode.is_bit_bang() {
            prop_assert!(set.is_ok());
            prop_assert_eq!(get.unwrap(), value);
            prop_assert_eq!(sim.writes(), vec![vec![value, 0, 0, 0, 0]]);
        } else {
            prop_assert_eq!(set.unwrap_err().category(), ErrorCategory::Precondition);
            prop_assert_eq!(get.unwrap_err().category(), ErrorCategory::Precondition);
            prop_assert!(sim.calls().is_empty());
        }
    }

    /// A write never reports more bytes than it was given, and the published
    /// response carries the same count.
    #[test]
    fn write_count_is_bounded(
        data in prop::collection::vec(any::<u8>(), 0..256),
        limit in 0usize..300,
    ) {
        let (mut session, sim) = open(SessionConfig::default());
        sim.limit_writes(limit);
        let n = session.write(&data).unwrap();
        prop_assert!(n <= data.len());
        prop_assert_eq!(n, limit.min(data.len()));
        prop_assert_eq!(
            session.last_response().unwrap().payload,
            Some(CommandPayload::BytesWritten(n))
        );
    }
}
