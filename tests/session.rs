//! End-to-end session behavior against the simulated driver.

use std::time::Duration;

use ftdi_session::sim::{SimDriver, SimHandle, SimOp};
use ftdi_session::{
    BitMode, CommandKind, CommandPayload, DriverStatus, Error, ErrorCategory, PurgeMask, Session,
    SessionConfig, StatusEvent, StatusKind, Subscription,
};

const WAIT: Duration = Duration::from_secs(2);

fn open() -> (Session, SimHandle) {
    let _ = env_logger::builder().is_test(true).try_init();
    let mut driver = SimDriver::new();
    let sim = driver.add_device("FT000001", "Simulated FT232H");
    let config = SessionConfig::default().self_test_timeout(Duration::from_millis(100));
    let session = Session::open_by_serial(&driver, "FT000001", config).unwrap();
    (session, sim)
}

async fn next_kind(status: &mut Subscription<StatusEvent>) -> StatusKind {
    tokio::time::timeout(WAIT, status.recv())
        .await
        .expect("status event")
        .expect("channel open")
        .kind
}

#[test]
fn open_by_index_and_identity() {
    let mut driver = SimDriver::new();
    driver.add_device("A1", "first");
    driver.add_device("B2", "second");

    let session = Session::open_by_index(&driver, 1, SessionConfig::default()).unwrap();
    assert_eq!(session.device_index(), 1);
    assert_eq!(session.serial_number(), "B2");
    assert_eq!(session.description(), "second");
    assert_eq!(session.bit_mode(), BitMode::Reset);

    let err = Session::open_by_index(&driver, 1, SessionConfig::default()).unwrap_err();
    assert_eq!(err.driver_status(), Some(DriverStatus::DeviceNotOpened));
    let err = Session::open_by_serial(&driver, "nope", SessionConfig::default()).unwrap_err();
    assert_eq!(err.driver_status(), Some(DriverStatus::DeviceNotFound));
}

#[test]
fn gpio_requires_bit_bang_mode() {
    let (mut session, sim) = open();

    let err = session.set_gpio(1).unwrap_err();
    assert_eq!(err.category(), ErrorCategory::Precondition);

    session.set_bit_mode(0xFF, BitMode::AsyncBitBang).unwrap();
    assert_eq!(session.bit_mode(), BitMode::AsyncBitBang);

    session.set_gpio(0x7B).unwrap();
    assert_eq!(sim.writes(), vec![vec![0x7B, 0, 0, 0, 0]]);
    assert_eq!(sim.pins(), 0x7B);
    assert_eq!(session.get_gpio().unwrap(), 0x7B);
}

#[test]
fn mpsse_self_test() {
    let (mut session, sim) = open();
    session.set_bit_mode(0x00, BitMode::Mpsse).unwrap();

    sim.set_responder(|written| {
        if written == [0xAA] {
            vec![0xFA, 0xAA]
        } else {
            Vec::new()
        }
    });
    assert!(session.test_mpsse());
    // The internal reset leaves the session mode alone.
    assert_eq!(session.bit_mode(), BitMode::Mpsse);

    sim.set_responder(|written| {
        if written == [0xAA] {
            vec![0x00, 0x01]
        } else {
            Vec::new()
        }
    });
    assert!(!session.test_mpsse());
}

#[test]
fn self_test_on_fresh_session() {
    let (mut session, sim) = open();
    assert_eq!(session.bit_mode(), BitMode::Reset);
    sim.set_responder(|written| {
        if written == [0xAA] {
            vec![0xFA, 0xAA]
        } else {
            Vec::new()
        }
    });

    assert!(session.test_mpsse());
    assert_eq!(session.bit_mode(), BitMode::Reset);
    let calls = sim.calls();
    assert_eq!(calls.first(), Some(&SimOp::ResetDevice));
    assert!(calls.contains(&SimOp::Purge));
}

#[test]
fn write_count_never_exceeds_input() {
    let (mut session, sim) = open();
    sim.limit_writes(4);
    let n = session.write(&[1, 2, 3, 4, 5, 6]).unwrap();
    assert!(n <= 6);
    assert_eq!(
        session.last_response().unwrap().payload,
        Some(CommandPayload::BytesWritten(n))
    );
}

#[test]
fn hard_purge_leaves_queue_empty() {
    let (mut session, sim) = open();
    session.set_bit_mode(0x00, BitMode::Mpsse).unwrap();
    sim.push_rx(&[0x11; 300]);
    sim.push_in_flight(vec![0x22; 6000]);

    session.hard_purge().unwrap();
    assert_eq!(session.queue_status().unwrap().rx_pending, 0);
    let response = session.last_response().unwrap();
    assert_eq!(response.kind, CommandKind::Purge);
    assert!(response.success);
}

#[tokio::test]
async fn poller_publishes_one_chunk_for_pending_bytes() {
    let (mut session, sim) = open();
    let mut data = session.subscribe_data();
    sim.push_rx(&[0x5A; 10]);

    session.start_reading(4096, Duration::from_millis(10)).unwrap();
    let chunk = tokio::time::timeout(WAIT, data.recv()).await.unwrap().unwrap();
    assert_eq!(chunk.len(), 10);

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(data.try_recv().is_none());

    sim.push_rx(b"more");
    let chunk = tokio::time::timeout(WAIT, data.recv()).await.unwrap().unwrap();
    assert_eq!(&chunk[..], b"more");
    session.stop_reading();
}

#[tokio::test]
async fn start_and_stop_are_idempotent() {
    let (mut session, sim) = open();
    let mut status = session.subscribe_status();
    let mut data = session.subscribe_data();

    session.start_reading(64, Duration::from_millis(5)).unwrap();
    session.start_reading(64, Duration::from_millis(5)).unwrap();
    assert!(session.is_reading());
    assert_eq!(next_kind(&mut status).await, StatusKind::ReadingStarted);

    session.stop_reading();
    session.stop_reading();
    assert!(!session.is_reading());
    assert_eq!(next_kind(&mut status).await, StatusKind::ReadingStopped);

    sim.push_rx(&[1, 2, 3]);
    tokio::time::sleep(Duration::from_millis(30)).await;
    assert!(status.try_recv().is_none());
    assert!(data.try_recv().is_none());
}

#[tokio::test]
async fn stop_handle_stops_from_another_task() {
    let (mut session, _sim) = open();
    let mut status = session.subscribe_status();
    session.start_reading_default().unwrap();
    assert_eq!(next_kind(&mut status).await, StatusKind::ReadingStarted);

    let handle = session.reading_stop_handle().unwrap();
    tokio::spawn(async move { handle.stop() }).await.unwrap();
    assert_eq!(next_kind(&mut status).await, StatusKind::ReadingStopped);
    assert!(!session.is_reading());
}

#[tokio::test]
async fn poller_error_ends_reading_and_allows_restart() {
    let (mut session, sim) = open();
    let mut status = session.subscribe_status();
    sim.fail_next(SimOp::QueueStatus, DriverStatus::IoError);

    session.start_reading(64, Duration::from_millis(5)).unwrap();
    assert_eq!(next_kind(&mut status).await, StatusKind::ReadingStarted);
    assert_eq!(next_kind(&mut status).await, StatusKind::Error);
    assert_eq!(next_kind(&mut status).await, StatusKind::ReadingStopped);
    assert!(!session.is_reading());

    let deadline = tokio::time::Instant::now() + WAIT;
    while session.reading_stop_handle().is_some() {
        assert!(tokio::time::Instant::now() < deadline, "stale stop handle");
        tokio::task::yield_now().await;
    }

    let mut data = session.subscribe_data();
    session.start_reading(64, Duration::from_millis(5)).unwrap();
    assert_eq!(next_kind(&mut status).await, StatusKind::ReadingStarted);
    sim.push_rx(b"ok");
    let chunk = tokio::time::timeout(WAIT, data.recv()).await.unwrap().unwrap();
    assert_eq!(&chunk[..], b"ok");
    assert_eq!(session.last_status().map(|e| e.kind), Some(StatusKind::ReadingStarted));
    session.stop_reading();
}

#[tokio::test]
async fn restart_while_old_loop_is_blocked() {
    let (mut session, sim) = open();
    let mut status = session.subscribe_status();
    let mut data = session.subscribe_data();
    session.start_reading(64, Duration::from_millis(1)).unwrap();
    assert_eq!(next_kind(&mut status).await, StatusKind::ReadingStarted);

    // Slow driver calls keep the old loop inside a call across the restart.
    sim.set_call_latency(Duration::from_millis(50));
    tokio::time::sleep(Duration::from_millis(10)).await;

    session.stop_reading();
    session.start_reading(64, Duration::from_millis(1)).unwrap();
    assert_eq!(next_kind(&mut status).await, StatusKind::ReadingStopped);
    assert_eq!(next_kind(&mut status).await, StatusKind::ReadingStarted);
    assert!(session.is_reading());
    assert_eq!(session.last_status().map(|e| e.kind), Some(StatusKind::ReadingStarted));

    sim.set_call_latency(Duration::ZERO);
    sim.push_rx(b"after");
    let chunk = tokio::time::timeout(WAIT, data.recv()).await.unwrap().unwrap();
    assert_eq!(&chunk[..], b"after");
    session.stop_reading();
}

#[tokio::test]
async fn commands_run_while_reading() {
    let (mut session, sim) = open();
    let mut data = session.subscribe_data();
    session.set_bit_mode(0x00, BitMode::Mpsse).unwrap();
    session.start_reading(64, Duration::from_millis(1)).unwrap();

    // Undefined opcodes are echoed back and show up on the data channel.
    assert_eq!(session.write(&[0xAB]).unwrap(), 1);
    let chunk = tokio::time::timeout(WAIT, data.recv()).await.unwrap().unwrap();
    assert_eq!(&chunk[..], &[0xFA, 0xAB]);

    session.purge(PurgeMask::RxTx).unwrap();
    assert!(sim.calls().contains(&SimOp::Purge));
    session.stop_reading();
}

#[tokio::test]
async fn late_status_subscriber_gets_last_event() {
    let (mut session, _sim) = open();
    session.start_reading(16, Duration::from_millis(5)).unwrap();
    let mut first = session.subscribe_status();
    assert_eq!(next_kind(&mut first).await, StatusKind::ReadingStarted);

    let mut late = session.subscribe_status();
    assert_eq!(late.try_recv().map(|e| e.kind), Some(StatusKind::ReadingStarted));
    session.stop_reading();
}

#[tokio::test]
async fn close_stops_reading_and_rejects_later_calls() {
    let (mut session, sim) = open();
    let mut status = session.subscribe_status();
    session.start_reading(16, Duration::from_millis(5)).unwrap();
    assert_eq!(next_kind(&mut status).await, StatusKind::ReadingStarted);

    session.close().unwrap();
    assert!(!sim.is_open());
    assert!(!session.is_reading());

    let kinds = [next_kind(&mut status).await, next_kind(&mut status).await];
    assert!(kinds.contains(&StatusKind::Closed));
    assert!(kinds.contains(&StatusKind::ReadingStopped));

    assert!(matches!(session.write(b"x"), Err(Error::NotOpen)));
    assert!(matches!(session.get_gpio(), Err(Error::NotOpen)));
    session.close().unwrap();
}

#[tokio::test]
async fn responses_are_observable() {
    let (mut session, _sim) = open();
    let mut responses = session.subscribe_responses();
    session.set_bit_mode(0x0F, BitMode::SyncBitBang).unwrap();

    tokio::time::timeout(WAIT, responses.changed()).await.unwrap().unwrap();
    let response = responses.borrow_and_update().clone().unwrap();
    assert_eq!(response.kind, CommandKind::SetBitMode);
    assert_eq!(response.payload, Some(CommandPayload::BitMode(BitMode::SyncBitBang)));
}
