//! Integration tests for outgoing operations: correlation, timeouts,
//! cancellation and send failures against the mock transport.

use std::sync::{Arc, Barrier};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc;
use std::time::{Duration, Instant};

use oplink::engine::{ResultState, Status};
use oplink::Error;

use crate::mock_transport::{eventually, response_frame, setup, CPORT};

const TYPE_ECHO: u8 = 0x02;
const WAIT: Duration = Duration::from_secs(5);

// ── Synchronous exchange ──────────────────────────────────────

#[test]
fn sync_request_completes_with_response_payload() {
    let (transport, _host, conn) = setup(None);
    let op = conn.operation_create(TYPE_ECHO, 4, 8).unwrap();
    op.request().payload().copy_from_slice(&[1, 2, 3, 4]);

    let responder = {
        let transport = transport.clone();
        let conn = conn.clone();
        std::thread::spawn(move || {
            assert!(transport.wait_for_sends(1, WAIT));
            std::thread::sleep(Duration::from_millis(50));
            let sent = transport.last_frame().unwrap();
            assert_eq!(sent.cport_id, CPORT);
            assert_eq!(sent.payload(), &[1, 2, 3, 4]);
            transport.complete_all();
            conn.recv(&response_frame(&sent.header(), Status::Success, &[9; 8]));
        })
    };

    let result = op.request_send_sync_timeout(Some(Duration::from_millis(500)));
    responder.join().unwrap();

    assert_eq!(result, Ok(()));
    assert_eq!(op.result_state(), ResultState::Final(Status::Success));
    assert_eq!(&*op.response().unwrap().payload(), &[9; 8]);
    assert!(eventually(WAIT, || !op.is_active()));
    assert_eq!(conn.active_operations(), 0);
}

#[test]
fn sync_request_times_out_and_goes_inactive() {
    let (transport, _host, conn) = setup(None);
    let op = conn.operation_create(TYPE_ECHO, 4, 8).unwrap();

    let start = Instant::now();
    let result = op.request_send_sync_timeout(Some(Duration::from_millis(500)));

    assert_eq!(result, Err(Error::Status(Status::Timeout)));
    assert!(start.elapsed() >= Duration::from_millis(500));
    assert_eq!(op.active_count(), 0, "inactive as soon as the call returns");
    assert_eq!(conn.active_operations(), 0);
    assert_eq!(transport.cancels(), 1);
    assert_eq!(transport.in_custody(), 0, "request reclaimed by the cancel");
}

#[test]
fn sync_request_uses_host_default_timeout() {
    let (_transport, _host, conn) = setup(None);
    let op = conn.operation_create(TYPE_ECHO, 0, 0).unwrap();
    let start = Instant::now();
    assert_eq!(op.request_send_sync(), Err(Error::Status(Status::Timeout)));
    // Fixture default is 500 ms.
    assert!(start.elapsed() >= Duration::from_millis(500));
}

#[test]
fn operation_sync_copies_both_directions() {
    let (transport, _host, conn) = setup(None);

    let responder = {
        let transport = transport.clone();
        let conn = conn.clone();
        std::thread::spawn(move || {
            assert!(transport.wait_for_sends(1, WAIT));
            let sent = transport.last_frame().unwrap();
            let reversed: Vec<u8> = sent.payload().iter().rev().copied().collect();
            conn.recv(&response_frame(&sent.header(), Status::Success, &reversed));
        })
    };

    let mut out = [0u8; 3];
    conn.operation_sync(TYPE_ECHO, &[1, 2, 3], &mut out, Some(WAIT)).unwrap();
    responder.join().unwrap();
    assert_eq!(out, [3, 2, 1]);
}

#[test]
fn interrupt_cancels_sync_wait() {
    let (_transport, _host, conn) = setup(None);
    let op = conn.operation_create(TYPE_ECHO, 0, 0).unwrap();

    let interrupter = {
        let op = op.clone();
        std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(50));
            op.interrupt();
        })
    };

    let result = op.request_send_sync_timeout(None);
    interrupter.join().unwrap();
    assert_eq!(result, Err(Error::Status(Status::Interrupted)));
    assert!(!op.is_active());
}

// ── Asynchronous exchange ─────────────────────────────────────

#[test]
fn callback_runs_once_on_another_thread() {
    let (transport, _host, conn) = setup(None);
    let op = conn.operation_create(TYPE_ECHO, 0, 2).unwrap();
    let (tx, rx) = mpsc::channel();
    let caller = std::thread::current().id();

    op.request_send(move |op| {
        tx.send((std::thread::current().id(), op.result())).unwrap();
    })
    .unwrap();

    let sent = transport.last_frame().unwrap();
    conn.recv(&response_frame(&sent.header(), Status::Success, &[5, 6]));
    // A duplicate response for the same id must not complete it again.
    conn.recv(&response_frame(&sent.header(), Status::Success, &[7, 8]));

    let (thread, result) = rx.recv_timeout(WAIT).unwrap();
    assert_ne!(thread, caller);
    assert_eq!(result, Ok(()));
    assert!(rx.recv_timeout(Duration::from_millis(100)).is_err());
    assert_eq!(&*op.response().unwrap().payload(), &[5, 6]);
}

#[test]
fn in_flight_ids_are_unique_and_nonzero() {
    let (transport, _host, conn) = setup(None);
    let ops: Vec<_> = (0..16)
        .map(|_| {
            let op = conn.operation_create(TYPE_ECHO, 0, 0).unwrap();
            op.request_send(|_| {}).unwrap();
            op
        })
        .collect();

    let mut ids: Vec<u16> = ops.iter().map(|op| op.id()).collect();
    assert!(ids.iter().all(|id| *id != 0));
    ids.sort_unstable();
    ids.dedup();
    assert_eq!(ids.len(), 16);

    let wire_ids: Vec<u16> = transport.frames().iter().map(|f| f.header().operation_id).collect();
    assert_eq!(wire_ids, ops.iter().map(|op| op.id()).collect::<Vec<_>>());

    for op in &ops {
        op.cancel(Status::Cancelled);
    }
    assert_eq!(conn.active_operations(), 0);
}

#[test]
fn error_response_keeps_payload_untouched() {
    let (transport, _host, conn) = setup(None);
    let op = conn.operation_create(TYPE_ECHO, 0, 4).unwrap();
    let (tx, rx) = mpsc::channel();
    op.request_send(move |op| tx.send(op.result()).unwrap()).unwrap();

    let sent = transport.last_frame().unwrap();
    conn.recv(&response_frame(&sent.header(), Status::Invalid, &[0xaa; 4]));

    assert_eq!(rx.recv_timeout(WAIT).unwrap(), Err(Error::Status(Status::Invalid)));
    assert_eq!(&*op.response().unwrap().payload(), &[0; 4]);
}

#[test]
fn response_size_mismatch_is_overflow() {
    let (transport, _host, conn) = setup(None);
    let op = conn.operation_create(TYPE_ECHO, 0, 8).unwrap();
    let (tx, rx) = mpsc::channel();
    op.request_send(move |op| tx.send(op.result()).unwrap()).unwrap();

    let sent = transport.last_frame().unwrap();
    conn.recv(&response_frame(&sent.header(), Status::Success, &[1; 4]));

    assert_eq!(rx.recv_timeout(WAIT).unwrap(), Err(Error::Status(Status::Overflow)));
}

#[test]
fn malformed_and_stray_frames_are_dropped() {
    let (transport, _host, conn) = setup(None);
    let op = conn.operation_create(TYPE_ECHO, 0, 0).unwrap();
    op.request_send(|_| {}).unwrap();
    let sent = transport.last_frame().unwrap();

    // Too short for a header.
    conn.recv(&[0x06, 0x00, 0x01]);
    // Declares more bytes than arrived.
    let mut truncated = response_frame(&sent.header(), Status::Success, &[]);
    truncated[0] = 0x40;
    conn.recv(&truncated);
    // Declares less than a header.
    let mut undersized = response_frame(&sent.header(), Status::Success, &[]);
    undersized[0] = 0x02;
    conn.recv(&undersized);
    // Unknown id.
    let mut stray = sent.header();
    stray.operation_id = stray.operation_id.wrapping_add(100);
    conn.recv(&response_frame(&stray, Status::Success, &[]));

    assert_eq!(op.result_state(), ResultState::InProgress);
    op.cancel(Status::Cancelled);
}

// ── Rejections ────────────────────────────────────────────────

#[test]
fn disabled_connection_never_reaches_transport() {
    let (transport, _host, conn) = setup(None);
    conn.disable();

    let op = conn.operation_create(TYPE_ECHO, 4, 0).unwrap();
    let called = Arc::new(AtomicUsize::new(0));
    let c = Arc::clone(&called);
    let result = op.request_send(move |_| {
        c.fetch_add(1, Ordering::SeqCst);
    });

    assert_eq!(result, Err(Error::Status(Status::NotConnected)));
    assert_eq!(transport.sends(), 0);
    assert_eq!(op.result_state(), ResultState::Unset);
    assert!(!op.is_active());
    std::thread::sleep(Duration::from_millis(50));
    assert_eq!(called.load(Ordering::SeqCst), 0);
}

#[test]
fn oversize_messages_are_refused() {
    let (_transport, host, conn) = setup(None);
    assert_eq!(host.payload_size_max(), 2042);
    assert_eq!(
        conn.operation_create(TYPE_ECHO, 2043, 0).unwrap_err(),
        Error::MessageTooLarge { size: 2049, max: 2048 }
    );
    assert!(matches!(
        conn.operation_create(TYPE_ECHO, 0, 4096),
        Err(Error::MessageTooLarge { .. })
    ));
    assert!(conn.operation_create(TYPE_ECHO, 2042, 2042).is_ok());

    // Sizes past the wire's 16-bit size field must not wrap.
    assert!(matches!(
        conn.operation_create(TYPE_ECHO, usize::MAX, 0),
        Err(Error::MessageTooLarge { .. })
    ));
    assert!(matches!(
        conn.operation_create(TYPE_ECHO, 0, usize::MAX),
        Err(Error::MessageTooLarge { .. })
    ));
    assert_eq!(conn.active_operations(), 0);
}

#[test]
fn reserved_type_rejected_and_response_bit_masked() {
    let (_transport, _host, conn) = setup(None);
    assert_eq!(conn.operation_create(0x00, 0, 0).unwrap_err(), Error::InvalidType(0));

    let op = conn.operation_create(0x82, 0, 0).unwrap();
    assert_eq!(op.operation_type(), 0x02);
    assert!(!op.request().header().is_response());
}

#[test]
fn transport_refusal_is_final_without_callback() {
    let (transport, _host, conn) = setup(None);
    transport.refuse_with(Some(Status::Retry));

    let op = conn.operation_create(TYPE_ECHO, 0, 0).unwrap();
    let called = Arc::new(AtomicUsize::new(0));
    let c = Arc::clone(&called);
    let result = op.request_send(move |_| {
        c.fetch_add(1, Ordering::SeqCst);
    });

    assert_eq!(result, Err(Error::Status(Status::Retry)));
    assert_eq!(op.result_state(), ResultState::Final(Status::Retry));
    assert!(!op.is_active());
    std::thread::sleep(Duration::from_millis(50));
    assert_eq!(called.load(Ordering::SeqCst), 0);
}

#[test]
fn refusal_racing_cancel_completes_once() {
    let (transport, _host, conn) = setup(None);
    transport.refuse_with(Some(Status::Retry));

    for _ in 0..200 {
        let op = conn.operation_create(TYPE_ECHO, 0, 0).unwrap();
        let calls = Arc::new(AtomicUsize::new(0));
        let start = Arc::new(Barrier::new(2));

        let canceller = {
            let op = op.clone();
            let start = Arc::clone(&start);
            std::thread::spawn(move || {
                start.wait();
                op.cancel(Status::Cancelled);
                // cancel() returns only once the operation is inactive.
                op.result_state()
            })
        };

        let c = Arc::clone(&calls);
        start.wait();
        let sent = op.request_send(move |_| {
            c.fetch_add(1, Ordering::SeqCst);
        });
        let seen_by_canceller = canceller.join().unwrap();

        assert_eq!(sent, Err(Error::Status(Status::Retry)));
        match op.result_state() {
            ResultState::Final(Status::Retry) => {
                assert_eq!(calls.load(Ordering::SeqCst), 0);
            }
            ResultState::Final(Status::Cancelled) => {
                assert_eq!(seen_by_canceller, ResultState::Final(Status::Cancelled));
                assert_eq!(calls.load(Ordering::SeqCst), 1);
            }
            other => panic!("unexpected result {other:?}"),
        }
        assert!(eventually(WAIT, || !op.is_active()));
        assert_eq!(conn.active_operations(), 0);
    }
}

#[test]
fn asynchronous_send_failure_completes_operation() {
    let (transport, _host, conn) = setup(None);
    let op = conn.operation_create(TYPE_ECHO, 0, 0).unwrap();
    let (tx, rx) = mpsc::channel();
    op.request_send(move |op| tx.send(op.result()).unwrap()).unwrap();

    assert!(transport.complete_next(Err(Status::Io)));
    assert_eq!(rx.recv_timeout(WAIT).unwrap(), Err(Error::Status(Status::Io)));
    assert!(eventually(WAIT, || !op.is_active()));
}

#[test]
fn resubmitting_in_flight_operation_is_a_malfunction() {
    let (_transport, _host, conn) = setup(None);
    let op = conn.operation_create(TYPE_ECHO, 0, 0).unwrap();
    let (tx, rx) = mpsc::channel();
    op.request_send(move |op| tx.send(op.result()).unwrap()).unwrap();

    assert_eq!(op.request_send(|_| {}), Err(Error::Status(Status::Malfunction)));
    assert_eq!(rx.recv_timeout(WAIT).unwrap(), Err(Error::Status(Status::Malfunction)));
    assert!(eventually(WAIT, || !op.is_active()));
    assert_eq!(conn.active_operations(), 0);
}

// ── Cancellation ──────────────────────────────────────────────

#[test]
fn cancel_is_idempotent_and_beats_late_response() {
    let (transport, _host, conn) = setup(None);
    let op = conn.operation_create(TYPE_ECHO, 0, 0).unwrap();
    let calls = Arc::new(AtomicUsize::new(0));
    let c = Arc::clone(&calls);
    op.request_send(move |_| {
        c.fetch_add(1, Ordering::SeqCst);
    })
    .unwrap();
    let sent = transport.last_frame().unwrap();

    op.cancel(Status::Cancelled);
    op.cancel(Status::Timeout);
    conn.recv(&response_frame(&sent.header(), Status::Success, &[]));

    assert_eq!(op.result_state(), ResultState::Final(Status::Cancelled));
    assert!(!op.is_active());
    std::thread::sleep(Duration::from_millis(50));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[test]
fn cancel_after_completion_keeps_result() {
    let (transport, _host, conn) = setup(None);
    let op = conn.operation_create(TYPE_ECHO, 0, 0).unwrap();
    let (tx, rx) = mpsc::channel();
    op.request_send(move |_| tx.send(()).unwrap()).unwrap();
    let sent = transport.last_frame().unwrap();
    conn.recv(&response_frame(&sent.header(), Status::Success, &[]));
    rx.recv_timeout(WAIT).unwrap();

    op.cancel(Status::Cancelled);
    assert_eq!(op.result(), Ok(()));
}

#[test]
fn cancel_of_unsent_operation_returns_immediately() {
    let (transport, _host, conn) = setup(None);
    let op = conn.operation_create(TYPE_ECHO, 0, 0).unwrap();
    op.cancel(Status::Cancelled);
    assert_eq!(op.result_state(), ResultState::Unset);
    assert_eq!(transport.cancels(), 0);
}

// ── Completion races ──────────────────────────────────────────

#[test]
fn response_racing_cancel_completes_once() {
    let (transport, _host, conn) = setup(None);

    for _ in 0..200 {
        let op = conn.operation_create(TYPE_ECHO, 0, 0).unwrap();
        let calls = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&calls);
        op.request_send(move |_| {
            c.fetch_add(1, Ordering::SeqCst);
        })
        .unwrap();
        transport.complete_all();
        let response = response_frame(&transport.last_frame().unwrap().header(), Status::Success, &[]);

        let start = Arc::new(Barrier::new(2));
        let responder = {
            let conn = conn.clone();
            let start = Arc::clone(&start);
            std::thread::spawn(move || {
                start.wait();
                conn.recv(&response);
            })
        };
        start.wait();
        op.cancel(Status::Cancelled);
        responder.join().unwrap();

        assert!(matches!(op.result(), Ok(()) | Err(Error::Status(Status::Cancelled))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(conn.active_operations(), 0);
    }
}

#[test]
fn response_racing_send_failure_completes_once() {
    let (transport, _host, conn) = setup(None);

    for _ in 0..200 {
        let op = conn.operation_create(TYPE_ECHO, 0, 0).unwrap();
        let calls = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&calls);
        op.request_send(move |_| {
            c.fetch_add(1, Ordering::SeqCst);
        })
        .unwrap();
        let response = response_frame(&transport.last_frame().unwrap().header(), Status::Success, &[]);

        let start = Arc::new(Barrier::new(2));
        let failer = {
            let transport = transport.clone();
            let start = Arc::clone(&start);
            std::thread::spawn(move || {
                start.wait();
                assert!(transport.complete_next(Err(Status::Io)));
            })
        };
        start.wait();
        conn.recv(&response);
        failer.join().unwrap();

        assert!(eventually(WAIT, || !op.is_active()));
        assert!(matches!(op.result(), Ok(()) | Err(Error::Status(Status::Io))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(conn.active_operations(), 0);
    }
}
