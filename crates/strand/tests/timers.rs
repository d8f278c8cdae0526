//! Timer scenarios: ordered ticks with bounded total elapsed time,
//! per-operation timeouts on the busy-loop backend, and in-flight
//! backpressure serialization.

mod common;

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use common::{backends, opts, STACK};
use strand::{BackendKind, Error, Runtime, Socket, Timer};

const TICK: Duration = Duration::from_millis(20);

fn ticker(rt: &Runtime, ticks: Arc<Mutex<Vec<u32>>>) {
    rt.spawn(STACK, move |rt| {
        for i in 0..10u32 {
            ticks.lock().unwrap().push(i);
            Timer::delay(rt, TICK).unwrap();
        }
    })
    .unwrap();
}

#[test]
fn test_ticks_in_order_with_bounded_elapsed() {
    for backend in backends() {
        let ticks = Arc::new(Mutex::new(Vec::new()));
        let rt = Runtime::new(opts(backend)).unwrap();

        let start = Instant::now();
        rt.entry(Arc::clone(&ticks), ticker).unwrap();
        let elapsed = start.elapsed();

        assert_eq!(*ticks.lock().unwrap(), (0..10).collect::<Vec<_>>());
        assert!(elapsed >= TICK * 9, "backend {:?}: {:?}", backend, elapsed);
        // Generous upper bound; CI schedulers are noisy.
        assert!(elapsed < TICK * 40, "backend {:?}: {:?}", backend, elapsed);
    }
}

fn serialized_delays(rt: &Runtime, spans: Arc<Mutex<Vec<(Instant, Instant)>>>) {
    for _ in 0..2 {
        let spans = Arc::clone(&spans);
        rt.spawn(STACK, move |rt| {
            let begin = Instant::now();
            Timer::delay(rt, Duration::from_millis(40)).unwrap();
            spans.lock().unwrap().push((begin, Instant::now()));
        })
        .unwrap();
    }
}

/// With a single in-flight job slot, the second delay cannot be issued
/// until the first completes: the two 40 ms delays take at least 80 ms
/// end to end instead of overlapping.
#[test]
fn test_backpressure_serializes_submissions() {
    let spans = Arc::new(Mutex::new(Vec::new()));
    let rt = Runtime::new(opts(BackendKind::Busy).size_aio_jobs_max(1)).unwrap();

    let start = Instant::now();
    rt.entry(Arc::clone(&spans), serialized_delays).unwrap();
    let total = start.elapsed();

    assert_eq!(spans.lock().unwrap().len(), 2);
    assert!(
        total >= Duration::from_millis(80),
        "delays overlapped: {:?}",
        total
    );
}

fn stalled_recv(rt: &Runtime, observed: Arc<Mutex<Option<Error>>>) {
    let listener = Socket::init(&strand::Endpoint::tcp("127.0.0.1", 0)).unwrap();
    listener.bind().unwrap();
    listener.listen(4).unwrap();
    let port = listener.local_port().unwrap();

    rt.spawn(STACK, move |rt| {
        let conn = listener.accept(rt).unwrap();
        let mut buf = [0u8; 8];
        // The peer never sends; only ms_operation_max can finish this.
        *observed.lock().unwrap() = conn.recv(rt, &mut buf).err();
        conn.close_blocking();
        listener.close_blocking();
    })
    .unwrap();

    rt.spawn(STACK, move |rt| {
        let client = Socket::init(&strand::Endpoint::tcp("127.0.0.1", port)).unwrap();
        client.connect(rt).unwrap();
        // Keep the peer alive well past the operation deadline, then
        // hand the socket to the runtime for cleanup.
        Timer::delay(rt, Duration::from_millis(200)).unwrap();
        client.close_blocking();
    })
    .unwrap();
}

/// A never-completing operation is reaped as Timeout within
/// ms_operation_max plus slack, on the busy-loop backend only.
#[test]
fn test_operation_timeout_on_busy_backend() {
    let observed = Arc::new(Mutex::new(None));
    let rt = Runtime::new(opts(BackendKind::Busy).ms_operation_max(50)).unwrap();

    let start = Instant::now();
    rt.entry(Arc::clone(&observed), stalled_recv).unwrap();

    assert_eq!(*observed.lock().unwrap(), Some(Error::Timeout));
    assert!(start.elapsed() < Duration::from_secs(2));
}

/// Setting ms_operation_max on a non-busy backend has no effect: the
/// recv outlives the would-be deadline and completes normally.
#[cfg(target_os = "linux")]
#[test]
fn test_operation_timeout_ignored_on_poll_backend() {
    fn late_send(rt: &Runtime, got: Arc<Mutex<Option<usize>>>) {
        let listener = Socket::init(&strand::Endpoint::tcp("127.0.0.1", 0)).unwrap();
        listener.bind().unwrap();
        listener.listen(4).unwrap();
        let port = listener.local_port().unwrap();

        rt.spawn(STACK, move |rt| {
            let conn = listener.accept(rt).unwrap();
            let mut buf = [0u8; 8];
            // Waits far past ms_operation_max; must still succeed.
            let n = conn.recv(rt, &mut buf).unwrap();
            assert_eq!(&buf[..n], b"late");
            *got.lock().unwrap() = Some(n);
            conn.close_blocking();
            listener.close_blocking();
        })
        .unwrap();

        rt.spawn(STACK, move |rt| {
            let client = Socket::init(&strand::Endpoint::tcp("127.0.0.1", port)).unwrap();
            client.connect(rt).unwrap();
            Timer::delay(rt, Duration::from_millis(120)).unwrap();
            client.send_all(rt, b"late").unwrap();
            client.close(rt).unwrap();
        })
        .unwrap();
    }

    let got = Arc::new(Mutex::new(None));
    let rt = Runtime::new(opts(BackendKind::Poll).ms_operation_max(20)).unwrap();
    rt.entry(Arc::clone(&got), late_send).unwrap();
    assert_eq!(*got.lock().unwrap(), Some(4));
}
