//! Connection lifecycle: connect, disconnect, loss detection, and the
//! wait-for-connection poller.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use flightdeck::{
    ConnectionState, FailReason, IpcResult, MemoryTransport, QueueSnapshot, Request,
    SchedulerState, SimClient, SimListener, SimTarget, WireFormat,
};
use tokio::time::sleep;

#[derive(Default)]
struct Lifecycle {
    connected: AtomicUsize,
    disconnected: AtomicUsize,
    failures: std::sync::Mutex<Vec<FailReason>>,
}

impl SimListener for Lifecycle {
    fn on_connected(&self) {
        self.connected.fetch_add(1, Ordering::SeqCst);
    }

    fn on_disconnected(&self) {
        self.disconnected.fetch_add(1, Ordering::SeqCst);
    }

    fn on_process(&self, _snapshot: &QueueSnapshot) {}

    fn on_fail(&self, reason: FailReason) {
        self.failures.lock().unwrap().push(reason);
    }
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_env_filter("flightdeck=trace").try_init();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn connect_and_disconnect_fire_lifecycle_events_once() {
    init_tracing();
    let client = SimClient::new(MemoryTransport::new());
    let lifecycle = Arc::new(Lifecycle::default());
    client.add_listener(lifecycle.clone());

    assert_ne!(client.connect(SimTarget::Any).unwrap(), 0);
    assert_eq!(client.state(), ConnectionState::Connected);
    assert_eq!(lifecycle.connected.load(Ordering::SeqCst), 1);

    client.disconnect().await;
    assert_eq!(client.state(), ConnectionState::Disconnected);
    assert_eq!(lifecycle.disconnected.load(Ordering::SeqCst), 1);

    // Disconnecting again is legal and quiet.
    client.disconnect().await;
    assert_eq!(lifecycle.disconnected.load(Ordering::SeqCst), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn failed_connect_is_silent() {
    init_tracing();
    let client = SimClient::new(MemoryTransport::without_simulator());
    let lifecycle = Arc::new(Lifecycle::default());
    client.add_listener(lifecycle.clone());

    assert_eq!(client.connect(SimTarget::Any).unwrap(), 0);
    assert_eq!(client.state(), ConnectionState::Disconnected);
    assert_eq!(lifecycle.connected.load(Ordering::SeqCst), 0);
    assert!(lifecycle.failures.lock().unwrap().is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn wait_for_connection_connects_when_the_simulator_appears() {
    init_tracing();
    let transport = MemoryTransport::without_simulator();
    let client = SimClient::new(transport.clone());
    let lifecycle = Arc::new(Lifecycle::default());
    client.add_listener(lifecycle.clone());

    client.wait_for_connection(SimTarget::Any, Duration::from_millis(50));
    sleep(Duration::from_millis(120)).await;
    assert!(!client.is_connected());
    // Absent-target polls are the quiet sentinel, never a failure.
    assert!(lifecycle.failures.lock().unwrap().is_empty());

    transport.set_simulator(Some(SimTarget::Any));
    sleep(Duration::from_millis(200)).await;

    assert!(client.is_connected());
    assert_eq!(lifecycle.connected.load(Ordering::SeqCst), 1);
    client.disconnect().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn wait_for_connection_while_connected_is_a_no_op() {
    init_tracing();
    let client = SimClient::new(MemoryTransport::new());
    let lifecycle = Arc::new(Lifecycle::default());
    client.add_listener(lifecycle.clone());
    assert_ne!(client.connect(SimTarget::Any).unwrap(), 0);

    // The goal state is already met: no poller, no callbacks, no churn.
    client.wait_for_connection(SimTarget::Any, Duration::from_millis(20));
    sleep(Duration::from_millis(250)).await;

    assert!(client.is_connected());
    assert!(lifecycle.failures.lock().unwrap().is_empty());
    assert_eq!(lifecycle.connected.load(Ordering::SeqCst), 1);
    client.disconnect().await;
}

#[test]
fn connect_while_connected_reports_already_open() {
    init_tracing();
    let client = SimClient::new(MemoryTransport::new());
    let lifecycle = Arc::new(Lifecycle::default());
    client.add_listener(lifecycle.clone());

    assert_ne!(client.connect(SimTarget::Any).unwrap(), 0);
    let second = client.connect(SimTarget::Any);
    assert!(matches!(
        second,
        Err(flightdeck::LinkError::Transport { result: IpcResult::AlreadyOpen })
    ));
    assert_eq!(lifecycle.connected.load(Ordering::SeqCst), 1);
    assert_eq!(client.state(), ConnectionState::Connected);
}

#[test]
fn concurrent_connect_attempts_yield_one_transition() {
    init_tracing();
    let client = Arc::new(SimClient::new(MemoryTransport::new()));
    let lifecycle = Arc::new(Lifecycle::default());
    client.add_listener(lifecycle.clone());

    let barrier = Arc::new(std::sync::Barrier::new(2));
    let attempts: Vec<_> = (0..2)
        .map(|_| {
            let client = Arc::clone(&client);
            let barrier = Arc::clone(&barrier);
            std::thread::spawn(move || {
                barrier.wait();
                client.connect(SimTarget::Any)
            })
        })
        .collect();
    let results: Vec<_> = attempts.into_iter().map(|t| t.join().unwrap()).collect();

    // One attempt opens the single session; the loser observes the
    // already-connected state instead of opening a second one.
    let sessions = results.iter().filter(|r| matches!(r, Ok(s) if *s != 0)).count();
    let already_open = results
        .iter()
        .filter(|r| {
            matches!(
                r,
                Err(flightdeck::LinkError::Transport { result: IpcResult::AlreadyOpen })
            )
        })
        .count();
    assert_eq!((sessions, already_open), (1, 1), "got {results:?}");
    assert_eq!(lifecycle.connected.load(Ordering::SeqCst), 1);
    assert!(client.is_connected());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn disconnect_cancels_the_poller() {
    init_tracing();
    let transport = MemoryTransport::without_simulator();
    let client = SimClient::new(transport.clone());

    client.wait_for_connection(SimTarget::Any, Duration::from_millis(50));
    client.disconnect().await;

    // The poller is gone: even once the simulator appears, nobody
    // connects on our behalf.
    transport.set_simulator(Some(SimTarget::Any));
    sleep(Duration::from_millis(200)).await;
    assert_eq!(client.state(), ConnectionState::Disconnected);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn simulator_loss_during_processing_disconnects_and_halts() {
    init_tracing();
    let transport = MemoryTransport::new();
    let client = SimClient::new(transport.clone());
    let lifecycle = Arc::new(Lifecycle::default());
    client.add_listener(lifecycle.clone());

    assert_ne!(client.connect(SimTarget::Any).unwrap(), 0);
    client.add_continual_request(Request::read(0x0570, WireFormat::I64).unwrap());
    client.start_processing(Duration::from_millis(50), true).unwrap();
    sleep(Duration::from_millis(120)).await;

    transport.set_simulator(None);
    sleep(Duration::from_millis(200)).await;

    assert_eq!(client.state(), ConnectionState::Disconnected);
    assert_eq!(client.scheduler_state(), SchedulerState::Idle);
    assert_eq!(lifecycle.disconnected.load(Ordering::SeqCst), 1);
    assert_eq!(client.last_result(), IpcResult::NoSim);
    assert!(
        lifecycle.failures.lock().unwrap().contains(&FailReason::Transport(IpcResult::NoSim))
    );
    client.disconnect().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn reconnect_after_loss_restores_processing() {
    init_tracing();
    let transport = MemoryTransport::new();
    let client = SimClient::new(transport.clone());

    assert_ne!(client.connect(SimTarget::Any).unwrap(), 0);
    let altitude = Request::read(0x0570, WireFormat::I64).unwrap();
    client.add_continual_request(altitude.clone());
    client.start_processing(Duration::from_millis(50), true).unwrap();
    sleep(Duration::from_millis(120)).await;

    transport.set_simulator(None);
    sleep(Duration::from_millis(150)).await;
    assert!(!client.is_connected());

    // Caller-driven re-arm: wait for the simulator, then start again.
    client.wait_for_connection(SimTarget::Any, Duration::from_millis(30));
    transport.set_simulator(Some(SimTarget::Any));
    sleep(Duration::from_millis(150)).await;
    assert!(client.is_connected());

    transport.seed(0x0570, &((500i64 << 32) | 0x8000_0000).to_le_bytes());
    client.start_processing(Duration::from_millis(50), true).unwrap();
    sleep(Duration::from_millis(120)).await;
    assert_eq!(altitude.value().unwrap().as_i64(), Some((500i64 << 32) | 0x8000_0000));

    client.disconnect().await;
}
