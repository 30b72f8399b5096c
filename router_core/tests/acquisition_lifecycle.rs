//! Acquisition thread lifecycle: startup, backpressure, clean shutdown.

use std::time::{Duration, Instant};

use router_core::mocks::{NoopAdc, ScriptedAdc};
use router_core::Acquisition;

fn burst(t_us: u64) -> (u64, Vec<u16>) {
    (t_us, vec![2048; 400])
}

#[test]
fn delivers_scripted_bursts_in_order() {
    let adc = ScriptedAdc::new(vec![burst(0), burst(10_000), burst(20_000)]);
    let acq = Acquisition::spawn(adc, 8, Duration::from_millis(5));

    let mut stamps = Vec::new();
    for _ in 0..3 {
        let b = acq
            .recv_timeout(Duration::from_secs(1))
            .expect("burst should arrive");
        assert_eq!(b.samples.len(), 400);
        stamps.push(b.t_us);
    }
    assert_eq!(stamps, vec![0, 10_000, 20_000]);
    assert_eq!(acq.counters().snapshot().bursts_produced, 3);
}

#[test]
fn full_queue_drops_instead_of_blocking() {
    let adc = ScriptedAdc::new((0..5).map(|i| burst(i * 10_000)).collect());
    let acq = Acquisition::spawn(adc, 2, Duration::from_millis(5));
    let counters = acq.counters();

    // Let the producer burn through the script without consuming anything.
    let deadline = Instant::now() + Duration::from_secs(2);
    while counters.snapshot().bursts_produced < 5 {
        assert!(Instant::now() < deadline, "producer stalled");
        std::thread::sleep(Duration::from_millis(1));
    }

    let snap = counters.snapshot();
    assert_eq!(snap.bursts_produced, 5);
    assert_eq!(snap.bursts_dropped, 3, "two queued, three dropped");

    // The two queued bursts are the oldest ones.
    let first = acq.recv_timeout(Duration::from_millis(100)).unwrap();
    let second = acq.recv_timeout(Duration::from_millis(100)).unwrap();
    assert_eq!((first.t_us, second.t_us), (0, 10_000));
    assert!(acq.try_recv().is_none());
}

#[test]
fn stop_is_idempotent_and_joins() {
    let adc = NoopAdc;
    let mut acq = Acquisition::spawn(adc, 4, Duration::from_millis(2));
    std::thread::sleep(Duration::from_millis(10));
    acq.stop();
    acq.stop();
    assert_eq!(acq.counters().snapshot().bursts_produced, 0);
}

#[test]
fn drop_shuts_the_thread_down_promptly() {
    let started = Instant::now();
    {
        let adc = NoopAdc;
        let _acq = Acquisition::spawn(adc, 4, Duration::from_millis(2));
        std::thread::sleep(Duration::from_millis(5));
    }
    // Join happens in Drop; a stuck thread would hang well past this.
    assert!(started.elapsed() < Duration::from_secs(1));
}
