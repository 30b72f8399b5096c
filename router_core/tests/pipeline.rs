//! End-to-end pipeline: scripted ADC through metrology into the control
//! loop, observed via the public handle.

use std::sync::Arc;
use std::time::{Duration, Instant};

use router_core::mocks::{RecordingGate, ScriptedAdc};
use router_core::{
    ChannelConfig, ControlSettings, DimmerCurve, RouterMode, RunParams, SensorKind, ZeroCrossClock,
};
use router_traits::TriacGate;

/// 50 Hz mains with the grid current in anti-phase: pure export.
fn export_bursts(count: u64) -> Vec<(u64, Vec<u16>)> {
    let mut out = Vec::new();
    let mut k = 0u32;
    for b in 0..count {
        let mut samples = Vec::with_capacity(400);
        for _ in 0..200 {
            let theta = 2.0 * std::f32::consts::PI * 50.0 * (k as f32) / 20_000.0;
            samples.push((2048.0 + 1300.0 * theta.sin()).round() as u16);
            samples.push((2048.0 - 1000.0 * theta.sin()).round() as u16);
            k += 1;
        }
        out.push((b * 10_000, samples));
    }
    out
}

fn params() -> RunParams {
    RunParams {
        channels: vec![
            ChannelConfig {
                sensor: SensorKind::VoltageAc,
                multiplier: 0.25,
                offset: Some(2048.0),
            },
            ChannelConfig {
                sensor: SensorKind::CurrentGrid,
                multiplier: 0.01,
                offset: Some(2048.0),
            },
        ],
        sample_rate_hz: 20_000,
        queue_depth: 128,
        burst_timeout: Duration::from_millis(5),
        direction_epsilon_w: 2.0,
        control: ControlSettings::default(),
        curve: DimmerCurve::Rms,
        startup_mode: RouterMode::Auto,
    }
}

#[test]
fn export_drives_the_output_up() {
    let gate = RecordingGate::new();
    let zc = Arc::new(ZeroCrossClock::new(4_000));
    // 60 bursts = 3 full windows of sustained export.
    let adc = ScriptedAdc::new(export_bursts(60));
    let mut router = router_core::spawn(
        adc,
        vec![(25, Box::new(gate.clone()) as Box<dyn TriacGate + Send>)],
        zc,
        params(),
        Arc::new(router_traits::MonotonicClock::new()),
    )
    .unwrap();
    let handle = router.handle();

    let deadline = Instant::now() + Duration::from_secs(5);
    while handle.diagnostics().counters.windows_completed < 3 {
        assert!(Instant::now() < deadline, "pipeline stalled");
        std::thread::sleep(Duration::from_millis(5));
    }

    let status = handle.status();
    assert_eq!(status.mode, RouterMode::Auto);
    // ~1625 W of export at gain 200 moves the target ~8 per window.
    assert!(status.target_level > 10.0, "target {}", status.target_level);
    assert_eq!(status.grid_power_w.map(f32::signum), Some(-1.0));
    assert!(gate.is_armed(), "output should be conducting");

    router.stop();
    assert!(!gate.is_armed(), "shutdown must drive the output off");
    assert_eq!(handle.status().mode, RouterMode::Off);
}

#[test]
fn emergency_stop_through_the_handle() {
    let gate = RecordingGate::new();
    let zc = Arc::new(ZeroCrossClock::new(4_000));
    let adc = ScriptedAdc::new(export_bursts(40));
    let router = router_core::spawn(
        adc,
        vec![(25, Box::new(gate.clone()) as Box<dyn TriacGate + Send>)],
        zc,
        params(),
        Arc::new(router_traits::MonotonicClock::new()),
    )
    .unwrap();
    let handle = router.handle();

    let deadline = Instant::now() + Duration::from_secs(5);
    while handle.diagnostics().counters.windows_completed < 1 {
        assert!(Instant::now() < deadline, "pipeline stalled");
        std::thread::sleep(Duration::from_millis(5));
    }

    handle.emergency_stop();
    let status = handle.status();
    assert_eq!(status.mode, RouterMode::Off);
    assert_eq!(status.target_level, 0.0);
    assert!(!gate.is_armed());
}
