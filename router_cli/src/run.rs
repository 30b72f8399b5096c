//! Config loading and the `run` / `self-check` commands.

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use eyre::{eyre, Result, WrapErr};
use router_config::Config;
use router_core::{RouterMode, RunParams, ZeroCrossClock};
use router_hardware::{SimChannel, SimMainsAdc};
use router_traits::{AdcBurst, MonotonicClock, TriacGate};

use crate::cli::JSON_MODE;

pub struct RunOpts {
    pub duration_s: Option<u64>,
    pub mode: Option<String>,
    pub manual_level: Option<u8>,
    pub stats: bool,
}

pub fn load_config(path: &Path) -> Result<Config> {
    let text = std::fs::read_to_string(path)
        .wrap_err_with(|| format!("failed to read config {}", path.display()))?;
    let cfg = router_config::load_toml(&text).wrap_err("failed to parse config TOML")?;
    cfg.validate()?;
    Ok(cfg)
}

/// Fold a calibration CSV into the grid current channel.
pub fn apply_calibration(cfg: &mut Config, path: &Path) -> Result<()> {
    let cal = router_config::load_calibration_csv(path)?;
    let ch = cfg
        .channels
        .iter_mut()
        .find(|c| c.enabled && matches!(c.sensor, router_config::SensorKind::CurrentGrid))
        .ok_or_else(|| eyre!("calibration requires an enabled grid current channel"))?;
    ch.multiplier = cal.multiplier;
    ch.offset = Some(cal.offset);
    tracing::info!(
        multiplier = cal.multiplier,
        offset = cal.offset,
        "calibration applied to grid channel"
    );
    Ok(())
}

/// Simulated waveforms per sensor role: exporting grid so the closed loop
/// has something to route, modest solar and load currents.
fn sim_channels(cfg: &Config) -> Vec<SimChannel> {
    cfg.channels
        .iter()
        .filter(|c| c.enabled)
        .map(|c| match c.sensor {
            router_config::SensorKind::VoltageAc => SimChannel::voltage(1_300.0),
            router_config::SensorKind::CurrentGrid => SimChannel::current(-800.0),
            router_config::SensorKind::CurrentSolar => SimChannel::current(600.0),
            _ => SimChannel::current(400.0),
        })
        .collect()
}

pub fn run(cfg: &Config, opts: &RunOpts) -> Result<()> {
    let params = RunParams::from_config(cfg);
    let zero_cross = Arc::new(ZeroCrossClock::new(u64::from(
        cfg.dimmer.min_edge_interval_us,
    )));

    #[cfg(all(feature = "hardware", target_os = "linux"))]
    let (mut router, _zc_pin) = {
        use router_hardware::{GpioGate, SpiAdc, ZeroCrossPin};
        let spi_channels: Vec<u8> = cfg
            .channels
            .iter()
            .filter(|c| c.enabled)
            .map(|c| c.pin)
            .collect();
        let adc = SpiAdc::new(
            spi_channels,
            cfg.acquisition.sample_rate_hz,
            cfg.acquisition.burst_ms,
        )?;
        let mut gates: Vec<(u8, Box<dyn TriacGate + Send>)> = Vec::new();
        for &pin in &cfg.dimmer.pins {
            gates.push((pin, Box::new(GpioGate::new(pin)?)));
        }
        let edge_clock = Arc::clone(&zero_cross);
        let zc_pin = ZeroCrossPin::new(cfg.dimmer.zc_pin, move |t_us| {
            edge_clock.on_edge(t_us);
        })?;
        let router = router_core::spawn(
            adc,
            gates,
            Arc::clone(&zero_cross),
            params,
            Arc::new(MonotonicClock::new()),
        )?;
        (router, zc_pin)
    };

    #[cfg(not(all(feature = "hardware", target_os = "linux")))]
    let mut router = {
        let edge_clock = Arc::clone(&zero_cross);
        let adc = SimMainsAdc::new(
            sim_channels(cfg),
            cfg.acquisition.sample_rate_hz,
            cfg.acquisition.burst_ms,
            50.0,
        )
        .with_edge_sink(move |t_us| {
            edge_clock.on_edge(t_us);
        });
        let gates: Vec<(u8, Box<dyn TriacGate + Send>)> = cfg
            .dimmer
            .pins
            .iter()
            .map(|&pin| {
                (
                    pin,
                    Box::new(router_hardware::SimGate::new()) as Box<dyn TriacGate + Send>,
                )
            })
            .collect();
        tracing::info!("no hardware backend built in, running against the simulator");
        router_core::spawn(
            adc,
            gates,
            Arc::clone(&zero_cross),
            params,
            Arc::new(MonotonicClock::new()),
        )?
    };

    let handle = router.handle();
    if let Some(mode) = &opts.mode {
        let m: RouterMode = mode.parse().map_err(|e: String| eyre!(e))?;
        handle.set_mode(m)?;
    }
    if let Some(level) = opts.manual_level {
        handle.set_manual_level(level);
    }

    let shutdown = Arc::new(AtomicBool::new(false));
    {
        let shutdown = Arc::clone(&shutdown);
        let handle = handle.clone();
        ctrlc::set_handler(move || {
            handle.emergency_stop();
            shutdown.store(true, Ordering::Relaxed);
        })
        .wrap_err("failed to install signal handler")?;
    }

    let started = Instant::now();
    let deadline = opts.duration_s.map(|s| started + Duration::from_secs(s));
    loop {
        if shutdown.load(Ordering::Relaxed) {
            tracing::info!("interrupted, shutting down");
            break;
        }
        if let Some(d) = deadline
            && Instant::now() >= d
        {
            break;
        }
        std::thread::sleep(Duration::from_millis(200));

        if started.elapsed().as_millis() % 1_000 < 200 {
            let s = handle.status();
            tracing::info!(
                mode = %s.mode,
                state = %s.state,
                target = s.target_level,
                grid_w = ?s.grid_power_w,
                solar_w = ?s.solar_power_w,
                mains_hz = s.mains_hz,
                valid = s.valid,
                "status"
            );
        }
    }
    router.stop();

    if opts.stats {
        print_stats(&handle);
    }
    Ok(())
}

fn print_stats(handle: &router_core::RouterHandle) {
    let d = handle.diagnostics();
    if JSON_MODE.get().copied().unwrap_or(false) {
        let obj = serde_json::json!({
            "bursts_produced": d.counters.bursts_produced,
            "bursts_dropped": d.counters.bursts_dropped,
            "frames_processed": d.counters.frames_processed,
            "windows_completed": d.counters.windows_completed,
            "zero_cross_edges": d.zero_cross_edges,
            "mains_hz": d.mains_hz,
        });
        println!("{obj}");
    } else {
        println!(
            "bursts: {} produced, {} dropped; frames: {}; windows: {}; edges: {}; mains: {:.2} Hz",
            d.counters.bursts_produced,
            d.counters.bursts_dropped,
            d.counters.frames_processed,
            d.counters.windows_completed,
            d.zero_cross_edges,
            d.mains_hz,
        );
    }
}

/// Exercise the acquisition path once without starting the pipeline.
pub fn self_check(cfg: &Config) -> Result<()> {
    let mut adc = SimMainsAdc::new(
        sim_channels(cfg),
        cfg.acquisition.sample_rate_hz,
        cfg.acquisition.burst_ms,
        50.0,
    )
    .unpaced();
    let mut buf = Vec::new();
    adc.read_burst(&mut buf, Duration::from_millis(100))
        .map_err(|e| eyre!("simulated acquisition failed: {e}"))?;
    if buf.is_empty() {
        eyre::bail!("simulated acquisition produced no samples");
    }
    println!(
        "self-check: ok ({} samples per burst, {} channels)",
        buf.len(),
        cfg.channels.iter().filter(|c| c.enabled).count()
    );
    Ok(())
}
