//! TOML schema and calibration loader tests.

use std::io::Write;

use rstest::rstest;
use router_config::{load_calibration_csv, load_toml, CalibrationRow, ChannelCalibration};

const SAMPLE: &str = r#"
[[channel]]
pin = 0
sensor = "voltage_ac"
multiplier = 0.25
offset = 2048.0

[[channel]]
pin = 1
sensor = "current_grid"
multiplier = 0.01

[dimmer]
pins = [25, 26]
zc_pin = 27

[control]
gain = 200.0
startup_mode = "auto"
"#;

#[test]
fn sample_parses_and_validates() {
    let cfg = load_toml(SAMPLE).unwrap();
    cfg.validate().unwrap();
    assert_eq!(cfg.channels.len(), 2);
    assert!(cfg.channels[0].enabled, "enabled defaults to true");
    assert!(cfg.channels[1].offset.is_none(), "offset defaults to auto");
    assert_eq!(cfg.acquisition.sample_rate_hz, 20_000);
    assert_eq!(cfg.dimmer.curve, router_config::CurveCfg::Rms);
    assert_eq!(cfg.control.startup_mode, router_config::StartupMode::Auto);
}

#[test]
fn empty_document_gets_full_defaults() {
    let cfg = load_toml("").unwrap();
    cfg.validate().unwrap();
    assert!(cfg.channels.is_empty());
    assert_eq!(cfg.dimmer.pins, vec![25, 26]);
    assert_eq!(cfg.control.gain, 200.0);
    assert_eq!(cfg.control.balance_threshold_w, 10.0);
}

#[rstest]
#[case("gain = 200.0", "gain = 9.0", "control.gain")]
#[case("gain = 200.0", "gain = 1001.0", "control.gain")]
#[case("pins = [25, 26]", "pins = []", "dimmer.pins")]
#[case("multiplier = 0.25", "multiplier = 0.0", "multiplier")]
#[case("offset = 2048.0", "offset = 5000.0", "offset")]
fn validation_rejects_out_of_range_fields(
    #[case] from: &str,
    #[case] to: &str,
    #[case] expect_in_message: &str,
) {
    let cfg = load_toml(&SAMPLE.replace(from, to)).unwrap();
    let err = cfg.validate().unwrap_err().to_string();
    assert!(err.contains(expect_in_message), "message was: {err}");
}

#[test]
fn duplicate_grid_channel_rejected() {
    let doubled = format!(
        "{SAMPLE}\n[[channel]]\npin = 2\nsensor = \"current_grid\"\nmultiplier = 0.01\n"
    );
    let cfg = load_toml(&doubled).unwrap();
    let err = cfg.validate().unwrap_err().to_string();
    assert!(err.contains("CurrentGrid"), "message was: {err}");
}

#[test]
fn disabled_duplicate_is_tolerated() {
    let doubled = format!(
        "{SAMPLE}\n[[channel]]\npin = 2\nsensor = \"current_grid\"\nmultiplier = 0.01\nenabled = false\n"
    );
    let cfg = load_toml(&doubled).unwrap();
    cfg.validate().unwrap();
}

#[test]
fn five_channels_rejected() {
    let mut doc = SAMPLE.to_string();
    for pin in 2..5 {
        doc.push_str(&format!(
            "\n[[channel]]\npin = {pin}\nsensor = \"current_load{}\"\nmultiplier = 0.01\n",
            pin - 1
        ));
    }
    let cfg = load_toml(&doc).unwrap();
    let err = cfg.validate().unwrap_err().to_string();
    assert!(err.contains("at most 4"), "message was: {err}");
}

#[test]
fn output_channel_must_reference_a_pin() {
    let doc = SAMPLE.replace("gain = 200.0", "gain = 200.0\noutput_channel = 2");
    let cfg = load_toml(&doc).unwrap();
    let err = cfg.validate().unwrap_err().to_string();
    assert!(err.contains("output_channel"), "message was: {err}");
}

#[test]
fn calibration_fit_recovers_line() {
    // value = 0.01 * (raw - 2000)
    let rows: Vec<CalibrationRow> = [(2000, 0.0), (2500, 5.0), (3000, 10.0), (1500, -5.0)]
        .iter()
        .map(|&(raw, value)| CalibrationRow { raw, value })
        .collect();
    let cal = ChannelCalibration::from_rows(&rows).unwrap();
    assert!((cal.multiplier - 0.01).abs() < 1e-6);
    assert!((cal.offset - 2000.0).abs() < 1e-3);
}

#[test]
fn calibration_refit_shrugs_off_an_outlier() {
    let mut rows: Vec<CalibrationRow> = (0..10)
        .map(|i| CalibrationRow {
            raw: 2000 + i * 100,
            value: i as f32,
        })
        .collect();
    rows.push(CalibrationRow {
        raw: 2450,
        value: 40.0,
    });
    let cal = ChannelCalibration::from_rows(&rows).unwrap();
    assert!((cal.multiplier - 0.01).abs() < 2e-3, "multiplier {}", cal.multiplier);
    assert!((cal.offset - 2000.0).abs() < 60.0, "offset {}", cal.offset);
}

#[test]
fn single_row_is_not_enough() {
    let rows = [CalibrationRow { raw: 2048, value: 0.0 }];
    assert!(ChannelCalibration::from_rows(&rows).is_err());
}

#[test]
fn csv_headers_are_strict() {
    let mut f = tempfile::NamedTempFile::new().unwrap();
    f.write_all(b"raw,grams\n100,1.0\n200,2.0\n").unwrap();
    let err = load_calibration_csv(f.path()).unwrap_err().to_string();
    assert!(err.contains("raw,value"), "message was: {err}");
}

#[test]
fn csv_round_trip() {
    let mut f = tempfile::NamedTempFile::new().unwrap();
    f.write_all(b"raw,value\n1931,0.0\n2406,5.0\n2881,10.0\n")
        .unwrap();
    let cal = load_calibration_csv(f.path()).unwrap();
    assert!((cal.multiplier - 5.0 / 475.0).abs() < 1e-5);
    assert!((cal.offset - 1931.0).abs() < 1.0);
}
