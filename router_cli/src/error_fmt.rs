//! Human-readable error descriptions and structured JSON error formatting.

/// Map an eyre::Report to a human-readable explanation with likely causes
/// and fix hints.
pub fn humanize(err: &eyre::Report) -> String {
    use router_core::{BeginError, RouterError};

    // Typed matches first
    if let Some(be) = err.downcast_ref::<BeginError>() {
        return match be {
            BeginError::NoChannels => {
                "What happened: The dimmer has no output channels.\nLikely causes: Empty [dimmer] pins list in the config.\nHow to fix: Add at least one gate pin to dimmer.pins.".to_string()
            }
            BeginError::Gate { index, reason } => format!(
                "What happened: Dimmer gate {index} failed to initialize ({reason}).\nLikely causes: Wrong GPIO pin number or insufficient GPIO permissions.\nHow to fix: Fix dimmer.pins in the config and ensure the process can access GPIO."
            ),
        };
    }

    if let Some(re) = err.downcast_ref::<RouterError>() {
        return match re {
            RouterError::ModeRejected(reason) => format!(
                "What happened: The requested mode was rejected ({reason}).\nLikely causes: The channel list lacks the sensor that mode depends on.\nHow to fix: Add the missing [[channel]] entry, or pick a mode the sensors support."
            ),
            RouterError::Hardware(msg) | RouterError::HardwareFault(msg) => format!(
                "What happened: A hardware operation failed ({msg}).\nLikely causes: Wiring, power, or GPIO/SPI permission problems.\nHow to fix: Re-run with --log-level=debug and check the pins in the config."
            ),
            RouterError::Config(msg) => format!(
                "What happened: Invalid configuration ({msg}).\nLikely causes: Missing or out-of-range values in the TOML.\nHow to fix: Edit the config file, then rerun. See README for a sample."
            ),
            RouterError::Channel(idx) => format!(
                "What happened: Channel index {idx} does not exist.\nLikely causes: A command referenced more outputs than dimmer.pins defines.\nHow to fix: Use an index below the configured channel count."
            ),
            RouterError::State(msg) => format!(
                "What happened: {msg}.\nLikely causes: An operation ran before initialization completed.\nHow to fix: Re-run with --log-level=debug for the startup sequence."
            ),
        };
    }

    // String-based heuristics for errors coming from init or config
    let msg = err.to_string();
    let lower = msg.to_ascii_lowercase();

    if lower.contains("calibration csv must have headers") {
        return "Invalid headers in calibration CSV. Expected 'raw,value'.".to_string();
    }

    if lower.contains("channel") && (lower.contains("multiplier") || lower.contains("offset")) {
        return "What happened: A channel entry is invalid.\nLikely causes: Zero or non-finite multiplier, or an offset outside 0..4095.\nHow to fix: Fix the [[channel]] entries in the TOML and try again.".to_string();
    }

    // Generic fallback
    let mut cause = String::new();
    if let Some(src) = err.source() {
        cause = format!(" Cause: {src}");
    }
    format!(
        "Something went wrong.{cause}\nHow to fix: Re-run with --log-level=debug for details. Original: {msg}"
    )
}

/// Stable exit codes: 2 mode rejection, 3 hardware, 4 configuration,
/// 1 anything else.
pub fn exit_code_for_error(err: &eyre::Report) -> i32 {
    use router_core::{BeginError, RouterError};
    if err.downcast_ref::<BeginError>().is_some() {
        return 3;
    }
    match err.downcast_ref::<RouterError>() {
        Some(RouterError::ModeRejected(_)) => 2,
        Some(RouterError::Hardware(_) | RouterError::HardwareFault(_)) => 3,
        Some(RouterError::Config(_)) => 4,
        _ => 1,
    }
}

/// Structured JSON for errors when --json is enabled.
pub fn format_error_json(err: &eyre::Report) -> String {
    use router_core::RouterError;
    use serde_json::json;

    let reason = match err.downcast_ref::<RouterError>() {
        Some(RouterError::ModeRejected(_)) => "ModeRejected",
        Some(RouterError::Hardware(_)) => "Hardware",
        Some(RouterError::HardwareFault(_)) => "HardwareFault",
        Some(RouterError::Config(_)) => "Config",
        Some(RouterError::Channel(_)) => "Channel",
        Some(RouterError::State(_)) => "State",
        None => "Error",
    };
    json!({ "reason": reason, "message": humanize(err) }).to_string()
}
