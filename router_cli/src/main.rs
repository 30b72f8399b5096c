#![cfg_attr(all(not(debug_assertions), not(test)), deny(warnings))]
#![warn(clippy::pedantic, clippy::nursery)]
#![cfg_attr(not(test), deny(clippy::unwrap_used, clippy::expect_used))]
#![allow(clippy::missing_errors_doc)]

mod cli;
mod error_fmt;
mod logging;
mod rt;
mod run;

use std::path::Path;

use clap::Parser;

use crate::cli::{Cli, Commands, RtLock, JSON_MODE};
use crate::error_fmt::{exit_code_for_error, format_error_json, humanize};
use crate::run::RunOpts;

fn real_main() -> i32 {
    let _ = color_eyre::install();
    let args = Cli::parse();
    let _ = JSON_MODE.set(args.json);

    // The config also carries logging settings, so load it first; a broken
    // config still gets console logging from the CLI flags.
    let cfg_result = run::load_config(&args.config);
    let (level, file, rotation) = match &cfg_result {
        Ok(cfg) => (
            if args.log_level == "info" {
                cfg.logging.level.clone().unwrap_or_else(|| "info".into())
            } else {
                args.log_level.clone()
            },
            cfg.logging.file.clone(),
            cfg.logging.rotation.clone().unwrap_or_else(|| "never".into()),
        ),
        Err(_) => (args.log_level.clone(), None, "never".into()),
    };
    if let Err(e) = logging::init(args.json, &level, file.as_deref().map(Path::new), &rotation) {
        eprintln!("Error: {e}");
        return 1;
    }

    let result = match args.cmd {
        Commands::ValidateConfig => cfg_result.map(|_| {
            println!("config ok: {}", args.config.display());
        }),
        Commands::SelfCheck => cfg_result.and_then(|cfg| run::self_check(&cfg)),
        Commands::Run {
            duration_s,
            mode,
            manual_level,
            stats,
            rt,
            rt_prio,
            rt_lock,
            rt_cpu,
        } => cfg_result.and_then(|mut cfg| {
            rt::setup_rt_once(rt, rt_prio, rt_lock.unwrap_or_else(RtLock::os_default), rt_cpu);
            if let Some(cal) = &args.calibration {
                run::apply_calibration(&mut cfg, cal)?;
            }
            run::run(
                &cfg,
                &RunOpts {
                    duration_s,
                    mode,
                    manual_level,
                    stats,
                },
            )
        }),
    };

    match result {
        Ok(()) => 0,
        Err(e) => {
            if JSON_MODE.get().copied().unwrap_or(false) {
                eprintln!("{}", format_error_json(&e));
            } else {
                eprintln!("Error: {}", humanize(&e));
            }
            exit_code_for_error(&e)
        }
    }
}

fn main() {
    std::process::exit(real_main());
}
