//! Tracing subscriber setup: console plus optional rolling file.

use std::path::Path;

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::cli::FILE_GUARD;

/// Initialize the global subscriber. `RUST_LOG` overrides `level` when set.
/// When `file` is given, a JSON-lines copy of the logs goes there as well,
/// rotated per `rotation` ("never" | "daily" | "hourly").
pub fn init(json: bool, level: &str, file: Option<&Path>, rotation: &str) -> eyre::Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .map_err(|e| eyre::eyre!("invalid log level '{level}': {e}"))?;

    let file_layer = match file {
        Some(path) => {
            let dir = path.parent().unwrap_or_else(|| Path::new("."));
            let name = path
                .file_name()
                .map_or_else(|| "router.log".into(), |n| n.to_string_lossy().into_owned());
            let appender = match rotation {
                "daily" => tracing_appender::rolling::daily(dir, name),
                "hourly" => tracing_appender::rolling::hourly(dir, name),
                _ => tracing_appender::rolling::never(dir, name),
            };
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let _ = FILE_GUARD.set(guard);
            Some(fmt::layer().json().with_writer(writer).with_ansi(false))
        }
        None => None,
    };

    let registry = tracing_subscriber::registry().with(filter).with(file_layer);
    if json {
        registry.with(fmt::layer().json().with_ansi(false)).init();
    } else {
        registry.with(fmt::layer().compact()).init();
    }
    Ok(())
}
