//! Tracing subscriber setup and the startup banner.

use crate::config::LoggingSettings;
use tracing::info;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Installs the global subscriber.
///
/// `RUST_LOG` wins over `[logging] level`. JSON output is used when either
/// the file or `--json-logs` asks for it. Fails if a subscriber is already
/// installed or the level is not a valid filter.
pub fn setup_logging(
    config: &LoggingSettings,
    json_override: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(from_env) => from_env,
        Err(_) => EnvFilter::try_new(&config.level)?,
    };
    let json = json_override || config.json_format;

    // Exactly one of the two layers is present.
    let json_layer = json.then(|| {
        fmt::layer()
            .json()
            .flatten_event(true)
            .with_thread_ids(true)
            .with_target(true)
    });
    let text_layer = (!json).then(|| fmt::layer().with_thread_names(true).with_target(false));

    tracing_subscriber::registry()
        .with(filter)
        .with(json_layer)
        .with(text_layer)
        .try_init()?;

    info!(level = %config.level, json, "🔧 Logging initialized");
    Ok(())
}

/// Logs the startup banner.
pub fn display_banner() {
    let version = option_env!("CARGO_PKG_VERSION").unwrap_or("UNK");
    info!("╔══════════════════════════════════════════╗");
    info!("║              🛰️  GLCD HUB  🛰️              ║");
    info!("║                 v{:<24}║", version);
    info!("║                                          ║");
    info!("║  Player state, zones and auth over NSQ   ║");
    info!("║  Zone storage on MongoDB                 ║");
    info!("╚══════════════════════════════════════════╝");
}

