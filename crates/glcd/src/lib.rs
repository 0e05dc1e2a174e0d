//! # GLCD - Game Server Hub Daemon
//!
//! Consumes the server topic from NSQ, tracks which game clients are alive,
//! stores zones in MongoDB and answers clients on their own topics. This
//! entry point handles CLI parsing, configuration loading, and application
//! lifecycle management.
//!
//! ## Quick Start
//!
//! ```bash
//! # Run with default configuration (writes glcd.toml if missing)
//! glcd
//!
//! # Specify custom configuration
//! glcd --config production.toml
//!
//! # Override specific settings
//! glcd --nsqd 10.0.0.1:4150 --lookupd 10.0.0.1:4161 --log-level debug
//!
//! # Try it without MongoDB
//! glcd --memory-store
//! ```
//!
//! ## Signal Handling
//!
//! SIGINT, SIGTERM and SIGHUP start a graceful shutdown; a second signal
//! exits immediately.

use tracing::error;

pub mod app;
pub mod cli;
pub mod config;
pub mod logging;
pub mod signals;

use app::Application;
use cli::CliArgs;
use config::AppConfig;

/// Main entry point for the daemon.
///
/// Handles the complete application lifecycle including:
/// 1. Command-line argument parsing
/// 2. Logging system initialization
/// 3. Configuration loading and validation
/// 4. Application creation and execution
///
/// # Exit Codes
///
/// * **0**: Successful execution and shutdown
/// * **1**: Error during startup, configuration, or runtime
///
/// Called from `main` inside the tokio runtime.
pub async fn init() -> Result<(), Box<dyn std::error::Error>> {
    let args = CliArgs::parse();

    // Logging comes up before the configuration is validated, so a broken
    // file falls back to default logging and is reported by `Application::new`.
    let mut config = AppConfig::load_from_file(&args.config_path)
        .await
        .unwrap_or_default();
    config.apply_cli(&args);

    if let Err(e) = logging::setup_logging(&config.logging, args.json_logs) {
        eprintln!("❌ Failed to setup logging: {e}");
        std::process::exit(1);
    }

    match Application::new(args).await {
        Ok(app) => {
            if let Err(e) = app.run().await {
                error!("❌ Application error: {}", e);
                std::process::exit(1);
            }
        }
        Err(e) => {
            error!("❌ Failed to start application: {}", e);
            std::process::exit(1);
        }
    }

    Ok(())
}

pub use config::{AuthSettings, HubSettings, LoggingSettings, MongoSettings, NsqSettings, SupervisorSettings};
