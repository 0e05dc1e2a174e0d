//! Main application logic and lifecycle management.
//!
//! This module contains the `Application` struct that builds the hub from
//! configuration, runs it, and drives graceful shutdown on signals.

use crate::{
    cli::CliArgs,
    config::AppConfig,
    logging::display_banner,
    signals::{wait_for_shutdown, wait_for_shutdown_silent},
};
use glcd_server::{create_hub_with_store, create_nsq_hub, HubServer, MemoryStore};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Extra time on top of the hub's own grace period before the task is abandoned.
const SHUTDOWN_SLACK: Duration = Duration::from_secs(3);

/// Main application struct.
///
/// The `Application` struct manages the complete lifecycle of the daemon:
/// configuration loading, hub construction, signal handling and shutdown.
pub struct Application {
    /// Loaded application configuration
    config: AppConfig,
    /// Whether zones and auth records live in memory
    memory_store: bool,
    /// The hub instance
    hub: HubServer,
}

impl Application {
    /// Creates a new application instance.
    ///
    /// # Arguments
    ///
    /// * `args` - Parsed command-line arguments
    ///
    /// # Returns
    ///
    /// A configured `Application` ready to run, or an error if the
    /// configuration is unreadable or invalid.
    ///
    /// # Process
    ///
    /// 1. Load configuration from file (creating default if missing)
    /// 2. Apply command-line argument overrides
    /// 3. Validate merged configuration
    /// 4. Display startup banner
    /// 5. Connect the store and build the hub
    pub async fn new(args: CliArgs) -> Result<Self, Box<dyn std::error::Error>> {
        info!("🔧 Loading configuration from: {}", args.config_path.display());
        let mut config = AppConfig::load_from_file(&args.config_path).await?;
        config.apply_cli(&args);

        if let Err(e) = config.validate() {
            return Err(format!("Configuration validation failed: {e}").into());
        }
        info!("✅ Configuration loaded and validated successfully");

        display_banner();

        if config.auth.secret.is_empty() {
            warn!("⚠️ auth.secret is empty; password digests use an empty key");
        }

        let hub_config = config.to_hub_config();
        let hub = if args.memory_store {
            warn!("🧪 Using the in-memory store; zones are lost on exit");
            create_hub_with_store(hub_config, Arc::new(MemoryStore::new()))
        } else {
            create_nsq_hub(hub_config).await?
        };

        Ok(Self {
            config,
            memory_store: args.memory_store,
            hub,
        })
    }

    /// Runs the hub until a shutdown signal arrives or the hub fails.
    ///
    /// # Returns
    ///
    /// `Ok(())` after a graceful shutdown, or the hub's error if it stopped
    /// on its own (invalid configuration, a service that kept crashing).
    pub async fn run(self) -> Result<(), Box<dyn std::error::Error>> {
        info!("🌟 Starting GLCD hub");
        self.log_configuration_summary();

        let grace = self.config.to_hub_config().shutdown_grace + SHUTDOWN_SLACK;
        let shutdown = CancellationToken::new();
        let mut hub_handle = {
            let hub = self.hub;
            let shutdown = shutdown.clone();
            tokio::spawn(async move { hub.run(shutdown).await })
        };

        info!("✅ GLCD hub is now running!");
        info!("🛑 Press Ctrl+C to gracefully shutdown");

        tokio::select! {
            signal = wait_for_shutdown() => signal?,
            finished = &mut hub_handle => {
                return match finished {
                    Ok(Ok(stats)) => {
                        warn!(?stats, "Hub stopped without a shutdown signal");
                        Ok(())
                    }
                    Ok(Err(e)) => {
                        error!("❌ Hub failed: {}", e);
                        Err(e.into())
                    }
                    Err(e) => Err(format!("Hub task panicked: {e}").into()),
                };
            }
        }

        // A second signal skips the graceful path.
        tokio::spawn(async move {
            if let Err(e) = wait_for_shutdown_silent().await {
                error!("Failed to set up forced shutdown signal handler: {e}");
                return;
            }
            warn!("Shutdown signal received again! Exiting immediately.");
            std::process::exit(1);
        });

        info!("🛑 Shutdown signal received, beginning graceful shutdown...");
        shutdown.cancel();

        match tokio::time::timeout(grace, hub_handle).await {
            Ok(Ok(Ok(stats))) => {
                info!("📊 Final Statistics:");
                info!("  - Messages received: {}", stats.received);
                info!("  - Messages routed: {}", stats.routed);
                info!("  - Decode errors: {}", stats.decode_errors);
                info!("  - Routing errors: {}", stats.routing_errors);
            }
            Ok(Ok(Err(e))) => error!("❌ Hub error during shutdown: {}", e),
            Ok(Err(e)) => error!("❌ Hub task failed: {}", e),
            Err(_) => warn!("⏰ Hub did not stop within {:?}, exiting anyway", grace),
        }

        info!("✅ GLCD hub shutdown complete");
        Ok(())
    }

    /// Logs the configuration summary at startup.
    fn log_configuration_summary(&self) {
        info!("📋 Configuration Summary:");
        info!("  📨 nsqd: {}", self.config.nsq.nsqd_address);
        info!(
            "  🔎 lookupd: {}",
            self.config.nsq.lookupd_address.as_deref().unwrap_or("none")
        );
        info!(
            "  📥 Consuming: {}/{}",
            self.config.nsq.server_topic, self.config.nsq.server_channel
        );
        if self.memory_store {
            info!("  🗄️ Store: in-memory");
        } else {
            info!("  🗄️ Store: {} ({})", self.config.mongo.servers, self.config.mongo.db);
        }
        info!("  ⏱️ Client expiry: {}s", self.config.hub.cleanup_interval_secs);
        info!(
            "  🔁 Restarts: {} max, backoff {}ms..{}ms",
            self.config.supervisor.max_restarts,
            self.config.supervisor.backoff_first_ms,
            self.config.supervisor.backoff_max_ms
        );
    }
}
