//! Hub configuration types and defaults.
//!
//! This module contains the runtime configuration consumed by the hub core.
//! The daemon binary builds it from its TOML file; tests build it directly.

use crate::error::HubError;
use crate::supervisor::SupervisorConfig;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Configuration structure for the hub.
///
/// Contains the bus topology (home nsqd, lookupd, topic and channel), the
/// document store location and the tuning knobs for the service queues,
/// client expiry and shutdown.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HubConfig {
    /// The nsqd `host:port` the hub publishes its provisioning echo to and
    /// falls back to when no lookupd is configured
    pub nsqd_address: String,

    /// Optional nsqlookupd HTTP `host:port` used to discover producers
    pub lookupd_address: Option<String>,

    /// Topic clients publish to and the hub subscribes on
    pub server_topic: String,

    /// Channel name the hub consumes the server topic through
    pub server_channel: String,

    /// Maximum number of unacknowledged messages per nsqd connection
    pub max_in_flight: u32,

    /// How often nsqlookupd is polled for new producers
    pub lookupd_poll_interval: Duration,

    /// MongoDB connection string
    pub mongo_servers: String,

    /// MongoDB database name
    pub mongo_db: String,

    /// Capacity of each per-service inbound queue
    pub channel_capacity: usize,

    /// Interval between client cleanup sweeps (also the heartbeat expiry)
    pub cleanup_interval: Duration,

    /// Upper bound on how long shutdown waits for in-flight work
    pub shutdown_grace: Duration,

    /// Server-wide key for the password digest
    pub auth_secret: String,

    /// Restart and backoff settings for supervised services
    pub supervisor: SupervisorConfig,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            nsqd_address: "127.0.0.1:4150".to_string(),
            lookupd_address: None,
            server_topic: "glcd".to_string(),
            server_channel: "glcd".to_string(),
            max_in_flight: 32,
            lookupd_poll_interval: Duration::from_secs(60),
            mongo_servers: "mongodb://127.0.0.1:27017".to_string(),
            mongo_db: "glc".to_string(),
            channel_capacity: 256,
            cleanup_interval: Duration::from_secs(10),
            shutdown_grace: Duration::from_secs(5),
            auth_secret: String::new(),
            supervisor: SupervisorConfig::default(),
        }
    }
}

impl HubConfig {
    /// Checks the settings the hub cannot run without.
    ///
    /// # Errors
    ///
    /// [`HubError::Configuration`] naming the first offending setting.
    pub fn validate(&self) -> Result<(), HubError> {
        let fail = |msg: &str| Err(HubError::Configuration(msg.to_string()));

        if self.nsqd_address.trim().is_empty() {
            return fail("nsqd address must not be empty");
        }
        if self.server_topic.trim().is_empty() {
            return fail("server topic must not be empty");
        }
        if self.server_channel.trim().is_empty() {
            return fail("server channel must not be empty");
        }
        if self.channel_capacity == 0 {
            return fail("channel capacity must be greater than 0");
        }
        if self.max_in_flight == 0 {
            return fail("max in flight must be greater than 0");
        }
        if self.cleanup_interval.is_zero() {
            return fail("cleanup interval must be greater than 0");
        }
        if self.lookupd_poll_interval.is_zero() {
            return fail("lookupd poll interval must be greater than 0");
        }
        Ok(())
    }
}
