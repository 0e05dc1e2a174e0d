//! Command-line interface handling for the GLCD hub daemon.
//!
//! This module provides command-line argument parsing using the `clap`
//! crate. Every option overrides the corresponding configuration file value.

use clap::{Arg, ArgMatches, Command};
use std::ffi::OsString;
use std::path::PathBuf;

/// Configuration file used when `--config` is not given.
pub const DEFAULT_CONFIG_PATH: &str = "glcd.toml";

/// Command line arguments parsed from user input.
///
/// This structure holds all the command-line options that can be used to
/// override configuration file settings.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CliArgs {
    /// Path to the configuration file
    pub config_path: PathBuf,
    /// Optional override for the home nsqd address
    pub nsqd_address: Option<String>,
    /// Optional override for the nsqlookupd address
    pub lookupd_address: Option<String>,
    /// Optional override for the MongoDB connection string
    pub mongo_servers: Option<String>,
    /// Optional override for the MongoDB database name
    pub mongo_db: Option<String>,
    /// Optional override for log level
    pub log_level: Option<String>,
    /// Whether to force JSON log output
    pub json_logs: bool,
    /// Whether to keep zones and auth records in memory instead of MongoDB
    pub memory_store: bool,
}

impl CliArgs {
    /// Builds the clap command definition.
    fn command() -> Command {
        Command::new("glcd")
            .version(env!("CARGO_PKG_VERSION"))
            .about("Game server hub: relays player state and zone data over NSQ")
            .arg(
                Arg::new("config")
                    .short('c')
                    .long("config")
                    .value_name("FILE")
                    .help("Configuration file path")
                    .default_value(DEFAULT_CONFIG_PATH),
            )
            .arg(
                Arg::new("nsqd")
                    .long("nsqd")
                    .value_name("ADDRESS")
                    .help("Home nsqd TCP address (e.g., 127.0.0.1:4150)"),
            )
            .arg(
                Arg::new("lookupd")
                    .long("lookupd")
                    .value_name("ADDRESS")
                    .help("nsqlookupd HTTP address (e.g., 127.0.0.1:4161)"),
            )
            .arg(
                Arg::new("mongo")
                    .long("mongo")
                    .value_name("URI")
                    .help("MongoDB connection string"),
            )
            .arg(
                Arg::new("db")
                    .long("db")
                    .value_name("NAME")
                    .help("MongoDB database name"),
            )
            .arg(
                Arg::new("log-level")
                    .short('l')
                    .long("log-level")
                    .value_name("LEVEL")
                    .help("Log level (trace, debug, info, warn, error)"),
            )
            .arg(
                Arg::new("json-logs")
                    .long("json-logs")
                    .help("Output logs in JSON format")
                    .action(clap::ArgAction::SetTrue),
            )
            .arg(
                Arg::new("memory-store")
                    .long("memory-store")
                    .help("Keep zones and auth records in memory (nothing is persisted)")
                    .action(clap::ArgAction::SetTrue),
            )
    }

    /// Parses the process arguments, exiting with usage on error.
    pub fn parse() -> Self {
        Self::from_matches(&Self::command().get_matches())
    }

    /// Parses an explicit argument list.
    pub fn try_parse_from<I, T>(args: I) -> Result<Self, clap::Error>
    where
        I: IntoIterator<Item = T>,
        T: Into<OsString> + Clone,
    {
        Ok(Self::from_matches(&Self::command().try_get_matches_from(args)?))
    }

    fn from_matches(matches: &ArgMatches) -> Self {
        Self {
            config_path: matches
                .get_one::<String>("config")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH)),
            nsqd_address: matches.get_one::<String>("nsqd").cloned(),
            lookupd_address: matches.get_one::<String>("lookupd").cloned(),
            mongo_servers: matches.get_one::<String>("mongo").cloned(),
            mongo_db: matches.get_one::<String>("db").cloned(),
            log_level: matches.get_one::<String>("log-level").cloned(),
            json_logs: matches.get_flag("json-logs"),
            memory_store: matches.get_flag("memory-store"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let args = CliArgs::try_parse_from(["glcd"]).expect("parses");
        assert_eq!(args.config_path, PathBuf::from("glcd.toml"));
        assert!(args.nsqd_address.is_none());
        assert!(!args.json_logs);
        assert!(!args.memory_store);
    }

    #[test]
    fn overrides() {
        let args = CliArgs::try_parse_from([
            "glcd",
            "--config",
            "prod.toml",
            "--nsqd",
            "10.0.0.1:4150",
            "--lookupd",
            "10.0.0.1:4161",
            "--mongo",
            "mongodb://db:27017",
            "--db",
            "world",
            "-l",
            "debug",
            "--json-logs",
        ])
        .expect("parses");

        assert_eq!(args.config_path, PathBuf::from("prod.toml"));
        assert_eq!(args.nsqd_address.as_deref(), Some("10.0.0.1:4150"));
        assert_eq!(args.lookupd_address.as_deref(), Some("10.0.0.1:4161"));
        assert_eq!(args.mongo_servers.as_deref(), Some("mongodb://db:27017"));
        assert_eq!(args.mongo_db.as_deref(), Some("world"));
        assert_eq!(args.log_level.as_deref(), Some("debug"));
        assert!(args.json_logs);
    }

    #[test]
    fn rejects_unknown_flags() {
        assert!(CliArgs::try_parse_from(["glcd", "--bind", "0.0.0.0:80"]).is_err());
    }
}
