//! Command-line interface handling for the relay binary.
//!
//! Flags override values from the configuration file; the JWT secret and Redis URL
//! can also come from the environment so they stay out of config files.

use clap::{Arg, ArgMatches, Command};
use std::path::PathBuf;

/// Command line arguments parsed from user input.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CliArgs {
    /// Path to the configuration file
    pub config_path: PathBuf,
    /// Optional override for the WebSocket bind address
    pub bind_address: Option<String>,
    /// Optional override for the status bind address
    pub status_bind_address: Option<String>,
    /// Optional override for log level
    pub log_level: Option<String>,
    /// Whether to force JSON log output
    pub json_logs: bool,
    /// Optional override for the store backend (`redis` or `memory`)
    pub store_backend: Option<String>,
    /// Shared token secret (`JWT_SECRET_KEY`)
    pub jwt_secret: Option<String>,
    /// Redis connection URL (`REDIS_URL`)
    pub redis_url: Option<String>,
}

fn command() -> Command {
    Command::new("OnlyRoll Relay")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Real-time game room relay for OnlyRoll")
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("FILE")
                .help("Configuration file path")
                .default_value("relay.toml"),
        )
        .arg(
            Arg::new("bind")
                .short('b')
                .long("bind")
                .value_name("ADDRESS")
                .help("WebSocket bind address (e.g., 0.0.0.0:3001)"),
        )
        .arg(
            Arg::new("status-bind")
                .long("status-bind")
                .value_name("ADDRESS")
                .help("Health/status HTTP bind address (e.g., 0.0.0.0:3002)"),
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
            Arg::new("store")
                .short('s')
                .long("store")
                .value_name("BACKEND")
                .value_parser(["redis", "memory"])
                .help("Room store backend"),
        )
        .arg(
            Arg::new("jwt-secret")
                .long("jwt-secret")
                .value_name("SECRET")
                .env("JWT_SECRET_KEY")
                .hide_env_values(true)
                .help("Shared secret used to verify client tokens"),
        )
        .arg(
            Arg::new("redis-url")
                .long("redis-url")
                .value_name("URL")
                .env("REDIS_URL")
                .help("Redis connection URL (e.g., redis://localhost:6379)"),
        )
}

impl CliArgs {
    /// Parses the process arguments, exiting with usage on error.
    pub fn parse() -> Self {
        Self::try_parse_from(std::env::args_os()).unwrap_or_else(|e| e.exit())
    }

    /// Parses an explicit argument list.
    pub fn try_parse_from<I, T>(args: I) -> Result<Self, clap::Error>
    where
        I: IntoIterator<Item = T>,
        T: Into<std::ffi::OsString> + Clone,
    {
        command()
            .try_get_matches_from(args)
            .map(|matches| Self::from_matches(&matches))
    }

    fn from_matches(matches: &ArgMatches) -> Self {
        Self {
            config_path: matches
                .get_one::<String>("config")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("relay.toml")),
            bind_address: matches.get_one::<String>("bind").cloned(),
            status_bind_address: matches.get_one::<String>("status-bind").cloned(),
            log_level: matches.get_one::<String>("log-level").cloned(),
            json_logs: matches.get_flag("json-logs"),
            store_backend: matches.get_one::<String>("store").cloned(),
            jwt_secret: matches.get_one::<String>("jwt-secret").cloned(),
            redis_url: matches.get_one::<String>("redis-url").cloned(),
        }
    }
}
