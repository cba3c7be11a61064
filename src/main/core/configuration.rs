//! The simulator's configuration and cli parsing code using [serde] and [clap]. This contains all
//! of the configuration options, some of which are also exposed as CLI options.
//!
//! [schemars] is used to get the option description (its doc comment) and default value so that it
//! can be shown in the CLI help text.
//!
//! This code should be careful about validating or interpreting values. It should be focused on
//! parsing and checking that the format is correct, and not validating the values. For example this
//! code doesn't check that two hosts don't share an IP address, or that a transfer's hosts exist.
//! That is left to [`SimConfig`](crate::core::sim_config::SimConfig).

use std::collections::{BTreeMap, HashMap};
use std::str::FromStr;

use clap::Parser;
use merge::Merge;
use once_cell::sync::Lazy;
use schemars::{schema_for, JsonSchema};
use serde::{Deserialize, Serialize};

use crate::core::support::simulation_time::SimulationTime;
use crate::utility::units;

const START_HELP_TEXT: &str = "\
    Simulate TCP hosts exchanging data over a virtual network, in simulated time.";

const END_HELP_TEXT: &str = "\
    If units are not specified, all values are assumed to be given in their base \
    unit (seconds, bytes, hertz). Units can optionally be specified (for \
    example: '1024 B', '1 KiB', '10 ms', '2500 MHz') and are case-sensitive. \
    Values are integers.";

#[derive(Debug, Clone, Parser)]
#[clap(name = "shadow-netcore", about = START_HELP_TEXT, after_help = END_HELP_TEXT)]
#[clap(version)]
#[clap(next_display_order = None)]
// clap only shows the possible values for bool options, which isn't very helpful
#[clap(hide_possible_values = true)]
pub struct CliOptions {
    /// Path to the configuration file. Use '-' to read from stdin
    pub config: String,

    /// Exit after printing the final configuration
    #[clap(long)]
    pub show_config: bool,

    #[clap(flatten)]
    pub general: GeneralOptions,

    #[clap(flatten)]
    pub network: NetworkOptions,

    #[clap(flatten)]
    pub host_option_defaults: HostDefaultOptions,
}

/// Options contained in a configuration file.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConfigFileOptions {
    pub general: GeneralOptions,

    #[serde(default)]
    pub network: NetworkOptions,

    #[serde(default)]
    pub host_option_defaults: HostDefaultOptions,

    // we use a BTreeMap so that the hosts are sorted by their hostname (useful for determinism)
    pub hosts: BTreeMap<HostName, HostOptions>,

    #[serde(default)]
    pub transfers: Vec<TransferOptions>,
}

/// Configuration options after processing command-line and configuration file options.
#[derive(Debug, Clone, Serialize)]
pub struct ConfigOptions {
    pub general: GeneralOptions,

    pub network: NetworkOptions,

    // we use a BTreeMap so that the hosts are sorted by their hostname (useful for determinism)
    pub hosts: BTreeMap<HostName, HostOptions>,

    pub transfers: Vec<TransferOptions>,
}

impl ConfigOptions {
    pub fn new(mut config_file: ConfigFileOptions, options: CliOptions) -> Self {
        // the `HostDefaultOptions::default` contains only `None` values, so we must first merge the
        // config file with the real defaults from `HostDefaultOptions::new_with_defaults`
        config_file.host_option_defaults = config_file
            .host_option_defaults
            .with_defaults(HostDefaultOptions::new_with_defaults());

        // override config options with command line options
        config_file.general = options.general.with_defaults(config_file.general);
        config_file.network = options.network.with_defaults(config_file.network);
        config_file.host_option_defaults = options
            .host_option_defaults
            .with_defaults(config_file.host_option_defaults);

        // copy the host defaults to all of the hosts
        for host in config_file.hosts.values_mut() {
            host.host_options = host
                .host_options
                .clone()
                .with_defaults(config_file.host_option_defaults.clone());
        }

        Self {
            general: config_file.general,
            network: config_file.network.with_defaults(NetworkOptions::new_with_defaults()),
            hosts: config_file.hosts,
            transfers: config_file.transfers,
        }
    }

    pub fn stop_time(&self) -> Result<SimulationTime, String> {
        self.general
            .stop_time
            .ok_or("The stop time is not set")?
            .as_simtime()
    }

    pub fn seed(&self) -> u64 {
        self.general.seed.unwrap_or(1).into()
    }

    pub fn log_level(&self) -> log::LevelFilter {
        self.general
            .log_level
            .map(|x| log::Level::from(x).to_level_filter())
            .unwrap_or(log::LevelFilter::Info)
    }

    pub fn latency(&self) -> Result<SimulationTime, String> {
        self.network
            .latency
            .ok_or("The network latency is not set")?
            .as_simtime()
    }

    pub fn loopback_latency(&self) -> Result<SimulationTime, String> {
        self.network
            .loopback_latency
            .ok_or("The loopback latency is not set")?
            .as_simtime()
    }
}

/// Help messages used by Clap for command line arguments, combining the doc string with
/// the Serde default.
static GENERAL_HELP: Lazy<HashMap<String, String>> =
    Lazy::new(|| generate_help_strs(schema_for!(GeneralOptions)));

// these must all be Option types since they aren't required by the CLI, even if they're
// required in the configuration file
#[derive(Debug, Clone, Parser, Serialize, Deserialize, Merge, JsonSchema)]
#[clap(next_help_heading = "General (Override configuration file options)")]
#[clap(next_display_order = None)]
#[serde(deny_unknown_fields)]
pub struct GeneralOptions {
    /// The simulated time at which the simulation ends
    #[clap(long, value_name = "seconds")]
    #[clap(help = GENERAL_HELP.get("stop_time").unwrap().as_str())]
    pub stop_time: Option<units::Time<units::TimePrefix>>,

    /// Initialize randomness using seed N
    #[clap(long, value_name = "N")]
    #[clap(help = GENERAL_HELP.get("seed").unwrap().as_str())]
    #[serde(default = "default_some_1")]
    pub seed: Option<u32>,

    /// Log level of output written on stdout. If built in release mode, then log messages at
    /// level 'trace' will always be dropped
    #[clap(long, short = 'l', value_name = "level")]
    #[clap(help = GENERAL_HELP.get("log_level").unwrap().as_str())]
    #[serde(default = "default_some_info")]
    pub log_level: Option<LogLevel>,
}

impl GeneralOptions {
    /// Replace unset (`None`) values of `base` with values from `default`.
    pub fn with_defaults(mut self, default: Self) -> Self {
        self.merge(default);
        self
    }
}

/// Help messages used by Clap for command line arguments, combining the doc string with
/// the Serde default.
static NETWORK_HELP: Lazy<HashMap<String, String>> =
    Lazy::new(|| generate_help_strs(schema_for!(NetworkOptions)));

// these must all be Option types since they aren't required by the CLI
#[derive(Debug, Clone, Default, Parser, Serialize, Deserialize, Merge, JsonSchema)]
#[clap(next_help_heading = "Network (Override network options)")]
#[clap(next_display_order = None)]
#[serde(default, deny_unknown_fields)]
#[schemars(default = "NetworkOptions::new_with_defaults")]
pub struct NetworkOptions {
    /// The one-way latency of packets between two different hosts
    #[clap(long, value_name = "seconds")]
    #[clap(help = NETWORK_HELP.get("latency").unwrap().as_str())]
    pub latency: Option<units::Time<units::TimePrefix>>,

    /// The latency of packets that a host sends to itself
    #[clap(long, value_name = "seconds")]
    #[clap(help = NETWORK_HELP.get("loopback_latency").unwrap().as_str())]
    pub loopback_latency: Option<units::Time<units::TimePrefix>>,
}

impl NetworkOptions {
    pub fn new_with_defaults() -> Self {
        Self {
            latency: Some(units::Time::new(10, units::TimePrefix::Milli)),
            loopback_latency: Some(units::Time::new(1, units::TimePrefix::Milli)),
        }
    }

    /// Replace unset (`None`) values of `base` with values from `default`.
    pub fn with_defaults(mut self, default: Self) -> Self {
        self.merge(default);
        self
    }
}

/// Help messages used by Clap for command line arguments, combining the doc string with
/// the Serde default.
static HOST_HELP: Lazy<HashMap<String, String>> =
    Lazy::new(|| generate_help_strs(schema_for!(HostDefaultOptions)));

#[derive(Debug, Clone, Parser, Serialize, Deserialize, Merge, JsonSchema)]
#[clap(next_help_heading = "Host Defaults (Default options for hosts)")]
#[clap(next_display_order = None)]
#[serde(default, deny_unknown_fields)]
// serde will default all fields to `None`, but in the cli help we want the actual defaults
#[schemars(default = "HostDefaultOptions::new_with_defaults")]
pub struct HostDefaultOptions {
    /// Log level at which to print host messages
    #[clap(long = "host-log-level", name = "host-log-level")]
    #[clap(value_name = "level")]
    #[clap(help = HOST_HELP.get("log_level").unwrap().as_str())]
    pub log_level: Option<NullableOption<LogLevel>>,

    /// Clock frequency of the simulated CPU
    #[clap(long, value_name = "hertz")]
    #[clap(help = HOST_HELP.get("cpu_frequency").unwrap().as_str())]
    pub cpu_frequency: Option<units::Frequency<units::SiPrefixUpper>>,

    /// Clock frequency of the machine running the simulation. If not set, the frequency is unknown
    /// and processing times are used unscaled
    #[clap(long, value_name = "hertz")]
    #[clap(help = HOST_HELP.get("cpu_raw_frequency").unwrap().as_str())]
    pub cpu_raw_frequency: Option<NullableOption<units::Frequency<units::SiPrefixUpper>>>,

    /// Amount of CPU work a host may build up before it's delayed. If null, CPU delays are not
    /// modeled
    #[clap(long, value_name = "seconds")]
    #[clap(help = HOST_HELP.get("cpu_threshold").unwrap().as_str())]
    pub cpu_threshold: Option<NullableOption<units::Time<units::TimePrefix>>>,

    /// Granularity that CPU delays are rounded to
    #[clap(long, value_name = "seconds")]
    #[clap(help = HOST_HELP.get("cpu_precision").unwrap().as_str())]
    pub cpu_precision: Option<NullableOption<units::Time<units::TimePrefix>>>,

    /// Processing time charged to the CPU for each packet a host receives
    #[clap(long, value_name = "seconds")]
    #[clap(help = HOST_HELP.get("packet_cpu_cost").unwrap().as_str())]
    pub packet_cpu_cost: Option<units::Time<units::TimePrefix>>,

    /// Size of each TCP socket's send buffer
    #[clap(long, value_name = "bytes")]
    #[clap(help = HOST_HELP.get("socket_send_buffer").unwrap().as_str())]
    pub socket_send_buffer: Option<units::Bytes<units::SiPrefixUpper>>,

    /// Size of each TCP socket's receive buffer
    #[clap(long, value_name = "bytes")]
    #[clap(help = HOST_HELP.get("socket_recv_buffer").unwrap().as_str())]
    pub socket_recv_buffer: Option<units::Bytes<units::SiPrefixUpper>>,

    /// Size of the chunks that socket buffers allocate
    #[clap(long, value_name = "bytes")]
    #[clap(help = HOST_HELP.get("socket_chunk_capacity").unwrap().as_str())]
    pub socket_chunk_capacity: Option<units::Bytes<units::SiPrefixUpper>>,

    /// Maximum backlog of a listening TCP socket
    #[clap(long, value_name = "N")]
    #[clap(help = HOST_HELP.get("tcp_backlog_max").unwrap().as_str())]
    pub tcp_backlog_max: Option<u32>,
}

impl HostDefaultOptions {
    pub fn new_with_defaults() -> Self {
        Self {
            log_level: None,
            cpu_frequency: Some(units::Frequency::new(2500, units::SiPrefixUpper::Mega)),
            cpu_raw_frequency: None,
            cpu_threshold: Some(NullableOption::Null),
            cpu_precision: Some(NullableOption::Value(units::Time::new(
                200,
                units::TimePrefix::Nano,
            ))),
            packet_cpu_cost: Some(units::Time::new(0, units::TimePrefix::Sec)),
            socket_send_buffer: Some(units::Bytes::new(131_072, units::SiPrefixUpper::Base)),
            socket_recv_buffer: Some(units::Bytes::new(174_760, units::SiPrefixUpper::Base)),
            socket_chunk_capacity: Some(units::Bytes::new(4096, units::SiPrefixUpper::Base)),
            tcp_backlog_max: Some(4096),
        }
    }

    /// Replace unset (`None`) values of `base` with values from `default`.
    pub fn with_defaults(mut self, default: Self) -> Self {
        self.merge(default);
        self
    }
}

#[allow(clippy::derivable_impls)]
impl Default for HostDefaultOptions {
    fn default() -> Self {
        // The global `host_option_defaults` can be overridden by host-specific `host_options`, so
        // we use defaults of `None` here and set the real defaults with `Self::new_with_defaults`
        // in `ConfigOptions::new`.
        Self {
            log_level: None,
            cpu_frequency: None,
            cpu_raw_frequency: None,
            cpu_threshold: None,
            cpu_precision: None,
            packet_cpu_cost: None,
            socket_send_buffer: None,
            socket_recv_buffer: None,
            socket_chunk_capacity: None,
            tcp_backlog_max: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct HostOptions {
    /// IP address to assign to the host
    #[serde(default)]
    pub ip_addr: Option<std::net::Ipv4Addr>,

    #[serde(default)]
    pub host_options: HostDefaultOptions,
}

/// A bulk transfer: the client connects to the server and sends `size` bytes, which the server
/// reads until the client closes the connection.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct TransferOptions {
    pub client: HostName,

    pub server: HostName,

    /// The port that the server listens on
    #[serde(default = "default_port")]
    pub port: u16,

    /// How much data the client sends
    pub size: units::Bytes<units::SiPrefixUpper>,

    /// The simulated time at which the client connects
    #[serde(default)]
    pub start_time: units::Time<units::TimePrefix>,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "kebab-case")]
pub enum LogLevel {
    Error,
    Warning,
    Info,
    Debug,
    Trace,
}

impl FromStr for LogLevel {
    type Err = serde_yaml::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        serde_yaml::from_str(s)
    }
}

impl From<LogLevel> for log::Level {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Error => log::Level::Error,
            LogLevel::Warning => log::Level::Warn,
            LogLevel::Info => log::Level::Info,
            LogLevel::Debug => log::Level::Debug,
            LogLevel::Trace => log::Level::Trace,
        }
    }
}

#[derive(Debug, Clone, PartialOrd, Ord, PartialEq, Eq, Serialize, JsonSchema)]
pub struct HostName(String);

impl<'de> serde::Deserialize<'de> for HostName {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct HostNameVisitor;

        impl<'de> serde::de::Visitor<'de> for HostNameVisitor {
            type Value = HostName;

            fn expecting(&self, formatter: &mut std::fmt::Formatter) -> std::fmt::Result {
                formatter.write_str("a string")
            }

            fn visit_string<E>(self, v: String) -> Result<Self::Value, E>
            where
                E: serde::de::Error,
            {
                // hostname(7): "Valid characters for hostnames are ASCII(7) letters from a to z,
                // the digits from 0 to 9, and the hyphen (-)."
                fn is_allowed(c: char) -> bool {
                    c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-' || c == '.'
                }
                if let Some(invalid_char) = v.chars().find(|x| !is_allowed(*x)) {
                    return Err(E::custom(format!(
                        "invalid hostname character: '{invalid_char}'"
                    )));
                }

                if v.is_empty() {
                    return Err(E::custom("empty hostname"));
                }

                // hostname(7): "A hostname may not start with a hyphen."
                if v.starts_with('-') {
                    return Err(E::custom("hostname begins with a '-' character"));
                }

                if v.len() > 253 {
                    return Err(E::custom("hostname exceeds 253 characters"));
                }

                Ok(HostName(v))
            }

            fn visit_str<E>(self, v: &str) -> Result<Self::Value, E>
            where
                E: serde::de::Error,
            {
                self.visit_string(v.to_string())
            }
        }

        deserializer.deserialize_string(HostNameVisitor)
    }
}

impl std::ops::Deref for HostName {
    type Target = String;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl From<HostName> for String {
    fn from(name: HostName) -> Self {
        name.0
    }
}

impl std::fmt::Display for HostName {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

/// Many of the config options are `Option` types so that they can be merged, which means `None`
/// can't also be used to mean "disabled". This `NullableOption` type lets an option be explicitly
/// set to "null" (in the config file or as "null" on the command line) to overwrite a default
/// value with `None`.
#[derive(Debug, Copy, Clone, JsonSchema, Eq, PartialEq)]
pub enum NullableOption<T> {
    Value(T),
    Null,
}

impl<T> NullableOption<T> {
    pub fn as_ref(&self) -> NullableOption<&T> {
        match self {
            NullableOption::Value(ref x) => NullableOption::Value(x),
            NullableOption::Null => NullableOption::Null,
        }
    }

    /// Easier to use than `Into<Option<T>>` since `Option` has a lot of blanket `From`
    /// implementations, requiring a lot of type annotations.
    pub fn to_option(self) -> Option<T> {
        match self {
            NullableOption::Value(x) => Some(x),
            NullableOption::Null => None,
        }
    }
}

impl<T: serde::Serialize> serde::Serialize for NullableOption<T> {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            // use the inner type's serialize function
            Self::Value(x) => Ok(T::serialize(x, serializer)?),
            Self::Null => serializer.serialize_none(),
        }
    }
}

impl<'de, T: serde::Deserialize<'de>> serde::Deserialize<'de> for NullableOption<T> {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        // always use the inner type's deserialize function
        Ok(Self::Value(T::deserialize(deserializer)?))
    }
}

impl<T> FromStr for NullableOption<T>
where
    T: FromStr<Err: std::fmt::Debug + std::fmt::Display>,
{
    type Err = T::Err;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            // since we use serde-yaml, use "null" to match yaml's "null"
            "null" => Ok(Self::Null),
            x => Ok(Self::Value(FromStr::from_str(x)?)),
        }
    }
}

/// A trait for `Option`-like types that can be flattened into a single `Option`.
pub trait Flatten<T> {
    fn flatten(self) -> Option<T>;
}

impl<T> Flatten<T> for Option<NullableOption<T>> {
    fn flatten(self) -> Option<T> {
        self.and_then(|x| x.to_option())
    }
}

/// Convert a time option to a [`SimulationTime`].
pub fn time_option(
    name: &str,
    time: Option<units::Time<units::TimePrefix>>,
) -> Result<Option<SimulationTime>, String> {
    time.map(|x| x.as_simtime())
        .transpose()
        .map_err(|e| format!("Invalid '{name}': {e}"))
}

/// Helper function for serde default `Some(1)` values.
fn default_some_1() -> Option<u32> {
    Some(1)
}

/// Helper function for serde default `Some(LogLevel::Info)` values.
fn default_some_info() -> Option<LogLevel> {
    Some(LogLevel::Info)
}

fn default_port() -> u16 {
    80
}

/// Generate help strings for objects in a JSON schema, including the Serde defaults if available.
fn generate_help_strs(schema: schemars::schema::RootSchema) -> HashMap<String, String> {
    let mut defaults = HashMap::<String, String>::new();
    let Some(object) = schema.schema.object.as_ref() else {
        return defaults;
    };

    for (name, obj) in &object.properties {
        if let Some(meta) = obj.clone().into_object().metadata {
            let description = meta.description.unwrap_or_default();
            let space = if !description.is_empty() { " " } else { "" };
            match meta.default {
                Some(default) => defaults.insert(
                    name.clone(),
                    format!("{}{}[default: {}]", description, space, default),
                ),
                None => defaults.insert(name.clone(), description.to_string()),
            };
        }
    }
    defaults
}

#[cfg(test)]
mod tests {
    use super::*;

    const CONFIG: &str = r#"
        general:
          stop_time: 30 s
          log_level: debug
        network:
          latency: 25 ms
        host_option_defaults:
          cpu_frequency: 3 GHz
          packet_cpu_cost: 5 us
        hosts:
          server:
            ip_addr: 11.0.0.10
            host_options:
              cpu_threshold: 1 ms
          client:
            host_options:
              log_level: trace
        transfers:
          - client: client
            server: server
            size: 1 MiB
    "#;

    fn cli(args: &[&str]) -> CliOptions {
        let args = ["shadow-netcore", "config.yaml"].iter().chain(args);
        CliOptions::try_parse_from(args).unwrap()
    }

    #[test]
    fn test_parse_and_merge() {
        let file: ConfigFileOptions = serde_yaml::from_str(CONFIG).unwrap();
        let config = ConfigOptions::new(file, cli(&[]));

        assert_eq!(config.stop_time().unwrap(), SimulationTime::from_secs(30));
        assert_eq!(config.seed(), 1);
        assert_eq!(config.log_level(), log::LevelFilter::Debug);
        assert_eq!(config.latency().unwrap(), SimulationTime::from_millis(25));
        assert_eq!(
            config.loopback_latency().unwrap(),
            SimulationTime::from_millis(1)
        );

        let server = &config.hosts[&HostName("server".into())];
        assert_eq!(server.ip_addr, Some("11.0.0.10".parse().unwrap()));
        let options = &server.host_options;
        assert_eq!(
            options.cpu_frequency.unwrap().as_khz().unwrap(),
            3_000_000
        );
        assert_eq!(
            options.cpu_threshold.flatten().unwrap().as_simtime().unwrap(),
            SimulationTime::from_millis(1)
        );
        assert_eq!(options.tcp_backlog_max, Some(4096));
        assert_eq!(options.log_level.flatten(), None);

        let client = &config.hosts[&HostName("client".into())];
        assert_eq!(client.ip_addr, None);
        assert_eq!(client.host_options.cpu_threshold.flatten(), None);
        assert_eq!(
            client.host_options.log_level.flatten(),
            Some(LogLevel::Trace)
        );

        assert_eq!(config.transfers.len(), 1);
        assert_eq!(config.transfers[0].port, 80);
        assert_eq!(config.transfers[0].size.as_bytes().unwrap(), 1 << 20);
    }

    #[test]
    fn test_cli_overrides_file() {
        let file: ConfigFileOptions = serde_yaml::from_str(CONFIG).unwrap();
        let config = ConfigOptions::new(
            file,
            cli(&["--stop-time", "5 s", "--cpu-threshold", "null", "--seed", "7"]),
        );

        assert_eq!(config.stop_time().unwrap(), SimulationTime::from_secs(5));
        assert_eq!(config.seed(), 7);

        // the cli option overrides the defaults, but not host-specific options
        let server = &config.hosts[&HostName("server".into())];
        assert!(server.host_options.cpu_threshold.flatten().is_some());
        let client = &config.hosts[&HostName("client".into())];
        assert!(client.host_options.cpu_threshold.flatten().is_none());
    }

    #[test]
    fn test_invalid_hostname() {
        let config = CONFIG.replace("client:\n", "Client:\n");
        assert!(serde_yaml::from_str::<ConfigFileOptions>(&config).is_err());

        assert!(serde_yaml::from_str::<HostName>("\"-host\"").is_err());
        assert!(serde_yaml::from_str::<HostName>("\"\"").is_err());
        assert!(serde_yaml::from_str::<HostName>("\"host-1.example\"").is_ok());
    }

    #[test]
    fn test_unknown_field() {
        let config = CONFIG.replace("latency: 25 ms", "bandwidth: 1 Gbit");
        assert!(serde_yaml::from_str::<ConfigFileOptions>(&config).is_err());
    }

    #[test]
    fn test_help_includes_defaults() {
        let help = &HOST_HELP["tcp_backlog_max"];
        assert!(help.starts_with("Maximum backlog"));
        assert!(help.ends_with("[default: 4096]"));
    }
}
