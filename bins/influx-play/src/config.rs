use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use replay_engine::OrderingPolicy;
use serde::Deserialize;
use source_influxdb::InfluxConfig;

use crate::error::PlayError;

#[derive(Parser)]
#[command(name = "influx-play", about = "Replays recorded spatial events to a TCP consumer in real time")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Stream records to the consumer with their original pacing
    Replay(ReplayArgs),
    /// Accept one connection and log the records it receives
    Listen(ListenArgs),
}

// ═══════════════════════════════════════════════════════════════
//  CLI args
// ═══════════════════════════════════════════════════════════════

#[derive(Args, Clone, Debug)]
pub struct ReplayArgs {
    /// Path to the TOML config file
    #[arg(long, default_value = "influx-play.toml", env = "INFLUX_PLAY_CONFIG")]
    pub config: String,

    /// Consumer host
    #[arg(long)]
    pub host: Option<String>,

    /// Consumer port
    #[arg(long)]
    pub port: Option<u16>,

    /// Scenario tag to replay from the store
    #[arg(long)]
    pub scenario: Option<String>,

    /// InfluxDB organization
    #[arg(long)]
    pub org: Option<String>,

    /// InfluxDB bucket
    #[arg(long)]
    pub bucket: Option<String>,

    /// Replay a JSON file instead of querying the store
    #[arg(
        long,
        conflicts_with_all = ["scenario", "org", "bucket", "influx_url", "measurement", "range_start"]
    )]
    pub file: Option<PathBuf>,

    /// InfluxDB base URL
    #[arg(long)]
    pub influx_url: Option<String>,

    /// InfluxDB API token
    #[arg(long, env = "INFLUX_TOKEN", hide_env_values = true)]
    pub influx_token: Option<String>,

    /// Measurement holding the records
    #[arg(long)]
    pub measurement: Option<String>,

    /// Query range start, Unix seconds
    #[arg(long)]
    pub range_start: Option<i64>,

    /// Out-of-order timestamps: reject | clamp
    #[arg(long)]
    pub on_out_of_order: Option<OrderingPolicy>,
}

#[derive(Args, Clone, Debug)]
pub struct ListenArgs {
    #[arg(long, default_value = "0.0.0.0")]
    pub host: String,

    #[arg(long, default_value_t = 54321)]
    pub port: u16,

    /// Reject frames announcing more bytes than this
    #[arg(long)]
    pub max_payload: Option<usize>,

    /// Relay every frame to a downstream consumer
    #[arg(long, value_name = "HOST:PORT")]
    pub forward: Option<String>,

    /// Write received records to InfluxDB
    #[arg(long)]
    pub store: bool,

    /// InfluxDB base URL
    #[arg(long, requires = "store")]
    pub influx_url: Option<String>,

    /// InfluxDB API token
    #[arg(long, env = "INFLUX_TOKEN", hide_env_values = true)]
    pub influx_token: Option<String>,

    /// InfluxDB organization
    #[arg(long, requires = "store")]
    pub org: Option<String>,

    /// InfluxDB bucket
    #[arg(long, requires = "store")]
    pub bucket: Option<String>,

    /// Measurement to write into
    #[arg(long, requires = "store")]
    pub measurement: Option<String>,

    /// Scenario tag for records that carry none
    #[arg(long, requires = "store")]
    pub scenario: Option<String>,
}

impl ListenArgs {
    /// `--forward` split into host and port.
    pub fn forward_target(&self) -> Result<Option<(String, u16)>, PlayError> {
        let Some(target) = &self.forward else {
            return Ok(None);
        };
        let bad = || PlayError::Config { context: "forward", detail: format!("'{target}' is not HOST:PORT") };
        let (host, port) = target.rsplit_once(':').ok_or_else(bad)?;
        let port = port.parse().map_err(|_| bad())?;
        if host.is_empty() {
            return Err(bad());
        }
        Ok(Some((host.to_string(), port)))
    }

    /// Store settings when `--store` is set, defaults for whatever is unset.
    pub fn store_config(&self) -> Option<InfluxConfig> {
        if !self.store {
            return None;
        }
        let defaults = InfluxConfig::default();
        Some(InfluxConfig {
            url: self.influx_url.clone().unwrap_or(defaults.url),
            token: self.influx_token.clone().unwrap_or(defaults.token),
            org: self.org.clone().unwrap_or(defaults.org),
            bucket: self.bucket.clone().unwrap_or(defaults.bucket),
            measurement: self.measurement.clone().unwrap_or(defaults.measurement),
            scenario: self.scenario.clone().unwrap_or(defaults.scenario),
            range_start: defaults.range_start,
        })
    }
}

// ═══════════════════════════════════════════════════════════════
//  Config file (TOML)
// ═══════════════════════════════════════════════════════════════

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub scenario: Option<String>,
    pub org: Option<String>,
    pub bucket: Option<String>,
    pub file: Option<PathBuf>,
    pub on_out_of_order: Option<String>,
    #[serde(default)]
    pub influx: InfluxSection,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct InfluxSection {
    pub url: Option<String>,
    pub token: Option<String>,
    pub measurement: Option<String>,
    pub range_start: Option<i64>,
}

impl Config {
    pub fn load(path: &str) -> Result<Self, PlayError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| PlayError::Config { context: "read", detail: format!("'{path}': {e}") })?;
        toml::from_str(&content)
            .map_err(|e| PlayError::Config { context: "parse", detail: format!("'{path}': {e}") })
    }
}

// ═══════════════════════════════════════════════════════════════
//  Effective — merged config
// ═══════════════════════════════════════════════════════════════

/// Where the records of a session come from.
#[derive(Debug, Clone)]
pub enum SourceSelection {
    File(PathBuf),
    Store(InfluxConfig),
}

/// Final configuration: config file < env/CLI < built-in defaults for
/// whatever is still unset.
#[derive(Debug)]
pub struct Effective {
    pub host: String,
    pub port: u16,
    pub source: SourceSelection,
    pub ordering: OrderingPolicy,
}

impl Effective {
    pub fn new(args: &ReplayArgs) -> Result<Self, PlayError> {
        let cfg = match Config::load(&args.config) {
            Ok(c) => c,
            Err(e) => {
                if std::path::Path::new(&args.config).exists() {
                    return Err(e);
                }
                Config::default()
            }
        };
        Self::merge(args, cfg)
    }

    fn merge(args: &ReplayArgs, cfg: Config) -> Result<Self, PlayError> {
        let ordering = match (args.on_out_of_order, cfg.on_out_of_order.as_deref()) {
            (Some(p), _) => p,
            (None, Some(s)) => s
                .parse()
                .map_err(|detail| PlayError::Config { context: "on_out_of_order", detail })?,
            (None, None) => OrderingPolicy::default(),
        };

        let source = match args.file.clone().or(cfg.file) {
            Some(path) => SourceSelection::File(path),
            None => {
                let defaults = InfluxConfig::default();
                SourceSelection::Store(InfluxConfig {
                    url: args.influx_url.clone().or(cfg.influx.url).unwrap_or(defaults.url),
                    token: args.influx_token.clone().or(cfg.influx.token).unwrap_or(defaults.token),
                    org: args.org.clone().or(cfg.org).unwrap_or(defaults.org),
                    bucket: args.bucket.clone().or(cfg.bucket).unwrap_or(defaults.bucket),
                    measurement: args
                        .measurement
                        .clone()
                        .or(cfg.influx.measurement)
                        .unwrap_or(defaults.measurement),
                    scenario: args.scenario.clone().or(cfg.scenario).unwrap_or(defaults.scenario),
                    range_start: args.range_start.or(cfg.influx.range_start).unwrap_or(defaults.range_start),
                })
            }
        };

        Ok(Self {
            host: args.host.clone().or(cfg.host).unwrap_or_else(|| "localhost".into()),
            port: args.port.or(cfg.port).unwrap_or(54321),
            source,
            ordering,
        })
    }
}
