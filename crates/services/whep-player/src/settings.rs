//! Command-line arguments and config file merging

use anyhow::{bail, Context};
use clap::Parser;
use gateview_whep::{ReconnectionPolicy, TurnServerConfig, WhepConfig};
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Gateview WHEP player
///
/// Pulls live video from one or more barrier cameras over WHEP and reports
/// each camera's status (connecting, live, error).
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// WHEP endpoint URLs (comma-separated or repeated)
    #[arg(
        short,
        long = "endpoint",
        value_delimiter = ',',
        env = "GATEVIEW_WHEP_ENDPOINTS"
    )]
    pub endpoints: Vec<String>,

    /// TOML config file (`endpoints`, `[whep]`, `[retry]`)
    #[arg(short, long, env = "GATEVIEW_CONFIG")]
    pub config: Option<PathBuf>,

    /// STUN servers (comma-separated, empty for host candidates only)
    #[arg(long, value_delimiter = ',')]
    pub stun_servers: Option<Vec<String>>,

    /// TURN servers as turn:host:port:username:password (comma-separated)
    #[arg(long, value_delimiter = ',')]
    pub turn_servers: Vec<String>,

    /// ICE gathering bound in milliseconds
    #[arg(long, env = "GATEVIEW_GATHERING_TIMEOUT_MS")]
    pub gathering_timeout_ms: Option<u64>,

    /// Whole-negotiation bound in milliseconds (0 disables)
    #[arg(long, env = "GATEVIEW_NEGOTIATION_TIMEOUT_MS")]
    pub negotiation_timeout_ms: Option<u64>,

    /// Per-request WHEP HTTP timeout in milliseconds
    #[arg(long, env = "GATEVIEW_REQUEST_TIMEOUT_MS")]
    pub request_timeout_ms: Option<u64>,

    /// Bearer token for the WHEP endpoints
    #[arg(long, env = "GATEVIEW_WHEP_TOKEN", hide_env_values = true)]
    pub auth_token: Option<String>,

    /// Reconnect with exponential backoff after an error
    #[arg(long, default_value_t = false, env = "GATEVIEW_RETRY")]
    pub retry: bool,

    /// Give up after this many reconnection attempts (default: unlimited)
    #[arg(long)]
    pub max_retries: Option<u32>,

    /// Interval between RTP counter log lines in seconds
    #[arg(long, default_value_t = 5)]
    pub stats_interval_secs: u64,

    /// Log output format
    #[arg(long, value_enum, default_value = "pretty", env = "GATEVIEW_LOG_FORMAT")]
    pub log_format: LogFormat,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum LogFormat {
    /// Human-readable lines
    Pretty,
    /// One JSON object per line
    Json,
}

/// Layout of the `--config` file
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct FileConfig {
    endpoints: Vec<String>,
    whep: Option<WhepConfig>,
    retry: Option<ReconnectionPolicy>,
}

/// Everything the player needs to run
#[derive(Debug, Clone)]
pub struct Settings {
    pub endpoints: Vec<String>,
    pub whep: WhepConfig,
    pub retry: Option<ReconnectionPolicy>,
}

impl Settings {
    /// Merge the config file (if any) with command-line overrides
    pub fn from_args(args: &Args) -> anyhow::Result<Self> {
        let file = match &args.config {
            Some(path) => load_file(path)?,
            None => FileConfig::default(),
        };

        let mut whep = file.whep.unwrap_or_default();

        if let Some(stun_servers) = &args.stun_servers {
            whep.stun_servers = stun_servers
                .iter()
                .filter(|s| !s.is_empty())
                .cloned()
                .collect();
        }

        if !args.turn_servers.is_empty() {
            whep.turn_servers = args
                .turn_servers
                .iter()
                .map(|spec| TurnServerConfig::parse(spec))
                .collect::<gateview_whep::Result<Vec<_>>>()?;
        }

        if let Some(ms) = args.gathering_timeout_ms {
            whep.ice_gathering_timeout_ms = ms;
        }
        if let Some(ms) = args.negotiation_timeout_ms {
            whep.negotiation_timeout_ms = (ms > 0).then_some(ms);
        }
        if let Some(ms) = args.request_timeout_ms {
            whep.request_timeout_ms = ms;
        }
        if let Some(token) = &args.auth_token {
            whep.auth_token = Some(token.clone());
        }

        whep.validate()?;

        let retry = if args.retry || file.retry.is_some() {
            let mut policy = file.retry.unwrap_or_else(ReconnectionPolicy::unlimited);
            if args.max_retries.is_some() {
                policy.max_retries = args.max_retries;
            }
            Some(policy)
        } else {
            None
        };

        let endpoints = if args.endpoints.is_empty() {
            file.endpoints
        } else {
            args.endpoints.clone()
        };

        if endpoints.is_empty() {
            bail!("No WHEP endpoints given (use --endpoint or the config file)");
        }

        Ok(Self {
            endpoints,
            whep,
            retry,
        })
    }
}

fn load_file(path: &Path) -> anyhow::Result<FileConfig> {
    let source = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file {}", path.display()))?;
    toml::from_str(&source).with_context(|| format!("Failed to parse {}", path.display()))
}
