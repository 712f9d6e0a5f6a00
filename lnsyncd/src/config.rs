use clap::{error::ErrorKind, Parser};
use lnsync_chain::{default_bitcoind_url, ChainBackend};
use lnsync_core::bitcoin::Network;
use lnsync_core::sync::SyncConfig;
use std::ffi::OsStr;
use std::path::PathBuf;
use std::process::exit;
use std::str::FromStr as _;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use std::{env, fs};
use toml::value::{Table, Value};
use url::Url;

pub const NETWORK_NAMES: [&'static str; 4] = ["bitcoin", "testnet", "regtest", "signet"];

pub const DEFAULT_DIR: &str = ".lnsync";

pub const CLN_REST_ENDPOINT: &'static str = "https://127.0.0.1:3010";

// only used for usage display
#[derive(Parser, Debug)]
#[clap(about, long_about = None)]
pub struct InitialArgs {
    #[clap(
        short = 'f',
        long,
        value_parser,
        help = "configuration file - MUST be the first argument",
        value_name = "FILE"
    )]
    config: Option<String>,
}

// note that value_parser gives us clap 4 forward compatibility
#[derive(Parser, Debug)]
#[clap(about, long_about = None, args_override_self = true)]
pub struct SyncArgs {
    #[clap(flatten)]
    initial_args: InitialArgs,

    #[clap(
        long,
        help = "set the logging level",
        value_name = "LEVEL",
        default_value = "info",
        value_parser = ["off", "error", "warn", "info", "debug", "trace"],
    )]
    pub log_level: String,

    #[clap(short, long, value_parser, help = "data directory", value_name = "DIR")]
    pub datadir: Option<String>,

    #[clap(
        short,
        long,
        value_name = "NETWORK",
        default_value = NETWORK_NAMES[0],
        value_parser = Network::from_str,
    )]
    pub network: Network,

    #[clap(
        long,
        value_parser = ChainBackend::from_str,
        help = "chain backend type",
        value_name = "TYPE",
        default_value = "bitcoind",
    )]
    pub chain_backend: ChainBackend,

    #[clap(
        long,
        value_parser,
        help = "bitcoind RPC or Esplora endpoint, defaults to the local bitcoind for the network",
        value_name = "URL"
    )]
    pub chain_rpc: Option<Url>,

    #[clap(
        long,
        value_parser,
        help = "Core Lightning clnrest endpoint",
        value_name = "URL",
        default_value = CLN_REST_ENDPOINT
    )]
    pub cln_rest: Url,

    #[clap(long, value_parser, help = "Core Lightning rune for clnrest", value_name = "RUNE")]
    pub cln_rune: Option<String>,

    #[clap(long, help = "accept self-signed clnrest certificates")]
    pub cln_accept_invalid_certs: bool,

    #[clap(
        long,
        value_parser = clap::value_parser!(u64),
        help = "seconds between the starts of two sync cycles",
        value_name = "SECONDS",
        default_value_t = 600
    )]
    pub graph_refresh_interval: u64,

    #[clap(
        long,
        value_parser = clap::value_parser!(u64),
        help = "seconds to wait after an unusable graph snapshot",
        value_name = "SECONDS",
        default_value_t = 10
    )]
    pub retry_delay: u64,

    #[clap(
        long,
        value_parser = clap::value_parser!(u64),
        help = "minimum seconds between two progress log lines",
        value_name = "SECONDS",
        default_value_t = 30
    )]
    pub logger_update_interval: u64,

    #[clap(
        long,
        value_parser = clap::value_parser!(u64),
        help = "minimum seconds between two funding cache saves",
        value_name = "SECONDS",
        default_value_t = 60
    )]
    pub cache_save_interval: u64,

    #[clap(
        long,
        value_parser = clap::value_parser!(usize),
        help = "funding outpoints per spend status query",
        value_name = "COUNT",
        default_value_t = 500
    )]
    pub closed_scan_batch_size: usize,
}

impl SyncArgs {
    /// The data directory, defaulting to `~/.lnsync`
    pub fn datadir(&self) -> PathBuf {
        match &self.datadir {
            Some(dir) => PathBuf::from(dir),
            None => {
                let home = dirs::home_dir().unwrap_or_else(|| PathBuf::from("."));
                home.join(DEFAULT_DIR)
            }
        }
    }

    /// Per-network data directory
    pub fn network_dir(&self) -> PathBuf {
        self.datadir().join(self.network.to_string())
    }

    /// The chain endpoint, defaulting to the local bitcoind for the network
    pub fn chain_url(&self) -> Result<Url, String> {
        match (&self.chain_rpc, self.chain_backend) {
            (Some(url), _) => Ok(url.clone()),
            (None, ChainBackend::Bitcoind) =>
                default_bitcoind_url(self.network).map_err(|e| e.to_string()),
            (None, ChainBackend::Esplora) =>
                Err("--chain-rpc is required with the esplora backend".to_string()),
        }
    }

    /// Sync loop settings
    pub fn sync_config(&self) -> SyncConfig {
        SyncConfig {
            graph_refresh_interval: Duration::from_secs(self.graph_refresh_interval),
            retry_delay: Duration::from_secs(self.retry_delay),
            closed_scan_batch_size: self.closed_scan_batch_size.max(1),
            log_interval: Duration::from_secs(self.logger_update_interval),
        }
    }

    /// Funding cache save interval
    pub fn cache_save_interval(&self) -> Duration {
        Duration::from_secs(self.cache_save_interval)
    }

    /// Progress log interval
    pub fn log_interval(&self) -> Duration {
        Duration::from_secs(self.logger_update_interval)
    }
}

pub fn parse_args_and_config() -> SyncArgs {
    let env_args = env::args().collect::<Vec<_>>();
    parse_args_and_config_from(&env_args).unwrap_or_else(|e| match e.kind() {
        ErrorKind::DisplayVersion => exit(0), // exit directly because no Command
        _ => e.exit(),
    })
}

#[derive(Clone)]
struct ConfigIterator {
    args_stack: Arc<Mutex<Vec<Vec<String>>>>,
    error: Arc<Mutex<Option<String>>>,
}

impl ConfigIterator {
    fn new(args: &[String]) -> Self {
        ConfigIterator {
            args_stack: Arc::new(Mutex::new(vec![args.iter().cloned().collect()])),
            error: Arc::new(Mutex::new(None)),
        }
    }

    fn do_next(args_stack: &mut MutexGuard<Vec<Vec<String>>>) -> Option<String> {
        loop {
            if args_stack.is_empty() {
                return None;
            }
            let args = &mut args_stack[0];
            if !args.is_empty() {
                let arg = args.remove(0);
                return Some(arg);
            }
            args_stack.remove(0);
        }
    }

    fn expand(&self, args_stack: &mut MutexGuard<Vec<Vec<String>>>, path: &str) -> Option<String> {
        match toml_to_configs(path.as_ref()) {
            Ok(configs) => {
                args_stack.insert(0, configs);
                Self::do_next(args_stack)
            }
            Err(e) => {
                // stop feeding clap, the error is reported after parsing
                *self.error.lock().unwrap() = Some(e);
                args_stack.clear();
                None
            }
        }
    }

    fn take_error(&self) -> Option<String> {
        self.error.lock().unwrap().take()
    }
}

impl Iterator for ConfigIterator {
    type Item = String;

    fn next(&mut self) -> Option<String> {
        let mut args_stack = self.args_stack.lock().unwrap();
        let arg = Self::do_next(&mut args_stack)?;
        if let Some(path) = arg.strip_prefix("--config=") {
            let path = path.to_string();
            return self.expand(&mut args_stack, &path);
        } else if arg == "--config" || arg == "-f" {
            if let Some(path) = Self::do_next(&mut args_stack) {
                return self.expand(&mut args_stack, &path);
            } else {
                println!("--config must be followed by a path");
                // let clap handle the error
                return Some(arg);
            }
        }
        Some(arg)
    }
}

pub fn parse_args_and_config_from(env_args: &[String]) -> Result<SyncArgs, clap::Error> {
    let args_iter = ConfigIterator::new(env_args);
    let parsed = SyncArgs::try_parse_from(args_iter.clone());
    if let Some(e) = args_iter.take_error() {
        return Err(clap::Error::raw(ErrorKind::Io, format!("{}\n", e)));
    }
    parsed
}

fn toml_to_configs(path: &OsStr) -> Result<Vec<String>, String> {
    let contents = fs::read_to_string(path)
        .map_err(|e| format!("cannot read config file {}: {}", path.to_string_lossy(), e))?;
    let config: Table = toml::from_str(contents.as_str())
        .map_err(|e| format!("cannot parse config file {}: {}", path.to_string_lossy(), e))?;
    let configs = config
        .into_iter()
        .flat_map(|(k, value)| {
            let vals = convert_toml_value(k, value);
            vals.into_iter()
        })
        .map(|(k, v)| format!("--{}={}", k, v))
        .collect();
    Ok(configs)
}

fn convert_toml_value(key: String, value: Value) -> Vec<(String, String)> {
    match value {
        Value::String(s) => vec![(key, s)],
        Value::Integer(v) => vec![(key, v.to_string())],
        Value::Float(v) => vec![(key, v.to_string())],
        Value::Boolean(v) => vec![(key, v.to_string())],
        Value::Datetime(v) => vec![(key, v.to_string())],
        Value::Array(a) =>
            a.into_iter().flat_map(|v| convert_toml_value(key.clone(), v)).collect::<Vec<_>>(),
        Value::Table(_) => vec![],
    }
}
