//! Wallet policy knobs and the `wallet.conf` loader.

use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use slpwallet_consensus::constants::{
    COINBASE_MATURITY, DEFAULT_FEE_PER_KB, DUST_THRESHOLD, MAX_FEE_RATE_SATS_PER_BYTE,
};
use slpwallet_consensus::{Amount, Network};
use slpwallet_log::{Format, Level, LogConfig};

use crate::error::WalletError;

pub const WALLET_CONF_FILE_NAME: &str = "wallet.conf";

const DEFAULT_GAP_LIMIT: usize = 20;
const DEFAULT_GAP_LIMIT_FOR_CHANGE: usize = 20;
const DEFAULT_MAX_CHANGE_OUTPUTS: usize = 3;
const DEFAULT_TX_CACHE_SIZE: usize = 1000;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct JanitorConfig {
    /// Queue wait while there are pruned spends left to check.
    pub busy_wait: Duration,
    /// Queue wait while there is nothing to do.
    pub idle_wait: Duration,
    /// Minimum spacing between two cleaning passes.
    pub min_interval: Duration,
    pub stop_timeout: Duration,
}

impl Default for JanitorConfig {
    fn default() -> Self {
        Self {
            busy_wait: Duration::from_millis(5_000),
            idle_wait: Duration::from_millis(20_000),
            min_interval: Duration::from_millis(1_000),
            stop_timeout: Duration::from_millis(3_000),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WalletConfig {
    pub network: Network,
    pub coinbase_maturity: i32,
    pub confirmed_only: bool,
    /// `None` means no fee estimate is available; only fixed-fee construction works.
    pub fee_per_kb: Option<Amount>,
    pub max_fee_rate: Amount,
    pub dust_threshold: Amount,
    pub use_change: bool,
    pub multiple_change: bool,
    pub max_change_outputs: usize,
    pub gap_limit: usize,
    pub gap_limit_for_change: usize,
    pub tokens_enabled: bool,
    pub janitor: JanitorConfig,
    pub tx_cache_size: usize,
    pub log: LogConfig,
}

impl Default for WalletConfig {
    fn default() -> Self {
        Self {
            network: Network::Mainnet,
            coinbase_maturity: COINBASE_MATURITY,
            confirmed_only: false,
            fee_per_kb: Some(DEFAULT_FEE_PER_KB),
            max_fee_rate: MAX_FEE_RATE_SATS_PER_BYTE,
            dust_threshold: DUST_THRESHOLD,
            use_change: true,
            multiple_change: false,
            max_change_outputs: DEFAULT_MAX_CHANGE_OUTPUTS,
            gap_limit: DEFAULT_GAP_LIMIT,
            gap_limit_for_change: DEFAULT_GAP_LIMIT_FOR_CHANGE,
            tokens_enabled: true,
            janitor: JanitorConfig::default(),
            tx_cache_size: DEFAULT_TX_CACHE_SIZE,
            log: LogConfig::default(),
        }
    }
}

impl WalletConfig {
    /// Defaults overlaid with `path`. A missing file yields the defaults.
    pub fn from_conf_file(path: &Path) -> Result<Self, WalletError> {
        let mut config = Self::default();
        if let Some(conf) = load_wallet_conf(path)? {
            config.apply_conf(&conf, path)?;
        }
        Ok(config)
    }

    pub fn apply_conf(
        &mut self,
        conf: &HashMap<String, Vec<String>>,
        source: &Path,
    ) -> Result<(), WalletError> {
        let last = |key: &str| conf.get(key).and_then(|values| values.last());

        if let Some(raw) = last("network") {
            self.network = Network::parse(raw).ok_or_else(|| invalid(source, "network", raw))?;
        }
        if let Some(raw) = last("coinbasematurity") {
            self.coinbase_maturity = parse_number(source, "coinbasematurity", raw)?;
            if self.coinbase_maturity < 0 {
                return Err(invalid(source, "coinbasematurity", raw));
            }
        }
        if let Some(raw) = last("confirmedonly") {
            self.confirmed_only = parse_flag(source, "confirmedonly", raw)?;
        }
        if let Some(raw) = last("feeperkb") {
            self.fee_per_kb = if raw.eq_ignore_ascii_case("none") {
                None
            } else {
                let fee: Amount = parse_number(source, "feeperkb", raw)?;
                if fee < 0 {
                    return Err(invalid(source, "feeperkb", raw));
                }
                Some(fee)
            };
        }
        if let Some(raw) = last("maxfeerate") {
            self.max_fee_rate = parse_number(source, "maxfeerate", raw)?;
            if self.max_fee_rate <= 0 {
                return Err(invalid(source, "maxfeerate", raw));
            }
        }
        if let Some(raw) = last("dustthreshold") {
            self.dust_threshold = parse_number(source, "dustthreshold", raw)?;
        }
        if let Some(raw) = last("usechange") {
            self.use_change = parse_flag(source, "usechange", raw)?;
        }
        if let Some(raw) = last("multiplechange") {
            self.multiple_change = parse_flag(source, "multiplechange", raw)?;
        }
        if let Some(raw) = last("maxchangeoutputs") {
            self.max_change_outputs = parse_number(source, "maxchangeoutputs", raw)?;
            if self.max_change_outputs == 0 {
                return Err(invalid(source, "maxchangeoutputs", raw));
            }
        }
        if let Some(raw) = last("gaplimit") {
            self.gap_limit = parse_number(source, "gaplimit", raw)?;
        }
        if let Some(raw) = last("gaplimitforchange") {
            self.gap_limit_for_change = parse_number(source, "gaplimitforchange", raw)?;
        }
        if let Some(raw) = last("tokens") {
            self.tokens_enabled = parse_flag(source, "tokens", raw)?;
        }
        if let Some(raw) = last("janitorbusywaitms") {
            self.janitor.busy_wait = parse_millis(source, "janitorbusywaitms", raw)?;
        }
        if let Some(raw) = last("janitoridlewaitms") {
            self.janitor.idle_wait = parse_millis(source, "janitoridlewaitms", raw)?;
        }
        if let Some(raw) = last("janitorintervalms") {
            self.janitor.min_interval = parse_millis(source, "janitorintervalms", raw)?;
        }
        if let Some(raw) = last("janitorstoptimeoutms") {
            self.janitor.stop_timeout = parse_millis(source, "janitorstoptimeoutms", raw)?;
        }
        if let Some(raw) = last("txcachesize") {
            self.tx_cache_size = parse_number(source, "txcachesize", raw)?;
        }
        if let Some(raw) = last("loglevel") {
            self.log.level = Level::parse(raw).ok_or_else(|| invalid(source, "loglevel", raw))?;
        }
        if let Some(raw) = last("logformat") {
            self.log.format =
                Format::parse(raw).ok_or_else(|| invalid(source, "logformat", raw))?;
        }
        if let Some(raw) = last("logtimestamps") {
            self.log.timestamps = parse_flag(source, "logtimestamps", raw)?;
        }
        Ok(())
    }

    /// Installs the configured log level and format process-wide.
    pub fn init_logging(&self) {
        slpwallet_log::init(self.log);
    }

    /// Fee for a transaction of `size` bytes at the configured rate.
    pub fn estimate_fee(&self, size: usize) -> Option<Amount> {
        self.fee_per_kb
            .map(|fee_per_kb| fee_per_kb.saturating_mul(size as Amount) / 1000)
    }
}

pub fn load_wallet_conf(path: &Path) -> Result<Option<HashMap<String, Vec<String>>>, WalletError> {
    let contents = match fs::read_to_string(path) {
        Ok(contents) => contents,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(err) => return Err(WalletError::Io(err)),
    };

    let mut out: HashMap<String, Vec<String>> = HashMap::new();
    for raw_line in contents.lines() {
        let mut line = raw_line.trim();
        if line.is_empty() || line.starts_with('#') || line.starts_with(';') {
            continue;
        }
        if let Some(idx) = line.find('#') {
            line = &line[..idx];
        }
        if let Some(idx) = line.find(';') {
            line = &line[..idx];
        }
        line = line.trim();
        if line.is_empty() {
            continue;
        }
        let (key, value) = match line.split_once('=') {
            Some((key, value)) => (key.trim(), value.trim()),
            None => (line, "1"),
        };
        if key.is_empty() {
            continue;
        }
        out.entry(key.to_ascii_lowercase())
            .or_default()
            .push(value.to_string());
    }
    Ok(Some(out))
}

pub fn parse_conf_bool(value: &str) -> Option<bool> {
    let value = value.trim();
    if value.is_empty() {
        return Some(true);
    }
    match value.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" => Some(true),
        "0" | "false" | "no" => Some(false),
        _ => None,
    }
}

fn invalid(source: &Path, key: &str, raw: &str) -> WalletError {
    WalletError::Config(format!("invalid {key} '{raw}' in {}", source.display()))
}

fn parse_number<T: FromStr>(source: &Path, key: &str, raw: &str) -> Result<T, WalletError> {
    raw.parse::<T>().map_err(|_| invalid(source, key, raw))
}

fn parse_flag(source: &Path, key: &str, raw: &str) -> Result<bool, WalletError> {
    parse_conf_bool(raw).ok_or_else(|| invalid(source, key, raw))
}

fn parse_millis(source: &Path, key: &str, raw: &str) -> Result<Duration, WalletError> {
    parse_number::<u64>(source, key, raw).map(Duration::from_millis)
}
