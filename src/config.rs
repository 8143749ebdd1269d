//! Configuration loader and application settings.
//!
//! Everything comes from environment variables (a `.env` file is loaded by the
//! binary first). Missing required keys stop the process before anything runs.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use ethers::types::Address;
use url::Url;

use crate::arbitrage::Funding;
use crate::engine::EngineConfig;
use crate::errors::{AppError, Result};
use crate::execution::{ExecutionConfig, ExecutorContract};
use crate::utils::RetryPolicy;

/// Signing key. Never printed.
#[derive(Clone)]
pub struct SecretKey(String);

impl SecretKey {
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for SecretKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SecretKey(***)")
    }
}

/// Read-side node settings.
#[derive(Debug, Clone)]
pub struct RpcConfig {
    pub urls: Vec<Url>,
    /// Concurrent in-flight reads per node.
    pub window: usize,
    /// Extra permits reserved for block-number calls.
    pub fast_lane: usize,
    pub retry: RetryPolicy,
}

/// Consolidated application configuration.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub rpc: RpcConfig,
    pub relay_urls: Vec<Url>,
    pub private_key: SecretKey,
    pub executors: Vec<ExecutorContract>,
    /// JSON array of pools read by the discovery feed.
    pub pools_file: PathBuf,
    /// Overwrite file-reported reserves with chain reads on every refresh.
    pub live_reserves: bool,
    /// Where the candidate repository is flushed on shutdown.
    pub candidates_file: Option<PathBuf>,
    pub engine: EngineConfig,
    pub execution: ExecutionConfig,
}

impl AppConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup. Empty values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = Env(lookup);

        let rpc_urls = env.urls("RPC_URLS")?;
        if rpc_urls.is_empty() {
            return Err(AppError::Config("RPC_URLS is required".into()));
        }
        let relay_urls = match env.get("RELAY_URLS") {
            Some(_) => env.urls("RELAY_URLS")?,
            None => rpc_urls.clone(),
        };
        let private_key = SecretKey(env.required("PRIVATE_KEY")?);
        let executors = env.executors("EXECUTOR_ADDRESSES")?;
        if executors.is_empty() {
            return Err(AppError::Config("EXECUTOR_ADDRESSES is required".into()));
        }

        let retry = RetryPolicy {
            attempts: env.parse("RPC_ATTEMPTS", 2)?,
            timeout: Duration::from_millis(env.parse("RPC_TIMEOUT_MS", 3_000)?),
            backoff: Duration::from_millis(env.parse("RPC_BACKOFF_MS", 100)?),
        };
        let rpc = RpcConfig {
            urls: rpc_urls,
            window: env.parse("RPC_WINDOW", 4)?,
            fast_lane: env.parse("RPC_FAST_LANE", 1)?,
            retry,
        };

        let native_token = env.address("NATIVE_TOKEN")?.unwrap_or_default();
        let oracle_max_age = Duration::from_secs(env.parse("ORACLE_MAX_AGE_SECS", 180)?);
        let gas_buffer_pct = env.parse("GAS_BUFFER_PCT", 20)?;

        let mut engine = EngineConfig {
            refresh_interval: Duration::from_secs(env.parse("REFRESH_SECS", 30)?),
            scan_interval: Duration::from_millis(env.parse("SCAN_INTERVAL_MS", 1_000)?),
            workers: env.parse("WORKERS", 4)?,
            queue_capacity: env.parse("QUEUE_CAPACITY", 64)?,
            usd_anchors: env.addresses("USD_ANCHORS")?,
            ..EngineConfig::default()
        };

        let scanner = &mut engine.scanner;
        scanner.min_edge = env.parse("MIN_EDGE", scanner.min_edge)?;
        scanner.min_liquidity_usd = env.parse("MIN_LIQUIDITY_USD", scanner.min_liquidity_usd)?;
        scanner.start_tokens = env.addresses("START_TOKENS")?;

        let candidate = &mut engine.candidate;
        candidate.loan_usd = env.parse("LOAN_USD", candidate.loan_usd)?;
        candidate.max_pool_share = env.parse("MAX_POOL_SHARE", candidate.max_pool_share)?;
        candidate.slippage_bps = env.parse("SLIPPAGE_BPS", candidate.slippage_bps)?;
        candidate.default_gas_cost_usd = env.parse("DEFAULT_GAS_COST_USD", candidate.default_gas_cost_usd)?;
        candidate.funding = match env.get("FUNDING").as_deref() {
            None | Some("flash") | Some("flash_loan") => Funding::FlashLoan,
            Some("wallet") => Funding::Wallet,
            Some(other) => {
                return Err(AppError::Config(format!("FUNDING must be flash or wallet, got {other}")));
            }
        };

        let protection = &mut engine.protection;
        protection.cooldown = Duration::from_secs(env.parse("COOLDOWN_SECS", protection.cooldown.as_secs())?);
        protection.lookback = Duration::from_secs(env.parse("LOOKBACK_SECS", protection.lookback.as_secs())?);
        protection.max_slippage_pct = env.parse("MAX_SLIPPAGE_PCT", protection.max_slippage_pct)?;
        protection.min_profit_usd = env.parse("MIN_PROFIT_USD", protection.min_profit_usd)?;
        protection.min_profit_bps = env.parse("MIN_PROFIT_BPS", protection.min_profit_bps)?;
        protection.oracle_max_age = oracle_max_age;
        protection.max_fee_per_gas_gwei = env.parse("MAX_FEE_PER_GAS_GWEI", protection.max_fee_per_gas_gwei)?;
        protection.max_gas_limit = env.parse("MAX_GAS_LIMIT", protection.max_gas_limit)?;
        protection.gas_buffer_pct = gas_buffer_pct;
        protection.native_token = native_token;
        protection.flash_sources = env.addresses("FLASH_SOURCES")?;
        protection.max_impact_pct = env.parse("MAX_IMPACT_PCT", protection.max_impact_pct)?;
        protection.profit_lock_pct = env.parse("PROFIT_LOCK_PCT", protection.profit_lock_pct)?;
        protection.retry = retry;

        let confirm_secs: u64 = env.parse("CONFIRM_TIMEOUT_SECS", 0)?;
        let execution = ExecutionConfig {
            chain_id: env.parse("CHAIN_ID", 1)?,
            dry_run: env.flag("DRY_RUN")?,
            attempt_all_executors: env.flag("ATTEMPT_ALL_EXECUTORS")?,
            relay_timeout: Duration::from_millis(env.parse("RELAY_TIMEOUT_MS", 4_000)?),
            confirm_timeout: (confirm_secs > 0).then(|| Duration::from_secs(confirm_secs)),
            confirm_poll: Duration::from_millis(env.parse("CONFIRM_POLL_MS", 2_000)?),
            gas_buffer_pct,
            native_token,
            oracle_max_age,
            retry,
        };

        Ok(Self {
            rpc,
            relay_urls,
            private_key,
            executors,
            pools_file: PathBuf::from(env.get("POOLS_FILE").unwrap_or_else(|| "pools.json".into())),
            live_reserves: env.flag("LIVE_RESERVES")?,
            candidates_file: env.get("CANDIDATES_FILE").map(PathBuf::from),
            engine,
            execution,
        })
    }
}

struct Env<F>(F);

impl<F> Env<F>
where
    F: Fn(&str) -> Option<String>,
{
    fn get(&self, key: &str) -> Option<String> {
        (self.0)(key)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }

    fn required(&self, key: &str) -> Result<String> {
        self.get(key)
            .ok_or_else(|| AppError::Config(format!("{key} is required")))
    }

    fn parse<T>(&self, key: &str, default: T) -> Result<T>
    where
        T: FromStr,
        T::Err: fmt::Display,
    {
        match self.get(key) {
            None => Ok(default),
            Some(raw) => raw
                .parse()
                .map_err(|e| AppError::Config(format!("{key}={raw} is invalid: {e}"))),
        }
    }

    fn flag(&self, key: &str) -> Result<bool> {
        match self.get(key).as_deref().map(str::to_ascii_lowercase).as_deref() {
            None | Some("0") | Some("false") | Some("no") => Ok(false),
            Some("1") | Some("true") | Some("yes") => Ok(true),
            Some(other) => Err(AppError::Config(format!("{key} must be a boolean, got {other}"))),
        }
    }

    fn list(&self, key: &str) -> Vec<String> {
        self.get(key)
            .map(|raw| {
                raw.split(',')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(String::from)
                    .collect()
            })
            .unwrap_or_default()
    }

    fn address(&self, key: &str) -> Result<Option<Address>> {
        self.get(key).map(|raw| parse_address(key, &raw)).transpose()
    }

    fn addresses(&self, key: &str) -> Result<Vec<Address>> {
        self.list(key).iter().map(|raw| parse_address(key, raw)).collect()
    }

    fn urls(&self, key: &str) -> Result<Vec<Url>> {
        self.list(key)
            .iter()
            .map(|raw| Url::parse(raw).map_err(AppError::from))
            .collect()
    }

    /// `name=0x..` entries; bare addresses are named by position.
    fn executors(&self, key: &str) -> Result<Vec<ExecutorContract>> {
        self.list(key)
            .iter()
            .enumerate()
            .map(|(i, entry)| {
                let (name, raw) = match entry.split_once('=') {
                    Some((name, raw)) => (name.trim().to_string(), raw.trim()),
                    None => (format!("executor-{i}"), entry.as_str()),
                };
                Ok(ExecutorContract {
                    name,
                    address: parse_address(key, raw)?,
                })
            })
            .collect()
    }
}

fn parse_address(key: &str, raw: &str) -> Result<Address> {
    raw.parse::<Address>()
        .map_err(|e| AppError::Config(format!("{key} has an invalid address {raw}: {e}")))
}
