//! Command-line flags. Everything else is configured through the environment.

use std::path::PathBuf;

use clap::Parser;

use crate::config::AppConfig;

#[derive(Debug, Parser)]
#[command(name = "arbitrage-engine", version, about = "DEX arbitrage detection and execution engine")]
pub struct Cli {
    /// JSON file with the pool universe (overrides POOLS_FILE).
    #[arg(long)]
    pub pools: Option<PathBuf>,

    /// Sign transactions but never relay them.
    #[arg(long)]
    pub dry_run: bool,

    /// Emit logs as JSON lines.
    #[arg(long)]
    pub json_logs: bool,

    /// Refresh once, print the queued candidates and exit.
    #[arg(long)]
    pub scan_only: bool,
}

impl Cli {
    /// Flags win over environment values.
    pub fn apply(&self, config: &mut AppConfig) {
        if let Some(pools) = &self.pools {
            config.pools_file = pools.clone();
        }
        if self.dry_run {
            config.execution.dry_run = true;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_parse() {
        let cli = Cli::parse_from(["arbitrage-engine", "--pools", "/tmp/p.json", "--dry-run", "--scan-only"]);
        assert_eq!(cli.pools, Some(PathBuf::from("/tmp/p.json")));
        assert!(cli.dry_run);
        assert!(cli.scan_only);
        assert!(!cli.json_logs);
    }

    #[test]
    fn flags_override_config() {
        let mut config = AppConfig::from_lookup(|key| match key {
            "RPC_URLS" => Some("http://localhost:8545".into()),
            "PRIVATE_KEY" => Some("0x01".into()),
            "EXECUTOR_ADDRESSES" => Some("0x00000000000000000000000000000000000000e1".into()),
            _ => None,
        })
        .unwrap();
        let cli = Cli::parse_from(["arbitrage-engine", "--pools", "mine.json", "--dry-run"]);
        cli.apply(&mut config);
        assert_eq!(config.pools_file, PathBuf::from("mine.json"));
        assert!(config.execution.dry_run);
    }
}
