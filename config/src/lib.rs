//! Elusiv Configuration
//!
//! Shared configuration crate for the client and the CLI.
//!
//! Handles loading configuration from:
//! 1. ELUSIV_CONFIG env var (explicit path)
//! 2. ./elusiv.toml (current directory)
//! 3. ~/.elusiv/elusiv.toml (user home)
//!
//! Environment variables take precedence over TOML config.

use anyhow::{Context, Result};
use elusiv_client::fee::ProgramFee;
use elusiv_client::history::DEFAULT_BATCH_SIZE;
use elusiv_client::token::{TokenInfo, TokenRegistry};
use elusiv_client::{FixedPriceSource, PollConfig};
use serde::{Deserialize, Serialize};
use solana_commitment_config::CommitmentConfig;
use solana_sdk::pubkey::Pubkey;
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use std::{env, fs};

pub use elusiv_client::token;

const CONFIG_FILE_NAME: &str = "elusiv.toml";
const CONFIG_DIR_NAME: &str = ".elusiv";

// ============================================================================
// Default Constants
// ============================================================================

const DEFAULT_RPC_URL: &str = "https://api.mainnet-beta.solana.com";
const DEFAULT_PROGRAM_ID: &str = "2XsUe1FfrksLE95rwvntRux8v2iJJSNW2e9n6dTqj9eK";
const DEFAULT_STORAGE_ACCOUNT: &str = "DLJdB9i9bFuvFogRd3pz7Z8URMXYGEnZAKRJNu6iKev6";
const DEFAULT_COMMITMENT: &str = "finalized";
const DEFAULT_WARDEN_URL: &str = "https://warden.elusiv.io";
const DEFAULT_WARDEN_TIMEOUT_MS: u64 = 30_000;
const DEFAULT_POLL_INTERVAL_MS: u64 = 2_000;
const DEFAULT_POLL_TIMEOUT_MS: u64 = 120_000;
const DEFAULT_PRICE_ATTEMPTS: u32 = 3;
const DEFAULT_PRICE_RETRY_MS: u64 = 500;
const DEFAULT_SEED_PATH: &str = "~/.elusiv/seed";

// ============================================================================
// Config Structs
// ============================================================================

/// Root configuration structure (matches TOML layout)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ElusivConfig {
    #[serde(default)]
    pub solana: SolanaConfig,
    #[serde(default)]
    pub warden: WardenConfig,
    #[serde(default)]
    pub history: HistoryConfig,
    #[serde(default)]
    pub poll: PollTomlConfig,
    #[serde(default)]
    pub fee: FeeTomlConfig,
    #[serde(default)]
    pub wallet: WalletConfig,
    #[serde(default = "default_tokens")]
    pub tokens: Vec<TokenInfo>,
}

impl Default for ElusivConfig {
    fn default() -> Self {
        Self {
            solana: SolanaConfig::default(),
            warden: WardenConfig::default(),
            history: HistoryConfig::default(),
            poll: PollTomlConfig::default(),
            fee: FeeTomlConfig::default(),
            wallet: WalletConfig::default(),
            tokens: default_tokens(),
        }
    }
}

fn default_tokens() -> Vec<TokenInfo> {
    TokenRegistry::default().tokens().to_vec()
}

/// Solana connection configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SolanaConfig {
    #[serde(default = "default_rpc_url")]
    pub rpc_url: String,
    #[serde(default = "default_program_id")]
    pub program_id: String,
    #[serde(default = "default_storage_account")]
    pub storage_account: String,
    #[serde(default = "default_commitment")]
    pub commitment: String,
}

impl Default for SolanaConfig {
    fn default() -> Self {
        Self {
            rpc_url: DEFAULT_RPC_URL.into(),
            program_id: DEFAULT_PROGRAM_ID.into(),
            storage_account: DEFAULT_STORAGE_ACCOUNT.into(),
            commitment: DEFAULT_COMMITMENT.into(),
        }
    }
}

fn default_rpc_url() -> String {
    DEFAULT_RPC_URL.into()
}
fn default_program_id() -> String {
    DEFAULT_PROGRAM_ID.into()
}
fn default_storage_account() -> String {
    DEFAULT_STORAGE_ACCOUNT.into()
}
fn default_commitment() -> String {
    DEFAULT_COMMITMENT.into()
}

/// Warden (relay) configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WardenConfig {
    #[serde(default = "default_warden_url")]
    pub url: String,
    #[serde(default = "default_warden_timeout")]
    pub request_timeout_ms: u64,
}

impl Default for WardenConfig {
    fn default() -> Self {
        Self {
            url: DEFAULT_WARDEN_URL.into(),
            request_timeout_ms: DEFAULT_WARDEN_TIMEOUT_MS,
        }
    }
}

fn default_warden_url() -> String {
    DEFAULT_WARDEN_URL.into()
}
fn default_warden_timeout() -> u64 {
    DEFAULT_WARDEN_TIMEOUT_MS
}

/// History fetching
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryConfig {
    /// Nonces fetched per backward batch
    #[serde(default = "default_batch_size")]
    pub batch_size: u32,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
        }
    }
}

fn default_batch_size() -> u32 {
    DEFAULT_BATCH_SIZE
}

/// Commitment insertion polling (TOML format)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PollTomlConfig {
    #[serde(default = "default_poll_interval")]
    pub interval_ms: u64,
    #[serde(default = "default_poll_timeout")]
    pub timeout_ms: u64,
}

impl Default for PollTomlConfig {
    fn default() -> Self {
        Self {
            interval_ms: DEFAULT_POLL_INTERVAL_MS,
            timeout_ms: DEFAULT_POLL_TIMEOUT_MS,
        }
    }
}

fn default_poll_interval() -> u64 {
    DEFAULT_POLL_INTERVAL_MS
}
fn default_poll_timeout() -> u64 {
    DEFAULT_POLL_TIMEOUT_MS
}

/// Fee model configuration (TOML format)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeeTomlConfig {
    /// Commitments are hashed in batches of 2^min_batching_rate
    #[serde(default)]
    pub min_batching_rate: u32,
    #[serde(default)]
    pub fee_version: u32,
    #[serde(default = "default_price_attempts")]
    pub price_attempts: u32,
    #[serde(default = "default_price_retry")]
    pub price_retry_ms: u64,
    #[serde(default = "default_program_fee")]
    pub program: ProgramFee,
    /// Lamports per whole token, keyed by token symbol
    #[serde(default)]
    pub prices: BTreeMap<String, u64>,
}

impl Default for FeeTomlConfig {
    fn default() -> Self {
        Self {
            min_batching_rate: 0,
            fee_version: 0,
            price_attempts: DEFAULT_PRICE_ATTEMPTS,
            price_retry_ms: DEFAULT_PRICE_RETRY_MS,
            program: default_program_fee(),
            prices: BTreeMap::new(),
        }
    }
}

fn default_program_fee() -> ProgramFee {
    ProgramFee {
        lamports_per_tx: 5_000,
        base_commitment_subvention: 10_000,
        proof_subvention: 40_000,
        proof_base_tx_count: 62,
        ..ProgramFee::default()
    }
}
fn default_price_attempts() -> u32 {
    DEFAULT_PRICE_ATTEMPTS
}
fn default_price_retry() -> u64 {
    DEFAULT_PRICE_RETRY_MS
}

/// Wallet configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WalletConfig {
    /// File holding the raw seed (at least 32 bytes)
    #[serde(default = "default_seed_path")]
    pub seed_path: String,
}

impl Default for WalletConfig {
    fn default() -> Self {
        Self {
            seed_path: DEFAULT_SEED_PATH.into(),
        }
    }
}

fn default_seed_path() -> String {
    DEFAULT_SEED_PATH.into()
}

// ============================================================================
// Override Helpers
// ============================================================================

/// Set field from a variable if present
fn override_string(lookup: &impl Fn(&str) -> Option<String>, key: &str, field: &mut String) {
    if let Some(v) = lookup(key) {
        *field = v;
    }
}

/// Set field from a variable if present and parseable
fn override_parse<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str, field: &mut T) {
    if let Some(parsed) = lookup(key).and_then(|v| v.parse().ok()) {
        *field = parsed;
    }
}

fn parse_pubkey(value: &str, what: &str) -> Result<Pubkey> {
    Pubkey::from_str(value).with_context(|| format!("Invalid {what} in config: {value}"))
}

// ============================================================================
// Implementation
// ============================================================================

impl ElusivConfig {
    /// Load configuration from config file with env var overrides
    pub fn load() -> Result<Self> {
        let mut config = match Self::find_config_file() {
            Some(path) => {
                log::info!("Loading config from: {}", path.display());
                Self::read(&path)?
            }
            None => {
                log::info!("No config file found, using defaults and environment variables");
                Self::default()
            }
        };

        config.apply_env_overrides();
        Ok(config)
    }

    /// Load configuration from a specific file path
    pub fn load_from(path: &Path) -> Result<Self> {
        let mut config = Self::read(path)?;
        config.apply_env_overrides();
        Ok(config)
    }

    fn read(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))
    }

    /// Find the config file path
    fn find_config_file() -> Option<PathBuf> {
        // 1. Check ELUSIV_CONFIG env var
        if let Ok(path) = env::var("ELUSIV_CONFIG") {
            let path = PathBuf::from(path);
            if path.exists() {
                return Some(path);
            }
        }

        // 2. Check ./elusiv.toml (current directory)
        let local_path = PathBuf::from(CONFIG_FILE_NAME);
        if local_path.exists() {
            return Some(local_path);
        }

        // 3. Check ~/.elusiv/elusiv.toml
        Self::default_config_path().filter(|p| p.exists())
    }

    fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| env::var(key).ok());
    }

    /// Apply overrides from `lookup` (the process environment outside tests)
    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        // Solana
        override_string(&lookup, "SOLANA_RPC_URL", &mut self.solana.rpc_url);
        override_string(&lookup, "ELUSIV_PROGRAM_ID", &mut self.solana.program_id);
        override_string(&lookup, "ELUSIV_STORAGE_ACCOUNT", &mut self.solana.storage_account);

        // Warden
        override_string(&lookup, "ELUSIV_WARDEN_URL", &mut self.warden.url);

        // History
        override_parse(&lookup, "ELUSIV_HISTORY_BATCH", &mut self.history.batch_size);

        // Wallet
        override_string(&lookup, "ELUSIV_SEED_PATH", &mut self.wallet.seed_path);
    }

    /// Get the default config file path
    pub fn default_config_path() -> Option<PathBuf> {
        dirs::home_dir().map(|h| h.join(CONFIG_DIR_NAME).join(CONFIG_FILE_NAME))
    }

    /// Generate a sample config file
    pub fn generate_sample() -> String {
        let mut sample = Self::default();
        sample.fee.prices.insert("USDC".into(), 40_000);
        sample.fee.prices.insert("USDT".into(), 40_000);
        toml::to_string_pretty(&sample).unwrap_or_default()
    }

    // ------------------------------------------------------------------------
    // Parsed values
    // ------------------------------------------------------------------------

    pub fn program_id(&self) -> Result<Pubkey> {
        parse_pubkey(&self.solana.program_id, "program_id")
    }

    pub fn storage_account(&self) -> Result<Pubkey> {
        parse_pubkey(&self.solana.storage_account, "storage_account")
    }

    pub fn commitment(&self) -> Result<CommitmentConfig> {
        CommitmentConfig::from_str(&self.solana.commitment)
            .map_err(|_| anyhow::anyhow!("Invalid commitment level: {}", self.solana.commitment))
    }

    pub fn warden_timeout(&self) -> Duration {
        Duration::from_millis(self.warden.request_timeout_ms)
    }

    pub fn poll_config(&self) -> PollConfig {
        PollConfig {
            interval: Duration::from_millis(self.poll.interval_ms),
            timeout: Duration::from_millis(self.poll.timeout_ms),
        }
    }

    pub fn price_retry_delay(&self) -> Duration {
        Duration::from_millis(self.fee.price_retry_ms)
    }

    /// Seed path with a leading `~` expanded
    pub fn seed_path(&self) -> PathBuf {
        match self.wallet.seed_path.strip_prefix("~/") {
            Some(rest) => dirs::home_dir()
                .map(|h| h.join(rest))
                .unwrap_or_else(|| PathBuf::from(&self.wallet.seed_path)),
            None => PathBuf::from(&self.wallet.seed_path),
        }
    }

    /// Token registry built from `[[tokens]]`
    pub fn token_registry(&self) -> TokenRegistry {
        TokenRegistry::new(self.tokens.clone())
    }

    /// Fixed prices from `[fee.prices]`, resolved to token ids
    pub fn price_source(&self) -> Result<FixedPriceSource> {
        let registry = self.token_registry();
        let prices = self
            .fee
            .prices
            .iter()
            .map(|(symbol, price)| {
                let token = registry
                    .by_symbol(symbol)
                    .with_context(|| format!("Price configured for unknown token {symbol}"))?;
                Ok((token.id, *price))
            })
            .collect::<Result<HashMap<u16, u64>>>()?;
        Ok(FixedPriceSource::new(prices))
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use elusiv_client::price::PriceSource;

    #[test]
    fn test_default_config() {
        let config = ElusivConfig::default();
        assert_eq!(config.solana.rpc_url, DEFAULT_RPC_URL);
        assert_eq!(config.history.batch_size, DEFAULT_BATCH_SIZE);
        assert_eq!(config.fee.min_batching_rate, 0);
        assert_eq!(config.token_registry(), TokenRegistry::default());
        assert!(config.program_id().is_ok());
        assert!(config.storage_account().is_ok());
        assert_eq!(config.commitment().unwrap(), CommitmentConfig::finalized());
    }

    #[test]
    fn test_generate_sample() {
        let sample = ElusivConfig::generate_sample();
        assert!(sample.contains("[solana]"));
        assert!(sample.contains("[warden]"));
        assert!(sample.contains("[fee.program]"));
        assert!(sample.contains("[[tokens]]"));
    }

    #[test]
    fn test_parse_sample() {
        let sample = ElusivConfig::generate_sample();
        let parsed: ElusivConfig = toml::from_str(&sample).unwrap();
        assert_eq!(parsed.solana.program_id, DEFAULT_PROGRAM_ID);
        assert_eq!(parsed.fee.program.proof_base_tx_count, 62);
        assert_eq!(parsed.tokens.len(), 3);
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let parsed: ElusivConfig = toml::from_str(
            r#"
            [history]
            batch_size = 25

            [[tokens]]
            id = 0
            symbol = "LAMPORTS"
            decimals = 9
            "#,
        )
        .unwrap();
        assert_eq!(parsed.history.batch_size, 25);
        assert_eq!(parsed.poll.interval_ms, DEFAULT_POLL_INTERVAL_MS);
        assert_eq!(parsed.token_registry().tokens().len(), 1);
        assert!(parsed.token_registry().by_symbol("USDC").is_none());
    }

    #[test]
    fn test_overrides() {
        let vars: HashMap<&str, &str> = HashMap::from([
            ("SOLANA_RPC_URL", "http://127.0.0.1:8899"),
            ("ELUSIV_HISTORY_BATCH", "4"),
            ("ELUSIV_WARDEN_URL", "http://localhost:3000"),
        ]);
        let mut config = ElusivConfig::default();
        config.apply_overrides(|key| vars.get(key).map(|v| v.to_string()));
        assert_eq!(config.solana.rpc_url, "http://127.0.0.1:8899");
        assert_eq!(config.history.batch_size, 4);
        assert_eq!(config.warden.url, "http://localhost:3000");

        let mut config = ElusivConfig::default();
        config.apply_overrides(|key| (key == "ELUSIV_HISTORY_BATCH").then(|| "many".to_string()));
        assert_eq!(config.history.batch_size, DEFAULT_BATCH_SIZE);
    }

    #[tokio::test]
    async fn test_price_source_by_symbol() {
        let mut config = ElusivConfig::default();
        config.fee.prices.insert("usdc".into(), 41_000);
        let source = config.price_source().unwrap();
        assert_eq!(source.lamports_per_token(1).await.unwrap(), 41_000);

        config.fee.prices.insert("DOGE".into(), 1);
        assert!(config.price_source().is_err());
    }
}
