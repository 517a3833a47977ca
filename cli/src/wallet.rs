use anyhow::{Context, Result, anyhow};
use elusiv_client::chain::{ChainReader, RpcChainReader};
use elusiv_client::token::{LAMPORTS_TOKEN_ID, TokenInfo, TokenRegistry};
use elusiv_client::{CommitmentLifecycle, HistoryManager, IdentifierFetcher, TreeGeometry, TreeManager};
use elusiv_config::ElusivConfig;
use elusiv_privacy::SeedKeys;
use log::debug;
use rand_core::{OsRng, TryRngCore};
use std::io::Write;
use std::path::Path;
use std::sync::Arc;
use std::{fs, fs::OpenOptions};

#[cfg(unix)]
use std::os::unix::fs::PermissionsExt;

const SEED_LEN: usize = 32;

/// Everything derived from the seed and the config
pub struct Wallet {
    pub config: ElusivConfig,
    pub registry: TokenRegistry,
    pub keys: Arc<SeedKeys>,
    pub history: Arc<HistoryManager>,
}

impl Wallet {
    pub fn open(config: ElusivConfig) -> Result<Self> {
        let seed_path = config.seed_path();
        let seed = read_seed(&seed_path)?;
        debug!("Seed loaded from {}", seed_path.display());
        let keys = Arc::new(SeedKeys::new(&seed).context("Invalid seed")?);

        let chain: Arc<dyn ChainReader> = Arc::new(RpcChainReader::with_commitment(
            config.solana.rpc_url.clone(),
            config.commitment()?,
        ));
        let tree = Arc::new(TreeManager::new(
            chain.clone(),
            config.storage_account()?,
            TreeGeometry::DEPLOYED,
        ));
        let fetcher = IdentifierFetcher::new(chain, config.program_id()?, keys.clone());
        debug!(
            "RPC {}, program {}, storage {}",
            config.solana.rpc_url, config.solana.program_id, config.solana.storage_account
        );
        let history = Arc::new(HistoryManager::new(
            fetcher,
            tree,
            keys.clone(),
            config.history.batch_size,
        ));

        Ok(Self {
            registry: config.token_registry(),
            config,
            keys,
            history,
        })
    }

    pub fn lifecycle(&self) -> CommitmentLifecycle {
        CommitmentLifecycle::new(self.history.clone(), self.keys.clone())
    }
}

/// Token by symbol, lamports when none is given
pub fn resolve_token<'a>(registry: &'a TokenRegistry, symbol: Option<&str>) -> Result<&'a TokenInfo> {
    match symbol {
        Some(symbol) => registry
            .by_symbol(symbol)
            .ok_or_else(|| anyhow!("Unknown token: {}", symbol)),
        None => registry
            .by_id(LAMPORTS_TOKEN_ID)
            .ok_or_else(|| anyhow!("Token registry has no lamports entry")),
    }
}

/// Seed file: a JSON byte array (like Solana keypair files) or raw bytes
fn read_seed(path: &Path) -> Result<Vec<u8>> {
    let contents =
        fs::read(path).with_context(|| format!("Failed to read seed file: {}", path.display()))?;
    Ok(serde_json::from_slice::<Vec<u8>>(&contents).unwrap_or(contents))
}

/// Write a fresh random seed, never overwriting an existing file
pub fn generate_seed(path: &Path) -> Result<()> {
    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty() && !d.exists()) {
        fs::create_dir_all(dir)?;
        println!("📁 Created directory: {}", dir.display());

        #[cfg(unix)]
        {
            // rwx------
            let mut perms = fs::metadata(dir)?.permissions();
            perms.set_mode(0o700);
            fs::set_permissions(dir, perms)?;
        }
    }

    if path.exists() {
        return Err(anyhow!(
            "File {} already exists. Remove it first or use a different path.",
            path.display()
        ));
    }

    println!("🔐 Generating new seed...");
    let mut seed = [0u8; SEED_LEN];
    OsRng
        .try_fill_bytes(&mut seed)
        .map_err(|e| anyhow!("OS randomness unavailable: {}", e))?;
    let json = serde_json::to_string(&seed.to_vec())?;

    let mut f = OpenOptions::new().write(true).create_new(true).open(path)?;

    #[cfg(unix)]
    {
        // rw-------
        let mut perms = f.metadata()?.permissions();
        perms.set_mode(0o600);
        fs::set_permissions(path, perms)?;
    }

    f.write_all(json.as_bytes())?;
    println!("✅ Wrote new seed to {}", path.display());
    Ok(())
}
