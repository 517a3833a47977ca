mod wallet;

use anyhow::{Context, Result, anyhow};
use elusiv_client::fee::{Fee, FeeCalculator, SendInputs};
use elusiv_client::price::fetch_price_with_retry;
use elusiv_client::token::TokenInfo;
use elusiv_client::{ElusivTransaction, SEND_ARITY, WardenClient, needs_merge};
use elusiv_config::ElusivConfig;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use wallet::{Wallet, resolve_token};

const DEFAULT_HISTORY_COUNT: usize = 10;

#[tokio::main]
async fn main() {
    env_logger::init();

    let args: Vec<String> = env::args().collect();

    if args.len() < 2 {
        print_usage();
        return;
    }

    let cmd = &args[1];

    let result = match cmd.as_str() {
        "balance" => balance(args.get(2).map(String::as_str)).await,
        "history" => history(&args[2..]).await,
        "fee" => match args.get(2).map(String::as_str) {
            Some("topup") => fee_topup(&args[3..]).await,
            Some("send") => fee_send(&args[3..]).await,
            _ => {
                println!("Usage: fee topup <amount> [token] | fee send <amount> [inputs] [token]");
                return;
            }
        },
        "await" => await_latest(args.get(2).map(String::as_str)).await,
        "relay" => match (args.get(2).map(String::as_str), args.get(3)) {
            (Some(kind @ ("topup" | "send")), Some(path)) => relay(kind, Path::new(path)).await,
            _ => {
                println!("Usage: relay topup <tx-file> | relay send <tx-file>");
                return;
            }
        },
        "genseed" => genseed(args.get(2)),
        "config" => show_config(args.get(2).map(String::as_str)),
        "help" | "--help" | "-h" => {
            print_usage();
            return;
        }
        _ => {
            println!("❌ Unknown command: {}", cmd);
            println!();
            print_usage();
            std::process::exit(1);
        }
    };

    if let Err(e) = result {
        eprintln!("❌ Error running {}: {:#}", cmd, e);
        std::process::exit(1);
    }
}

fn print_usage() {
    println!("Elusiv CLI - private balances and history from a seed");
    println!();
    println!("USAGE:");
    println!("  elusiv <command> [args]");
    println!();
    println!("WALLET COMMANDS:");
    println!("  balance [token]                   Private balance (default: LAMPORTS)");
    println!("  history [count] [token]           Latest transactions, newest first");
    println!("  await [token]                     Wait until the latest transaction is in the tree");
    println!("  genseed [path]                    Generate a new seed file");
    println!();
    println!("FEE COMMANDS:");
    println!("  fee topup <amount> [token]        Quote a top up");
    println!("  fee send <amount> [inputs] [token]");
    println!("                                    Quote a send; without [inputs] the");
    println!("                                    wallet's active commitments are used");
    println!();
    println!("WARDEN COMMANDS:");
    println!("  relay topup <tx-file>             Relay a signed top up transaction");
    println!("  relay send <tx-file>              Relay a signed send transaction");
    println!();
    println!("OTHER COMMANDS:");
    println!("  config [--sample]                 Show the loaded config or a sample");
    println!("  help                              Show this help message");
    println!();
    println!("Amounts are in whole tokens (\"1.5\") and converted with the token's decimals.");
    println!();
    println!("ENVIRONMENT VARIABLES:");
    println!("  ELUSIV_CONFIG          Config file path");
    println!("  SOLANA_RPC_URL         Solana RPC endpoint");
    println!("  ELUSIV_SEED_PATH       Seed file");
    println!("  ELUSIV_WARDEN_URL      Warden endpoint");
    println!("  RUST_LOG               Log level (debug/info/warn/error)");
}

async fn balance(symbol: Option<&str>) -> Result<()> {
    let wallet = Wallet::open(ElusivConfig::load()?)?;
    let token = resolve_token(&wallet.registry, symbol)?;
    let balance = wallet.history.private_balance(token.id).await?;
    println!("💰 {} {}", format_amount(balance, token.decimals), token.symbol);
    Ok(())
}

async fn history(args: &[String]) -> Result<()> {
    let count = match args.first() {
        Some(count) => count
            .parse()
            .map_err(|_| anyhow!("Count must be a valid number"))?,
        None => DEFAULT_HISTORY_COUNT,
    };
    let wallet = Wallet::open(ElusivConfig::load()?)?;
    let token = match args.get(1) {
        Some(symbol) => Some(resolve_token(&wallet.registry, Some(symbol))?),
        None => None,
    };

    let txs = wallet
        .history
        .fetch_last(count, token.map(|t| t.id), None)
        .await?;
    if txs.is_empty() {
        println!("No transactions yet");
        return Ok(());
    }
    for tx in &txs {
        println!("{}", describe(tx, wallet.registry.by_id(tx.token_id)));
    }
    Ok(())
}

fn describe(tx: &ElusivTransaction, token: Option<&TokenInfo>) -> String {
    let (symbol, decimals) = token.map_or(("?", 0), |t| (t.symbol.as_str(), t.decimals));
    let kind = match &tx.send {
        Some(send) if send.is_merge => "merge",
        Some(_) => "send",
        None => "top up",
    };
    let status = tx
        .status
        .map_or_else(|| "unknown".to_string(), |s| format!("{s:?}"));
    let signature = tx
        .signature
        .map_or_else(|| "-".to_string(), |s| s.to_string());
    format!(
        "#{:<5} {:<7} {:>18} {:<8} fee {:>12}  {:<9} {}",
        tx.nonce,
        kind,
        format_amount(tx.amount, decimals),
        symbol,
        tx.fee,
        status,
        signature
    )
}

fn calculator(config: &ElusivConfig) -> Result<FeeCalculator> {
    Ok(FeeCalculator::new(
        config.fee.program,
        config.fee.min_batching_rate,
        config.fee.fee_version,
    )?)
}

async fn price(config: &ElusivConfig, token: &TokenInfo) -> Result<Option<u64>> {
    let source = config.price_source()?;
    Ok(fetch_price_with_retry(
        &source,
        token.id,
        config.fee.price_attempts,
        config.price_retry_delay(),
    )
    .await?)
}

async fn fee_topup(args: &[String]) -> Result<()> {
    let amount = args.first().ok_or_else(|| anyhow!("Missing amount"))?;
    let config = ElusivConfig::load()?;
    let registry = config.token_registry();
    let token = resolve_token(&registry, args.get(1).map(String::as_str))?;
    let amount = parse_amount(amount, token.decimals)?;

    let fee = calculator(&config)?.estimate_topup_fee(amount, token, price(&config, token).await?)?;
    print_fee(&fee, token)
}

async fn fee_send(args: &[String]) -> Result<()> {
    let amount = args.first().ok_or_else(|| anyhow!("Missing amount"))?;
    let input_count = args
        .get(1)
        .map(String::as_str)
        .map(parse_input_count)
        .transpose()?;

    let wallet = Wallet::open(ElusivConfig::load()?)?;
    let token = resolve_token(&wallet.registry, args.get(2).map(String::as_str))?;
    let amount = parse_amount(amount, token.decimals)?;
    let next_index = wallet.history.tree().next_leaf_index().await? as u32;

    let inputs = match input_count {
        Some(n) => SendInputs::worst_case(n, next_index, token.id),
        None => {
            let lifecycle = wallet.lifecycle();
            if needs_merge(&lifecycle.active_transactions(token.id).await?) {
                println!("ℹ️  Active set is full; the next top up needs a merge first");
            }
            let commitments = lifecycle.active_commitments(token.id).await?;
            if commitments.is_empty() {
                return Err(anyhow!("Nothing to spend in {}", token.symbol));
            }
            SendInputs::spending(&commitments, next_index, token.id)
        }
    };

    let fee = calculator(&wallet.config)?.estimate_send_fee(
        amount,
        &inputs,
        token,
        true,
        None,
        price(&wallet.config, token).await?,
    )?;
    print_fee(&fee, token)
}

fn parse_input_count(value: &str) -> Result<usize> {
    match value.parse() {
        Ok(n) if (1..=SEND_ARITY).contains(&n) => Ok(n),
        _ => Err(anyhow!("Inputs must be a number between 1 and {}", SEND_ARITY)),
    }
}

async fn await_latest(symbol: Option<&str>) -> Result<()> {
    let wallet = Wallet::open(ElusivConfig::load()?)?;
    let poll = wallet.config.poll_config();
    let token = match symbol {
        Some(symbol) => Some(resolve_token(&wallet.registry, Some(symbol))?.id),
        None => None,
    };

    let latest = wallet.history.fetch_last(1, token, None).await?;
    let Some(tx) = latest.first() else {
        println!("No transactions yet");
        return Ok(());
    };
    if tx.is_confirmed() {
        println!("✅ Nonce {} is already confirmed", tx.nonce);
        return Ok(());
    }

    println!(
        "⏳ Waiting for nonce {} (every {:?}, up to {:?})...",
        tx.nonce, poll.interval, poll.timeout
    );
    wallet
        .history
        .tree()
        .await_commitment_insertion(tx.commitment_hash, tx.merkle_start_index as u64, poll)
        .await?;
    println!("✅ Nonce {} is in the tree: {}", tx.nonce, tx.commitment_hash);
    Ok(())
}

fn warden_client(config: &ElusivConfig) -> Result<WardenClient> {
    Ok(WardenClient::new(config.warden.url.clone(), config.warden_timeout())?)
}

async fn relay(kind: &str, path: &Path) -> Result<()> {
    let transaction = fs::read(path)
        .with_context(|| format!("Failed to read transaction file: {}", path.display()))?;
    let warden = warden_client(&ElusivConfig::load()?)?;

    println!("📡 Relaying {} through {}", kind, warden.url());
    let signature = match kind {
        "send" => warden.relay_send(&transaction).await?,
        _ => warden.relay_topup(&transaction).await?,
    };
    println!("✅ Submitted: {}", signature);
    Ok(())
}

fn print_fee(fee: &Fee, token: &TokenInfo) -> Result<()> {
    println!("🧾 Fee quote ({})", token.symbol);
    println!("  tx fee        {} lamports", fee.tx_fee);
    println!("  privacy fee   {} {}", format_amount(fee.privacy_fee, token.decimals), token.symbol);
    if fee.token_acc_rent > 0 {
        println!("  account rent  {} lamports", fee.token_acc_rent);
    }
    if fee.extra_fee > 0 {
        println!("  merge         {} lamports", fee.extra_fee);
    }
    println!(
        "  total         {} {}",
        format_amount(fee.total_in_token()?, token.decimals),
        token.symbol
    );
    Ok(())
}

fn genseed(path: Option<&String>) -> Result<()> {
    let path = match path {
        Some(path) => PathBuf::from(path),
        None => ElusivConfig::load()?.seed_path(),
    };
    wallet::generate_seed(&path)
}

fn show_config(flag: Option<&str>) -> Result<()> {
    if flag == Some("--sample") {
        print!("{}", ElusivConfig::generate_sample());
        return Ok(());
    }
    if let Some(path) = ElusivConfig::default_config_path() {
        println!("# default path: {}", path.display());
    }
    let config = ElusivConfig::load()?;
    println!("{:#?}", config);
    Ok(())
}

/// "1.5" with 9 decimals is 1_500_000_000
fn parse_amount(value: &str, decimals: u8) -> Result<u64> {
    let invalid = || anyhow!("Invalid amount: {}", value);
    let (whole, fraction) = value.split_once('.').unwrap_or((value, ""));
    if fraction.len() > decimals as usize || (whole.is_empty() && fraction.is_empty()) {
        return Err(invalid());
    }
    let scale = 10u64.checked_pow(decimals as u32).ok_or_else(invalid)?;
    let whole: u64 = if whole.is_empty() { 0 } else { whole.parse().map_err(|_| invalid())? };
    let fraction: u64 = if fraction.is_empty() {
        0
    } else {
        let padded = format!("{:0<width$}", fraction, width = decimals as usize);
        padded.parse().map_err(|_| invalid())?
    };
    whole
        .checked_mul(scale)
        .and_then(|w| w.checked_add(fraction))
        .ok_or_else(invalid)
}

fn format_amount(amount: u64, decimals: u8) -> String {
    if decimals == 0 {
        return amount.to_string();
    }
    let scale = 10u128.pow(decimals as u32);
    let whole = amount as u128 / scale;
    let fraction = amount as u128 % scale;
    if fraction == 0 {
        return whole.to_string();
    }
    let fraction = format!("{:0>width$}", fraction, width = decimals as usize);
    format!("{}.{}", whole, fraction.trim_end_matches('0'))
}
