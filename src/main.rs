//! Bootstrap binary: wire up configuration, logging, the keystore-backed
//! voter registry, and the ballot ledger, then report the instance's
//! public state. Transport (HTTP, CLI voting client) is out of scope here;
//! this binary only proves the pieces start up together.

use std::path::PathBuf;

use anyhow::{Context, Result};
use anonvote::config::{data_dir_from_env, Config};
use anonvote::ledger::Ledger;
use anonvote::logging::setup_logger;
use anonvote::registry::Registry;
use clap::Parser;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Directory to store application data (registry db, keystore, ledger).
    /// Defaults to $HOME/.anonvote.
    #[arg(short, long, default_value = "")]
    dir: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let data_dir = if args.dir.is_empty() {
        let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
        data_dir_from_env(PathBuf::from(home).join(".anonvote"))
    } else {
        PathBuf::from(args.dir)
    };

    let config = Config::new(data_dir);
    config
        .ensure_data_dir()
        .context("failed to create data directory")?;

    setup_logger(log::LevelFilter::Info, config.data_dir.join("app.log"))
        .expect("failed to initialize logger");
    log::info!("anonvote starting, data dir: {}", config.data_dir.display());

    let registry = Registry::open(&config.registry_db_path())
        .await
        .context("failed to open voter registry")?;
    let pub_key_pem = registry
        .bootstrap_keys()
        .await
        .context("failed to bootstrap issuer keypair")?;
    log::info!("issuer public key ready");
    println!("issuer public key:\n{pub_key_pem}");

    let ledger = Ledger::open(&config.ledger_path()).context("failed to open ballot ledger")?;
    let stats = ledger.get_stats();
    println!(
        "ledger ready: {} block(s), {} vote(s) recorded, candidates: {:?}",
        stats.block_count, stats.total_votes, stats.candidates
    );

    log::info!("anonvote ready");
    Ok(())
}
