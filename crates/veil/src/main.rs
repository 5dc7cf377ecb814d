#![expect(
    clippy::multiple_crate_versions,
    reason = "transitive dependency duplication"
)]

use clap::{Parser, Subcommand};
use eyre::Context as _;
use secrecy::SecretString;
use std::io::{IsTerminal as _, Write as _};
use std::sync::Arc;
use tracing_subscriber::prelude::*;
use veil::config::ConfigStore;
use veil::keys::{derive_master_seed, derive_owner_key_bytes, AuthSecret, KdfParams};
use veil::paths::VeilPaths;
use veil::store::{EncryptedStore, FileKv, WALLET_EXISTS, WALLET_ID};
use veil::wallet::{owner_account_address, ViewKey};

#[derive(Parser, Debug)]
#[command(name = "veil", version)]
struct Cli {
    #[command(subcommand)]
    cmd: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print resolved paths (useful for debugging).
    Paths,

    /// Print a quick self-diagnostic report (safe to paste; contains no secrets).
    Doctor {
        /// Emit JSON to stdout (machine-readable).
        #[arg(long, default_value_t = false)]
        json: bool,
    },

    /// Show whether a wallet exists, without unlocking it.
    Status,

    /// Derive the public account address for a password. Nothing is written.
    ///
    /// Reads the password from `VEIL_PASSWORD` or prompts when stdin is a terminal.
    Address,

    /// Delete every wallet record from the local store.
    Wipe {
        /// Required; there is no undo.
        #[arg(long, default_value_t = false)]
        yes: bool,
    },

    /// Inspect view keys.
    ViewKey {
        #[command(subcommand)]
        cmd: ViewKeyCommand,
    },
}

#[derive(Subcommand, Debug)]
enum ViewKeyCommand {
    /// Decode a shared view key and print its contents as JSON.
    Decode {
        /// Base64 view key.
        key: String,
    },
}

fn init_logging(paths: &VeilPaths) -> tracing_appender::non_blocking::WorkerGuard {
    let env_filter = tracing_subscriber::EnvFilter::from_default_env();
    let file_name = paths
        .log_file
        .file_name()
        .and_then(|s| s.to_str())
        .unwrap_or("veil.log.jsonl");
    let file_appender = tracing_appender::rolling::never(&paths.data_dir, file_name);
    let (file_writer, guard) = tracing_appender::non_blocking(file_appender);

    let stderr_layer = tracing_subscriber::fmt::layer()
        .json()
        .with_writer(std::io::stderr)
        .with_filter(env_filter.clone());
    let file_layer = tracing_subscriber::fmt::layer()
        .json()
        .with_writer(file_writer)
        .with_filter(env_filter);

    tracing_subscriber::registry()
        .with(stderr_layer)
        .with(file_layer)
        .init();

    guard
}

fn read_password() -> eyre::Result<SecretString> {
    if let Ok(p) = std::env::var("VEIL_PASSWORD") {
        return Ok(SecretString::new(p.into()));
    }
    if !std::io::stdin().is_terminal() {
        eyre::bail!("VEIL_PASSWORD is required when stdin is not a terminal");
    }
    let p = rpassword::prompt_password("Wallet password: ").context("read password")?;
    Ok(SecretString::new(p.into()))
}

fn print_json(v: &serde_json::Value) -> eyre::Result<()> {
    let s = serde_json::to_string_pretty(v).context("serialize output")?;
    writeln!(std::io::stdout().lock(), "{s}").context("write output")?;
    Ok(())
}

fn open_store(paths: &VeilPaths) -> eyre::Result<EncryptedStore> {
    let kv = FileKv::open(paths.store_dir()).context("open wallet store")?;
    Ok(EncryptedStore::new(Arc::new(kv)))
}

#[tokio::main]
async fn main() -> eyre::Result<()> {
    color_eyre::install()?;
    let cli = Cli::parse();

    let paths = VeilPaths::discover()?;
    paths.ensure_private_dirs().context("create veil dirs")?;
    let _log_guard = init_logging(&paths);

    match cli.cmd {
        Command::Paths => print_json(&serde_json::json!({
          "config_dir": paths.config_dir,
          "data_dir": paths.data_dir,
          "log_file": paths.log_file,
        })),
        Command::Doctor { json } => veil::doctor::run(json).await.context("doctor failed"),
        Command::Status => {
            let cfg = ConfigStore::new(&paths)
                .load_or_init_default()
                .context("load config")?;
            let store = open_store(&paths)?;
            let exists = store.get_public::<bool>(WALLET_EXISTS).await? == Some(true);
            let wallet_id = store.get_public::<String>(WALLET_ID).await?;
            print_json(&serde_json::json!({
              "wallet_exists": exists,
              "wallet_id": wallet_id,
              "engine_config_valid": cfg.validate().is_ok(),
            }))
        }
        Command::Address => {
            let auth = AuthSecret::from_password(&read_password()?);
            if auth.is_empty() {
                eyre::bail!("password must not be empty");
            }
            let seed = derive_master_seed(&auth, None, KdfParams::default())
                .await
                .context("derive master seed")?;
            let owner = derive_owner_key_bytes(&seed).context("derive owner key")?;
            let address = owner_account_address(&owner).context("owner address")?;
            print_json(&serde_json::json!({ "smart_wallet_address": address }))
        }
        Command::Wipe { yes } => {
            if !yes {
                eyre::bail!("refusing to wipe without --yes");
            }
            let store = open_store(&paths)?;
            let removed = store.list_keys().await?.len();
            store.clear_all().await.context("wipe wallet store")?;
            tracing::warn!(removed, "wallet store wiped");
            print_json(&serde_json::json!({ "wiped": true, "removed_records": removed }))
        }
        Command::ViewKey { cmd } => match cmd {
            ViewKeyCommand::Decode { key } => {
                let vk = ViewKey::decode(&key).context("decode view key")?;
                print_json(&serde_json::to_value(&vk).context("serialize view key")?)
            }
        },
    }
}
