use crate::config::VeilConfig;
use crate::paths::VeilPaths;
use crate::store::{EncryptedStore, FileKv, WALLET_EXISTS, WALLET_ID};
use eyre::Context as _;
use serde_json::json;
use std::sync::Arc;
use std::{fs, path::Path, path::PathBuf};

fn env_opt(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|s| s.trim().to_owned())
        .filter(|s| !s.is_empty())
}

fn try_parse_config(path: &Path) -> eyre::Result<VeilConfig> {
    let s = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: VeilConfig = toml::from_str(&s).context("parse config.toml")?;
    cfg.validate().context("validate config.toml")?;
    Ok(cfg)
}

struct PathsReport {
    config_dir: PathBuf,
    data_dir: PathBuf,
    log_file: PathBuf,
}

struct ConfigReport {
    path: PathBuf,
    exists: bool,
    valid: bool,
    error: Option<String>,
    ethereum_rpc_configured: bool,
    allow_direct_private_fallback: Option<bool>,
}

struct StoreReport {
    dir: PathBuf,
    exists: bool,
    record_count: usize,
    wallet_exists: bool,
    // Public id only; never any encrypted record.
    wallet_id: Option<String>,
    error: Option<String>,
}

struct DoctorReport {
    version: &'static str,
    paths: PathsReport,
    config: ConfigReport,
    store: StoreReport,
    env: serde_json::Value,
}

async fn read_wallet_markers(
    store: &EncryptedStore,
) -> crate::errors::Result<(usize, bool, Option<String>)> {
    let count = store.list_keys().await?.len();
    let exists = store.get_public::<bool>(WALLET_EXISTS).await? == Some(true);
    let id = store.get_public::<String>(WALLET_ID).await?;
    Ok((count, exists, id))
}

async fn inspect_store(dir: &Path) -> StoreReport {
    let mut r = StoreReport {
        dir: dir.to_path_buf(),
        exists: dir.is_dir(),
        record_count: 0,
        wallet_exists: false,
        wallet_id: None,
        error: None,
    };
    if !r.exists {
        return r;
    }
    let kv = match FileKv::open(dir) {
        Ok(kv) => Arc::new(kv),
        Err(e) => {
            r.error = Some(e.to_string());
            return r;
        }
    };
    match read_wallet_markers(&EncryptedStore::new(kv)).await {
        Ok((count, exists, id)) => {
            r.record_count = count;
            r.wallet_exists = exists;
            r.wallet_id = id;
        }
        Err(e) => r.error = Some(e.to_string()),
    }
    r
}

async fn collect(paths: &VeilPaths) -> DoctorReport {
    let config_path = paths.config_file();
    let config_exists = config_path.exists();
    let (valid, error, cfg) = if config_exists {
        match try_parse_config(&config_path) {
            Ok(cfg) => (true, None, Some(cfg)),
            Err(e) => (false, Some(format!("{e:#}")), None),
        }
    } else {
        (false, None, None)
    };

    let store = inspect_store(&paths.store_dir()).await;

    let env = json!({
      "VEIL_CONFIG_DIR": env_opt("VEIL_CONFIG_DIR"),
      "VEIL_DATA_DIR": env_opt("VEIL_DATA_DIR"),
      "VEIL_POLYGON_RPC_URL_set": env_opt("VEIL_POLYGON_RPC_URL").is_some(),
      "VEIL_ARBITRUM_RPC_URL_set": env_opt("VEIL_ARBITRUM_RPC_URL").is_some(),
      "VEIL_PASSWORD_set": std::env::var("VEIL_PASSWORD").is_ok(),
    });

    DoctorReport {
        version: env!("CARGO_PKG_VERSION"),
        paths: PathsReport {
            config_dir: paths.config_dir.clone(),
            data_dir: paths.data_dir.clone(),
            log_file: paths.log_file.clone(),
        },
        config: ConfigReport {
            path: config_path,
            exists: config_exists,
            valid,
            error,
            ethereum_rpc_configured: cfg
                .as_ref()
                .is_some_and(|c| c.rpc.ethereum_rpc_url.is_some()),
            allow_direct_private_fallback: cfg
                .as_ref()
                .map(|c| c.broadcast.allow_direct_private_fallback),
        },
        store,
        env,
    }
}

fn print_json(out: &mut impl std::io::Write, r: &DoctorReport) -> eyre::Result<()> {
    let s = serde_json::to_string_pretty(&json!({
      "ok": true,
      "version": r.version,
      "paths": {
        "config_dir": r.paths.config_dir,
        "data_dir": r.paths.data_dir,
        "log_file": r.paths.log_file,
      },
      "config": {
        "path": r.config.path,
        "exists": r.config.exists,
        "valid": r.config.valid,
        "error": r.config.error,
        "ethereum_rpc_configured": r.config.ethereum_rpc_configured,
        "allow_direct_private_fallback": r.config.allow_direct_private_fallback,
      },
      "store": {
        "dir": r.store.dir,
        "exists": r.store.exists,
        "record_count": r.store.record_count,
        "wallet_exists": r.store.wallet_exists,
        "wallet_id": r.store.wallet_id,
        "error": r.store.error,
      },
      "env": r.env,
      "hints": [
        "Set rpc.polygon_rpc_url and rpc.arbitrum_rpc_url in config.toml before the privacy engine can start.",
        "With broadcast.allow_direct_private_fallback = true, private transactions are submitted from a visible public address.",
      ]
    }))
    .context("serialize doctor json")?;
    writeln!(out, "{s}").context("write doctor json")?;
    Ok(())
}

fn print_human(out: &mut impl std::io::Write, r: &DoctorReport) -> eyre::Result<()> {
    writeln!(out, "Veil doctor (v{})", r.version).context("write header")?;
    writeln!(out).context("write newline")?;

    writeln!(out, "Paths:").context("write paths header")?;
    writeln!(out, "  config_dir: {}", r.paths.config_dir.display()).context("write paths")?;
    writeln!(out, "  data_dir:   {}", r.paths.data_dir.display()).context("write paths")?;
    writeln!(out, "  log_file:   {}", r.paths.log_file.display()).context("write paths")?;
    writeln!(out).context("write newline")?;

    writeln!(out, "Config:").context("write config header")?;
    writeln!(out, "  config.toml: {}", r.config.path.display()).context("write config")?;
    if !r.config.exists {
        writeln!(out, "  status: missing (will be created on first run)")
            .context("write config")?;
    } else if r.config.valid {
        writeln!(
            out,
            "  status: ok (ethereum rpc: {}, direct private fallback: {:?})",
            r.config.ethereum_rpc_configured, r.config.allow_direct_private_fallback
        )
        .context("write config")?;
    } else {
        writeln!(out, "  status: invalid").context("write config")?;
        if let Some(e) = &r.config.error {
            let first = e.lines().next().unwrap_or("parse error");
            writeln!(out, "  error: {first}").context("write config")?;
        }
    }
    writeln!(out).context("write newline")?;

    writeln!(out, "Wallet store:").context("write store header")?;
    writeln!(out, "  dir: {}", r.store.dir.display()).context("write store")?;
    writeln!(out, "  exists: {}", r.store.exists).context("write store")?;
    writeln!(out, "  records: {}", r.store.record_count).context("write store")?;
    writeln!(out, "  wallet_exists: {}", r.store.wallet_exists).context("write store")?;
    if let Some(id) = &r.store.wallet_id {
        writeln!(out, "  wallet_id: {id}").context("write store")?;
    }
    if let Some(e) = &r.store.error {
        writeln!(out, "  error: {e}").context("write store")?;
    }
    writeln!(out).context("write newline")?;

    writeln!(out, "Env (redacted):").context("write env header")?;
    writeln!(
        out,
        "  VEIL_CONFIG_DIR: {:?}",
        r.env.get("VEIL_CONFIG_DIR").and_then(|v| v.as_str())
    )
    .context("write env")?;
    writeln!(
        out,
        "  VEIL_DATA_DIR:   {:?}",
        r.env.get("VEIL_DATA_DIR").and_then(|v| v.as_str())
    )
    .context("write env")?;
    writeln!(
        out,
        "  VEIL_PASSWORD_set: {}",
        r.env
            .get("VEIL_PASSWORD_set")
            .and_then(serde_json::Value::as_bool)
            .unwrap_or(false)
    )
    .context("write env")?;
    Ok(())
}

pub async fn run(as_json: bool) -> eyre::Result<()> {
    let paths = VeilPaths::discover()?;
    let report = collect(&paths).await;
    let mut out = std::io::stdout().lock();
    if as_json {
        print_json(&mut out, &report)?;
    } else {
        print_human(&mut out, &report)?;
    }
    Ok(())
}
