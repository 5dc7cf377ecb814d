use directories::ProjectDirs;
use eyre::ContextCompat as _;
use std::path::PathBuf;

#[derive(Debug, Clone)]
pub struct VeilPaths {
    pub config_dir: PathBuf,
    pub data_dir: PathBuf,
    pub log_file: PathBuf,
}

impl VeilPaths {
    pub fn discover() -> eyre::Result<Self> {
        // Test/CI override knobs.
        if let (Ok(data_dir), Ok(config_dir)) = (
            std::env::var("VEIL_DATA_DIR"),
            std::env::var("VEIL_CONFIG_DIR"),
        ) {
            return Ok(Self::at(PathBuf::from(config_dir), PathBuf::from(data_dir)));
        }

        // macOS: ~/Library/Application Support/veil
        // Linux: ~/.config/veil and ~/.local/share/veil
        // Windows: %APPDATA%\\veil
        let proj = ProjectDirs::from("", "", "veil").context("failed to resolve project dirs")?;
        Ok(Self::at(
            proj.config_dir().to_path_buf(),
            proj.data_dir().to_path_buf(),
        ))
    }

    pub fn at(config_dir: PathBuf, data_dir: PathBuf) -> Self {
        let log_file = data_dir.join("veil.log.jsonl");
        Self {
            config_dir,
            data_dir,
            log_file,
        }
    }

    pub fn config_file(&self) -> PathBuf {
        self.config_dir.join("config.toml")
    }

    /// Directory of the encrypted and public wallet records.
    pub fn store_dir(&self) -> PathBuf {
        self.data_dir.join("store")
    }

    /// Database the privacy engine keeps its own (engine-key encrypted) state in.
    pub fn engine_db_dir(&self) -> PathBuf {
        self.data_dir.join("engine").join("db")
    }

    /// Cache for downloaded proving artifacts.
    pub fn artifact_dir(&self) -> PathBuf {
        self.data_dir.join("engine").join("artifacts")
    }

    pub fn ensure_private_dirs(&self) -> eyre::Result<()> {
        crate::fsutil::ensure_private_dir(&self.config_dir)?;
        crate::fsutil::ensure_private_dir(&self.data_dir)?;
        Ok(())
    }
}
