//! Global configuration: `~/.config/mvault/config.toml`, overlaid with
//! `MVAULT_*` environment variables (the original Python service read these
//! straight off `pydantic-settings`; we keep a thin manual overlay rather
//! than pull in a config-layering crate for it).

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

fn default_true() -> bool {
    true
}

fn default_queue_retry_count() -> u32 {
    3
}

fn default_hash_workers() -> usize {
    2
}

fn default_remote_session_ttl_minutes() -> i64 {
    240
}

fn default_stall_timeout_secs() -> u64 {
    2
}

fn default_connect_timeout_secs() -> u64 {
    10
}

fn default_max_concurrent() -> usize {
    1
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8420
}

/// Vault-wide configuration. Loaded once at startup; config errors are fatal
///.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VaultConfig {
    pub local_models_root: PathBuf,
    pub lake_models_root: PathBuf,

    #[serde(default)]
    pub local_allow_delete: bool,
    #[serde(default)]
    pub lake_allow_delete: bool,

    /// The core worker is strictly single-writer; this is always 1 and kept
    /// only because the original surfaced it as a tunable.
    #[serde(default = "default_true")]
    pub queue_concurrency_one: bool,
    #[serde(default = "default_queue_retry_count")]
    pub queue_retry_count: u32,

    #[serde(default = "default_hash_workers")]
    pub hash_workers: usize,

    #[serde(default)]
    pub remote_base_url: String,
    #[serde(default = "default_remote_session_ttl_minutes")]
    pub remote_session_ttl_minutes: i64,

    #[serde(default)]
    pub civitai_api_key: Option<String>,
    #[serde(default)]
    pub huggingface_api_key: Option<String>,

    #[serde(default)]
    pub app_data_dir: Option<PathBuf>,

    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default = "default_stall_timeout_secs")]
    pub downloader_stall_timeout_seconds: u64,
    #[serde(default = "default_connect_timeout_secs")]
    pub downloader_connect_timeout_seconds: u64,
    #[serde(default = "default_max_concurrent")]
    pub downloader_max_concurrent: usize,
}

impl Default for VaultConfig {
    fn default() -> Self {
        Self {
            local_models_root: PathBuf::from("./local"),
            lake_models_root: PathBuf::from("./lake"),
            local_allow_delete: false,
            lake_allow_delete: false,
            queue_concurrency_one: true,
            queue_retry_count: default_queue_retry_count(),
            hash_workers: default_hash_workers(),
            remote_base_url: String::new(),
            remote_session_ttl_minutes: default_remote_session_ttl_minutes(),
            civitai_api_key: None,
            huggingface_api_key: None,
            app_data_dir: None,
            host: default_host(),
            port: default_port(),
            downloader_stall_timeout_seconds: default_stall_timeout_secs(),
            downloader_connect_timeout_seconds: default_connect_timeout_secs(),
            downloader_max_concurrent: default_max_concurrent(),
        }
    }
}

pub fn config_path() -> Result<PathBuf> {
    let xdg_dirs = xdg::BaseDirectories::with_prefix("mvault")?;
    Ok(xdg_dirs.place_config_file("config.toml")?)
}

/// Load configuration from disk, creating a default file if none exists, then
/// overlay any `MVAULT_*` environment variables on top.
pub fn load_or_init() -> Result<VaultConfig> {
    let path = config_path()?;
    let mut cfg = if !path.exists() {
        let default_cfg = VaultConfig::default();
        let toml = toml::to_string_pretty(&default_cfg)?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&path, toml)?;
        tracing::info!("created default config at {}", path.display());
        default_cfg
    } else {
        let data = std::fs::read_to_string(&path)
            .with_context(|| format!("reading config at {}", path.display()))?;
        toml::from_str(&data).with_context(|| format!("parsing config at {}", path.display()))?
    };

    apply_env_overlay(&mut cfg);
    validate(&cfg)?;
    Ok(cfg)
}

fn env_var(name: &str) -> Option<String> {
    std::env::var(format!("MVAULT_{name}")).ok()
}

/// Overlay `MVAULT_*` environment variables on top of the file-loaded config,
/// matching the original's pydantic-settings env precedence (env wins).
fn apply_env_overlay(cfg: &mut VaultConfig) {
    if let Some(v) = env_var("LOCAL_MODELS_ROOT") {
        cfg.local_models_root = PathBuf::from(v);
    }
    if let Some(v) = env_var("LAKE_MODELS_ROOT") {
        cfg.lake_models_root = PathBuf::from(v);
    }
    if let Some(v) = env_var("LOCAL_ALLOW_DELETE") {
        cfg.local_allow_delete = parse_bool(&v);
    }
    if let Some(v) = env_var("LAKE_ALLOW_DELETE") {
        cfg.lake_allow_delete = parse_bool(&v);
    }
    if let Some(v) = env_var("QUEUE_RETRY_COUNT") {
        if let Ok(n) = v.parse() {
            cfg.queue_retry_count = n;
        }
    }
    if let Some(v) = env_var("HASH_WORKERS") {
        if let Ok(n) = v.parse() {
            cfg.hash_workers = n;
        }
    }
    if let Some(v) = env_var("REMOTE_BASE_URL") {
        cfg.remote_base_url = v;
    }
    if let Some(v) = env_var("REMOTE_SESSION_TTL_MINUTES") {
        if let Ok(n) = v.parse() {
            cfg.remote_session_ttl_minutes = n;
        }
    }
    if let Some(v) = env_var("CIVITAI_API_KEY") {
        cfg.civitai_api_key = Some(v);
    }
    if let Some(v) = env_var("HUGGINGFACE_API_KEY") {
        cfg.huggingface_api_key = Some(v);
    }
    if let Some(v) = env_var("APP_DATA_DIR") {
        cfg.app_data_dir = Some(PathBuf::from(v));
    }
    if let Some(v) = env_var("HOST") {
        cfg.host = v;
    }
    if let Some(v) = env_var("PORT") {
        if let Ok(n) = v.parse() {
            cfg.port = n;
        }
    }
    if let Some(v) = env_var("DOWNLOADER_STALL_TIMEOUT_SECONDS") {
        if let Ok(n) = v.parse() {
            cfg.downloader_stall_timeout_seconds = n;
        }
    }
    if let Some(v) = env_var("DOWNLOADER_CONNECT_TIMEOUT_SECONDS") {
        if let Ok(n) = v.parse() {
            cfg.downloader_connect_timeout_seconds = n;
        }
    }
    if let Some(v) = env_var("DOWNLOADER_MAX_CONCURRENT") {
        if let Ok(n) = v.parse() {
            cfg.downloader_max_concurrent = n;
        }
    }
}

fn parse_bool(s: &str) -> bool {
    matches!(s.to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on")
}

fn validate(cfg: &VaultConfig) -> Result<()> {
    if cfg.local_models_root.as_os_str().is_empty() {
        anyhow::bail!("local_models_root must not be empty");
    }
    if cfg.lake_models_root.as_os_str().is_empty() {
        anyhow::bail!("lake_models_root must not be empty");
    }
    if cfg.hash_workers == 0 {
        anyhow::bail!("hash_workers must be at least 1");
    }
    Ok(())
}

/// Resolve the app-data directory (DB, logs) the way the original's
/// `get_app_data_dir` did, but via XDG rather than `%APPDATA%`.
pub fn app_data_dir(cfg: &VaultConfig) -> Result<PathBuf> {
    let dir = match &cfg.app_data_dir {
        Some(d) => d.clone(),
        None => {
            let xdg_dirs = xdg::BaseDirectories::with_prefix("mvault")?;
            xdg_dirs.get_state_home()
        }
    };
    std::fs::create_dir_all(&dir)?;
    Ok(dir)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_values() {
        let cfg = VaultConfig::default();
        assert_eq!(cfg.hash_workers, 2);
        assert_eq!(cfg.downloader_max_concurrent, 1);
        assert_eq!(cfg.port, 8420);
    }

    #[test]
    fn config_toml_roundtrip() {
        let cfg = VaultConfig::default();
        let toml = toml::to_string_pretty(&cfg).unwrap();
        let parsed: VaultConfig = toml::from_str(&toml).unwrap();
        assert_eq!(parsed.hash_workers, cfg.hash_workers);
        assert_eq!(parsed.local_models_root, cfg.local_models_root);
    }

    #[test]
    fn env_overlay_wins_over_file() {
        let mut cfg = VaultConfig::default();
        std::env::set_var("MVAULT_HASH_WORKERS", "7");
        apply_env_overlay(&mut cfg);
        std::env::remove_var("MVAULT_HASH_WORKERS");
        assert_eq!(cfg.hash_workers, 7);
    }

    #[test]
    fn validate_rejects_zero_hash_workers() {
        let mut cfg = VaultConfig::default();
        cfg.hash_workers = 0;
        assert!(validate(&cfg).is_err());
    }
}
