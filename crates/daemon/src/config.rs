use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use collection_vault_engine::backup::{DEFAULT_COLLECTIONS, DEFAULT_UPLOAD_DIRS};
use collection_vault_engine::{BackupConfig, RestoreConfig};
use serde::Deserialize;

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub storage: StorageConfig,
    pub backup: BackupSection,
    pub security: SecurityConfig,
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct ServerConfig {
    pub listen: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct StorageConfig {
    pub root: Option<String>,
    pub database_url: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct BackupSection {
    pub collections: Option<Vec<String>>,
    pub upload_root: Option<String>,
    pub upload_dirs: Option<Vec<String>>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct SecurityConfig {
    pub api_token: Option<String>,
    pub csrf_token: Option<String>,
}

pub fn load_config(path: &Path) -> Result<Config> {
    let contents =
        std::fs::read_to_string(path).with_context(|| format!("reading config file {path:?}"))?;
    toml::from_str(&contents).with_context(|| format!("parsing config file {path:?}"))
}

/// Effective settings: environment over config file over defaults.
#[derive(Debug, Clone)]
pub struct Settings {
    pub listen: String,
    pub root: PathBuf,
    pub database_url: String,
    pub collections: Vec<String>,
    pub upload_root: PathBuf,
    pub upload_dirs: Vec<String>,
    pub api_token: Option<String>,
    pub csrf_token: Option<String>,
}

impl Settings {
    pub fn from_env(cfg: &Config) -> Self {
        Self::resolve(cfg, |key| std::env::var(key).ok())
    }

    pub fn resolve(cfg: &Config, env: impl Fn(&str) -> Option<String>) -> Self {
        let root = PathBuf::from(
            env("VAULT_ROOT")
                .or_else(|| cfg.storage.root.clone())
                .unwrap_or_else(|| "./data".to_owned()),
        );
        let database_url = env("DATABASE_URL")
            .or_else(|| cfg.storage.database_url.clone())
            .unwrap_or_else(|| format!("sqlite:{}", root.join("collection-vault.db").display()));

        Self {
            listen: env("VAULT_LISTEN")
                .or_else(|| cfg.server.listen.clone())
                .unwrap_or_else(|| "127.0.0.1:8089".to_owned()),
            database_url,
            collections: cfg
                .backup
                .collections
                .clone()
                .unwrap_or_else(|| DEFAULT_COLLECTIONS.iter().map(|c| c.to_string()).collect()),
            upload_root: PathBuf::from(
                env("VAULT_UPLOAD_ROOT")
                    .or_else(|| cfg.backup.upload_root.clone())
                    .unwrap_or_else(|| "./public".to_owned()),
            ),
            upload_dirs: cfg
                .backup
                .upload_dirs
                .clone()
                .unwrap_or_else(|| DEFAULT_UPLOAD_DIRS.iter().map(|d| d.to_string()).collect()),
            api_token: env("VAULT_API_TOKEN").or_else(|| cfg.security.api_token.clone()),
            csrf_token: env("VAULT_CSRF_TOKEN").or_else(|| cfg.security.csrf_token.clone()),
            root,
        }
    }

    pub fn backups_dir(&self) -> PathBuf {
        self.root.join("backups")
    }

    pub fn registry_path(&self) -> PathBuf {
        self.root.join("state").join("databases.json")
    }

    pub fn backup_config(&self) -> BackupConfig {
        BackupConfig {
            backups_dir: self.backups_dir(),
            collections: self.collections.clone(),
            upload_root: self.upload_root.clone(),
            upload_dirs: self.upload_dirs.clone(),
        }
    }

    pub fn restore_config(&self) -> RestoreConfig {
        RestoreConfig {
            backups_dir: self.backups_dir(),
            upload_root: self.upload_root.clone(),
            upload_dirs: self.upload_dirs.clone(),
        }
    }
}
