use anyhow::{anyhow, Result};
use std::{env, fmt::Display, path::PathBuf, str::FromStr};
use tracing::{info, warn};

use crate::archive::BackupPaths;
use crate::password::Scheme;

#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub store_path: PathBuf,
    pub upload_dir: PathBuf,
    pub backup_dir: PathBuf,
    pub password_scheme: Scheme,
    pub bcrypt_cost: u32,
}

impl Config {
    pub fn load() -> Result<Self> {
        Ok(Self {
            port: try_load("OUTFIT_PORT", "3000")?,
            store_path: try_load("OUTFIT_STORE_PATH", "wardrobe.json")?,
            upload_dir: try_load("OUTFIT_UPLOAD_DIR", "uploads")?,
            backup_dir: try_load("OUTFIT_BACKUP_DIR", "backups")?,
            password_scheme: try_load("OUTFIT_PASSWORD_SCHEME", "bcrypt")?,
            bcrypt_cost: try_load("OUTFIT_BCRYPT_COST", &bcrypt::DEFAULT_COST.to_string())?,
        })
    }

    pub fn backup_paths(&self) -> BackupPaths {
        BackupPaths {
            store: self.store_path.clone(),
            upload_root: self.upload_dir.clone(),
            backup_dir: self.backup_dir.clone(),
        }
    }
}

fn try_load<T: FromStr>(key: &str, default: &str) -> Result<T>
where
    T::Err: Display,
{
    let raw = env::var(key).unwrap_or_else(|_| {
        info!("{key} not set, using default: {default}");
        default.to_string()
    });

    raw.parse().map_err(|e| {
        warn!("Invalid {key} value: {e}");
        anyhow!("Invalid {key} value '{raw}': {e}")
    })
}
