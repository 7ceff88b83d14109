use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::debug;

use super::AppConfig;

pub const DEFAULT_CONFIG_PATHS: &[&str] = &["superbundle.yaml", "config/superbundle.yaml"];
pub const RPC_URL_ENV: &str = "SUPERBUNDLE_RPC_URL";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("读取配置文件失败 {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("解析配置文件失败 {path}: {source}")]
    Parse {
        path: PathBuf,
        source: serde_yaml::Error,
    },
    #[error("配置项 {field} 非法: {reason}")]
    Invalid { field: &'static str, reason: String },
}

/// 依次尝试显式路径或默认路径；都不存在时使用默认配置，最后叠加环境变量。
pub fn load_config(path: Option<PathBuf>) -> Result<AppConfig, ConfigError> {
    let candidate_paths = match path {
        Some(p) => vec![p],
        None => DEFAULT_CONFIG_PATHS
            .iter()
            .map(PathBuf::from)
            .collect::<Vec<PathBuf>>(),
    };

    let mut config = None;
    for candidate in candidate_paths {
        if let Some(loaded) = try_load_file(&candidate)? {
            debug!(target: "config", path = %candidate.display(), "已加载配置文件");
            config = Some(loaded);
            break;
        }
    }

    let mut config = config.unwrap_or_default();
    apply_env_overrides(&mut config);
    Ok(config)
}

pub fn parse_config(contents: &str, path: &Path) -> Result<AppConfig, ConfigError> {
    serde_yaml::from_str(contents).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

fn try_load_file(path: &Path) -> Result<Option<AppConfig>, ConfigError> {
    if !path.exists() {
        return Ok(None);
    }

    let contents = fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;

    parse_config(&contents, path).map(Some)
}

fn apply_env_overrides(config: &mut AppConfig) {
    if let Ok(value) = env::var(RPC_URL_ENV) {
        let trimmed = value.trim();
        if !trimmed.is_empty() {
            config.global.rpc_url = Some(trimmed.to_string());
        }
    }
}
