use std::collections::{BTreeMap, HashMap};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use solana_sdk::message::AddressLookupTableAccount;
use solana_sdk::pubkey::Pubkey;
use thiserror::Error;
use tokio::fs;
use tracing::{debug, warn};

pub const DEFAULT_CACHE_DIR: &str = "lookup_table_cache";
pub const CACHE_FILE: &str = "lookup_tables.json";

#[derive(Debug, Error)]
pub enum CacheWriteError {
    #[error("创建缓存目录失败 {path}: {source}")]
    CreateDir {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("序列化查找表缓存失败: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("写入缓存文件失败 {path}: {source}")]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// 一条缓存记录：查找表内容与抓取时间（毫秒）。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LookupTableCacheEntry {
    pub table: AddressLookupTableAccount,
    pub captured_at_ms: u64,
}

impl LookupTableCacheEntry {
    pub fn is_fresh(&self, now_ms: u64, max_age_ms: u64) -> bool {
        now_ms.saturating_sub(self.captured_at_ms) < max_age_ms
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoredAccount {
    #[serde(rename = "publicKey")]
    public_key: String,
    addresses: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoredEntry {
    account: StoredAccount,
    timestamp: u64,
}

/// 磁盘上的 `lookup_tables.json`，以表地址（base58）为键。
#[derive(Debug, Clone)]
pub struct LookupTableStore {
    dir: PathBuf,
    path: PathBuf,
}

impl LookupTableStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        let dir = dir.into();
        Self {
            path: dir.join(CACHE_FILE),
            dir,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// 读取缓存文件；文件缺失或损坏时返回空表，不影响后续使用。
    pub async fn load(&self) -> HashMap<Pubkey, LookupTableCacheEntry> {
        let bytes = match fs::read(&self.path).await {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == ErrorKind::NotFound => return HashMap::new(),
            Err(err) => {
                warn!(
                    target: "cache::alt",
                    path = %self.path.display(),
                    error = %err,
                    "读取查找表缓存失败，从空缓存开始"
                );
                return HashMap::new();
            }
        };

        let stored: BTreeMap<String, StoredEntry> = match serde_json::from_slice(&bytes) {
            Ok(stored) => stored,
            Err(err) => {
                warn!(
                    target: "cache::alt",
                    path = %self.path.display(),
                    error = %err,
                    "查找表缓存文件损坏，从空缓存开始"
                );
                return HashMap::new();
            }
        };

        let mut entries = HashMap::with_capacity(stored.len());
        for (key, entry) in stored {
            match decode_entry(&key, entry) {
                Some(decoded) => {
                    entries.insert(decoded.table.key, decoded);
                }
                None => {
                    warn!(target: "cache::alt", key = %key, "忽略无法解析的缓存条目");
                }
            }
        }
        debug!(
            target: "cache::alt",
            path = %self.path.display(),
            count = entries.len(),
            "已加载查找表缓存"
        );
        entries
    }

    /// 先写临时文件再 rename，读者不会看到写了一半的内容。
    pub async fn persist(
        &self,
        entries: &HashMap<Pubkey, LookupTableCacheEntry>,
    ) -> Result<(), CacheWriteError> {
        fs::create_dir_all(&self.dir)
            .await
            .map_err(|source| CacheWriteError::CreateDir {
                path: self.dir.clone(),
                source,
            })?;

        let stored: BTreeMap<String, StoredEntry> = entries
            .values()
            .map(|entry| (entry.table.key.to_string(), encode_entry(entry)))
            .collect();
        let data = serde_json::to_vec_pretty(&stored)?;

        let tmp_path = self.path.with_extension("json.tmp");
        fs::write(&tmp_path, data)
            .await
            .map_err(|source| CacheWriteError::Write {
                path: tmp_path.clone(),
                source,
            })?;
        fs::rename(&tmp_path, &self.path)
            .await
            .map_err(|source| CacheWriteError::Write {
                path: self.path.clone(),
                source,
            })?;
        Ok(())
    }
}

fn encode_entry(entry: &LookupTableCacheEntry) -> StoredEntry {
    StoredEntry {
        account: StoredAccount {
            public_key: entry.table.key.to_string(),
            addresses: entry
                .table
                .addresses
                .iter()
                .map(|address| address.to_string())
                .collect(),
        },
        timestamp: entry.captured_at_ms,
    }
}

fn decode_entry(key: &str, entry: StoredEntry) -> Option<LookupTableCacheEntry> {
    let table_key = Pubkey::from_str(key).ok()?;
    let addresses = entry
        .account
        .addresses
        .iter()
        .map(|value| Pubkey::from_str(value))
        .collect::<Result<Vec<_>, _>>()
        .ok()?;
    Some(LookupTableCacheEntry {
        table: AddressLookupTableAccount {
            key: table_key,
            addresses,
        },
        captured_at_ms: entry.timestamp,
    })
}

#[cfg(test)]
mod tests {
    use serde_json::Value;
    use tempfile::TempDir;

    use super::*;

    fn entry(addresses: usize, captured_at_ms: u64) -> LookupTableCacheEntry {
        LookupTableCacheEntry {
            table: AddressLookupTableAccount {
                key: Pubkey::new_unique(),
                addresses: (0..addresses).map(|_| Pubkey::new_unique()).collect(),
            },
            captured_at_ms,
        }
    }

    #[tokio::test(flavor = "current_thread")]
    async fn persist_then_load_preserves_order() {
        let temp = TempDir::new().expect("temp dir");
        let store = LookupTableStore::new(temp.path().join("nested"));
        let first = entry(5, 1_000);
        let mut entries = HashMap::new();
        entries.insert(first.table.key, first.clone());

        store.persist(&entries).await.expect("persist");
        let loaded = store.load().await;
        assert_eq!(loaded.get(&first.table.key), Some(&first));
    }

    #[tokio::test(flavor = "current_thread")]
    async fn file_layout_uses_public_key_and_timestamp() {
        let temp = TempDir::new().expect("temp dir");
        let store = LookupTableStore::new(temp.path());
        let item = entry(2, 42);
        let mut entries = HashMap::new();
        entries.insert(item.table.key, item.clone());
        store.persist(&entries).await.expect("persist");

        let raw = tokio::fs::read(store.path()).await.expect("read file");
        let json: Value = serde_json::from_slice(&raw).expect("json");
        let value = &json[item.table.key.to_string()];
        assert_eq!(value["timestamp"], 42);
        assert_eq!(value["account"]["publicKey"], item.table.key.to_string());
        assert_eq!(
            value["account"]["addresses"][1],
            item.table.addresses[1].to_string()
        );
    }

    #[tokio::test(flavor = "current_thread")]
    async fn corrupt_file_loads_empty() {
        let temp = TempDir::new().expect("temp dir");
        let store = LookupTableStore::new(temp.path());
        tokio::fs::write(store.path(), b"{not json")
            .await
            .expect("write garbage");
        assert!(store.load().await.is_empty());
    }

    #[test]
    fn freshness_is_strictly_below_max_age() {
        let item = entry(0, 1_000);
        assert!(item.is_fresh(1_999, 1_000));
        assert!(!item.is_fresh(2_000, 1_000));
    }
}
