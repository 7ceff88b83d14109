use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use futures::future::try_join_all;
use parking_lot::RwLock;
use solana_address_lookup_table_interface::state::AddressLookupTable;
use solana_client::client_error::ClientError;
use solana_client::nonblocking::rpc_client::RpcClient;
use solana_sdk::account::Account;
use solana_sdk::message::AddressLookupTableAccount;
use solana_sdk::pubkey::Pubkey;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use super::store::{LookupTableCacheEntry, LookupTableStore};

const ALT_BATCH_LIMIT: usize = 100;

/// 默认缓存有效期：24 小时。
pub const DEFAULT_MAX_AGE: Duration = Duration::from_secs(24 * 60 * 60);

pub type Clock = Arc<dyn Fn() -> u64 + Send + Sync>;

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("拉取 ALT 失败: {0}")]
    Rpc(#[from] ClientError),
    #[error("以下 ALT 无法解析: {}", format_keys(.0))]
    Unresolved(Vec<Pubkey>),
}

fn format_keys(keys: &[Pubkey]) -> String {
    keys.iter()
        .map(|key| key.to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

/// ALT 数据来源；缓存只在未命中时调用。
#[async_trait]
pub trait LookupTableSource: Send + Sync {
    async fn fetch(&self, keys: &[Pubkey]) -> Result<Vec<AddressLookupTableAccount>, CacheError>;
}

/// 通过 `getMultipleAccounts` 分批拉取，批量失败时逐条回退。
pub struct RpcLookupTableSource {
    rpc: Arc<RpcClient>,
}

impl RpcLookupTableSource {
    pub fn new(rpc: Arc<RpcClient>) -> Self {
        Self { rpc }
    }

    async fn fetch_one(&self, address: &Pubkey) -> Result<Option<Account>, ClientError> {
        let response = self
            .rpc
            .get_account_with_commitment(address, self.rpc.commitment())
            .await?;
        Ok(response.value)
    }
}

#[async_trait]
impl LookupTableSource for RpcLookupTableSource {
    async fn fetch(&self, keys: &[Pubkey]) -> Result<Vec<AddressLookupTableAccount>, CacheError> {
        let mut collected = Vec::with_capacity(keys.len());

        for chunk in keys.chunks(ALT_BATCH_LIMIT) {
            let accounts = match self.rpc.get_multiple_accounts(chunk).await {
                Ok(accounts) => accounts,
                Err(err) => {
                    warn!(
                        target: "cache::alt",
                        error = %err,
                        count = chunk.len(),
                        "批量拉取 ALT 失败，尝试逐条回退"
                    );
                    try_join_all(chunk.iter().map(|address| self.fetch_one(address))).await?
                }
            };

            for (address, maybe_account) in chunk.iter().zip(accounts) {
                let Some(account) = maybe_account else {
                    warn!(target: "cache::alt", address = %address, "ALT 账户不存在");
                    continue;
                };
                match deserialize_lookup_table(address, &account) {
                    Some(table) => collected.push(table),
                    None => {
                        warn!(target: "cache::alt", address = %address, "反序列化 ALT 失败，跳过");
                    }
                }
            }
        }

        Ok(collected)
    }
}

pub fn deserialize_lookup_table(
    address: &Pubkey,
    account: &Account,
) -> Option<AddressLookupTableAccount> {
    AddressLookupTable::deserialize(&account.data)
        .ok()
        .map(|table| AddressLookupTableAccount {
            key: *address,
            addresses: table.addresses.into_owned(),
        })
}

fn system_now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|duration| duration.as_millis() as u64)
        .unwrap_or(0)
}

/// 带有效期的 ALT 缓存：内存表 + 可选落盘，未命中时批量拉取。
pub struct LookupTableCache {
    source: Arc<dyn LookupTableSource>,
    entries: RwLock<HashMap<Pubkey, LookupTableCacheEntry>>,
    store: Option<LookupTableStore>,
    persist_enabled: AtomicBool,
    writer: Mutex<()>,
    max_age: Duration,
    clock: Clock,
}

impl LookupTableCache {
    /// 只保存在内存中的缓存。
    pub fn in_memory(source: Arc<dyn LookupTableSource>, max_age: Duration) -> Self {
        Self {
            source,
            entries: RwLock::new(HashMap::new()),
            store: None,
            persist_enabled: AtomicBool::new(false),
            writer: Mutex::new(()),
            max_age,
            clock: Arc::new(system_now_ms),
        }
    }

    /// 从磁盘加载已有缓存；文件缺失或损坏时从空缓存开始。
    pub async fn open(
        source: Arc<dyn LookupTableSource>,
        store: LookupTableStore,
        max_age: Duration,
    ) -> Self {
        let entries = store.load().await;
        Self {
            source,
            entries: RwLock::new(entries),
            store: Some(store),
            persist_enabled: AtomicBool::new(true),
            writer: Mutex::new(()),
            max_age,
            clock: Arc::new(system_now_ms),
        }
    }

    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    pub fn persistence_enabled(&self) -> bool {
        self.persist_enabled.load(Ordering::Acquire)
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    fn max_age_ms(&self) -> u64 {
        self.max_age.as_millis() as u64
    }

    /// 返回命中项与新拉取项的并集，不保证顺序；来源未返回的键被静默丢弃。
    pub async fn resolve(
        &self,
        keys: &[Pubkey],
    ) -> Result<Vec<AddressLookupTableAccount>, CacheError> {
        let now = (self.clock)();
        let max_age = self.max_age_ms();

        let mut seen = HashSet::with_capacity(keys.len());
        let mut hits = Vec::new();
        let mut misses = Vec::new();
        {
            let entries = self.entries.read();
            for key in keys {
                if !seen.insert(*key) {
                    continue;
                }
                match entries.get(key) {
                    Some(entry) if entry.is_fresh(now, max_age) => hits.push(entry.table.clone()),
                    _ => misses.push(*key),
                }
            }
        }

        if misses.is_empty() {
            return Ok(hits);
        }

        debug!(
            target: "cache::alt",
            hits = hits.len(),
            misses = misses.len(),
            "ALT 缓存未命中，开始拉取"
        );
        let fetched = self.source.fetch(&misses).await?;
        if fetched.is_empty() {
            return Ok(hits);
        }

        {
            let mut entries = self.entries.write();
            for table in &fetched {
                entries.insert(
                    table.key,
                    LookupTableCacheEntry {
                        table: table.clone(),
                        captured_at_ms: now,
                    },
                );
            }
        }
        self.persist().await;

        hits.extend(fetched);
        Ok(hits)
    }

    /// 与 `resolve` 相同，但任一请求的键未解析时返回错误。
    pub async fn resolve_all(
        &self,
        keys: &[Pubkey],
    ) -> Result<Vec<AddressLookupTableAccount>, CacheError> {
        let tables = self.resolve(keys).await?;
        let found: HashSet<Pubkey> = tables.iter().map(|table| table.key).collect();
        let mut missing: Vec<Pubkey> = Vec::new();
        for key in keys {
            if !found.contains(key) && !missing.contains(key) {
                missing.push(*key);
            }
        }
        if missing.is_empty() {
            Ok(tables)
        } else {
            Err(CacheError::Unresolved(missing))
        }
    }

    async fn persist(&self) {
        let Some(store) = &self.store else {
            return;
        };
        let _guard = self.writer.lock().await;
        if !self.persistence_enabled() {
            return;
        }
        let snapshot = self.entries.read().clone();
        if let Err(err) = store.persist(&snapshot).await {
            self.persist_enabled.store(false, Ordering::Release);
            warn!(
                target: "cache::alt",
                path = %store.path().display(),
                error = %err,
                "写入查找表缓存失败，本进程后续仅使用内存缓存"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU64, AtomicUsize};

    use tempfile::TempDir;

    use super::*;

    struct ScriptedSource {
        tables: HashMap<Pubkey, AddressLookupTableAccount>,
        calls: AtomicUsize,
        requested: parking_lot::Mutex<Vec<Vec<Pubkey>>>,
    }

    impl ScriptedSource {
        fn new(tables: Vec<AddressLookupTableAccount>) -> Arc<Self> {
            Arc::new(Self {
                tables: tables.into_iter().map(|table| (table.key, table)).collect(),
                calls: AtomicUsize::new(0),
                requested: parking_lot::Mutex::new(Vec::new()),
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl LookupTableSource for ScriptedSource {
        async fn fetch(
            &self,
            keys: &[Pubkey],
        ) -> Result<Vec<AddressLookupTableAccount>, CacheError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.requested.lock().push(keys.to_vec());
            Ok(keys
                .iter()
                .filter_map(|key| self.tables.get(key).cloned())
                .collect())
        }
    }

    fn table(len: usize) -> AddressLookupTableAccount {
        AddressLookupTableAccount {
            key: Pubkey::new_unique(),
            addresses: (0..len).map(|_| Pubkey::new_unique()).collect(),
        }
    }

    fn manual_clock(start: u64) -> (Arc<AtomicU64>, Clock) {
        let now = Arc::new(AtomicU64::new(start));
        let handle = now.clone();
        (now, Arc::new(move || handle.load(Ordering::SeqCst)))
    }

    #[tokio::test(flavor = "current_thread")]
    async fn fresh_hit_skips_source() {
        let alt = table(4);
        let source = ScriptedSource::new(vec![alt.clone()]);
        let (_now, clock) = manual_clock(10_000);
        let cache = LookupTableCache::in_memory(source.clone(), Duration::from_secs(60))
            .with_clock(clock);

        let first = cache.resolve(&[alt.key]).await.expect("first resolve");
        let second = cache.resolve(&[alt.key]).await.expect("second resolve");

        assert_eq!(first, vec![alt.clone()]);
        assert_eq!(second, vec![alt]);
        assert_eq!(source.calls(), 1);
    }

    #[tokio::test(flavor = "current_thread")]
    async fn stale_entry_is_refetched() {
        let alt = table(2);
        let source = ScriptedSource::new(vec![alt.clone()]);
        let (now, clock) = manual_clock(0);
        let cache = LookupTableCache::in_memory(source.clone(), Duration::from_millis(1_000))
            .with_clock(clock);

        cache.resolve(&[alt.key]).await.expect("resolve");
        now.store(1_000, Ordering::SeqCst);
        cache.resolve(&[alt.key]).await.expect("resolve stale");

        assert_eq!(source.calls(), 2);
    }

    #[tokio::test(flavor = "current_thread")]
    async fn only_misses_reach_source() {
        let cached = table(1);
        let fresh = table(1);
        let source = ScriptedSource::new(vec![cached.clone(), fresh.clone()]);
        let cache = LookupTableCache::in_memory(source.clone(), DEFAULT_MAX_AGE);

        cache.resolve(&[cached.key]).await.expect("warm");
        let resolved = cache
            .resolve(&[cached.key, fresh.key])
            .await
            .expect("resolve");

        assert_eq!(resolved.len(), 2);
        assert_eq!(source.requested.lock().last(), Some(&vec![fresh.key]));
    }

    #[tokio::test(flavor = "current_thread")]
    async fn unknown_keys_drop_silently_but_resolve_all_reports_them() {
        let known = table(3);
        let unknown = Pubkey::new_unique();
        let source = ScriptedSource::new(vec![known.clone()]);
        let cache = LookupTableCache::in_memory(source, DEFAULT_MAX_AGE);

        let resolved = cache
            .resolve(&[known.key, unknown])
            .await
            .expect("resolve");
        assert_eq!(resolved, vec![known.clone()]);

        match cache.resolve_all(&[known.key, unknown]).await {
            Err(CacheError::Unresolved(missing)) => assert_eq!(missing, vec![unknown]),
            other => panic!("expected unresolved error, got {other:?}"),
        }
    }

    #[tokio::test(flavor = "current_thread")]
    async fn persisted_entries_survive_reopen() {
        let temp = TempDir::new().expect("temp dir");
        let alt = table(6);
        let source = ScriptedSource::new(vec![alt.clone()]);

        let cache = LookupTableCache::open(
            source.clone(),
            LookupTableStore::new(temp.path().join("cache")),
            DEFAULT_MAX_AGE,
        )
        .await;
        cache.resolve(&[alt.key]).await.expect("resolve");
        assert!(cache.persistence_enabled());

        let reopened = LookupTableCache::open(
            source.clone(),
            LookupTableStore::new(temp.path().join("cache")),
            DEFAULT_MAX_AGE,
        )
        .await;
        let resolved = reopened.resolve(&[alt.key]).await.expect("resolve");

        assert_eq!(resolved, vec![alt]);
        assert_eq!(source.calls(), 1);
    }

    #[tokio::test(flavor = "current_thread")]
    async fn persist_failure_downgrades_to_memory() {
        let temp = TempDir::new().expect("temp dir");
        let blocker = temp.path().join("blocker");
        tokio::fs::write(&blocker, b"file, not dir")
            .await
            .expect("write blocker");

        let alt = table(1);
        let source = ScriptedSource::new(vec![alt.clone()]);
        let cache = LookupTableCache::open(
            source.clone(),
            LookupTableStore::new(blocker.join("cache")),
            DEFAULT_MAX_AGE,
        )
        .await;

        let resolved = cache.resolve(&[alt.key]).await.expect("resolve");
        assert_eq!(resolved, vec![alt.clone()]);
        assert!(!cache.persistence_enabled());

        let again = cache.resolve(&[alt.key]).await.expect("memory hit");
        assert_eq!(again, vec![alt]);
        assert_eq!(source.calls(), 1);
    }

    #[test]
    fn deserialize_rejects_garbage() {
        let account = Account {
            lamports: 1,
            data: vec![1, 2, 3],
            owner: Pubkey::new_unique(),
            executable: false,
            rent_epoch: 0,
        };
        assert!(deserialize_lookup_table(&Pubkey::new_unique(), &account).is_none());
    }
}
