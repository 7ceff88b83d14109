//! 地址查找表缓存：内存表 + JSON 落盘，按有效期判定命中。

pub mod alt;
pub mod store;

pub use alt::{
    CacheError, Clock, DEFAULT_MAX_AGE, LookupTableCache, LookupTableSource, RpcLookupTableSource,
    deserialize_lookup_table,
};
pub use store::{
    CACHE_FILE, CacheWriteError, DEFAULT_CACHE_DIR, LookupTableCacheEntry, LookupTableStore,
};
