//! Compiled query caching.
//!
//! Capturing a query and compiling its shaper only depend on the shape of
//! the expression tree, so the result is cached under the expression's
//! serialized structure. Parameter values are not part of the key; they
//! are bound when the pipeline is translated for one execution.
//!
//! ```rust
//! use std::sync::Arc;
//!
//! use prax_model::{ModelBuilder, ScalarKind};
//! use prax_mongodb::cache::QueryCache;
//! use prax_query::QueryBuilder;
//!
//! let model = Arc::new(
//!     ModelBuilder::new()
//!         .entity("Movie", |e| {
//!             e.collection("movies")
//!                 .property("Id", ScalarKind::Int32)
//!                 .key(["Id"]);
//!         })
//!         .build()
//!         .unwrap(),
//! );
//!
//! let cache = QueryCache::new(100);
//! let query = QueryBuilder::root("Movie").build();
//! let first = cache.get_or_compile(&model, &query).unwrap();
//! let second = cache.get_or_compile(&model, &query).unwrap();
//! assert!(Arc::ptr_eq(&first, &second));
//! assert_eq!(cache.stats().hits, 1);
//! ```

use std::collections::HashMap;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::{Mutex, RwLock};
use prax_model::Model;
use prax_query::{
    Expr, MongoQueryExpression, QueryContext, QueryError, QueryResult, QueryableMethodCapture,
    inject_materializers,
};
use tracing::{debug, info};

use crate::diagnostics::QueryLogger;
use crate::shaper::{CompiledShaper, ShaperCompiler};
use crate::translate::{EfToNativeTranslator, NativeQuery};

/// Cache key of a query expression.
///
/// Hashes by a digest of the serialized expression and compares the full
/// encoding, so two queries with the same digest never share an entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryKey {
    digest: u64,
    encoded: Arc<[u8]>,
}

impl QueryKey {
    /// Key the structure of an expression.
    pub fn of(expr: &Expr) -> QueryResult<Self> {
        let encoded =
            serde_json::to_vec(expr).map_err(|e| QueryError::serialization(e.to_string()))?;
        let mut hasher = DefaultHasher::new();
        encoded.hash(&mut hasher);
        Ok(Self {
            digest: hasher.finish(),
            encoded: encoded.into(),
        })
    }

    /// Digest of the serialized expression.
    #[inline]
    pub fn digest(&self) -> u64 {
        self.digest
    }
}

impl Hash for QueryKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.digest.hash(state);
    }
}

/// A captured query with its compiled shaper.
///
/// Shared through `Arc` by every execution of the same query.
#[derive(Debug)]
pub struct CompiledQuery {
    key: QueryKey,
    model: Arc<Model>,
    query: MongoQueryExpression,
    shaper: CompiledShaper,
}

impl CompiledQuery {
    /// Capture `expr`, inject materializers and compile the shaper.
    pub fn compile(model: Arc<Model>, expr: &Expr) -> QueryResult<Self> {
        let key = QueryKey::of(expr)?;
        let shaped = QueryableMethodCapture::new(&model).translate(expr)?;
        let shaper = inject_materializers(&model, shaped.shaper)?;
        let shaper = ShaperCompiler::new(&model, &shaped.query).compile(&shaper)?;
        debug!(
            key = key.digest(),
            collection = %shaped.query.collection,
            "Query compiled"
        );
        Ok(Self {
            key,
            model,
            query: shaped.query,
            shaper,
        })
    }

    /// Cache key.
    pub fn key(&self) -> &QueryKey {
        &self.key
    }

    /// The model the query was compiled against.
    pub fn model(&self) -> &Arc<Model> {
        &self.model
    }

    /// The captured query.
    pub fn query(&self) -> &MongoQueryExpression {
        &self.query
    }

    /// The compiled shaper.
    pub fn shaper(&self) -> &CompiledShaper {
        &self.shaper
    }

    /// Translate to a pipeline with this execution's parameters bound.
    pub fn translate(&self, context: &QueryContext, logger: &dyn QueryLogger) -> QueryResult<NativeQuery> {
        EfToNativeTranslator::new(&self.model, context, logger).translate(&self.query)
    }
}

#[derive(Debug)]
struct CacheEntry {
    compiled: Arc<CompiledQuery>,
    access_count: AtomicU64,
}

/// Statistics about cache usage.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct CacheStats {
    /// Number of cache hits.
    pub hits: u64,
    /// Number of cache misses.
    pub misses: u64,
    /// Number of evictions.
    pub evictions: u64,
    /// Number of insertions.
    pub insertions: u64,
}

impl CacheStats {
    /// Calculate the hit rate.
    #[inline]
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

/// A thread-safe cache of compiled queries.
///
/// When full, the least used quarter of the entries is evicted.
#[derive(Debug)]
pub struct QueryCache {
    max_size: usize,
    entries: RwLock<HashMap<QueryKey, CacheEntry>>,
    stats: Mutex<CacheStats>,
}

impl QueryCache {
    /// Create a cache holding at most `max_size` queries.
    pub fn new(max_size: usize) -> Self {
        info!(max_size, "QueryCache initialized");
        Self {
            max_size,
            entries: RwLock::new(HashMap::with_capacity(max_size)),
            stats: Mutex::new(CacheStats::default()),
        }
    }

    /// Look up a compiled query.
    pub fn get(&self, key: &QueryKey) -> Option<Arc<CompiledQuery>> {
        let entries = self.entries.read();
        let found = entries.get(key).map(|entry| {
            entry.access_count.fetch_add(1, Ordering::Relaxed);
            entry.compiled.clone()
        });
        drop(entries);

        let mut stats = self.stats.lock();
        if found.is_some() {
            stats.hits += 1;
        } else {
            stats.misses += 1;
        }
        found
    }

    /// Return the cached compilation of `expr`, compiling it on a miss.
    pub fn get_or_compile(&self, model: &Arc<Model>, expr: &Expr) -> QueryResult<Arc<CompiledQuery>> {
        let key = QueryKey::of(expr)?;
        if let Some(compiled) = self.get(&key) {
            return Ok(compiled);
        }
        let compiled = Arc::new(CompiledQuery::compile(model.clone(), expr)?);
        Ok(self.insert(compiled))
    }

    /// Insert a compiled query, returning the cached instance.
    ///
    /// When another thread inserted the same query first, its entry wins.
    pub fn insert(&self, compiled: Arc<CompiledQuery>) -> Arc<CompiledQuery> {
        if self.max_size == 0 {
            return compiled;
        }
        let mut entries = self.entries.write();
        if let Some(existing) = entries.get(compiled.key()) {
            return existing.compiled.clone();
        }
        if entries.len() >= self.max_size {
            let evicted = evict_least_used(&mut entries);
            self.stats.lock().evictions += evicted as u64;
        }
        entries.insert(
            compiled.key().clone(),
            CacheEntry {
                compiled: compiled.clone(),
                access_count: AtomicU64::new(0),
            },
        );
        self.stats.lock().insertions += 1;
        compiled
    }

    /// Check if a query is cached.
    pub fn contains(&self, key: &QueryKey) -> bool {
        self.entries.read().contains_key(key)
    }

    /// Drop every cached query.
    pub fn clear(&self) {
        self.entries.write().clear();
    }

    /// Number of cached queries.
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// Check if the cache is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// Maximum number of cached queries.
    pub fn max_size(&self) -> usize {
        self.max_size
    }

    /// Usage statistics.
    pub fn stats(&self) -> CacheStats {
        self.stats.lock().clone()
    }
}

impl Default for QueryCache {
    fn default() -> Self {
        Self::new(1000)
    }
}

/// Evict the least used 25% of the entries (at least one).
fn evict_least_used(entries: &mut HashMap<QueryKey, CacheEntry>) -> usize {
    let to_evict = (entries.len() / 4).max(1);
    let mut counts: Vec<(QueryKey, u64)> = entries
        .iter()
        .map(|(k, v)| (k.clone(), v.access_count.load(Ordering::Relaxed)))
        .collect();
    counts.sort_by_key(|(_, count)| *count);

    for (key, _) in counts.iter().take(to_evict) {
        entries.remove(key);
    }
    to_evict.min(counts.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use prax_model::{ModelBuilder, ScalarKind};
    use prax_query::QueryBuilder;
    use pretty_assertions::assert_eq;

    fn model() -> Arc<Model> {
        Arc::new(
            ModelBuilder::new()
                .entity("Movie", |e| {
                    e.collection("movies")
                        .property("Id", ScalarKind::Int32)
                        .property("Year", ScalarKind::Int32)
                        .key(["Id"]);
                })
                .build()
                .unwrap(),
        )
    }

    fn year_filter(year: i32) -> Expr {
        QueryBuilder::root("Movie")
            .filter(Expr::lambda(
                "m",
                Expr::param("m").member("Year").eq(Expr::constant(year)),
            ))
            .build()
    }

    #[test]
    fn test_structural_key() {
        assert_eq!(
            QueryKey::of(&year_filter(2000)).unwrap(),
            QueryKey::of(&year_filter(2000)).unwrap()
        );
        assert_ne!(
            QueryKey::of(&year_filter(2000)).unwrap(),
            QueryKey::of(&year_filter(2001)).unwrap()
        );
    }

    #[test]
    fn test_same_digest_does_not_share_an_entry() {
        let model = model();
        let cache = QueryCache::new(10);
        let first = cache.get_or_compile(&model, &year_filter(2000)).unwrap();

        let mut other = CompiledQuery::compile(model.clone(), &year_filter(2001)).unwrap();
        other.key.digest = first.key().digest();
        assert_ne!(&other.key, first.key());

        let other = cache.insert(Arc::new(other));
        assert!(!Arc::ptr_eq(&first, &other));
        assert_eq!(cache.len(), 2);

        let found = cache.get(other.key()).unwrap();
        assert!(Arc::ptr_eq(&found, &other));
        let found = cache.get(first.key()).unwrap();
        assert!(Arc::ptr_eq(&found, &first));
    }

    #[test]
    fn test_hit_and_miss() {
        let model = model();
        let cache = QueryCache::new(10);
        let query = year_filter(2000);

        let first = cache.get_or_compile(&model, &query).unwrap();
        let second = cache.get_or_compile(&model, &query).unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(
            cache.stats(),
            CacheStats {
                hits: 1,
                misses: 1,
                evictions: 0,
                insertions: 1,
            }
        );
        assert_eq!(cache.stats().hit_rate(), 0.5);
    }

    #[test]
    fn test_eviction_keeps_used_entries() {
        let model = model();
        let cache = QueryCache::new(4);
        let hot = year_filter(1990);
        cache.get_or_compile(&model, &hot).unwrap();
        cache.get_or_compile(&model, &hot).unwrap();

        for year in 2000..2004 {
            cache.get_or_compile(&model, &year_filter(year)).unwrap();
        }
        assert!(cache.len() <= 4);
        assert!(cache.contains(&QueryKey::of(&hot).unwrap()));
        assert!(cache.stats().evictions >= 1);
    }

    #[test]
    fn test_compile_errors_are_not_cached() {
        let model = model();
        let cache = QueryCache::new(10);
        let query = QueryBuilder::root("Missing").build();
        assert!(cache.get_or_compile(&model, &query).is_err());
        assert!(cache.is_empty());
    }

    #[test]
    fn test_zero_capacity_disables_caching() {
        let model = model();
        let cache = QueryCache::new(0);
        cache.get_or_compile(&model, &year_filter(2000)).unwrap();
        assert!(cache.is_empty());
    }
}
