//! 分析结果缓存：按模型内容哈希存取 [`MetadataBundle`]。
//!
//! Storage is behind [`BundleStore`] so hosts can keep bundles on disk
//! ([`DirectoryStore`], one `<hash>.json` per model) or in memory
//! ([`MemoryStore`]). [`AnalysisCache`] adds hit rules and a per-hash lock
//! so concurrent runs on the same model serialize.
use std::collections::HashMap;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use rustc_hash::FxHashMap;
use thiserror::Error;

use crate::analysis::AnalyzerKind;
use crate::report::{MetadataBundle, SCHEMA_VERSION};

pub mod hash;

pub use hash::{config_fingerprint, content_hash, session_fingerprint};

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("cache io error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("cannot encode bundle: {0}")]
    Encode(#[from] serde_json::Error),
}

pub trait BundleStore: Send + Sync {
    /// `Ok(None)` for a miss, including unreadable or outdated entries.
    fn load(&self, hash: &str) -> Result<Option<MetadataBundle>, CacheError>;
    fn store(&self, bundle: &MetadataBundle) -> Result<(), CacheError>;
    /// Returns whether an entry existed.
    fn remove(&self, hash: &str) -> Result<bool, CacheError>;
    fn list(&self) -> Result<Vec<String>, CacheError>;
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// One JSON document per hash under a directory.
#[derive(Debug, Clone)]
pub struct DirectoryStore {
    root: PathBuf,
}

impl DirectoryStore {
    pub fn new<P: AsRef<Path>>(root: P) -> Result<Self, CacheError> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root).map_err(|source| CacheError::Io {
            path: root.clone(),
            source,
        })?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn entry(&self, hash: &str) -> PathBuf {
        self.root.join(format!("{hash}.json"))
    }
}

impl BundleStore for DirectoryStore {
    fn load(&self, hash: &str) -> Result<Option<MetadataBundle>, CacheError> {
        let path = self.entry(hash);
        let content = match fs::read_to_string(&path) {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(source) => return Err(CacheError::Io { path, source }),
        };
        let bundle: MetadataBundle = match serde_json::from_str(&content) {
            Ok(bundle) => bundle,
            Err(e) => {
                log::warn!("ignoring corrupt cache entry {:?}: {}", path, e);
                return Ok(None);
            }
        };
        if bundle.schema_version != SCHEMA_VERSION || bundle.model.hash != hash {
            log::warn!(
                "ignoring cache entry {:?} (schema {}, expected {})",
                path,
                bundle.schema_version,
                SCHEMA_VERSION
            );
            return Ok(None);
        }
        Ok(Some(bundle))
    }

    fn store(&self, bundle: &MetadataBundle) -> Result<(), CacheError> {
        let path = self.entry(&bundle.model.hash);
        let json = serde_json::to_string_pretty(bundle)?;
        // readers never see a half-written entry
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, json).map_err(|source| CacheError::Io {
            path: tmp.clone(),
            source,
        })?;
        fs::rename(&tmp, &path).map_err(|source| CacheError::Io { path, source })
    }

    fn remove(&self, hash: &str) -> Result<bool, CacheError> {
        let path = self.entry(hash);
        match fs::remove_file(&path) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(source) => Err(CacheError::Io { path, source }),
        }
    }

    fn list(&self) -> Result<Vec<String>, CacheError> {
        let entries = fs::read_dir(&self.root).map_err(|source| CacheError::Io {
            path: self.root.clone(),
            source,
        })?;
        let mut hashes: Vec<String> = entries
            .filter_map(|entry| entry.ok())
            .filter_map(|entry| {
                let path = entry.path();
                if path.extension()? != "json" {
                    return None;
                }
                path.file_stem()?.to_str().map(str::to_string)
            })
            .collect();
        hashes.sort();
        Ok(hashes)
    }
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    bundles: Mutex<HashMap<String, MetadataBundle>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl BundleStore for MemoryStore {
    fn load(&self, hash: &str) -> Result<Option<MetadataBundle>, CacheError> {
        Ok(lock(&self.bundles).get(hash).cloned())
    }

    fn store(&self, bundle: &MetadataBundle) -> Result<(), CacheError> {
        lock(&self.bundles).insert(bundle.model.hash.clone(), bundle.clone());
        Ok(())
    }

    fn remove(&self, hash: &str) -> Result<bool, CacheError> {
        Ok(lock(&self.bundles).remove(hash).is_some())
    }

    fn list(&self) -> Result<Vec<String>, CacheError> {
        let mut hashes: Vec<String> = lock(&self.bundles).keys().cloned().collect();
        hashes.sort();
        Ok(hashes)
    }
}

/// Store handle plus hit rules, shared by the engine and the batch runner.
#[derive(Clone)]
pub struct AnalysisCache {
    store: Arc<dyn BundleStore>,
    locks: Arc<Mutex<FxHashMap<String, Arc<Mutex<()>>>>>,
}

impl AnalysisCache {
    pub fn new(store: Arc<dyn BundleStore>) -> Self {
        Self {
            store,
            locks: Arc::new(Mutex::new(FxHashMap::default())),
        }
    }

    pub fn in_directory<P: AsRef<Path>>(root: P) -> Result<Self, CacheError> {
        Ok(Self::new(Arc::new(DirectoryStore::new(root)?)))
    }

    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryStore::new()))
    }

    pub fn store_handle(&self) -> Arc<dyn BundleStore> {
        self.store.clone()
    }

    /// Lock serializing sessions on the same model hash.
    pub fn lock_for(&self, hash: &str) -> Arc<Mutex<()>> {
        let mut locks = lock(&self.locks);
        // an entry only the map still holds has no session behind it
        locks.retain(|key, held| key == hash || Arc::strong_count(held) > 1);
        locks
            .entry(hash.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// A hit needs the same thresholds and a summary for every requested analyzer.
    pub fn lookup(
        &self,
        hash: &str,
        config_fingerprint: &str,
        kinds: &[AnalyzerKind],
    ) -> Option<MetadataBundle> {
        let bundle = match self.store.load(hash) {
            Ok(bundle) => bundle?,
            Err(e) => {
                log::warn!("cache lookup for {hash} failed: {e}");
                return None;
            }
        };
        if bundle.config_fingerprint != config_fingerprint {
            log::debug!("cache entry {hash} was built with other thresholds or request parameters");
            return None;
        }
        if !bundle.covers(kinds) {
            log::debug!("cache entry {hash} does not cover the requested analyzers");
            return None;
        }
        let mut bundle = bundle;
        bundle.performance.cached = true;
        Some(bundle)
    }

    pub fn insert(&self, bundle: &MetadataBundle) -> Result<(), CacheError> {
        let mut stored = bundle.clone();
        stored.performance.cached = false;
        self.store.store(&stored)
    }

    pub fn invalidate(&self, hash: &str) -> Result<bool, CacheError> {
        self.store.remove(hash)
    }

    pub fn entries(&self) -> Result<Vec<String>, CacheError> {
        self.store.list()
    }

    /// Removes every entry; returns how many were dropped.
    pub fn clear(&self) -> Result<usize, CacheError> {
        let mut removed = 0;
        for hash in self.store.list()? {
            if self.store.remove(&hash)? {
                removed += 1;
            }
        }
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::aggregate::aggregate;
    use crate::analysis::{self, Deadline, Selection};
    use crate::config::AnalysisConfig;
    use crate::net::{Net, NetModel};
    use crate::report::BundleInputs;

    fn bundle(selection: &Selection) -> MetadataBundle {
        let model = NetModel::new("ring")
            .place("p1", 1.0)
            .place("p2", 0.0)
            .transition("t1")
            .transition("t2")
            .arc("p1", "t1")
            .arc("t1", "p2")
            .arc("p2", "t2")
            .arc("t2", "p1");
        let net = Net::from_model(&model).unwrap();
        let config = AnalysisConfig::default();
        let results = analysis::run_all(&net, &config, selection, Deadline::none());
        let elements = aggregate(Some(&net), &results);
        MetadataBundle::build(BundleInputs {
            model: &model,
            hash: content_hash(&model, None),
            config_fingerprint: config_fingerprint(&config),
            results: &results,
            elements,
            total: Duration::from_millis(1),
        })
    }

    fn scratch_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("pn-analyzer-{name}-{}", std::process::id()));
        let _ = fs::remove_dir_all(&dir);
        dir
    }

    #[test]
    fn directory_store_round_trip() {
        let dir = scratch_dir("roundtrip");
        let store = DirectoryStore::new(&dir).unwrap();
        let bundle = bundle(&Selection::All);
        store.store(&bundle).unwrap();
        assert_eq!(store.list().unwrap(), vec![bundle.model.hash.clone()]);
        assert_eq!(store.load(&bundle.model.hash).unwrap(), Some(bundle.clone()));
        assert!(store.remove(&bundle.model.hash).unwrap());
        assert!(!store.remove(&bundle.model.hash).unwrap());
        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn corrupt_or_outdated_entries_are_misses() {
        let dir = scratch_dir("corrupt");
        let store = DirectoryStore::new(&dir).unwrap();
        fs::write(dir.join("deadbeef.json"), "{ not json").unwrap();
        assert_eq!(store.load("deadbeef").unwrap(), None);

        let mut old = bundle(&Selection::All);
        old.schema_version = SCHEMA_VERSION + 1;
        store.store(&old).unwrap();
        assert_eq!(store.load(&old.model.hash).unwrap(), None);
        assert_eq!(store.load("missing").unwrap(), None);
        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn lookup_requires_coverage_and_matching_thresholds() {
        let cache = AnalysisCache::in_memory();
        let partial = bundle(&Selection::Only(vec![AnalyzerKind::PInvariants]));
        let hash = partial.model.hash.clone();
        let fingerprint = partial.config_fingerprint.clone();
        cache.insert(&partial).unwrap();

        let hit = cache
            .lookup(&hash, &fingerprint, &[AnalyzerKind::PInvariants])
            .unwrap();
        assert!(hit.performance.cached);
        assert_eq!(hit.elements, partial.elements);

        assert!(cache.lookup(&hash, &fingerprint, &AnalyzerKind::ALL).is_none());
        assert!(
            cache
                .lookup(&hash, "other", &[AnalyzerKind::PInvariants])
                .is_none()
        );

        assert!(cache.invalidate(&hash).unwrap());
        assert!(
            cache
                .lookup(&hash, &fingerprint, &[AnalyzerKind::PInvariants])
                .is_none()
        );
    }

    #[test]
    fn clear_and_shared_locks() {
        let cache = AnalysisCache::in_memory();
        cache.insert(&bundle(&Selection::All)).unwrap();
        assert_eq!(cache.entries().unwrap().len(), 1);
        assert_eq!(cache.clear().unwrap(), 1);
        assert!(cache.entries().unwrap().is_empty());

        let a = cache.lock_for("h");
        let b = cache.clone().lock_for("h");
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[test]
    fn released_locks_are_pruned() {
        let cache = AnalysisCache::in_memory();
        let held = cache.lock_for("held");
        drop(cache.lock_for("released"));
        let _other = cache.lock_for("other");
        let tracked: Vec<String> = lock(&cache.locks).keys().cloned().collect();
        assert_eq!(tracked.len(), 2);
        assert!(tracked.contains(&"held".to_string()));
        assert!(!tracked.contains(&"released".to_string()));
        assert!(Arc::ptr_eq(&held, &cache.lock_for("held")));
    }
}
