//! Two-tier translation cache: full phrases and single words.
//! Key: language pair prefix + blake3 digest of the normalized text.
//! Each tier is persisted as a JSON object and flushed only when dirty.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::path::{Path, PathBuf};

use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info, warn};

use super::normalize::normalize;

pub const FULL_CACHE_FILE: &str = "full_cache.json";
pub const WORD_CACHE_FILE: &str = "word_cache.json";

/// Cache key string, e.g. `ru_en:<64 hex chars>` or `word_ru_en:<64 hex chars>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CacheKey(String);

impl CacheKey {
    /// Key for a whole phrase.
    pub fn full(src_lang: &str, tgt_lang: &str, text: &str) -> Self {
        Self(format!("{src_lang}_{tgt_lang}:{}", digest(&normalize(text))))
    }

    /// Key for a single word token.
    pub fn word(src_lang: &str, tgt_lang: &str, word: &str) -> Self {
        Self(format!("word_{src_lang}_{tgt_lang}:{}", digest(&normalize(word))))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

fn digest(normalized: &str) -> String {
    blake3::hash(normalized.as_bytes()).to_hex().to_string()
}

/// Which map a key lives in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Tier {
    Full,
    Word,
}

impl Tier {
    fn file_name(self) -> &'static str {
        match self {
            Tier::Full => FULL_CACHE_FILE,
            Tier::Word => WORD_CACHE_FILE,
        }
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Tier::Full => write!(f, "full"),
            Tier::Word => write!(f, "word"),
        }
    }
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("cache I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("cache file {path} is malformed: {source}")]
    Malformed {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

#[derive(Default)]
struct TierMap {
    entries: HashMap<String, String>,
    dirty: bool,
}

/// Outcome of one [`CacheStore::flush`] call.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FlushReport {
    /// Tiers written successfully.
    pub written: Vec<Tier>,
    /// Tiers whose write failed (they stay dirty).
    pub failed: Vec<Tier>,
}

/// Owner of both cache tiers. Tier locks guard map operations only, never I/O.
pub struct CacheStore {
    full: RwLock<TierMap>,
    word: RwLock<TierMap>,
    dir: Option<PathBuf>,
    /// Held for a whole flush so snapshots reach disk in the order they were taken.
    flush_lock: Mutex<()>,
}

impl CacheStore {
    /// Store persisted under `dir` (created on first flush).
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            full: RwLock::new(TierMap::default()),
            word: RwLock::new(TierMap::default()),
            dir: Some(dir.into()),
            flush_lock: Mutex::new(()),
        }
    }

    /// Store without a disk location; `flush` is a no-op.
    pub fn in_memory() -> Self {
        Self {
            full: RwLock::new(TierMap::default()),
            word: RwLock::new(TierMap::default()),
            dir: None,
            flush_lock: Mutex::new(()),
        }
    }

    fn tier(&self, tier: Tier) -> &RwLock<TierMap> {
        match tier {
            Tier::Full => &self.full,
            Tier::Word => &self.word,
        }
    }

    fn get(&self, tier: Tier, key: &CacheKey) -> Option<String> {
        self.tier(tier).read().entries.get(key.as_str()).cloned()
    }

    fn put(&self, tier: Tier, key: CacheKey, value: String) {
        let mut map = self.tier(tier).write();
        map.entries.insert(key.0, value);
        map.dirty = true;
    }

    pub fn get_full(&self, key: &CacheKey) -> Option<String> {
        self.get(Tier::Full, key)
    }

    pub fn put_full(&self, key: CacheKey, value: String) {
        self.put(Tier::Full, key, value);
    }

    pub fn get_word(&self, key: &CacheKey) -> Option<String> {
        self.get(Tier::Word, key)
    }

    pub fn put_word(&self, key: CacheKey, value: String) {
        self.put(Tier::Word, key, value);
    }

    /// Phrase lookup by `(text, src, tgt)`.
    pub fn lookup_phrase(&self, text: &str, src_lang: &str, tgt_lang: &str) -> Option<String> {
        self.get_full(&CacheKey::full(src_lang, tgt_lang, text))
    }

    pub fn save_phrase(&self, text: &str, src_lang: &str, tgt_lang: &str, translation: &str) {
        self.put_full(CacheKey::full(src_lang, tgt_lang, text), translation.to_string());
    }

    /// Word lookup by `(word, src, tgt)`.
    pub fn lookup_word(&self, word: &str, src_lang: &str, tgt_lang: &str) -> Option<String> {
        self.get_word(&CacheKey::word(src_lang, tgt_lang, word))
    }

    pub fn save_word(&self, word: &str, src_lang: &str, tgt_lang: &str, translation: &str) {
        self.put_word(CacheKey::word(src_lang, tgt_lang, word), translation.to_string());
    }

    pub fn len_full(&self) -> usize {
        self.full.read().entries.len()
    }

    pub fn len_word(&self) -> usize {
        self.word.read().entries.len()
    }

    pub fn is_dirty(&self, tier: Tier) -> bool {
        self.tier(tier).read().dirty
    }

    fn path_for(&self, tier: Tier) -> Option<PathBuf> {
        self.dir.as_ref().map(|d| d.join(tier.file_name()))
    }

    /// Populate both tiers from disk. A missing or malformed file leaves its tier empty.
    pub fn load_from_disk(&self) {
        for tier in [Tier::Full, Tier::Word] {
            let Some(path) = self.path_for(tier) else {
                return;
            };
            match read_tier(&path) {
                Ok(Some(entries)) => {
                    let count = entries.len();
                    let mut map = self.tier(tier).write();
                    map.entries = entries;
                    map.dirty = false;
                    info!(%tier, entries = count, path = %path.display(), "cache tier loaded");
                }
                Ok(None) => {
                    debug!(%tier, path = %path.display(), "no cache file, starting empty");
                }
                Err(e) => {
                    warn!(%tier, error = %e, "cache tier load failed, starting empty");
                }
            }
        }
    }

    /// Persist every dirty tier. The flag is cleared together with the snapshot,
    /// so a write landing mid-flush marks the tier dirty again for the next cycle.
    /// Concurrent callers are serialized.
    pub fn flush(&self) -> FlushReport {
        let _flushing = self.flush_lock.lock();
        let mut report = FlushReport::default();
        for tier in [Tier::Full, Tier::Word] {
            let Some(path) = self.path_for(tier) else {
                break;
            };
            let snapshot: BTreeMap<String, String> = {
                let mut map = self.tier(tier).write();
                if !map.dirty {
                    continue;
                }
                map.dirty = false;
                map.entries
                    .iter()
                    .map(|(k, v)| (k.clone(), v.clone()))
                    .collect()
            };
            match write_tier(&path, &snapshot) {
                Ok(()) => {
                    debug!(%tier, entries = snapshot.len(), "cache tier flushed");
                    report.written.push(tier);
                }
                Err(e) => {
                    warn!(%tier, error = %e, "cache flush failed, tier stays in memory");
                    self.tier(tier).write().dirty = true;
                    report.failed.push(tier);
                }
            }
        }
        report
    }
}

fn read_tier(path: &Path) -> Result<Option<HashMap<String, String>>, StoreError> {
    let content = match std::fs::read_to_string(path) {
        Ok(c) => c,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(source) => {
            return Err(StoreError::Io {
                path: path.to_path_buf(),
                source,
            })
        }
    };
    serde_json::from_str(&content)
        .map(Some)
        .map_err(|source| StoreError::Malformed {
            path: path.to_path_buf(),
            source,
        })
}

/// Write to a sibling temp file, then rename over the target.
fn write_tier(path: &Path, entries: &BTreeMap<String, String>) -> Result<(), StoreError> {
    let io_err = |source| StoreError::Io {
        path: path.to_path_buf(),
        source,
    };
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(io_err)?;
    }
    let body = serde_json::to_string_pretty(entries).map_err(|source| StoreError::Malformed {
        path: path.to_path_buf(),
        source,
    })?;
    let tmp = path.with_extension("json.tmp");
    std::fs::write(&tmp, body).map_err(io_err)?;
    std::fs::rename(&tmp, path).map_err(io_err)?;
    Ok(())
}
