//! Directory scanning and the in-memory metadata cache.
//!
//! A scan walks a directory tree, fans per-file processing out to a bounded
//! worker pool, and assembles a folder -> filename -> record mapping. File
//! records are cached keyed by absolute path and invalidated purely by
//! mtime; the cache is trimmed in bulk (oldest access first) once it grows
//! past a high-water mark.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Instant, SystemTime, UNIX_EPOCH};

use serde::Serialize;
use serde_json::{Map, Value};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use crate::services::media::{self, MediaType};
use crate::services::metadata;
use crate::services::thumbnails::ThumbnailStore;

/// Upper bound on concurrently processed files within one scan.
const SCAN_WORKERS: usize = 8;

/// Cache size that triggers a bulk trim.
pub const CACHE_HIGH_WATER: usize = 1200;

/// Entry count the cache is trimmed down to. Deliberately a two-threshold
/// bulk policy, not a continuous LRU — under bursty access the two differ.
pub const CACHE_TRIM_TO: usize = 1000;

// ─── Records ─────────────────────────────────────────────────────────────────

/// One media file's indexed state.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FileRecord {
    pub name: String,
    pub url: String,
    pub timestamp: f64,
    pub date: String,
    #[serde(rename = "type")]
    pub media_type: MediaType,
    pub size: String,
    pub size_bytes: u64,
    pub thumbnail_url: Option<String>,
    pub metadata: Map<String, Value>,
}

/// filename -> record, for one folder.
pub type FolderRecord = BTreeMap<String, FileRecord>;

/// folder key -> folder contents. Only non-empty folders appear.
pub type ScanResult = BTreeMap<String, FolderRecord>;

// ─── Cache ───────────────────────────────────────────────────────────────────

struct CacheEntry {
    mtime: SystemTime,
    record: FileRecord,
    last_access: Instant,
}

// ─── Scanner ─────────────────────────────────────────────────────────────────

/// Scans directory trees and owns the shared metadata cache.
pub struct FolderScanner {
    thumbnails: ThumbnailStore,
    cache: Mutex<HashMap<PathBuf, CacheEntry>>,
    /// Metadata extractor invocations (cache misses on image files).
    extractions: AtomicU64,
    /// Completed scan invocations.
    scans: AtomicU64,
}

impl FolderScanner {
    pub fn new(thumbnails: ThumbnailStore) -> Self {
        Self {
            thumbnails,
            cache: Mutex::new(HashMap::new()),
            extractions: AtomicU64::new(0),
            scans: AtomicU64::new(0),
        }
    }

    pub fn thumbnails(&self) -> &ThumbnailStore {
        &self.thumbnails
    }

    /// Scan `root`, keying folders under the logical `base_key`.
    ///
    /// Hidden (dot-prefixed) directories are always excluded; `recursive`
    /// only controls whether subdirectories are descended at all. A missing
    /// or unreadable root yields an empty result, and one file's failure
    /// never aborts the scan. The assembled result is independent of
    /// completion order across workers.
    pub async fn scan(self: &Arc<Self>, root: &Path, base_key: &str, recursive: bool) -> ScanResult {
        let started = Instant::now();
        let candidates = collect_candidates(root, base_key, recursive);

        let semaphore = Arc::new(Semaphore::new(SCAN_WORKERS));
        let mut join_set: JoinSet<(String, String, Option<FileRecord>)> = JoinSet::new();

        for candidate in candidates {
            let permit = match semaphore.clone().acquire_owned().await {
                Ok(p) => p,
                Err(_) => break,
            };
            let scanner = Arc::clone(self);
            join_set.spawn(async move {
                let FileCandidate {
                    path,
                    name,
                    subfolder,
                    folder_key,
                } = candidate;
                let record = tokio::task::spawn_blocking(move || {
                    scanner.process_file(&path, &subfolder)
                })
                .await
                .unwrap_or_else(|e| {
                    log::error!("[Scanner] Worker task failed: {}", e);
                    None
                });
                drop(permit);
                (folder_key, name, record)
            });
        }

        let mut result = ScanResult::new();
        while let Some(joined) = join_set.join_next().await {
            if let Ok((folder_key, name, Some(record))) = joined {
                result.entry(folder_key).or_default().insert(name, record);
            }
        }

        self.scans.fetch_add(1, Ordering::Relaxed);
        log::debug!(
            "[Scanner] Scanned {} in {:?} ({} folders)",
            root.display(),
            started.elapsed(),
            result.len()
        );
        result
    }

    /// Process one file: cache hit on unchanged mtime, full extraction
    /// otherwise. Returns None when the file cannot be stat'd (it may have
    /// vanished mid-scan).
    fn process_file(&self, path: &Path, subfolder: &str) -> Option<FileRecord> {
        let file_meta = match std::fs::metadata(path) {
            Ok(m) => m,
            Err(e) => {
                log::warn!("[Scanner] Skipping {}: {}", path.display(), e);
                return None;
            }
        };
        let mtime = file_meta.modified().ok()?;

        if let Ok(mut cache) = self.cache.lock() {
            if let Some(entry) = cache.get_mut(path) {
                if entry.mtime == mtime {
                    entry.last_access = Instant::now();
                    return Some(entry.record.clone());
                }
            }
        }

        let name = path.file_name()?.to_string_lossy().to_string();
        let media_type = MediaType::from_path(path);
        let timestamp = mtime
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs_f64())
            .unwrap_or(0.0);

        let url = format!("/view?filename={}&subfolder={}", name, subfolder).replace('\\', "/");

        let file_metadata = if media_type == MediaType::Image {
            self.extractions.fetch_add(1, Ordering::Relaxed);
            match metadata::build_metadata(path) {
                Ok((_graph, map)) => map,
                Err(e) => {
                    log::warn!(
                        "[Scanner] Metadata extraction failed for {}: {}",
                        path.display(),
                        e
                    );
                    Map::new()
                }
            }
        } else {
            Map::new()
        };

        let thumbnail_url = match media_type {
            MediaType::Image | MediaType::Animation => self.thumbnails.get_or_create(path),
            _ => None,
        };

        let record = FileRecord {
            name,
            url,
            timestamp,
            date: metadata::format_timestamp(timestamp),
            media_type,
            size: metadata::human_size(file_meta.len()),
            size_bytes: file_meta.len(),
            thumbnail_url,
            metadata: file_metadata,
        };

        if let Ok(mut cache) = self.cache.lock() {
            cache.insert(
                path.to_path_buf(),
                CacheEntry {
                    mtime,
                    record: record.clone(),
                    last_access: Instant::now(),
                },
            );
            trim_cache(&mut cache);
        }

        Some(record)
    }

    pub fn clear_cache(&self) {
        if let Ok(mut cache) = self.cache.lock() {
            let evicted = cache.len();
            cache.clear();
            log::info!("[Scanner] Metadata cache cleared ({} entries)", evicted);
        }
    }

    pub fn cache_len(&self) -> usize {
        self.cache.lock().map(|c| c.len()).unwrap_or(0)
    }

    /// Number of extractor invocations so far (for cache-reuse checks).
    pub fn extraction_count(&self) -> u64 {
        self.extractions.load(Ordering::Relaxed)
    }

    /// Number of completed scans so far.
    pub fn scan_count(&self) -> u64 {
        self.scans.load(Ordering::Relaxed)
    }
}

/// Drop the oldest-accessed entries once the high-water mark is exceeded.
fn trim_cache(cache: &mut HashMap<PathBuf, CacheEntry>) {
    if cache.len() <= CACHE_HIGH_WATER {
        return;
    }
    let mut by_access: Vec<(PathBuf, Instant)> = cache
        .iter()
        .map(|(path, entry)| (path.clone(), entry.last_access))
        .collect();
    by_access.sort_by(|a, b| b.1.cmp(&a.1));
    for (path, _) in by_access.into_iter().skip(CACHE_TRIM_TO) {
        cache.remove(&path);
    }
    log::debug!("[Scanner] Cache trimmed to {} entries", cache.len());
}

// ─── Tree walk ───────────────────────────────────────────────────────────────

struct FileCandidate {
    path: PathBuf,
    name: String,
    subfolder: String,
    folder_key: String,
}

/// Walk the tree and collect supported media files with their folder keys.
/// Hidden directories are pruned; unreadable entries are logged and skipped.
fn collect_candidates(root: &Path, base_key: &str, recursive: bool) -> Vec<FileCandidate> {
    let max_depth = if recursive { usize::MAX } else { 1 };
    let walker = walkdir::WalkDir::new(root)
        .follow_links(true)
        .max_depth(max_depth)
        .into_iter()
        .filter_entry(|e| !is_hidden_dir(e));

    let mut candidates = Vec::new();
    for entry in walker {
        let entry = match entry {
            Ok(e) => e,
            Err(e) => {
                log::warn!("[Scanner] Unreadable entry under {}: {}", root.display(), e);
                continue;
            }
        };
        if !entry.file_type().is_file() {
            continue;
        }
        let path = entry.path();
        if !media::is_media_file(path) {
            continue;
        }
        let name = match path.file_name().and_then(|n| n.to_str()) {
            Some(n) => n.to_string(),
            None => continue,
        };
        let subfolder = path
            .parent()
            .and_then(|p| p.strip_prefix(root).ok())
            .map(|p| p.to_string_lossy().replace('\\', "/"))
            .unwrap_or_default();
        let folder_key = if subfolder.is_empty() {
            base_key.to_string()
        } else {
            format!("{}/{}", base_key, subfolder)
        };
        candidates.push(FileCandidate {
            path: path.to_path_buf(),
            name,
            subfolder,
            folder_key,
        });
    }
    candidates
}

fn is_hidden_dir(entry: &walkdir::DirEntry) -> bool {
    entry.depth() > 0
        && entry.file_type().is_dir()
        && entry
            .file_name()
            .to_str()
            .map(|n| n.starts_with('.'))
            .unwrap_or(false)
}

// ─── Tests ───────────────────────────────────────────────────────────────────
