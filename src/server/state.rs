use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use serde_json::Value;

use crate::config::GalleryConfig;
use crate::services::events::EventBroadcaster;
use crate::services::monitor::FolderMonitor;
use crate::services::scanner::FolderScanner;
use crate::services::thumbnails::ThumbnailStore;

/// How long a cached listing response stays valid.
const RESPONSE_CACHE_TTL: Duration = Duration::from_secs(5);

/// Shared application state available to all axum handlers.
#[derive(Clone)]
pub struct AppState {
    inner: Arc<AppStateInner>,
}

struct AppStateInner {
    config: GalleryConfig,
    scanner: Arc<FolderScanner>,
    monitor: FolderMonitor,
    events: EventBroadcaster,
    /// Short-TTL cache of assembled listing responses, keyed by request
    /// shape. Bounds rescan cost when several clients poll at once.
    response_cache: Mutex<HashMap<String, (Instant, Value)>>,
}

impl AppState {
    /// Create new AppState, preparing the data directory on disk.
    pub fn new(config: GalleryConfig) -> Result<Self, Box<dyn std::error::Error>> {
        std::fs::create_dir_all(&config.data_dir)?;

        let thumbnails = ThumbnailStore::new(config.thumbnails_dir(), config.thumbnail_size);
        let scanner = Arc::new(FolderScanner::new(thumbnails));
        let events = EventBroadcaster::new();
        let monitor = FolderMonitor::new(Arc::clone(&scanner), events.clone());

        Ok(Self {
            inner: Arc::new(AppStateInner {
                config,
                scanner,
                monitor,
                events,
                response_cache: Mutex::new(HashMap::new()),
            }),
        })
    }

    pub fn config(&self) -> &GalleryConfig {
        &self.inner.config
    }

    pub fn scanner(&self) -> &Arc<FolderScanner> {
        &self.inner.scanner
    }

    pub fn monitor(&self) -> &FolderMonitor {
        &self.inner.monitor
    }

    pub fn events(&self) -> &EventBroadcaster {
        &self.inner.events
    }

    pub fn thumbnails_dir(&self) -> std::path::PathBuf {
        self.inner.config.thumbnails_dir()
    }

    pub fn output_root(&self) -> &Path {
        &self.inner.config.output_root
    }

    pub fn port(&self) -> u16 {
        self.inner.config.port
    }

    /// Look up a still-fresh cached response.
    pub fn cached_response(&self, key: &str) -> Option<Value> {
        let cache = self.inner.response_cache.lock().unwrap();
        cache.get(key).and_then(|(stored, value)| {
            if stored.elapsed() < RESPONSE_CACHE_TTL {
                Some(value.clone())
            } else {
                None
            }
        })
    }

    pub fn store_response(&self, key: String, value: Value) {
        let mut cache = self.inner.response_cache.lock().unwrap();
        cache.insert(key, (Instant::now(), value));
    }

    pub fn clear_response_cache(&self) {
        self.inner.response_cache.lock().unwrap().clear();
    }
}
