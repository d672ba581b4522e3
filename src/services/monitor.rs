//! Filesystem monitoring for the watched output tree.
//!
//! One monitor watches one root at a time. OS change notifications are
//! debounced with a single-shot, reset-on-event timer so that a burst of
//! writes (a generation run producing many files) triggers one rescan, not
//! one per file. After each settled rescan the new snapshot is diffed
//! against the retained baseline and a non-empty change-set is published
//! to connected clients. When the OS notification backend is unavailable
//! the monitor degrades to periodic mtime-set polling feeding the same
//! debounce path.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use notify::{EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use serde_json::{json, Map, Value};
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;

use crate::services::events::{EventBroadcaster, FILE_CHANGE_EVENT};
use crate::services::media;
use crate::services::scanner::{FolderScanner, ScanResult};

/// Quiet period after the last filesystem event before a rescan runs.
pub const DEBOUNCE_INTERVAL: Duration = Duration::from_millis(500);

/// Snapshot interval for the polling fallback.
const POLL_INTERVAL: Duration = Duration::from_secs(2);

// ─── Change detection ────────────────────────────────────────────────────────

/// Diff two scan results into a folder-keyed change mapping.
///
/// `create` and `update` entries carry the new record's fields; `remove`
/// entries carry only the action. Diffing a result against itself yields
/// an empty map.
pub fn detect_folder_changes(old: &ScanResult, new: &ScanResult) -> Map<String, Value> {
    let mut changes = Map::new();

    let all_folders: BTreeSet<&String> = old.keys().chain(new.keys()).collect();
    for folder in all_folders {
        let old_folder = old.get(folder.as_str());
        let new_folder = new.get(folder.as_str());
        let mut folder_changes = Map::new();

        let all_files: BTreeSet<&String> = old_folder
            .map(|f| f.keys().collect::<BTreeSet<_>>())
            .unwrap_or_default()
            .into_iter()
            .chain(new_folder.map(|f| f.keys().collect::<BTreeSet<_>>()).unwrap_or_default())
            .collect();

        for filename in all_files {
            let old_record = old_folder.and_then(|f| f.get(filename.as_str()));
            let new_record = new_folder.and_then(|f| f.get(filename.as_str()));

            let entry = match (old_record, new_record) {
                (None, Some(record)) => Some(change_entry("create", record)),
                (Some(_), None) => Some(json!({"action": "remove"})),
                (Some(old_r), Some(new_r)) if old_r != new_r => {
                    Some(change_entry("update", new_r))
                }
                _ => None,
            };
            if let Some(entry) = entry {
                folder_changes.insert(filename.clone(), entry);
            }
        }

        if !folder_changes.is_empty() {
            changes.insert(folder.to_string(), Value::Object(folder_changes));
        }
    }

    changes
}

fn change_entry(action: &str, record: &crate::services::scanner::FileRecord) -> Value {
    let mut entry = match serde_json::to_value(record) {
        Ok(Value::Object(map)) => map,
        _ => Map::new(),
    };
    entry.insert("action".to_string(), Value::String(action.to_string()));
    Value::Object(entry)
}

// ─── Monitor ─────────────────────────────────────────────────────────────────

struct ActiveWatch {
    root: PathBuf,
    shutdown: watch::Sender<bool>,
    tasks: Vec<JoinHandle<()>>,
}

/// Owns the single active filesystem watch.
pub struct FolderMonitor {
    scanner: Arc<FolderScanner>,
    events: EventBroadcaster,
    active: Mutex<Option<ActiveWatch>>,
}

impl FolderMonitor {
    pub fn new(scanner: Arc<FolderScanner>, events: EventBroadcaster) -> Self {
        Self {
            scanner,
            events,
            active: Mutex::new(None),
        }
    }

    pub async fn is_running(&self) -> bool {
        self.active.lock().await.is_some()
    }

    pub async fn watched_root(&self) -> Option<PathBuf> {
        self.active.lock().await.as_ref().map(|w| w.root.clone())
    }

    /// Start watching `root`. A no-op (logged) while already running —
    /// callers that want to switch roots stop the monitor first.
    pub async fn start(&self, root: PathBuf, base_key: String) {
        let mut active = self.active.lock().await;
        if let Some(watch) = active.as_ref() {
            log::info!(
                "[Monitor] Already watching {} — start ignored",
                watch.root.display()
            );
            return;
        }

        log::info!("[Monitor] Starting watch on {}", root.display());

        // Baseline snapshot: the first diff is relative to monitor start.
        let baseline = self.scanner.scan(&root, &base_key, true).await;

        let (event_tx, event_rx) = mpsc::unbounded_channel::<()>();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let mut tasks = Vec::new();

        let watcher = match create_watcher(&root, event_tx.clone()) {
            Ok(w) => Some(w),
            Err(e) => {
                log::warn!(
                    "[Monitor] Notification backend unavailable ({}), falling back to polling",
                    e
                );
                tasks.push(spawn_poll_loop(
                    root.clone(),
                    event_tx.clone(),
                    shutdown_rx.clone(),
                ));
                None
            }
        };

        tasks.push(tokio::spawn(run_event_loop(
            Arc::clone(&self.scanner),
            self.events.clone(),
            root.clone(),
            base_key,
            baseline,
            event_rx,
            shutdown_rx,
            watcher,
        )));

        *active = Some(ActiveWatch {
            root,
            shutdown: shutdown_tx,
            tasks,
        });
    }

    /// Stop the active watch, cancelling any pending debounce. Blocks until
    /// the watch tasks have actually exited so a subsequent start cannot
    /// race a dying instance.
    pub async fn stop(&self) {
        let mut active = self.active.lock().await;
        match active.take() {
            Some(watch) => {
                let _ = watch.shutdown.send(true);
                for task in watch.tasks {
                    let _ = task.await;
                }
                log::info!("[Monitor] Stopped watching {}", watch.root.display());
            }
            None => {
                log::info!("[Monitor] Not running — stop ignored");
            }
        }
    }
}

/// Build the recursive OS watcher, forwarding qualifying events into the
/// debounce channel. The watcher thread only signals; all work happens on
/// the event-loop task.
fn create_watcher(
    root: &Path,
    event_tx: mpsc::UnboundedSender<()>,
) -> Result<RecommendedWatcher, notify::Error> {
    let mut watcher =
        notify::recommended_watcher(move |event: Result<notify::Event, notify::Error>| {
            match event {
                Ok(ev) => {
                    if event_is_relevant(&ev) {
                        let _ = event_tx.send(());
                    }
                }
                Err(e) => log::error!("[Monitor] Watch error: {}", e),
            }
        })?;
    watcher.watch(root, RecursiveMode::Recursive)?;
    Ok(watcher)
}

/// Only create/modify/remove/rename events touching supported media files
/// qualify; editor temp files are ignored.
fn event_is_relevant(event: &notify::Event) -> bool {
    match event.kind {
        EventKind::Create(_) | EventKind::Modify(_) | EventKind::Remove(_) => event
            .paths
            .iter()
            .any(|p| media::is_media_file(p) && !media::is_temp_file(p)),
        _ => false,
    }
}

/// The monitor's main loop: waits for a qualifying event, then runs a
/// single-shot debounce timer that every further event resets. Only the
/// final firing rescans; no queue of pending rescans accumulates.
#[allow(clippy::too_many_arguments)]
pub(crate) async fn run_event_loop(
    scanner: Arc<FolderScanner>,
    events: EventBroadcaster,
    root: PathBuf,
    base_key: String,
    mut baseline: ScanResult,
    mut event_rx: mpsc::UnboundedReceiver<()>,
    mut shutdown_rx: watch::Receiver<bool>,
    _watcher: Option<RecommendedWatcher>,
) {
    log::info!("[Monitor] Watch loop running for {}", root.display());

    'outer: loop {
        tokio::select! {
            _ = shutdown_rx.changed() => break,
            ev = event_rx.recv() => {
                if ev.is_none() {
                    break;
                }
                // Debounce: each further event restarts the quiet period.
                loop {
                    tokio::select! {
                        _ = shutdown_rx.changed() => break 'outer,
                        ev = event_rx.recv() => {
                            if ev.is_none() {
                                break 'outer;
                            }
                        }
                        _ = tokio::time::sleep(DEBOUNCE_INTERVAL) => {
                            let new_scan = scanner.scan(&root, &base_key, true).await;
                            let changes = detect_folder_changes(&baseline, &new_scan);
                            if changes.is_empty() {
                                log::debug!("[Monitor] Events settled with no gallery changes");
                            } else {
                                log::info!(
                                    "[Monitor] Changes in {} folder(s), publishing",
                                    changes.len()
                                );
                                events.publish(FILE_CHANGE_EVENT, json!({"folders": changes}));
                            }
                            baseline = new_scan;
                            break;
                        }
                    }
                }
            }
        }
    }

    log::info!("[Monitor] Watch loop exited for {}", root.display());
}

/// Polling fallback: compare (path, mtime) snapshots at a fixed interval
/// and feed any difference into the same debounce channel.
fn spawn_poll_loop(
    root: PathBuf,
    event_tx: mpsc::UnboundedSender<()>,
    mut shutdown_rx: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut previous: Option<BTreeSet<(PathBuf, SystemTime)>> = None;
        loop {
            tokio::select! {
                _ = shutdown_rx.changed() => break,
                _ = tokio::time::sleep(POLL_INTERVAL) => {
                    let snapshot_root = root.clone();
                    let snapshot = tokio::task::spawn_blocking(move || {
                        poll_snapshot(&snapshot_root)
                    })
                    .await
                    .unwrap_or_default();

                    if let Some(prev) = &previous {
                        if *prev != snapshot && event_tx.send(()).is_err() {
                            break;
                        }
                    }
                    previous = Some(snapshot);
                }
            }
        }
    })
}

/// Collect the (path, mtime) set of supported media files under `root`.
fn poll_snapshot(root: &Path) -> BTreeSet<(PathBuf, SystemTime)> {
    let mut files = BTreeSet::new();
    for entry in walkdir::WalkDir::new(root)
        .follow_links(true)
        .into_iter()
        .filter_map(|e| e.ok())
    {
        if !entry.file_type().is_file() || !media::is_media_file(entry.path()) {
            continue;
        }
        if let Ok(Ok(mtime)) = entry.metadata().map(|m| m.modified()) {
            files.insert((entry.path().to_path_buf(), mtime));
        }
    }
    files
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::media::MediaType;
    use crate::services::scanner::{FileRecord, FolderRecord};
    use crate::services::thumbnails::ThumbnailStore;

    fn record(name: &str, timestamp: f64) -> FileRecord {
        FileRecord {
            name: name.to_string(),
            url: format!("/view?filename={}&subfolder=", name),
            timestamp,
            date: "2026-01-01 00:00:00".into(),
            media_type: MediaType::Image,
            size: "1.00 KB".into(),
            size_bytes: 1024,
            thumbnail_url: None,
            metadata: Map::new(),
        }
    }

    fn scan_with(folder: &str, files: &[(&str, f64)]) -> ScanResult {
        let mut folder_record = FolderRecord::new();
        for (name, ts) in files {
            folder_record.insert(name.to_string(), record(name, *ts));
        }
        let mut result = ScanResult::new();
        result.insert(folder.to_string(), folder_record);
        result
    }

    #[test]
    fn diff_against_self_is_empty() {
        let scan = scan_with("output", &[("a.png", 1.0), ("b.png", 2.0)]);
        assert!(detect_folder_changes(&scan, &scan).is_empty());
    }

    #[test]
    fn diff_reports_create_update_remove() {
        let old = scan_with("output", &[("keep.png", 1.0), ("gone.png", 1.0), ("touched.png", 1.0)]);
        let new = scan_with(
            "output",
            &[("keep.png", 1.0), ("new.png", 3.0), ("touched.png", 2.0)],
        );

        let changes = detect_folder_changes(&old, &new);
        let folder = changes["output"].as_object().unwrap();

        assert_eq!(folder["new.png"]["action"].as_str(), Some("create"));
        assert_eq!(folder["new.png"]["name"].as_str(), Some("new.png"));
        assert_eq!(folder["gone.png"]["action"].as_str(), Some("remove"));
        assert!(folder["gone.png"].get("name").is_none());
        assert_eq!(folder["touched.png"]["action"].as_str(), Some("update"));
        assert!(!folder.contains_key("keep.png"));
    }

    #[test]
    fn diff_covers_folders_present_on_one_side_only() {
        let old = scan_with("output", &[("a.png", 1.0)]);
        let new = scan_with("output/sub", &[("b.png", 1.0)]);

        let changes = detect_folder_changes(&old, &new);
        assert_eq!(
            changes["output"]["a.png"]["action"].as_str(),
            Some("remove")
        );
        assert_eq!(
            changes["output/sub"]["b.png"]["action"].as_str(),
            Some("create")
        );
    }

    fn test_scanner(dir: &Path) -> Arc<FolderScanner> {
        Arc::new(FolderScanner::new(ThumbnailStore::new(
            dir.join(".thumbs-test"),
            64,
        )))
    }

    fn write_png(dir: &Path, name: &str) {
        let img = image::RgbaImage::from_pixel(4, 4, image::Rgba([9, 9, 9, 255]));
        img.save(dir.join(name)).unwrap();
    }

    #[tokio::test]
    async fn burst_of_events_triggers_exactly_one_rescan() {
        let dir = tempfile::tempdir().unwrap();
        write_png(dir.path(), "existing.png");

        let scanner = test_scanner(dir.path());
        let events = EventBroadcaster::new();
        let mut rx = events.subscribe();
        let baseline = scanner.scan(dir.path(), "output", true).await;
        let scans_before = scanner.scan_count();

        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let loop_task = tokio::spawn(run_event_loop(
            Arc::clone(&scanner),
            events.clone(),
            dir.path().to_path_buf(),
            "output".to_string(),
            baseline,
            event_rx,
            shutdown_rx,
            None,
        ));

        // Two back-to-back events inside the debounce window, with a real
        // new file appearing between them.
        event_tx.send(()).unwrap();
        write_png(dir.path(), "fresh.png");
        tokio::time::sleep(Duration::from_millis(100)).await;
        event_tx.send(()).unwrap();

        tokio::time::sleep(DEBOUNCE_INTERVAL + Duration::from_millis(400)).await;
        assert_eq!(scanner.scan_count(), scans_before + 1);

        let msg = rx.try_recv().expect("one change event expected");
        let parsed: Value = serde_json::from_str(&msg).unwrap();
        assert_eq!(parsed["type"].as_str(), Some(FILE_CHANGE_EVENT));
        assert_eq!(
            parsed["data"]["folders"]["output"]["fresh.png"]["action"].as_str(),
            Some("create")
        );
        assert!(rx.try_recv().is_err());

        shutdown_tx.send(true).unwrap();
        loop_task.await.unwrap();
    }

    #[test]
    fn poll_snapshots_track_media_files_only() {
        let dir = tempfile::tempdir().unwrap();
        write_png(dir.path(), "a.png");
        std::fs::write(dir.path().join("notes.txt"), b"x").unwrap();

        let snapshot = poll_snapshot(dir.path());
        assert_eq!(snapshot.len(), 1);
        assert!(snapshot.iter().all(|(p, _)| p.ends_with("a.png")));
    }

    #[tokio::test]
    async fn poll_fallback_reports_new_files() {
        let dir = tempfile::tempdir().unwrap();
        write_png(dir.path(), "first.png");

        let (event_tx, mut event_rx) = mpsc::unbounded_channel();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let task = spawn_poll_loop(dir.path().to_path_buf(), event_tx, shutdown_rx);

        // Let the first snapshot establish the baseline.
        tokio::time::sleep(POLL_INTERVAL + Duration::from_millis(500)).await;
        write_png(dir.path(), "second.png");

        let event = tokio::time::timeout(POLL_INTERVAL * 3, event_rx.recv()).await;
        assert!(event.is_ok(), "no poll event after a file was created");

        shutdown_tx.send(true).unwrap();
        task.await.unwrap();
    }

    #[tokio::test]
    async fn start_and_stop_are_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        write_png(dir.path(), "a.png");

        let scanner = test_scanner(dir.path());
        let monitor = FolderMonitor::new(scanner, EventBroadcaster::new());
        assert!(!monitor.is_running().await);

        monitor
            .start(dir.path().to_path_buf(), "output".to_string())
            .await;
        assert!(monitor.is_running().await);
        assert_eq!(
            monitor.watched_root().await.as_deref(),
            Some(dir.path())
        );

        // Second start is a no-op while running.
        monitor
            .start(dir.path().to_path_buf(), "output".to_string())
            .await;
        assert!(monitor.is_running().await);

        monitor.stop().await;
        assert!(!monitor.is_running().await);

        // Stop while stopped is a no-op.
        monitor.stop().await;
        assert!(!monitor.is_running().await);
    }
}
