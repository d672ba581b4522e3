//! On-demand thumbnail generation with a stable, path-derived cache key.
//!
//! Thumbnail filenames are content-independent: the xxh64 of the absolute
//! source path plus the source extension, so repeated calls for the same
//! file are idempotent and distinct sources never collide. Freshness is
//! mtime-only — an existing thumbnail at least as new as its source is
//! reused without decoding anything.

use std::path::{Path, PathBuf};

/// Derive the thumbnail filename for a source path.
///
/// Stable across calls while the source path is unchanged; the extension
/// tag keeps `a.png` and `a.gif` in the same directory apart.
pub fn thumbnail_name(source: &Path) -> String {
    let canonical = source
        .canonicalize()
        .unwrap_or_else(|_| source.to_path_buf());
    let hash = xxhash_rust::xxh64::xxh64(canonical.to_string_lossy().as_bytes(), 0);
    let ext = source
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_lowercase())
        .unwrap_or_default();
    format!("{:016x}_{}.webp", hash, ext)
}

/// Owns the on-disk thumbnail directory.
#[derive(Debug, Clone)]
pub struct ThumbnailStore {
    dir: PathBuf,
    max_dimension: u32,
}

impl ThumbnailStore {
    pub fn new(dir: PathBuf, max_dimension: u32) -> Self {
        std::fs::create_dir_all(&dir).ok();
        Self { dir, max_dimension }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Get or create a thumbnail for `source`, returning its URL locator.
    ///
    /// Returns None when the source cannot be decoded or the thumbnail
    /// cannot be written — thumbnail absence is never an error.
    pub fn get_or_create(&self, source: &Path) -> Option<String> {
        let name = thumbnail_name(source);
        let thumb_path = self.dir.join(&name);

        if is_fresh(&thumb_path, source) {
            return Some(format!("/thumbnails/{}", name));
        }

        match generate(source, &thumb_path, self.max_dimension) {
            Ok(()) => Some(format!("/thumbnails/{}", name)),
            Err(e) => {
                log::debug!(
                    "[Thumbnails] Skipping {}: {}",
                    source.display(),
                    e
                );
                None
            }
        }
    }

    /// Remove the thumbnail for a source path (delete/move of the source).
    pub fn remove(&self, source: &Path) {
        let thumb_path = self.dir.join(thumbnail_name(source));
        if thumb_path.exists() {
            if let Err(e) = std::fs::remove_file(&thumb_path) {
                log::warn!(
                    "[Thumbnails] Failed to remove {}: {}",
                    thumb_path.display(),
                    e
                );
            }
        }
    }
}

/// A thumbnail is fresh when it exists and is at least as new as its source.
fn is_fresh(thumb: &Path, source: &Path) -> bool {
    let thumb_mtime = match std::fs::metadata(thumb).and_then(|m| m.modified()) {
        Ok(t) => t,
        Err(_) => return false,
    };
    match std::fs::metadata(source).and_then(|m| m.modified()) {
        Ok(src_mtime) => thumb_mtime >= src_mtime,
        Err(_) => false,
    }
}

/// Downscale within the bounding box, preserving aspect ratio and alpha.
fn generate(source: &Path, output: &Path, size: u32) -> Result<(), image::ImageError> {
    let img = image::open(source)?;
    let thumb = img.thumbnail(size, size);
    thumb
        .to_rgba8()
        .save_with_format(output, image::ImageFormat::WebP)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::File;
    use std::time::{Duration, SystemTime};

    fn write_test_png(dir: &Path, name: &str) -> PathBuf {
        let path = dir.join(name);
        let img = image::RgbaImage::from_pixel(8, 8, image::Rgba([10, 20, 30, 255]));
        img.save(&path).unwrap();
        path
    }

    fn set_mtime(path: &Path, t: SystemTime) {
        File::options()
            .write(true)
            .open(path)
            .unwrap()
            .set_modified(t)
            .unwrap();
    }

    #[test]
    fn name_is_stable_and_path_dependent() {
        let dir = tempfile::tempdir().unwrap();
        let a = write_test_png(dir.path(), "a.png");
        let b = write_test_png(dir.path(), "b.png");
        assert_eq!(thumbnail_name(&a), thumbnail_name(&a));
        assert_ne!(thumbnail_name(&a), thumbnail_name(&b));
    }

    #[test]
    fn locator_stable_while_source_unchanged_and_refreshed_on_mtime_bump() {
        let dir = tempfile::tempdir().unwrap();
        let source = write_test_png(dir.path(), "img.png");
        let store = ThumbnailStore::new(dir.path().join("thumbs"), 64);

        let first = store.get_or_create(&source).unwrap();
        let thumb_path = store.dir().join(thumbnail_name(&source));

        // Thumbnail newer than source: reused, locator and mtime unchanged.
        let now = SystemTime::now();
        set_mtime(&source, now - Duration::from_secs(120));
        set_mtime(&thumb_path, now - Duration::from_secs(60));
        let second = store.get_or_create(&source).unwrap();
        assert_eq!(first, second);
        let after_reuse = std::fs::metadata(&thumb_path).unwrap().modified().unwrap();
        assert_eq!(after_reuse, now - Duration::from_secs(60));

        // Source modified after the thumbnail: regenerate.
        set_mtime(&source, now - Duration::from_secs(30));
        assert!(!is_fresh(&thumb_path, &source));
        store.get_or_create(&source).unwrap();
        let after_regen = std::fs::metadata(&thumb_path).unwrap().modified().unwrap();
        assert!(after_regen > now - Duration::from_secs(60));
    }

    #[test]
    fn undecodable_source_yields_none() {
        let dir = tempfile::tempdir().unwrap();
        let bogus = dir.path().join("not-an-image.png");
        std::fs::write(&bogus, b"definitely not a png").unwrap();
        let store = ThumbnailStore::new(dir.path().join("thumbs"), 64);
        assert!(store.get_or_create(&bogus).is_none());
    }

    #[test]
    fn remove_deletes_the_thumbnail_file() {
        let dir = tempfile::tempdir().unwrap();
        let source = write_test_png(dir.path(), "img.png");
        let store = ThumbnailStore::new(dir.path().join("thumbs"), 64);
        store.get_or_create(&source).unwrap();
        let thumb_path = store.dir().join(thumbnail_name(&source));
        assert!(thumb_path.exists());
        store.remove(&source);
        assert!(!thumb_path.exists());
    }
}
