use std::path::Path;

use serde::{Deserialize, Serialize};

/// Still image extensions.
pub const IMAGE_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "webp", "bmp", "tiff"];

/// Video file extensions.
pub const VIDEO_EXTENSIONS: &[&str] = &["mp4", "webm", "mov", "avi", "mkv"];

/// Animated image extensions.
pub const ANIMATION_EXTENSIONS: &[&str] = &["gif", "apng"];

/// Editor temp-file suffixes ignored by the filesystem monitor.
const TEMP_SUFFIXES: &[&str] = &[".swp", ".tmp", "~"];

/// Coarse media classification, derived purely from the file extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaType {
    Image,
    Video,
    Animation,
    Unknown,
}

impl MediaType {
    /// Classify a path by its lowercased extension. Content is never read.
    pub fn from_path(path: &Path) -> Self {
        let ext = match path.extension().and_then(|e| e.to_str()) {
            Some(e) => e.to_lowercase(),
            None => return MediaType::Unknown,
        };

        if IMAGE_EXTENSIONS.contains(&ext.as_str()) {
            MediaType::Image
        } else if VIDEO_EXTENSIONS.contains(&ext.as_str()) {
            MediaType::Video
        } else if ANIMATION_EXTENSIONS.contains(&ext.as_str()) {
            MediaType::Animation
        } else {
            MediaType::Unknown
        }
    }
}

/// Check if a path points at a supported media file (by extension only).
pub fn is_media_file(path: &Path) -> bool {
    MediaType::from_path(path) != MediaType::Unknown
}

/// Check if a path looks like an editor temp file (swap files, partial saves).
pub fn is_temp_file(path: &Path) -> bool {
    let name = match path.file_name().and_then(|n| n.to_str()) {
        Some(n) => n,
        None => return false,
    };
    TEMP_SUFFIXES.iter().any(|s| name.ends_with(s))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn classification_follows_extension_only() {
        assert_eq!(MediaType::from_path(Path::new("a.png")), MediaType::Image);
        assert_eq!(MediaType::from_path(Path::new("a.JPG")), MediaType::Image);
        assert_eq!(MediaType::from_path(Path::new("b.mp4")), MediaType::Video);
        assert_eq!(MediaType::from_path(Path::new("b.MKV")), MediaType::Video);
        assert_eq!(
            MediaType::from_path(Path::new("c.gif")),
            MediaType::Animation
        );
        assert_eq!(
            MediaType::from_path(Path::new("c.apng")),
            MediaType::Animation
        );
        assert_eq!(MediaType::from_path(Path::new("d.txt")), MediaType::Unknown);
        assert_eq!(MediaType::from_path(Path::new("noext")), MediaType::Unknown);
    }

    #[test]
    fn classification_ignores_directory_part() {
        let deep = PathBuf::from("/some/dir.mp4/image.png");
        assert_eq!(MediaType::from_path(&deep), MediaType::Image);
    }

    #[test]
    fn temp_files_are_detected() {
        assert!(is_temp_file(Path::new("image.png.tmp")));
        assert!(is_temp_file(Path::new(".image.png.swp")));
        assert!(is_temp_file(Path::new("image.png~")));
        assert!(!is_temp_file(Path::new("image.png")));
    }
}
