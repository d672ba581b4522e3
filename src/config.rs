use std::path::PathBuf;

/// Default port for the gallery HTTP server.
const DEFAULT_PORT: u16 = 8189;

/// Default bounding box for generated thumbnails.
const DEFAULT_THUMBNAIL_SIZE: u32 = 400;

/// Runtime configuration, resolved from environment variables with defaults.
#[derive(Debug, Clone)]
pub struct GalleryConfig {
    /// Directory holding generated media (the sandbox root for all
    /// file-mutating endpoints).
    pub output_root: PathBuf,
    /// Directory for server-owned data (thumbnails live under it).
    pub data_dir: PathBuf,
    pub port: u16,
    pub thumbnail_size: u32,
}

impl GalleryConfig {
    /// Resolve configuration from the environment.
    ///
    /// `GALLERY_OUTPUT_ROOT` defaults to `./output`; `GALLERY_DATA_DIR`
    /// defaults to `~/.gallery-server` (created on demand).
    pub fn from_env() -> Self {
        let output_root = std::env::var("GALLERY_OUTPUT_ROOT")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("output"));

        let data_dir = std::env::var("GALLERY_DATA_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| {
                let base = dirs::home_dir().unwrap_or_else(|| PathBuf::from("."));
                base.join(".gallery-server")
            });

        let port = std::env::var("GALLERY_PORT")
            .ok()
            .and_then(|p| p.parse().ok())
            .unwrap_or(DEFAULT_PORT);

        let thumbnail_size = std::env::var("GALLERY_THUMBNAIL_SIZE")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(DEFAULT_THUMBNAIL_SIZE);

        Self {
            output_root,
            data_dir,
            port,
            thumbnail_size,
        }
    }

    pub fn thumbnails_dir(&self) -> PathBuf {
        self.data_dir.join("thumbnails")
    }
}
