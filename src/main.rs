use gallery_server::config::GalleryConfig;
use gallery_server::server::{self, state::AppState};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = GalleryConfig::from_env();
    log::info!("[Startup] Output root: {}", config.output_root.display());
    log::info!("[Startup] Data dir: {}", config.data_dir.display());

    let state = AppState::new(config).map_err(|e| e.to_string())?;

    if let Err(e) = server::start_server(state).await {
        log::error!("Axum server error: {}", e);
        return Err(e);
    }
    Ok(())
}
