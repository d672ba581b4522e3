pub mod events;
pub mod media;
pub mod metadata;
pub mod monitor;
pub mod scanner;
pub mod thumbnails;
