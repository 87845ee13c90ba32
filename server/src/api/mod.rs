pub mod rest;

use crate::config::Config;
use crate::media::MediaLibrary;
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub library: Arc<MediaLibrary>,
    pub config: Config,
}

impl AppState {
    pub fn new(library: MediaLibrary, config: Config) -> Self {
        Self {
            library: Arc::new(library),
            config,
        }
    }
}
