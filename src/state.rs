use std::sync::Arc;

use crate::config::Config;
use crate::media::MediaClient;
use crate::rooms::RoomRegistry;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub registry: Arc<RoomRegistry>,
    pub media: Arc<MediaClient>,
}

impl AppState {
    pub fn new(config: Config) -> Self {
        let media = MediaClient::new(&config);
        Self {
            config: Arc::new(config),
            registry: Arc::new(RoomRegistry::new()),
            media: Arc::new(media),
        }
    }
}
