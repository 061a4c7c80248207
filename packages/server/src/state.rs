use std::sync::Arc;

use crate::config::AppConfig;
use crate::storage::ChunkStore;

#[derive(Clone)]
pub struct AppState {
    pub config: AppConfig,
    pub store: Arc<ChunkStore>,
}
