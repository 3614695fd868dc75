pub mod cache;
pub mod error_page;
pub mod forward_error;
pub mod forward_limits;
pub mod line;
pub mod listener;
pub mod relay;
pub mod request;
pub mod resolver;
pub mod upstream;
pub mod worker;

use anyhow::Result;
use std::sync::Arc;

use crate::settings::Settings;

#[derive(Clone)]
pub struct AppContext {
    pub settings: Arc<Settings>,
    pub cache: cache::HttpCache,
}

impl AppContext {
    pub fn new(settings: Arc<Settings>, cache: cache::HttpCache) -> Self {
        Self { settings, cache }
    }
}

pub async fn run(app: AppContext) -> Result<()> {
    listener::start_listener(app).await
}
