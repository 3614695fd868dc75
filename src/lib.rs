pub mod cli;
pub mod logging;
pub mod metrics;
pub mod proxy;
pub mod settings;
pub mod util;

use std::sync::Arc;

use anyhow::{Context, Result};

use crate::settings::Settings;

pub async fn run(settings: Settings) -> Result<()> {
    let settings = Arc::new(settings);
    if let Some(addr) = settings.metrics_listen {
        tokio::spawn(async move {
            tracing::info!(address = %addr, "metrics endpoint starting");
            if let Err(err) = crate::metrics::serve(addr).await {
                tracing::error!(error = %err, "metrics endpoint failed");
            }
        });
    }

    let cache = proxy::cache::HttpCache::new(settings.cache_capacity, settings.max_object_size)
        .context("failed to build response cache")?;
    tracing::info!(
        capacity = settings.cache_capacity,
        max_object_size = cache.max_object_size(),
        "response cache ready"
    );

    let app = proxy::AppContext::new(settings, cache);
    proxy::run(app).await
}
