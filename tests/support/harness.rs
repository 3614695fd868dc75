use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;

use anyhow::Result;
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use cacheproxy::{
    proxy::{AppContext, cache::HttpCache, listener},
    settings::Settings,
};

use super::net::exchange;

pub fn default_test_settings() -> Settings {
    let mut settings = Settings::with_defaults(0);
    settings.listen_host = Ipv4Addr::LOCALHOST.into();
    settings.client_timeout = 5;
    settings.upstream_connect_timeout = 2;
    settings.upstream_timeout = 5;
    settings
}

pub struct ProxyHarness {
    pub addr: SocketAddr,
    pub settings: Arc<Settings>,
    pub cache: HttpCache,
    stop: Option<oneshot::Sender<()>>,
    handle: JoinHandle<Result<()>>,
}

impl ProxyHarness {
    pub async fn request(&self, raw: &[u8]) -> Result<Vec<u8>> {
        exchange(self.addr, raw).await
    }

    pub async fn shutdown(mut self) -> Result<()> {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
        (&mut self.handle).await?
    }
}

#[derive(Default)]
pub struct ProxyHarnessBuilder {
    settings_override: Option<Box<dyn FnOnce(&mut Settings) + Send>>,
}

impl ProxyHarnessBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_settings<F>(mut self, func: F) -> Self
    where
        F: FnOnce(&mut Settings) + Send + 'static,
    {
        self.settings_override = Some(Box::new(func));
        self
    }

    pub async fn spawn(mut self) -> Result<ProxyHarness> {
        let mut settings = default_test_settings();
        if let Some(override_fn) = self.settings_override.take() {
            override_fn(&mut settings);
        }
        settings.validate()?;
        let settings = Arc::new(settings);

        let cache = HttpCache::new(settings.cache_capacity, settings.max_object_size)?;
        let app = AppContext::new(settings.clone(), cache.clone());

        let tcp = TcpListener::bind((settings.listen_host, 0)).await?;
        let addr = tcp.local_addr()?;
        let (stop_tx, stop_rx) = oneshot::channel::<()>();
        let handle = tokio::spawn(listener::serve(tcp, app, async move {
            let _ = stop_rx.await;
        }));

        Ok(ProxyHarness {
            addr,
            settings,
            cache,
            stop: Some(stop_tx),
            handle,
        })
    }
}
