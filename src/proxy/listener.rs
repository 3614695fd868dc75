use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::{debug, error, info};

use super::AppContext;
use super::worker::ConnectionWorker;

pub async fn start_listener(app: AppContext) -> Result<()> {
    let bind_addr = app.settings.listen_addr();
    let listener = TcpListener::bind(bind_addr)
        .await
        .with_context(|| format!("failed to bind listener on {}", bind_addr))?;
    serve(listener, app, shutdown_signal()).await
}

/// Accepts connections on `listener` until `shutdown` resolves, handing each one to its own
/// worker task. At most `max_connections` workers run at once; further clients wait in the
/// kernel backlog until a slot frees up.
pub async fn serve<F>(listener: TcpListener, app: AppContext, shutdown: F) -> Result<()>
where
    F: Future<Output = ()>,
{
    let local_addr = listener
        .local_addr()
        .context("failed to read listener address")?;
    let max_connections = app.settings.max_connections;
    let admission = Arc::new(Semaphore::new(max_connections));
    info!(address = %local_addr, max_connections, "proxy listener started");

    tokio::pin!(shutdown);
    loop {
        let permit = tokio::select! {
            _ = &mut shutdown => break,
            permit = admission.clone().acquire_owned() => {
                permit.context("admission semaphore closed")?
            }
        };

        let (stream, peer_addr) = tokio::select! {
            _ = &mut shutdown => break,
            accepted = listener.accept() => match accepted {
                Ok(pair) => pair,
                Err(err) => {
                    error!(error = %err, "failed to accept incoming connection");
                    continue;
                }
            },
        };
        debug!(
            peer = %peer_addr,
            available_permits = admission.available_permits(),
            "accepted connection"
        );
        if let Err(err) = stream.set_nodelay(true) {
            debug!(peer = %peer_addr, error = %err, "failed to set TCP_NODELAY on client stream");
        }

        let connection_app = app.clone();
        tokio::spawn(handle_connection(stream, peer_addr, connection_app, permit));
    }

    info!(address = %local_addr, "proxy listener stopped");
    Ok(())
}

async fn handle_connection(
    stream: TcpStream,
    peer: SocketAddr,
    app: AppContext,
    permit: OwnedSemaphorePermit,
) {
    let _slot = ConnectionSlot::new(permit);
    ConnectionWorker::new(stream, peer, app).run().await;
}

/// Holds an admission permit and the active-connection gauge for the life of a worker,
/// releasing both on drop so a panicking worker still frees its slot.
struct ConnectionSlot {
    _permit: OwnedSemaphorePermit,
}

impl ConnectionSlot {
    fn new(permit: OwnedSemaphorePermit) -> Self {
        crate::metrics::inc_active_connections();
        Self { _permit: permit }
    }
}

impl Drop for ConnectionSlot {
    fn drop(&mut self) {
        crate::metrics::dec_active_connections();
    }
}

async fn shutdown_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("received Ctrl-C; shutting down"),
        Err(err) => {
            error!(error = %err, "failed to listen for Ctrl-C; running until killed");
            std::future::pending::<()>().await;
        }
    }
}
