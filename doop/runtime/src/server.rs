use crate::api::Api;
use doop_store::ObjectSource;
use hyper::server::conn::http1;
use hyper_util::{
    rt::TokioIo,
    server::graceful::GracefulShutdown,
    service::TowerToHyperService,
};
use std::{future::Future, time::Duration};
use tokio::net::TcpListener;
use tracing::{debug, debug_span, info, warn, Instrument};

/// Pause after a failed accept, typically while the process is out of file
/// descriptors.
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

/// Serves `api` on `listener` until `shutdown` completes, then drains open
/// connections.
///
/// The value `shutdown` resolves to (e.g. a `kubert` release handle) is held
/// until every connection has been closed.
pub async fn serve<S, F, R>(listener: TcpListener, api: Api<S>, shutdown: F)
where
    S: ObjectSource + Send + Sync + 'static,
    F: Future<Output = R>,
{
    let svc = TowerToHyperService::new(api.with_compression());
    let graceful = GracefulShutdown::new();
    tokio::pin!(shutdown);

    let _release = loop {
        tokio::select! {
            accepted = listener.accept() => {
                let (stream, client_addr) = match accepted {
                    Ok(conn) => conn,
                    Err(error) => {
                        warn!(%error, "Failed to accept connection");
                        tokio::time::sleep(ACCEPT_BACKOFF).await;
                        continue;
                    }
                };
                let conn = http1::Builder::new().serve_connection(TokioIo::new(stream), svc.clone());
                let conn = graceful.watch(conn);
                tokio::spawn(
                    async move {
                        if let Err(error) = conn.await {
                            debug!(%error, "Connection failed");
                        }
                    }
                    .instrument(debug_span!("conn", client.addr = %client_addr)),
                );
            }

            release = &mut shutdown => break release,
        }
    };

    info!("Draining connections");
    graceful.shutdown().await;
}
