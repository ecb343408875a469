//! HTTP front end: shared state, health reporting and the serve loop with
//! graceful shutdown.

pub mod routes;

use std::future::{Future, IntoFuture};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use tokio::net::TcpListener;
use tokio::sync::{oneshot, Semaphore};
use tracing::{info, warn};

use crate::index::VectorIndex;
use crate::metrics::MetricsCollector;
use crate::service::IndexService;

/// Shared application state for the HTTP server.
pub struct AppState<I: VectorIndex> {
    pub service: Arc<IndexService<I>>,
    pub metrics: RwLock<MetricsCollector>,
    pub health: HealthReporter,
    /// One permit per call allowed to run at once.
    pub workers: Arc<Semaphore>,
    max_workers: usize,
}

impl<I: VectorIndex> AppState<I> {
    pub fn new(service: Arc<IndexService<I>>, max_workers: usize) -> Self {
        let max_workers = max_workers.clamp(1, u32::MAX as usize);
        Self {
            service,
            metrics: RwLock::new(MetricsCollector::new()),
            health: HealthReporter::default(),
            workers: Arc::new(Semaphore::new(max_workers)),
            max_workers,
        }
    }

    /// Wait until every call on the blocking pool has finished, then refuse
    /// new ones.
    ///
    /// A call holds its worker permit until it returns, so owning all of them
    /// means nothing is left running against the service.
    pub async fn drain(&self) {
        if let Ok(_all) = self.workers.acquire_many(self.max_workers as u32).await {
            self.workers.close();
        }
    }
}

/// Serving / not-serving flag behind `/health`.
#[derive(Debug, Clone, Default)]
pub struct HealthReporter {
    serving: Arc<AtomicBool>,
}

impl HealthReporter {
    pub fn set_serving(&self) {
        self.serving.store(true, Ordering::SeqCst);
    }

    pub fn set_not_serving(&self) {
        self.serving.store(false, Ordering::SeqCst);
    }

    pub fn is_serving(&self) -> bool {
        self.serving.load(Ordering::SeqCst)
    }
}

/// Serve `state` on `listener` until `shutdown` resolves.
///
/// On shutdown the health flag flips to not-serving, the listener stops
/// accepting and in-flight requests drain. With a `grace` period, waiting on
/// connections is abandoned once it elapses. Either way this returns only
/// after every call already on the blocking pool has finished, and later
/// calls are refused.
pub async fn serve<I, F>(
    listener: TcpListener,
    state: Arc<AppState<I>>,
    shutdown: F,
    grace: Option<Duration>,
) -> anyhow::Result<()>
where
    I: VectorIndex + 'static,
    F: Future<Output = ()> + Send + 'static,
{
    let health = state.health.clone();
    health.set_serving();
    info!("serving on {}", listener.local_addr()?);

    let (draining_tx, draining_rx) = oneshot::channel::<()>();
    let signal = async move {
        shutdown.await;
        health.set_not_serving();
        info!("shutdown requested, draining in-flight calls");
        let _ = draining_tx.send(());
    };

    let router = routes::create_router(state.clone());
    let server = axum::serve(listener, router)
        .with_graceful_shutdown(signal)
        .into_future();

    match grace {
        None => server.await?,
        Some(grace) => {
            let deadline = async move {
                match draining_rx.await {
                    Ok(()) => tokio::time::sleep(grace).await,
                    Err(_) => std::future::pending::<()>().await,
                }
            };
            tokio::select! {
                result = server => result?,
                _ = deadline => warn!("grace period of {:?} elapsed with calls in flight", grace),
            }
        }
    }

    state.drain().await;
    info!("listener stopped, no calls in flight");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_health_reporter() {
        let health = HealthReporter::default();
        assert!(!health.is_serving());
        health.set_serving();
        let clone = health.clone();
        assert!(clone.is_serving());
        health.set_not_serving();
        assert!(!clone.is_serving());
    }
}
