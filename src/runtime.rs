//! Process lifecycle: building the service, binding listeners, the
//! shared-port worker topology and shutdown with optional persistence.

use std::future::Future;
use std::sync::Arc;

use anyhow::Context;
use tokio::net::TcpListener;
use tracing::{error, info, Instrument};

use crate::config::{IndexKind, RuntimeConfig, ServiceConfig};
use crate::flat_index::FlatIndex;
use crate::hnsw::HnswIndex;
use crate::index::VectorIndex;
use crate::server::{self, AppState};
use crate::service::IndexService;

/// Hidden CLI flag carrying a worker's JSON configuration.
pub const WORKER_CONFIG_FLAG: &str = "--worker-config";

/// Runs the service in the topology its configuration asks for.
#[derive(Debug, Clone)]
pub struct ServiceRuntime {
    config: ServiceConfig,
}

impl ServiceRuntime {
    pub fn new(config: ServiceConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ServiceConfig {
        &self.config
    }

    /// Serve until `shutdown` resolves.
    ///
    /// Single-process mode serves in this process; multi-process mode
    /// supervises one worker process per CPU sharing the port.
    pub async fn run<F>(self, shutdown: F) -> anyhow::Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        if self.config.runtime.multiprocess {
            self.run_supervisor(shutdown).await
        } else {
            self.run_single(shutdown).await
        }
    }

    async fn run_single<F>(self, shutdown: F) -> anyhow::Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let addr = self.config.runtime.addr()?;
        let runtime = self.config.runtime.clone();
        with_index(&self.config, |service| async move {
            let listener = TcpListener::bind(addr)
                .await
                .with_context(|| format!("Failed to bind {}", addr))?;
            serve_service(service, listener, &runtime, shutdown).await
        })
        .await
    }

    /// Serve as one worker of a shared-port deployment.
    ///
    /// The worker loads its own copy of the index; nothing it mutates is
    /// visible to its siblings.
    #[cfg(unix)]
    pub async fn run_worker<F>(self, shutdown: F) -> anyhow::Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let span = tracing::info_span!("worker", pid = std::process::id());
        let addr = self.config.runtime.addr()?;
        let runtime = self.config.runtime.clone();
        let config = self.config;

        async move {
            info!("worker starting on {}", addr);
            with_index(&config, |service| async move {
                let listener = shared_port::bind_shared(addr)
                    .with_context(|| format!("Failed to bind shared port {}", addr))?;
                serve_service(service, listener, &runtime, shutdown).await
            })
            .await
        }
        .instrument(span)
        .await
    }

    #[cfg(not(unix))]
    pub async fn run_worker<F>(self, _shutdown: F) -> anyhow::Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        anyhow::bail!("shared-port workers need SO_REUSEPORT, which this platform lacks")
    }

    #[cfg(unix)]
    async fn run_supervisor<F>(self, shutdown: F) -> anyhow::Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        shared_port::supervise(self.config, shutdown).await
    }

    #[cfg(not(unix))]
    async fn run_supervisor<F>(self, _shutdown: F) -> anyhow::Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        anyhow::bail!("multi-process mode needs SO_REUSEPORT, which this platform lacks")
    }
}

/// Open the service over the configured engine and hand it to `run`.
async fn with_index<R, Fut>(config: &ServiceConfig, run: R) -> anyhow::Result<()>
where
    R: FnOnce(ServiceHandle) -> Fut,
    Fut: Future<Output = anyhow::Result<()>>,
{
    let index = &config.index;
    let service = match index.kind {
        IndexKind::Flat => ServiceHandle::Flat(
            open_service(config, FlatIndex::new(index.dimension, index.metric)).await?,
        ),
        IndexKind::Hnsw => ServiceHandle::Hnsw(
            open_service(config, HnswIndex::new(index.dimension, index.metric)).await?,
        ),
    };
    run(service).await
}

/// An opened service over one of the concrete engines.
pub enum ServiceHandle {
    Flat(Arc<IndexService<FlatIndex>>),
    Hnsw(Arc<IndexService<HnswIndex>>),
}

async fn open_service<I: VectorIndex + 'static>(
    config: &ServiceConfig,
    index: I,
) -> anyhow::Result<Arc<IndexService<I>>> {
    let index_config = config.index.clone();
    let service = tokio::task::spawn_blocking(move || IndexService::open(&index_config, index))
        .await
        .context("Index loading task failed")?
        .context("Failed to start index service")?;
    Ok(Arc::new(service))
}

async fn serve_service<F>(
    service: ServiceHandle,
    listener: TcpListener,
    runtime: &RuntimeConfig,
    shutdown: F,
) -> anyhow::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    match service {
        ServiceHandle::Flat(service) => serve(service, listener, runtime, shutdown).await,
        ServiceHandle::Hnsw(service) => serve(service, listener, runtime, shutdown).await,
    }
}

/// Serve `service` on `listener` until `shutdown`, then persist it if the
/// runtime is updateable.
///
/// Persisting starts only after every call on the blocking pool has
/// finished, grace period or not, so it never competes with request
/// mutations. A failed save is logged and returned.
pub async fn serve<I, F>(
    service: Arc<IndexService<I>>,
    listener: TcpListener,
    runtime: &RuntimeConfig,
    shutdown: F,
) -> anyhow::Result<()>
where
    I: VectorIndex + 'static,
    F: Future<Output = ()> + Send + 'static,
{
    let state = Arc::new(AppState::new(service.clone(), runtime.max_workers));
    server::serve(listener, state, shutdown, runtime.grace_period()).await?;

    if runtime.updateable {
        let saved = tokio::task::spawn_blocking(move || service.save())
            .await
            .context("Persist task failed")?;
        match saved {
            Ok(path) => info!("index persisted to {}", path.display()),
            Err(e) => {
                error!("failed to persist index on shutdown: {}", e);
                return Err(e).context("Failed to persist index on shutdown");
            }
        }
    }

    info!("service stopped");
    Ok(())
}

/// `SO_REUSEPORT` plumbing for the multi-process topology.
#[cfg(unix)]
pub mod shared_port {
    use std::future::Future;
    use std::io;
    use std::net::SocketAddr;

    use anyhow::Context;
    use tokio::net::{TcpListener, TcpSocket};
    use tokio::process::Command;
    use tokio::task::JoinSet;
    use tracing::{error, info, warn};

    use super::WORKER_CONFIG_FLAG;
    use crate::config::ServiceConfig;

    const BACKLOG: u32 = 1024;

    fn reuseport_socket(addr: SocketAddr) -> io::Result<TcpSocket> {
        let socket = if addr.is_ipv4() {
            TcpSocket::new_v4()?
        } else {
            TcpSocket::new_v6()?
        };
        socket.set_reuseport(true)?;
        if !socket.reuseport()? {
            return Err(io::Error::new(
                io::ErrorKind::Unsupported,
                "SO_REUSEPORT could not be enabled",
            ));
        }
        socket.bind(addr)?;
        Ok(socket)
    }

    /// Bind `addr` with `SO_REUSEPORT` without listening, holding the port
    /// for workers. Port 0 picks a free port; read it back with `local_addr`.
    pub fn reserve_port(addr: SocketAddr) -> io::Result<TcpSocket> {
        reuseport_socket(addr)
    }

    /// Listen on a port shared with sibling processes.
    pub fn bind_shared(addr: SocketAddr) -> io::Result<TcpListener> {
        reuseport_socket(addr)?.listen(BACKLOG)
    }

    /// Configuration handed to every worker: the reserved port, a pool
    /// sized to the CPU count and no persist on shutdown.
    pub fn worker_config(config: &ServiceConfig, port: u16, cpus: usize) -> ServiceConfig {
        let mut worker = config.clone();
        worker.runtime.port = port;
        worker.runtime.max_workers = cpus;
        worker.runtime.multiprocess = false;
        if worker.runtime.updateable {
            warn!("persist on shutdown is disabled with multiple workers sharing one save path");
            worker.runtime.updateable = false;
        }
        worker
    }

    /// Reserve the port, spawn one worker per CPU and wait for them.
    ///
    /// On `shutdown`, or as soon as any worker exits, every remaining worker
    /// gets SIGTERM.
    pub async fn supervise<F>(config: ServiceConfig, shutdown: F) -> anyhow::Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let addr = config.runtime.addr()?;
        let reserved =
            reserve_port(addr).with_context(|| format!("Failed to reserve port {}", addr))?;
        let bound = reserved.local_addr()?;
        info!("reserved {} for shared serving", bound);

        let cpus = num_cpus::get();
        let worker = worker_config(&config, bound.port(), cpus);
        let json = serde_json::to_string(&worker).context("Failed to encode worker config")?;
        let exe = std::env::current_exe().context("Cannot locate own executable")?;

        let mut pids = Vec::with_capacity(cpus);
        let mut workers = JoinSet::new();
        for _ in 0..cpus {
            let mut child = Command::new(&exe)
                .arg(WORKER_CONFIG_FLAG)
                .arg(&json)
                .kill_on_drop(true)
                .spawn()
                .context("Failed to spawn worker process")?;
            let pid = child.id();
            if let Some(pid) = pid {
                pids.push(pid);
            }
            workers.spawn(async move { (pid, child.wait().await) });
        }
        info!("started {} workers on {}", pids.len(), bound);

        let mut failed = false;
        tokio::select! {
            _ = shutdown => info!("shutdown requested, stopping workers"),
            Some(exited) = workers.join_next() => {
                failed = true;
                match exited {
                    Ok((pid, status)) => error!("worker {:?} exited early: {:?}", pid, status),
                    Err(e) => error!("worker wait task failed: {}", e),
                }
            }
        }

        for &pid in &pids {
            terminate(pid);
        }
        while let Some(exited) = workers.join_next().await {
            if let Ok((pid, Ok(status))) = exited {
                info!("worker {:?} exited with {}", pid, status);
            }
        }
        drop(reserved);

        if failed {
            anyhow::bail!("a worker process exited unexpectedly");
        }
        Ok(())
    }

    /// Ask a worker to shut down gracefully.
    pub fn terminate(pid: u32) {
        // SAFETY: kill only sends a signal; a stale pid yields ESRCH.
        let rc = unsafe { libc::kill(pid as libc::pid_t, libc::SIGTERM) };
        if rc != 0 {
            warn!(
                "failed to signal worker {}: {}",
                pid,
                io::Error::last_os_error()
            );
        }
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        #[test]
        fn test_worker_config_disables_persist() {
            let mut config = ServiceConfig::default();
            config.runtime.updateable = true;
            config.runtime.multiprocess = true;

            let worker = worker_config(&config, 41000, 8);
            assert_eq!(worker.runtime.port, 41000);
            assert_eq!(worker.runtime.max_workers, 8);
            assert!(!worker.runtime.updateable);
            assert!(!worker.runtime.multiprocess);
        }

        #[tokio::test]
        async fn test_reserve_then_share() {
            let reserved = reserve_port("127.0.0.1:0".parse().unwrap()).unwrap();
            let addr = reserved.local_addr().unwrap();

            let first = bind_shared(addr).unwrap();
            let second = bind_shared(addr).unwrap();
            assert_eq!(first.local_addr().unwrap(), addr);
            assert_eq!(second.local_addr().unwrap(), addr);
        }
    }
}
