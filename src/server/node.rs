use std::net::SocketAddr;
use std::sync::Arc;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::info;
use warp::Filter;
use warp::Rejection;
use warp::Reply;

use super::routes;
use super::CleanupWorker;
use super::NotificationHub;
use super::ReleaseMessageScanner;
use super::ReleasePublisher;
use super::ServerContext;
use crate::async_task::spawn_task;
use crate::model::ServiceAddress;
use crate::MemoryStore;
use crate::NetworkError;
use crate::ReleaseMessageStore;
use crate::ReleaseStore;
use crate::Result;
use crate::ServerSettings;
use crate::SledStore;

/// One config-service process: stores, publisher, notification hub and the
/// background scanner and cleanup tasks that connect them.
pub struct ConfigServer {
    settings: ServerSettings,
    release_store: Arc<dyn ReleaseStore>,
    publisher: Arc<ReleasePublisher>,
    cleanup: CleanupWorker,
    hub: Arc<NotificationHub>,
    scanner: Arc<ReleaseMessageScanner>,
}

impl std::fmt::Debug for ConfigServer {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        f.debug_struct("ConfigServer")
            .field("listen_address", &self.settings.listen_address)
            .field("db_path", &self.settings.db_path)
            .finish()
    }
}

impl ConfigServer {
    /// Opens sled at `db_path`, or keeps everything in memory when unset.
    pub fn new(settings: ServerSettings) -> Result<Self> {
        match &settings.db_path {
            Some(path) => {
                info!("opening release database at {:?}", path);
                let store = Arc::new(SledStore::open(path)?);
                Self::with_stores(settings, store.clone(), store)
            }
            None => {
                info!("no db_path configured, releases are kept in memory");
                let store = Arc::new(MemoryStore::new());
                Self::with_stores(settings, store.clone(), store)
            }
        }
    }

    pub fn with_stores(
        settings: ServerSettings,
        message_store: Arc<dyn ReleaseMessageStore>,
        release_store: Arc<dyn ReleaseStore>,
    ) -> Result<Self> {
        let (publisher, cleanup) = ReleasePublisher::new(
            message_store.clone(),
            release_store.clone(),
            settings.cleanup_queue_capacity,
            settings.cleanup_batch_size,
        );
        let hub = Arc::new(NotificationHub::new(message_store.clone(), settings.hold_timeout()));
        let scanner = ReleaseMessageScanner::new(message_store, settings.scan_interval())?;
        scanner.add_listener(hub.clone());

        Ok(Self {
            settings,
            release_store,
            publisher: Arc::new(publisher),
            cleanup,
            hub,
            scanner: Arc::new(scanner),
        })
    }

    pub fn publisher(&self) -> Arc<ReleasePublisher> {
        self.publisher.clone()
    }

    pub fn hub(&self) -> Arc<NotificationHub> {
        self.hub.clone()
    }

    pub fn scanner(&self) -> Arc<ReleaseMessageScanner> {
        self.scanner.clone()
    }

    pub fn routes(&self) -> impl Filter<Extract = (impl Reply,), Error = Rejection> + Clone {
        let services = self
            .settings
            .advertised_urls
            .iter()
            .map(ServiceAddress::new)
            .collect::<Vec<_>>();
        routes(ServerContext {
            release_store: self.release_store.clone(),
            hub: self.hub.clone(),
            publisher: self.publisher.clone(),
            services: Arc::new(services),
        })
    }

    /// Binds the listen address and spawns the HTTP server, the scanner and
    /// the cleanup worker. All of them stop when `shutdown` fires; held
    /// long polls are released with "not modified" first.
    pub fn start(
        self,
        shutdown: watch::Receiver<()>,
    ) -> Result<RunningServer> {
        let routes = self.routes();
        let mut tasks = Vec::new();

        let scanner = self.scanner.clone();
        let scanner_shutdown = shutdown.clone();
        spawn_task(
            "release message scanner",
            move || scanner.run(scanner_shutdown),
            Some(&mut tasks),
        );

        let cleanup = self.cleanup;
        let cleanup_shutdown = shutdown.clone();
        spawn_task(
            "release message cleanup",
            move || cleanup.run(cleanup_shutdown),
            Some(&mut tasks),
        );

        let hub = self.hub.clone();
        let mut server_shutdown = shutdown;
        let address = self.settings.listen_address;
        let (local_addr, server) = warp::serve(routes)
            .try_bind_with_graceful_shutdown(address, async move {
                let _ = server_shutdown.changed().await;
                hub.shutdown();
            })
            .map_err(|e| NetworkError::Bind {
                address: address.to_string(),
                reason: e.to_string(),
            })?;
        info!("config service listening on {}", local_addr);

        Ok(RunningServer {
            local_addr,
            server: tokio::spawn(server),
            tasks,
        })
    }

    /// Starts and waits for shutdown to complete.
    pub async fn run(
        self,
        shutdown: watch::Receiver<()>,
    ) -> Result<()> {
        self.start(shutdown)?.wait().await
    }
}

/// Handles of a started [`ConfigServer`].
#[derive(Debug)]
pub struct RunningServer {
    pub local_addr: SocketAddr,
    server: JoinHandle<()>,
    tasks: Vec<JoinHandle<()>>,
}

impl RunningServer {
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub async fn wait(self) -> Result<()> {
        self.server.await?;
        for task in self.tasks {
            task.await?;
        }
        info!("config service stopped");
        Ok(())
    }
}
