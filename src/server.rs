//! Server setup and lifecycle management.

use std::future::IntoFuture;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::api::{self, AppState};
use crate::config::Config;
use crate::error::LeaseError;
use crate::provider::{DnsProvider, MemoryProvider};
use crate::purger::Purger;
use crate::service::LeaseService;
use crate::store::{self, LeaseStore};

/// Lease DNS server: HTTP API plus background purger.
pub struct LeaseServer {
    config: Config,
    store: Arc<dyn LeaseStore>,
    provider: Arc<dyn DnsProvider>,
}

impl LeaseServer {
    /// Open the configured store and the in-process provider.
    pub async fn new(config: Config) -> Result<Self, LeaseError> {
        config.validate()?;
        let store = store::create_store(&config.store).await?;
        Self::open(config, store).await
    }

    /// Build a server over `store`, seeding the in-process zone with every
    /// stored record so provider and store agree from the first request.
    pub async fn open(config: Config, store: Arc<dyn LeaseStore>) -> Result<Self, LeaseError> {
        let provider = MemoryProvider::new(config.provider.root_domain())
            .with_page_size(config.provider.page_size);
        let records = store.all_records().await?;
        let restored = provider.restore(&records, config.provider.record_ttl);
        info!(
            restored,
            stored = records.len(),
            "restored provider zone from store"
        );
        Ok(Self::with_backends(config, store, Arc::new(provider)))
    }

    /// Build a server over explicit backends.
    pub fn with_backends(
        config: Config,
        store: Arc<dyn LeaseStore>,
        provider: Arc<dyn DnsProvider>,
    ) -> Self {
        Self {
            config,
            store,
            provider,
        }
    }

    /// Service over this server's backends.
    pub fn service(&self) -> LeaseService {
        LeaseService::new(
            self.store.clone(),
            self.provider.clone(),
            &self.config.provider,
        )
    }

    /// Bind the configured address and run until `cancel` fires.
    pub async fn run(self, cancel: CancellationToken) -> Result<(), LeaseError> {
        let listener = TcpListener::bind(self.config.api.listen_addr).await?;
        self.serve(listener, cancel).await
    }

    /// Serve on an already-bound listener until `cancel` fires.
    pub async fn serve(self, listener: TcpListener, cancel: CancellationToken) -> Result<(), LeaseError> {
        self.config.validate()?;

        let addr = listener.local_addr()?;
        info!(
            %addr,
            zone = %self.config.provider.root_domain(),
            store = %self.config.store.url,
            "Starting lease-dns server"
        );

        let purger = Purger::new(
            self.store.clone(),
            self.provider.clone(),
            self.config.purge.clone(),
        );
        let purger_handle = purger.spawn(cancel.clone());

        let state = AppState::new(self.service(), &self.config.api);
        let app = api::router(state);

        let shutdown = cancel.clone();
        let server = axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(async move {
            shutdown.cancelled().await;
            info!("API server shutdown requested");
        });

        let grace = self.config.api.shutdown_grace();
        let mut server = std::pin::pin!(server.into_future());
        let result = tokio::select! {
            result = &mut server => result,
            _ = async {
                cancel.cancelled().await;
                tokio::time::sleep(grace).await;
            } => {
                warn!(grace_secs = grace.as_secs(), "in-flight requests did not drain in time");
                Ok(())
            }
        };

        if let Err(e) = &result {
            error!(error = %e, "API server error");
            cancel.cancel();
        }

        info!("Waiting for purger to stop...");
        if let Err(e) = purger_handle.await {
            error!(error = %e, "purger task failed");
        }

        info!("lease-dns server stopped");
        result.map_err(LeaseError::from)
    }
}
