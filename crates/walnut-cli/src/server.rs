use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::{info, warn};
use walnut_kv::{KvStore, MemoryStore, SledStore};
use walnut_names::{CredentialHasher, ReservationService};

use crate::config::{Settings, StorageKind};

/// Storage chosen by configuration. Sled is kept concrete so it can be flushed on shutdown.
pub enum Backend {
    Memory(Arc<MemoryStore>),
    Sled(Arc<SledStore>),
}

impl Backend {
    pub fn open(settings: &Settings) -> Result<Self> {
        match settings.storage {
            StorageKind::Memory => {
                warn!("using in-memory storage, reservations are lost on restart");
                Ok(Backend::Memory(Arc::new(MemoryStore::new())))
            }
            StorageKind::Sled => {
                let store = SledStore::open(settings.data_dir()).with_context(|| {
                    format!("failed to open sled store at {}", settings.data_dir().display())
                })?;
                info!("opened sled store at {}", settings.data_dir().display());
                Ok(Backend::Sled(Arc::new(store)))
            }
        }
    }

    pub fn store(&self) -> Arc<dyn KvStore> {
        match self {
            Backend::Memory(store) => store.clone(),
            Backend::Sled(store) => store.clone(),
        }
    }

    pub async fn flush(&self) -> Result<()> {
        if let Backend::Sled(store) = self {
            store.flush().await.context("failed to flush sled store")?;
        }
        Ok(())
    }
}

pub fn service(settings: &Settings, backend: &Backend) -> ReservationService {
    ReservationService::new(
        backend.store(),
        settings.hold_policy(),
        CredentialHasher::new(&settings.hash_salt),
    )
}

/// Serve the HTTP API until ctrl-c, then flush storage.
pub async fn run(settings: Settings) -> Result<()> {
    let backend = Backend::open(&settings)?;
    let service = Arc::new(service(&settings, &backend));
    let routes = walnut_rpc::routes(service);

    let shutdown = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            warn!("failed to listen for shutdown signal: {}", err);
        }
    };
    let (addr, server) = warp::serve(routes)
        .try_bind_with_graceful_shutdown(settings.bind, shutdown)
        .with_context(|| format!("failed to bind {}", settings.bind))?;
    info!(
        "walnut listening on http://{} (hold {}s..{}s)",
        addr, settings.hold_base_secs, settings.hold_max_secs
    );

    server.await;
    info!("shutting down");
    backend.flush().await
}
