//! Wiring for the order engine: configuration, telemetry and bootstrap.
//!
//! [`Engine::bootstrap`] picks the journal from the configuration, starts the
//! side-effect worker and hands back an [`OrderService`] ready for commands.

pub mod config;
pub mod telemetry;

use std::sync::Arc;

use dispatcher::{ChannelDispatcher, Notifier};
use domain::{OrderService, ProductCatalog};
use event_store::{EventStore, EventStoreError, InMemoryEventStore, PostgresEventStore};
use sqlx::PgPool;
use thiserror::Error;
use tokio::task::JoinHandle;

pub use config::{Config, LogFormat};
pub use telemetry::{init_tracing, install_metrics_recorder};

#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("Event store error: {0}")]
    EventStore(#[from] EventStoreError),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Telemetry error: {0}")]
    Telemetry(String),

    #[error("Side-effect worker failed: {0}")]
    Worker(#[from] tokio::task::JoinError),
}

/// A running engine: the order service plus its side-effect worker.
pub struct Engine {
    orders: OrderService<Arc<dyn EventStore>>,
    worker: JoinHandle<()>,
}

impl Engine {
    /// Builds the journal, spawns the dispatcher worker and assembles the
    /// order service.
    ///
    /// With `database_url` set the journal lives in PostgreSQL and its
    /// migrations are applied first; otherwise it is kept in memory.
    pub async fn bootstrap(
        config: &Config,
        catalog: Arc<dyn ProductCatalog>,
        notifier: Arc<dyn Notifier>,
    ) -> Result<Self, RuntimeError> {
        let store: Arc<dyn EventStore> = match &config.database_url {
            Some(url) => {
                let pool = PgPool::connect(url).await?;
                let store = PostgresEventStore::new(pool);
                store.run_migrations().await?;
                tracing::info!("using PostgreSQL journal");
                Arc::new(store)
            }
            None => {
                tracing::info!("using in-memory journal");
                Arc::new(InMemoryEventStore::new())
            }
        };

        let (dispatcher, worker) = ChannelDispatcher::spawn(config.dispatcher_buffer, notifier);
        let orders = OrderService::with_settings(
            store,
            catalog,
            Arc::new(dispatcher),
            config.engine_settings(),
        );

        tracing::info!(
            commit_timeout_ms = config.commit_timeout.as_millis() as u64,
            max_conflict_retries = config.max_conflict_retries,
            dispatcher_buffer = config.dispatcher_buffer,
            "order engine ready"
        );
        Ok(Self { orders, worker })
    }

    pub fn orders(&self) -> &OrderService<Arc<dyn EventStore>> {
        &self.orders
    }

    /// Stops accepting commands and waits for queued side effects to drain.
    pub async fn shutdown(self) -> Result<(), RuntimeError> {
        let Self { orders, worker } = self;
        drop(orders);
        worker.await?;
        tracing::info!("order engine stopped");
        Ok(())
    }
}
