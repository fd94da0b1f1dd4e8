pub mod indexer_store;
pub mod migrations;
pub mod order_store;
pub mod types;

pub use indexer_store::{InscriptionSummary, SearchOrder, SearchParams};
pub use order_store::{NewOrder, OrderTransition};
pub use types::{BlockAnchor, InscribeOrder, InscriptionId, OrderStatus};

use std::future::Future;
use std::pin::Pin;

use cbrc20_config::PgDatabaseConfig;
use deadpool_postgres::{Manager, ManagerConfig, Object, Pool, RecyclingMethod, Transaction};
use tokio_postgres::{Client, Config, NoTls};

/// Builds a connection pool for a single Postgres-compatible database.
pub fn pg_pool(config: &PgDatabaseConfig) -> Result<Pool, String> {
    let mut pg_config = Config::new();
    pg_config
        .dbname(&config.dbname)
        .host(&config.host)
        .port(config.port)
        .user(&config.user)
        .options(format!(
            "-csearch_path={}",
            config.search_path.as_deref().unwrap_or("public")
        ));
    if let Some(password) = &config.password {
        pg_config.password(password);
    }
    let manager = Manager::from_config(
        pg_config,
        NoTls,
        ManagerConfig {
            recycling_method: RecyclingMethod::Fast,
        },
    );
    let mut builder = Pool::builder(manager);
    if let Some(size) = config.pool_max_size {
        builder = builder.max_size(size);
    }
    builder
        .build()
        .map_err(|e| format!("unable to build pg connection pool: {e}"))
}

pub async fn pg_pool_client(pool: &Pool) -> Result<Object, String> {
    pool.get().await.map_err(|e| format!("unable to get pg client: {e}"))
}

pub async fn pg_begin(client: &mut Object) -> Result<Transaction<'_>, String> {
    client
        .transaction()
        .await
        .map_err(|e| format!("unable to begin pg transaction: {e}"))
}

/// Connects to Postgres directly (no pool), retrying forever. Used once
/// at startup to run migrations before the pool-backed stores come up.
pub async fn pg_connect_with_retry(config: &PgDatabaseConfig) -> Client {
    loop {
        let mut pg_config = Config::new();
        pg_config
            .dbname(&config.dbname)
            .host(&config.host)
            .port(config.port)
            .user(&config.user);
        if let Some(password) = &config.password {
            pg_config.password(password);
        }
        match pg_config.connect(NoTls).await {
            Ok((client, connection)) => {
                tokio::spawn(async move {
                    if let Err(e) = connection.await {
                        eprintln!("postgres connection error: {e}");
                    }
                });
                return client;
            }
            Err(e) => {
                eprintln!("error connecting to postgres: {e}");
                tokio::time::sleep(std::time::Duration::from_secs(1)).await;
            }
        }
    }
}

/// The order/anchor/undo-log store. The sole write boundary for
/// `InscribeOrder` and `BlockAnchor` data.
#[derive(Clone)]
pub struct OrderStore {
    pool: Pool,
}

impl OrderStore {
    pub fn new(pool: Pool) -> Self {
        OrderStore { pool }
    }

    pub async fn client(&self) -> Result<Object, String> {
        pg_pool_client(&self.pool).await
    }

    /// Runs `f` inside a single Postgres transaction; all mutations `f`
    /// performs either commit together or roll back together. Generic in
    /// the error type so callers can surface their
    /// own richer error enum (via `E: From<String>`) instead of losing it
    /// to a plain string.
    pub async fn transaction<T, E, F>(&self, f: F) -> Result<T, E>
    where
        E: From<String>,
        F: for<'c> FnOnce(&'c Transaction<'c>) -> Pin<Box<dyn Future<Output = Result<T, E>> + Send + 'c>>,
    {
        let mut client = self.client().await.map_err(E::from)?;
        let tx = pg_begin(&mut client).await.map_err(E::from)?;
        match f(&tx).await {
            Ok(value) => {
                tx.commit().await.map_err(|e| E::from(format!("commit failed: {e}")))?;
                Ok(value)
            }
            Err(e) => {
                let _ = tx.rollback().await;
                Err(e)
            }
        }
    }
}

/// Read-only handle onto the upstream indexer's database.
#[derive(Clone)]
pub struct IndexerStore {
    pool: Pool,
}

impl IndexerStore {
    pub fn new(pool: Pool) -> Self {
        IndexerStore { pool }
    }

    pub async fn get_inscription_by_id(
        &self,
        tx_id: &str,
        offset: i64,
    ) -> Result<Option<indexer_store::IndexedInscription>, String> {
        let client = pg_pool_client(&self.pool).await?;
        indexer_store::get_inscription_by_id(tx_id, offset, &client).await
    }

    pub async fn get_inscription_by_number(
        &self,
        inscription_number: i64,
    ) -> Result<Option<indexer_store::IndexedInscription>, String> {
        let client = pg_pool_client(&self.pool).await?;
        indexer_store::get_inscription_by_number(inscription_number, &client).await
    }

    /// Backs `/home/page/statistics`.
    pub async fn statistics(&self) -> Result<IndexerStatistics, String> {
        let client = pg_pool_client(&self.pool).await?;
        Ok(IndexerStatistics {
            inscriptions: indexer_store::inscriptions_count(&client).await?,
            stored_data: indexer_store::inscriptions_stored_data(&client).await?,
            total_fees: indexer_store::inscriptions_total_fees(&client).await?,
        })
    }

    /// Backs `/r/blockheight`.
    pub async fn block_height(&self) -> Result<Option<i64>, String> {
        let client = pg_pool_client(&self.pool).await?;
        indexer_store::block_height(&client).await
    }

    /// Backs `POST /inscriptions`.
    pub async fn search_inscriptions(
        &self,
        params: &SearchParams,
    ) -> Result<(Vec<InscriptionSummary>, i64), String> {
        let client = pg_pool_client(&self.pool).await?;
        indexer_store::search_inscriptions(params, &client).await
    }
}

/// `/home/page/statistics` response body.
#[derive(Debug, Clone, Copy)]
pub struct IndexerStatistics {
    pub inscriptions: i64,
    pub stored_data: i64,
    pub total_fees: i64,
}
