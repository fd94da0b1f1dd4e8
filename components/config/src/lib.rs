pub mod file;

use bitcoin::Network;

pub const DEFAULT_CONFIG_PATH: &str = "./config/config.yaml";
pub const DEFAULT_RPC_LISTEN: &str = "0.0.0.0:8080";
pub const DEFAULT_PROMETHEUS_PORT: u16 = 9153;
pub const DEFAULT_ANCHOR_RETENTION: u32 = 50;
pub const DEFAULT_FETCH_WINDOW: usize = 16;
pub const DEFAULT_FETCH_WORKERS: usize = 4;
pub const DEFAULT_FETCH_CHANNEL_CAPACITY: usize = DEFAULT_FETCH_WINDOW * DEFAULT_FETCH_WORKERS;
pub const DEFAULT_FINALIZER_INTERVAL_SECS: u64 = 5;
pub const DEFAULT_PROCESSOR_RETRY_DELAY_SECS: u64 = 5;
pub const DEFAULT_RETRY_BACKOFF_WARN_SECS: u64 = 120;
pub const DEFAULT_POSTAGE_MIN: u64 = 330;
pub const DEFAULT_POSTAGE_MAX: u64 = 10_000;

/// Connection parameters for a Postgres-compatible database. The `db.mysql`
/// key name in the YAML schema is a holdover from the original service's
/// naming (its primary store ran on a MySQL-flavored driver); this
/// workspace's store is Postgres, so the field carries the legacy name but
/// the value resolves to a Postgres DSN.
#[derive(Clone, Debug)]
pub struct PgDatabaseConfig {
    pub dbname: String,
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: Option<String>,
    pub search_path: Option<String>,
    pub pool_max_size: Option<usize>,
}

#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub name: String,
    pub network: Network,
    pub rpc_listen: String,
    pub pprof: bool,
    pub prometheus: bool,
    /// Port the `/metrics` exporter binds when `prometheus` is set.
    /// Defaults alongside `prometheus` in `ConfigFile`.
    pub prometheus_port: u16,
}

#[derive(Clone, Debug)]
pub struct ChainConfig {
    pub url: String,
    pub username: String,
    pub password: String,
    pub start_height: u32,
}

#[derive(Clone, Debug)]
pub struct StoreConfig {
    pub order_db: PgDatabaseConfig,
    pub indexer_db: PgDatabaseConfig,
}

#[derive(Clone, Debug)]
pub struct SentryConfig {
    pub dsn: Option<String>,
    pub traces_sample_rate: f32,
}

#[derive(Clone, Debug)]
pub struct FetchConfig {
    pub window: usize,
    pub workers: usize,
    pub anchor_retention: u32,
}

#[derive(Clone, Debug)]
pub struct Config {
    pub server: ServerConfig,
    pub chain: ChainConfig,
    pub store: StoreConfig,
    pub sentry: SentryConfig,
    pub origins: Vec<String>,
    pub fetch: FetchConfig,
}

impl Config {
    pub fn devnet_default() -> Config {
        Config {
            server: ServerConfig {
                name: "cbrc20-indexer".into(),
                network: Network::Regtest,
                rpc_listen: DEFAULT_RPC_LISTEN.into(),
                pprof: false,
                prometheus: false,
                prometheus_port: DEFAULT_PROMETHEUS_PORT,
            },
            chain: ChainConfig {
                url: "http://localhost:18443".into(),
                username: "devnet".into(),
                password: "devnet".into(),
                start_height: 0,
            },
            store: StoreConfig {
                order_db: PgDatabaseConfig {
                    dbname: "cbrc20".into(),
                    host: "localhost".into(),
                    port: 5432,
                    user: "postgres".into(),
                    password: Some("postgres".into()),
                    search_path: None,
                    pool_max_size: None,
                },
                indexer_db: PgDatabaseConfig {
                    dbname: "ordinals".into(),
                    host: "localhost".into(),
                    port: 5432,
                    user: "postgres".into(),
                    password: Some("postgres".into()),
                    search_path: None,
                    pool_max_size: None,
                },
            },
            sentry: SentryConfig {
                dsn: None,
                traces_sample_rate: 0.0,
            },
            origins: vec![],
            fetch: FetchConfig {
                window: DEFAULT_FETCH_WINDOW,
                workers: DEFAULT_FETCH_WORKERS,
                anchor_retention: DEFAULT_ANCHOR_RETENTION,
            },
        }
    }

    #[cfg(test)]
    pub fn test_default() -> Config {
        Config::devnet_default()
    }
}
