use bitcoin::Network;
use std::fs::File;
use std::io::{BufReader, Read};

use serde_derive::Deserialize;

use crate::{
    ChainConfig, Config, FetchConfig, PgDatabaseConfig, SentryConfig, ServerConfig, StoreConfig,
    DEFAULT_ANCHOR_RETENTION, DEFAULT_FETCH_WINDOW, DEFAULT_FETCH_WORKERS, DEFAULT_PROMETHEUS_PORT,
    DEFAULT_RPC_LISTEN,
};

#[derive(Deserialize, Debug, Clone)]
pub struct ConfigFile {
    pub server: ServerConfigFile,
    pub chain: ChainConfigFile,
    pub db: DbConfigFile,
    pub sentry: Option<SentryConfigFile>,
    pub origins: Option<Vec<String>>,
    pub fetch: Option<FetchConfigFile>,
}

impl ConfigFile {
    pub fn from_file_path(file_path: &str) -> Result<Config, String> {
        let file = File::open(file_path)
            .map_err(|e| format!("unable to read file {}\n{:?}", file_path, e))?;
        let mut file_reader = BufReader::new(file);
        let mut file_buffer = vec![];
        file_reader
            .read_to_end(&mut file_buffer)
            .map_err(|e| format!("unable to read file {}\n{:?}", file_path, e))?;

        let config_file: ConfigFile = match serde_yaml::from_slice(&file_buffer) {
            Ok(s) => s,
            Err(e) => return Err(format!("config file malformatted {e}")),
        };
        ConfigFile::from_config_file(config_file)
    }

    pub fn from_config_file(config_file: ConfigFile) -> Result<Config, String> {
        let network = if config_file.server.testnet.unwrap_or(false) {
            Network::Testnet
        } else {
            Network::Bitcoin
        };

        let config = Config {
            server: ServerConfig {
                name: config_file.server.name.unwrap_or("cbrc20-indexer".into()),
                network,
                rpc_listen: config_file
                    .server
                    .rpc_listen
                    .unwrap_or(DEFAULT_RPC_LISTEN.into()),
                pprof: config_file.server.pprof.unwrap_or(false),
                prometheus: config_file.server.prometheus.unwrap_or(false),
                prometheus_port: config_file
                    .server
                    .prometheus_port
                    .unwrap_or(DEFAULT_PROMETHEUS_PORT),
            },
            chain: ChainConfig {
                url: config_file.chain.url,
                username: config_file.chain.username,
                password: config_file.chain.password,
                start_height: config_file.chain.start_height.unwrap_or(0),
            },
            store: StoreConfig {
                order_db: pg_config_from_mysql(&config_file.db.mysql)?,
                indexer_db: pg_config_from_mysql(&config_file.db.indexer)?,
            },
            sentry: match config_file.sentry {
                Some(s) => SentryConfig {
                    dsn: s.dsn,
                    traces_sample_rate: s.traces_sample_rate.unwrap_or(0.0),
                },
                None => SentryConfig {
                    dsn: None,
                    traces_sample_rate: 0.0,
                },
            },
            origins: config_file.origins.unwrap_or_default(),
            fetch: match config_file.fetch {
                Some(f) => FetchConfig {
                    window: f.window.unwrap_or(DEFAULT_FETCH_WINDOW),
                    workers: f.workers.unwrap_or(DEFAULT_FETCH_WORKERS),
                    anchor_retention: f.anchor_retention.unwrap_or(DEFAULT_ANCHOR_RETENTION),
                },
                None => FetchConfig {
                    window: DEFAULT_FETCH_WINDOW,
                    workers: DEFAULT_FETCH_WORKERS,
                    anchor_retention: DEFAULT_ANCHOR_RETENTION,
                },
            },
        };
        Ok(config)
    }
}

/// Splits the legacy `addr` field (`host:port`) carried over from the
/// source config schema into the host/port pair `deadpool-postgres` wants.
fn pg_config_from_mysql(file: &MysqlConfigFile) -> Result<PgDatabaseConfig, String> {
    let (host, port) = file
        .addr
        .rsplit_once(':')
        .ok_or_else(|| format!("db addr '{}' must be in host:port form", file.addr))?;
    let port: u16 = port
        .parse()
        .map_err(|_| format!("db addr '{}' has an invalid port", file.addr))?;
    Ok(PgDatabaseConfig {
        dbname: file.db.clone(),
        host: host.to_string(),
        port,
        user: file.user.clone(),
        password: if file.password.is_empty() {
            None
        } else {
            Some(file.password.clone())
        },
        search_path: None,
        pool_max_size: file.pool_max_size,
    })
}

#[derive(Deserialize, Debug, Clone)]
pub struct ServerConfigFile {
    pub name: Option<String>,
    pub testnet: Option<bool>,
    pub rpc_listen: Option<String>,
    pub pprof: Option<bool>,
    pub prometheus: Option<bool>,
    pub prometheus_port: Option<u16>,
}

#[derive(Deserialize, Debug, Clone)]
pub struct ChainConfigFile {
    pub url: String,
    pub username: String,
    pub password: String,
    pub start_height: Option<u32>,
}

#[derive(Deserialize, Debug, Clone)]
pub struct DbConfigFile {
    pub mysql: MysqlConfigFile,
    pub indexer: MysqlConfigFile,
}

#[derive(Deserialize, Debug, Clone)]
pub struct MysqlConfigFile {
    pub addr: String,
    pub user: String,
    pub password: String,
    pub db: String,
    pub pool_max_size: Option<usize>,
}

#[derive(Deserialize, Debug, Clone)]
pub struct SentryConfigFile {
    pub dsn: Option<String>,
    pub traces_sample_rate: Option<f32>,
}

#[derive(Deserialize, Debug, Clone)]
pub struct FetchConfigFile {
    pub window: Option<usize>,
    pub workers: Option<usize>,
    pub anchor_retention: Option<u32>,
}

#[cfg(test)]
mod test {
    use super::ConfigFile;

    #[test]
    fn parses_minimal_yaml() {
        let yaml = r#"
server:
  name: cbrc20-indexer
  testnet: true
  rpc_listen: "0.0.0.0:8080"
  pprof: false
  prometheus: true
chain:
  url: "http://localhost:18443"
  username: devnet
  password: devnet
  start_height: 820000
db:
  mysql:
    addr: "localhost:5432"
    user: postgres
    password: postgres
    db: cbrc20
  indexer:
    addr: "localhost:5432"
    user: postgres
    password: postgres
    db: ordinals
origins:
  - "https://example.com"
"#;
        let config_file: ConfigFile = serde_yaml::from_str(yaml).unwrap();
        let config = ConfigFile::from_config_file(config_file).unwrap();
        assert_eq!(config.chain.start_height, 820000);
        assert_eq!(config.store.order_db.port, 5432);
        assert_eq!(config.store.order_db.dbname, "cbrc20");
        assert_eq!(config.origins, vec!["https://example.com".to_string()]);
        assert!(config.server.prometheus);
        assert_eq!(config.server.prometheus_port, super::super::DEFAULT_PROMETHEUS_PORT);
    }

    #[test]
    fn rejects_malformed_addr() {
        let yaml = r#"
server:
  name: x
chain:
  url: "http://localhost:18443"
  username: a
  password: b
db:
  mysql:
    addr: "no-port-here"
    user: postgres
    password: postgres
    db: cbrc20
  indexer:
    addr: "localhost:5432"
    user: postgres
    password: postgres
    db: ordinals
"#;
        let config_file: ConfigFile = serde_yaml::from_str(yaml).unwrap();
        assert!(ConfigFile::from_config_file(config_file).is_err());
    }
}
