use std::process;
use std::sync::Arc;

use bitcoin::Network;
use cbrc20_chain_client::bitcoind::BitcoinRpcClient;
use cbrc20_chain_client::ChainClient;
use cbrc20_config::file::ConfigFile;
use cbrc20_config::Config;
use cbrc20_context::{try_info, Context};
use cbrc20_core::Service;
use cbrc20_store::{pg_connect_with_retry, pg_pool, migrations, IndexerStore, OrderStore};
use clap::Parser;

use commands::{Command, ConfigPathArg, Opts};

mod commands;

pub fn main() {
    let logger = hiro_system_kit::log::setup_logger();
    let _guard = hiro_system_kit::log::setup_global_logger(logger.clone());
    let ctx = Context {
        logger: Some(logger),
        tracer: false,
    };

    let opts = match Opts::try_parse() {
        Ok(opts) => opts,
        Err(e) => {
            println!("{e}");
            process::exit(1);
        }
    };

    let command = opts.command.unwrap_or(Command::Start(ConfigPathArg {
        config_path: cbrc20_config::DEFAULT_CONFIG_PATH.into(),
    }));

    let result = hiro_system_kit::nestable_block_on(handle_command(command, &ctx));
    match result {
        Ok(()) => process::exit(0),
        Err(e) => {
            error!(ctx.expect_logger(), "{e}");
            process::exit(1);
        }
    }
}

async fn handle_command(command: Command, ctx: &Context) -> Result<(), String> {
    match command {
        Command::Migrate(arg) => {
            let config = load_config(&arg.config_path)?;
            run_migrations(&config, ctx).await
        }
        Command::Start(arg) => {
            let config = load_config(&arg.config_path)?;
            run_migrations(&config, ctx).await?;
            run_service(config, ctx).await
        }
    }
}

fn load_config(config_path: &str) -> Result<Config, String> {
    ConfigFile::from_file_path(config_path)
}

async fn run_migrations(config: &Config, ctx: &Context) -> Result<(), String> {
    let mut client = pg_connect_with_retry(&config.store.order_db).await;
    migrations::run(&mut client).await?;
    try_info!(ctx, "cli: order store migrations applied");
    Ok(())
}

async fn run_service(config: Config, ctx: &Context) -> Result<(), String> {
    let order_pool = pg_pool(&config.store.order_db)?;
    let indexer_pool = pg_pool(&config.store.indexer_db)?;
    let store = OrderStore::new(order_pool);
    let indexer = IndexerStore::new(indexer_pool);

    let client: Arc<dyn ChainClient> = Arc::new(BitcoinRpcClient::new(&config.chain, ctx.clone()));
    let mut service = Service::new(config.clone(), client, store, indexer, ctx.clone());

    let interrupt = service.interrupt_handle();
    ctrlc::set_handler(move || {
        interrupt.store(true, std::sync::atomic::Ordering::SeqCst);
    })
    .map_err(|e| format!("unable to install signal handler: {e}"))?;

    try_info!(
        ctx,
        "cli: starting {} on {}",
        config.server.name,
        network_label(config.server.network)
    );
    service.run().await.map_err(|e| e.to_string())
}

fn network_label(network: Network) -> &'static str {
    match network {
        Network::Bitcoin => "mainnet",
        Network::Testnet => "testnet",
        Network::Signet => "signet",
        Network::Regtest => "regtest",
        _ => "unknown",
    }
}
