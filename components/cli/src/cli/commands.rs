use clap::Parser;

use cbrc20_config::DEFAULT_CONFIG_PATH;

/// Server-side core of the c-brc-20 explorer and inscribe-order service.
/// Running with no subcommand starts the order-lifecycle engine;
/// `migrate` only brings the order store's schema up to date.
#[derive(Parser, Debug)]
#[clap(name = "cbrc20", author, version, about, long_about = None)]
pub struct Opts {
    #[clap(subcommand)]
    pub command: Option<Command>,
}

#[derive(clap::Subcommand, Debug, Clone)]
pub enum Command {
    /// Run the block-processing and reveal-finalizer loops (default)
    Start(ConfigPathArg),
    /// Apply pending order-store migrations and exit
    Migrate(ConfigPathArg),
}

#[derive(clap::Args, Debug, Clone)]
pub struct ConfigPathArg {
    /// Path to the YAML config file
    #[clap(short = 'c', long = "config", default_value = DEFAULT_CONFIG_PATH)]
    pub config_path: String,
}
