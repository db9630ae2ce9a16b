use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

#[derive(Parser)]
#[command(name = "tessera", about = "Tessera: sharded in-memory key and object store", version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Run a node until Ctrl-C
    Serve(ServeArgs),
    /// Inspect a transaction log
    Log(LogArgs),
    /// Work with node configuration
    Config(ConfigArgs),
}

#[derive(Args)]
pub struct ServeArgs {
    /// Node configuration file (TOML). Defaults apply when it is missing.
    #[arg(short, long, default_value = "tessera.toml")]
    pub config: PathBuf,
}

#[derive(Args)]
pub struct LogArgs {
    #[command(subcommand)]
    pub action: LogAction,
}

#[derive(Subcommand)]
pub enum LogAction {
    /// Print every record in replay order
    Dump { dir: PathBuf },
}

#[derive(Args)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub action: ConfigAction,
}

#[derive(Subcommand)]
pub enum ConfigAction {
    /// Print the default configuration as TOML
    Init,
}
