use clap::Parser;
use std::path::PathBuf;

#[derive(Debug, Parser)]
#[command(
    name = "kidpoints-server",
    about = "Family chore/reward points server",
    version
)]
pub struct Cli {
    /// Path to the YAML config file (overrides CONFIG_PATH).
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Listen port (overrides PORT and the config file).
    #[arg(long)]
    pub port: Option<u16>,
}
