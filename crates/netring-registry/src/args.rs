use std::path::PathBuf;

use clap::Parser;

#[derive(Debug, Parser)]
#[command(name = "netring-registry")]
pub struct Args {
    /// Registry YAML config; environment variables override file values.
    #[arg(long, env = "NETRING_REGISTRY_CONFIG")]
    pub config: Option<PathBuf>,
}
