use std::path::PathBuf;

use clap::Parser;

#[derive(Debug, Parser)]
#[command(name = "netring-member")]
pub struct Args {
    /// Member YAML config; environment variables override file values.
    #[arg(long, env = "NETRING_MEMBER_CONFIG")]
    pub config: Option<PathBuf>,
}
