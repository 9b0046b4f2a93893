#[global_allocator]
static GLOBAL: tikv_jemallocator::Jemalloc = tikv_jemallocator::Jemalloc;

use anyhow::Result;
use clap::Parser;
use openaperture_router::server;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "openaperture-router", about = "Authority-routed HTTP reverse proxy")]
struct Cli {
    /// Path to router config file
    #[arg(short, long, default_value = "config.toml")]
    config: PathBuf,

    /// Admin API listen address (for metrics/diagnostics)
    #[arg(long, default_value = "0.0.0.0:9091")]
    admin_listen: String,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let rt = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;

    rt.block_on(server::bootstrap::run(server::bootstrap::BootstrapArgs {
        config_path: cli.config,
        admin_listen: cli.admin_listen,
    }))
}
