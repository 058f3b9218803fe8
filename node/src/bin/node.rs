//! The node binary: one consensus participant talking to the relay.

use {
    clap::Parser,
    stakesim_node::{service, settings::Settings},
};

#[derive(Debug, Parser)]
#[command(name = "stakesim-node", about = "Run a stakesim blockchain node")]
struct Args {
    /// Node id (e.g. node1, node2, ...).
    #[arg(long)]
    node: String,

    /// Path to the settings file.
    #[arg(long, default_value = "config.yaml")]
    config: String,
}

#[tokio::main]
async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let settings = match Settings::load(&args.config) {
        Ok(settings) => settings,
        Err(e) => {
            eprintln!("failed to load {}: {e}", args.config);
            std::process::exit(1);
        }
    };

    if let Err(e) = service::run_node(&args.node, &settings).await {
        eprintln!("node {} failed: {e}", args.node);
        std::process::exit(1);
    }
}
