//! The relay binary: the central fan-out server with its admin console.

use {
    clap::Parser,
    stakesim_net::{
        config::NetConfig,
        relay::{Relay, RelayConfig},
    },
    stakesim_node::settings::Settings,
    tokio::io::{AsyncBufReadExt, BufReader},
};

#[derive(Debug, Parser)]
#[command(name = "stakesim-relay", about = "Run the stakesim message relay")]
struct Args {
    /// Path to the settings file.
    #[arg(long, default_value = "config.yaml")]
    config: String,

    /// Debug mode: no automatic steps, forge rounds are driven manually.
    #[arg(long)]
    debug: bool,
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

    let relay = match Relay::start(RelayConfig {
        host: settings.server.host.clone(),
        port: settings.server.port,
        step_interval: settings.step.interval,
        auto_step: !args.debug,
        net: NetConfig::default(),
    })
    .await
    {
        Ok(relay) => relay,
        Err(e) => {
            eprintln!("failed to start relay: {e}");
            std::process::exit(1);
        }
    };

    admin_loop(&relay).await;
    relay.shutdown().await;
}

/// Read admin commands from stdin until `exit`.
async fn admin_loop(relay: &Relay) {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        let parts: Vec<&str> = line.split_whitespace().collect();
        let Some((&name, args)) = parts.split_first() else {
            continue;
        };
        match name {
            "step" => relay.step().await,
            "stop" => relay.stop_steps(),
            "continue" => relay.start_steps(),
            "nodes" => println!("connected nodes: {:?}", relay.connected_nodes()),
            "drop" => cmd_drop(relay, args),
            "delay" => cmd_delay(relay, args),
            "help" => print_help(),
            "exit" => return,
            other => println!("unknown command: {other}. Type 'help' for available commands."),
        }
    }
}

fn cmd_drop(relay: &Relay, args: &[&str]) {
    let Some(&node_id) = args.first() else {
        println!("current drop set: {:?}", relay.drops());
        return;
    };
    match args.get(1).copied().unwrap_or("toggle") {
        "on" => relay.set_drop(node_id, true),
        "off" => relay.set_drop(node_id, false),
        "toggle" => {
            relay.toggle_drop(node_id);
        }
        _ => println!("usage: drop <node_id> [on|off|toggle]"),
    }
}

fn cmd_delay(relay: &Relay, args: &[&str]) {
    let Some(&node_id) = args.first() else {
        println!("current delays (ms): {:?}", relay.delays());
        return;
    };
    match args.get(1).copied() {
        None | Some("off") => relay.set_delay(node_id, None),
        Some(ms) => match ms.parse::<u64>() {
            Ok(ms) => relay.set_delay(node_id, Some(ms as f64 / 1000.0)),
            Err(_) => println!("usage: delay <node_id> <ms|off>"),
        },
    }
}

fn print_help() {
    println!("Available relay commands:");
    println!("  step                       - broadcast a step message now");
    println!("  stop                       - pause automatic steps");
    println!("  continue                   - resume automatic steps");
    println!("  drop <node_id> [on|off|toggle] - simulate packet loss towards a node");
    println!("  delay <node_id> <ms|off>   - simulate delivery latency towards a node");
    println!("  nodes                      - list connected nodes");
    println!("  exit                       - shut down the relay");
}
