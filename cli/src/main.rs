//! mmcache CLI: follow a cache change feed from the terminal.
//!
//! Usage:
//! ```bash
//! export MMCACHE_URL=https://gdn.example.com MMCACHE_API_KEY=... MMCACHE_TENANT=acme
//!
//! # Stream change events as JSON lines (Ctrl-C to stop)
//! mmcache subscribe --name orders --keep-alive
//!
//! # Show the edge location the client would connect to
//! mmcache edge
//! ```

use std::env;
use std::process;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context};
use tracing_subscriber::EnvFilter;

use mmcache_core::{ClientConfig, Gateway};
use mmcache_http::HttpGateway;
use mmcache_ws::{SubscribeOptions, SubscriptionEvent, Supervisor};

#[tokio::main]
async fn main() {
    init_tracing();

    let args: Vec<String> = env::args().collect();
    if args.len() < 2 {
        print_usage();
        process::exit(1);
    }

    let result = match args[1].as_str() {
        "subscribe" => cmd_subscribe(&args[2..]).await,
        "edge" => cmd_edge().await,
        "version" | "--version" | "-V" => {
            println!("mmcache {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
        "help" | "--help" | "-h" => {
            print_usage();
            Ok(())
        }
        other => {
            eprintln!("Unknown command: {other}");
            print_usage();
            process::exit(1);
        }
    };

    if let Err(e) = result {
        eprintln!("Error: {e:#}");
        process::exit(1);
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn print_usage() {
    println!("mmcache {}", env!("CARGO_PKG_VERSION"));
    println!("Follow mmcache change feeds\n");
    println!("USAGE:");
    println!("    mmcache <COMMAND>\n");
    println!("COMMANDS:");
    println!("    subscribe  Stream change events as JSON lines");
    println!("    edge       Print the resolved edge endpoint");
    println!("    version    Print version");
    println!("    help       Print this help\n");
    println!("SUBSCRIBE FLAGS:");
    println!("    --name <SUB>          Subscription name  [required]");
    println!("    --keep-alive          Send heartbeats on a producer connection");
    println!("    --retries <N>         Reconnects after the first attempt (default 10)");
    println!("    --min-delay-ms <N>    First reconnect delay (default 1000)");
    println!("    --host <HOST>         Connect to HOST instead of the resolved edge\n");
    println!("ENVIRONMENT:");
    println!("    MMCACHE_URL, MMCACHE_API_KEY, MMCACHE_TENANT, MMCACHE_FABRIC, MMCACHE_NAME");
    println!("    RUST_LOG (default: info)");
}

fn gateway(config: ClientConfig) -> anyhow::Result<Arc<HttpGateway>> {
    Ok(Arc::new(HttpGateway::new(config)?))
}

async fn cmd_subscribe(args: &[String]) -> anyhow::Result<()> {
    let name = parse_flag(args, "--name").ok_or_else(|| anyhow!("--name is required"))?;
    let options = subscribe_options(args)?;

    let config = ClientConfig::from_env()?;
    let target = config.target()?;
    let supervisor = Supervisor::with_websockets(gateway(config)?, target)?;

    let (handle, mut events) = supervisor.subscribe_channel(&name, options)?;
    tracing::info!(subscription = %name, "subscribed");

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    let mut exhausted = false;
    loop {
        tokio::select! {
            _ = &mut ctrl_c => {
                tracing::info!("interrupted, cancelling subscriptions");
                supervisor.cancel_all();
                break;
            }
            event = events.recv() => match event {
                Some(event) => {
                    exhausted |= event.is_terminal();
                    print_event(&event)?;
                }
                None => break,
            },
        }
    }

    handle.join().await;
    if exhausted {
        return Err(anyhow!("subscription {name} gave up"));
    }
    Ok(())
}

async fn cmd_edge() -> anyhow::Result<()> {
    let config = ClientConfig::from_env()?;
    let endpoint = gateway(config)?
        .request_edge_endpoint()
        .await
        .context("edge lookup failed")?;
    println!("{endpoint}");
    Ok(())
}

fn subscribe_options(args: &[String]) -> anyhow::Result<SubscribeOptions> {
    let mut options = SubscribeOptions::default();
    if has_flag(args, "--keep-alive") {
        let interval = options.heartbeat_interval;
        options = options.with_keep_alive(interval);
    }
    if let Some(retries) = parse_flag(args, "--retries") {
        let retries = retries.parse().with_context(|| format!("invalid --retries {retries:?}"))?;
        options = options.with_retries(retries);
    }
    if let Some(ms) = parse_flag(args, "--min-delay-ms") {
        let ms: u64 = ms.parse().with_context(|| format!("invalid --min-delay-ms {ms:?}"))?;
        let factor = options.factor;
        options = options.with_backoff(Duration::from_millis(ms), factor);
    }
    if let Some(host) = parse_flag(args, "--host") {
        options = options.with_edge_host(host);
    }
    Ok(options)
}

fn print_event(event: &SubscriptionEvent) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string(event)?);
    Ok(())
}

fn parse_flag(args: &[String], flag: &str) -> Option<String> {
    let pos = args.iter().position(|a| a == flag)?;
    args.get(pos + 1).cloned()
}

fn has_flag(args: &[String], flag: &str) -> bool {
    args.iter().any(|a| a == flag)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn parses_subscribe_flags() {
        let opts = subscribe_options(&args(&[
            "--name",
            "orders",
            "--keep-alive",
            "--retries",
            "3",
            "--min-delay-ms",
            "250",
            "--host",
            "edge.example",
        ]))
        .unwrap();
        assert!(opts.keep_alive);
        assert_eq!(opts.retries, 3);
        assert_eq!(opts.min_delay, Duration::from_millis(250));
        assert_eq!(opts.edge_host.as_deref(), Some("edge.example"));
    }

    #[test]
    fn rejects_bad_numbers() {
        assert!(subscribe_options(&args(&["--retries", "many"])).is_err());
        assert!(subscribe_options(&args(&["--min-delay-ms", "-1"])).is_err());
    }

    #[test]
    fn defaults_without_flags() {
        assert_eq!(subscribe_options(&[]).unwrap(), SubscribeOptions::default());
    }
}
