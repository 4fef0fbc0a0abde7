//! Interactive shell driving a single [`kadnet_node::Node`].
//!
//! Mirrors `kademlia/__main__.py`: a line-oriented REPL with three verbs
//! (`put <text>`, `get <decimal key>`, `exit`) over a node that optionally
//! joins an existing network at startup via `--join`.

use std::net::IpAddr;

use anyhow::Context;
use kadnet_node::{Node, NodeConfig};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing::{error, info};

struct Args {
    listen_ip: Option<IpAddr>,
    join: Option<IpAddr>,
}

fn parse_args() -> anyhow::Result<Args> {
    let mut listen_ip = None;
    let mut join = None;
    let mut argv = std::env::args().skip(1);
    while let Some(arg) = argv.next() {
        match arg.as_str() {
            "--listen-ip" => {
                let value = argv.next().context("--listen-ip requires a value")?;
                listen_ip = Some(value.parse().context("--listen-ip is not a valid IP address")?);
            }
            "--join" => {
                let value = argv.next().context("--join requires a value")?;
                join = Some(value.parse().context("--join is not a valid IP address")?);
            }
            other => anyhow::bail!("unrecognized argument: {other}"),
        }
    }
    Ok(Args { listen_ip, join })
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("kadnet=info".parse()?),
        )
        .init();

    let args = parse_args()?;

    let mut config = NodeConfig::default();
    if let Some(listen_ip) = args.listen_ip {
        config.listen_ip = listen_ip;
    }

    let node = Node::start(config).await.context("failed to start node")?;
    info!(id = %node.local_id(), "node started");

    if let Some(seed_ip) = args.join {
        let seed_id = node.join_network(seed_ip).await?;
        info!(seed = %seed_ip, seed_id = %seed_id, "joined network");
    }

    run_shell(&node).await?;

    node.stop().await;
    Ok(())
}

async fn run_shell(node: &Node) -> anyhow::Result<()> {
    let mut stdout = tokio::io::stdout();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        let prompt = format!("\x1b[91m[{} nodes] \x1b[0m> ", node.routing_table_len());
        stdout.write_all(prompt.as_bytes()).await?;
        stdout.flush().await?;

        let Some(line) = lines.next_line().await? else {
            break;
        };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let mut parts = line.splitn(2, char::is_whitespace);
        let verb = parts.next().unwrap_or_default();
        let rest = parts.next().unwrap_or_default().trim();

        match verb {
            "exit" => break,
            "put" => {
                if rest.is_empty() {
                    println!("usage: put <text>");
                    continue;
                }
                match node.store_value(rest.as_bytes()).await {
                    Ok(Some((key, successes))) => {
                        println!("Stored key: {} on {} nodes", key.to_decimal(), successes);
                    }
                    Ok(None) => println!("Failed to store data"),
                    Err(e) => error!(error = %e, "store failed"),
                }
            }
            "get" => {
                if rest.is_empty() {
                    println!("usage: get <decimal key>");
                    continue;
                }
                let key = match kadnet_dht::Identifier::from_decimal(rest, node.local_id().width_bits()) {
                    Ok(key) => key,
                    Err(_) => {
                        println!("invalid key: {rest}");
                        continue;
                    }
                };
                match node.get_value(&key).await {
                    Ok(kadnet_node::GetValueResult::Value(v)) => {
                        println!("Value: {}", String::from_utf8_lossy(&v));
                    }
                    Ok(kadnet_node::GetValueResult::ClosestContacts(_)) => {
                        println!("Value: None");
                    }
                    Err(e) => error!(error = %e, "get failed"),
                }
            }
            other => println!("unknown command: {other}"),
        }
    }

    Ok(())
}
