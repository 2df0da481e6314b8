//! flight-linux: advertise over mDNS, find the peer you search for, and exchange lines with it.
//!
//! Each line typed on stdin becomes the pending message and is sent to every discovered peer.
//! Lines starting with `/` are commands: `/peers`, `/id <raw>`, `/search <raw>`,
//! `/select <name>`, `/quit`.

mod config;
mod mdns;

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use flight_core::{SessionController, SessionState};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::watch;

#[derive(Parser, Debug)]
#[command(name = "flight-linux", version, about = "Flight peer messaging daemon")]
struct Args {
    /// Raw identifier to advertise under (overrides the config file).
    #[arg(long)]
    identifier: Option<String>,
    /// Raw identifier of the peer to search for.
    #[arg(long)]
    search: Option<String>,
    /// Listening port. Random from the configured range when omitted.
    #[arg(long)]
    port: Option<u16>,
    /// Config file path.
    #[arg(long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args = Args::parse();
    let cfg = config::load(args.config.as_deref()).context("loading config")?;
    let identifier = args.identifier.or(cfg.identifier);
    let search = args.search.or(cfg.search);
    let port = args.port.or(cfg.listen_port);

    let daemon = mdns::daemon().context("starting mDNS responder")?;
    let mut controller = SessionController::new(
        &cfg.engine,
        Box::new(mdns::MdnsAdvertiser::new(daemon.clone())),
        Box::new(mdns::MdnsBrowser::new(daemon.clone())),
    )?;

    tokio::spawn(report_changes(controller.subscribe()));

    if let Some(raw) = &identifier {
        controller.update_identifier(raw);
        let bound = controller.start_broadcast(port).await?;
        tracing::info!(port = bound, "listening");
    }
    if let Some(raw) = &search {
        controller.update_search_identifier(raw);
        controller.start_search()?;
    }
    if identifier.is_none() && search.is_none() {
        tracing::warn!("neither --identifier nor --search given; use /id or /search");
    }

    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            res = &mut shutdown => {
                res?;
                break;
            }
            line = lines.next_line() => match line? {
                Some(line) => {
                    if !handle_line(&mut controller, line.trim()).await? {
                        break;
                    }
                }
                None => break,
            },
        }
    }

    controller.shutdown().await;
    if let Err(e) = daemon.shutdown() {
        tracing::warn!(error = %e, "mdns daemon shutdown failed");
    }
    tracing::info!("flight-linux stopped");
    Ok(())
}

/// Returns false when the user asked to quit.
async fn handle_line(controller: &mut SessionController, line: &str) -> Result<bool> {
    let (command, rest) = match line.split_once(' ') {
        Some((c, r)) => (c, r.trim()),
        None => (line, ""),
    };
    match command {
        "" => {}
        "/quit" => return Ok(false),
        "/peers" => print_peers(&controller.snapshot()),
        "/id" if !rest.is_empty() => {
            controller.update_identifier(rest);
            // Re-advertise under the new name.
            let port = controller.snapshot().listen_port;
            controller.stop_broadcast().await;
            let port = (port != 0).then_some(port);
            match controller.start_broadcast(port).await {
                Ok(bound) => tracing::info!(port = bound, "broadcasting under new identifier"),
                Err(e) => tracing::warn!(error = %e, "cannot broadcast"),
            }
        }
        "/search" if !rest.is_empty() => {
            controller.stop_search();
            controller.update_search_identifier(rest);
            if let Err(e) = controller.start_search() {
                tracing::warn!(error = %e, "cannot search");
            }
        }
        "/select" if !rest.is_empty() => controller.on_peer_selected(rest),
        c if c.starts_with('/') => {
            println!("commands: /peers, /id <raw>, /search <raw>, /select <name>, /quit");
        }
        _ => {
            controller.enter_message(line);
            let batch = controller.send();
            tokio::spawn(async move {
                match batch.await {
                    Ok(report) => println!(
                        "sent to {} peer(s): {} delivered, {} failed",
                        report.attempted, report.delivered, report.failed
                    ),
                    Err(e) => tracing::warn!(error = %e, "send task failed"),
                }
            });
        }
    }
    Ok(true)
}

fn print_peers(state: &SessionState) {
    if state.peers.is_empty() {
        println!("no peers");
        return;
    }
    for peer in state.peers.iter() {
        let marker = if state.selected_peer.as_deref() == Some(peer.name.as_str()) {
            "*"
        } else {
            " "
        };
        println!(
            "{marker} {} {}:{} {}",
            peer.name, peer.address, peer.port, peer.last_reply
        );
    }
}

/// Print incoming messages and peer replies as the state changes.
async fn report_changes(mut rx: watch::Receiver<SessionState>) {
    let mut previous = rx.borrow_and_update().clone();
    while rx.changed().await.is_ok() {
        let current = rx.borrow_and_update().clone();
        if current.last_received_message != previous.last_received_message {
            println!("< {}", current.last_received_message);
        }
        for peer in current.peers.iter() {
            let before = previous.peers.get(&peer.name);
            if before.is_none() {
                println!("+ {} ({}:{})", peer.name, peer.address, peer.port);
            }
            if !peer.last_reply.is_empty()
                && before.map(|b| b.last_reply.as_str()) != Some(peer.last_reply.as_str())
            {
                println!("{}: {}", peer.name, peer.last_reply);
            }
        }
        for peer in previous.peers.iter() {
            if current.peers.get(&peer.name).is_none() {
                println!("- {}", peer.name);
            }
        }
        previous = current;
    }
}

/// Wait for Ctrl+C or SIGTERM (Unix).
async fn shutdown_signal() -> Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm = signal(SignalKind::terminate()).context("installing SIGTERM handler")?;
        tokio::select! {
            res = tokio::signal::ctrl_c() => res?,
            _ = sigterm.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await?;
    }
    Ok(())
}
