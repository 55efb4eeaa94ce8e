//! `embertree serve`: run a provider until Ctrl+C

use anyhow::{Context, Result};
use colored::Colorize;
use embertree_core::Tree;
use embertree_server::{ServerEvent, TreeServer};
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, info, warn};

use crate::config::ServeSettings;
use crate::trees;

pub async fn run_serve(settings: ServeSettings, shutdown_rx: &mut mpsc::Receiver<()>) -> Result<()> {
    let tree = match &settings.tree {
        Some(path) => trees::load_tree(path)?,
        None => {
            warn!("No tree description given, serving an empty tree");
            Tree::new()
        }
    };
    let element_count = tree.walk().len();

    println!(
        "{} Starting {} on {}",
        "EMBERTREE".cyan().bold(),
        settings.server.name.green(),
        settings.listen
    );

    let server = Arc::new(TreeServer::new(tree, settings.server.clone()));
    let logger = tokio::spawn(log_events(server.events()));

    let serving = {
        let server = Arc::clone(&server);
        let listen = settings.listen.clone();
        tokio::spawn(async move { server.serve_tcp(&listen).await })
    };

    println!("  Elements:  {}", element_count);
    if let Some(path) = &settings.tree {
        println!("  Tree:      {}", path.display());
    }
    println!("  Sessions:  up to {}", settings.server.max_sessions);
    println!("  Press Ctrl+C to stop");

    let result = tokio::select! {
        _ = shutdown_rx.recv() => {
            info!("Provider shutting down");
            Ok(())
        }
        joined = serving => joined
            .context("Server task failed")
            .and_then(|served| served.context("Server stopped unexpectedly")),
    };

    server.stop();
    server.close_sessions().await;
    logger.abort();
    println!("{}", "Provider stopped".yellow());
    result
}

async fn log_events(mut events: broadcast::Receiver<ServerEvent>) {
    loop {
        match events.recv().await {
            Ok(event) => log_event(&event),
            Err(broadcast::error::RecvError::Lagged(missed)) => {
                warn!("Event log lagging, {} events skipped", missed);
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}

fn log_event(event: &ServerEvent) {
    match event {
        ServerEvent::Listening(addr) => {
            println!("{} Listening on {}", "OK".green().bold(), addr);
        }
        ServerEvent::Connection(addr) => {
            println!("{} Consumer connected: {}", "TCP".cyan(), addr);
        }
        ServerEvent::Disconnect(addr) => {
            println!("{} Consumer disconnected: {}", "TCP".cyan(), addr);
        }
        ServerEvent::ClientError { address, error } => {
            warn!("Client {} error: {}", address, error);
        }
        ServerEvent::Error(e) => warn!("Request failed: {}", e),
        ServerEvent::Request { client, path, .. } => match path {
            Some(path) => debug!("Request from {} for {}", client, path),
            None => debug!("Ignored request from {}", client),
        },
        ServerEvent::ValueChange(element) => {
            info!("Value changed at {}", element.path());
        }
        ServerEvent::MatrixConnect(m) => {
            info!("{} target {} connected {:?}", m.path, m.target, m.sources);
        }
        ServerEvent::MatrixDisconnect(m) => {
            info!("{} target {} disconnected {:?}", m.path, m.target, m.sources);
        }
        ServerEvent::MatrixChange(m) => {
            info!("{} target {} set to {:?}", m.path, m.target, m.sources);
        }
    }
}
