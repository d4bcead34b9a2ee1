//! Standalone peer for manual testing: lines typed on stdin are broadcast
//! to every connected peer, received messages are printed, and inbound
//! connections are acknowledged with the confirm tag.

use std::net::SocketAddr;
use std::sync::Arc;

use clap::Parser;
use log::{error, info, warn};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;

use mazenet::{local_address, Controller, PeerServer, CONFIRM_TAG};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Port to listen on (0 = OS-assigned)
    #[arg(short, long, default_value = "0")]
    port: u16,

    /// Peer to connect to on startup, as host:port
    #[arg(short, long)]
    connect: Option<String>,
}

/// Connection and message events forwarded from the networking tasks.
#[derive(Debug)]
enum PeerEvent {
    Connected { addr: SocketAddr },
    Message { payload: String },
    Closed { addr: SocketAddr },
}

/// Controller that forwards every callback onto a channel, so the main
/// loop can react without blocking the networking tasks.
struct ChannelController {
    events: mpsc::UnboundedSender<PeerEvent>,
}

impl Controller for ChannelController {
    fn incoming_connection(&self, addr: SocketAddr, _port: u16) {
        let _ = self.events.send(PeerEvent::Connected { addr });
    }

    fn receive_remote_message(&self, payload: String) {
        let _ = self.events.send(PeerEvent::Message { payload });
    }

    fn remote_close_connection(&self, addr: SocketAddr) {
        let _ = self.events.send(PeerEvent::Closed { addr });
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    if std::env::var("RUST_LOG").is_err() {
        eprintln!("Set RUST_LOG=info for detailed logging");
    }

    let args = Args::parse();

    let (event_tx, mut event_rx) = mpsc::unbounded_channel();
    let server = Arc::new(PeerServer::new(Arc::new(ChannelController {
        events: event_tx,
    })));

    let port = server.start_listening(args.port).await?;
    match local_address().await {
        Ok(ip) => info!("Waiting for connection on {}:{}", ip, port),
        Err(e) => {
            warn!("Could not determine LAN address ({}), listening on port {}", e, port);
        }
    }

    if let Some(target) = &args.connect {
        let (host, peer_port) = target
            .rsplit_once(':')
            .ok_or("peer must be given as host:port")?;
        let addr = server.connect_to(host, peer_port.parse()?).await?;
        info!("Connected to {}", addr);
    }

    let mut stdin = BufReader::new(tokio::io::stdin()).lines();

    loop {
        tokio::select! {
            event = event_rx.recv() => match event {
                Some(PeerEvent::Connected { addr }) => {
                    info!("Peer {} connected", addr);
                    if let Err(e) = server.confirm_connection(&addr).await {
                        error!("Failed to confirm {}: {}", addr, e);
                    }
                }
                Some(PeerEvent::Message { payload }) => {
                    if payload == CONFIRM_TAG {
                        info!("Connection confirmed by remote peer");
                    } else {
                        println!("{}", payload);
                    }
                }
                Some(PeerEvent::Closed { addr }) => {
                    info!("Peer {} disconnected", addr);
                }
                None => break,
            },

            line = stdin.next_line() => match line? {
                Some(line) if !line.is_empty() => {
                    if let Err(e) = server.broadcast(&line).await {
                        error!("Broadcast failed: {}", e);
                    }
                }
                Some(_) => {}
                None => break,
            },

            _ = tokio::signal::ctrl_c() => {
                info!("Shutting down");
                break;
            }
        }
    }

    server.close_all_connections().await?;
    server.stop_listening().await;

    Ok(())
}
