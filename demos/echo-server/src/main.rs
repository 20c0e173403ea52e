use std::net::{IpAddr, SocketAddr};

use clap::Parser;
use net_server::{ConnectionContext, MessageFactory, MessageHandler, ServerBuilder, ServerConfig};

/// Minimal length-prefixed echo server, mostly useful for poking at the
/// framing and dispatch path with a raw socket.
#[derive(Parser)]
struct Cli {
    #[arg(long, default_value = "0.0.0.0")]
    bind: IpAddr,

    #[arg(long, default_value_t = 12509)]
    port: u16,

    #[arg(long, default_value_t = 4)]
    header_size: u8,

    #[arg(long, default_value_t = 1024 * 1024)]
    max_body_bytes: u32,
}

struct BytesFactory;
impl MessageFactory for BytesFactory {
    type Value = Vec<u8>;
    fn create(&self, body: &[u8]) -> Result<Vec<u8>, net_server::CodecError> {
        Ok(body.to_vec())
    }
}

struct Echo;
impl MessageHandler<Vec<u8>> for Echo {
    fn handle(&self, _ctx: &ConnectionContext<'_>, message: &Vec<u8>) -> Option<Vec<u8>> {
        Some(message.clone())
    }
}

fn main() {
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();
    let config = ServerConfig::builder()
        .bind_addr(SocketAddr::new(cli.bind, cli.port))
        .header_size(cli.header_size)
        .max_body_bytes(cli.max_body_bytes)
        .build();

    let handle = ServerBuilder::new(config, BytesFactory)
        .with_sync_handler(Echo)
        .start()
        .expect("failed to start server");

    tracing::info!(addr = %handle.local_addr(), "echo server listening");

    let (tx, rx) = std::sync::mpsc::channel();
    ctrlc::set_handler(move || {
        let _ = tx.send(());
    })
    .expect("failed to install ctrl-c handler");
    rx.recv().expect("ctrl-c channel closed unexpectedly");

    tracing::info!("shutting down");
    handle.shutdown().expect("clean shutdown failed");
}
