use std::net::SocketAddr;
use std::os::fd::AsRawFd;
use std::sync::Arc;

use mio::net::TcpStream;
use mio::{Registry, Token};

use crate::handler::MessageFactory;
use crate::reader::RequestReader;
use crate::writer::Writer;

/// Everything the reactor keeps for one accepted socket: the owned stream
/// (only ever read from or written to on the reactor thread), the framing
/// state machine, and the writer handle other threads use to queue
/// responses.
pub struct Connection<F: MessageFactory> {
    pub stream: TcpStream,
    pub peer_addr: SocketAddr,
    pub token: Token,
    pub reader: RequestReader<F>,
    pub writer: Arc<Writer>,
}

impl<F: MessageFactory> Connection<F> {
    pub fn accept(
        stream: TcpStream,
        peer_addr: SocketAddr,
        token: Token,
        registry: &Registry,
        waker: Arc<mio::Waker>,
        header_size: u8,
        max_body_bytes: u32,
        factory: Arc<F>,
    ) -> std::io::Result<Self> {
        let fd = stream.as_raw_fd();
        let writer_registry = registry.try_clone()?;
        let writer = Arc::new(Writer::new(writer_registry, fd, token, waker));
        Ok(Self {
            stream,
            peer_addr,
            token,
            reader: RequestReader::new(header_size, max_body_bytes, factory),
            writer,
        })
    }
}
