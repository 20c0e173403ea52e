use std::io::{Read, Write};
use std::net::{IpAddr, Ipv4Addr, SocketAddr, TcpStream};
use std::time::Duration;

use net_server::{ConnectionContext, MessageFactory, MessageHandler, ServerBuilder, ServerConfig};

struct EchoFactory;
impl MessageFactory for EchoFactory {
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

struct PanicOnBoom;
impl MessageHandler<Vec<u8>> for PanicOnBoom {
    fn handle(&self, _ctx: &ConnectionContext<'_>, message: &Vec<u8>) -> Option<Vec<u8>> {
        if message == b"boom" {
            panic!("boom");
        }
        Some(message.clone())
    }
}

fn start_echo_server() -> net_server::ServerHandle {
    let bind_addr = SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 0);
    let config = ServerConfig::builder().bind_addr(bind_addr).build();
    ServerBuilder::new(config, EchoFactory).with_sync_handler(Echo).start().unwrap()
}

fn frame(body: &[u8]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(4 + body.len());
    buf.extend_from_slice(&(body.len() as u32).to_be_bytes());
    buf.extend_from_slice(body);
    buf
}

fn read_frame(stream: &mut TcpStream) -> Vec<u8> {
    let mut len_buf = [0u8; 4];
    stream.read_exact(&mut len_buf).unwrap();
    let len = u32::from_be_bytes(len_buf) as usize;
    let mut body = vec![0u8; len];
    stream.read_exact(&mut body).unwrap();
    body
}

#[test]
fn single_frame_roundtrip() {
    let handle = start_echo_server();
    let mut client = TcpStream::connect(handle.local_addr()).unwrap();
    client.write_all(&frame(b"hello")).unwrap();
    assert_eq!(read_frame(&mut client), b"hello");
    handle.shutdown().unwrap();
}

#[test]
fn split_header_across_writes() {
    let handle = start_echo_server();
    let mut client = TcpStream::connect(handle.local_addr()).unwrap();
    let full = frame(b"world");
    client.write_all(&full[..2]).unwrap();
    std::thread::sleep(Duration::from_millis(20));
    client.write_all(&full[2..]).unwrap();
    assert_eq!(read_frame(&mut client), b"world");
    handle.shutdown().unwrap();
}

#[test]
fn coalesced_frames_in_one_write() {
    let handle = start_echo_server();
    let mut client = TcpStream::connect(handle.local_addr()).unwrap();
    let mut both = frame(b"first");
    both.extend_from_slice(&frame(b"second"));
    client.write_all(&both).unwrap();
    assert_eq!(read_frame(&mut client), b"first");
    assert_eq!(read_frame(&mut client), b"second");
    handle.shutdown().unwrap();
}

#[test]
fn disconnect_mid_frame_does_not_take_down_the_reactor() {
    let handle = start_echo_server();

    {
        let mut client = TcpStream::connect(handle.local_addr()).unwrap();
        client.write_all(&[0, 0]).unwrap();
        // Dropped here, closing the socket with only 2 of 4 header bytes sent.
    }

    std::thread::sleep(Duration::from_millis(20));

    let mut client = TcpStream::connect(handle.local_addr()).unwrap();
    client.write_all(&frame(b"still alive")).unwrap();
    assert_eq!(read_frame(&mut client), b"still alive");
    handle.shutdown().unwrap();
}

#[test]
fn panicking_handler_closes_only_that_connection() {
    let bind_addr = SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 0);
    let config = ServerConfig::builder().bind_addr(bind_addr).build();
    let handle = ServerBuilder::new(config, EchoFactory).with_sync_handler(PanicOnBoom).start().unwrap();

    let mut doomed = TcpStream::connect(handle.local_addr()).unwrap();
    doomed.write_all(&frame(b"boom")).unwrap();
    // The panicking handler gets no response; the connection is torn down
    // instead, which the client observes as an orderly EOF.
    let mut buf = [0u8; 1];
    assert_eq!(doomed.read(&mut buf).unwrap(), 0);

    let mut survivor = TcpStream::connect(handle.local_addr()).unwrap();
    survivor.write_all(&frame(b"still here")).unwrap();
    assert_eq!(read_frame(&mut survivor), b"still here");
    handle.shutdown().unwrap();
}
