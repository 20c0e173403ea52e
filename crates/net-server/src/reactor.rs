use std::collections::HashMap;
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use mio::net::TcpListener;
use mio::{Events, Interest, Poll, Token, Waker};

use crate::connection::Connection;
use crate::dispatcher::Dispatcher;
use crate::error::ServerError;
use crate::handler::{InvalidKeyHandler, MessageFactory};
use crate::writer::WriterRegistry;

const LISTENER: Token = Token(0);
const WAKER: Token = Token(1);
const FIRST_CONNECTION_TOKEN: usize = 2;

/// The selector-driven event loop. Owns the listening socket and every
/// accepted connection; only this loop ever calls `read`/`write` on a
/// socket. Everything else (the dispatcher, the reaper) only touches
/// connection state through the thread-safe `Writer` handle.
pub struct Reactor<F: MessageFactory> {
    poll: Poll,
    events: Events,
    listener: TcpListener,
    waker: Arc<Waker>,
    connections: HashMap<Token, Connection<F>>,
    next_token: usize,
    header_size: u8,
    max_body_bytes: u32,
    factory: Arc<F>,
    dispatcher: Arc<Dispatcher<F::Value>>,
    writers: WriterRegistry,
    invalid_key_handler: Arc<dyn InvalidKeyHandler>,
    shutdown: Arc<AtomicBool>,
}

impl<F: MessageFactory> Reactor<F> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        bind_addr: std::net::SocketAddr,
        events_capacity: usize,
        header_size: u8,
        max_body_bytes: u32,
        factory: Arc<F>,
        dispatcher: Arc<Dispatcher<F::Value>>,
        writers: WriterRegistry,
        invalid_key_handler: Arc<dyn InvalidKeyHandler>,
        shutdown: Arc<AtomicBool>,
    ) -> io::Result<Self> {
        let poll = Poll::new()?;
        let mut listener = TcpListener::bind(bind_addr)?;
        poll.registry().register(&mut listener, LISTENER, Interest::READABLE)?;
        let waker = Arc::new(Waker::new(poll.registry(), WAKER)?);
        Ok(Self {
            poll,
            events: Events::with_capacity(events_capacity),
            listener,
            waker,
            connections: HashMap::new(),
            next_token: FIRST_CONNECTION_TOKEN,
            header_size,
            max_body_bytes,
            factory,
            dispatcher,
            writers,
            invalid_key_handler,
            shutdown,
        })
    }

    pub fn waker(&self) -> Arc<Waker> {
        Arc::clone(&self.waker)
    }

    pub fn local_addr(&self) -> io::Result<std::net::SocketAddr> {
        self.listener.local_addr()
    }

    /// Blocks in `select()` until a registered socket is ready or a wakeup
    /// is posted, dispatching readiness one key at a time. Returns once
    /// `shutdown` is observed set, after a wakeup.
    pub fn run(mut self) {
        loop {
            if let Err(e) = self.poll.poll(&mut self.events, None) {
                if e.kind() == io::ErrorKind::Interrupted {
                    continue;
                }
                tracing::error!(error = %ServerError::Fatal(e), "reactor poll failed, shutting down");
                return;
            }

            if self.shutdown.load(Ordering::Acquire) {
                return;
            }

            let ready: Vec<(Token, bool, bool)> =
                self.events.iter().map(|e| (e.token(), e.is_readable(), e.is_writable())).collect();

            for (token, readable, writable) in ready {
                if token == WAKER {
                    continue;
                }
                if token == LISTENER {
                    self.accept();
                    continue;
                }
                if !self.connections.contains_key(&token) {
                    self.invalid_key_handler.handle(token);
                    continue;
                }
                if readable {
                    self.handle_readable(token);
                }
                // A connection removed by `handle_readable` (end-of-stream,
                // I/O error) must not also be drained here.
                if writable && self.connections.contains_key(&token) {
                    self.handle_writable(token);
                }
            }
        }
    }

    fn accept(&mut self) {
        loop {
            match self.listener.accept() {
                Ok((stream, peer_addr)) => {
                    let token = Token(self.next_token);
                    self.next_token += 1;
                    let mut stream = stream;
                    if let Err(e) =
                        self.poll.registry().register(&mut stream, token, Interest::READABLE)
                    {
                        tracing::warn!(?peer_addr, error = %e, "failed to register accepted socket");
                        continue;
                    }
                    match Connection::accept(
                        stream,
                        peer_addr,
                        token,
                        self.poll.registry(),
                        self.waker(),
                        self.header_size,
                        self.max_body_bytes,
                        Arc::clone(&self.factory),
                    ) {
                        Ok(conn) => {
                            self.writers.lock().unwrap().insert(token, Arc::clone(&conn.writer));
                            self.connections.insert(token, conn);
                            tracing::debug!(?token, ?peer_addr, "accepted connection");
                        }
                        Err(e) => {
                            tracing::warn!(?peer_addr, error = %e, "failed to set up connection");
                        }
                    }
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return,
                Err(e) => {
                    tracing::warn!(error = %e, "accept failed");
                    return;
                }
            }
        }
    }

    fn handle_readable(&mut self, token: Token) {
        let Some(conn) = self.connections.get_mut(&token) else { return };
        let dispatcher = &self.dispatcher;
        let result = conn.reader.read(&mut conn.stream, &mut |message| dispatcher.dispatch(token, message));
        if let Err(e) = result {
            match e {
                ServerError::EndOfStream => tracing::debug!(?token, "connection closed"),
                ServerError::HandlerFailure { .. } => {
                    tracing::warn!(?token, "handler panicked, closing connection");
                }
                other => tracing::warn!(?token, error = %other, "read failed, dropping connection"),
            }
            self.remove_connection(token);
        }
    }

    fn handle_writable(&mut self, token: Token) {
        let Some(conn) = self.connections.get_mut(&token) else { return };
        let writer = Arc::clone(&conn.writer);
        if let Err(e) = writer.handle(&mut conn.stream) {
            tracing::warn!(?token, error = %e, "write failed, dropping connection");
            self.remove_connection(token);
        }
    }

    fn remove_connection(&mut self, token: Token) {
        if let Some(mut conn) = self.connections.remove(&token) {
            let _ = self.poll.registry().deregister(&mut conn.stream);
        }
        self.writers.lock().unwrap().remove(&token);
    }
}
