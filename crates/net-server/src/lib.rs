//! A non-blocking, single-reactor network server core: accepts
//! length-prefixed binary messages over TCP, decodes them with an
//! application-supplied [`MessageFactory`], dispatches to a synchronous or
//! asynchronous handler, and writes length-prefixed responses back.

mod config;
mod connection;
mod dispatcher;
mod error;
mod frame;
mod handler;
mod reactor;
mod reader;
mod reaper;
mod response;
mod writer;

pub use config::{ServerConfig, ServerConfigBuilder};
pub use error::{Result, ServerError};
pub use handler::{
    AsyncMessageHandler, ChannelPending, CodecError, ConnectionContext, DefaultInvalidKeyHandler,
    InvalidKeyHandler, Message, MessageFactory, MessageHandler, NotifySink, PendingOutcome,
    PendingResult, ResponseRefiner,
};

use std::collections::HashMap;
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;

use dispatcher::Dispatcher;
use reactor::Reactor;
use reaper::AsyncJobReaper;
use response::ResponseAssembly;
use writer::WriterRegistry;

/// Builds a [`Server`] from a configuration, a message factory, exactly
/// one handler (sync xor async), and zero or more response refiners.
pub struct ServerBuilder<F: MessageFactory> {
    config: ServerConfig,
    factory: Arc<F>,
    sync_handler: Option<Box<dyn MessageHandler<F::Value>>>,
    async_handler: Option<Arc<dyn AsyncMessageHandler<F::Value>>>,
    refiners: Vec<Box<dyn ResponseRefiner<F::Value>>>,
    invalid_key_handler: Arc<dyn InvalidKeyHandler>,
}

impl<F: MessageFactory> ServerBuilder<F> {
    pub fn new(config: ServerConfig, factory: F) -> Self {
        Self {
            config,
            factory: Arc::new(factory),
            sync_handler: None,
            async_handler: None,
            refiners: Vec::new(),
            invalid_key_handler: Arc::new(DefaultInvalidKeyHandler),
        }
    }

    /// Registers the synchronous handler. Runs on the reactor thread, so
    /// it must not block.
    ///
    /// # Panics
    /// Panics if an async handler was already registered — exactly one of
    /// the two may be active per server.
    pub fn with_sync_handler(mut self, handler: impl MessageHandler<F::Value>) -> Self {
        assert!(self.async_handler.is_none(), "an async handler is already registered");
        self.sync_handler = Some(Box::new(handler));
        self
    }

    /// Registers the asynchronous handler.
    ///
    /// # Panics
    /// Panics if a sync handler was already registered.
    pub fn with_async_handler(mut self, handler: impl AsyncMessageHandler<F::Value>) -> Self {
        assert!(self.sync_handler.is_none(), "a sync handler is already registered");
        self.async_handler = Some(Arc::new(handler));
        self
    }

    /// Appends a response refiner; refiners run in registration order.
    pub fn with_refiner(mut self, refiner: impl ResponseRefiner<F::Value>) -> Self {
        self.refiners.push(Box::new(refiner));
        self
    }

    pub fn with_invalid_key_handler(mut self, handler: impl InvalidKeyHandler) -> Self {
        self.invalid_key_handler = Arc::new(handler);
        self
    }

    /// Binds the listening socket, spawns the reactor thread (and the
    /// reaper thread, if an async handler is registered), and returns a
    /// handle to shut it down.
    pub fn start(self) -> io::Result<ServerHandle> {
        let writers: WriterRegistry = Arc::new(Mutex::new(HashMap::new()));
        let assembly = ResponseAssembly::new(self.config.header_size(), self.refiners);
        let shutdown = Arc::new(AtomicBool::new(false));

        let (dispatcher, reaper) = match (self.sync_handler, self.async_handler) {
            (Some(_), Some(_)) => unreachable!("builder enforces at most one handler kind"),
            (Some(sync), None) => {
                let dispatcher = Dispatcher::new_sync(sync, assembly, Arc::clone(&writers));
                (Arc::new(dispatcher), None)
            }
            (None, Some(async_handler)) => {
                let (sender, receiver) = std::sync::mpsc::channel();
                let dispatcher = Arc::new(Dispatcher::new_async(
                    async_handler,
                    sender,
                    assembly,
                    Arc::clone(&writers),
                ));
                let reaper = AsyncJobReaper::new(
                    receiver,
                    Arc::clone(&dispatcher),
                    self.config.async_poll_bound(),
                    Arc::clone(&shutdown),
                );
                (dispatcher, Some(reaper))
            }
            (None, None) => (Arc::new(Dispatcher::new_inert(assembly, Arc::clone(&writers))), None),
        };

        let reactor = Reactor::new(
            self.config.bind_addr(),
            self.config.events_capacity(),
            self.config.header_size(),
            self.config.max_body_bytes(),
            Arc::clone(&self.factory),
            dispatcher,
            writers,
            self.invalid_key_handler,
            Arc::clone(&shutdown),
        )?;
        let waker = reactor.waker();
        let local_addr = reactor.local_addr()?;

        let reaper_thread = reaper.map(|reaper| {
            std::thread::Builder::new()
                .name("net-server-reaper".into())
                .spawn(move || reaper.run())
                .expect("failed to spawn reaper thread")
        });

        let reactor_thread = std::thread::Builder::new()
            .name("net-server-reactor".into())
            .spawn(move || reactor.run())
            .expect("failed to spawn reactor thread");

        Ok(ServerHandle { shutdown, waker, local_addr, reactor_thread, reaper_thread })
    }
}

/// A running server. Dropping this without calling [`shutdown`] leaves the
/// reactor and reaper threads running detached.
pub struct ServerHandle {
    shutdown: Arc<AtomicBool>,
    waker: Arc<mio::Waker>,
    local_addr: std::net::SocketAddr,
    reactor_thread: JoinHandle<()>,
    reaper_thread: Option<JoinHandle<()>>,
}

impl ServerHandle {
    /// The address the listening socket actually bound to — useful when
    /// `ServerConfig::bind_addr` used an ephemeral port (`:0`).
    pub fn local_addr(&self) -> std::net::SocketAddr {
        self.local_addr
    }

    /// Closes the selector (via a wakeup) and the listening socket,
    /// non-gracefully: in-flight connections are dropped, not drained.
    pub fn shutdown(self) -> io::Result<()> {
        self.shutdown.store(true, Ordering::Release);
        self.waker.wake()?;
        let _ = self.reactor_thread.join();
        if let Some(reaper_thread) = self.reaper_thread {
            let _ = reaper_thread.join();
        }
        Ok(())
    }
}
