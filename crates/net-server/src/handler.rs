use std::time::Duration;

use mio::Token;

/// An error raised by a [`MessageFactory`] while decoding a frame body.
pub type CodecError = Box<dyn std::error::Error + Send + Sync>;

/// A decoded application value plus the raw bytes it came from.
///
/// The raw bytes are kept around purely so the connection can still refer
/// to "the original request" after the value has been handed to a
/// handler — e.g. [`NotifySink::notify`] takes the original request bytes,
/// not the decoded value, so a long-lived handler doesn't need `T: Clone`
/// just to remember what it answered.
#[derive(Debug, Clone)]
pub struct Message<T> {
    pub value: T,
    pub raw: Vec<u8>,
}

/// Decodes a complete frame body into an application value.
///
/// Implementations are expected to be pure and stateless — the same
/// factory instance decodes bodies from every connection concurrently (it
/// is shared behind an `Arc`).
pub trait MessageFactory: Send + Sync + 'static {
    type Value: Send + 'static;

    fn create(&self, body: &[u8]) -> Result<Self::Value, CodecError>;
}

/// Lets a handler push an unsolicited response to a connection without
/// holding a reference to the whole server — the capability object
/// mentioned in the design notes, implemented by `Dispatcher`.
pub trait NotifySink: Send + Sync {
    fn notify(&self, token: Token, original_request: &[u8], payload: Vec<u8>);
}

/// Passed to a synchronous [`MessageHandler`] for the duration of one
/// `handle` call.
pub struct ConnectionContext<'a> {
    pub token: Token,
    notify: &'a dyn NotifySink,
}

impl<'a> ConnectionContext<'a> {
    pub fn new(token: Token, notify: &'a dyn NotifySink) -> Self {
        Self { token, notify }
    }

    /// Enqueue an unsolicited response on this same connection.
    pub fn notify(&self, original_request: &[u8], payload: Vec<u8>) {
        self.notify.notify(self.token, original_request, payload);
    }
}

/// A synchronous message handler. Runs on the reactor thread — must not
/// block.
pub trait MessageHandler<T>: Send + Sync + 'static {
    fn handle(&self, ctx: &ConnectionContext<'_>, message: &T) -> Option<Vec<u8>>;
}

/// The outcome of one bounded wait on a [`PendingResult`].
pub enum PendingOutcome {
    /// The handler finished; `None` means "no response".
    Ready(Option<Vec<u8>>),
    /// Still running; try again later.
    Timeout,
    /// The handler failed, panicked, or its result channel was dropped
    /// without ever sending.
    Failed,
}

/// An in-flight async handler result. The reaper polls this with a bounded
/// wait so one slow job cannot starve the others.
pub trait PendingResult: Send {
    fn wait(&mut self, timeout: Duration) -> PendingOutcome;
}

/// An async message handler. `handle` is expected to return immediately,
/// handing off the real work to whatever executor the application already
/// runs (a thread pool, an async runtime, ...); this crate only knows how
/// to poll the result.
pub trait AsyncMessageHandler<T>: Send + Sync + 'static {
    fn handle(&self, message: &T) -> Box<dyn PendingResult>;
}

/// A synchronous transformation applied to a handler's response buffer
/// before framing. Refiners run in registration order and must not block.
pub trait ResponseRefiner<T>: Send + Sync + 'static {
    fn execute(&self, message: &T, buf: Vec<u8>) -> Vec<u8>;
}

/// Invoked when the reactor observes an event for a token it no longer
/// recognises. The reactor always closes the channel itself regardless of
/// what this does; the default just logs.
pub trait InvalidKeyHandler: Send + Sync + 'static {
    fn handle(&self, token: Token);
}

pub struct DefaultInvalidKeyHandler;

impl InvalidKeyHandler for DefaultInvalidKeyHandler {
    fn handle(&self, token: Token) {
        tracing::debug!(?token, "invalid key event, closing");
    }
}

/// A one-shot channel-backed [`PendingResult`], the concrete type most
/// applications will use: hand the `Sender` half to whatever thread or
/// callback produces the answer.
pub struct ChannelPending {
    rx: std::sync::mpsc::Receiver<Option<Vec<u8>>>,
}

impl ChannelPending {
    pub fn new() -> (std::sync::mpsc::Sender<Option<Vec<u8>>>, Self) {
        let (tx, rx) = std::sync::mpsc::channel();
        (tx, Self { rx })
    }
}

impl PendingResult for ChannelPending {
    fn wait(&mut self, timeout: Duration) -> PendingOutcome {
        match self.rx.recv_timeout(timeout) {
            Ok(value) => PendingOutcome::Ready(value),
            Err(std::sync::mpsc::RecvTimeoutError::Timeout) => PendingOutcome::Timeout,
            Err(std::sync::mpsc::RecvTimeoutError::Disconnected) => PendingOutcome::Failed,
        }
    }
}
