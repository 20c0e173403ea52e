use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::mpsc::Sender;
use std::sync::Arc;

use mio::Token;

use crate::error::{Result, ServerError};
use crate::handler::{
    AsyncMessageHandler, ConnectionContext, Message, MessageHandler, NotifySink, PendingResult,
};
use crate::response::ResponseAssembly;
use crate::writer::{WriteJob, WriterRegistry};

/// One decoded request plus its still-pending handler result, queued for
/// the reaper thread to poll.
pub struct AsyncJob<T> {
    pub token: Token,
    pub request: Message<T>,
    pub pending: Box<dyn PendingResult>,
}

enum HandlerKind<T> {
    Sync(Box<dyn MessageHandler<T>>),
    Async(Arc<dyn AsyncMessageHandler<T>>, Sender<AsyncJob<T>>),
    None,
}

/// Routes a decoded [`Message`] to whichever handler was registered, and
/// answers `NotifySink` calls from either a sync handler (same thread) or
/// the reaper (a different thread, once an async job completes).
///
/// Registering both a sync and an async handler is rejected at
/// construction — this removes the "which one wins" ambiguity at the type
/// level rather than resolving it at dispatch time.
pub struct Dispatcher<T> {
    handler: HandlerKind<T>,
    assembly: ResponseAssembly<T>,
    writers: WriterRegistry,
}

impl<T: Send + 'static> Dispatcher<T> {
    pub fn new_sync(
        handler: Box<dyn MessageHandler<T>>,
        assembly: ResponseAssembly<T>,
        writers: WriterRegistry,
    ) -> Self {
        Self { handler: HandlerKind::Sync(handler), assembly, writers }
    }

    pub fn new_async(
        handler: Arc<dyn AsyncMessageHandler<T>>,
        sender: Sender<AsyncJob<T>>,
        assembly: ResponseAssembly<T>,
        writers: WriterRegistry,
    ) -> Self {
        Self { handler: HandlerKind::Async(handler, sender), assembly, writers }
    }

    pub fn new_inert(assembly: ResponseAssembly<T>, writers: WriterRegistry) -> Self {
        Self { handler: HandlerKind::None, assembly, writers }
    }

    /// Called by the reactor with each message a `RequestReader` completes.
    /// Never blocks: the sync path runs the handler inline (catching
    /// panics so one bad handler doesn't take the reactor down), the async
    /// path only enqueues the job.
    ///
    /// A panicking sync handler is reported back as `Err`, not just
    /// logged: the reactor closes that connection on `Err` the same way it
    /// does for any other read failure, so a broken handler can't leave a
    /// dead connection registered forever.
    pub fn dispatch(&self, token: Token, message: Message<T>) -> Result<()> {
        match &self.handler {
            HandlerKind::Sync(handler) => {
                let ctx = ConnectionContext::new(token, self);
                let outcome =
                    catch_unwind(AssertUnwindSafe(|| handler.handle(&ctx, &message.value)));
                match outcome {
                    Ok(Some(buf)) => {
                        self.enqueue_response(token, &message, buf);
                        Ok(())
                    }
                    Ok(None) => Ok(()),
                    Err(_) => {
                        let err = ServerError::HandlerFailure { token };
                        tracing::error!(error = %err, "closing connection");
                        Err(err)
                    }
                }
            }
            HandlerKind::Async(handler, sender) => {
                let pending = handler.handle(&message.value);
                let job = AsyncJob { token, request: message, pending };
                if sender.send(job).is_err() {
                    tracing::error!(?token, "async reaper channel is gone, dropping message");
                }
                Ok(())
            }
            HandlerKind::None => {
                tracing::debug!(?token, "no handler registered, dropping message");
                Ok(())
            }
        }
    }

    /// Runs the refiner chain and frames the result, then enqueues it on
    /// the connection's writer. Used both for a sync handler's direct
    /// return value and for an async job's completed result.
    pub fn enqueue_response(&self, token: Token, request: &Message<T>, buf: Vec<u8>) {
        let job = self.assembly.assemble(request, buf);
        self.write(token, job);
    }

    fn write(&self, token: Token, job: WriteJob) {
        let writer = self.writers.lock().unwrap().get(&token).cloned();
        match writer {
            Some(writer) => {
                if let Err(e) = writer.enqueue(job) {
                    tracing::warn!(?token, error = %e, "failed to arm write interest");
                }
            }
            None => tracing::debug!(?token, "connection closed before response could be queued"),
        }
    }
}

impl<T> NotifySink for Dispatcher<T> {
    fn notify(&self, token: Token, _original_request: &[u8], payload: Vec<u8>) {
        // A bare notification has no decoded request to run refiners
        // against; refiners that need the request value should be driven
        // through the normal handler-response path instead.
        self.write(token, WriteJob::new(payload));
    }
}
