use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{Receiver, RecvTimeoutError};
use std::sync::Arc;
use std::time::Duration;

use crate::dispatcher::{AsyncJob, Dispatcher};
use crate::error::ServerError;
use crate::handler::PendingOutcome;

/// Drains async jobs off the dispatcher's channel and polls each one with
/// a bounded wait so a single slow handler can't starve the others.
///
/// A failed or cancelled job is fatal to the reaper: `run` logs it and
/// returns, discarding whatever else was in flight. The reactor keeps
/// accepting and serving sync traffic; async replies simply stop. This is
/// a documented limitation, not an oversight — re-deriving a channel
/// receiver for a freshly spawned replacement thread isn't possible once
/// this one has moved it, so there is no respawn path.
///
/// Shutdown is cooperative: the `Dispatcher` this reaper polls against is
/// kept alive by `Arc<Dispatcher<T>>`, so its `Sender` never drops on its
/// own and a blocking `recv()` would never return. `run` instead checks
/// `shutdown` between jobs and bounds its wait on the channel by
/// `poll_bound`, so it notices a shutdown request within one poll cycle.
pub struct AsyncJobReaper<T> {
    receiver: Receiver<AsyncJob<T>>,
    dispatcher: Arc<Dispatcher<T>>,
    poll_bound: Duration,
    shutdown: Arc<AtomicBool>,
}

impl<T: Send + 'static> AsyncJobReaper<T> {
    pub fn new(
        receiver: Receiver<AsyncJob<T>>,
        dispatcher: Arc<Dispatcher<T>>,
        poll_bound: Duration,
        shutdown: Arc<AtomicBool>,
    ) -> Self {
        Self { receiver, dispatcher, poll_bound, shutdown }
    }

    /// Runs until shutdown is signalled, the dispatcher's sender side is
    /// dropped (clean teardown before shutdown was even requested), or a
    /// job fails (fatal). Intended to be the body of a dedicated thread.
    pub fn run(mut self) {
        let mut inflight: Vec<AsyncJob<T>> = Vec::new();
        loop {
            if self.shutdown.load(Ordering::Acquire) {
                return;
            }

            if inflight.is_empty() {
                match self.receiver.recv_timeout(self.poll_bound) {
                    Ok(job) => inflight.push(job),
                    Err(RecvTimeoutError::Timeout) => continue,
                    Err(RecvTimeoutError::Disconnected) => return,
                }
            }
            // Top up with anything else already queued without blocking,
            // so a burst of requests is polled together.
            while let Ok(job) = self.receiver.try_recv() {
                inflight.push(job);
            }

            let mut still_pending = Vec::with_capacity(inflight.len());
            for mut job in inflight.drain(..) {
                match self.poll_once(&mut job) {
                    PendingOutcome::Ready(Some(buf)) => {
                        self.dispatcher.enqueue_response(job.token, &job.request, buf);
                    }
                    PendingOutcome::Ready(None) => {}
                    PendingOutcome::Timeout => still_pending.push(job),
                    PendingOutcome::Failed => {
                        let err = ServerError::AsyncFailure { token: job.token };
                        tracing::error!(error = %err, "terminating reaper; async replies will stop");
                        return;
                    }
                }
            }
            inflight = still_pending;
        }
    }

    fn poll_once(&self, job: &mut AsyncJob<T>) -> PendingOutcome {
        catch_unwind(AssertUnwindSafe(|| job.pending.wait(self.poll_bound)))
            .unwrap_or(PendingOutcome::Failed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::{ChannelPending, Message};
    use crate::response::ResponseAssembly;
    use crate::writer::WriterRegistry;
    use mio::Token;
    use std::collections::HashMap;
    use std::sync::Mutex;

    fn writers() -> WriterRegistry {
        Arc::new(Mutex::new(HashMap::new()))
    }

    fn not_shutdown() -> Arc<AtomicBool> {
        Arc::new(AtomicBool::new(false))
    }

    #[test]
    fn ready_result_is_handed_to_dispatcher_without_panicking() {
        let dispatcher = Arc::new(Dispatcher::<Vec<u8>>::new_inert(
            ResponseAssembly::new(4, vec![]),
            writers(),
        ));
        let (tx, rx) = std::sync::mpsc::channel();
        let (result_tx, pending) = ChannelPending::new();
        result_tx.send(Some(b"hi".to_vec())).unwrap();
        tx.send(AsyncJob {
            token: Token(0),
            request: Message { value: Vec::new(), raw: Vec::new() },
            pending: Box::new(pending),
        })
        .unwrap();
        drop(tx);

        let reaper =
            AsyncJobReaper::new(rx, dispatcher, Duration::from_millis(50), not_shutdown());
        reaper.run();
    }

    #[test]
    fn disconnected_pending_terminates_the_reaper() {
        let dispatcher = Arc::new(Dispatcher::<Vec<u8>>::new_inert(
            ResponseAssembly::new(4, vec![]),
            writers(),
        ));
        let (tx, rx) = std::sync::mpsc::channel();
        let (result_tx, pending) = ChannelPending::new();
        drop(result_tx);
        tx.send(AsyncJob {
            token: Token(0),
            request: Message { value: Vec::new(), raw: Vec::new() },
            pending: Box::new(pending),
        })
        .unwrap();

        let reaper =
            AsyncJobReaper::new(rx, dispatcher, Duration::from_millis(50), not_shutdown());
        // Terminates instead of looping forever on `tx`, which is still held.
        reaper.run();
    }

    #[test]
    fn shutdown_flag_stops_an_idle_reaper_even_though_the_sender_is_alive() {
        let dispatcher = Arc::new(Dispatcher::<Vec<u8>>::new_inert(
            ResponseAssembly::new(4, vec![]),
            writers(),
        ));
        let (tx, rx) = std::sync::mpsc::channel();
        let shutdown = Arc::new(AtomicBool::new(false));
        let reaper =
            AsyncJobReaper::new(rx, dispatcher, Duration::from_millis(20), Arc::clone(&shutdown));

        let handle = std::thread::spawn(move || reaper.run());
        // Nothing was ever sent, so the reaper is blocked in `recv_timeout`
        // with no jobs in flight — the state that previously deadlocked
        // `ServerHandle::shutdown` because `tx` (held by `dispatcher`) was
        // never going to drop on its own.
        std::thread::sleep(Duration::from_millis(50));
        shutdown.store(true, Ordering::Release);
        handle.join().unwrap();
        drop(tx);
    }
}
