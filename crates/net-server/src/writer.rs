use std::collections::{HashMap, VecDeque};
use std::io::{self, Write};
use std::os::fd::RawFd;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use mio::unix::SourceFd;
use mio::{Interest, Registry, Token, Waker};
use net_server_utils::safe_assert;

/// Every live connection's writer, keyed by its token. Shared between the
/// reactor (which creates/removes entries as connections open/close) and
/// the dispatcher (which looks one up to satisfy `NotifySink::notify`).
pub type WriterRegistry = Arc<Mutex<HashMap<Token, Arc<Writer>>>>;

/// One outbound buffer plus how much of it has made it to the socket.
pub struct WriteJob {
    buf: Vec<u8>,
    written: usize,
}

impl WriteJob {
    pub fn new(buf: Vec<u8>) -> Self {
        Self { buf, written: 0 }
    }

    pub fn total_size(&self) -> usize {
        self.buf.len()
    }

    fn remaining(&self) -> &[u8] {
        &self.buf[self.written..]
    }

    fn is_done(&self) -> bool {
        self.written == self.buf.len()
    }
}

/// Prepends the 4-byte big-endian length prefix to a refined response
/// body, producing one contiguous buffer so the size and payload can
/// never be torn across separate writes.
pub fn size_header_job(header_size: u8, body: Vec<u8>) -> WriteJob {
    let len = body.len() as u32;
    let mut buf = Vec::with_capacity(header_size as usize + body.len());
    let be = len.to_be_bytes();
    buf.extend_from_slice(&be[4 - header_size as usize..]);
    buf.extend_from_slice(&body);
    WriteJob::new(buf)
}

/// The thread-safe half of a connection's outbound queue: any thread may
/// enqueue a job and arm write-interest for it. Only the reactor thread
/// ever actually writes bytes to the socket (see `Writer::handle`).
///
/// Arming/disarming write interest reregisters the *raw fd* directly
/// through a cloned `Registry`, not the owned `mio::net::TcpStream` — that
/// lets a handler thread (the async reaper, or a handler calling back
/// through `NotifySink::notify`) flip interest without needing mutable
/// access to a socket the reactor thread exclusively owns.
pub struct Writer {
    registry: Registry,
    fd: RawFd,
    token: Token,
    backlog: Mutex<VecDeque<WriteJob>>,
    armed: AtomicBool,
    waker: Arc<Waker>,
}

impl Writer {
    pub fn new(registry: Registry, fd: RawFd, token: Token, waker: Arc<Waker>) -> Self {
        Self {
            registry,
            fd,
            token,
            backlog: Mutex::new(VecDeque::new()),
            armed: AtomicBool::new(false),
            waker,
        }
    }

    /// Appends a job to the tail of the queue and ensures write-interest is
    /// armed. Safe to call from any thread.
    pub fn enqueue(&self, job: WriteJob) -> io::Result<()> {
        self.backlog.lock().unwrap().push_back(job);
        self.arm()
    }

    pub fn queue_is_empty(&self) -> bool {
        self.backlog.lock().unwrap().is_empty()
    }

    fn arm(&self) -> io::Result<()> {
        if !self.armed.swap(true, Ordering::AcqRel) {
            self.reregister(Interest::READABLE | Interest::WRITABLE)?;
            // Reregistering from off the reactor thread doesn't reliably
            // interrupt a blocked `Poll::poll` on every platform; the
            // waker makes the wakeup explicit.
            self.waker.wake()?;
        }
        Ok(())
    }

    fn disarm(&self) -> io::Result<()> {
        if self.armed.swap(false, Ordering::AcqRel) {
            self.reregister(Interest::READABLE)?;
        }
        Ok(())
    }

    fn reregister(&self, interest: Interest) -> io::Result<()> {
        self.registry.reregister(&mut SourceFd(&self.fd), self.token, interest)
    }

    /// Called by the reactor when the socket reports write-readiness.
    /// Drains the head-of-line job until it completes or the socket would
    /// block; never reorders jobs appended mid-drain.
    pub fn handle(&self, stream: &mut impl Write) -> io::Result<()> {
        loop {
            let wrote = {
                let mut backlog = self.backlog.lock().unwrap();
                let Some(job) = backlog.front_mut() else {
                    drop(backlog);
                    return self.disarm();
                };
                match stream.write(job.remaining()) {
                    Ok(0) => return Err(io::Error::new(io::ErrorKind::WriteZero, "write returned 0")),
                    Ok(n) => {
                        job.written += n;
                        safe_assert!(job.written <= job.total_size());
                        if job.is_done() {
                            backlog.pop_front();
                        }
                        n
                    }
                    Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(()),
                    Err(e) => return Err(e),
                }
            };
            let _ = wrote;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn size_header_prepends_be_length() {
        let job = size_header_job(4, b"hello".to_vec());
        assert_eq!(job.total_size(), 9);
        assert_eq!(&job.buf[..4], &[0, 0, 0, 5]);
        assert_eq!(&job.buf[4..], b"hello");
    }

    #[test]
    fn write_job_tracks_progress() {
        let mut job = WriteJob::new(vec![1, 2, 3]);
        assert_eq!(job.remaining(), &[1, 2, 3]);
        job.written = 2;
        assert_eq!(job.remaining(), &[3]);
        assert!(!job.is_done());
        job.written = 3;
        assert!(job.is_done());
    }
}
